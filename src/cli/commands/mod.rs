//! One module per subcommand.  Each exposes an `execute` function.

pub mod audit_cmd;
pub mod create;
pub mod delete;
pub mod expire;
pub mod get;
pub mod init;
pub mod list;
pub mod put;
pub mod revoke;
pub mod rotate;
pub mod share;
pub mod shares;
pub mod status;
pub mod versions;
