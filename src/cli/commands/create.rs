//! `sealvault create`: create a new, empty secret owned by the caller.

use chrono::Utc;

use crate::cli::output;
use crate::cli::{open_engine, parse_duration, principal, scope, Cli, Workspace};
use crate::errors::Result;
use crate::vault::NewSecret;

/// Options of `create` beyond the secret name.
pub struct CreateOptions<'a> {
    pub secret_type: &'a str,
    pub description: Option<&'a str>,
    pub expires_in: Option<&'a str>,
    pub max_reads: Option<u64>,
}

/// Execute the `create` command.
pub fn execute(cli: &Cli, name: &str, opts: CreateOptions<'_>) -> Result<()> {
    let mut request = NewSecret::new(name, scope(cli)).with_type(opts.secret_type);
    request.description = opts.description.map(str::to_string);
    if let Some(expires_in) = opts.expires_in {
        request = request.with_expiration(Utc::now() + parse_duration(expires_in)?);
    }
    if let Some(max_reads) = opts.max_reads {
        request = request.with_max_reads(max_reads);
    }

    let ws = Workspace::resolve(cli)?;
    let engine = open_engine(&ws)?;
    let node = engine.create_secret(&principal(cli), request)?;

    output::success(&format!(
        "Secret '{}' created in {} (owner {})",
        node.name, node.scope, node.owner
    ));
    if let Some(exp) = node.expires_at {
        output::info(&format!("Expires at {}", exp.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    output::tip(&format!("Run `sealvault put {name}` to store its value."));
    Ok(())
}
