//! Authorization: who may do what to which secret.
//!
//! This module provides:
//! - Principals, roles, grants and shares (`model`)
//! - Additive permission resolution (`resolver`)
//! - The ordered lifecycle + permission gate (`gate`)

pub mod gate;
pub mod model;
pub mod resolver;

pub use gate::AccessGate;
pub use model::{
    Action, NewShare, PermissionSet, Principal, Recipient, Role, RoleGrant, ShareId,
    SharePermission, ShareRecord,
};
pub use resolver::PermissionResolver;
