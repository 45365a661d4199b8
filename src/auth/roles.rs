//! Role gate applied before any call to the directory API

use super::credentials::strip_group_prefix;
use crate::error::Error;
use crate::Result;

pub const ADMINISTRATOR: &str = "administrator";
pub const EDITOR: &str = "editor";
pub const LECTOR: &str = "lector";

/// Roles allowed to read users and groups
pub const READ_ROLES: &[&str] = &[ADMINISTRATOR, EDITOR, LECTOR];

/// Roles allowed to create users and groups
pub const CREATE_ROLES: &[&str] = &[ADMINISTRATOR, EDITOR];

/// Roles allowed to update or delete users and groups
pub const MANAGE_ROLES: &[&str] = &[ADMINISTRATOR];

/// True when at least one of the user's groups is among `required`
///
/// Group names are compared without their `casdoor-cli/` namespace.
pub fn has_required_role<S: AsRef<str>>(groups: &[S], required: &[&str]) -> bool {
    groups
        .iter()
        .map(|g| strip_group_prefix(g.as_ref()))
        .any(|g| required.contains(&g))
}

/// Like [`has_required_role`], failing with `InsufficientPermissions`
pub fn require_roles<S: AsRef<str>>(groups: &[S], required: &[&str]) -> Result<()> {
    if has_required_role(groups, required) {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            required: required.iter().map(|r| r.to_string()).collect(),
        })
    }
}
