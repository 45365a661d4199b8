//! Role-gated user and group operations
//!
//! Every operation checks the session's groups first and returns
//! `InsufficientPermissions` without touching the directory when the check
//! fails. Interactive input is supplied by the caller through closures,
//! which only run once the gate has passed.

use crate::api::{Directory, Group, User};
use crate::auth::credentials::TokenData;
use crate::auth::roles::{require_roles, CREATE_ROLES, MANAGE_ROLES, READ_ROLES};
use crate::Result;

/// Result of an operation on a named user or group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// No user or group has the given name
    Missing,
    /// The user declined the confirmation
    Cancelled,
}

fn gate(session: &TokenData, required: &[&str]) -> Result<()> {
    require_roles(&session.id_token_claims.groups, required)
}

pub async fn list_users(session: &TokenData, directory: &dyn Directory) -> Result<Vec<User>> {
    gate(session, READ_ROLES)?;
    directory.list_users().await
}

/// Create a user; `build` receives the groups a user can be assigned to
pub async fn add_user<F>(session: &TokenData, directory: &dyn Directory, build: F) -> Result<User>
where
    F: FnOnce(&[Group]) -> Result<User>,
{
    gate(session, CREATE_ROLES)?;
    let groups = directory.list_groups().await?;
    let user = build(&groups)?;
    directory.add_user(&user).await?;
    tracing::info!("user {} added", user.name);
    Ok(user)
}

/// Apply `edit` to the user called `name` and store the result
pub async fn update_user<F>(
    session: &TokenData,
    directory: &dyn Directory,
    name: &str,
    edit: F,
) -> Result<Outcome>
where
    F: FnOnce(User, &[Group]) -> Result<User>,
{
    gate(session, MANAGE_ROLES)?;
    let Some(user) = directory.get_user(name).await? else {
        return Ok(Outcome::Missing);
    };

    let groups = directory.list_groups().await?;
    let updated = edit(user, &groups)?;
    directory.update_user(name, &updated).await?;
    tracing::info!("user {} updated", name);
    Ok(Outcome::Done)
}

/// Delete the user called `name` once `confirm` agrees
pub async fn delete_user<F>(
    session: &TokenData,
    directory: &dyn Directory,
    name: &str,
    confirm: F,
) -> Result<Outcome>
where
    F: FnOnce(&User) -> Result<bool>,
{
    gate(session, MANAGE_ROLES)?;
    let Some(user) = directory.get_user(name).await? else {
        return Ok(Outcome::Missing);
    };

    if !confirm(&user)? {
        return Ok(Outcome::Cancelled);
    }

    directory.delete_user(&user).await?;
    tracing::info!("user {} deleted", name);
    Ok(Outcome::Done)
}

pub async fn list_groups(session: &TokenData, directory: &dyn Directory) -> Result<Vec<Group>> {
    gate(session, READ_ROLES)?;
    directory.list_groups().await
}

pub async fn add_group<F>(session: &TokenData, directory: &dyn Directory, build: F) -> Result<Group>
where
    F: FnOnce() -> Result<Group>,
{
    gate(session, CREATE_ROLES)?;
    let group = build()?;
    directory.add_group(&group).await?;
    tracing::info!("group {} added", group.name);
    Ok(group)
}

async fn find_group(directory: &dyn Directory, name: &str) -> Result<Option<Group>> {
    Ok(directory
        .list_groups()
        .await?
        .into_iter()
        .find(|g| g.name == name))
}

pub async fn update_group<F>(
    session: &TokenData,
    directory: &dyn Directory,
    name: &str,
    edit: F,
) -> Result<Outcome>
where
    F: FnOnce(Group) -> Result<Group>,
{
    gate(session, MANAGE_ROLES)?;
    let Some(group) = find_group(directory, name).await? else {
        return Ok(Outcome::Missing);
    };

    let updated = edit(group)?;
    directory.update_group(name, &updated).await?;
    tracing::info!("group {} updated", name);
    Ok(Outcome::Done)
}

pub async fn delete_group<F>(
    session: &TokenData,
    directory: &dyn Directory,
    name: &str,
    confirm: F,
) -> Result<Outcome>
where
    F: FnOnce(&Group) -> Result<bool>,
{
    gate(session, MANAGE_ROLES)?;
    let Some(group) = find_group(directory, name).await? else {
        return Ok(Outcome::Missing);
    };

    if !confirm(&group)? {
        return Ok(Outcome::Cancelled);
    }

    directory.delete_group(&group).await?;
    tracing::info!("group {} deleted", name);
    Ok(Outcome::Done)
}
