//! Casdoor directory API
//!
//! This module provides:
//! - [`User`] and [`Group`] as Casdoor returns them
//! - [`Directory`] trait the commands talk to
//! - [`CasdoorClient`], the REST implementation

mod client;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::auth::credentials::strip_group_prefix;
use crate::Result;

pub use client::{check_endpoint, CasdoorClient};

/// A Casdoor user
///
/// Fields the CLI does not touch are carried in `extra` so an update
/// sends the record back unchanged apart from the edited fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub owner: String,

    pub name: String,

    #[serde(default)]
    pub created_time: String,

    #[serde(default)]
    pub id: String,

    #[serde(default, rename = "type")]
    pub user_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub email: String,

    /// Memberships as `owner/group`
    #[serde(default, deserialize_with = "null_as_empty")]
    pub groups: Vec<String>,

    #[serde(default)]
    pub signup_application: String,

    #[serde(default)]
    pub is_admin: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Group memberships without the organization prefix
    pub fn roles(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|g| strip_group_prefix(g).to_string())
            .collect()
    }
}

/// A Casdoor group, which the CLI treats as a role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub owner: String,

    pub name: String,

    #[serde(default)]
    pub created_time: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default, rename = "type")]
    pub group_type: String,

    #[serde(default)]
    pub parent_id: String,

    #[serde(default)]
    pub is_top_group: bool,

    #[serde(default)]
    pub is_enabled: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Group {
    /// Membership string users carry for this group
    pub fn membership(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Users and groups of one organization
#[async_trait]
pub trait Directory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>>;

    /// `None` when no user has this name
    async fn get_user(&self, name: &str) -> Result<Option<User>>;

    async fn add_user(&self, user: &User) -> Result<()>;

    /// Replace the user currently named `name` with `user`
    async fn update_user(&self, name: &str, user: &User) -> Result<()>;

    async fn delete_user(&self, user: &User) -> Result<()>;

    async fn list_groups(&self) -> Result<Vec<Group>>;

    async fn add_group(&self, group: &Group) -> Result<()>;

    async fn update_group(&self, name: &str, group: &Group) -> Result<()>;

    async fn delete_group(&self, group: &Group) -> Result<()>;

    /// Revoke the token named `token_name` on the server
    async fn revoke_token(&self, token_name: &str) -> Result<()>;
}
