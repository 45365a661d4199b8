//! Session token material
//!
//! `TokenData` is what a successful login produces and the only thing the
//! session store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Namespace Casdoor puts in front of group memberships
pub const GROUP_PREFIX: &str = "casdoor-cli/";

/// Namespace in front of the token name carried in `jti`
pub const JTI_PREFIX: &str = "admin/";

/// Raw OAuth2 token fields from the token endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default)]
    pub refresh_token: String,

    /// When the access token expires (informational only)
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Identity claims the CLI relies on; anything else in the ID token is ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenClaims {
    /// Subject, the Casdoor user id
    #[serde(default)]
    pub sub: String,

    /// Login name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    /// Organization the user belongs to
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub email: String,

    /// Group memberships, in the order Casdoor reports them
    #[serde(default, deserialize_with = "null_as_empty")]
    pub groups: Vec<String>,

    #[serde(default)]
    pub is_admin: bool,

    /// Token name, used to revoke the session on logout
    #[serde(default)]
    pub jti: String,

    #[serde(default)]
    pub iss: String,

    #[serde(default)]
    pub exp: i64,

    #[serde(default)]
    pub iat: i64,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl IdTokenClaims {
    /// Group names with the `casdoor-cli/` namespace removed
    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| strip_group_prefix(g).to_string()).collect()
    }

    /// Token name without the `admin/` namespace
    pub fn token_name(&self) -> &str {
        self.jti.strip_prefix(JTI_PREFIX).unwrap_or(&self.jti)
    }
}

/// Everything a login yields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenData {
    pub oauth2_token: OAuth2Token,
    pub id_token_claims: IdTokenClaims,
}

impl TokenData {
    /// Whether the stored access token is past its expiry
    ///
    /// Informational only: a session counts as logged in while it is
    /// stored, and an expired token is discovered when the API rejects it.
    pub fn is_expired(&self) -> bool {
        match self.oauth2_token.expiry {
            Some(expiry) => Utc::now() >= expiry,
            None => false,
        }
    }
}

pub fn strip_group_prefix(group: &str) -> &str {
    group.strip_prefix(GROUP_PREFIX).unwrap_or(group)
}
