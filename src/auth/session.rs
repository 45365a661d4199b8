//! Session persistence
//!
//! A session is the `TokenData` of the last successful login, spread over
//! a fixed set of chunked secret store fields. Being logged in means that
//! at least one of these fields exists; token expiry is not consulted.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task;
use tracing::{debug, warn};

use super::credentials::{strip_group_prefix, TokenData, JTI_PREFIX};
use super::provider::Authenticator;
use crate::error::Error;
use crate::secrets::{ChunkedStore, KeyringBackend, SecretBackend, SERVICE_NAME};
use crate::Result;

const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";
const TOKEN_TYPE: &str = "token_type";
const EXPIRY: &str = "expiry";
const OWNER: &str = "owner";
const NAME: &str = "name";
const ID: &str = "id";
const JTI: &str = "jti";
const GROUPS: &str = "groups";
const IS_ADMIN: &str = "is_admin";

/// Every logical key a session is stored under
pub const SESSION_FIELDS: &[&str] = &[
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    TOKEN_TYPE,
    EXPIRY,
    OWNER,
    NAME,
    ID,
    JTI,
    GROUPS,
    IS_ADMIN,
];

const GROUP_SEPARATOR: &str = ", ";

/// Where the session returned by [`SessionManager::ensure_session`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Loaded from the secret store
    Existing,
    /// Produced by a login that just completed
    Fresh,
}

pub struct SessionManager<B> {
    store: Arc<ChunkedStore<B>>,
}

impl SessionManager<KeyringBackend> {
    /// Session manager over the OS keyring
    pub fn keyring() -> Self {
        Self::new(KeyringBackend::new())
    }
}

impl<B: SecretBackend> SessionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            store: Arc::new(ChunkedStore::new(backend, SERVICE_NAME)),
        }
    }

    pub fn store(&self) -> &ChunkedStore<B> {
        &self.store
    }

    /// Rebuild the stored session
    ///
    /// Missing fields keep their zero value. `NotFound` is returned only
    /// when no field is stored at all.
    pub fn load_session(&self) -> Result<TokenData> {
        load_from(&self.store)
    }

    /// Persist `data`, all fields or none
    ///
    /// If any field cannot be written, every session field is removed
    /// again and `StoreWrite` is returned.
    pub fn save_session(&self, data: &TokenData) -> Result<()> {
        save_to(&self.store, data)
    }

    /// Remove every session field; a no-op when nothing is stored
    pub fn clear_session(&self) -> Result<()> {
        clear(&self.store)
    }
}

impl<B: SecretBackend + 'static> SessionManager<B> {
    /// Reuse the stored session or log in and store the new one
    ///
    /// Secret store calls block, so they run on the blocking thread pool.
    pub async fn ensure_session<A>(&self, authenticator: &A) -> Result<(TokenData, SessionOrigin)>
    where
        A: Authenticator + ?Sized,
    {
        let store = Arc::clone(&self.store);
        match run_blocking(move || load_from(&store)).await {
            Ok(data) => return Ok((data, SessionOrigin::Existing)),
            Err(e) if e.is_not_found() => debug!("no stored session, starting login"),
            Err(e) => return Err(e),
        }

        let data = authenticator.authorize().await?;

        let store = Arc::clone(&self.store);
        let to_save = data.clone();
        run_blocking(move || save_to(&store, &to_save)).await?;
        Ok((data, SessionOrigin::Fresh))
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("secret store task failed: {}", e)))?
}

fn load_from<B: SecretBackend>(store: &ChunkedStore<B>) -> Result<TokenData> {
    let mut data = TokenData::default();
    let mut found = 0;

    for field in SESSION_FIELDS {
        match store.load(field) {
            Ok(value) => {
                apply_field(&mut data, field, value);
                found += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if found == 0 {
        return Err(Error::NotFound("no session stored".to_string()));
    }

    debug!(fields = found, "session loaded");
    Ok(data)
}

fn save_to<B: SecretBackend>(store: &ChunkedStore<B>, data: &TokenData) -> Result<()> {
    for (field, value) in encode_fields(data) {
        if let Err(e) = store.save(field, &value) {
            warn!("failed to save {}: {}", field, e);
            if let Err(rollback) = clear(store) {
                warn!("failed to roll back partial session: {}", rollback);
            }
            return Err(match e {
                Error::StoreWrite(_) => e,
                other => Error::StoreWrite(other.to_string()),
            });
        }
    }

    debug!("session saved");
    Ok(())
}

fn clear<B: SecretBackend>(store: &ChunkedStore<B>) -> Result<()> {
    let mut first_error = None;

    for field in SESSION_FIELDS {
        if let Err(e) = store.delete(field) {
            warn!("failed to delete {}: {}", field, e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn encode_fields(data: &TokenData) -> Vec<(&'static str, String)> {
    let token = &data.oauth2_token;
    let claims = &data.id_token_claims;

    let groups = claims
        .groups
        .iter()
        .map(|g| strip_group_prefix(g))
        .collect::<Vec<_>>()
        .join(GROUP_SEPARATOR);

    let expiry = token
        .expiry
        .map(|e| e.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    vec![
        (ACCESS_TOKEN, token.access_token.clone()),
        (REFRESH_TOKEN, token.refresh_token.clone()),
        (TOKEN_TYPE, token.token_type.clone()),
        (EXPIRY, expiry),
        (OWNER, claims.owner.clone()),
        (NAME, claims.name.clone()),
        (ID, claims.sub.clone()),
        (JTI, claims.jti.clone()),
        (GROUPS, groups),
        (IS_ADMIN, claims.is_admin.to_string()),
    ]
}

fn apply_field(data: &mut TokenData, field: &str, value: String) {
    let token = &mut data.oauth2_token;
    let claims = &mut data.id_token_claims;

    match field {
        ACCESS_TOKEN => token.access_token = value,
        REFRESH_TOKEN => token.refresh_token = value,
        TOKEN_TYPE => token.token_type = value,
        EXPIRY => {
            token.expiry = DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|e| e.with_timezone(&Utc));
        }
        OWNER => claims.owner = value,
        NAME => claims.name = value,
        ID => claims.sub = value,
        JTI => claims.jti = value.strip_prefix(JTI_PREFIX).unwrap_or(&value).to_string(),
        GROUPS => {
            claims.groups = value
                .split(GROUP_SEPARATOR)
                .map(|g| strip_group_prefix(g.trim()))
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }
        IS_ADMIN => claims.is_admin = value.trim().parse().unwrap_or(false),
        _ => {}
    }
}
