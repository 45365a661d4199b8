//! Platform secret store access
//!
//! This module provides:
//! - The `SecretBackend` trait the rest of the crate stores secrets through
//! - `KeyringBackend`, backed by the OS keychain / credential manager / kernel keyring
//! - `MemoryBackend`, an in-process store used by tests
//! - `ChunkedStore`, which spreads long values over several bounded entries

mod chunked;

pub use chunked::{ChunkedStore, CHUNK_SIZE};

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::Error;
use crate::Result;

/// Service name every Casdoor CLI entry is filed under
pub const SERVICE_NAME: &str = "casdoor-cli";

/// Minimal key/value view of a platform secret store
///
/// "Not found" is part of the normal return value (`None` / `false`);
/// `Err` is reserved for every other backend failure.
pub trait SecretBackend: Send + Sync {
    /// Read a value, `None` when the entry does not exist
    fn get(&self, service: &str, key: &str) -> Result<Option<String>>;

    /// Create or overwrite an entry; empty values are rejected
    fn set(&self, service: &str, key: &str, value: &str) -> Result<()>;

    /// Remove an entry, `false` when there was nothing to remove
    fn delete(&self, service: &str, key: &str) -> Result<bool>;
}

/// OS keyring backend
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringBackend;

impl KeyringBackend {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, key: &str) -> std::result::Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(service, key)
    }
}

impl SecretBackend for KeyringBackend {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        let entry = Self::entry(service, key)
            .map_err(|e| Error::StoreRead(format!("{}: {}", key, e)))?;

        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::StoreRead(format!("{}: {}", key, e))),
        }
    }

    fn set(&self, service: &str, key: &str, value: &str) -> Result<()> {
        let entry = Self::entry(service, key)
            .map_err(|e| Error::StoreWrite(format!("{}: {}", key, e)))?;

        entry
            .set_password(value)
            .map_err(|e| Error::StoreWrite(format!("{}: {}", key, e)))
    }

    fn delete(&self, service: &str, key: &str) -> Result<bool> {
        let entry = Self::entry(service, key)
            .map_err(|e| Error::StoreWrite(format!("{}: {}", key, e)))?;

        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(Error::StoreWrite(format!("{}: {}", key, e))),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<(String, String), String>,
    writes_before_failure: Option<usize>,
    fail_reads: bool,
}

/// In-memory backend with failure injection
///
/// Like the platform keyrings it refuses to store an empty secret.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `count` more writes succeed, then fail every following write
    pub fn fail_writes_after(&self, count: usize) {
        self.lock().writes_before_failure = Some(count);
    }

    /// Make every read fail with a backend error
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Keys currently stored under `service`, in sorted order
    pub fn keys(&self, service: &str) -> Vec<String> {
        self.lock()
            .entries
            .keys()
            .filter(|(s, _)| s == service)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, service: &str, key: &str) -> Result<Option<String>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(Error::StoreRead(format!("{}: backend unavailable", key)));
        }
        Ok(state
            .entries
            .get(&(service.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, service: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        if value.is_empty() {
            return Err(Error::StoreWrite(format!("{}: secret cannot be empty", key)));
        }
        if let Some(remaining) = state.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(Error::StoreWrite(format!("{}: backend unavailable", key)));
            }
            *remaining -= 1;
        }
        debug!(service = %service, key = %key, "memory backend set");
        state
            .entries
            .insert((service.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, key: &str) -> Result<bool> {
        Ok(self
            .lock()
            .entries
            .remove(&(service.to_string(), key.to_string()))
            .is_some())
    }
}
