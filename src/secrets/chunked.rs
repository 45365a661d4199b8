//! Chunked secret storage
//!
//! Platform keyrings cap the size of a single entry, while ID tokens and
//! access tokens easily exceed it. A logical key is therefore stored as
//! `{key}_chunk_0`, `{key}_chunk_1`, ... with every chunk at most
//! [`CHUNK_SIZE`] bytes. Chunk indices for a key always form the
//! contiguous range `0..n`.
//!
//! Keyrings refuse empty secrets, so the empty string is written as a
//! single `{key}_empty` marker entry instead of a chunk.

use tracing::debug;

use super::SecretBackend;
use crate::error::Error;
use crate::Result;

/// Largest value written to a single secret store entry
pub const CHUNK_SIZE: usize = 1024;

/// Content of the marker entry recording an empty value
const EMPTY_MARKER: &str = "1";

/// Splits and rejoins values across bounded secret store entries
pub struct ChunkedStore<B> {
    backend: B,
    service: String,
}

impl<B: SecretBackend> ChunkedStore<B> {
    pub fn new(backend: B, service: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store `value` under `key`, replacing any previous chunks
    ///
    /// A failed chunk write is reported as `StoreWrite`; chunks written
    /// before the failure are left in place.
    pub fn save(&self, key: &str, value: &str) -> Result<()> {
        self.delete(key)?;

        if value.is_empty() {
            self.write(&empty_key(key), EMPTY_MARKER)?;
            debug!(key = %key, "saved empty secret");
            return Ok(());
        }

        let chunks = split_in_chunks(value, CHUNK_SIZE);
        for (index, chunk) in chunks.iter().enumerate() {
            self.write(&chunk_key(key, index), chunk)?;
        }

        debug!(key = %key, chunks = chunks.len(), "saved chunked secret");
        Ok(())
    }

    /// Rebuild the value stored under `key`
    ///
    /// Returns `NotFound` when neither chunk 0 nor the empty marker exists. Any other lookup
    /// failure is propagated.
    pub fn load(&self, key: &str) -> Result<String> {
        let mut value = String::new();
        let mut index = 0;

        while let Some(chunk) = self.backend.get(&self.service, &chunk_key(key, index))? {
            value.push_str(&chunk);
            index += 1;
        }

        if index == 0 {
            if self.backend.get(&self.service, &empty_key(key))?.is_some() {
                return Ok(String::new());
            }
            return Err(Error::NotFound(format!("no secret stored for {}", key)));
        }

        debug!(key = %key, chunks = index, "loaded chunked secret");
        Ok(value)
    }

    /// Remove every entry of `key`, returning how many were removed
    ///
    /// Deleting a key that has no entries is a successful no-op.
    pub fn delete(&self, key: &str) -> Result<usize> {
        let mut removed = 0;
        while self.backend.delete(&self.service, &chunk_key(key, removed))? {
            removed += 1;
        }
        if self.backend.delete(&self.service, &empty_key(key))? {
            removed += 1;
        }

        if removed > 0 {
            debug!(key = %key, entries = removed, "deleted chunked secret");
        }
        Ok(removed)
    }

    fn write(&self, entry: &str, value: &str) -> Result<()> {
        self.backend
            .set(&self.service, entry, value)
            .map_err(|e| match e {
                Error::StoreWrite(_) => e,
                other => Error::StoreWrite(other.to_string()),
            })
    }
}

fn chunk_key(key: &str, index: usize) -> String {
    format!("{}_chunk_{}", key, index)
}

fn empty_key(key: &str) -> String {
    format!("{}_empty", key)
}

/// Split a non-empty value on char boundaries into pieces of at most `size` bytes
fn split_in_chunks(value: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::with_capacity(value.len().div_ceil(size));
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}
