//! Casdoor CLI - command line client for a Casdoor organization
//!
//! This library provides browser based OAuth2/OIDC login, session storage
//! in the platform secret store, and role-gated management of users and
//! groups through the Casdoor API.

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod secrets;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
