//! Authentication module for the Casdoor login flow
//!
//! This module provides:
//! - Anti-CSRF state generation
//! - The transient OAuth2 callback server
//! - OIDC discovery and ID token verification
//! - CasdoorAuthProvider, driving the authorization code exchange
//! - Session persistence in the secret store
//! - Role checks for directory operations

pub mod callback_server;
pub mod credentials;
pub mod oidc;
pub mod provider;
pub mod roles;
pub mod session;
pub mod state;

pub use credentials::{IdTokenClaims, OAuth2Token, TokenData};
pub use provider::{
    Authenticator, CasdoorAuthProvider, ExchangePhase, SystemBrowser, UserAgent,
    DEFAULT_CALLBACK_TIMEOUT,
};
pub use roles::{has_required_role, require_roles, CREATE_ROLES, MANAGE_ROLES, READ_ROLES};
pub use session::{SessionManager, SessionOrigin};
pub use state::AuthorizationState;
