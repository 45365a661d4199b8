//! Error types for Casdoor CLI

use thiserror::Error;

/// Result type alias for Casdoor CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Casdoor CLI
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to open browser: {0}")]
    BrowserLaunch(String),

    #[error("Callback server error: {0}")]
    Callback(String),

    #[error("No authorization callback received within {0} seconds")]
    CallbackTimeout(u64),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("OAuth state mismatch: the callback does not belong to this login attempt")]
    StateMismatch,

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("No id_token field in the token response")]
    MissingIdentityToken,

    #[error("Failed to verify ID token: {0}")]
    IdentityTokenVerification(String),

    #[error("Secret store write failed: {0}")]
    StoreWrite(String),

    #[error("Secret store read failed: {0}")]
    StoreRead(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("You don't have enough permissions to perform this action (required roles: {})", .required.join(", "))]
    InsufficientPermissions { required: Vec<String> },

    #[error("API error: {0}")]
    Api(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the "nothing stored" signal, which callers treat as
    /// "not logged in" rather than as a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<inquire::InquireError> for Error {
    fn from(err: inquire::InquireError) -> Self {
        Error::Prompt(err.to_string())
    }
}
