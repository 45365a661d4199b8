//! CasdoorAuthProvider - authorization code login against Casdoor
//!
//! Drives one login attempt end to end:
//! - OIDC discovery of the token endpoint and signing keys
//! - Browser launch and the local callback server
//! - State check, code exchange and ID token verification

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::callback_server::{CallbackParams, CallbackReply, CallbackServer};
use super::credentials::{OAuth2Token, TokenData};
use super::oidc::{self, IdTokenVerifier, ProviderMetadata};
use super::state::AuthorizationState;
use crate::config::CasdoorConfig;
use crate::error::Error;
use crate::ui;
use crate::Result;

/// Default time to wait for the browser to come back
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Progress of a single login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Authorizing,
    AwaitingCallback,
    Exchanging,
    Verifying,
    Done,
    Failed,
}

/// Opens the authorization URL for the user
pub trait UserAgent: Send + Sync {
    fn launch(&self, url: &Url) -> Result<()>;
}

/// The system default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn launch(&self, url: &Url) -> Result<()> {
        ui::print_step("Opening browser for Casdoor authentication...");
        println!("If the browser doesn't open, visit this URL:\n{}\n", url);

        open::that(url.as_str()).map_err(|e| Error::BrowserLaunch(e.to_string()))
    }
}

/// Anything that can run a login and produce fresh token data
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authorize(&self) -> Result<TokenData>;
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token exchange request
#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Casdoor OAuth2/OIDC authentication provider
pub struct CasdoorAuthProvider {
    config: CasdoorConfig,
    http_client: Client,
    user_agent: Box<dyn UserAgent>,
    callback_timeout: Duration,
    phases: Mutex<Vec<ExchangePhase>>,
}

impl CasdoorAuthProvider {
    pub fn new(config: CasdoorConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
            user_agent: Box::new(SystemBrowser),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            phases: Mutex::new(vec![ExchangePhase::Idle]),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl UserAgent + 'static) -> Self {
        self.user_agent = Box::new(user_agent);
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Current phase of the most recent attempt
    pub fn phase(&self) -> ExchangePhase {
        self.phase_history()
            .last()
            .copied()
            .unwrap_or(ExchangePhase::Idle)
    }

    /// Every phase entered so far, oldest first
    pub fn phase_history(&self) -> Vec<ExchangePhase> {
        match self.phases.lock() {
            Ok(phases) => phases.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn enter(&self, phase: ExchangePhase) {
        tracing::debug!(?phase, "login phase");
        match self.phases.lock() {
            Ok(mut phases) => phases.push(phase),
            Err(poisoned) => poisoned.into_inner().push(phase),
        }
    }

    /// Build the authorization URL for `state`
    pub fn build_auth_url(&self, state: &AuthorizationState) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/login/oauth/authorize",
            self.config.endpoint_base()
        ))
        .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", "openid")
            .append_pair("state", state.as_str());

        Ok(url)
    }

    /// Run one full login attempt
    pub async fn login(&self) -> Result<TokenData> {
        let result = self.run().await;
        if let Err(e) = &result {
            tracing::debug!("login attempt failed: {}", e);
            self.enter(ExchangePhase::Failed);
        }
        result
    }

    async fn run(&self) -> Result<TokenData> {
        self.enter(ExchangePhase::Authorizing);

        let metadata = oidc::discover(&self.http_client, &self.config.endpoint_base()).await?;
        let state = AuthorizationState::generate();
        let auth_url = self.build_auth_url(&state)?;

        // Listen before the browser can possibly redirect back.
        let mut server = CallbackServer::bind(&self.config.redirect_uri).await?;

        if let Err(e) = self.user_agent.launch(&auth_url) {
            server.finish().await;
            return Err(e);
        }

        self.enter(ExchangePhase::AwaitingCallback);
        ui::print_step("Waiting for authorization...");

        let pending = match server.wait(self.callback_timeout).await {
            Ok(pending) => pending,
            Err(e) => {
                server.finish().await;
                return Err(e);
            }
        };

        let (params, responder) = pending.into_parts();
        let outcome = self.complete(&state, params, &metadata).await;

        responder.respond(match &outcome {
            Ok(_) => CallbackReply::Success,
            Err(e @ (Error::StateMismatch | Error::AuthorizationDenied(_) | Error::Callback(_))) => {
                CallbackReply::BadRequest(e.to_string())
            }
            Err(e) => CallbackReply::ServerError(e.to_string()),
        });
        server.finish().await;

        outcome
    }

    async fn complete(
        &self,
        state: &AuthorizationState,
        params: CallbackParams,
        metadata: &ProviderMetadata,
    ) -> Result<TokenData> {
        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            return Err(Error::AuthorizationDenied(if description.is_empty() {
                error
            } else {
                format!("{}: {}", error, description)
            }));
        }

        if !state.matches(params.state.as_deref()) {
            tracing::warn!("callback state did not match, ignoring authorization code");
            return Err(Error::StateMismatch);
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Callback("Missing authorization code".to_string()))?;

        self.enter(ExchangePhase::Exchanging);
        let response = self.exchange_code(&metadata.token_endpoint, &code).await?;

        self.enter(ExchangePhase::Verifying);
        let raw_id_token = response
            .id_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingIdentityToken)?;

        let keys = oidc::fetch_jwks(&self.http_client, &metadata.jwks_uri).await?;
        let verifier = IdTokenVerifier::new(keys, metadata.issuer.clone(), self.config.client_id.clone());
        let claims = verifier.verify(raw_id_token)?;

        let oauth2_token = OAuth2Token {
            access_token: response.access_token.unwrap_or_default(),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: response.refresh_token.unwrap_or_default(),
            expiry: response
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        };

        self.enter(ExchangePhase::Done);
        tracing::info!("logged in as {}", claims.name);

        Ok(TokenData {
            oauth2_token,
            id_token_claims: claims,
        })
    }

    /// Exchange the authorization code at the token endpoint
    async fn exchange_code(&self, token_endpoint: &str, code: &str) -> Result<TokenResponse> {
        let request = TokenExchangeRequest {
            grant_type: "authorization_code",
            code,
            redirect_uri: self.config.redirect_uri.as_str(),
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
        };

        let response = self
            .http_client
            .post(token_endpoint)
            .form(&request)
            .send()
            .await
            .map_err(|e| Error::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::TokenExchange(format!("{}: {}", status, error_text)));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {}", e)))?;

        // Casdoor reports grant errors with a 200 and an `error` field.
        if let Some(error) = token_response.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(Error::TokenExchange(format!(
                "{}: {}",
                error,
                token_response.error_description.as_deref().unwrap_or_default()
            )));
        }

        if token_response.access_token.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::TokenExchange("no access_token in the token response".to_string()));
        }

        Ok(token_response)
    }
}

#[async_trait]
impl Authenticator for CasdoorAuthProvider {
    async fn authorize(&self) -> Result<TokenData> {
        self.login().await
    }
}
