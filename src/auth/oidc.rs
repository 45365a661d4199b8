//! OpenID Connect provider metadata and ID token verification

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;

use super::credentials::IdTokenClaims;
use crate::error::Error;
use crate::Result;

/// Subset of `/.well-known/openid-configuration` the login flow needs
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Fetch provider metadata and check it was issued for `endpoint`
pub async fn discover(client: &Client, endpoint: &str) -> Result<ProviderMetadata> {
    let endpoint = endpoint.trim_end_matches('/');
    let url = format!("{}/.well-known/openid-configuration", endpoint);
    tracing::debug!("fetching provider metadata from {}", url);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::Discovery(format!("{} returned {}", url, response.status())));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| Error::Discovery(format!("invalid provider metadata: {}", e)))?;

    if metadata.issuer.trim_end_matches('/') != endpoint {
        return Err(Error::Discovery(format!(
            "issuer did not match the endpoint: expected {:?} got {:?}",
            endpoint, metadata.issuer
        )));
    }

    Ok(metadata)
}

/// Fetch the provider's published signing keys
pub async fn fetch_jwks(client: &Client, jwks_uri: &str) -> Result<JwkSet> {
    let response = client
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| Error::IdentityTokenVerification(format!("failed to fetch keys: {}", e)))?;

    if !response.status().is_success() {
        return Err(Error::IdentityTokenVerification(format!(
            "failed to fetch keys: {} returned {}",
            jwks_uri,
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| Error::IdentityTokenVerification(format!("invalid key set: {}", e)))
}

/// Verifies ID tokens against a key set, issuer and audience
pub struct IdTokenVerifier {
    keys: JwkSet,
    issuer: String,
    client_id: String,
}

impl IdTokenVerifier {
    pub fn new(keys: JwkSet, issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            client_id: client_id.into(),
        }
    }

    /// Check signature, issuer, audience and expiry, then decode the claims
    pub fn verify(&self, raw_id_token: &str) -> Result<IdTokenClaims> {
        let header = decode_header(raw_id_token).map_err(verification_error)?;

        if !is_asymmetric(header.alg) {
            return Err(Error::IdentityTokenVerification(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let jwk = match header.kid.as_deref() {
            Some(kid) => self.keys.find(kid),
            None if self.keys.keys.len() == 1 => self.keys.keys.first(),
            None => None,
        }
        .ok_or_else(|| {
            Error::IdentityTokenVerification(format!(
                "no signing key found for kid {:?}",
                header.kid
            ))
        })?;

        let key = DecodingKey::from_jwk(jwk).map_err(verification_error)?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = decode::<IdTokenClaims>(raw_id_token, &key, &validation).map_err(verification_error)?;
        tracing::debug!("ID Token successfully verified");
        Ok(data.claims)
    }
}

fn verification_error(err: jsonwebtoken::errors::Error) -> Error {
    Error::IdentityTokenVerification(err.to_string())
}

fn is_asymmetric(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, id_token_claims, sign_id_token, TEST_CLIENT_ID};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const ISSUER: &str = "http://casdoor.test";

    fn verifier() -> IdTokenVerifier {
        IdTokenVerifier::new(testing::jwks(), ISSUER, TEST_CLIENT_ID)
    }

    #[test]
    fn test_verify_valid_token() {
        let token = sign_id_token(&id_token_claims(ISSUER, TEST_CLIENT_ID));
        let claims = verifier().verify(&token).unwrap();

        assert_eq!(claims.name, "alice");
        assert_eq!(claims.owner, "casdoor-cli");
        assert_eq!(claims.groups, vec!["casdoor-cli/editor", "casdoor-cli/viewer"]);
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let token = sign_id_token(&id_token_claims(ISSUER, "someone-else"));
        let err = verifier().verify(&token).unwrap_err();
        assert!(matches!(err, Error::IdentityTokenVerification(_)));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let token = sign_id_token(&id_token_claims("http://evil.test", TEST_CLIENT_ID));
        assert!(verifier().verify(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = id_token_claims(ISSUER, TEST_CLIENT_ID);
        claims["exp"] = serde_json::json!(chrono::Utc::now().timestamp() - 3600);
        let token = sign_id_token(&claims);

        assert!(verifier().verify(&token).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign_id_token(&id_token_claims(ISSUER, TEST_CLIENT_ID));
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let other = sign_id_token(&{
            let mut c = id_token_claims(ISSUER, TEST_CLIENT_ID);
            c["isAdmin"] = serde_json::json!(true);
            c
        });
        parts[1] = other.split('.').nth(1).unwrap().to_string();

        assert!(verifier().verify(&parts.join(".")).is_err());
    }

    #[test]
    fn test_symmetric_algorithm_rejected() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(testing::TEST_KID.to_string());
        let token = encode(
            &header,
            &id_token_claims(ISSUER, TEST_CLIENT_ID),
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        let err = verifier().verify(&token).unwrap_err();
        assert!(err.to_string().contains("unsupported signing algorithm"));
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("rotated-away".to_string());
        let token = encode(
            &header,
            &id_token_claims(ISSUER, TEST_CLIENT_ID),
            &testing::encoding_key(),
        )
        .unwrap();

        assert!(verifier().verify(&token).is_err());
    }

    #[tokio::test]
    async fn test_discover_checks_issuer() {
        let provider = testing::MockProvider::start().await;
        let client = testing::http_client();

        let metadata = discover(&client, &provider.uri()).await.unwrap();
        assert_eq!(metadata.issuer, provider.uri());
        assert!(metadata.token_endpoint.ends_with("/api/login/oauth/access_token"));

        let err = discover(&client, "http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }
}
