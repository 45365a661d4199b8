//! REST client for the Casdoor directory API

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{Directory, Group, User};
use crate::config::CasdoorConfig;
use crate::error::Error;
use crate::Result;

/// Owner Casdoor files access tokens under
const TOKEN_OWNER: &str = "admin";

/// Response envelope used by every Casdoor API call
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Serialize)]
struct TokenRef<'a> {
    owner: &'a str,
    name: &'a str,
}

/// Casdoor API client acting on behalf of the logged-in user
#[derive(Clone)]
pub struct CasdoorClient {
    endpoint: String,
    organization: String,
    client_id: String,
    client_secret: String,
    access_token: String,
    http_client: Client,
}

impl CasdoorClient {
    pub fn new(config: &CasdoorConfig, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: config.endpoint_base(),
            organization: config.organization_name.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            access_token: access_token.into(),
            http_client: Client::new(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.endpoint, path)
    }

    /// `owner/name` identifier Casdoor uses for single objects
    fn object_id(&self, name: &str) -> String {
        format!("{}/{}", self.organization, name)
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = self
            .http_client
            .get(self.url(path))
            .query(query)
            .bearer_auth(&self.access_token);

        let data = send(request, path).await?;
        serde_json::from_value(data)
            .map_err(|e| Error::Api(format!("unexpected {} response: {}", path, e)))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<()> {
        let request = self
            .http_client
            .post(self.url(path))
            .query(query)
            .bearer_auth(&self.access_token)
            .json(body);

        let data = send(request, path).await?;
        if data.as_str() == Some("Unaffected") {
            tracing::warn!("{}: no record was changed", path);
        }
        Ok(())
    }
}

/// Send a request and unwrap the Casdoor envelope
async fn send(request: RequestBuilder, path: &str) -> Result<Value> {
    tracing::debug!("calling {}", path);

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(api_error(&format!("{} returned {}: {}", path, status, text)));
    }

    let envelope: ApiResponse = serde_json::from_str(&text)
        .map_err(|e| Error::Api(format!("unexpected {} response: {}", path, e)))?;

    if envelope.status != "ok" {
        return Err(api_error(&envelope.msg));
    }

    Ok(envelope.data)
}

fn api_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("access token has expired") || lower.contains("token is expired") {
        Error::Api("your access token has expired. Please log in again with 'casdoor login'".to_string())
    } else if lower.contains("unauthorized operation") {
        Error::Api(format!("{} (you may need administrator privileges)", message))
    } else {
        Error::Api(message.to_string())
    }
}

#[async_trait]
impl Directory for CasdoorClient {
    async fn list_users(&self) -> Result<Vec<User>> {
        let users: Option<Vec<User>> = self
            .get_data("get-users", &[("owner", self.organization.as_str())])
            .await?;
        Ok(users.unwrap_or_default())
    }

    async fn get_user(&self, name: &str) -> Result<Option<User>> {
        self.get_data("get-user", &[("id", self.object_id(name).as_str())]).await
    }

    async fn add_user(&self, user: &User) -> Result<()> {
        self.post_json("add-user", &[], user).await
    }

    async fn update_user(&self, name: &str, user: &User) -> Result<()> {
        self.post_json("update-user", &[("id", self.object_id(name).as_str())], user)
            .await
    }

    async fn delete_user(&self, user: &User) -> Result<()> {
        self.post_json("delete-user", &[], user).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let groups: Option<Vec<Group>> = self
            .get_data("get-groups", &[("owner", self.organization.as_str())])
            .await?;
        Ok(groups.unwrap_or_default())
    }

    async fn add_group(&self, group: &Group) -> Result<()> {
        self.post_json("add-group", &[], group).await
    }

    async fn update_group(&self, name: &str, group: &Group) -> Result<()> {
        self.post_json("update-group", &[("id", self.object_id(name).as_str())], group)
            .await
    }

    async fn delete_group(&self, group: &Group) -> Result<()> {
        self.post_json("delete-group", &[], group).await
    }

    async fn revoke_token(&self, token_name: &str) -> Result<()> {
        let request = self
            .http_client
            .post(self.url("delete-token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .json(&TokenRef {
                owner: TOKEN_OWNER,
                name: token_name,
            });

        send(request, "delete-token").await.map(|_| ())
    }
}

/// Check that the Casdoor endpoint answers at all
pub async fn check_endpoint(client: &Client, endpoint: &Url) -> Result<()> {
    client
        .get(endpoint.clone())
        .send()
        .await
        .map_err(|e| Error::Api(format!("Casdoor endpoint {} is not reachable: {}", endpoint, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, TEST_CLIENT_ID, TEST_CLIENT_SECRET};
    use serde_json::json;
    use wiremock::matchers::{basic_auth, bearer_token, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client() -> (MockServer, CasdoorClient) {
        let server = MockServer::start().await;
        let config = testing::test_config(&server.uri(), testing::free_port());

        let client = CasdoorClient::new(&config, "token-1").with_http_client(testing::http_client());
        (server, client)
    }

    #[tokio::test]
    async fn test_list_users() {
        let (server, client) = client().await;

        Mock::given(method("GET"))
            .and(path("/api/get-users"))
            .and(query_param("owner", "casdoor-cli"))
            .and(bearer_token("token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "msg": "",
                "data": [
                    {"owner": "casdoor-cli", "name": "alice", "groups": ["casdoor-cli/editor"]},
                    {"owner": "casdoor-cli", "name": "bob", "groups": null}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let users = client.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].roles(), vec!["editor"]);
        assert!(users[1].groups.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let (server, client) = client().await;

        Mock::given(method("GET"))
            .and(path("/api/get-user"))
            .and(query_param("id", "casdoor-cli/ghost"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "msg": "",
                "data": null
            })))
            .mount(&server)
            .await;

        assert!(client.get_user("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_user_targets_current_name() {
        let (server, client) = client().await;

        Mock::given(method("POST"))
            .and(path("/api/update-user"))
            .and(query_param("id", "casdoor-cli/bob"))
            .and(body_partial_json(json!({"name": "bob", "email": "new@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "msg": "",
                "data": "Affected"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let user = User {
            owner: "casdoor-cli".to_string(),
            name: "bob".to_string(),
            email: "new@example.com".to_string(),
            ..Default::default()
        };
        client.update_user("bob", &user).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let (server, client) = client().await;

        Mock::given(method("GET"))
            .and(path("/api/get-groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "msg": "Unauthorized operation"
            })))
            .mount(&server)
            .await;

        let err = client.list_groups().await.unwrap_err();
        assert!(matches!(err, Error::Api(_)));
        assert!(err.to_string().contains("administrator privileges"));
    }

    #[tokio::test]
    async fn test_expired_token_message() {
        let (server, client) = client().await;

        Mock::given(method("GET"))
            .and(path("/api/get-users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "msg": "Access token has expired"
            })))
            .mount(&server)
            .await;

        let err = client.list_users().await.unwrap_err();
        assert!(err.to_string().contains("log in again"));
    }

    #[tokio::test]
    async fn test_revoke_token_uses_client_credentials() {
        let (server, client) = client().await;

        Mock::given(method("POST"))
            .and(path("/api/delete-token"))
            .and(basic_auth(TEST_CLIENT_ID, TEST_CLIENT_SECRET))
            .and(body_partial_json(json!({"owner": "admin", "name": "token-alice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "msg": "",
                "data": "Affected"
            })))
            .expect(1)
            .mount(&server)
            .await;

        client.revoke_token("token-alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_failure() {
        let (server, client) = client().await;

        Mock::given(method("POST"))
            .and(path("/api/add-group"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client.add_group(&Group::default()).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_check_endpoint() {
        let server = MockServer::start().await;
        let http = testing::http_client();

        check_endpoint(&http, &Url::parse(&server.uri()).unwrap()).await.unwrap();

        let err = check_endpoint(&http, &Url::parse("http://127.0.0.1:1").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not reachable"));
    }
}
