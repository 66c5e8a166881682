use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::scope::sort_scope;
use super::{CredentialsError, Token};
use crate::config::DEFAULT_USER_AGENT;

pub const SCOPE_REDUCTION_GRANT: &str = "urn:cisco:oauth:grant-type:scope-reduction";
pub const DEFAULT_CLIENT_CREDENTIALS_SCOPE: &str = "webexsquare:admin";
const GRANT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// OAuth client registration used for every grant.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl OAuthConfig {
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    pub fn with_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.client_secret = Some(secret.into());
        self
    }
}

/// Token service endpoints.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub token_url: Url,
    pub revoke_url: Url,
    pub jwt_login_url: Url,
}

impl OAuthEndpoints {
    /// Endpoints rooted at a single identity-broker base URL.
    pub fn from_base(base: &str) -> Result<Self, CredentialsError> {
        let base = base.trim_end_matches('/');
        Ok(Self {
            token_url: Url::parse(&format!("{base}/access_token"))?,
            revoke_url: Url::parse(&format!("{base}/revoke"))?,
            jwt_login_url: Url::parse(&format!("{base}/jwt/login"))?,
        })
    }

    /// Production identity broker endpoints.
    pub fn production() -> Result<Self, CredentialsError> {
        Ok(Self {
            token_url: Url::parse(DEFAULT_TOKEN_URL)?,
            revoke_url: Url::parse(DEFAULT_REVOKE_URL)?,
            jwt_login_url: Url::parse(DEFAULT_JWT_LOGIN_URL)?,
        })
    }
}

pub const DEFAULT_TOKEN_URL: &str = "https://idbroker.webex.com/idb/oauth2/v1/access_token";
pub const DEFAULT_REVOKE_URL: &str = "https://idbroker.webex.com/idb/oauth2/v1/revoke";
pub const DEFAULT_JWT_LOGIN_URL: &str = "https://api.ciscospark.com/v1/jwt/login";

/// Performs OAuth grants against the token service. Talks to the token
/// endpoints directly rather than through the request pipeline, so a 401
/// from the token service never triggers reauthentication.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Result<Self, CredentialsError> {
        Self::with_endpoints(config, OAuthEndpoints::production()?)
    }

    pub fn with_endpoints(
        config: OAuthConfig,
        endpoints: OAuthEndpoints,
    ) -> Result<Self, CredentialsError> {
        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(GRANT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config,
            endpoints,
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// Exchange the token's refresh token for a new access token. The refresh
    /// token is carried forward when the server does not send a new one.
    pub async fn refresh(&self, token: &Token) -> Result<Token, CredentialsError> {
        let refresh_token = token
            .refresh_token
            .as_ref()
            .ok_or(CredentialsError::RefreshUnavailable)?;

        info!("token: refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let response = self.authenticated(self.http.post(self.endpoints.token_url.clone()), &form)
            .send()
            .await?;

        let mut refreshed = self.handle_token_response(response, &token.scope).await?;

        if refreshed.access_token == token.access_token {
            return Err(CredentialsError::UnchangedToken);
        }

        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = token.refresh_token.clone();
            refreshed.refresh_token_expires_at = token.refresh_token_expires_at;
        }
        refreshed.scope = token.scope.clone();

        info!("token: access token refreshed");
        Ok(refreshed)
    }

    /// Request a token limited to `scope` from `token`.
    pub async fn downscope(&self, token: &Token, scope: &str) -> Result<Token, CredentialsError> {
        if token.access_token.is_empty() {
            return Err(CredentialsError::EmptyAccessToken);
        }

        let scope = sort_scope(scope);
        info!(%scope, "token: downscoping token");
        let form = [
            ("grant_type", SCOPE_REDUCTION_GRANT),
            ("token", token.access_token.as_str()),
            ("scope", scope.as_str()),
        ];
        let response = self.authenticated(self.http.post(self.endpoints.token_url.clone()), &form)
            .send()
            .await?;

        let mut downscoped = self.handle_token_response(response, &scope).await?;
        downscoped.scope = scope;
        Ok(downscoped)
    }

    /// Revoke the access token. Tokens that have already expired are skipped.
    pub async fn revoke(&self, token: &Token) -> Result<(), CredentialsError> {
        if token.is_expired() {
            debug!("token: access token already expired, not revoking");
            return Ok(());
        }

        info!(scope = %token.scope, "token: revoking access token");
        let form = [
            ("token", token.access_token.as_str()),
            ("token_type_hint", "access_token"),
        ];
        let response = self.authenticated(self.http.post(self.endpoints.revoke_url.clone()), &form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(grant_error(status, body));
        }
        Ok(())
    }

    /// Client credentials (machine) grant. Results are not cached.
    pub async fn client_credentials(&self, scope: Option<&str>) -> Result<Token, CredentialsError> {
        info!("credentials: requesting client credentials grant");
        let scope = scope.unwrap_or(DEFAULT_CLIENT_CREDENTIALS_SCOPE);
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", scope),
            ("self_contained_token", "true"),
        ];
        let response = self.authenticated(self.http.post(self.endpoints.token_url.clone()), &form)
            .send()
            .await?;

        self.handle_token_response(response, scope).await
    }

    /// Exchange a host-issued JWT for an access token.
    pub async fn exchange_jwt(&self, jwt: &str, scope: &str) -> Result<Token, CredentialsError> {
        info!("credentials: exchanging JWT for an access token");
        let response = self
            .http
            .post(self.endpoints.jwt_login_url.clone())
            .header("authorization", jwt)
            .send()
            .await?;

        let status = response.status();
        let received_at = Utc::now();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(grant_error(status, body));
        }

        let payload: JwtLoginResponse = response.json().await?;
        let mut token = Token::new(payload.token, scope);
        token.created_at = received_at;
        token.expires_at = payload.expires_in.map(|seconds| received_at + Duration::seconds(seconds));
        Ok(token)
    }

    fn authenticated(&self, builder: RequestBuilder, form: &[(&str, &str)]) -> RequestBuilder {
        match &self.config.client_secret {
            Some(secret) => builder
                .basic_auth(&self.config.client_id, Some(secret))
                .form(form),
            None => {
                let mut fields: Vec<(&str, &str)> = form.to_vec();
                fields.push(("client_id", self.config.client_id.as_str()));
                builder.form(&fields)
            }
        }
    }

    async fn handle_token_response(
        &self,
        response: reqwest::Response,
        requested_scope: &str,
    ) -> Result<Token, CredentialsError> {
        let status = response.status();
        let received_at = Utc::now();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(grant_error(status, body));
        }

        let payload: TokenResponse = response.json().await?;
        Ok(payload.into_token(received_at, requested_scope))
    }
}

/// A 400 carrying an OAuth `error` code becomes a typed grant error.
fn grant_error(status: StatusCode, body: String) -> CredentialsError {
    if status == StatusCode::BAD_REQUEST {
        if let Ok(parsed) = serde_json::from_str::<GrantErrorBody>(&body) {
            return CredentialsError::Grant {
                code: parsed.error,
                description: parsed.error_description.unwrap_or_default(),
            };
        }
    }
    CredentialsError::TokenEndpoint { status, body }
}

#[derive(Debug, Deserialize)]
struct GrantErrorBody {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    refresh_token_expires_in: Option<i64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token(self, received_at: DateTime<Utc>, requested_scope: &str) -> Token {
        let scope = self.scope.as_deref().unwrap_or(requested_scope);
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self
                .token_type
                .filter(|value| !value.is_empty())
                .map(|value| normalise_token_type(&value))
                .unwrap_or_else(|| super::token::DEFAULT_TOKEN_TYPE.to_owned()),
            expires_at: self
                .expires_in
                .map(|seconds| received_at + Duration::seconds(seconds)),
            refresh_token_expires_at: self
                .refresh_token_expires_in
                .map(|seconds| received_at + Duration::seconds(seconds)),
            scope: sort_scope(scope),
            created_at: received_at,
        }
    }
}

fn normalise_token_type(value: &str) -> String {
    if value.eq_ignore_ascii_case("bearer") {
        super::token::DEFAULT_TOKEN_TYPE.to_owned()
    } else {
        value.to_owned()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JwtLoginResponse {
    token: String,
    expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> OAuthClient {
        let endpoints = OAuthEndpoints::from_base(&server.base_url()).unwrap();
        OAuthClient::with_endpoints(OAuthConfig::new("client-id").with_secret("secret"), endpoints)
            .unwrap()
    }

    #[tokio::test]
    async fn refresh_carries_refresh_token_forward() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/access_token")
                .header_exists("authorization")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=RT1");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "ST2",
                "token_type": "bearer",
                "expires_in": 3600
            }));
        });

        let current = Token::new("ST1", "b a").with_refresh_token("RT1");
        let refreshed = client(&server).refresh(&current).await.unwrap();
        mock.assert();
        assert_eq!(refreshed.access_token, "ST2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(refreshed.token_type, "Bearer");
        assert_eq!(refreshed.scope, "a b");
        assert!(refreshed.expires_at.is_some());
    }

    #[tokio::test]
    async fn refresh_rejects_unchanged_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/access_token");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "access_token": "ST1" }));
        });

        let current = Token::new("ST1", "a").with_refresh_token("RT1");
        let err = client(&server).refresh(&current).await.unwrap_err();
        assert!(matches!(err, CredentialsError::UnchangedToken));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_unavailable() {
        let server = MockServer::start();
        let err = client(&server).refresh(&Token::new("ST1", "a")).await.unwrap_err();
        assert!(matches!(err, CredentialsError::RefreshUnavailable));
    }

    #[tokio::test]
    async fn downscope_sends_sorted_scope() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/access_token")
                .body_contains("scope-reduction")
                .body_contains("token=ST1")
                .body_contains("scope=a+b");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "child",
                "expires_in": 600
            }));
        });

        let child = client(&server)
            .downscope(&Token::new("ST1", "a b c"), "b a")
            .await
            .unwrap();
        mock.assert();
        assert_eq!(child.access_token, "child");
        assert_eq!(child.scope, "a b");
    }

    #[tokio::test]
    async fn grant_errors_are_typed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/access_token");
            then.status(400).json_body_obj(&serde_json::json!({
                "error": "invalid_request",
                "error_description": "refresh token expired"
            }));
        });

        let current = Token::new("ST1", "a").with_refresh_token("RT1");
        let err = client(&server).refresh(&current).await.unwrap_err();
        assert_eq!(err.grant_code(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn non_grant_failures_keep_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/revoke");
            then.status(503).body("unavailable");
        });

        let err = client(&server)
            .revoke(&Token::new("ST1", "a"))
            .await
            .unwrap_err();
        match err {
            CredentialsError::TokenEndpoint { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_tokens_are_not_revoked() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/revoke");
            then.status(200);
        });

        let expired = Token::new("ST1", "a").with_expires_at(Utc::now() - Duration::seconds(5));
        client(&server).revoke(&expired).await.unwrap();
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn jwt_exchange_uses_authorization_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/jwt/login")
                .header("authorization", "guest-jwt");
            then.status(200).json_body_obj(&serde_json::json!({
                "token": "JWT-ST",
                "expiresIn": 21600
            }));
        });

        let token = client(&server).exchange_jwt("guest-jwt", "a b").await.unwrap();
        mock.assert();
        assert_eq!(token.access_token, "JWT-ST");
        assert!(token.expires_at.is_some());
        assert!(!token.can_refresh());
    }

    #[tokio::test]
    async fn client_credentials_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/access_token")
                .body_contains("grant_type=client_credentials");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "machine-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "webexsquare:admin"
            }));
        });

        let token = client(&server).client_credentials(None).await.unwrap();
        mock.assert();
        assert_eq!(token.access_token, "machine-token");
        assert_eq!(token.scope, "webexsquare:admin");
    }
}
