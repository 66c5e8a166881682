use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::targets_service;
use crate::catalog::ServiceCatalog;
use crate::credentials::CredentialsManager;
use crate::http::{HttpError, Interceptor, PostOutcome, RequestError, RequestOptions};

pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Attaches user tokens and recovers from 401 by refreshing and replaying.
pub struct AuthInterceptor {
    credentials: CredentialsManager,
    catalog: Arc<dyn ServiceCatalog>,
    max_replays: u32,
}

impl AuthInterceptor {
    pub fn new(
        credentials: CredentialsManager,
        catalog: Arc<dyn ServiceCatalog>,
        max_replays: u32,
    ) -> Self {
        Self {
            credentials,
            catalog,
            max_replays,
        }
    }

    fn requires_credentials(&self, options: &RequestOptions) -> bool {
        targets_service(self.catalog.as_ref(), options)
            || options
                .uri
                .as_deref()
                .is_some_and(|uri| self.catalog.is_device_registration_url(uri))
    }

    async fn replay(&self, error: HttpError) -> PostOutcome {
        let options = &error.response.options;
        if options.replay_count >= self.max_replays {
            warn!(
                attempts = options.replay_count,
                url = %error.response.url,
                "auth: giving up after replay attempts"
            );
            return PostOutcome::Continue(Err(RequestError::ReplayExhausted {
                attempts: options.replay_count,
                source: error,
            }));
        }

        info!(url = %error.response.url, "auth: received 401, refreshing access token");
        if let Err(err) = self.credentials.refresh().await {
            return PostOutcome::Continue(Err(err.into()));
        }

        let mut next = error.response.options.clone();
        if !next.headers.is_suppressed(AUTHORIZATION_HEADER) {
            next.headers.remove(AUTHORIZATION_HEADER);
        }
        next.replay_count += 1;
        PostOutcome::Reissue(next)
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        // A suppressed header stays marked so redirects and replays keep it off.
        if options.headers.is_explicit(AUTHORIZATION_HEADER) || !self.requires_credentials(options) {
            return Ok(());
        }

        let token = self.credentials.get_user_token(None).await?;
        options.headers.insert(AUTHORIZATION_HEADER, token.authorization());
        Ok(())
    }

    async fn on_response_error(&self, error: RequestError) -> PostOutcome {
        match error {
            RequestError::Http(http)
                if http.status_code() == 401
                    && http.response.options.should_refresh_access_token() =>
            {
                if self.credentials.can_refresh().await {
                    self.replay(http).await
                } else {
                    PostOutcome::Continue(Err(RequestError::Http(http)))
                }
            }
            other => PostOutcome::Continue(Err(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticServiceCatalog;
    use crate::credentials::{CredentialsConfig, OAuthClient, OAuthConfig, OAuthEndpoints, Token};
    use crate::http::{Pipeline, RequestDefaults};
    use crate::test_support::{Reply, ScriptedExecutor};
    use httpmock::prelude::*;

    const SERVICE: &str = "https://api.example.com";

    fn catalog() -> Arc<dyn ServiceCatalog> {
        Arc::new(
            StaticServiceCatalog::new()
                .with_service("hydra", SERVICE)
                .with_device_registration("https://wdm.example.com"),
        )
    }

    async fn credentials(server: &MockServer, supertoken: Token) -> CredentialsManager {
        let endpoints = OAuthEndpoints::from_base(&server.base_url()).unwrap();
        let oauth =
            OAuthClient::with_endpoints(OAuthConfig::new("client-id").with_secret("secret"), endpoints)
                .unwrap();
        let manager = CredentialsManager::new(oauth, CredentialsConfig::new("spark:all"));
        manager.initialize(Some(supertoken)).await.unwrap();
        manager
    }

    fn pipeline(credentials: CredentialsManager, executor: Arc<ScriptedExecutor>, max_replays: u32) -> Pipeline {
        Pipeline::new(
            vec![Arc::new(AuthInterceptor::new(credentials, catalog(), max_replays)) as Arc<dyn Interceptor>],
            executor,
            RequestDefaults::default(),
            max_replays + 2,
        )
    }

    fn refresh_mock(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST)
                .path("/access_token")
                .body_contains("grant_type=refresh_token");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "access_token": "ST2" }));
        })
    }

    #[tokio::test]
    async fn attaches_token_to_service_and_device_urls_only() {
        let server = MockServer::start();
        let credentials = credentials(&server, Token::new("ST1", "spark:all")).await;
        let interceptor = AuthInterceptor::new(credentials, catalog(), 1);

        for uri in ["https://api.example.com/people", "https://wdm.example.com/devices"] {
            let mut options = RequestOptions::get(uri);
            interceptor.on_request(&mut options).await.unwrap();
            assert_eq!(options.headers.get(AUTHORIZATION_HEADER), Some("Bearer ST1"));
        }

        let mut options = RequestOptions::get("https://third-party.test/");
        interceptor.on_request(&mut options).await.unwrap();
        assert!(!options.headers.contains(AUTHORIZATION_HEADER));
    }

    #[tokio::test]
    async fn explicit_and_suppressed_headers_are_respected() {
        let server = MockServer::start();
        let credentials = credentials(&server, Token::new("ST1", "spark:all")).await;
        let interceptor = AuthInterceptor::new(credentials, catalog(), 1);

        let mut options =
            RequestOptions::get("https://api.example.com/x").with_header("Authorization", "Basic abc");
        interceptor.on_request(&mut options).await.unwrap();
        assert_eq!(options.headers.get(AUTHORIZATION_HEADER), Some("Basic abc"));

        let mut options = RequestOptions::get("https://api.example.com/x").without_header("authorization");
        interceptor.on_request(&mut options).await.unwrap();
        assert!(!options.headers.contains(AUTHORIZATION_HEADER));
        assert!(options.headers.is_suppressed(AUTHORIZATION_HEADER));
    }

    #[tokio::test]
    async fn suppression_survives_redirects() {
        use crate::http::interceptors::{RedirectInterceptor, LOCATION_HEADER};

        let server = MockServer::start();
        let downscope = server.mock(|when, then| {
            when.method(POST).path("/access_token");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "access_token": "UT" }));
        });
        let credentials = credentials(&server, Token::new("ST1", "spark:all spark:kms")).await;
        let executor = ScriptedExecutor::new(vec![
            Reply::status(200).header(LOCATION_HEADER, "https://api.example.com/moved"),
            Reply::status(200),
        ]);
        let pipeline = Pipeline::new(
            vec![
                Arc::new(RedirectInterceptor::new(catalog(), 2)) as Arc<dyn Interceptor>,
                Arc::new(AuthInterceptor::new(credentials, catalog(), 1)),
            ],
            Arc::clone(&executor) as Arc<dyn crate::http::RequestExecutor>,
            RequestDefaults::default(),
            4,
        );

        let response = pipeline
            .request(RequestOptions::get("https://api.example.com/original").without_header("authorization"))
            .await
            .unwrap();

        assert_eq!(response.options.redirect_count, 1);
        downscope.assert_hits(0);
        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert!(!request.headers.contains(AUTHORIZATION_HEADER));
            assert!(request.headers.is_suppressed(AUTHORIZATION_HEADER));
        }
    }

    #[tokio::test]
    async fn refreshes_and_replays_once_on_401() {
        let server = MockServer::start();
        let refresh = refresh_mock(&server);
        let credentials = credentials(&server, Token::new("ST1", "spark:all").with_refresh_token("RT1")).await;
        let executor = ScriptedExecutor::new(vec![Reply::status(401), Reply::status(200)]);

        let response = pipeline(credentials, Arc::clone(&executor), 1)
            .request(RequestOptions::get("https://api.example.com/people/me"))
            .await
            .unwrap();

        refresh.assert_hits(1);
        assert_eq!(response.options.replay_count, 1);
        let requests = executor.requests();
        assert_eq!(requests[0].headers.get(AUTHORIZATION_HEADER), Some("Bearer ST1"));
        assert_eq!(requests[1].headers.get(AUTHORIZATION_HEADER), Some("Bearer ST2"));
    }

    #[tokio::test]
    async fn persistent_401_exhausts_replays() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/access_token");
            then.status(200)
                .json_body_obj(&serde_json::json!({ "access_token": "ST-next" }));
        });
        let credentials = credentials(&server, Token::new("ST1", "spark:all").with_refresh_token("RT1")).await;
        let executor = ScriptedExecutor::new(vec![Reply::status(401)]);

        let err = pipeline(credentials, Arc::clone(&executor), 1)
            .request(RequestOptions::get("https://api.example.com/people/me"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "request failed after 1 replay attempts");
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn non_refreshable_credentials_propagate_401() {
        let server = MockServer::start();
        let refresh = refresh_mock(&server);
        let credentials = credentials(&server, Token::new("ST1", "spark:all")).await;
        let executor = ScriptedExecutor::new(vec![Reply::status(401)]);

        let err = pipeline(credentials, Arc::clone(&executor), 1)
            .request(RequestOptions::get("https://api.example.com/people/me"))
            .await
            .unwrap_err();

        refresh.assert_hits(0);
        assert!(matches!(err, RequestError::Http(ref http) if http.status_code() == 401));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn opting_out_of_refresh_propagates_401() {
        let server = MockServer::start();
        let refresh = refresh_mock(&server);
        let credentials = credentials(&server, Token::new("ST1", "spark:all").with_refresh_token("RT1")).await;
        let executor = ScriptedExecutor::new(vec![Reply::status(401)]);

        let err = pipeline(credentials, Arc::clone(&executor), 1)
            .request(
                RequestOptions::get("https://api.example.com/people/me").with_access_token_refresh(false),
            )
            .await
            .unwrap_err();

        refresh.assert_hits(0);
        assert_eq!(err.status_code(), Some(401));
    }
}
