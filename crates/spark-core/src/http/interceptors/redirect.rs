use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::targets_service;
use crate::catalog::ServiceCatalog;
use crate::http::{Interceptor, PostOutcome, RequestError, RequestOptions, Response};

pub const NO_HTTP_REDIRECT_HEADER: &str = "cisco-no-http-redirect";
pub const LOCATION_HEADER: &str = "cisco-location";

/// Follows app-level redirects signalled by the `cisco-location` header.
pub struct RedirectInterceptor {
    catalog: Arc<dyn ServiceCatalog>,
    max_redirects: u32,
}

impl RedirectInterceptor {
    pub fn new(catalog: Arc<dyn ServiceCatalog>, max_redirects: u32) -> Self {
        Self {
            catalog,
            max_redirects,
        }
    }
}

#[async_trait]
impl Interceptor for RedirectInterceptor {
    fn name(&self) -> &'static str {
        "redirect"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        if targets_service(self.catalog.as_ref(), options)
            && !options.headers.is_explicit(NO_HTTP_REDIRECT_HEADER)
        {
            options.headers.insert(NO_HTTP_REDIRECT_HEADER, "true");
        }
        Ok(())
    }

    async fn on_response(&self, response: Response) -> PostOutcome {
        let location = response.headers.get(LOCATION_HEADER).map(ToOwned::to_owned);
        let Some(location) = location else {
            return PostOutcome::Continue(Ok(response));
        };

        let mut next = response.options.clone();
        next.redirect_count += 1;
        if next.redirect_count > self.max_redirects {
            warn!(max = self.max_redirects, url = %response.url, "http: maximum redirects exceeded");
            return PostOutcome::Continue(Err(RequestError::MaxRedirectsExceeded {
                response: Box::new(response),
            }));
        }

        debug!(count = next.redirect_count, %location, "http: following app-level redirect");
        next.uri = Some(location);
        next.service = None;
        PostOutcome::Reissue(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticServiceCatalog;
    use crate::http::{Interceptor, Pipeline, RequestDefaults};
    use crate::test_support::{Reply, ScriptedExecutor};

    fn catalog() -> Arc<dyn ServiceCatalog> {
        Arc::new(StaticServiceCatalog::new().with_service("hydra", "https://api.example.com"))
    }

    fn pipeline(executor: Arc<ScriptedExecutor>, max_redirects: u32) -> Pipeline {
        Pipeline::new(
            vec![Arc::new(RedirectInterceptor::new(catalog(), max_redirects)) as Arc<dyn Interceptor>],
            executor,
            RequestDefaults::default(),
            max_redirects + 5,
        )
    }

    #[tokio::test]
    async fn service_requests_ask_for_app_level_redirects() {
        let mut options = RequestOptions::get("https://api.example.com/people");
        RedirectInterceptor::new(catalog(), 3)
            .on_request(&mut options)
            .await
            .unwrap();
        assert_eq!(options.headers.get(NO_HTTP_REDIRECT_HEADER), Some("true"));

        let mut options = RequestOptions::get("https://other.test/");
        RedirectInterceptor::new(catalog(), 3)
            .on_request(&mut options)
            .await
            .unwrap();
        assert!(!options.headers.contains(NO_HTTP_REDIRECT_HEADER));
    }

    #[tokio::test]
    async fn follows_location_header() {
        let executor = ScriptedExecutor::new(vec![
            Reply::status(200).header(LOCATION_HEADER, "https://api2.example.com/people"),
            Reply::json(200, serde_json::json!({"ok": true})),
        ]);
        let response = pipeline(Arc::clone(&executor), 3)
            .request(RequestOptions::get("https://api.example.com/people"))
            .await
            .unwrap();

        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].uri.as_deref(), Some("https://api2.example.com/people"));
        assert_eq!(response.options.redirect_count, 1);
    }

    #[tokio::test]
    async fn redirect_loop_stops_after_limit() {
        let executor = ScriptedExecutor::new(vec![
            Reply::status(200).header(LOCATION_HEADER, "https://api.example.com/loop"),
        ]);
        let err = pipeline(Arc::clone(&executor), 3)
            .request(RequestOptions::get("https://api.example.com/loop"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Maximum redirects exceeded");
        assert_eq!(executor.calls(), 4);
    }
}
