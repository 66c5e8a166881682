use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;
use url::Url;

use crate::http::{Interceptor, PostOutcome, RequestError, RequestOptions};

pub const RETRY_AFTER_HEADER: &str = "retry-after";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
const RATE_LIMITED_HOSTS: [&str; 2] = ["idbroker", "identity"];

/// Holds back identity API calls after the identity service answered 429.
///
/// APIs are keyed by the first path segment of an identity broker or
/// identity service URL; other hosts pass through untouched.
#[derive(Default)]
pub struct RateLimitInterceptor {
    expiries: Mutex<HashMap<String, Instant>>,
}

impl RateLimitInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `uri` belongs to an API that is still cooling down.
    pub async fn is_rate_limited(&self, uri: &str) -> bool {
        let Some(api) = api_name(uri) else {
            return false;
        };
        let mut expiries = self.expiries.lock().await;
        let expiry = expiries.get(&api).copied();
        match expiry {
            Some(expiry) if Instant::now() < expiry => true,
            Some(_) => {
                expiries.remove(&api);
                false
            }
            None => false,
        }
    }

    /// Start a cool-down for the API behind `uri`. Returns false when the
    /// uri is not a rate-limited identity API.
    pub async fn set_expiry(&self, uri: &str, retry_after: Duration) -> bool {
        let Some(api) = api_name(uri) else {
            return false;
        };
        self.expiries
            .lock()
            .await
            .insert(api, Instant::now() + retry_after);
        true
    }
}

/// API name of an identity URL: `https://idbroker.example.com/horse/v1/x` is `horse`.
pub fn api_name(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    let host = url.host_str()?;
    let label = host.split('.').next()?;
    if !RATE_LIMITED_HOSTS.iter().any(|prefix| label.starts_with(prefix)) {
        return None;
    }
    url.path_segments()?
        .find(|segment| !segment.is_empty())
        .map(str::to_owned)
}

/// Seconds from `retry-after`, clamped to one hour. Missing, malformed or
/// non-positive values mean one minute.
pub fn retry_after(value: Option<&str>) -> Duration {
    match value.and_then(|value| value.trim().parse::<i64>().ok()) {
        Some(seconds) if seconds > 0 => Duration::from_secs(seconds as u64).min(MAX_RETRY_AFTER),
        _ => DEFAULT_RETRY_AFTER,
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        let Some(uri) = options.uri.as_deref() else {
            return Ok(());
        };
        if self.is_rate_limited(uri).await {
            return Err(RequestError::RateLimited(uri.to_owned()));
        }
        Ok(())
    }

    async fn on_response_error(&self, error: RequestError) -> PostOutcome {
        if let RequestError::Http(http) = &error {
            if http.status_code() == 429 {
                let uri = http.response.options.uri.as_deref().unwrap_or(&http.response.url);
                let delay = retry_after(http.response.headers.get(RETRY_AFTER_HEADER));
                if self.set_expiry(uri, delay).await {
                    warn!(%uri, retry_after_secs = delay.as_secs(), "http: API rate limited");
                }
            }
        }
        PostOutcome::Continue(Err(error))
    }
}
