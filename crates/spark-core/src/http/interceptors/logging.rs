use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::http::{Headers, Interceptor, PostOutcome, RequestError, RequestOptions, Response};

use super::AUTHORIZATION_HEADER;

const REDACTED: &str = "[redacted]";

/// Network logging, enabled through `ClientConfig::network_logging`.
pub struct LoggingInterceptor;

fn redacted(headers: &Headers) -> Vec<(String, String)> {
    headers
        .present()
        .map(|(name, value)| {
            let value = if name == AUTHORIZATION_HEADER { REDACTED } else { value };
            (name.to_owned(), value.to_owned())
        })
        .collect()
}

fn elapsed_ms(options: &RequestOptions) -> Option<i64> {
    options
        .timings
        .request_start
        .map(|start| (Utc::now() - start).num_milliseconds())
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        debug!(
            method = %options.method(),
            uri = %options.describe_target(),
            headers = ?redacted(&options.headers),
            redirects = options.redirect_count,
            replays = options.replay_count,
            "http: request"
        );
        Ok(())
    }

    async fn on_response(&self, response: Response) -> PostOutcome {
        info!(
            method = %response.method,
            url = %response.url,
            status = response.status_code,
            elapsed_ms = elapsed_ms(&response.options),
            "http: response"
        );
        PostOutcome::Continue(Ok(response))
    }

    async fn on_response_error(&self, error: RequestError) -> PostOutcome {
        match error.response() {
            Some(response) => warn!(
                method = %response.method,
                url = %response.url,
                status = response.status_code,
                elapsed_ms = elapsed_ms(&response.options),
                error = %error,
                "http: request failed"
            ),
            None => warn!(error = %error, "http: request failed"),
        }
        PostOutcome::Continue(Err(error))
    }
}
