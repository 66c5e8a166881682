use async_trait::async_trait;
use chrono::Utc;

use crate::http::{Interceptor, PostOutcome, RequestError, RequestOptions, Response};

/// Stamps request start and end times on the options.
pub struct TimingInterceptor;

#[async_trait]
impl Interceptor for TimingInterceptor {
    fn name(&self) -> &'static str {
        "timing"
    }

    async fn on_request(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        // Reissued passes keep the start of the first pass.
        options.timings.request_start.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn on_response(&self, mut response: Response) -> PostOutcome {
        response.options.timings.request_end = Some(Utc::now());
        PostOutcome::Continue(Ok(response))
    }

    async fn on_response_error(&self, mut error: RequestError) -> PostOutcome {
        if let Some(response) = error.response_mut() {
            response.options.timings.request_end = Some(Utc::now());
        }
        PostOutcome::Continue(Err(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Pipeline, RequestDefaults};
    use crate::test_support::{Reply, ScriptedExecutor};
    use std::sync::Arc;

    #[tokio::test]
    async fn stamps_both_ends_on_success_and_failure() {
        for status in [200, 500] {
            let executor = ScriptedExecutor::new(vec![Reply::status(status)]);
            let pipeline = Pipeline::new(
                vec![Arc::new(TimingInterceptor) as Arc<dyn Interceptor>],
                executor,
                RequestDefaults::default(),
                1,
            );
            let outcome = pipeline.request(RequestOptions::get("https://x.test/")).await;
            let timings = match &outcome {
                Ok(response) => response.options.timings,
                Err(err) => err.response().unwrap().options.timings,
            };
            let start = timings.request_start.unwrap();
            let end = timings.request_end.unwrap();
            assert!(start <= end);
        }
    }
}
