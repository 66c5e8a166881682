use async_trait::async_trait;

use super::{RequestError, RequestOptions, Response};

/// Result of a post-phase hook.
#[derive(Debug)]
pub enum PostOutcome {
    /// Hand the (possibly rewritten) outcome to the next interceptor.
    Continue(Result<Response, RequestError>),
    /// Abandon this pass and run the pipeline again with new options.
    Reissue(RequestOptions),
}

/// A composable stage of the request pipeline. Every hook defaults to a
/// pass-through, so implementors only override what they need.
///
/// Pre hooks run in list order; post hooks run in reverse list order.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, _options: &mut RequestOptions) -> Result<(), RequestError> {
        Ok(())
    }

    /// Called on every interceptor after the one whose `on_request` failed.
    async fn on_request_error(&self, _options: &RequestOptions, _error: &RequestError) {}

    async fn on_response(&self, response: Response) -> PostOutcome {
        PostOutcome::Continue(Ok(response))
    }

    async fn on_response_error(&self, error: RequestError) -> PostOutcome {
        PostOutcome::Continue(Err(error))
    }
}
