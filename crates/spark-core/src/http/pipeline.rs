use std::sync::Arc;

use tracing::debug;

use super::{
    HttpError, Interceptor, PostOutcome, RequestDefaults, RequestError, RequestExecutor,
    RequestOptions, Response,
};

enum Pass {
    Settled(Result<Response, RequestError>),
    Reissue(RequestOptions),
}

/// Ordered interceptors around a [`RequestExecutor`].
///
/// Reissues (redirects, replays) restart the whole pipeline with new
/// options. The loop is bounded by `max_passes` in addition to the counters
/// the interceptors keep themselves.
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    executor: Arc<dyn RequestExecutor>,
    defaults: RequestDefaults,
    max_passes: u32,
}

impl Pipeline {
    pub fn new(
        interceptors: Vec<Arc<dyn Interceptor>>,
        executor: Arc<dyn RequestExecutor>,
        defaults: RequestDefaults,
        max_passes: u32,
    ) -> Self {
        Self {
            interceptors,
            executor,
            defaults,
            max_passes: max_passes.max(1),
        }
    }

    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|interceptor| interceptor.name()).collect()
    }

    pub async fn request(&self, options: RequestOptions) -> Result<Response, RequestError> {
        let mut options = options;
        for pass in 1..=self.max_passes {
            let mut prepared = self.defaults.apply(options);
            self.pre_phase(&mut prepared).await?;

            let response = self.executor.execute(prepared).await;
            debug!(
                pass,
                method = %response.method,
                url = %response.url,
                status = response.status_code,
                "http: pass settled"
            );

            match self.post_phase(response).await {
                Pass::Settled(result) => return result,
                Pass::Reissue(next) => options = next,
            }
        }
        Err(RequestError::PassLimit(self.max_passes))
    }

    async fn pre_phase(&self, options: &mut RequestOptions) -> Result<(), RequestError> {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            if let Err(err) = interceptor.on_request(options).await {
                debug!(interceptor = interceptor.name(), error = %err, "http: request rejected");
                for later in &self.interceptors[index + 1..] {
                    later.on_request_error(options, &err).await;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    async fn post_phase(&self, response: Response) -> Pass {
        let mut outcome = if response.is_success() {
            Ok(response)
        } else {
            Err(RequestError::Http(HttpError::from_response(response)))
        };

        for interceptor in self.interceptors.iter().rev() {
            let step = match outcome {
                Ok(response) => interceptor.on_response(response).await,
                Err(err) => interceptor.on_response_error(err).await,
            };
            match step {
                PostOutcome::Continue(next) => outcome = next,
                PostOutcome::Reissue(options) => {
                    debug!(interceptor = interceptor.name(), "http: reissuing request");
                    return Pass::Reissue(options);
                }
            }
        }
        Pass::Settled(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, ScriptedExecutor};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_request: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Interceptor> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_request: false,
            })
        }

        fn failing(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Interceptor> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_request: true,
            })
        }

        fn record(&self, hook: &str) {
            self.log.lock().unwrap().push(format!("{}:{hook}", self.name));
        }
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_request(&self, _options: &mut RequestOptions) -> Result<(), RequestError> {
            self.record("req");
            if self.fail_request {
                return Err(RequestError::Interceptor {
                    name: self.name,
                    message: "rejected".to_owned(),
                });
            }
            Ok(())
        }

        async fn on_request_error(&self, _options: &RequestOptions, _error: &RequestError) {
            self.record("req_err");
        }

        async fn on_response(&self, response: Response) -> PostOutcome {
            self.record("res");
            PostOutcome::Continue(Ok(response))
        }

        async fn on_response_error(&self, error: RequestError) -> PostOutcome {
            self.record("res_err");
            PostOutcome::Continue(Err(error))
        }
    }

    fn pipeline(interceptors: Vec<Arc<dyn Interceptor>>, executor: Arc<ScriptedExecutor>) -> Pipeline {
        Pipeline::new(interceptors, executor, RequestDefaults::default(), 5)
    }

    #[tokio::test]
    async fn pre_hooks_forward_post_hooks_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = ScriptedExecutor::new(vec![Reply::status(200)]);
        let pipeline = pipeline(
            vec![Recorder::new("a", &log), Recorder::new("b", &log), Recorder::new("c", &log)],
            Arc::clone(&executor),
        );

        pipeline.request(RequestOptions::get("https://x.test/")).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["a:req", "b:req", "c:req", "c:res", "b:res", "a:res"]
        );
    }

    #[tokio::test]
    async fn error_status_takes_error_branch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = ScriptedExecutor::new(vec![Reply::status(404)]);
        let pipeline = pipeline(
            vec![Recorder::new("a", &log), Recorder::new("b", &log)],
            Arc::clone(&executor),
        );

        let err = pipeline.request(RequestOptions::get("https://x.test/")).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(*log.lock().unwrap(), ["a:req", "b:req", "b:res_err", "a:res_err"]);
    }

    #[tokio::test]
    async fn failing_pre_hook_notifies_later_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = ScriptedExecutor::new(vec![Reply::status(200)]);
        let pipeline = pipeline(
            vec![
                Recorder::new("a", &log),
                Recorder::failing("b", &log),
                Recorder::new("c", &log),
                Recorder::new("d", &log),
            ],
            Arc::clone(&executor),
        );

        let err = pipeline.request(RequestOptions::get("https://x.test/")).await.unwrap_err();
        assert!(matches!(err, RequestError::Interceptor { name: "b", .. }));
        assert_eq!(err.to_string(), "interceptor `b` failed: rejected");
        assert_eq!(*log.lock().unwrap(), ["a:req", "b:req", "c:req_err", "d:req_err"]);
        assert_eq!(executor.calls(), 0);
    }

    struct AlwaysReissue;

    #[async_trait]
    impl Interceptor for AlwaysReissue {
        fn name(&self) -> &'static str {
            "always-reissue"
        }

        async fn on_response(&self, response: Response) -> PostOutcome {
            PostOutcome::Reissue(response.options)
        }
    }

    #[tokio::test]
    async fn reissue_loop_is_bounded() {
        let executor = ScriptedExecutor::new(vec![Reply::status(200)]);
        let pipeline = Pipeline::new(
            vec![Arc::new(AlwaysReissue) as Arc<dyn Interceptor>],
            Arc::clone(&executor) as Arc<dyn RequestExecutor>,
            RequestDefaults::default(),
            3,
        );

        let err = pipeline.request(RequestOptions::get("https://x.test/")).await.unwrap_err();
        assert!(matches!(err, RequestError::PassLimit(3)));
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn network_failure_is_an_http_error() {
        let executor = ScriptedExecutor::new(vec![Reply::status(0)]);
        let pipeline = pipeline(Vec::new(), Arc::clone(&executor));
        let err = pipeline.request(RequestOptions::get("https://x.test/")).await.unwrap_err();
        match err {
            RequestError::Http(err) => {
                assert_eq!(err.kind, crate::http::HttpErrorKind::NetworkOrCors);
                assert_eq!(err.response.url, "https://x.test/");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
