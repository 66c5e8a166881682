use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::http::{HttpError, Interceptor, PostOutcome, RequestError};

/// Error code carried by responses whose `message` is encrypted.
pub const ENCRYPTED_ERROR_CODE: i64 = 1_900_000;

#[derive(Debug, Error)]
#[error("decryption failed: {0}")]
pub struct DecryptionError(pub String);

#[async_trait]
pub trait DecryptionService: Send + Sync {
    async fn decrypt(&self, message: &str) -> Result<String, DecryptionError>;
}

/// Replaces encrypted error messages with their plaintext.
pub struct DecryptInterceptor {
    service: Arc<dyn DecryptionService>,
}

impl DecryptInterceptor {
    pub fn new(service: Arc<dyn DecryptionService>) -> Self {
        Self { service }
    }

    async fn decrypt_message(&self, mut error: HttpError) -> HttpError {
        let Some(ciphertext) = encrypted_message(error.response.body.as_json()) else {
            return error;
        };

        match self.service.decrypt(&ciphertext).await {
            Ok(plaintext) => {
                debug!("http: decrypted error message");
                if let Some(body) = error.response.body.as_json_mut() {
                    body["message"] = Value::String(plaintext.clone());
                }
                error.message = plaintext;
            }
            Err(err) => warn!(error = %err, "http: could not decrypt error message"),
        }
        error
    }
}

fn encrypted_message(body: Option<&Value>) -> Option<String> {
    let body = body?;
    if body.get("errorCode").and_then(Value::as_i64) != Some(ENCRYPTED_ERROR_CODE) {
        return None;
    }
    body.get("message")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

#[async_trait]
impl Interceptor for DecryptInterceptor {
    fn name(&self) -> &'static str {
        "decrypt"
    }

    async fn on_response_error(&self, error: RequestError) -> PostOutcome {
        match error {
            RequestError::Http(http) => {
                PostOutcome::Continue(Err(RequestError::Http(self.decrypt_message(http).await)))
            }
            other => PostOutcome::Continue(Err(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Pipeline, RequestDefaults, RequestOptions};
    use crate::test_support::{Reply, ScriptedExecutor};

    struct Reverse;

    #[async_trait]
    impl DecryptionService for Reverse {
        async fn decrypt(&self, message: &str) -> Result<String, DecryptionError> {
            if message == "fail" {
                return Err(DecryptionError("no key".into()));
            }
            Ok(message.chars().rev().collect())
        }
    }

    async fn run(body: Value) -> HttpError {
        let executor = ScriptedExecutor::new(vec![Reply::json(400, body)]);
        let pipeline = Pipeline::new(
            vec![Arc::new(DecryptInterceptor::new(Arc::new(Reverse))) as Arc<dyn Interceptor>],
            executor,
            RequestDefaults::default(),
            1,
        );
        match pipeline.request(RequestOptions::get("https://x.test/")).await {
            Err(RequestError::Http(err)) => err,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn decrypts_encrypted_messages() {
        let err = run(serde_json::json!({"errorCode": 1900000, "message": "terces"})).await;
        assert_eq!(err.message, "secret");
        assert_eq!(err.response.body.as_json().unwrap()["message"], "secret");
    }

    #[tokio::test]
    async fn other_errors_are_untouched() {
        let err = run(serde_json::json!({"errorCode": 400, "message": "terces"})).await;
        assert_eq!(err.message, "terces");
    }

    #[tokio::test]
    async fn decryption_failure_keeps_original_error() {
        let err = run(serde_json::json!({"errorCode": 1900000, "message": "fail"})).await;
        assert_eq!(err.message, "fail");
        assert_eq!(err.status_code(), 400);
    }
}
