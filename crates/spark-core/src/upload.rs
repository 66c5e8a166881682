//! Three-phase upload: open a session, send the bytes, finalize.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::http::{
    Pipeline, ProgressSender, RequestBody, RequestError, RequestOptions, Response,
};

pub const TRANSACTION_ID_HEADER: &str = "x-trans-id";

pub type SessionResolver = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Where a value taken from the upload session lands in a phase's options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingTarget {
    Uri,
    Body,
    Header(String),
    Query(String),
}

/// A phase option filled in from the session returned by `initialize`.
#[derive(Clone)]
pub struct SessionBinding {
    target: BindingTarget,
    label: String,
    resolve: SessionResolver,
}

impl fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinding")
            .field("target", &self.target)
            .field("label", &self.label)
            .finish()
    }
}

/// Session field lookup. A leading `/` selects a JSON pointer.
fn lookup(session: &Value, field: &str) -> Option<Value> {
    let value = if field.starts_with('/') {
        session.pointer(field)
    } else {
        session.get(field)
    };
    value.filter(|value| !value.is_null()).cloned()
}

impl SessionBinding {
    pub fn new<L, F>(target: BindingTarget, label: L, resolve: F) -> Self
    where
        L: Into<String>,
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            target,
            label: label.into(),
            resolve: Arc::new(resolve),
        }
    }

    fn field(target: BindingTarget, field: &str) -> Self {
        let key = field.to_owned();
        Self::new(target, field, move |session| lookup(session, &key))
    }

    pub fn uri_from(field: &str) -> Self {
        Self::field(BindingTarget::Uri, field)
    }

    pub fn body_from(field: &str) -> Self {
        Self::field(BindingTarget::Body, field)
    }

    pub fn header_from(name: &str, field: &str) -> Self {
        Self::field(BindingTarget::Header(name.to_owned()), field)
    }

    pub fn query_from(name: &str, field: &str) -> Self {
        Self::field(BindingTarget::Query(name.to_owned()), field)
    }

    fn apply(&self, session: &Value, options: &mut RequestOptions) -> Result<(), RequestError> {
        let unresolved = || RequestError::UnresolvedSessionBinding(self.label.clone());
        let value = (self.resolve)(session).ok_or_else(unresolved)?;

        match &self.target {
            BindingTarget::Uri => {
                options.uri = Some(value.as_str().ok_or_else(unresolved)?.to_owned());
                options.service = None;
            }
            BindingTarget::Body => options.body = RequestBody::Json(value),
            BindingTarget::Header(name) => options.headers.insert(name, scalar(&value).ok_or_else(unresolved)?),
            BindingTarget::Query(name) => {
                let value = scalar(&value).ok_or_else(unresolved)?;
                options.qs.get_or_insert_with(Vec::new).push((name.clone(), value));
            }
        }
        Ok(())
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Options for one phase plus the session bindings applied before it runs.
#[derive(Debug, Clone, Default)]
pub struct UploadPhase {
    pub options: RequestOptions,
    pub bindings: Vec<SessionBinding>,
}

impl UploadPhase {
    pub fn new(options: RequestOptions) -> Self {
        Self {
            options,
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, binding: SessionBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    fn resolve(self, session: &Value, default_method: Method) -> Result<RequestOptions, RequestError> {
        let mut options = self.options;
        for binding in &self.bindings {
            binding.apply(session, &mut options)?;
        }
        options.method.get_or_insert(default_method);
        Ok(options)
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: Vec<u8>,
    pub initialize: RequestOptions,
    pub upload: UploadPhase,
    pub finalize: UploadPhase,
    pub progress: Option<ProgressSender>,
}

impl UploadRequest {
    /// Upload `file` to the session opened by `initialize`. The upload and
    /// finalize targets default to the session's `uploadUrl` and
    /// `finishUploadUrl`.
    pub fn new(file: Vec<u8>, initialize: RequestOptions) -> Self {
        Self {
            file,
            initialize,
            upload: UploadPhase::default().bind(SessionBinding::uri_from("uploadUrl")),
            finalize: UploadPhase::default().bind(SessionBinding::uri_from("finishUploadUrl")),
            progress: None,
        }
    }

    pub fn with_upload(mut self, phase: UploadPhase) -> Self {
        self.upload = phase;
        self
    }

    pub fn with_finalize(mut self, phase: UploadPhase) -> Self {
        self.finalize = phase;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Runs uploads through the shared pipeline, so every phase is
/// authenticated, tracked and replayed like any other request.
pub struct UploadOrchestrator {
    pipeline: Arc<Pipeline>,
    max_attempts: u32,
    backoff: Duration,
}

impl UploadOrchestrator {
    pub fn new(pipeline: Arc<Pipeline>, config: &ClientConfig) -> Self {
        Self {
            pipeline,
            max_attempts: config.upload_max_attempts.max(1),
            backoff: config.upload_backoff,
        }
    }

    /// Returns the finalize response body.
    pub async fn upload(&self, request: UploadRequest) -> Result<Value, RequestError> {
        let UploadRequest {
            file,
            initialize,
            upload,
            finalize,
            progress,
        } = request;

        info!(bytes = file.len(), "upload: opening session");
        let mut initialize = initialize;
        initialize.method.get_or_insert(Method::POST);
        let session = self.pipeline.request(initialize).await?.body.into_json();
        debug!("upload: session opened");

        let mut options = upload.resolve(&session, Method::PUT)?;
        options.json.get_or_insert(false);
        options.body = RequestBody::Bytes(file);
        if !options.headers.is_explicit(TRANSACTION_ID_HEADER) {
            options
                .headers
                .insert(TRANSACTION_ID_HEADER, Uuid::new_v4().to_string());
        }
        if let Some(progress) = progress {
            options.upload_progress = Some(progress);
        }
        self.upload_with_retry(options).await?;

        info!("upload: finalizing");
        let options = finalize.resolve(&session, Method::POST)?;
        let response = self.pipeline.request(options).await?;
        Ok(response.body.into_json())
    }

    async fn upload_with_retry(&self, options: RequestOptions) -> Result<Response, RequestError> {
        let mut attempt = 1;
        loop {
            match self.pipeline.request(options.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = backoff_delay(self.backoff, attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upload: transient failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn backoff_delay(base: Duration, retry_number: u32) -> Duration {
    let shift = retry_number.saturating_sub(1).min(8);
    base.saturating_mul(1u32 << shift)
}
