use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::debug;

use super::{
    Headers, ProgressDirection, ProgressEvent, ProgressSender, RequestBody, RequestOptions,
    Response, ResponseBody,
};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Performs the actual network exchange for one pipeline pass.
///
/// Never fails: a transport error becomes a status-0 [`Response`] so that
/// interceptors see every outcome the same way.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, options: RequestOptions) -> Response;
}

#[derive(Debug, Error)]
enum TransportError {
    #[error("request uri was never resolved")]
    MissingUri,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

struct RawResponse {
    status: u16,
    headers: Headers,
    url: String,
    body: Vec<u8>,
}

/// [`RequestExecutor`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, options: &RequestOptions) -> Result<RawResponse, TransportError> {
        let uri = options.uri.as_deref().ok_or(TransportError::MissingUri)?;
        let method = options.method();
        let mut builder = self.client.request(method.clone(), uri);

        for (name, value) in options.headers.present() {
            builder = builder.header(name, value);
        }
        if let Some(qs) = &options.qs {
            builder = builder.query(qs);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(form) = &options.form {
            builder = builder.form(form);
        } else {
            match &options.body {
                RequestBody::None => {}
                RequestBody::Json(value) if options.json() => builder = builder.json(value),
                RequestBody::Json(value) => builder = builder.body(serde_json::to_vec(value)?),
                RequestBody::Bytes(bytes) => {
                    builder = match (&options.upload_progress, reports_upload(&method)) {
                        (Some(progress), true) => builder
                            .header(reqwest::header::CONTENT_LENGTH, bytes.len().to_string())
                            .body(progress_body(bytes.clone(), progress.clone())),
                        _ => builder.body(bytes.clone()),
                    };
                }
            }
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = Headers::from(response.headers());
        let url = response.url().to_string();
        let total = response.content_length();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if let Some(progress) = &options.download_progress {
                let _ = progress.send(ProgressEvent {
                    direction: ProgressDirection::Download,
                    loaded: body.len() as u64,
                    total,
                });
            }
        }

        Ok(RawResponse {
            status,
            headers,
            url,
            body,
        })
    }
}

fn reports_upload(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::POST || *method == Method::PATCH
}

fn progress_body(bytes: Vec<u8>, progress: ProgressSender) -> reqwest::Body {
    let total = bytes.len() as u64;
    let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let mut loaded = 0u64;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        loaded += chunk.len() as u64;
        let _ = progress.send(ProgressEvent {
            direction: ProgressDirection::Upload,
            loaded,
            total: Some(total),
        });
        Ok::<_, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, mut options: RequestOptions) -> Response {
        options.timings.network_start = Some(Utc::now());
        let outcome = self.send(&options).await;
        options.timings.network_end = Some(Utc::now());

        match outcome {
            Ok(raw) => Response {
                status_code: raw.status,
                headers: raw.headers,
                body: ResponseBody::decode(raw.body),
                method: options.method(),
                url: raw.url,
                options,
            },
            Err(err) => {
                debug!(uri = %options.describe_target(), error = %err, "http: request did not complete");
                Response::network_failure(options, err)
            }
        }
    }
}
