use std::fmt;

use thiserror::Error;

use super::{Response, ResponseBody};
use crate::catalog::CatalogError;
use crate::credentials::CredentialsError;

pub const DEFAULT_ERROR_MESSAGE: &str =
    "An error was received while trying to fulfill the request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFamily {
    NetworkOrCors,
    BadRequest,
    InternalServerError,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    NetworkOrCors,
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    RequestEntityTooLarge,
    RequestUriTooLong,
    UnsupportedMediaType,
    RequestedRangeNotSatisfiable,
    ExpectationFailed,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    Other,
}

impl HttpErrorKind {
    pub fn from_status(status: u16) -> Self {
        use HttpErrorKind::*;
        match status {
            0 => NetworkOrCors,
            400 => BadRequest,
            401 => Unauthorized,
            402 => PaymentRequired,
            403 => Forbidden,
            404 => NotFound,
            405 => MethodNotAllowed,
            406 => NotAcceptable,
            407 => ProxyAuthenticationRequired,
            408 => RequestTimeout,
            409 => Conflict,
            410 => Gone,
            411 => LengthRequired,
            412 => PreconditionFailed,
            413 => RequestEntityTooLarge,
            414 => RequestUriTooLong,
            415 => UnsupportedMediaType,
            416 => RequestedRangeNotSatisfiable,
            417 => ExpectationFailed,
            429 => TooManyRequests,
            500 => InternalServerError,
            501 => NotImplemented,
            502 => BadGateway,
            503 => ServiceUnavailable,
            504 => GatewayTimeout,
            505 => HttpVersionNotSupported,
            _ => Other,
        }
    }

    pub fn family(self) -> ErrorFamily {
        use HttpErrorKind::*;
        match self {
            NetworkOrCors => ErrorFamily::NetworkOrCors,
            BadRequest | Unauthorized | PaymentRequired | Forbidden | NotFound
            | MethodNotAllowed | NotAcceptable | ProxyAuthenticationRequired | RequestTimeout
            | Conflict | Gone | LengthRequired | PreconditionFailed | RequestEntityTooLarge
            | RequestUriTooLong | UnsupportedMediaType | RequestedRangeNotSatisfiable
            | ExpectationFailed | TooManyRequests => ErrorFamily::BadRequest,
            InternalServerError | NotImplemented | BadGateway | ServiceUnavailable
            | GatewayTimeout | HttpVersionNotSupported => ErrorFamily::InternalServerError,
            Other => ErrorFamily::Other,
        }
    }
}

/// Non-success HTTP outcome with the full response attached.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    pub message: String,
    pub response: Box<Response>,
}

impl HttpError {
    pub fn from_response(response: Response) -> Self {
        Self {
            kind: HttpErrorKind::from_status(response.status_code),
            message: extract_message(&response.body),
            response: Box::new(response),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.response.status_code
    }

    /// Network failures, timeouts, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        matches!(self.status_code(), 0 | 408 | 429 | 500..=599)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed with status {}: {}",
            self.response.method, self.response.url, self.response.status_code, self.message
        )
    }
}

impl std::error::Error for HttpError {}

fn extract_message(body: &ResponseBody) -> String {
    let found = match body {
        ResponseBody::Json(value) => ["message", "error_description", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(|field| field.as_str()))
            .map(ToOwned::to_owned),
        ResponseBody::Text(text) | ResponseBody::Failure(text) => Some(text.clone()),
        ResponseBody::Empty | ResponseBody::Binary(_) => None,
    };
    found
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_owned())
}

/// Errors returned by the pipeline and the upload orchestrator.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("Maximum redirects exceeded")]
    MaxRedirectsExceeded { response: Box<Response> },
    #[error("request failed after {attempts} replay attempts")]
    ReplayExhausted { attempts: u32, source: HttpError },
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("service catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("request has neither a uri nor a service target")]
    MissingTarget,
    #[error("request did not settle within {0} pipeline passes")]
    PassLimit(u32),
    #[error("upload session did not provide `{0}`")]
    UnresolvedSessionBinding(String),
    #[error("API rate limited {0}")]
    RateLimited(String),
    #[error("interceptor `{name}` failed: {message}")]
    Interceptor { name: &'static str, message: String },
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl RequestError {
    /// The response behind this error, for HTTP-level failures.
    pub fn response(&self) -> Option<&Response> {
        match self {
            RequestError::Http(err) => Some(&err.response),
            RequestError::ReplayExhausted { source, .. } => Some(&source.response),
            RequestError::MaxRedirectsExceeded { response } => Some(response),
            _ => None,
        }
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        match self {
            RequestError::Http(err) => Some(&mut err.response),
            RequestError::ReplayExhausted { source, .. } => Some(&mut source.response),
            RequestError::MaxRedirectsExceeded { response } => Some(response),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response().map(|response| response.status_code)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RequestError::Http(err) if err.is_transient())
    }
}
