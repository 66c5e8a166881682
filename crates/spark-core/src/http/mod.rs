//! Request pipeline: options, interceptors, and the network executor.

mod error;
mod executor;
mod headers;
mod interceptor;
pub mod interceptors;
mod options;
mod pipeline;
mod response;

pub use error::{ErrorFamily, HttpError, HttpErrorKind, RequestError, DEFAULT_ERROR_MESSAGE};
pub use executor::{ReqwestExecutor, RequestExecutor};
pub use headers::Headers;
pub use interceptor::{Interceptor, PostOutcome};
pub use options::{
    ProgressDirection, ProgressEvent, ProgressSender, RequestBody, RequestDefaults,
    RequestOptions, ServiceTarget, Timings,
};
pub use pipeline::Pipeline;
pub use response::{Response, ResponseBody};

pub use reqwest::Method;
