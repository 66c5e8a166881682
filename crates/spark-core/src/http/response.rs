use reqwest::Method;
use serde_json::Value;

use super::{Headers, RequestOptions};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
    /// Transport error text for synthesised status-0 responses.
    Failure(String),
}

impl ResponseBody {
    /// Decode raw bytes: JSON when parseable, else UTF-8 text, else binary.
    pub fn decode(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return ResponseBody::Empty;
        }
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
            return ResponseBody::Json(value);
        }
        match String::from_utf8(bytes) {
            Ok(text) => ResponseBody::Text(text),
            Err(err) => ResponseBody::Binary(err.into_bytes()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_json_mut(&mut self) -> Option<&mut Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) | ResponseBody::Failure(text) => Value::String(text),
            ResponseBody::Empty | ResponseBody::Binary(_) => Value::Null,
        }
    }
}

/// A settled exchange: real HTTP response or synthesised network failure.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub headers: Headers,
    pub body: ResponseBody,
    pub method: Method,
    pub url: String,
    /// Options as they were when the request went out.
    pub options: RequestOptions,
}

impl Response {
    /// Stand-in for a request that never produced an HTTP response.
    pub fn network_failure<E: ToString>(options: RequestOptions, error: E) -> Self {
        Self {
            status_code: 0,
            headers: options.headers.clone(),
            body: ResponseBody::Failure(error.to_string()),
            method: options.method(),
            url: options.describe_target(),
            options,
        }
    }

    pub fn is_success(&self) -> bool {
        (1..400).contains(&self.status_code)
    }
}
