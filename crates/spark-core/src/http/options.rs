use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use super::Headers;

/// A named platform service plus the resource path under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub name: String,
    pub resource: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    None,
    Json(Value),
    Bytes(Vec<u8>),
}

impl RequestBody {
    pub fn is_none(&self) -> bool {
        matches!(self, RequestBody::None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub request_start: Option<DateTime<Utc>>,
    pub request_end: Option<DateTime<Utc>>,
    pub network_start: Option<DateTime<Utc>>,
    pub network_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub direction: ProgressDirection,
    pub loaded: u64,
    pub total: Option<u64>,
}

pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// Everything needed to issue one request through the pipeline, plus the
/// bookkeeping interceptors carry between passes.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub uri: Option<String>,
    pub service: Option<ServiceTarget>,
    pub headers: Headers,
    pub body: RequestBody,
    pub form: Option<Vec<(String, String)>>,
    pub qs: Option<Vec<(String, String)>>,
    pub json: Option<bool>,
    pub should_refresh_access_token: Option<bool>,
    pub redirect_count: u32,
    pub replay_count: u32,
    pub timings: Timings,
    pub timeout: Option<Duration>,
    pub upload_progress: Option<ProgressSender>,
    pub download_progress: Option<ProgressSender>,
}

impl RequestOptions {
    pub fn new<U: Into<String>>(method: Method, uri: U) -> Self {
        Self {
            method: Some(method),
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    pub fn get<U: Into<String>>(uri: U) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post<U: Into<String>>(uri: U) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put<U: Into<String>>(uri: U) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn patch<U: Into<String>>(uri: U) -> Self {
        Self::new(Method::PATCH, uri)
    }

    pub fn delete<U: Into<String>>(uri: U) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// Target `resource` under the named service; the uri is resolved from
    /// the service catalog when the request runs.
    pub fn service<N: Into<String>, R: Into<String>>(name: N, resource: R) -> Self {
        Self {
            service: Some(ServiceTarget {
                name: name.into(),
                resource: resource.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Explicitly opt out of a header, e.g. `authorization`.
    pub fn without_header<N: AsRef<str>>(mut self, name: N) -> Self {
        self.headers.suppress(name);
        self
    }

    pub fn with_json_body(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    pub fn with_form(mut self, form: Vec<(String, String)>) -> Self {
        self.form = Some(form);
        self
    }

    pub fn with_query(mut self, qs: Vec<(String, String)>) -> Self {
        self.qs = Some(qs);
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = Some(json);
        self
    }

    pub fn with_access_token_refresh(mut self, refresh: bool) -> Self {
        self.should_refresh_access_token = Some(refresh);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_upload_progress(mut self, sender: ProgressSender) -> Self {
        self.upload_progress = Some(sender);
        self
    }

    pub fn with_download_progress(mut self, sender: ProgressSender) -> Self {
        self.download_progress = Some(sender);
        self
    }

    pub fn method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }

    pub fn json(&self) -> bool {
        self.json.unwrap_or(true)
    }

    pub fn should_refresh_access_token(&self) -> bool {
        self.should_refresh_access_token.unwrap_or(true)
    }

    /// Resolved uri, or the service name for not-yet-resolved targets.
    pub fn describe_target(&self) -> String {
        match (&self.uri, &self.service) {
            (Some(uri), _) => uri.clone(),
            (None, Some(target)) => format!("{}:{}", target.name, target.resource),
            (None, None) => String::from("<no target>"),
        }
    }
}

/// Values merged under every request before the pre-phase.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub json: bool,
    pub should_refresh_access_token: bool,
    pub headers: Headers,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            json: true,
            should_refresh_access_token: true,
            headers: Headers::new(),
        }
    }
}

impl RequestDefaults {
    /// Fill in anything `options` leaves unset. Caller values always win,
    /// including suppressed headers.
    pub fn apply(&self, mut options: RequestOptions) -> RequestOptions {
        options.json.get_or_insert(self.json);
        options
            .should_refresh_access_token
            .get_or_insert(self.should_refresh_access_token);
        for (name, value) in self.headers.present() {
            if !options.headers.is_explicit(name) {
                options.headers.insert(name, value);
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_only_unset_fields() {
        let mut defaults = RequestDefaults::default();
        defaults.headers.insert("accept", "application/json");
        defaults.headers.insert("authorization", "nope");

        let options = RequestOptions::get("https://example.com")
            .with_json(false)
            .without_header("authorization");
        let merged = defaults.apply(options);

        assert_eq!(merged.json, Some(false));
        assert_eq!(merged.should_refresh_access_token, Some(true));
        assert_eq!(merged.headers.get("accept"), Some("application/json"));
        assert!(merged.headers.is_suppressed("authorization"));
    }

    #[test]
    fn service_constructor_leaves_uri_unset() {
        let options = RequestOptions::service("conversation", "activities");
        assert!(options.uri.is_none());
        assert_eq!(options.method(), Method::GET);
        assert_eq!(options.describe_target(), "conversation:activities");
    }
}
