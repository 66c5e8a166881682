//! In-memory executor for driving the pipeline without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::http::{Headers, RequestExecutor, RequestOptions, Response, ResponseBody};

#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Headers,
    body: ResponseBody,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            body: ResponseBody::Json(body),
            ..Self::status(status)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Answers requests from a script. The last reply repeats once the script
/// runs out.
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<RequestOptions>>,
}

impl ScriptedExecutor {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RequestOptions> {
        self.seen.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap_or_else(|| Reply::status(200))
        }
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, options: RequestOptions) -> Response {
        self.seen.lock().unwrap().push(options.clone());
        let reply = self.next_reply();
        Response {
            status_code: reply.status,
            headers: reply.headers,
            body: reply.body,
            method: options.method(),
            url: options.describe_target(),
            options,
        }
    }
}
