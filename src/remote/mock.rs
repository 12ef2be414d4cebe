//! Scripted in-process transport for tests and offline development.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::remote::{RemoteRequest, RemoteResponse, Transport};

/// Canned outcome of one attempt.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(RemoteResponse),
    Fail(SyncError),
    /// Wait (on the tokio clock) before producing the inner reply
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn json(payload: Value) -> Self {
        Reply::Respond(RemoteResponse::ok(payload))
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Reply::Respond(RemoteResponse::error(status, message))
    }

    pub fn fail(err: SyncError) -> Self {
        Reply::Fail(err)
    }

    pub fn delayed(self, by: Duration) -> Self {
        Reply::Delayed(by, Box::new(self))
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<Reply>>,
    sticky: HashMap<String, Reply>,
    calls: Vec<RemoteRequest>,
}

/// Transport answering by request path.
///
/// One-shot replies queued with [`push`](Self::push) are used first, then the
/// sticky reply from [`set`](Self::set), then a 404.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, path: &str, reply: Reply) {
        self.lock()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn set(&self, path: &str, reply: Reply) {
        self.lock().sticky.insert(path.to_string(), reply);
    }

    /// Every attempt received so far, in order.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.path == path).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: RemoteRequest) -> Reply {
        let mut script = self.lock();
        let path = request.path.clone();
        script.calls.push(request);

        if let Some(reply) = script.queued.get_mut(&path).and_then(VecDeque::pop_front) {
            return reply;
        }
        script
            .sticky
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Reply::status(404, format!("no route for {path}")))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse> {
        let mut reply = self.next_reply(request);
        loop {
            match reply {
                Reply::Respond(response) => return Ok(response),
                Reply::Fail(err) => return Err(err),
                Reply::Delayed(by, inner) => {
                    tokio::time::sleep(by).await;
                    reply = *inner;
                }
            }
        }
    }
}
