//! In-process upstream standing in for MCP backends
//!
//! Backends are matched by name. Tools return their configured result, or
//! echo their arguments as structured content when none is configured.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conflux_upstream::client::{RemoteCallResult, RemoteTool, UpstreamSession};
use conflux_upstream::registry::ResolvedConnection;
use conflux_upstream::{Connector, UpstreamError};
use serde_json::{Map, Value};

/// One call received by the fake upstream
#[derive(Debug, Clone)]
pub struct ReceivedCall {
    pub backend: String,
    pub tool: String,
    pub arguments: Map<String, Value>,
}

#[derive(Default)]
struct Backends {
    tools: HashMap<String, Vec<RemoteTool>>,
    results: HashMap<(String, String), Result<RemoteCallResult, String>>,
    down: HashSet<String>,
    calls: Vec<ReceivedCall>,
}

/// Shared fake; clone the `Arc` to inspect calls after handing it out
#[derive(Default)]
pub struct FakeUpstream {
    backends: Arc<Mutex<Backends>>,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Advertise a tool on a backend
    pub fn add_tool(&self, backend: &str, name: &str, description: &str, input_schema: Value) {
        self.backends
            .lock()
            .unwrap()
            .tools
            .entry(backend.to_owned())
            .or_default()
            .push(RemoteTool {
                name: name.to_owned(),
                description: Some(description.to_owned()),
                input_schema,
            });
    }

    /// Answer calls to `backend`/`tool` with text blocks
    pub fn reply_text(&self, backend: &str, tool: &str, text: &str) {
        self.backends
            .lock()
            .unwrap()
            .results
            .insert((backend.to_owned(), tool.to_owned()), Ok(RemoteCallResult::text([text])));
    }

    /// Fail calls to `backend`/`tool` at the transport level
    pub fn reply_error(&self, backend: &str, tool: &str, message: &str) {
        self.backends
            .lock()
            .unwrap()
            .results
            .insert((backend.to_owned(), tool.to_owned()), Err(message.to_owned()));
    }

    /// Refuse every connection to `backend`
    pub fn take_down(&self, backend: &str) {
        self.backends.lock().unwrap().down.insert(backend.to_owned());
    }

    pub fn calls(&self) -> Vec<ReceivedCall> {
        self.backends.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Connector for FakeUpstream {
    async fn connect(
        &self,
        backend: &str,
        _connection: &ResolvedConnection,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        if self.backends.lock().unwrap().down.contains(backend) {
            return Err(UpstreamError::Transport(format!("{backend} is down")));
        }

        Ok(Box::new(FakeSession {
            backend: backend.to_owned(),
            backends: Arc::clone(&self.backends),
        }))
    }
}

struct FakeSession {
    backend: String,
    backends: Arc<Mutex<Backends>>,
}

#[async_trait]
impl UpstreamSession for FakeSession {
    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, UpstreamError> {
        Ok(self
            .backends
            .lock()
            .unwrap()
            .tools
            .get(&self.backend)
            .cloned()
            .unwrap_or_default())
    }

    async fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> Result<RemoteCallResult, UpstreamError> {
        let mut backends = self.backends.lock().unwrap();
        backends.calls.push(ReceivedCall {
            backend: self.backend.clone(),
            tool: name.to_owned(),
            arguments: arguments.clone(),
        });

        match backends.results.get(&(self.backend.clone(), name.to_owned())) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(UpstreamError::Transport(message.clone())),
            None => Ok(RemoteCallResult {
                structured: Some(Value::Object(arguments)),
                ..RemoteCallResult::default()
            }),
        }
    }

    async fn close(self: Box<Self>) {}
}
