use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::{Connector, RemoteCallResult, RemoteTool, UpstreamSession};
use crate::error::UpstreamError;
use crate::registry::ResolvedConnection;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub backend: String,
    pub tool: String,
    pub arguments: Map<String, Value>,
}

#[derive(Default)]
struct Shared {
    tools: HashMap<String, Vec<RemoteTool>>,
    results: HashMap<(String, String), Result<RemoteCallResult, String>>,
    unreachable: HashSet<String>,
    calls: Vec<RecordedCall>,
}

/// In-memory upstream keyed by backend name
///
/// Tools without a configured result echo their arguments back as
/// structured content.
#[derive(Default)]
pub(crate) struct FakeConnector {
    shared: Arc<Mutex<Shared>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(self, backend: &str, tool: RemoteTool) -> Self {
        self.shared
            .lock()
            .unwrap()
            .tools
            .entry(backend.to_string())
            .or_default()
            .push(tool);
        self
    }

    pub fn with_result(self, backend: &str, tool: &str, result: RemoteCallResult) -> Self {
        self.shared
            .lock()
            .unwrap()
            .results
            .insert((backend.to_string(), tool.to_string()), Ok(result));
        self
    }

    pub fn with_call_error(self, backend: &str, tool: &str, message: &str) -> Self {
        self.shared
            .lock()
            .unwrap()
            .results
            .insert((backend.to_string(), tool.to_string()), Err(message.to_string()));
        self
    }

    pub fn unreachable(self, backend: &str) -> Self {
        self.set_unreachable(backend);
        self
    }

    pub fn set_unreachable(&self, backend: &str) {
        self.shared.lock().unwrap().unreachable.insert(backend.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        backend: &str,
        _connection: &ResolvedConnection,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        if self.shared.lock().unwrap().unreachable.contains(backend) {
            return Err(UpstreamError::Transport(format!("connection refused by {backend}")));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            backend: backend.to_string(),
            shared: Arc::clone(&self.shared),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSession {
    backend: String,
    shared: Arc<Mutex<Shared>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamSession for FakeSession {
    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, UpstreamError> {
        Ok(self
            .shared
            .lock()
            .unwrap()
            .tools
            .get(&self.backend)
            .cloned()
            .unwrap_or_default())
    }

    async fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> Result<RemoteCallResult, UpstreamError> {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(RecordedCall {
            backend: self.backend.clone(),
            tool: name.to_string(),
            arguments: arguments.clone(),
        });

        match shared.results.get(&(self.backend.clone(), name.to_string())) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(UpstreamError::Transport(message.clone())),
            None => Ok(RemoteCallResult {
                structured: Some(Value::Object(arguments)),
                ..RemoteCallResult::default()
            }),
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
