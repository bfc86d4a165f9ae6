use std::sync::Arc;

use conflux_core::CallContext;
use serde_json::{Map, Value};

use crate::client::{Connector, RemoteCallResult};
use crate::discovery::Discovery;
use crate::error::UpstreamError;
use crate::registry::ResolvedConnection;
use crate::tracking::TrackingStore;

/// Routes tool calls to their backend and records every call
///
/// Each call opens its own session over the connection recorded by the
/// last discovery of the backend. Calls are never retried.
pub struct CallRouter {
    discovery: Arc<Discovery>,
    tracking: Arc<TrackingStore>,
    connector: Arc<dyn Connector>,
}

impl CallRouter {
    pub fn new(discovery: Arc<Discovery>, tracking: Arc<TrackingStore>, connector: Arc<dyn Connector>) -> Self {
        Self {
            discovery,
            tracking,
            connector,
        }
    }

    /// Invoke `tool` on `backend`
    ///
    /// `Ok(None)` means the upstream answered without a usable value.
    pub async fn call(
        &self,
        backend: &str,
        tool: &str,
        arguments: Map<String, Value>,
        context: &CallContext,
    ) -> Result<Option<Value>, UpstreamError> {
        let connection = self.discovery.active_connection(backend).await.ok_or_else(|| {
            UpstreamError::config(format!("Server '{backend}' has no active connection; discover it first"))
        })?;

        let request_id = self
            .tracking
            .create(backend, tool, arguments.clone(), context)
            .await;
        self.tracking.start(&request_id).await;

        match self.dispatch(backend, tool, arguments, &connection).await {
            Ok(value) => {
                self.tracking.complete(&request_id, value.clone()).await;
                Ok(value)
            }
            Err(reason) => {
                self.tracking.fail(&request_id, reason.clone()).await;
                Err(UpstreamError::ToolExecution {
                    server: backend.to_owned(),
                    tool: tool.to_owned(),
                    reason,
                })
            }
        }
    }

    async fn dispatch(
        &self,
        backend: &str,
        tool: &str,
        arguments: Map<String, Value>,
        connection: &ResolvedConnection,
    ) -> Result<Option<Value>, String> {
        let mut session = self
            .connector
            .connect(backend, connection)
            .await
            .map_err(|e| e.to_string())?;
        let outcome = session.call_tool(tool, arguments).await;
        session.close().await;

        let result = outcome.map_err(|e| e.to_string())?;

        if result.is_error {
            let message = text_content(&result.content).unwrap_or_else(|| "upstream reported an error".to_string());
            return Err(message);
        }

        Ok(extract_result(result))
    }
}

/// Pick the value of a call result
///
/// Structured content wins. Otherwise every text block whose `text` is a
/// string is joined with a blank line. Anything else has no value.
pub fn extract_result(result: RemoteCallResult) -> Option<Value> {
    if let Some(structured) = result.structured.filter(|v| !v.is_null()) {
        return Some(structured);
    }

    text_content(&result.content).map(Value::String)
}

fn text_content(content: &[Value]) -> Option<String> {
    let texts: Vec<&str> = content
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    (!texts.is_empty()).then(|| texts.join("\n\n"))
}
