//! Forwarding proxies built from discovered tool schemas
//!
//! A proxy carries a typed parameter list derived from the tool's input
//! schema. Arguments are bound against that list, validated, and forwarded
//! through the [`CallRouter`]. The proxy is the only layer that turns
//! results and errors into text.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use conflux_core::CallContext;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use crate::discovery::ToolDescriptor;
use crate::dispatch::CallRouter;
use crate::error::UpstreamError;

/// Payload returned when the upstream produced no value
const NO_RESULT: &str = "No result returned from upstream";

/// Coerced type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamKind {
    /// Map a JSON Schema `type`; a missing type is a string
    fn from_schema(property: &Value) -> Self {
        match property.get("type") {
            None => Self::String,
            Some(Value::String(name)) => match name.as_str() {
                "string" => Self::String,
                "number" => Self::Number,
                "integer" => Self::Integer,
                "boolean" => Self::Boolean,
                "array" => Self::Array,
                "object" => Self::Object,
                _ => Self::Any,
            },
            Some(_) => Self::Any,
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// One declared tool parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub kind: ParamKind,
}

/// Bound argument; unset optional parameters are absent, not null
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Absent,
    Present(Value),
}

/// Derive the parameter list from an input schema
///
/// Required parameters come first, each group in declaration order.
/// Fails when the schema is not an object, `properties` is not an object,
/// or `required` is not an array of strings.
pub fn parse_params(schema: &Value) -> Result<Vec<ParamSpec>, String> {
    let Value::Object(schema) = schema else {
        return Err("input schema is not an object".to_string());
    };

    let properties = match schema.get("properties") {
        None => return Ok(Vec::new()),
        Some(Value::Object(properties)) => properties,
        Some(_) => return Err("input schema 'properties' is not an object".to_string()),
    };

    let required: Vec<&str> = match schema.get("required") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|name| name.as_str().ok_or("input schema 'required' must only contain strings"))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err("input schema 'required' is not an array".to_string()),
    };

    let (mut params, optional): (Vec<_>, Vec<_>) = properties
        .iter()
        .map(|(name, property)| ParamSpec {
            name: name.clone(),
            required: required.contains(&name.as_str()),
            kind: ParamKind::from_schema(property),
        })
        .partition(|param| param.required);

    params.extend(optional);
    Ok(params)
}

/// Listing entry for a registered proxy
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub server: String,
    pub tool: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
    pub input_schema: Value,
}

/// Locally registered entry point forwarding one backend tool
pub struct ToolProxy {
    exposed_name: String,
    backend: String,
    tool: String,
    description: String,
    input_schema: Value,
    params: Vec<ParamSpec>,
    router: Arc<CallRouter>,
}

impl fmt::Debug for ToolProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolProxy")
            .field("exposed_name", &self.exposed_name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ToolProxy {
    pub fn build(backend: &str, descriptor: &ToolDescriptor, router: Arc<CallRouter>) -> Result<Self, UpstreamError> {
        let params = parse_params(&descriptor.input_schema).map_err(|reason| UpstreamError::ToolDiscovery {
            server: backend.to_owned(),
            reason: format!("tool '{}': {reason}", descriptor.name),
        })?;

        Ok(Self {
            exposed_name: exposed_name(backend, &descriptor.name),
            backend: backend.to_owned(),
            tool: descriptor.name.clone(),
            description: format!("[{backend}] {}", descriptor.description),
            input_schema: descriptor.input_schema.clone(),
            params,
            router,
        })
    }

    pub fn exposed_name(&self) -> &str {
        &self.exposed_name
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.exposed_name.clone(),
            server: self.backend.clone(),
            tool: self.tool.clone(),
            description: self.description.clone(),
            parameters: self.params.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Bind arguments to the declared parameters, in parameter order
    ///
    /// A null for an optional parameter is treated as unset.
    pub fn bind(&self, arguments: &Map<String, Value>) -> Result<Vec<(String, ArgValue)>, UpstreamError> {
        if let Some(unknown) = arguments
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(self.invalid(format!("unexpected argument '{unknown}'")));
        }

        self.params
            .iter()
            .map(|param| {
                let value = match arguments.get(&param.name) {
                    None | Some(Value::Null) if param.required => {
                        return Err(self.invalid(format!("missing required argument '{}'", param.name)));
                    }
                    None | Some(Value::Null) => ArgValue::Absent,
                    Some(value) if !param.kind.accepts(value) => {
                        return Err(self.invalid(format!("argument '{}' must be of type {}", param.name, param.kind)));
                    }
                    Some(value) => ArgValue::Present(value.clone()),
                };
                Ok((param.name.clone(), value))
            })
            .collect()
    }

    /// Validate and forward a call, keeping the typed result
    pub async fn call(&self, arguments: Map<String, Value>, context: &CallContext) -> Result<Option<Value>, UpstreamError> {
        // Tools that declare no parameters receive the arguments untouched
        let forwarded = if self.params.is_empty() {
            arguments
        } else {
            self.bind(&arguments)?
                .into_iter()
                .filter_map(|(name, value)| match value {
                    ArgValue::Present(value) => Some((name, value)),
                    ArgValue::Absent => None,
                })
                .collect()
        };

        self.router.call(&self.backend, &self.tool, forwarded, context).await
    }

    /// Forward a call and render the outcome as text; never fails
    pub async fn invoke(&self, arguments: Map<String, Value>, context: &CallContext) -> String {
        match self.call(arguments, context).await {
            Ok(Some(Value::String(text))) => text,
            Ok(Some(value)) => value.to_string(),
            Ok(None) => json!({ "error": NO_RESULT }).to_string(),
            Err(e) => {
                tracing::warn!(tool = %self.exposed_name, error = %e, "tool proxy call failed");
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }

    fn invalid(&self, reason: String) -> UpstreamError {
        UpstreamError::InvalidArguments {
            tool: self.exposed_name.clone(),
            reason,
        }
    }
}

/// Name a backend tool is exposed under
pub fn exposed_name(backend: &str, tool: &str) -> String {
    format!("{backend}_{tool}")
}

/// Proxies keyed by exposed name
#[derive(Debug, Default)]
pub struct ToolRegistry {
    proxies: RwLock<IndexMap<String, Arc<ToolProxy>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proxy, replacing any earlier one with the same name
    pub async fn register(&self, proxy: ToolProxy) {
        let name = proxy.exposed_name.clone();
        if self.proxies.write().await.insert(name.clone(), Arc::new(proxy)).is_some() {
            tracing::debug!(tool = %name, "replaced tool proxy");
        }
    }

    pub async fn get(&self, exposed_name: &str) -> Option<Arc<ToolProxy>> {
        self.proxies.read().await.get(exposed_name).cloned()
    }

    /// Drop every proxy of a backend; returns how many were removed
    pub async fn remove_backend(&self, backend: &str) -> usize {
        let mut proxies = self.proxies.write().await;
        let before = proxies.len();
        proxies.retain(|_, proxy| proxy.backend != backend);
        before - proxies.len()
    }

    /// Swap the proxies of a backend for a fresh set in one step
    ///
    /// Names present before and after stay resolvable throughout; names
    /// missing from `proxies` are dropped.
    pub async fn replace_backend(&self, backend: &str, proxies: Vec<ToolProxy>) {
        let fresh: HashSet<String> = proxies.iter().map(|p| p.exposed_name.clone()).collect();

        let mut registered = self.proxies.write().await;
        registered.retain(|name, proxy| proxy.backend != backend || fresh.contains(name));
        for proxy in proxies {
            registered.insert(proxy.exposed_name.clone(), Arc::new(proxy));
        }
    }

    /// Proxies in registration order, optionally for one backend
    pub async fn list(&self, backend: Option<&str>) -> Vec<Arc<ToolProxy>> {
        self.proxies
            .read()
            .await
            .values()
            .filter(|proxy| backend.is_none_or(|b| proxy.backend == b))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.proxies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
