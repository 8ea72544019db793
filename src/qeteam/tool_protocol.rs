//! Tool protocol abstraction and the name-keyed dispatcher agents use.
//!
//! # Architecture
//!
//! ```text
//! AssistantAgent → ToolCall → GroupChat → ToolRegistry::dispatch → ToolProtocol (trait)
//! ```
//!
//! [`ToolRegistry::dispatch`] never returns an error: unknown tools, malformed arguments,
//! execution errors and timeouts all come back as a failed [`ToolResult`] so the group chat can
//! append them to the transcript as role=tool messages.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qeteam::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry, ToolResult};
//! use qeteam::tool_protocols::CustomToolProtocol;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let protocol = Arc::new(CustomToolProtocol::new());
//! protocol
//!     .register_tool(
//!         ToolMetadata::new("echo", "Echo the input back").with_parameter(
//!             ToolParameter::new("text", ToolParameterType::String).required(),
//!         ),
//!         Arc::new(|args| Ok(ToolResult::success(args["text"].clone()))),
//!     )
//!     .await;
//!
//! let mut registry = ToolRegistry::new();
//! registry.register_protocol(protocol).await?;
//!
//! let result = registry.dispatch("echo", json!({"text": "hi"})).await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one tool dispatch. Failures are values, never panics or `Err`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// `Null` on failure.
    pub output: serde_json::Value,
    pub error: Option<String>,
    /// Dispatch failures carry `error_kind` here.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Attach application specific metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Failed result describing `error`, tagged with its `error_kind`.
    pub fn from_error(error: &ToolError) -> Self {
        Self::failure(error.to_string())
            .with_metadata("error_kind", serde_json::Value::from(error.kind()))
    }
}

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ToolParameterType::String => value.is_string(),
            ToolParameterType::Number => value.is_number(),
            ToolParameterType::Integer => value.is_i64() || value.is_u64(),
            ToolParameterType::Boolean => value.is_boolean(),
            ToolParameterType::Array => value.is_array(),
            ToolParameterType::Object => value.is_object(),
        }
    }
}

/// One named argument of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value substituted when the caller omits the argument.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Static description of a tool interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// One line per parameter, used when advertising tools to a model.
    fn describe(&self) -> String {
        let mut out = format!("- {}: {}\n", self.name, self.description);
        for param in &self.parameters {
            out.push_str(&format!(
                "    * {} ({:?}{}){}\n",
                param.name,
                param.param_type,
                if param.required { ", required" } else { "" },
                param
                    .description
                    .as_ref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            ));
        }
        out
    }
}

/// Backend that actually runs tools, e.g. closures or the artifact writer.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// `parameters` has already been checked against the tool's metadata.
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Protocol identifier (e.g., "custom", "artifact")
    fn protocol_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// A tool with this name is already registered.
    AlreadyRegistered(String),
    /// Tool execution raised an error.
    ExecutionFailed(String),
    /// The provided JSON arguments failed validation.
    InvalidParameters(String),
    /// The tool did not complete within the registry timeout.
    Timeout(String),
}

impl ToolError {
    /// Stable identifier recorded as `error_kind` metadata on failed results.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "not_found",
            ToolError::AlreadyRegistered(_) => "already_registered",
            ToolError::ExecutionFailed(_) => "execution_failed",
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::Timeout(_) => "timeout",
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::AlreadyRegistered(name) => write!(f, "Tool already registered: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::Timeout(msg) => write!(f, "Tool timed out: {}", msg),
        }
    }
}

impl Error for ToolError {}

struct RegisteredTool {
    metadata: ToolMetadata,
    protocol: Arc<dyn ToolProtocol>,
}

/// Name-keyed set of tools owned by one agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every dispatch; a call exceeding it yields a `timeout` failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register one tool served by `protocol`. Names must be unique.
    pub fn register(
        &mut self,
        metadata: ToolMetadata,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<(), ToolError> {
        if self.tools.contains_key(&metadata.name) {
            return Err(ToolError::AlreadyRegistered(metadata.name));
        }
        self.tools
            .insert(metadata.name.clone(), RegisteredTool { metadata, protocol });
        Ok(())
    }

    /// Register every tool `protocol` advertises, returning how many were added.
    pub async fn register_protocol(
        &mut self,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let tools = protocol.list_tools().await?;
        let count = tools.len();
        for metadata in tools {
            self.register(metadata, protocol.clone())?;
        }
        log::debug!(
            "registered {} tool(s) from protocol '{}'",
            count,
            protocol.protocol_name()
        );
        Ok(count)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Metadata of registered tools, ordered by name.
    pub fn list_tools(&self) -> Vec<&ToolMetadata> {
        self.tools.values().map(|tool| &tool.metadata).collect()
    }

    /// Tool catalogue in the form injected into an agent's system prompt.
    pub fn describe_for_prompt(&self) -> String {
        self.tools
            .values()
            .map(|tool| tool.metadata.describe())
            .collect()
    }

    /// Look up `name` and execute it with `arguments`.
    ///
    /// `arguments` must be a JSON object (or null, read as `{}`). Required parameters are
    /// checked and defaults filled in before the protocol sees the call. No retries.
    pub async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(tool) => tool,
            None => {
                log::warn!("dispatch of unregistered tool '{}'", name);
                return ToolResult::from_error(&ToolError::NotFound(name.to_string()));
            }
        };

        let arguments = match prepare_arguments(&tool.metadata, arguments) {
            Ok(arguments) => arguments,
            Err(err) => return ToolResult::from_error(&err),
        };

        let call = AssertUnwindSafe(tool.protocol.execute(name, arguments)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return ToolResult::from_error(&ToolError::Timeout(format!(
                        "'{}' exceeded {:?}",
                        name, limit
                    )))
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => ToolResult::from_error(&ToolError::ExecutionFailed(err.to_string())),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                log::error!("tool '{}' panicked: {}", name, reason);
                ToolResult::from_error(&ToolError::ExecutionFailed(format!(
                    "'{}' panicked: {}",
                    name, reason
                )))
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn prepare_arguments(
    metadata: &ToolMetadata,
    arguments: serde_json::Value,
) -> Result<serde_json::Value, ToolError> {
    let mut map = match arguments {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            return Err(ToolError::InvalidParameters(format!(
                "expected a JSON object for '{}', got {}",
                metadata.name, other
            )))
        }
    };

    for param in &metadata.parameters {
        match map.get(&param.name) {
            Some(value) if !param.param_type.accepts(value) => {
                return Err(ToolError::InvalidParameters(format!(
                    "'{}' must be of type {:?}",
                    param.name, param.param_type
                )));
            }
            Some(_) => {}
            None => {
                if let Some(default) = &param.default {
                    map.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(ToolError::InvalidParameters(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
            }
        }
    }

    Ok(serde_json::Value::Object(map))
}
