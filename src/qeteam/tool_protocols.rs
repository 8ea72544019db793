//! Tool Protocol Implementations
//!
//! Concrete [`ToolProtocol`] implementations agents can register in a
//! [`ToolRegistry`](crate::qeteam::tool_protocol::ToolRegistry):
//!
//! - **CustomToolProtocol**: direct Rust function calls (sync and async)
//! - **ArtifactProtocol**: the `write_file` / `write_java_file` tools backed by an
//!   [`ArtifactWriter`]
//!
//! ```ignore
//! let mut registry = ToolRegistry::new();
//! registry.register_protocol(Arc::new(ArtifactProtocol::new(writer))).await?;
//! registry.register_protocol(Arc::new(CustomToolProtocol::new())).await?;
//! ```

use crate::qeteam::tool_protocol::{
    ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};
use crate::qeteam::tools::artifact_writer::{ArtifactKind, ArtifactWriter};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Type alias for synchronous tool functions exposed via the custom adapter.
pub type ToolFunction =
    Arc<dyn Fn(JsonValue) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Type alias for asynchronous tool functions exposed via the custom adapter.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            JsonValue,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<Output = Result<ToolResult, Box<dyn Error + Send + Sync>>>
                    + Send,
            >,
        > + Send
        + Sync,
>;

enum ToolFn {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

/// Protocol serving tools implemented as Rust closures.
///
/// ```rust
/// use std::sync::Arc;
/// use qeteam::tool_protocol::{ToolMetadata, ToolProtocol, ToolResult};
/// use qeteam::tool_protocols::CustomToolProtocol;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let protocol = CustomToolProtocol::new();
/// protocol
///     .register_tool(
///         ToolMetadata::new("count_words", "Count words in a text"),
///         Arc::new(|args| {
///             let words = args["text"].as_str().unwrap_or("").split_whitespace().count();
///             Ok(ToolResult::success(json!({ "words": words })))
///         }),
///     )
///     .await;
///
/// let result = protocol
///     .execute("count_words", json!({"text": "given when then"}))
///     .await
///     .unwrap();
/// assert_eq!(result.output["words"], 3);
/// # }
/// ```
pub struct CustomToolProtocol {
    tools: RwLock<HashMap<String, (ToolMetadata, ToolFn)>>,
}

impl CustomToolProtocol {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a synchronous tool.
    pub async fn register_tool(&self, metadata: ToolMetadata, function: ToolFunction) {
        let name = metadata.name.clone();
        self.tools
            .write()
            .await
            .insert(name, (metadata, ToolFn::Sync(function)));
    }

    /// Register (or replace) an asynchronous tool.
    pub async fn register_async_tool(&self, metadata: ToolMetadata, function: AsyncToolFunction) {
        let name = metadata.name.clone();
        self.tools
            .write()
            .await
            .insert(name, (metadata, ToolFn::Async(function)));
    }
}

impl Default for CustomToolProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProtocol for CustomToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        // Clone the function out so the lock is not held across the call.
        let function = {
            let tools = self.tools.read().await;
            match tools.get(tool_name) {
                Some((_, ToolFn::Sync(f))) => ToolFn::Sync(f.clone()),
                Some((_, ToolFn::Async(f))) => ToolFn::Async(f.clone()),
                None => return Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
            }
        };

        match function {
            ToolFn::Sync(f) => f(parameters),
            ToolFn::Async(f) => f(parameters).await,
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let tools = self.tools.read().await;
        Ok(tools.values().map(|(metadata, _)| metadata.clone()).collect())
    }

    fn protocol_name(&self) -> &str {
        "custom"
    }
}

pub const WRITE_FILE_TOOL: &str = "write_file";
pub const WRITE_JAVA_FILE_TOOL: &str = "write_java_file";
const JAVA_SUBDIR: &str = "java";

/// Exposes an [`ArtifactWriter`] as the `write_file` and `write_java_file` tools.
///
/// Both tools return `{"path": "<written location>"}` on success.
pub struct ArtifactProtocol {
    writer: Arc<ArtifactWriter>,
}

impl ArtifactProtocol {
    pub fn new(writer: Arc<ArtifactWriter>) -> Self {
        Self { writer }
    }

    pub fn write_file_metadata() -> ToolMetadata {
        ToolMetadata::new(
            WRITE_FILE_TOOL,
            "Save generated test cases (CSV) or step definitions to the output directory",
        )
        .with_parameter(
            ToolParameter::new("content", ToolParameterType::String)
                .with_description("Full file content")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("type", ToolParameterType::String)
                .with_description("Either 'test_case' or 'step_definition'")
                .with_default(JsonValue::from("test_case")),
        )
        .with_parameter(
            ToolParameter::new("filename", ToolParameterType::String)
                .with_description("Optional file name; a timestamped name is generated otherwise"),
        )
    }

    pub fn write_java_file_metadata() -> ToolMetadata {
        ToolMetadata::new(
            WRITE_JAVA_FILE_TOOL,
            "Save a Java step definition class under the java/ output directory",
        )
        .with_parameter(
            ToolParameter::new("filename", ToolParameterType::String)
                .with_description("Class file name, e.g. LoginSteps.java")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("content", ToolParameterType::String)
                .with_description("Java source code")
                .required(),
        )
    }

    async fn write_file(&self, parameters: &JsonValue) -> Result<ToolResult, ToolError> {
        let content = required_str(parameters, "content")?;
        let path = match parameters.get("filename").and_then(JsonValue::as_str) {
            Some(filename) => self.writer.write(filename, content).await,
            None => {
                let type_name = parameters
                    .get("type")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("test_case");
                let kind = ArtifactKind::from_type_name(type_name).ok_or_else(|| {
                    ToolError::InvalidParameters(format!("unknown artifact type '{}'", type_name))
                })?;
                self.writer.write_generated(kind, content).await
            }
        }
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolResult::success(
            serde_json::json!({ "path": path.to_string_lossy() }),
        ))
    }

    async fn write_java_file(&self, parameters: &JsonValue) -> Result<ToolResult, ToolError> {
        let filename = required_str(parameters, "filename")?;
        let content = required_str(parameters, "content")?;
        let relative = if filename.ends_with(".java") {
            format!("{}/{}", JAVA_SUBDIR, filename)
        } else {
            format!("{}/{}.java", JAVA_SUBDIR, filename)
        };

        let path = self
            .writer
            .write(&relative, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolResult::success(
            serde_json::json!({ "path": path.to_string_lossy() }),
        ))
    }
}

fn required_str<'a>(parameters: &'a JsonValue, name: &str) -> Result<&'a str, ToolError> {
    parameters
        .get(name)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ToolError::InvalidParameters(format!("'{}' must be a string", name)))
}

#[async_trait]
impl ToolProtocol for ArtifactProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let result = match tool_name {
            WRITE_FILE_TOOL => self.write_file(&parameters).await,
            WRITE_JAVA_FILE_TOOL => self.write_java_file(&parameters).await,
            other => Err(ToolError::NotFound(other.to_string())),
        };
        result.map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(vec![
            Self::write_file_metadata(),
            Self::write_java_file_metadata(),
        ])
    }

    fn protocol_name(&self) -> &str {
        "artifact"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_file_generates_csv_name() {
        let dir = TempDir::new().unwrap();
        let protocol = ArtifactProtocol::new(Arc::new(ArtifactWriter::new(dir.path())));

        let result = protocol
            .execute(WRITE_FILE_TOOL, json!({"content": "id,title", "type": "test_case"}))
            .await
            .unwrap();

        assert!(result.success);
        let path = result.output["path"].as_str().unwrap();
        assert!(path.contains("Test_Cases_"));
        assert!(path.ends_with(".csv"));
    }

    #[tokio::test]
    async fn test_write_java_file_lands_in_java_dir() {
        let dir = TempDir::new().unwrap();
        let protocol = ArtifactProtocol::new(Arc::new(ArtifactWriter::new(dir.path())));

        let result = protocol
            .execute(
                WRITE_JAVA_FILE_TOOL,
                json!({"filename": "LoginSteps", "content": "class LoginSteps {}"}),
            )
            .await
            .unwrap();

        let path = std::path::PathBuf::from(result.output["path"].as_str().unwrap());
        assert!(path.ends_with("java/LoginSteps.java"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unknown_artifact_type_is_an_error() {
        let dir = TempDir::new().unwrap();
        let protocol = ArtifactProtocol::new(Arc::new(ArtifactWriter::new(dir.path())));

        let err = protocol
            .execute(WRITE_FILE_TOOL, json!({"content": "x", "type": "gherkin"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown artifact type"));
    }

    #[tokio::test]
    async fn test_async_custom_tool() {
        let protocol = CustomToolProtocol::new();
        protocol
            .register_async_tool(
                ToolMetadata::new("slow_echo", "Echo after yielding"),
                Arc::new(|args| {
                    Box::pin(async move {
                        tokio::task::yield_now().await;
                        Ok(ToolResult::success(args))
                    })
                }),
            )
            .await;

        let result = protocol.execute("slow_echo", json!({"a": 1})).await.unwrap();
        assert_eq!(result.output, json!({"a": 1}));
        assert!(protocol.execute("missing", json!({})).await.is_err());
        assert_eq!(protocol.list_tools().await.unwrap().len(), 1);
    }
}
