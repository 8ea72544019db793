//! Built-in tool implementations.
//!
//! Tools here are plain Rust types; [`crate::qeteam::tool_protocols`] wraps them in
//! [`ToolProtocol`](crate::qeteam::tool_protocol::ToolProtocol) adapters so agents can call them.

pub mod artifact_writer;

pub use artifact_writer::{ArtifactError, ArtifactKind, ArtifactWriter};
