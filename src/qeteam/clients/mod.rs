//! Backend specific [`ClientWrapper`](crate::qeteam::client_wrapper::ClientWrapper) implementations.
//!
//! Any OpenAI compatible endpoint (hosted OpenAI, a local Ollama server, a proxy) is reached
//! through [`openai::OpenAIClient`] with a custom base URL.

pub mod common;
pub mod openai;
