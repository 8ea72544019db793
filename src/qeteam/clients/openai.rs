//! The `OpenAIClient` struct implements `ClientWrapper` for OpenAI's Chat Completions API and
//! any endpoint that speaks the same protocol (e.g. a local Ollama server via
//! [`OpenAIClient::new_with_base_url`]).
//!
//! The latest `TokenUsage` is captured after every request and exposed through
//! `get_last_usage()`.
//!
//! # Example
//!
//! ```rust,no_run
//! use qeteam::clients::openai::OpenAIClient;
//! use qeteam::{ClientWrapper, Message, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new_with_model_string(&key, "gpt-4o-mini");
//!
//!     let reply = client
//!         .send_message(&[
//!             Message::new(Role::System, "You are a QA engineer."),
//!             Message::new(Role::User, "Name one edge case for a login form."),
//!         ])
//!         .await?;
//!     println!("{}", reply.content);
//!
//!     if let Some(usage) = client.get_last_usage().await {
//!         println!("tokens: {}", usage.total_tokens);
//!     }
//!     Ok(())
//! }
//! ```
use std::error::Error;

use async_trait::async_trait;
use openai_rust2 as openai_rust;
use tokio::sync::Mutex;

use crate::qeteam::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::qeteam::clients::common::{get_shared_http_client, send_and_track, to_chat_messages};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

pub struct OpenAIClient {
    client: openai_rust::Client,
    model: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Construct a client using the provided API key and explicit model name.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        OpenAIClient {
            client: openai_rust::Client::new_with_client(
                secret_key,
                get_shared_http_client().clone(),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    /// Construct a client targeting a custom OpenAI compatible base URL.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_shared_http_client().clone(),
                base_url,
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let content = send_and_track(
            &self.client,
            &self.model,
            to_chat_messages(messages),
            Some(CHAT_COMPLETIONS_PATH.to_string()),
            &self.token_usage,
        )
        .await?;

        Ok(Message::new(Role::Assistant, content))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
