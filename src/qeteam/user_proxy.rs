//! Human-in-the-loop participant.
//!
//! A [`UserProxyAgent`] speaks with role `user` and relays whatever its [`InputSource`] supplies.
//! [`FixedInput`] replays a requirement captured up-front (web forms, batch runs, tests);
//! [`StdinInput`] asks on the terminal.

use async_trait::async_trait;
use std::error::Error;
use std::io::{BufRead, Write};

use crate::qeteam::agent::{AgentError, AgentReply, ConversableAgent};
use crate::qeteam::client_wrapper::Role;
use crate::qeteam::message::ChatMessage;

/// Where a user proxy gets its next line from.
#[async_trait]
pub trait InputSource: Send + Sync {
    async fn read_input(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Always answers with the same text.
pub struct FixedInput {
    text: String,
}

impl FixedInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl InputSource for FixedInput {
    async fn read_input(&self, _prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(self.text.clone())
    }
}

/// Prompts on stdout and reads one line from stdin on a blocking thread.
#[derive(Default)]
pub struct StdinInput;

#[async_trait]
impl InputSource for StdinInput {
    async fn read_input(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let prompt = prompt.to_string();
        let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stdout = std::io::stdout();
            write!(stdout, "{}> ", prompt)?;
            stdout.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await??;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

pub struct UserProxyAgent {
    id: String,
    description: String,
    input: Box<dyn InputSource>,
}

impl UserProxyAgent {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        input: impl InputSource + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input: Box::new(input),
        }
    }
}

#[async_trait]
impl ConversableAgent for UserProxyAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn role(&self) -> Role {
        Role::User
    }

    async fn produce(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
        let prompt = match transcript.last() {
            Some(last) => format!("[{}] {}\n{}", last.source, last.content, self.id),
            None => self.id.clone(),
        };
        let text = self.input.read_input(&prompt).await?;
        if text.trim().is_empty() {
            return Err(Box::new(AgentError::EmptyReply(self.id.clone())));
        }
        Ok(AgentReply::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_input_relays_requirement() {
        let proxy = UserProxyAgent::new(
            "user_proxy",
            "Relays the requirement",
            FixedInput::new("add a login page test"),
        );
        assert_eq!(proxy.role(), Role::User);

        let reply = proxy
            .produce(&[ChatMessage::task("Create test cases")])
            .await
            .unwrap();
        assert_eq!(reply, AgentReply::Text("add a login page test".to_string()));
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let proxy = UserProxyAgent::new("user_proxy", "", FixedInput::new("  "));
        assert!(proxy.produce(&[]).await.is_err());
    }
}
