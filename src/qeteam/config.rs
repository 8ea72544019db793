//! Configuration for a QE team run.
//!
//! [`TeamConfig`] is plain serde data with sensible defaults, so a minimal (or empty) JSON file
//! is enough. The model keys of the classic `config.json` layout (`use_ollama`,
//! `openai_model_name`, `ollama_model_name`) are read from the top level; credentials are
//! never part of the configuration.
//!
//! # Examples
//!
//! ```
//! use qeteam::{SelectionMode, TeamConfig};
//!
//! let config = TeamConfig::from_json_str(r#"{
//!     "use_ollama": true,
//!     "ollama_model_name": "llama3.1",
//!     "max_turns": 6,
//!     "selection": "adaptive",
//!     "agents": { "step_definition_writer": true, "test_case_writer": false }
//! }"#).unwrap();
//!
//! assert_eq!(config.model.model_name(), "llama3.1");
//! assert_eq!(config.selection, SelectionMode::Adaptive);
//! // step definitions need test cases, so the writer is switched back on
//! assert!(config.agents.test_case_writer);
//! ```

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::qeteam::group_chat::ToolErrorPolicy;
use crate::qeteam::termination::Termination;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    /// Every specialist agent is switched off.
    NoAgentsSelected,
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Cannot read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Cannot parse configuration: {}", msg),
            ConfigError::NoAgentsSelected => write!(f, "At least one agent must be selected"),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for ConfigError {}

/// How the next speaker is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    RoundRobin,
    /// A model picks the next speaker from the participants' descriptions.
    Adaptive,
}

/// Which specialists take part in a run.
///
/// Step definitions are generated from the test cases, so enabling
/// `step_definition_writer` always enables `test_case_writer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSelection {
    /// Gherkin user story and acceptance criteria.
    pub user_story_writer: bool,
    /// CSV test cases, saved with `write_file`.
    pub test_case_writer: bool,
    pub test_case_reviewer: bool,
    /// Python `behave` step definitions.
    pub bdd_coder: bool,
    /// Java Selenium + Cucumber step definitions, saved with `write_java_file`.
    pub step_definition_writer: bool,
}

impl Default for AgentSelection {
    fn default() -> Self {
        Self {
            user_story_writer: true,
            test_case_writer: true,
            test_case_reviewer: false,
            bdd_coder: false,
            step_definition_writer: true,
        }
    }
}

impl AgentSelection {
    /// Apply the dependency rule between writers.
    pub fn normalized(mut self) -> Self {
        if self.step_definition_writer {
            self.test_case_writer = true;
        }
        self
    }

    pub fn any_selected(&self) -> bool {
        self.user_story_writer
            || self.test_case_writer
            || self.test_case_reviewer
            || self.bdd_coder
            || self.step_definition_writer
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Talk to a local Ollama server instead of OpenAI.
    pub use_ollama: bool,
    pub openai_model_name: String,
    pub ollama_model_name: String,
    pub ollama_base_url: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            use_ollama: false,
            openai_model_name: "gpt-4o-mini".to_string(),
            ollama_model_name: "llama3.1".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn model_name(&self) -> &str {
        if self.use_ollama {
            &self.ollama_model_name
        } else {
            &self.openai_model_name
        }
    }

    /// Custom endpoint, `None` for the hosted OpenAI API.
    pub fn base_url(&self) -> Option<&str> {
        if self.use_ollama {
            Some(&self.ollama_base_url)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Root directory for generated artifacts.
    pub output_dir: PathBuf,
    pub max_turns: Option<usize>,
    /// Stop as soon as any message contains this text.
    pub termination_marker: Option<String>,
    /// Stop once the transcript holds this many messages.
    pub max_messages: Option<usize>,
    pub selection: SelectionMode,
    pub tool_error_policy: ToolErrorPolicy,
    /// Recent messages each assistant sees.
    pub context_window: Option<usize>,
    pub agents: AgentSelection,
    #[serde(flatten)]
    pub model: ModelConfig,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            max_turns: Some(4),
            termination_marker: Some("TERMINATE".to_string()),
            max_messages: None,
            selection: SelectionMode::default(),
            tool_error_policy: ToolErrorPolicy::default(),
            context_window: Some(5),
            agents: AgentSelection::default(),
            model: ModelConfig::default(),
        }
    }
}

impl TeamConfig {
    /// Parse, normalise and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: TeamConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.agents = config.agents.normalized();
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json_str(&json)?;
        log::debug!("loaded team configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.agents.any_selected() {
            return Err(ConfigError::NoAgentsSelected);
        }
        if self.max_turns == Some(0) {
            return Err(ConfigError::Invalid("max_turns must be at least 1".to_string()));
        }
        if self.context_window == Some(0) {
            return Err(ConfigError::Invalid(
                "context_window must be at least 1".to_string(),
            ));
        }
        if let Some(termination) = self.termination() {
            termination.validate().map_err(ConfigError::Invalid)?;
        }
        if self.max_turns.is_none() && self.max_messages.is_none() {
            return Err(ConfigError::Invalid(
                "either max_turns or max_messages must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Termination condition described by the marker and message bound, if any.
    pub fn termination(&self) -> Option<Termination> {
        let marker = self
            .termination_marker
            .as_ref()
            .map(|marker| Termination::text_mention(marker.clone()));
        let bound = self.max_messages.map(Termination::max_messages);
        match (marker, bound) {
            (Some(marker), Some(bound)) => Some(marker | bound),
            (marker, bound) => marker.or(bound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TeamConfig::from_json_str("{}").unwrap();
        assert_eq!(config, TeamConfig::default());
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.model.base_url(), None);
        assert_eq!(
            config.termination(),
            Some(Termination::text_mention("TERMINATE"))
        );
    }

    #[test]
    fn test_legacy_keys_are_ignored_or_mapped() {
        let config = TeamConfig::from_json_str(
            r#"{"use_ollama": false, "openai_model_name": "gpt-4o", "temperature": 0.1, "openai_api_key": ""}"#,
        )
        .unwrap();
        assert_eq!(config.model.model_name(), "gpt-4o");
    }

    #[test]
    fn test_no_agents_selected() {
        let err = TeamConfig::from_json_str(
            r#"{"agents": {"user_story_writer": false, "test_case_writer": false, "step_definition_writer": false}}"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::NoAgentsSelected);
    }

    #[test]
    fn test_unbounded_configuration_is_rejected() {
        let err = TeamConfig::from_json_str(r#"{"max_turns": null}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config =
            TeamConfig::from_json_str(r#"{"max_turns": null, "max_messages": 9}"#).unwrap();
        assert!(config.termination().unwrap().guarantees_stop());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            TeamConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
