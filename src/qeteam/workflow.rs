//! The quality-engineering team: a ready-made [`GroupChat`] that turns a requirement into a
//! Gherkin user story, CSV test cases and step definitions.
//!
//! Participants, in speaking order (disabled ones are skipped):
//!
//! | id                      | enabled by                  | tools             |
//! |-------------------------|-----------------------------|-------------------|
//! | `user_proxy`            | always                      |                   |
//! | `test_manager`          | `user_story_writer`         |                   |
//! | `test_case_writer`      | `test_case_writer`          | `write_file`      |
//! | `test_case_reviewer`    | `test_case_reviewer`        |                   |
//! | `bdd_coder`             | `bdd_coder`                 | `write_file`      |
//! | `step_definition_agent` | `step_definition_writer`    | `write_java_file` |

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::qeteam::agent::AssistantAgent;
use crate::qeteam::client_wrapper::ClientWrapper;
use crate::qeteam::config::{ConfigError, SelectionMode, TeamConfig};
use crate::qeteam::group_chat::{GroupChat, GroupChatError};
use crate::qeteam::selection::ModelSelector;
use crate::qeteam::tool_protocol::{ToolError, ToolRegistry};
use crate::qeteam::tool_protocols::ArtifactProtocol;
use crate::qeteam::tools::ArtifactWriter;
use crate::qeteam::user_proxy::{FixedInput, UserProxyAgent};

/// Initial task handed to the team.
pub const QE_TASK: &str =
    "Create a user story, acceptance criteria, test cases based on the user's requirement.";

const TEST_MANAGER_PROMPT: &str = "You are a TestManager. Your first task is to take the requirements provided and create a User Story and Acceptance Criteria.\n\
The User Story and Acceptance Criteria must be written in well-structured Gherkin syntax, using the keywords Feature, Scenario, Given, When, Then, And, But.\n\
After providing the Gherkin content, ask the 'test_case_writer' to proceed. Do not ask for user input again.\n\
Do not use termination phrases like 'TERMINATE'.";

const TEST_CASE_WRITER_PROMPT: &str = "You are a skilled test case writer. Create detailed and effective test cases in CSV format based on the User Story and Acceptance Criteria provided by the TestManager.\n\
Use the following columns in this exact order:\n\
1. Test Case ID (e.g., TC_001)\n\
2. Test Case Name\n\
3. Preconditions\n\
4. Test Steps (numbered steps)\n\
5. Expected Result\n\n\
Use the 'write_file' tool with type 'test_case' to save the CSV. After saving it, ask the 'test_case_reviewer' to review the file.";

const TEST_CASE_REVIEWER_PROMPT: &str = "You are a meticulous test case reviewer. Review the CSV test cases created by the 'test_case_writer' and give constructive feedback.\n\
If the test cases are satisfactory and meet all criteria, reply with 'APPROVED'. Otherwise, provide specific suggestions for changes.";

const BDD_CODER_PROMPT: &str = "You are an expert BDD Coder. You write step definitions in Python using the 'behave' library.\n\
Take the Gherkin Feature content provided by the TestManager and generate the corresponding step definition code.\n\
Implement every Given, When, Then, And and But step with a basic 'pass' statement and import what you need from 'behave'.\n\
Save the code with the 'write_file' tool using type 'step_definition'.\n\
Reply with 'TERMINATE' only after the Python file has been successfully written.";

const STEP_DEFINITION_PROMPT: &str = "Generate Java Selenium + Cucumber step definitions from the User Story and Acceptance Criteria produced by the TestManager.\n\
Rules:\n\
- Output a full Java class named StepDefinition\n\
- Use @Given, @When, @Then, @And\n\
- Convert steps to Java methods with camelCase names\n\
- Add Selenium logic using driver.findElement(By.id/xpath).click(), sendKeys, getText\n\
- No markdown. Only pure Java code.\n\
- Save the class with write_java_file(filename='StepDefinition.java', content=<code>).";

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowError {
    Config(ConfigError),
    Tool(ToolError),
    GroupChat(GroupChatError),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Config(err) => write!(f, "{}", err),
            WorkflowError::Tool(err) => write!(f, "{}", err),
            WorkflowError::GroupChat(err) => write!(f, "{}", err),
        }
    }
}

impl Error for WorkflowError {}

impl From<ConfigError> for WorkflowError {
    fn from(err: ConfigError) -> Self {
        WorkflowError::Config(err)
    }
}

impl From<ToolError> for WorkflowError {
    fn from(err: ToolError) -> Self {
        WorkflowError::Tool(err)
    }
}

impl From<GroupChatError> for WorkflowError {
    fn from(err: GroupChatError) -> Self {
        WorkflowError::GroupChat(err)
    }
}

/// Assemble the QE team described by `config`.
///
/// `requirements` is what the `user_proxy` relays when it speaks; `client` backs every
/// assistant and, in adaptive mode, the speaker selector.
pub fn build_qe_team(
    config: &TeamConfig,
    requirements: &str,
    client: Arc<dyn ClientWrapper>,
) -> Result<GroupChat, WorkflowError> {
    let mut config = config.clone();
    config.agents = config.agents.normalized();
    config.validate()?;

    let writer = Arc::new(ArtifactWriter::new(config.output_dir.clone()));
    let protocol = Arc::new(ArtifactProtocol::new(writer));

    let mut chat = GroupChat::new("qe_team", "Quality Engineering Team")
        .with_tool_error_policy(config.tool_error_policy);
    if let Some(max_turns) = config.max_turns {
        chat = chat.with_max_turns(max_turns);
    }
    if let Some(termination) = config.termination() {
        chat = chat.with_termination(termination);
    }
    if config.selection == SelectionMode::Adaptive {
        let mut selector = ModelSelector::new(client.clone());
        if let Some(window) = config.context_window {
            selector = selector.with_history_window(window);
        }
        chat = chat.with_selector(selector);
    }

    chat.add_participant(Arc::new(UserProxyAgent::new(
        "user_proxy",
        "Relays the user's requirement to the team",
        FixedInput::new(requirements),
    )))?;

    let assistant = |id: &str, description: &str, prompt: &str| {
        let agent = AssistantAgent::new(id, description, client.clone()).with_system_prompt(prompt);
        match config.context_window {
            Some(window) => agent.with_context_window(window),
            None => agent,
        }
    };

    let agents = config.agents;
    if agents.user_story_writer {
        chat.add_participant(Arc::new(assistant(
            "test_manager",
            "Writes the Gherkin user story and acceptance criteria",
            TEST_MANAGER_PROMPT,
        )))?;
    }
    if agents.test_case_writer {
        let mut tools = ToolRegistry::new();
        tools.register(ArtifactProtocol::write_file_metadata(), protocol.clone())?;
        chat.add_participant(Arc::new(
            assistant(
                "test_case_writer",
                "Writes CSV test cases and saves them with write_file",
                TEST_CASE_WRITER_PROMPT,
            )
            .with_tools(tools),
        ))?;
    }
    if agents.test_case_reviewer {
        chat.add_participant(Arc::new(assistant(
            "test_case_reviewer",
            "Reviews the CSV test cases and replies APPROVED when they are complete",
            TEST_CASE_REVIEWER_PROMPT,
        )))?;
    }
    if agents.bdd_coder {
        let mut tools = ToolRegistry::new();
        tools.register(ArtifactProtocol::write_file_metadata(), protocol.clone())?;
        chat.add_participant(Arc::new(
            assistant(
                "bdd_coder",
                "Writes Python behave step definitions",
                BDD_CODER_PROMPT,
            )
            .with_tools(tools),
        ))?;
    }
    if agents.step_definition_writer {
        let mut tools = ToolRegistry::new();
        tools.register(ArtifactProtocol::write_java_file_metadata(), protocol.clone())?;
        chat.add_participant(Arc::new(
            assistant(
                "step_definition_agent",
                "Writes Java Selenium + Cucumber step definitions",
                STEP_DEFINITION_PROMPT,
            )
            .with_tools(tools),
        ))?;
    }

    chat.validate()?;
    log::info!(
        "QE team assembled with {} participant(s), model '{}'",
        chat.participants().len(),
        client.model_name()
    );
    Ok(chat)
}
