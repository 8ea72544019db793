//! Run the QE team against a requirement and print the conversation.
//!
//! ```text
//! OPENAI_API_KEY=... cargo run --example qe_pipeline -- "Users can reset their password by email"
//! ```
//!
//! An optional `QE_CONFIG` environment variable points at a JSON [`TeamConfig`].
//! Set `"use_ollama": true` there to use a local Ollama server instead (no key needed).

use std::sync::Arc;

use qeteam::clients::openai::OpenAIClient;
use qeteam::{build_qe_team, init_logger, ClientWrapper, Console, TeamConfig, QE_TASK};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logger();

    let requirements = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if requirements.trim().is_empty() {
        eprintln!("usage: qe_pipeline <requirement text>");
        std::process::exit(2);
    }

    let config = match std::env::var("QE_CONFIG") {
        Ok(path) => TeamConfig::load(path).await?,
        Err(_) => TeamConfig::default(),
    };

    let client: Arc<dyn ClientWrapper> = match config.model.base_url() {
        Some(base_url) => Arc::new(OpenAIClient::new_with_base_url(
            "ollama",
            config.model.model_name(),
            base_url,
        )),
        None => Arc::new(OpenAIClient::new_with_model_string(
            &std::env::var("OPENAI_API_KEY")?,
            config.model.model_name(),
        )),
    };

    let team = build_qe_team(&config, &requirements, client)?;
    let stream = team.run_stream(QE_TASK)?;
    let outcome = Console::stdout().consume(stream).await?;

    println!(
        "run {} finished after {} turn(s), {} message(s)",
        outcome.run_id,
        outcome.turns,
        outcome.transcript.len()
    );
    Ok(())
}
