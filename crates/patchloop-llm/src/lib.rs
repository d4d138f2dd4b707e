//! Planner and patch generator collaborators.
//!
//! The engine talks to language models through two synchronous seams:
//! [`Planner`] turns a request into a [`PlanDocument`](patchloop_utils::types::PlanDocument)
//! and [`Generator`] turns a system/user prompt pair into raw text. Concrete
//! backends are selected from configuration with [`generator_from_config`].

mod command;
mod context;
mod ollama;
mod planner;
pub mod prompts;
#[cfg(any(test, feature = "test-utils"))]
mod scripted;
mod types;

pub use command::CommandGenerator;
pub use context::{ContextProvider, FileContext, NoContext, StaticContext};
pub use ollama::OllamaGenerator;
pub use planner::{LlmPlanner, parse_plan_response};
pub use patchloop_utils::error::LlmError;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{ScriptedGenerator, ScriptedPlanner};
pub use types::{Generator, Message, Planner, PlannerOutput, Role};

use patchloop_config::Config;
use patchloop_runner::NativeRunner;

/// Build the generator named by `llm.provider`.
///
/// # Errors
///
/// Returns `LlmError::Misconfiguration` for an unknown provider, a command
/// provider without argv, or an HTTP client that cannot be constructed.
pub fn generator_from_config(config: &Config) -> Result<Box<dyn Generator>, LlmError> {
    let llm = &config.llm;
    match llm.provider.as_str() {
        "ollama" => {
            let generator =
                OllamaGenerator::new(&llm.base_url, &llm.model, config.llm_timeout())?;
            Ok(Box::new(generator))
        }
        "command" => {
            let generator = CommandGenerator::new(
                llm.command.clone(),
                NativeRunner::new(),
                config.llm_timeout(),
            )?
            .with_cwd(config.repo_root.clone());
            Ok(Box::new(generator))
        }
        unknown => Err(LlmError::Misconfiguration(format!(
            "Unknown LLM provider '{unknown}'. Supported providers: ollama, command."
        ))),
    }
}

/// Context provider for the configured `llm.context_file`, if any.
#[must_use]
pub fn context_from_config(config: &Config) -> Box<dyn ContextProvider> {
    match config.context_file() {
        Some(path) => Box::new(FileContext::new(path)),
        None => Box::new(NoContext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_provider_is_constructed_from_config() {
        let config = Config::builder()
            .llm_provider("command")
            .llm_command(["cat"])
            .build()
            .unwrap();
        assert!(generator_from_config(&config).is_ok());
    }

    #[test]
    fn test_ollama_provider_is_constructed_from_config() {
        let config = Config::builder().build().unwrap();
        assert!(generator_from_config(&config).is_ok());
    }

    #[test]
    fn test_context_defaults_to_none() {
        let config = Config::builder().build().unwrap();
        assert_eq!(context_from_config(&config).context_for("x").unwrap(), "");
    }
}
