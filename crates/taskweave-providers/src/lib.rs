//! # Taskweave Providers
//!
//! Chat-completion client implementations. Any OpenAI-compatible endpoint
//! (OpenAI, DeepSeek, Groq, Ollama, llama.cpp, custom gateways) is handled
//! by a single `OpenAiCompatibleClient` — endpoints differ only by base
//! URL, path, and API key.

pub mod openai_compatible;

use std::sync::Arc;

use taskweave_core::ChatClient;
use taskweave_core::config::LlmConfig;

pub use openai_compatible::OpenAiCompatibleClient;

/// Create a chat client from configuration.
///
/// Returns `None` when no backend is configured; the pipeline then runs
/// in degraded mode instead of failing.
pub fn create_client(config: &LlmConfig) -> Option<Arc<dyn ChatClient>> {
    if !config.configured() {
        tracing::info!("No model backend configured — pipeline will run degraded");
        return None;
    }
    Some(Arc::new(OpenAiCompatibleClient::from_config(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_yields_none() {
        let cfg = LlmConfig {
            enabled: false,
            ..LlmConfig::default()
        };
        assert!(create_client(&cfg).is_none());
    }

    #[test]
    fn test_configured_yields_client() {
        let cfg = LlmConfig::default();
        let client = create_client(&cfg).unwrap();
        assert_eq!(client.name(), "openai");
    }
}
