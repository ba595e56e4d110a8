//! Collaborator traits the engine consumes through narrow seams.

use async_trait::async_trait;

use crate::error::Result;

/// A chat-completion backend: one system prompt, one user prompt, one
/// response. Implementations live in `taskweave-providers`; the pipeline
/// only ever sees this trait.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Backend name for logs and error messages.
    fn name(&self) -> &str;

    /// Run a single request/response exchange.
    async fn chat(&self, system_prompt: &str, user_prompt: &str, temperature: f32)
    -> Result<String>;
}
