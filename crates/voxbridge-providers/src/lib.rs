//! Completion provider abstraction.
//!
//! The transcript listener turns every finalized caller utterance into one
//! [`CompletionClient::complete`] call. Providers never fail outward: an
//! upstream error degrades to empty text, which the call treats as "nothing to
//! say this turn".

use async_trait::async_trait;

pub mod openai;

pub use openai::OpenAiCompletionClient;

/// A request/response text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider identifier (e.g., "openai").
    fn id(&self) -> &str;

    /// Complete `prompt` as a single user message.
    ///
    /// Returns the trimmed text of the first choice, or an empty string on
    /// any upstream failure.
    async fn complete(&self, prompt: &str) -> String;
}
