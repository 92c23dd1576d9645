//! Outbound collaborators: model, embedding and execution clients.

pub mod embedder;
pub mod llm;
pub mod verifier;

pub use embedder::{EmbedResponse, EmbeddingClient};
pub use llm::{ChatMessage, ChatRequest, ChatResponse, ModelClient, Role, TokenUsage};
pub use verifier::{ExecutionVerifier, StaticVerifier, VerificationReport};

pub const API_KEY_ENV: &str = "CONCORD_OPENAI_API_KEY";

/// Reads the OpenAI-compatible API key from the environment.
pub fn api_key_from_env() -> anyhow::Result<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => anyhow::bail!("{API_KEY_ENV} is not set"),
    }
}
