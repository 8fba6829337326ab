pub mod error;
pub mod gemini;

use async_trait::async_trait;

pub use error::LlmError;
pub use gemini::GeminiClient;

/// A text-in, text-out generative model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}
