//! Provider client variants
//!
//! Each variant composes a `ProviderCore` and translates the abstract
//! request onto its native wire.

pub mod claude;
pub mod deepseek;
pub mod ollama;
pub mod openai;
pub mod qwen;

pub use claude::ClaudeClient;
pub use deepseek::DeepSeekClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use qwen::QwenClient;
