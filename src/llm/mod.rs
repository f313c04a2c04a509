//! LLM 层：客户端抽象与实现（OpenRouter 兼容 / Mock）、嵌入与意图路由

pub mod embedding;
pub mod mock;
pub mod openrouter;
pub mod router;
pub mod traits;

pub use embedding::{cosine, create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openrouter::{OpenRouterClient, TokenUsage};
pub use router::{IntentClassifier, ModelRouter, QueryIntent};
pub use traits::{ChatRequest, LlmClient, LlmError, Message, Role};
