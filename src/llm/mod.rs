//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）以及提供方注册表

pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

pub use mock::{MockLlmClient, MockReply};
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL};
pub use registry::ProviderRegistry;
pub use traits::LlmClient;
