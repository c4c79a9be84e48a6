//! LLM 客户端抽象
//!
//! 记忆精选只需要一次非流式文本补全：给定 prompt，返回补全文本。所有后端（OpenAI 兼容 / Mock）实现 LlmClient。

use async_trait::async_trait;

use crate::core::ProviderError;

/// LLM 客户端 trait：语义精选用的单次文本补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
