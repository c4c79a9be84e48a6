//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按预设脚本依次返回回复、错误或延迟，并记录收到的 prompt，便于断言精选流程。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ProviderError;
use crate::llm::LlmClient;

/// 单步脚本
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// 先等待再返回文本（用于超时测试）
    Delayed(Duration, String),
}

/// Mock 客户端：脚本耗尽后重复最后一步；空脚本返回 EmptyResponse
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockReply>>,
    last: Mutex<Option<MockReply>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 总是回复同一段文本
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_script(vec![MockReply::Text(text.into())])
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_script(vec![MockReply::Fail(reason.into())])
    }

    pub fn with_script(script: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的全部 prompt
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn next_reply(&self) -> Option<MockReply> {
        let mut script = self.script.lock().ok()?;
        let mut last = self.last.lock().ok()?;
        if let Some(step) = script.pop_front() {
            *last = Some(step);
        }
        last.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match self.next_reply() {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(reason)) => Err(ProviderError::Request(reason)),
            Some(MockReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(ProviderError::EmptyResponse),
        }
    }
}
