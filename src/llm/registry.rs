//! 提供方注册表：按 rerank_provider_id 查找精选用的 LlmClient
//!
//! id 不区分大小写（config 加载时表键会被小写化）。

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderSection;
use crate::core::ProviderError;
use crate::llm::{LlmClient, OpenAiClient, DEEPSEEK_BASE_URL};

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由 [providers.*] 配置段创建 OpenAI 兼容客户端
    pub fn from_sections(sections: &HashMap<String, ProviderSection>) -> Self {
        let mut registry = Self::new();
        for (id, section) in sections {
            let api_key = section
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            let base_url = match (section.base_url.as_deref(), section.kind.as_str()) {
                (Some(url), _) => Some(url),
                (None, "deepseek") => Some(DEEPSEEK_BASE_URL),
                (None, _) => None,
            };
            let client = OpenAiClient::new(base_url, &section.model, api_key.as_deref());
            tracing::info!(
                "Registered rerank provider '{}' ({} / {})",
                id,
                section.kind,
                section.model
            );
            registry.register(id, Arc::new(client));
        }
        registry
    }

    pub fn register(&mut self, id: &str, client: Arc<dyn LlmClient>) {
        self.providers.insert(id.to_lowercase(), client);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmClient>, ProviderError> {
        self.providers
            .get(&id.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
