//! 记忆插件入口：宿主框架调用的全部操作
//!
//! 每个入口先解析会话标识，再调用 MemoryStore；成功的写操作随后立即落盘（失败只记录日志）。
//! on_llm_request 跑完整的召回流程并把结果注入出站请求。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::config::{AppConfig, ConfigManager, MemoryConfig};
use crate::core::MemoryError;
use crate::event::{MessageEvent, ProviderRequest};
use crate::llm::ProviderRegistry;
use crate::memory::record::now_local;
use crate::memory::{MemoryRecord, MemoryStats, MemoryStore};
use crate::recall::{inject, Reranker, Selection, SelectionPolicy};
use crate::session::{resolve_session_id, GLOBAL_SESSION_ID};

/// 手动添加的记忆默认重要性
pub const MANUAL_IMPORTANCE: i64 = 3;

/// 身份标签中的固定标记，用于编辑时识别并保留原标签
const MENTION_MARKER: &str = " mentioned]:";

/// 列表所属范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingScope {
    Personal,
    Group(String),
    Global,
}

#[derive(Debug, Clone)]
pub struct MemoryListing {
    pub scope: ListingScope,
    pub session_id: String,
    /// 按重要性降序
    pub memories: Vec<MemoryRecord>,
}

/// save_memory 工具的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { content: String },
    AutoSaveDisabled,
    BelowThreshold { importance: i64, threshold: u8 },
}

pub struct MemoryPlugin {
    config: RwLock<ConfigManager>,
    store: Arc<MemoryStore>,
    providers: ProviderRegistry,
}

impl MemoryPlugin {
    pub fn new(
        config: ConfigManager,
        store: Arc<MemoryStore>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            providers,
        }
    }

    /// 按应用配置打开数据文件并注册精选提供方
    pub fn open(app: &AppConfig) -> Self {
        let config = ConfigManager::from_overrides(&app.memory);
        let store = Arc::new(MemoryStore::open(&app.storage.data_file, config.current()));
        let providers = ProviderRegistry::from_sections(&app.providers);
        tracing::info!("Memory plugin initialized ({})", app.storage.data_file.display());
        Self::new(config, store, providers)
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    pub async fn config(&self) -> Arc<MemoryConfig> {
        self.config.read().await.current()
    }

    pub async fn session_id(&self, event: &MessageEvent) -> String {
        let config = self.config().await;
        resolve_session_id(event, config.enable_global_memory)
    }

    async fn persist(&self) {
        // 失败已在 store 内记录，内存数据仍是权威
        let _ = self.store.save().await;
    }

    /// 召回并注入记忆；返回选择结果（含所用层级）
    pub async fn on_llm_request(
        &self,
        event: &MessageEvent,
        request: &mut ProviderRequest,
    ) -> Selection {
        let config = self.config().await;
        let session_id = resolve_session_id(event, config.enable_global_memory);
        let memories = if config.enable_auto_injection && !event.message.is_empty() {
            self.store.get_memories(&session_id).await
        } else {
            Vec::new()
        };

        let selection = SelectionPolicy::new(&config)
            .with_reranker(self.reranker_for(&config))
            .select(&event.message, &memories, now_local())
            .await;

        if inject(
            request,
            &selection.memories,
            &config.injection_title,
            &config.injection_instruction,
        ) {
            tracing::debug!(
                "Injected {} memories into session {} ({:?})",
                selection.memories.len(),
                session_id,
                selection.tier
            );
        }
        selection
    }

    fn reranker_for(&self, config: &MemoryConfig) -> Option<Reranker> {
        if !config.rerank_enabled() {
            return None;
        }
        match self.providers.get(&config.rerank_provider_id) {
            Ok(client) => Some(
                Reranker::new(
                    client,
                    Duration::from_secs(config.rerank_timeout_secs),
                    config.inject_top_k,
                )
                .with_none_token(config.rerank_none_token.clone()),
            ),
            Err(e) => {
                tracing::warn!("Memory rerank skipped: {}", e);
                None
            }
        }
    }

    /// 手动添加记忆（重要性 3），自动打上 `[名字(ID) mentioned]:` 身份标签；返回实际写入的内容
    pub async fn add_memory(
        &self,
        event: &MessageEvent,
        content: &str,
    ) -> Result<String, MemoryError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        let session_id = self.session_id(event).await;
        let tagged = identity_tag(event, content);

        if !self.store.add(&session_id, &tagged, MANUAL_IMPORTANCE).await {
            return Err(MemoryError::ManagementDisabled);
        }
        self.persist().await;
        Ok(tagged)
    }

    /// 编辑记忆内容：已有身份标签则保留，否则以编辑者身份重新打标签
    pub async fn edit_memory(
        &self,
        event: &MessageEvent,
        index: usize,
        content: &str,
    ) -> Result<String, MemoryError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        let session_id = self.session_id(event).await;
        let edited = self
            .store
            .edit_content_with(&session_id, index, |old| retag(&old.content, event, content))
            .await;

        match edited {
            Some(new_content) => {
                self.persist().await;
                Ok(new_content)
            }
            None => Err(self.invalid_index(&session_id, index).await),
        }
    }

    pub async fn remove_memory(
        &self,
        event: &MessageEvent,
        index: usize,
    ) -> Result<MemoryRecord, MemoryError> {
        let session_id = self.session_id(event).await;
        match self.store.remove(&session_id, index).await {
            Some(removed) => {
                self.persist().await;
                Ok(removed)
            }
            None => Err(self.invalid_index(&session_id, index).await),
        }
    }

    /// 用户指定的重要性必须在 1-5 内（存储层仍会钳制）
    pub async fn update_importance(
        &self,
        event: &MessageEvent,
        index: usize,
        importance: i64,
    ) -> Result<(), MemoryError> {
        if !(1..=5).contains(&importance) {
            return Err(MemoryError::InvalidImportance(importance));
        }
        let session_id = self.session_id(event).await;
        if !self.store.update_importance(&session_id, index, importance).await {
            return Err(self.invalid_index(&session_id, index).await);
        }
        self.persist().await;
        Ok(())
    }

    async fn invalid_index(&self, session_id: &str, index: usize) -> MemoryError {
        MemoryError::InvalidIndex {
            index,
            len: self.store.len(session_id).await,
        }
    }

    pub async fn search_memories(&self, event: &MessageEvent, keyword: &str) -> Vec<MemoryRecord> {
        let session_id = self.session_id(event).await;
        self.store.search(&session_id, keyword).await
    }

    pub async fn stats(&self, event: &MessageEvent) -> MemoryStats {
        let session_id = self.session_id(event).await;
        self.store.stats(&session_id).await
    }

    /// 清空当前会话；没有记忆时返回 false
    pub async fn clear_session(&self, event: &MessageEvent) -> bool {
        let session_id = self.session_id(event).await;
        let cleared = self.store.clear(&session_id).await;
        if cleared {
            self.persist().await;
        }
        cleared
    }

    /// 当前会话的记忆列表；群聊受 allowed_groups 白名单限制
    pub async fn list_memories(&self, event: &MessageEvent) -> Result<MemoryListing, MemoryError> {
        let config = self.config().await;
        let scope = match event.group_id() {
            Some(group) if !config.is_group_allowed(group) => {
                return Err(MemoryError::GroupNotAllowed(group.to_string()));
            }
            Some(_) if config.enable_global_memory => ListingScope::Global,
            Some(group) => ListingScope::Group(group.to_string()),
            None => ListingScope::Personal,
        };
        let session_id = resolve_session_id(event, config.enable_global_memory);
        Ok(MemoryListing {
            scope,
            memories: self.store.get_memories_sorted(&session_id).await,
            session_id,
        })
    }

    /// 管理员查看全部会话（各桶按重要性降序）
    pub async fn list_all(
        &self,
        event: &MessageEvent,
    ) -> Result<Vec<(String, Vec<MemoryRecord>)>, MemoryError> {
        if !event.is_admin() {
            return Err(MemoryError::PermissionDenied);
        }
        let all = self.store.snapshot().await;
        Ok(all
            .into_iter()
            .map(|(session_id, mut memories)| {
                memories.sort_by(|a, b| b.importance.cmp(&a.importance));
                (session_id, memories)
            })
            .collect())
    }

    /// 查询群记忆：显式群号优先，其次全局桶，再次当前群
    pub async fn list_group(
        &self,
        event: &MessageEvent,
        target: Option<&str>,
    ) -> Result<MemoryListing, MemoryError> {
        let config = self.config().await;
        let (scope, session_id) = match target.map(str::trim).filter(|t| !t.is_empty()) {
            Some(target) => (ListingScope::Group(target.to_string()), target.to_string()),
            None if config.enable_global_memory => {
                (ListingScope::Global, GLOBAL_SESSION_ID.to_string())
            }
            None => match event.group_id() {
                Some(group) => (
                    ListingScope::Group(group.to_string()),
                    resolve_session_id(event, false),
                ),
                None => return Err(MemoryError::GroupTargetRequired),
            },
        };
        Ok(MemoryListing {
            scope,
            memories: self.store.get_memories_sorted(&session_id).await,
            session_id,
        })
    }

    /// Agent 的 save_memory 工具：受 auto_save_enabled 与 importance_threshold 约束
    pub async fn save_memory_tool(
        &self,
        event: &MessageEvent,
        content: &str,
        importance: i64,
    ) -> Result<SaveOutcome, MemoryError> {
        let config = self.config().await;
        if !config.auto_save_enabled {
            return Ok(SaveOutcome::AutoSaveDisabled);
        }
        if importance < config.importance_threshold as i64 {
            return Ok(SaveOutcome::BelowThreshold {
                importance,
                threshold: config.importance_threshold,
            });
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::EmptyContent);
        }

        let session_id = resolve_session_id(event, config.enable_global_memory);
        let tagged = format!("[{}{} {}", event.sender_name, MENTION_MARKER, content);
        if !self.store.add(&session_id, &tagged, importance).await {
            return Err(MemoryError::ManagementDisabled);
        }
        self.persist().await;
        Ok(SaveOutcome::Saved { content: tagged })
    }

    /// 配置热更新：校验后替换，并同步给存储层
    pub async fn update_config(&self, overrides: &Map<String, Value>) -> Arc<MemoryConfig> {
        let config = self.config.write().await.update(overrides);
        self.store.reconfigure(Arc::clone(&config)).await;
        config
    }

    pub async fn reset_config(&self) -> Arc<MemoryConfig> {
        let config = self.config.write().await.reset_to_default();
        self.store.reconfigure(Arc::clone(&config)).await;
        config
    }

    pub async fn config_summary(&self) -> String {
        self.config.read().await.summary()
    }

    /// 卸载时落盘
    pub async fn terminate(&self) -> Result<(), MemoryError> {
        let result = self.store.shutdown().await;
        tracing::info!("Memory plugin terminated");
        result
    }
}

/// 保留旧内容中的身份标签前缀；没有则使用编辑者身份
fn retag(old: &str, event: &MessageEvent, content: &str) -> String {
    if old.starts_with('[') && old.contains(MENTION_MARKER) {
        if let Some((prefix, _)) = old.split_once("]:") {
            return format!("{}]: {}", prefix, content);
        }
    }
    identity_tag(event, content)
}

/// `[名字(ID) mentioned]: 内容`
fn identity_tag(event: &MessageEvent, content: &str) -> String {
    format!("[{}({}){} {}", event.sender_name, event.sender_id, MENTION_MARKER, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::event::SenderRole;
    use crate::llm::MockLlmClient;
    use crate::recall::SelectionTier;

    fn plugin(dir: &TempDir, overrides: Value) -> MemoryPlugin {
        let config = ConfigManager::from_overrides(overrides.as_object().unwrap());
        let path = dir.path().join("memory_data.json");
        let store = Arc::new(MemoryStore::open(path, config.current()));
        MemoryPlugin::new(config, store, ProviderRegistry::new())
    }

    fn alice() -> MessageEvent {
        MessageEvent::private("qq:private:1", "1", "alice")
    }

    #[test]
    fn test_retag_keeps_existing_prefix() {
        let bob = MessageEvent::private("o", "2", "bob");
        assert_eq!(
            retag("[alice(1) mentioned]: old fact", &bob, "new fact"),
            "[alice(1) mentioned]: new fact"
        );
        assert_eq!(retag("plain old", &bob, "new"), "[bob(2) mentioned]: new");
    }

    #[tokio::test]
    async fn test_add_tags_and_persists() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({}));

        let stored = p.add_memory(&alice(), "  likes tea  ").await.unwrap();
        assert_eq!(stored, "[alice(1) mentioned]: likes tea");

        let on_disk = std::fs::read_to_string(dir.path().join("memory_data.json")).unwrap();
        assert!(on_disk.contains("likes tea"));
        assert!(matches!(p.add_memory(&alice(), "   ").await, Err(MemoryError::EmptyContent)));
    }

    #[tokio::test]
    async fn test_add_rejected_when_management_disabled() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({ "enable_memory_management": false }));
        assert!(matches!(
            p.add_memory(&alice(), "x").await,
            Err(MemoryError::ManagementDisabled)
        ));
    }

    #[tokio::test]
    async fn test_positional_errors_report_invalid_index() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({}));
        p.add_memory(&alice(), "one").await.unwrap();

        assert!(matches!(
            p.remove_memory(&alice(), 4).await,
            Err(MemoryError::InvalidIndex { index: 4, len: 1 })
        ));
        assert!(matches!(
            p.edit_memory(&alice(), 1, "x").await,
            Err(MemoryError::InvalidIndex { .. })
        ));
        assert!(matches!(
            p.update_importance(&alice(), 0, 6).await,
            Err(MemoryError::InvalidImportance(6))
        ));
        assert!(p.update_importance(&alice(), 0, 5).await.is_ok());
        assert_eq!(p.stats(&alice()).await.avg_importance, 5.0);
    }

    #[tokio::test]
    async fn test_edit_preserves_identity() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({}));
        p.add_memory(&alice(), "likes tea").await.unwrap();

        let bob_same_chat = MessageEvent::private("qq:private:1", "2", "bob");
        let edited = p.edit_memory(&bob_same_chat, 0, "likes coffee").await.unwrap();
        assert_eq!(edited, "[alice(1) mentioned]: likes coffee");
    }

    #[tokio::test]
    async fn test_save_tool_respects_flags() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({ "importance_threshold": 3 }));

        assert_eq!(
            p.save_memory_tool(&alice(), "minor", 2).await.unwrap(),
            SaveOutcome::BelowThreshold { importance: 2, threshold: 3 }
        );
        assert_eq!(
            p.save_memory_tool(&alice(), "birthday is May 1", 4).await.unwrap(),
            SaveOutcome::Saved {
                content: "[alice mentioned]: birthday is May 1".to_string()
            }
        );

        p.update_config(json!({ "auto_save_enabled": false }).as_object().unwrap()).await;
        assert_eq!(
            p.save_memory_tool(&alice(), "x", 5).await.unwrap(),
            SaveOutcome::AutoSaveDisabled
        );
    }

    #[tokio::test]
    async fn test_list_memories_scopes_and_whitelist() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({ "allowed_groups": "100" }));
        let in_100 = MessageEvent::group("100", "qq:group:100", "1", "alice");
        let in_200 = MessageEvent::group("200", "qq:group:200", "1", "alice");

        p.add_memory(&in_100, "group fact").await.unwrap();
        let listing = p.list_memories(&in_100).await.unwrap();
        assert_eq!(listing.scope, ListingScope::Group("100".to_string()));
        assert_eq!(listing.memories.len(), 1);

        assert!(matches!(
            p.list_memories(&in_200).await,
            Err(MemoryError::GroupNotAllowed(g)) if g == "200"
        ));
        assert_eq!(p.list_memories(&alice()).await.unwrap().scope, ListingScope::Personal);
    }

    #[tokio::test]
    async fn test_list_group_targets() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({}));
        assert!(matches!(
            p.list_group(&alice(), None).await,
            Err(MemoryError::GroupTargetRequired)
        ));
        let explicit = p.list_group(&alice(), Some("qq:group:9")).await.unwrap();
        assert_eq!(explicit.session_id, "qq:group:9");

        p.update_config(json!({ "enable_global_memory": true }).as_object().unwrap()).await;
        let global = p.list_group(&alice(), None).await.unwrap();
        assert_eq!(global.scope, ListingScope::Global);
        assert_eq!(global.session_id, GLOBAL_SESSION_ID);
    }

    #[tokio::test]
    async fn test_list_all_requires_admin() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({}));
        p.add_memory(&alice(), "a").await.unwrap();
        assert!(matches!(p.list_all(&alice()).await, Err(MemoryError::PermissionDenied)));

        let admin = alice().with_role(SenderRole::Admin);
        let all = p.list_all(&admin).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "qq:private:1");
    }

    #[tokio::test]
    async fn test_missing_rerank_provider_falls_back() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({ "rerank_provider_id": "absent" }));
        p.add_memory(&alice(), "likes tea").await.unwrap();
        p.add_memory(&alice(), "tea time at 5").await.unwrap();

        let mut request = ProviderRequest::new("tea");
        let selection = p.on_llm_request(&alice().with_message("tea"), &mut request).await;
        assert_eq!(selection.memories.len(), 2);
        assert!(request.system_prompt.is_some());
    }

    #[tokio::test]
    async fn test_reranker_from_registry() {
        let dir = TempDir::new().unwrap();
        let overrides = json!({ "rerank_provider_id": "judge" });
        let config = ConfigManager::from_overrides(overrides.as_object().unwrap());
        let store = Arc::new(MemoryStore::open(dir.path().join("m.json"), config.current()));
        let mut registry = ProviderRegistry::new();
        let judge = Arc::new(MockLlmClient::replying("1"));
        registry.register("judge", judge.clone());
        let p = MemoryPlugin::new(config, store, registry);

        p.add_memory(&alice(), "likes tea").await.unwrap();
        p.add_memory(&alice(), "tea time at 5").await.unwrap();

        let mut request = ProviderRequest::new("tea");
        let selection = p.on_llm_request(&alice().with_message("tea"), &mut request).await;
        assert_eq!(judge.call_count(), 1);
        assert_eq!(selection.memories.len(), 1);
        assert!(request.system_prompt.unwrap().contains("tea time at 5"));
    }

    #[tokio::test]
    async fn test_configured_none_token_reaches_reranker() {
        let dir = TempDir::new().unwrap();
        let overrides = json!({ "rerank_provider_id": "judge", "rerank_none_token": "NONE" });
        let config = ConfigManager::from_overrides(overrides.as_object().unwrap());
        let store = Arc::new(MemoryStore::open(dir.path().join("m.json"), config.current()));
        let mut registry = ProviderRegistry::new();
        let judge = Arc::new(MockLlmClient::replying("NONE (1 was close)"));
        registry.register("judge", judge.clone());
        let p = MemoryPlugin::new(config, store, registry);

        p.add_memory(&alice(), "likes tea").await.unwrap();
        p.add_memory(&alice(), "tea time at 5").await.unwrap();

        let mut request = ProviderRequest::new("tea");
        let selection = p.on_llm_request(&alice().with_message("tea"), &mut request).await;
        assert_eq!(judge.call_count(), 1);
        assert!(judge.prompts()[0].contains("NONE"));
        assert_eq!(selection.tier, SelectionTier::Strong);
        assert_eq!(selection.memories.len(), 2);
    }

    #[tokio::test]
    async fn test_edit_blocked_when_management_disabled() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({}));
        p.add_memory(&alice(), "likes tea").await.unwrap();

        p.update_config(json!({ "enable_memory_management": false }).as_object().unwrap()).await;
        assert!(matches!(
            p.edit_memory(&alice(), 0, "likes coffee").await,
            Err(MemoryError::InvalidIndex { index: 0, len: 0 })
        ));

        p.update_config(json!({ "enable_memory_management": true }).as_object().unwrap()).await;
        let kept = p.list_memories(&alice()).await.unwrap();
        assert_eq!(kept.memories[0].content, "[alice(1) mentioned]: likes tea");
    }

    #[tokio::test]
    async fn test_reset_config_reconfigures_store() {
        let dir = TempDir::new().unwrap();
        let p = plugin(&dir, json!({ "enable_memory_management": false }));
        assert!(p.add_memory(&alice(), "x").await.is_err());

        let config = p.reset_config().await;
        assert!(config.enable_memory_management);
        assert!(p.add_memory(&alice(), "x").await.is_ok());
        assert!(p.config_summary().await.contains("memory management: enabled"));
    }
}
