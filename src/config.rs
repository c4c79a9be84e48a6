//! 插件配置：从 config/default.toml 与环境变量加载，逐项校验为不可变的 MemoryConfig
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AI_MEMORY__*` 覆盖（双下划线表示嵌套，如
//! `AI_MEMORY__MEMORY__MAX_MEMORIES=20`）。`[memory]` 段是宽松类型的表，由 ConfigManager
//! 逐键校验，非法值替换为默认值并记录 warn，绝不整体拒绝。

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::recall::NO_MEMORY_TOKEN;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    /// 未校验的记忆配置，交给 ConfigManager::update
    pub memory: Map<String, Value>,
    /// 可用于语义精选的 LLM 提供方，键为 provider id
    pub providers: HashMap<String, ProviderSection>,
}

/// [storage] 段：记忆数据文件位置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/memory_data.json")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

/// [providers.<id>] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    /// openai / deepseek；deepseek 未配 base_url 时使用官方地址
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    pub base_url: Option<String>,
    pub model: String,
    /// 读取 API Key 的环境变量名
    pub api_key_env: Option<String>,
}

fn default_provider_kind() -> String {
    "openai".to_string()
}

pub const DEFAULT_INJECTION_TITLE: &str = "Core background facts";
pub const DEFAULT_INJECTION_INSTRUCTION: &str =
    "Note: the following are real memories you recorded that relate to the current topic. \
     Use the timestamps to judge how current they are, and compare the identity tags \
     to tell your own settings apart from what others said:";

/// 校验后的记忆配置；每次更新生成新值，以 Arc 共享给各组件
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// 每个会话桶的容量上限（1-100）
    pub max_memories: usize,
    /// 是否允许 Agent 通过 save_memory 工具自动记忆
    pub auto_save_enabled: bool,
    /// save_memory 工具的最低重要性（1-5）
    pub importance_threshold: u8,
    pub enable_memory_management: bool,
    /// 群聊统一写入 "global" 桶
    pub enable_global_memory: bool,
    /// 逗号分隔的群号白名单，空表示不限制
    pub allowed_groups: String,
    pub enable_auto_injection: bool,
    pub injection_title: String,
    pub injection_instruction: String,
    /// 为空时关闭语义精选
    pub rerank_provider_id: String,
    pub recall_top_k: usize,
    pub inject_top_k: usize,
    /// 语义精选调用超时（秒）
    pub rerank_timeout_secs: u64,
    /// LLM 表示「没有相关记忆」的回复标记，区分大小写
    pub rerank_none_token: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: 10,
            auto_save_enabled: true,
            importance_threshold: 3,
            enable_memory_management: true,
            enable_global_memory: false,
            allowed_groups: String::new(),
            enable_auto_injection: true,
            injection_title: DEFAULT_INJECTION_TITLE.to_string(),
            injection_instruction: DEFAULT_INJECTION_INSTRUCTION.to_string(),
            rerank_provider_id: String::new(),
            recall_top_k: 10,
            inject_top_k: 3,
            rerank_timeout_secs: 15,
            rerank_none_token: NO_MEMORY_TOKEN.to_string(),
        }
    }
}

impl MemoryConfig {
    /// 白名单群号列表（去空白、去空项）
    pub fn allowed_group_ids(&self) -> Vec<String> {
        self.allowed_groups
            .split(',')
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect()
    }

    /// 白名单为空时所有群都允许
    pub fn is_group_allowed(&self, group_id: &str) -> bool {
        let allowed = self.allowed_group_ids();
        allowed.is_empty() || allowed.iter().any(|g| g == group_id)
    }

    pub fn rerank_enabled(&self) -> bool {
        !self.rerank_provider_id.trim().is_empty()
    }
}

/// 配置管理：保存默认值与当前值，负责校验更新与重置
#[derive(Debug)]
pub struct ConfigManager {
    defaults: MemoryConfig,
    current: Arc<MemoryConfig>,
}

impl ConfigManager {
    pub fn new(defaults: MemoryConfig) -> Self {
        Self {
            current: Arc::new(defaults.clone()),
            defaults,
        }
    }

    /// 以默认值为底，应用一张未校验的覆盖表
    pub fn from_overrides(overrides: &Map<String, Value>) -> Self {
        let mut manager = Self::new(MemoryConfig::default());
        manager.update(overrides);
        manager
    }

    pub fn current(&self) -> Arc<MemoryConfig> {
        Arc::clone(&self.current)
    }

    /// 逐键校验并合并到当前配置；缺失的键保持原值，非法值替换为默认值
    pub fn update(&mut self, overrides: &Map<String, Value>) -> Arc<MemoryConfig> {
        let d = &self.defaults;
        let mut next = (*self.current).clone();

        if let Some(v) = read_int(overrides, "max_memories", 1..=100, d.max_memories as i64) {
            next.max_memories = v as usize;
        }
        if let Some(v) = read_bool(overrides, "auto_save_enabled", d.auto_save_enabled) {
            next.auto_save_enabled = v;
        }
        let threshold = d.importance_threshold as i64;
        if let Some(v) = read_int(overrides, "importance_threshold", 1..=5, threshold) {
            next.importance_threshold = v as u8;
        }
        let management = d.enable_memory_management;
        if let Some(v) = read_bool(overrides, "enable_memory_management", management) {
            next.enable_memory_management = v;
        }
        if let Some(v) = read_bool(overrides, "enable_global_memory", d.enable_global_memory) {
            next.enable_global_memory = v;
        }
        if let Some(v) = read_text(overrides, "allowed_groups", &d.allowed_groups) {
            next.allowed_groups = v;
        }
        if let Some(v) = read_bool(overrides, "enable_auto_injection", d.enable_auto_injection) {
            next.enable_auto_injection = v;
        }
        if let Some(v) = read_text(overrides, "injection_title", &d.injection_title) {
            next.injection_title = v;
        }
        if let Some(v) = read_text(overrides, "injection_instruction", &d.injection_instruction) {
            next.injection_instruction = v;
        }
        if let Some(v) = read_text(overrides, "rerank_provider_id", &d.rerank_provider_id) {
            next.rerank_provider_id = v;
        }
        if let Some(v) = read_int(overrides, "recall_top_k", 1..=100, d.recall_top_k as i64) {
            next.recall_top_k = v as usize;
        }
        if let Some(v) = read_int(overrides, "inject_top_k", 1..=100, d.inject_top_k as i64) {
            next.inject_top_k = v as usize;
        }
        let timeout = d.rerank_timeout_secs as i64;
        if let Some(v) = read_int(overrides, "rerank_timeout_secs", 1..=300, timeout) {
            next.rerank_timeout_secs = v as u64;
        }
        if let Some(v) = read_text(overrides, "rerank_none_token", &d.rerank_none_token) {
            next.rerank_none_token = if v.trim().is_empty() {
                tracing::warn!("Empty rerank_none_token, using default {}", d.rerank_none_token);
                d.rerank_none_token.clone()
            } else {
                v.trim().to_string()
            };
        }

        for key in overrides.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::debug!("Ignoring unknown memory config key: {}", key);
            }
        }

        self.current = Arc::new(next);
        tracing::info!("Memory config updated");
        self.current()
    }

    pub fn reset_to_default(&mut self) -> Arc<MemoryConfig> {
        self.current = Arc::new(self.defaults.clone());
        tracing::info!("Memory config reset to defaults");
        self.current()
    }

    /// 当前配置摘要（供 /memory_config 之类的指令展示）
    pub fn summary(&self) -> String {
        let c = &self.current;
        let on_off = |b: bool| if b { "enabled" } else { "disabled" };
        let rerank = if c.rerank_enabled() {
            c.rerank_provider_id.as_str()
        } else {
            "off"
        };
        format!(
            "Current memory config:\n\
             • max memories: {}\n\
             • auto save: {}\n\
             • importance threshold: {}/5\n\
             • memory management: {}\n\
             • global memory: {}\n\
             • auto injection: {} (recall top {}, inject top {})\n\
             • rerank provider: {}",
            c.max_memories,
            on_off(c.auto_save_enabled),
            c.importance_threshold,
            on_off(c.enable_memory_management),
            on_off(c.enable_global_memory),
            on_off(c.enable_auto_injection),
            c.recall_top_k,
            c.inject_top_k,
            rerank,
        )
    }
}

const KNOWN_KEYS: &[&str] = &[
    "max_memories",
    "auto_save_enabled",
    "importance_threshold",
    "enable_memory_management",
    "enable_global_memory",
    "allowed_groups",
    "enable_auto_injection",
    "injection_title",
    "injection_instruction",
    "rerank_provider_id",
    "recall_top_k",
    "inject_top_k",
    "rerank_timeout_secs",
    "rerank_none_token",
];

/// 键不存在返回 None；存在但非整数或越界时回退默认值
fn read_int(
    overrides: &Map<String, Value>,
    key: &str,
    range: RangeInclusive<i64>,
    default: i64,
) -> Option<i64> {
    let value = overrides.get(key)?;
    match value.as_i64() {
        Some(n) if range.contains(&n) => Some(n),
        _ => {
            tracing::warn!("Invalid {} value: {}, using default {}", key, value, default);
            Some(default)
        }
    }
}

fn read_bool(overrides: &Map<String, Value>, key: &str, default: bool) -> Option<bool> {
    let value = overrides.get(key)?;
    match value.as_bool() {
        Some(b) => Some(b),
        None => {
            tracing::warn!("Invalid {} value: {}, using default {}", key, value, default);
            Some(default)
        }
    }
}

/// 文本字段也接受数字（环境变量 try_parsing 会把纯数字群号解析成整数）
fn read_text(overrides: &Map<String, Value>, key: &str, default: &str) -> Option<String> {
    let value = overrides.get(key)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => {
            tracing::warn!("Invalid {} value: {}, using default", key, value);
            Some(default.to_string())
        }
    }
}

/// 从 config 目录加载配置，环境变量 AI_MEMORY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AI_MEMORY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AI_MEMORY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
