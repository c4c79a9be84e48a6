//! ai-memory - 聊天机器人长期记忆插件
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + 环境变量）与热更新
//! - **core**: 错误类型、优雅关闭
//! - **event**: 宿主事件与出站请求的最小抽象
//! - **llm**: 精选用的 LLM 客户端（OpenAI 兼容 / Mock）与提供方注册表
//! - **memory**: 记忆记录、按会话分桶的存储、JSON 持久化
//! - **recall**: 词法评分、LLM 精选、兜底选择、注入
//! - **session**: 会话标识解析（个人 / 群 / 全局）
//! - **plugin**: 宿主调用的入口

pub mod config;
pub mod core;
pub mod event;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plugin;
pub mod recall;
pub mod session;

pub use crate::core::{MemoryError, ProviderError};
pub use plugin::{ListingScope, MemoryListing, MemoryPlugin, SaveOutcome};
