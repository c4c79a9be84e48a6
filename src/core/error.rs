//! 记忆插件错误类型
//!
//! MemoryError 面向宿主入口（序号越界、群组未授权等），ProviderError 面向精选用的 LLM 调用。

use thiserror::Error;

/// 记忆读写过程中可能出现的错误
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory management is disabled")]
    ManagementDisabled,

    #[error("Memory content must not be empty")]
    EmptyContent,

    /// 位置参数越界（remove / update / edit）
    #[error("Invalid memory index {index} (bucket holds {len})")]
    InvalidIndex { index: usize, len: usize },

    #[error("Importance must be between 1 and 5, got {0}")]
    InvalidImportance(i64),

    #[error("Group {0} is not allowed to use memories")]
    GroupNotAllowed(String),

    #[error("Permission denied: admin only")]
    PermissionDenied,

    /// 查询群记忆时既未指定群号、也不在群聊中且全局模式未开启
    #[error("No group target: specify a group id or enable global memory")]
    GroupTargetRequired,

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// LLM 提供方调用失败；对精选流程而言都视为「无意见」
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not found: {0}")]
    NotFound(String),

    #[error("Provider timed out after {0}s")]
    Timeout(u64),

    #[error("Provider request failed: {0}")]
    Request(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Persistence(e.to_string())
    }
}
