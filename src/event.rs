//! 宿主框架传入的事件与出站 LLM 请求
//!
//! 只保留记忆插件用到的字段：群号、会话标识、发送者身份与消息文本。

use serde::{Deserialize, Serialize};

/// 发送者在宿主中的角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Admin,
    #[default]
    Member,
}

/// 一条入站消息事件
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageEvent {
    /// 群号；私聊为 None
    pub group_id: Option<String>,
    /// 宿主提供的稳定会话标识（平台:类型:ID），可能缺失
    pub unified_msg_origin: Option<String>,
    /// 原始会话句柄
    pub session_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub role: SenderRole,
    pub message: String,
}

impl MessageEvent {
    /// 私聊消息
    pub fn private(
        origin: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        let origin = origin.into();
        Self {
            group_id: None,
            session_id: origin.clone(),
            unified_msg_origin: Some(origin),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            ..Self::default()
        }
    }

    /// 群聊消息
    pub fn group(
        group_id: impl Into<String>,
        origin: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Self::private(origin, sender_id, sender_name)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_role(mut self, role: SenderRole) -> Self {
        self.role = role;
        self
    }

    /// 群号为空串也视为私聊
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref().filter(|g| !g.is_empty())
    }

    pub fn is_group(&self) -> bool {
        self.group_id().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role == SenderRole::Admin
    }
}

/// 即将发往 LLM 的请求；记忆注入只修改 system_prompt
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
}

impl ProviderRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
        }
    }
}
