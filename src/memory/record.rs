//! 单条记忆及其时间戳 / ID 规则

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};

/// 记忆时间戳格式（秒级，本地时间）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// memory_id 中的时间部分
const ID_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 5;

/// 将任意整数钳制到 [1, 5]
pub fn clamp_importance(importance: i64) -> u8 {
    importance.clamp(MIN_IMPORTANCE as i64, MAX_IMPORTANCE as i64) as u8
}

/// 单条记忆。session_id 不落盘（由所在桶的键还原）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub content: String,
    #[serde(default = "default_importance", deserialize_with = "deserialize_importance")]
    pub importance: u8,
    /// 文本时间戳；解析失败只影响新鲜度加成
    #[serde(default)]
    pub timestamp: String,
    #[serde(skip)]
    pub session_id: String,
    #[serde(default)]
    pub memory_id: String,
}

fn default_importance() -> u8 {
    MIN_IMPORTANCE
}

fn deserialize_importance<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(clamp_importance(raw))
}

impl MemoryRecord {
    /// 以给定时刻创建记忆；ID 为 `{session_id}_{YYYYmmddHHMMSS}`，冲突处理由存储层负责
    pub fn new(
        session_id: &str,
        content: impl Into<String>,
        importance: i64,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            content: content.into(),
            importance: clamp_importance(importance),
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            session_id: session_id.to_string(),
            memory_id: base_memory_id(session_id, now),
        }
    }

    pub fn set_importance(&mut self, importance: i64) {
        self.importance = clamp_importance(importance);
    }

    /// 解析时间戳；格式不符返回 None
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

pub fn base_memory_id(session_id: &str, now: NaiveDateTime) -> String {
    format!("{}_{}", session_id, now.format(ID_TIME_FORMAT))
}

/// 当前本地时间，截断到秒
pub fn now_local() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
