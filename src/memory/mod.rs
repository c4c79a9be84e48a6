//! 记忆层：记忆条目、有界会话存储、数据文件持久化

pub mod persistence;
pub mod record;
pub mod store;

pub use persistence::{Buckets, MemoryFile};
pub use record::{clamp_importance, MemoryRecord, TIMESTAMP_FORMAT};
pub use store::{MemoryStats, MemoryStore};
