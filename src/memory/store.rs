//! 有界会话记忆存储
//!
//! 按 session_id 分桶，桶内保持插入顺序；容量满时淘汰重要性最低、且在同级中最早插入的一条。
//! 所有桶与当前配置放在同一把读写锁后面；save 另持一把保存锁，保证快照与写盘按顺序完成。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::{Mutex, RwLock};

use super::persistence::{Buckets, MemoryFile};
use super::record::{base_memory_id, now_local, MemoryRecord, MAX_IMPORTANCE, MIN_IMPORTANCE};
use crate::config::MemoryConfig;
use crate::core::MemoryError;

/// 单个会话的统计信息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryStats {
    pub total: usize,
    /// 保留两位小数
    pub avg_importance: f64,
    /// 重要性 1..=5 -> 条数；桶不存在时为空
    pub importance_distribution: BTreeMap<u8, usize>,
}

struct StoreState {
    buckets: Buckets,
    config: Arc<MemoryConfig>,
}

/// 记忆存储：启动时 open，退出前 shutdown 落盘
pub struct MemoryStore {
    state: RwLock<StoreState>,
    file: MemoryFile,
    save_lock: Mutex<()>,
}

impl MemoryStore {
    /// 从数据文件加载（缺失或损坏时从空表开始）
    pub fn open(path: impl AsRef<Path>, config: Arc<MemoryConfig>) -> Self {
        let file = MemoryFile::new(path);
        let buckets = file.load();
        Self {
            state: RwLock::new(StoreState { buckets, config }),
            file,
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 配置热更新后替换为新配置
    pub async fn reconfigure(&self, config: Arc<MemoryConfig>) {
        self.state.write().await.config = config;
    }

    pub async fn add(&self, session_id: &str, content: &str, importance: i64) -> bool {
        self.add_at(session_id, content, importance, now_local()).await
    }

    /// 以指定时刻写入（测试与回放用）
    pub async fn add_at(
        &self,
        session_id: &str,
        content: &str,
        importance: i64,
        now: NaiveDateTime,
    ) -> bool {
        let mut state = self.state.write().await;
        if !state.config.enable_memory_management {
            return false;
        }
        let max = state.config.max_memories.max(1);
        let bucket = state.buckets.entry(session_id.to_string()).or_default();

        while bucket.len() >= max {
            if let Some(evicted) = evict_least_important(bucket) {
                tracing::debug!(
                    "Bucket {} full, evicted memory {} (importance {})",
                    session_id,
                    evicted.memory_id,
                    evicted.importance
                );
            }
        }

        let mut record = MemoryRecord::new(session_id, content, importance, now);
        record.memory_id = unique_memory_id(bucket, base_memory_id(session_id, now));
        bucket.push(record);
        true
    }

    /// 插入顺序；记忆管理关闭或桶不存在时为空
    pub async fn get_memories(&self, session_id: &str) -> Vec<MemoryRecord> {
        let state = self.state.read().await;
        if !state.config.enable_memory_management {
            return Vec::new();
        }
        state.buckets.get(session_id).cloned().unwrap_or_default()
    }

    /// 按重要性降序，同级保持插入顺序
    pub async fn get_memories_sorted(&self, session_id: &str) -> Vec<MemoryRecord> {
        let mut memories = self.get_memories(session_id).await;
        memories.sort_by(|a, b| b.importance.cmp(&a.importance));
        memories
    }

    /// 按 0 起始位置删除；越界或桶不存在返回 None
    pub async fn remove(&self, session_id: &str, index: usize) -> Option<MemoryRecord> {
        let mut state = self.state.write().await;
        let bucket = state.buckets.get_mut(session_id)?;
        if index >= bucket.len() {
            return None;
        }
        Some(bucket.remove(index))
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        self.state.write().await.buckets.remove(session_id).is_some()
    }

    pub async fn update_importance(&self, session_id: &str, index: usize, importance: i64) -> bool {
        let mut state = self.state.write().await;
        match state.buckets.get_mut(session_id).and_then(|b| b.get_mut(index)) {
            Some(record) => {
                record.set_importance(importance);
                true
            }
            None => false,
        }
    }

    pub async fn edit_content(&self, session_id: &str, index: usize, content: &str) -> bool {
        self.edit_content_with(session_id, index, |_| content.to_string())
            .await
            .is_some()
    }

    /// 在锁内根据旧内容计算新内容，返回写入后的内容；记忆管理关闭时与 get_memories 一致视为空桶
    pub async fn edit_content_with<F>(&self, session_id: &str, index: usize, f: F) -> Option<String>
    where
        F: FnOnce(&MemoryRecord) -> String,
    {
        let mut state = self.state.write().await;
        if !state.config.enable_memory_management {
            return None;
        }
        let record = state.buckets.get_mut(session_id)?.get_mut(index)?;
        record.content = f(record);
        Some(record.content.clone())
    }

    /// 桶内可见的记忆条数（记忆管理关闭时为 0）
    pub async fn len(&self, session_id: &str) -> usize {
        let state = self.state.read().await;
        if !state.config.enable_memory_management {
            return 0;
        }
        state.buckets.get(session_id).map_or(0, Vec::len)
    }

    /// 不区分大小写的子串匹配；空关键词返回整个桶
    pub async fn search(&self, session_id: &str, keyword: &str) -> Vec<MemoryRecord> {
        let memories = self.get_memories(session_id).await;
        if keyword.is_empty() {
            return memories;
        }
        let keyword = keyword.to_lowercase();
        memories
            .into_iter()
            .filter(|m| m.content.to_lowercase().contains(&keyword))
            .collect()
    }

    pub async fn stats(&self, session_id: &str) -> MemoryStats {
        let memories = self.get_memories(session_id).await;
        if memories.is_empty() {
            return MemoryStats::default();
        }
        let total = memories.len();
        let sum: u32 = memories.iter().map(|m| m.importance as u32).sum();
        let avg = sum as f64 / total as f64;

        let mut distribution = BTreeMap::new();
        for level in MIN_IMPORTANCE..=MAX_IMPORTANCE {
            distribution.insert(level, memories.iter().filter(|m| m.importance == level).count());
        }

        MemoryStats {
            total,
            // 两位小数，逢五取偶
            avg_importance: (avg * 100.0).round_ties_even() / 100.0,
            importance_distribution: distribution,
        }
    }

    /// 全部桶的拷贝（管理员总览）
    pub async fn snapshot(&self) -> Buckets {
        self.state.read().await.buckets.clone()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.state.read().await.buckets.keys().cloned().collect()
    }

    /// 整体写盘；失败时记录日志并返回错误，内存中的数据仍然有效
    pub async fn save(&self) -> Result<(), MemoryError> {
        let _guard = self.save_lock.lock().await;
        let buckets = self.state.read().await.buckets.clone();
        match self.file.save(&buckets).await {
            Ok(()) => {
                tracing::debug!(
                    "Saved {} memory sessions to {}",
                    buckets.len(),
                    self.path().display()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to save memories to {}: {}", self.path().display(), e);
                Err(e)
            }
        }
    }

    /// 退出前的最后一次落盘
    pub async fn shutdown(&self) -> Result<(), MemoryError> {
        let result = self.save().await;
        if result.is_ok() {
            tracing::info!("Memory store flushed to {}", self.path().display());
        }
        result
    }
}

/// 淘汰重要性最低的记忆；同级取最早插入的一条（等价于稳定升序排序后取首个）
fn evict_least_important(bucket: &mut Vec<MemoryRecord>) -> Option<MemoryRecord> {
    let (index, _) = bucket
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| a.importance.cmp(&b.importance).then(ia.cmp(ib)))?;
    Some(bucket.remove(index))
}

/// 同一秒内重复写入时追加 `_1`、`_2` … 后缀
fn unique_memory_id(bucket: &[MemoryRecord], base: String) -> String {
    if !bucket.iter().any(|m| m.memory_id == base) {
        return base;
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !bucket.iter().any(|m| m.memory_id == candidate) {
            return candidate;
        }
        n += 1;
    }
}
