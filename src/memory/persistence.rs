//! 记忆数据文件持久化
//!
//! 单文件 JSON：session_id -> 记忆数组。每次保存整体重写：先写临时文件再原子重命名，
//! 写入失败时磁盘上的旧文件保持不变。读不出或解析失败的文件会被隔离为 `*.corrupt-<时间>`；
//! 隔离失败时该文件进入只读状态，之后的保存一律拒绝，原文件不会被覆盖。

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;

use crate::core::MemoryError;
use crate::memory::record::now_local;
use crate::memory::MemoryRecord;

/// 全部会话桶；BTreeMap 保证落盘顺序稳定
pub type Buckets = BTreeMap<String, Vec<MemoryRecord>>;

#[derive(Debug)]
pub struct MemoryFile {
    path: PathBuf,
    /// 损坏文件未能隔离
    poisoned: AtomicBool,
}

impl MemoryFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// 加载全部记忆；文件不存在时创建 `{}`，无法读取或解析时隔离后返回空表。不会返回错误
    pub fn load(&self) -> Buckets {
        self.load_at(now_local())
    }

    /// `now` 决定隔离文件名中的时间戳
    pub fn load_at(&self, now: NaiveDateTime) -> Buckets {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.init_empty_file();
                return Buckets::new();
            }
            Err(e) => {
                tracing::error!("Failed to read memory file {}: {}", self.path.display(), e);
                self.set_aside(now);
                return Buckets::new();
            }
        };

        // 按字节解析：非法 UTF-8 同样视为解析失败
        match serde_json::from_slice::<Buckets>(&bytes) {
            Ok(mut buckets) => {
                for (session_id, records) in buckets.iter_mut() {
                    for record in records.iter_mut() {
                        record.session_id = session_id.clone();
                    }
                }
                tracing::info!(
                    "Loaded {} memory sessions from {}",
                    buckets.len(),
                    self.path.display()
                );
                buckets
            }
            Err(e) => {
                tracing::error!("Failed to parse memory file {}: {}", self.path.display(), e);
                self.set_aside(now);
                Buckets::new()
            }
        }
    }

    fn set_aside(&self, now: NaiveDateTime) {
        if self.quarantine(now).is_some() {
            self.init_empty_file();
        } else {
            self.poisoned.store(true, Ordering::SeqCst);
            tracing::error!(
                "Memory file {} kept in place; saves are disabled until it is repaired",
                self.path.display()
            );
        }
    }

    /// 整体写入：临时文件 + rename；父目录不存在时自动创建
    pub async fn save(&self, buckets: &Buckets) -> Result<(), MemoryError> {
        if self.is_poisoned() {
            return Err(MemoryError::Persistence(format!(
                "{} could not be quarantined, refusing to overwrite it",
                self.path.display()
            )));
        }
        let json = serde_json::to_string_pretty(buckets)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::write(&tmp, json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory_data.json".to_string());
        self.path.with_file_name(format!("{}.tmp", name))
    }

    fn init_empty_file(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, "{}") {
            tracing::error!("Failed to create memory file {}: {}", self.path.display(), e);
        }
    }

    /// 把损坏的文件改名保留，返回新路径
    fn quarantine(&self, now: NaiveDateTime) -> Option<PathBuf> {
        let name = self.path.file_name()?.to_string_lossy().into_owned();
        let stamp = now.format("%Y%m%d%H%M%S");
        let target = self.path.with_file_name(format!("{}.corrupt-{}", name, stamp));
        match std::fs::rename(&self.path, &target) {
            Ok(()) => {
                tracing::warn!(
                    "Corrupt memory file moved to {}; starting with an empty store",
                    target.display()
                );
                Some(target)
            }
            Err(e) => {
                tracing::error!("Failed to quarantine corrupt memory file: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(session: &str, content: &str, importance: i64) -> MemoryRecord {
        let now = chrono::NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        MemoryRecord::new(session, content, importance, now)
    }

    #[test]
    fn test_missing_file_creates_empty_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory_data.json");
        let file = MemoryFile::new(&path);

        assert!(file.load().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = MemoryFile::new(dir.path().join("memory_data.json"));

        let mut buckets = Buckets::new();
        buckets.insert(
            "a".to_string(),
            vec![record("a", "喜欢喝茶", 4), record("a", "lives in Berlin", 2)],
        );
        buckets.insert("global".to_string(), vec![record("global", "group rule", 5)]);

        file.save(&buckets).await.unwrap();
        let loaded = file.load();
        assert_eq!(loaded, buckets);
        assert_eq!(loaded["a"][0].session_id, "a");
        assert!(!file.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory_data.json");
        std::fs::write(&path, "{ not json").unwrap();

        let file = MemoryFile::new(&path);
        assert!(file.load().is_empty());

        let quarantined: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(
            std::fs::read_to_string(quarantined[0].path()).unwrap(),
            "{ not json"
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    fn corrupt_copies(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .map(|e| e.path())
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_quarantined_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory_data.json");
        let original = b"{\"s\":[{\"content\":\"caf\xe9\",\"importance\":3}]}".to_vec();
        std::fs::write(&path, &original).unwrap();

        let file = MemoryFile::new(&path);
        assert!(file.load().is_empty());
        assert!(!file.is_poisoned());

        let mut buckets = Buckets::new();
        buckets.insert("other".to_string(), vec![record("other", "new fact", 3)]);
        file.save(&buckets).await.unwrap();

        let copies = corrupt_copies(dir.path());
        assert_eq!(copies.len(), 1);
        assert_eq!(std::fs::read(&copies[0]).unwrap(), original);
        assert!(std::fs::read_to_string(&path).unwrap().contains("new fact"));
    }

    #[tokio::test]
    async fn test_failed_quarantine_blocks_saves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory_data.json");
        std::fs::write(&path, "{ broken").unwrap();

        // 隔离目标被非空目录占用，rename 必然失败
        let now = chrono::NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 7)
            .unwrap();
        let blocker = dir.path().join("memory_data.json.corrupt-20260304050607");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), "x").unwrap();

        let file = MemoryFile::new(&path);
        assert!(file.load_at(now).is_empty());
        assert!(file.is_poisoned());

        let mut buckets = Buckets::new();
        buckets.insert("a".to_string(), vec![record("a", "x", 1)]);
        assert!(matches!(
            file.save(&buckets).await,
            Err(MemoryError::Persistence(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ broken");
    }

    #[tokio::test]
    async fn test_save_failure_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory_data.json");
        std::fs::write(&path, "{}").unwrap();
        // 临时文件路径被目录占用，写入必然失败
        std::fs::create_dir(dir.path().join("memory_data.json.tmp")).unwrap();

        let file = MemoryFile::new(&path);
        let mut buckets = Buckets::new();
        buckets.insert("a".to_string(), vec![record("a", "x", 1)]);

        assert!(file.save(&buckets).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
