//! 记忆选择策略（三级兜底）
//!
//! 1. 初筛：全部记忆按词法分数降序，取前 recall_top_k
//! 2. 精选：配置了精选提供方且候选多于 1 条时调用 Reranker，非空结果即为最终选择
//! 3. 兜底：取分数 ≥ 15 的前 inject_top_k 条；都不满足时取分数 > 0 的最高一条；否则不注入

use chrono::NaiveDateTime;

use super::reranker::Reranker;
use super::scorer::{rank, ScoredMemory};
use crate::config::MemoryConfig;
use crate::memory::MemoryRecord;

/// 兜底阶段「强相关」的最低分
pub const STRONG_MATCH_SCORE: u32 = 15;

/// 最终选择由哪一级产生
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    /// 未注入：自动注入关闭、查询为空或会话无记忆
    Skipped,
    Reranked,
    /// 兜底：分数达到强相关阈值
    Strong,
    /// 兜底：只取一条正分记忆
    Weak,
    /// 没有任何候选满足条件
    Empty,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub memories: Vec<MemoryRecord>,
    pub tier: SelectionTier,
}

impl Selection {
    fn skipped() -> Self {
        Self {
            memories: Vec::new(),
            tier: SelectionTier::Skipped,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}

pub struct SelectionPolicy<'a> {
    config: &'a MemoryConfig,
    reranker: Option<Reranker>,
}

impl<'a> SelectionPolicy<'a> {
    pub fn new(config: &'a MemoryConfig) -> Self {
        Self {
            config,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Option<Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub async fn select(
        &self,
        query: &str,
        memories: &[MemoryRecord],
        now: NaiveDateTime,
    ) -> Selection {
        if !self.config.enable_auto_injection || query.is_empty() || memories.is_empty() {
            return Selection::skipped();
        }

        let mut scored = rank(query, memories, now);
        scored.truncate(self.config.recall_top_k.max(1));

        if self.reranker.is_some() && !scored.is_empty() {
            let summary = scored
                .iter()
                .map(|s| format!("[{}...]", s.memory.content.chars().take(15).collect::<String>()))
                .collect::<Vec<_>>()
                .join(" / ");
            tracing::debug!("Memory recall pre-filter (top {}): {}", scored.len(), summary);
        }

        if let Some(reranker) = &self.reranker {
            if scored.len() > 1 {
                let candidates: Vec<MemoryRecord> =
                    scored.iter().map(|s| s.memory.clone()).collect();
                let picked = reranker.rerank(query, &candidates).await;
                if !picked.is_empty() {
                    return Selection {
                        memories: picked.into_iter().map(|i| candidates[i].clone()).collect(),
                        tier: SelectionTier::Reranked,
                    };
                }
            }
        }

        fallback_selection(&scored, self.config.inject_top_k)
    }
}

/// 第三级兜底；`scored` 需已按分数降序
pub fn fallback_selection(scored: &[ScoredMemory], inject_top_k: usize) -> Selection {
    let strong: Vec<MemoryRecord> = scored
        .iter()
        .filter(|s| s.score >= STRONG_MATCH_SCORE)
        .take(inject_top_k)
        .map(|s| s.memory.clone())
        .collect();
    if !strong.is_empty() {
        return Selection {
            memories: strong,
            tier: SelectionTier::Strong,
        };
    }

    match scored.iter().find(|s| s.score > 0) {
        Some(top) => Selection {
            memories: vec![top.memory.clone()],
            tier: SelectionTier::Weak,
        },
        None => Selection {
            memories: Vec::new(),
            tier: SelectionTier::Empty,
        },
    }
}
