//! 相关度召回：词法评分、LLM 语义精选、三级兜底选择、注入格式化

pub mod injection;
pub mod policy;
pub mod reranker;
pub mod scorer;

pub use injection::{inject, render_block};
pub use policy::{fallback_selection, Selection, SelectionPolicy, SelectionTier};
pub use reranker::{parse_selection, Reranker, NO_MEMORY_TOKEN};
pub use scorer::{clean_query, rank, score, ScoredMemory};
