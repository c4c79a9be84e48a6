//! LLM 语义精选
//!
//! 把初筛候选以 `ID:<i> | <内容>` 列出，请 LLM 返回最相关的 1..K 个 ID 或 `None`。
//! 回复中任意位置出现 `None` 即视为无相关记忆；越界 ID 静默丢弃。调用失败、超时、空回复都只记录日志，
//! 返回空结果，由上层走兜底策略。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::core::ProviderError;
use crate::llm::LlmClient;
use crate::memory::MemoryRecord;

/// 表示「没有相关记忆」的回复标记（区分大小写）
pub const NO_MEMORY_TOKEN: &str = "None";

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("static id pattern"))
}

/// 语义精选器：持有提供方客户端、超时与注入上限
pub struct Reranker {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
    inject_top_k: usize,
    none_token: String,
}

impl Reranker {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration, inject_top_k: usize) -> Self {
        Self {
            client,
            timeout,
            inject_top_k: inject_top_k.max(1),
            none_token: NO_MEMORY_TOKEN.to_string(),
        }
    }

    /// 自定义「无相关」标记（rerank_none_token 配置项）
    pub fn with_none_token(mut self, token: impl Into<String>) -> Self {
        self.none_token = token.into();
        self
    }

    pub fn build_prompt(&self, query: &str, candidates: &[MemoryRecord]) -> String {
        let memory_list = candidates
            .iter()
            .enumerate()
            .map(|(i, m)| format!("ID:{} | {}", i, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a memory management assistant. From the memory bank below, \
             pick the 1-{k} memories most relevant to the current user input.\n\
             Current user input: \"{query}\"\n\n\
             Candidate memories:\n{memory_list}\n\n\
             Reply with ONLY the most relevant memory IDs, comma-separated, e.g. 0,2. \
             If none are relevant, reply with {none}.",
            k = self.inject_top_k,
            query = query,
            memory_list = memory_list,
            none = self.none_token,
        )
    }

    /// 返回按 LLM 给出顺序排列的候选下标；任何失败都返回空
    pub async fn rerank(&self, query: &str, candidates: &[MemoryRecord]) -> Vec<usize> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let prompt = self.build_prompt(query, candidates);

        let reply = tokio::time::timeout(self.timeout, self.client.complete(&prompt)).await;
        let response = match reply {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::error!("Memory rerank failed: {}", e);
                return Vec::new();
            }
            Err(_) => {
                let e = ProviderError::Timeout(self.timeout.as_secs());
                tracing::error!("Memory rerank failed: {}", e);
                return Vec::new();
            }
        };

        let mut selected = parse_selection(&response, candidates.len(), &self.none_token);
        selected.truncate(self.inject_top_k);
        tracing::debug!("Rerank response {:?} -> candidates {:?}", response.trim(), selected);
        let (prompt_tokens, completion_tokens, total_tokens) = self.client.token_usage();
        tracing::debug!(
            "Rerank provider usage so far: prompt={} completion={} total={}",
            prompt_tokens,
            completion_tokens,
            total_tokens
        );
        selected
    }
}

/// 从回复中提取候选下标：出现 none_token 时为空；越界或重复的 ID 丢弃，保持出现顺序
pub fn parse_selection(response: &str, candidate_count: usize, none_token: &str) -> Vec<usize> {
    if response.trim().is_empty() || response.contains(none_token) {
        return Vec::new();
    }
    let mut ids: Vec<usize> = Vec::new();
    for m in id_pattern().find_iter(response) {
        let Ok(id) = m.as_str().parse::<usize>() else {
            continue;
        };
        if id < candidate_count && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockReply};
    use chrono::NaiveDate;

    fn candidates(n: usize) -> Vec<MemoryRecord> {
        let now = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        (0..n).map(|i| MemoryRecord::new("s", format!("memory {}", i), 3, now)).collect()
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_selection("0, 2", 3, NO_MEMORY_TOKEN), vec![0, 2]);
        assert_eq!(parse_selection("IDs: 2 and 1", 3, NO_MEMORY_TOKEN), vec![2, 1]);
    }

    #[test]
    fn test_none_token_wins_over_digits() {
        assert!(parse_selection("None (maybe 1?)", 3, NO_MEMORY_TOKEN).is_empty());
        assert!(parse_selection("0,1 ... actually None", 3, NO_MEMORY_TOKEN).is_empty());
        // 区分大小写
        assert_eq!(parse_selection("none, 1", 3, NO_MEMORY_TOKEN), vec![1]);
    }

    #[test]
    fn test_out_of_range_and_duplicates_discarded() {
        assert!(parse_selection("5", 3, NO_MEMORY_TOKEN).is_empty());
        assert_eq!(parse_selection("2,7,0,2", 3, NO_MEMORY_TOKEN), vec![2, 0]);
        assert!(parse_selection("99999999999999999999999", 3, NO_MEMORY_TOKEN).is_empty());
        assert!(parse_selection("", 3, NO_MEMORY_TOKEN).is_empty());
    }

    #[test]
    fn test_prompt_lists_candidates() {
        let reranker = Reranker::new(Arc::new(MockLlmClient::new()), Duration::from_secs(1), 3);
        let prompt = reranker.build_prompt("tea?", &candidates(2));
        assert!(prompt.contains("ID:0 | memory 0"));
        assert!(prompt.contains("ID:1 | memory 1"));
        assert!(prompt.contains("1-3"));
        assert!(prompt.contains("\"tea?\""));
    }

    #[tokio::test]
    async fn test_rerank_truncates_to_inject_limit() {
        let client = Arc::new(MockLlmClient::replying("3, 1, 0"));
        let reranker = Reranker::new(client.clone(), Duration::from_secs(1), 2);
        assert_eq!(reranker.rerank("q", &candidates(4)).await, vec![3, 1]);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rerank_failure_yields_nothing() {
        let client = Arc::new(MockLlmClient::failing("503"));
        let reranker = Reranker::new(client, Duration::from_secs(1), 3);
        assert!(reranker.rerank("q", &candidates(3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_rerank_timeout_yields_nothing() {
        let client = Arc::new(MockLlmClient::with_script(vec![MockReply::Delayed(
            Duration::from_secs(5),
            "0".into(),
        )]));
        let reranker = Reranker::new(client, Duration::from_millis(20), 3);
        assert!(reranker.rerank("q", &candidates(3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_none_token() {
        let client = Arc::new(MockLlmClient::replying("无 1"));
        let reranker = Reranker::new(client, Duration::from_secs(1), 3).with_none_token("无");
        assert!(reranker.rerank("q", &candidates(3)).await.is_empty());
    }
}
