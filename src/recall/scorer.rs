//! 词法相关度评分
//!
//! 分数 = 匹配分 + 重要性 + 新鲜度加成，只用于相对排序：
//! - 清洗后的查询（小写、仅保留字母数字）长度 ≥ 2：与内容互为子串得 40 分，否则每个命中的不同二元组 15 分
//! - 长度为 1 且出现在内容中：25 分
//! - 24 小时内写入：+10

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::memory::MemoryRecord;

pub const SUBSTRING_SCORE: u32 = 40;
pub const BIGRAM_SCORE: u32 = 15;
pub const SINGLE_CHAR_SCORE: u32 = 25;
pub const FRESHNESS_BONUS: u32 = 10;
const FRESHNESS_WINDOW_SECS: i64 = 24 * 60 * 60;

/// 带分数的候选记忆
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub score: u32,
    pub memory: MemoryRecord,
}

/// 小写并去掉所有非字母数字字符
pub fn clean_query(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// 只计算匹配分（不含重要性与新鲜度）
pub fn match_score(clean_query: &str, content: &str) -> u32 {
    let content = content.to_lowercase();
    let chars: Vec<char> = clean_query.chars().collect();

    match chars.len() {
        0 => 0,
        1 => {
            if content.contains(chars[0]) {
                SINGLE_CHAR_SCORE
            } else {
                0
            }
        }
        _ => {
            if content.contains(clean_query) || clean_query.contains(content.as_str()) {
                return SUBSTRING_SCORE;
            }
            let matched: HashSet<String> = chars
                .windows(2)
                .map(|w| w.iter().collect::<String>())
                .filter(|bigram| content.contains(bigram.as_str()))
                .collect();
            matched.len() as u32 * BIGRAM_SCORE
        }
    }
}

pub fn freshness_bonus(memory: &MemoryRecord, now: NaiveDateTime) -> u32 {
    match memory.parsed_timestamp() {
        Some(t) if (now - t).num_seconds() < FRESHNESS_WINDOW_SECS => FRESHNESS_BONUS,
        _ => 0,
    }
}

/// 单条记忆对查询的总分
pub fn score(query: &str, memory: &MemoryRecord, now: NaiveDateTime) -> u32 {
    let clean = clean_query(query);
    match_score(&clean, &memory.content) + memory.importance as u32 + freshness_bonus(memory, now)
}

/// 为全部记忆打分并按分数降序排列（同分保持原顺序）
pub fn rank(query: &str, memories: &[MemoryRecord], now: NaiveDateTime) -> Vec<ScoredMemory> {
    let clean = clean_query(query);
    let mut scored: Vec<ScoredMemory> = memories
        .iter()
        .map(|m| ScoredMemory {
            score: match_score(&clean, &m.content) + m.importance as u32 + freshness_bonus(m, now),
            memory: m.clone(),
        })
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}
