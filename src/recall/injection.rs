//! 记忆注入：把选中的记忆渲染为带标题与指令的文本块，拼到请求的 system prompt

use crate::event::ProviderRequest;
use crate::memory::MemoryRecord;

const TITLE_RULE: usize = 15;
const FOOTER_RULE: usize = 46;

/// 单条记忆渲染为一行
pub fn format_line(memory: &MemoryRecord) -> String {
    format!("- [time:{}] {}", memory.timestamp, memory.content)
}

/// 渲染注入块；没有记忆时返回 None
pub fn render_block(memories: &[MemoryRecord], title: &str, instruction: &str) -> Option<String> {
    if memories.is_empty() {
        return None;
    }
    let lines = memories.iter().map(format_line).collect::<Vec<_>>().join("\n");
    let rule = "=".repeat(TITLE_RULE);
    Some(format!(
        "\n\n{rule} {title} {rule}\n{instruction}\n{lines}\n{footer}\n\n",
        rule = rule,
        title = title,
        instruction = instruction,
        lines = lines,
        footer = "=".repeat(FOOTER_RULE),
    ))
}

/// 追加到已有 system prompt（非空时），否则直接作为 system prompt；返回是否注入
pub fn inject(
    request: &mut ProviderRequest,
    memories: &[MemoryRecord],
    title: &str,
    instruction: &str,
) -> bool {
    let Some(block) = render_block(memories, title, instruction) else {
        return false;
    };
    match request.system_prompt.as_mut() {
        Some(existing) if !existing.is_empty() => existing.push_str(&block),
        _ => request.system_prompt = Some(block),
    }
    true
}
