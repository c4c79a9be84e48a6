//! ai-memory 控制台演示
//!
//! 每行输入视为一条私聊消息：`/remember <内容>` 写入记忆，`/list` 查看记忆，
//! 其他内容走召回流程并打印注入后的 system prompt。Ctrl+C 或输入结束时落盘退出。

use std::path::PathBuf;
use std::sync::Arc;

use ai_memory::config::load_config;
use ai_memory::core::{ShutdownCoordinator, ShutdownManager, ShutdownReason, StoreFlushCleanup};
use ai_memory::event::{MessageEvent, ProviderRequest};
use ai_memory::{observability, MemoryPlugin};
use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_ORIGIN: &str = "console:private:local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let app = load_config(config_path).context("Failed to load config")?;

    let plugin = MemoryPlugin::open(&app);
    let shutdown = Arc::new(ShutdownManager::new());
    let mut reasons = shutdown.subscribe();
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(StoreFlushCleanup::new(plugin.store()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => handle_line(&plugin, line.trim()).await,
            Ok(None) => {
                shutdown.shutdown(ShutdownReason::UserInitiated);
                break;
            }
            Err(e) => {
                shutdown.shutdown(ShutdownReason::FatalError(format!("stdin: {}", e)));
                break;
            }
        }
    }

    let reason = reasons.try_recv().unwrap_or(ShutdownReason::UserInitiated);
    coordinator.run_cleanup(&reason).await;
    Ok(())
}

async fn handle_line(plugin: &MemoryPlugin, line: &str) {
    if line.is_empty() {
        return;
    }
    let event = MessageEvent::private(CONSOLE_ORIGIN, "local", "you").with_message(line);

    if let Some(content) = line.strip_prefix("/remember") {
        match plugin.add_memory(&event, content).await {
            Ok(stored) => println!("Remembered: {}", stored),
            Err(e) => println!("Not saved: {}", e),
        }
        return;
    }

    if line == "/list" {
        match plugin.list_memories(&event).await {
            Ok(listing) if listing.memories.is_empty() => println!("No memories yet."),
            Ok(listing) => {
                for (i, m) in listing.memories.iter().enumerate() {
                    println!("{}. [{}] {} ({})", i + 1, m.importance, m.content, m.timestamp);
                }
            }
            Err(e) => println!("{}", e),
        }
        return;
    }

    let mut request = ProviderRequest::new(line);
    let selection = plugin.on_llm_request(&event, &mut request).await;
    match request.system_prompt {
        Some(prompt) => println!("[{:?}] system prompt:{}", selection.tier, prompt),
        None => println!("[{:?}] no memories injected", selection.tier),
    }
}
