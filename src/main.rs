//! Gatehouse - 命令行入口
//!
//! 从标准输入读取用户消息并驱动一个线程；模型请求调用工具时暂停，
//! 由终端中的审阅者选择 continue / update / feedback 后继续。
//!
//! 用法：`gatehouse [thread-id] [config.toml]`，线程 id 缺省时随机生成。
//! 使用 file / sqlite 检查点后端时，重启后传入同一线程 id 即可接着审阅。

use std::path::PathBuf;

use anyhow::Context;
use futures_util::StreamExt;
use gatehouse::config::{load_config, AppConfig};
use gatehouse::core::{create_llm_from_config, create_store, OrchestratorBuilder};
use gatehouse::memory::Message;
use gatehouse::{AgentError, Orchestrator, ReviewDisposition, ReviewRequest, TurnEvent, TurnStream};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gatehouse::observability::init();

    let mut args = std::env::args().skip(1);
    let thread_id = args
        .next()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let config_path = args.next().map(PathBuf::from);

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let llm = create_llm_from_config(&cfg);
    let store = create_store(&cfg.checkpoint)
        .await
        .context("Failed to open checkpoint store")?;
    let orch = OrchestratorBuilder::from_config(&cfg, llm, store).build();

    if !orch.model_health().await {
        tracing::warn!(base_url = %cfg.llm.base_url, "model backend did not answer the health probe");
    }
    println!(
        "{} | thread: {thread_id}  (type 'quit' to exit)",
        cfg.app.display_name()
    );

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    // 上次运行停在审阅处时先把它处理完
    if let Some(request) = orch.pending_review(&thread_id).await? {
        review_loop(&orch, &thread_id, request, &mut input).await?;
    }

    loop {
        let Some(line) = prompt(&mut input, "you> ").await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let stream = match orch.start_turn(&thread_id, vec![Message::user(line)]).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };
        if let Some(request) = drain(stream).await {
            review_loop(&orch, &thread_id, request, &mut input).await?;
        }
    }
    Ok(())
}

/// 反复向审阅者询问，直到线程不再挂起
async fn review_loop(
    orch: &Orchestrator,
    thread_id: &str,
    mut request: ReviewRequest,
    input: &mut Input,
) -> anyhow::Result<()> {
    loop {
        println!(
            "\n[review] {} {}\n{}",
            request.tool_call.name,
            Value::Object(request.tool_call.args.clone()),
            request.question
        );
        let Some(answer) = prompt(input, "c | u <json args> | f <text> > ").await? else {
            return Ok(());
        };
        let disposition = match parse_answer(answer.trim()) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        let stream = match orch.resume_turn(thread_id, disposition).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: {e}");
                return Ok(());
            }
        };
        match drain(stream).await {
            Some(next) => request = next,
            None => return Ok(()),
        }
    }
}

/// 终端输入转为处置
fn parse_answer(answer: &str) -> Result<ReviewDisposition, AgentError> {
    let (cmd, rest) = answer.split_once(' ').unwrap_or((answer, ""));
    let value = match cmd {
        "c" | "continue" => json!({ "action": "continue" }),
        "u" | "update" => json!({ "action": "update", "data": rest.trim() }),
        "f" | "feedback" => json!({ "action": "feedback", "data": rest.trim() }),
        other => json!({ "action": other }),
    };
    ReviewDisposition::from_value(&value)
}

/// 打印事件直到流结束；返回最后的审阅请求（若有）
async fn drain(mut stream: TurnStream) -> Option<ReviewRequest> {
    let mut pending = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(TurnEvent::Message(m)) => print_message(&m),
            Ok(TurnEvent::Review(r)) => pending = Some(r),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    pending
}

fn print_message(m: &Message) {
    if let Some(id) = m.tool_call_id() {
        println!("tool[{id}]: {}", m.content);
        return;
    }
    if !m.content.is_empty() {
        println!("assistant: {}", m.content);
    }
    for call in m.tool_calls() {
        println!("  -> {}({})", call.name, Value::Object(call.args.clone()));
    }
}

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    let mut out = tokio::io::stdout();
    out.write_all(label.as_bytes()).await?;
    out.flush().await?;
    Ok(input.next_line().await?)
}
