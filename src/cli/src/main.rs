use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream;
use quill_core::{
    AgentContext, ApprovalPolicy, FsResourceStore, MessageView, QuillConfig, RenderEvent, Session,
    Transcript,
};
use quill_protocol::{decode_delta, Decision, QuestionAnswer, StreamDelta};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

const RENDER_BUFFER: usize = 1024;
const USAGE: &str = "usage: quill <stream.jsonl> [docs_dir] | quill --list-tools [docs_dir]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).peekable();
    let list_only = args.next_if(|arg| arg == "--list-tools").is_some();
    let stream_path = if list_only {
        None
    } else {
        Some(
            args.next()
                .or_else(|| env::var("QUILL_STREAM").ok())
                .ok_or(USAGE)?,
        )
    };
    let docs_dir = args
        .next()
        .or_else(|| env::var("QUILL_DOCS").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = QuillConfig::load()?;
    if parse_bool("QUILL_AUTO_APPLY", false) {
        config.approvals.policy = ApprovalPolicy::AutoApply;
    }

    let Some(stream_path) = stream_path else {
        let store = Arc::new(FsResourceStore::new(docs_dir));
        let ctx = AgentContext::new(config, store, Transcript::detached())?;
        println!("{}", serde_json::to_string_pretty(&ctx.tools.definitions())?);
        return Ok(());
    };

    let deltas = read_stream(Path::new(&stream_path)).await?;
    tracing::info!(
        stream = %stream_path,
        docs = %docs_dir.display(),
        deltas = deltas.len(),
        "replaying recorded turn"
    );

    let (tx, rx) = mpsc::channel(RENDER_BUFFER);
    let store = Arc::new(FsResourceStore::new(docs_dir));
    let ctx = Arc::new(AgentContext::new(config, store, Transcript::new(tx))?);
    let session = Session::new(ctx.clone());
    let renderer = tokio::spawn(render(ctx, rx));

    let turn_id = Path::new(&stream_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("turn")
        .to_string();
    let summary = session.run_turn(&turn_id, stream::iter(deltas)).await;
    renderer.abort();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    let entries = session.next_turn_input().await;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

async fn read_stream(path: &Path) -> Result<Vec<StreamDelta>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("read {}: {e}", path.display()))?;
    let mut deltas = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match decode_delta(line) {
            Ok(delta) => deltas.push(delta),
            Err(err) => tracing::warn!(line = index + 1, error = %err, "skipping bad stream line"),
        }
    }
    Ok(deltas)
}

/// Print every view and collect console decisions for open gates.
async fn render(ctx: Arc<AgentContext>, mut rx: mpsc::Receiver<RenderEvent>) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut answered = HashSet::new();
    while let Some(event) = rx.recv().await {
        let view = match event {
            RenderEvent::Upserted { view } => view,
            RenderEvent::Evicted { id } => {
                eprintln!("[evicted] {id}");
                continue;
            }
        };
        if !view.is_streaming || view.awaiting_decision {
            print_view(&view);
        }
        if !view.awaiting_decision {
            continue;
        }
        let Some(call_id) = view.tool_call_id.clone() else {
            continue;
        };
        if !answered.insert(call_id.clone()) {
            continue;
        }
        let approvals = ctx.transcript.approvals();
        if view.question.is_some() {
            let answer = prompt_answer(&mut stdin, &view).await;
            approvals.respond_question(&call_id, answer);
        } else {
            let decision = prompt_decision(&mut stdin).await;
            approvals.respond_approval(&call_id, decision);
        }
    }
}

fn print_view(view: &MessageView) {
    match serde_json::to_string(view) {
        Ok(line) => eprintln!("{line}"),
        Err(err) => tracing::warn!(id = %view.id, error = %err, "view not printable"),
    }
    if let Some(diff) = view
        .children
        .as_ref()
        .and_then(|children| children.get("diff"))
        .and_then(|diff| diff.as_str())
    {
        eprintln!("{diff}");
    }
}

async fn prompt_decision(stdin: &mut Lines<BufReader<Stdin>>) -> Decision {
    loop {
        eprint!("apply or reject? ");
        match stdin.next_line().await {
            Ok(Some(line)) => match Decision::parse(&line) {
                Some(decision) => return decision,
                None => eprintln!("answer `apply` or `reject`"),
            },
            Ok(None) => return Decision::Reject,
            Err(err) => {
                tracing::warn!(error = %err, "stdin read failed; rejecting");
                return Decision::Reject;
            }
        }
    }
}

async fn prompt_answer(stdin: &mut Lines<BufReader<Stdin>>, view: &MessageView) -> QuestionAnswer {
    if let Some(question) = view.question.as_deref() {
        eprintln!("{question}");
    }
    for (index, option) in view.options.iter().enumerate() {
        eprintln!("  {}. {option}", index + 1);
    }
    eprint!("answer (empty to dismiss): ");
    let line = match stdin.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) => return QuestionAnswer::Dismissed,
        Err(err) => {
            tracing::warn!(error = %err, "stdin read failed; dismissing");
            return QuestionAnswer::Dismissed;
        }
    };
    let line = line.trim();
    if line.is_empty() {
        return QuestionAnswer::Dismissed;
    }
    let text = line
        .parse::<usize>()
        .ok()
        .and_then(|choice| view.options.get(choice.checked_sub(1)?))
        .cloned()
        .unwrap_or_else(|| line.to_string());
    QuestionAnswer::Answered { text }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("QUILL_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if parse_bool("QUILL_DEBUG", false) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
