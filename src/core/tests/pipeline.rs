use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use quill_core::{
    AgentContext, ApprovalPolicy, CoreError, MemoryResourceStore, PriorState, QuillConfig,
    RenderEvent, ResourceStore, RestoreOutcome, Role, Session, StoreOp, ToolStatus, Transcript,
};
use quill_protocol::{Decision, EntryRole, QuestionAnswer, StreamDelta};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone)]
enum Reply {
    Decide(Decision),
    Answer(&'static str),
    Dismiss,
    Evict,
}

fn session_over(store: Arc<MemoryResourceStore>, config: QuillConfig) -> (Session, mpsc::Receiver<RenderEvent>) {
    let (tx, rx) = mpsc::channel(1024);
    let ctx = AgentContext::new(config, store, Transcript::new(tx)).expect("context");
    (Session::new(Arc::new(ctx)), rx)
}

/// Plays the renderer: answers every gate it is shown with `reply`.
fn renderer(
    ctx: Arc<AgentContext>,
    mut rx: mpsc::Receiver<RenderEvent>,
    reply: Reply,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let RenderEvent::Upserted { view } = event else {
                continue;
            };
            if !view.awaiting_decision {
                continue;
            }
            let Some(call_id) = view.tool_call_id.clone() else {
                continue;
            };
            let approvals = ctx.transcript.approvals();
            match &reply {
                Reply::Decide(decision) => {
                    approvals.respond_approval(&call_id, *decision);
                }
                Reply::Answer(text) => {
                    approvals.respond_question(
                        &call_id,
                        QuestionAnswer::Answered {
                            text: text.to_string(),
                        },
                    );
                }
                Reply::Dismiss => {
                    approvals.respond_question(&call_id, QuestionAnswer::Dismissed);
                }
                Reply::Evict => {
                    ctx.transcript.evict(&view.id).await;
                }
            }
        }
    })
}

fn tool_call(call_id: &str, tool: &str, args: &str) -> Vec<StreamDelta> {
    let (head, tail) = args.split_at(args.len() / 2);
    vec![
        StreamDelta::tool_call_start(call_id, tool),
        StreamDelta::tool_call_args(call_id, head),
        StreamDelta::tool_call_args(call_id, tail),
        StreamDelta::tool_call_end(call_id),
    ]
}

fn result_for(summary: &quill_core::TurnSummary, call_id: &str) -> Value {
    let (_, raw) = summary
        .tool_results
        .iter()
        .find(|(id, _)| id == call_id)
        .expect("tool result");
    serde_json::from_str(raw).expect("summary is json")
}

fn snapshot_record(op: &StoreOp) -> bool {
    matches!(op, StoreOp::Create(path) if path.starts_with(".quill/snapshots/"))
}

#[tokio::test]
async fn writing_a_new_note_previews_applies_and_undoes() {
    let store = Arc::new(MemoryResourceStore::new());
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Decide(Decision::Apply));

    let deltas = tool_call(
        "call-1",
        "write_document",
        r#"{"path":"notes/x.md","content":"hello"}"#,
    );
    let summary = session.run_turn("turn-1", stream::iter(deltas)).await;
    responder.abort();

    let result = result_for(&summary, "call-1");
    assert_eq!(result["success"], true);
    assert_eq!(result["decision"], "applied");
    assert_eq!(result["result"]["is_new_file"], true);
    assert!(result["snapshot_id"].is_string());
    assert_eq!(store.read("notes/x.md").await.unwrap(), "hello");

    let message = session
        .context()
        .transcript
        .find_by_call("call-1")
        .await
        .expect("tool message");
    assert!(!message.is_streaming());
    let view = message.render();
    assert_eq!(view.status, Some(ToolStatus::Applied));
    assert_eq!(view.children.as_ref().unwrap()["is_new_file"], true);

    let ops = store.ops();
    let snapshot_at = ops.iter().position(snapshot_record).expect("snapshot");
    let write_at = ops
        .iter()
        .position(|op| op == &StoreOp::Create("notes/x.md".into()))
        .expect("write");
    assert!(snapshot_at < write_at);
    assert_eq!(ops.iter().filter(|op| snapshot_record(op)).count(), 1);

    let outcome = session.undo("call-1").await.unwrap();
    assert_eq!(outcome, RestoreOutcome::Deleted);
    assert!(!store.exists("notes/x.md").await.unwrap());
    assert!(matches!(
        session.undo("call-1").await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn rejecting_a_write_leaves_the_store_untouched() {
    let store = Arc::new(MemoryResourceStore::new().with_file("notes/a.md", "old"));
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Decide(Decision::Reject));

    let deltas = tool_call(
        "call-2",
        "write_document",
        r#"{"path":"notes/a.md","content":"new"}"#,
    );
    let summary = session.run_turn("turn-2", stream::iter(deltas)).await;
    responder.abort();

    let result = result_for(&summary, "call-2");
    assert_eq!(result["success"], false);
    assert_eq!(result["decision"], "rejected");
    assert_eq!(result["result"]["cancelled"], true);
    assert_eq!(store.read("notes/a.md").await.unwrap(), "old");
    assert!(store.ops().is_empty());
    assert!(session.context().snapshots.list_ids().await.unwrap().is_empty());
    assert!(matches!(
        session.undo("call-2").await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn malformed_arguments_produce_an_error_message_without_a_gate() {
    let store = Arc::new(MemoryResourceStore::new());
    let (session, _rx) = session_over(store.clone(), QuillConfig::default());

    let mut deltas = vec![
        StreamDelta::tool_call_start("call-3", "write_document"),
        StreamDelta::tool_call_args("call-3", "{\"path\": "),
        StreamDelta::tool_call_end("call-3"),
    ];
    deltas.extend(tool_call("call-4", "delete_everything", "{}"));
    let summary = session.run_turn("turn-3", stream::iter(deltas)).await;

    for call_id in ["call-3", "call-4"] {
        let result = result_for(&summary, call_id);
        assert_eq!(result["success"], false);
        assert_eq!(result["decision"], "errored");
        assert_eq!(result["error"]["kind"], "validation");
        let message = session
            .context()
            .transcript
            .find_by_call(call_id)
            .await
            .expect("error message");
        assert_eq!(message.role(), Role::Error);
        assert!(!message.is_streaming());
    }
    assert!(session.context().transcript.approvals().pending_calls().is_empty());
    assert!(store.ops().is_empty());
}

#[tokio::test]
async fn read_only_tools_run_without_approval() {
    let store = Arc::new(MemoryResourceStore::new().with_file("a.md", "alpha\nbeta"));
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    drop(rx);

    let deltas = tool_call("call-5", "read_document", r#"{"path":"a.md"}"#);
    let summary = session.run_turn("turn-4", stream::iter(deltas)).await;

    let result = result_for(&summary, "call-5");
    assert_eq!(result["success"], true);
    assert_eq!(result["decision"], "applied");
    assert_eq!(result["result"]["content"], "L1: alpha\nL2: beta");
    assert!(result.get("snapshot_id").is_none());
    assert!(store.ops().is_empty());
}

#[tokio::test]
async fn missing_document_read_finalizes_as_failed() {
    let store = Arc::new(MemoryResourceStore::new());
    let (session, _rx) = session_over(store, QuillConfig::default());

    let deltas = tool_call("call-6", "read_document", r#"{"path":"ghost.md"}"#);
    let summary = session.run_turn("turn-5", stream::iter(deltas)).await;

    let result = result_for(&summary, "call-6");
    assert_eq!(result["decision"], "errored");
    assert_eq!(result["error"]["kind"], "not_found");
    let view = session
        .context()
        .transcript
        .find_by_call("call-6")
        .await
        .expect("tool message")
        .render();
    assert_eq!(view.status, Some(ToolStatus::Failed));
}

#[tokio::test]
async fn auto_apply_policy_resolves_gates_immediately() {
    let store = Arc::new(MemoryResourceStore::new());
    let mut config = QuillConfig::default();
    config.approvals.policy = ApprovalPolicy::AutoApply;
    let (session, _rx) = session_over(store.clone(), config);

    let deltas = tool_call(
        "call-7",
        "create_artifact",
        r#"{"kind":"skill","name":"tidy","description":"Tidy notes","body":"Do it"}"#,
    );
    let summary = session.run_turn("turn-6", stream::iter(deltas)).await;

    assert_eq!(result_for(&summary, "call-7")["success"], true);
    let skill = store.read(".quill/skills/tidy/SKILL.md").await.unwrap();
    assert!(skill.contains("description: Tidy notes"));
    assert!(skill.ends_with("Do it\n"));
}

#[tokio::test(start_paused = true)]
async fn unanswered_gate_times_out_as_rejection() {
    let store = Arc::new(MemoryResourceStore::new());
    let mut config = QuillConfig::default();
    config.approvals.timeout_secs = Some(30);
    let (session, _rx) = session_over(store.clone(), config);

    let deltas = tool_call(
        "call-8",
        "write_document",
        r#"{"path":"late.md","content":"x"}"#,
    );
    let started = tokio::time::Instant::now();
    let summary = session.run_turn("turn-7", stream::iter(deltas)).await;

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(result_for(&summary, "call-8")["decision"], "rejected");
    assert!(store.ops().is_empty());
}

#[tokio::test]
async fn io_failure_after_snapshot_keeps_the_snapshot() {
    let store = Arc::new(MemoryResourceStore::new().with_file("locked.md", "v1"));
    store.fail_on("locked.md");
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Decide(Decision::Apply));

    let deltas = tool_call(
        "call-9",
        "write_document",
        r#"{"path":"locked.md","content":"v2"}"#,
    );
    let summary = session.run_turn("turn-8", stream::iter(deltas)).await;
    responder.abort();

    let result = result_for(&summary, "call-9");
    assert_eq!(result["decision"], "errored");
    assert_eq!(result["error"]["kind"], "io");
    let snapshot_id = result["snapshot_id"].as_str().expect("snapshot kept");
    let snapshot = session
        .context()
        .snapshots
        .load(snapshot_id)
        .await
        .unwrap()
        .expect("snapshot record");
    assert_eq!(snapshot.resource_path, "locked.md");
    assert_eq!(store.read("locked.md").await.unwrap(), "v1");
    let messages = session.context().transcript.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].render().status, Some(ToolStatus::Failed));
}

#[tokio::test]
async fn questions_are_answered_or_dismissed() {
    let store = Arc::new(MemoryResourceStore::new());
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Answer("blue"));

    let deltas = tool_call(
        "call-10",
        "ask_user",
        r#"{"question":"Favourite colour?","options":["red","blue"]}"#,
    );
    let summary = session.run_turn("turn-9", stream::iter(deltas)).await;
    responder.abort();

    let result = result_for(&summary, "call-10");
    assert_eq!(result["success"], true);
    assert_eq!(result["result"]["answer"], "blue");
    let view = session
        .context()
        .transcript
        .find_by_call("call-10")
        .await
        .expect("question message")
        .render();
    assert_eq!(
        view.answer,
        Some(QuestionAnswer::Answered {
            text: "blue".into()
        })
    );
    assert!(!view.awaiting_decision);

    let (session, rx) = session_over(store, QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Dismiss);
    let deltas = tool_call("call-11", "ask_user", r#"{"question":"Proceed?"}"#);
    let summary = session.run_turn("turn-10", stream::iter(deltas)).await;
    responder.abort();
    assert_eq!(result_for(&summary, "call-11")["success"], false);
}

#[tokio::test]
async fn evicting_a_pending_message_rejects_its_write() {
    let store = Arc::new(MemoryResourceStore::new());
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Evict);

    let deltas = tool_call(
        "call-12",
        "write_document",
        r#"{"path":"gone.md","content":"x"}"#,
    );
    let summary = session.run_turn("turn-11", stream::iter(deltas)).await;
    responder.abort();

    assert_eq!(result_for(&summary, "call-12")["decision"], "rejected");
    assert!(store.ops().is_empty());
    assert!(session
        .context()
        .transcript
        .find_by_call("call-12")
        .await
        .is_none());
}

#[tokio::test]
async fn one_turn_streams_text_and_runs_parallel_tool_calls() {
    let store = Arc::new(MemoryResourceStore::new().with_file("a.md", "seed"));
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Decide(Decision::Apply));
    session.push_user("Update both notes").await;

    let mut deltas = vec![
        StreamDelta::reasoning("turn-12", "Two writes. "),
        StreamDelta::text("turn-12", "Updating "),
        StreamDelta::tool_call_start("call-a", "write_document"),
        StreamDelta::tool_call_start("call-b", "write_document"),
        StreamDelta::tool_call_args("call-a", r#"{"path":"a.md","#),
        StreamDelta::tool_call_args("call-b", r#"{"path":"b.md","#),
        StreamDelta::tool_call_args("call-a", r#""content":"A"}"#),
        StreamDelta::tool_call_args("call-b", r#""content":"B"}"#),
        StreamDelta::tool_call_end("call-a"),
        StreamDelta::text("turn-12", "both notes."),
        StreamDelta::reasoning("turn-12", "Done."),
        StreamDelta::tool_call_end("call-b"),
    ];
    deltas.push(StreamDelta::text("turn-12", ""));
    let summary = session.run_turn("turn-12", stream::iter(deltas)).await;
    responder.abort();

    assert_eq!(summary.tool_results.len(), 2);
    assert_eq!(store.read("a.md").await.unwrap(), "A");
    assert_eq!(store.read("b.md").await.unwrap(), "B");
    assert_eq!(
        summary.closed_messages,
        vec!["turn-12-thinking".to_string(), "turn-12".to_string()]
    );

    let transcript = &session.context().transcript;
    assert_eq!(
        transcript.get("turn-12").await.unwrap().content(),
        "Updating both notes."
    );
    assert_eq!(
        transcript.get("turn-12-thinking").await.unwrap().content(),
        "Two writes. Done."
    );

    let entries = session.next_turn_input().await;
    assert_eq!(entries[0].role, EntryRole::User);
    assert!(entries.iter().all(|entry| !entry.content.contains("Two writes")));
    let tool_entries: Vec<_> = entries
        .iter()
        .filter(|entry| entry.role == EntryRole::Tool)
        .collect();
    assert_eq!(tool_entries.len(), 2);
    assert!(tool_entries
        .iter()
        .all(|entry| entry.content.contains("\"success\":true")));
}

#[tokio::test]
async fn locked_writes_to_one_path_snapshot_in_sequence() {
    let store = Arc::new(MemoryResourceStore::new().with_file("shared.md", "v0"));
    let mut config = QuillConfig::default();
    config.approvals.policy = ApprovalPolicy::AutoApply;
    config.tools.lock_paths = true;
    let (session, _rx) = session_over(store.clone(), config);

    let mut deltas = tool_call(
        "call-x",
        "write_document",
        r#"{"path":"shared.md","content":"v1"}"#,
    );
    deltas.extend(tool_call(
        "call-y",
        "write_document",
        r#"{"path":"shared.md","content":"v2"}"#,
    ));
    let summary = session.run_turn("turn-13", stream::iter(deltas)).await;
    assert_eq!(summary.tool_results.len(), 2);

    let snapshots = &session.context().snapshots;
    let mut priors = Vec::new();
    for call_id in ["call-x", "call-y"] {
        let result = result_for(&summary, call_id);
        let snapshot = snapshots
            .load(result["snapshot_id"].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        priors.push(snapshot.prior);
    }
    let v0 = PriorState::Content {
        content: "v0".into(),
    };
    let last = store.read("shared.md").await.unwrap();
    let (later_prior, other) = if last == "v2" { (&priors[1], "v1") } else { (&priors[0], "v2") };
    assert!(priors.contains(&v0));
    assert_eq!(
        later_prior,
        &PriorState::Content {
            content: other.into()
        }
    );

    let ops: Vec<StoreOp> = store
        .ops()
        .into_iter()
        .filter(|op| op.is_mutation())
        .collect();
    assert_eq!(ops.len(), 4);
    assert!(snapshot_record(&ops[0]));
    assert_eq!(ops[1], StoreOp::Write("shared.md".into()));
    assert!(snapshot_record(&ops[2]));
    assert_eq!(ops[3], StoreOp::Write("shared.md".into()));
}

#[tokio::test]
async fn prune_keeps_snapshots_that_can_still_be_undone() {
    let store = Arc::new(MemoryResourceStore::new());
    let mut config = QuillConfig::default();
    config.approvals.policy = ApprovalPolicy::AutoApply;
    let (session, _rx) = session_over(store.clone(), config);

    let mut deltas = tool_call("call-p", "write_document", r#"{"path":"p.md","content":"1"}"#);
    deltas.extend(tool_call("call-q", "write_document", r#"{"path":"q.md","content":"2"}"#));
    session.run_turn("turn-14", stream::iter(deltas)).await;

    let snapshots = &session.context().snapshots;
    let orphan = snapshots.create_snapshot("p.md").await.unwrap();
    assert_eq!(snapshots.list_ids().await.unwrap().len(), 3);

    session.undo("call-p").await.unwrap();
    assert_eq!(session.prune_snapshots().await.unwrap(), 1);
    let remaining = snapshots.list_ids().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(!remaining.contains(&orphan));
    assert_eq!(store.read("q.md").await.unwrap(), "2");
    assert!(!store.exists("p.md").await.unwrap());
}

#[tokio::test]
async fn reused_call_id_does_not_disturb_the_pending_write() {
    let store = Arc::new(MemoryResourceStore::new());
    let (session, rx) = session_over(store.clone(), QuillConfig::default());
    let responder = renderer(session.context().clone(), rx, Reply::Decide(Decision::Apply));

    let mut deltas = tool_call("dup", "write_document", r#"{"path":"first.md","content":"1"}"#);
    deltas.extend(tool_call(
        "dup",
        "write_document",
        r#"{"path":"second.md","content":"2"}"#,
    ));
    let summary = session.run_turn("turn-15", stream::iter(deltas)).await;
    responder.abort();

    let decisions: Vec<Value> = summary
        .tool_results
        .iter()
        .map(|(_, raw)| serde_json::from_str::<Value>(raw).unwrap()["decision"].clone())
        .collect();
    assert_eq!(decisions.len(), 2);
    assert!(decisions.contains(&Value::from("applied")));
    assert!(decisions.contains(&Value::from("errored")));
    let mut written = Vec::new();
    for path in ["first.md", "second.md"] {
        if store.exists(path).await.unwrap() {
            written.push(path);
        }
    }
    assert_eq!(written.len(), 1);

    let transcript = &session.context().transcript;
    let tool = transcript.find_by_call("dup").await.expect("tool message");
    assert_eq!(tool.render().status, Some(ToolStatus::Applied));
    let errors: Vec<_> = transcript
        .messages()
        .await
        .into_iter()
        .filter(|message| message.role() == Role::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].content().contains("already"));
    assert!(transcript.approvals().pending_calls().is_empty());
}

#[tokio::test]
async fn writes_into_the_snapshot_folder_are_refused() {
    let store = Arc::new(MemoryResourceStore::new());
    let mut config = QuillConfig::default();
    config.approvals.policy = ApprovalPolicy::AutoApply;
    let (session, _rx) = session_over(store.clone(), config);

    let deltas = tool_call(
        "call-16",
        "write_document",
        r#"{"path":"./.quill/snapshots/forged.json","content":"{}"}"#,
    );
    let summary = session.run_turn("turn-16", stream::iter(deltas)).await;

    let result = result_for(&summary, "call-16");
    assert_eq!(result["decision"], "errored");
    assert_eq!(result["error"]["kind"], "validation");
    let message = session
        .context()
        .transcript
        .find_by_call("call-16")
        .await
        .expect("error message");
    assert_eq!(message.role(), Role::Error);
    assert!(store.ops().is_empty());
}
