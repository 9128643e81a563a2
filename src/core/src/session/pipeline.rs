//! One tool invocation, from raw arguments to a terminal message.
//!
//! Validating -> (preview, await decision) -> committing -> finalized, with
//! errored absorbing from any step. Nothing escapes: every failure becomes a
//! terminal message and a short summary string for the model.

use std::time::Duration;

use quill_protocol::{Decision, QuestionAnswer, ToolDecision, ToolResultPayload};
use serde::Serialize;
use serde_json::{json, Value};
use similar::TextDiff;

use crate::approval::{ApprovalGate, GateOutcome};
use crate::error::{CoreError, CoreResult};
use crate::message::{Message, ToolStatus};
use crate::quill_config::ApprovalPolicy;
use crate::reconcile::CompletedToolCall;
use crate::resource::{self, ResourceStore};
use crate::tools::{MutationPlan, ParsedToolArgs, QueryPlan, QuestionPlan, ToolPlan};

use super::AgentContext;

const DIFF_CONTEXT_LINES: usize = 3;

/// What the session remembers about one finished invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
    /// Id of the message that carries the result, if one made it into the
    /// transcript.
    pub message_id: Option<String>,
    pub resource_path: Option<String>,
    pub snapshot_id: Option<String>,
    pub decision: ToolDecision,
}

pub(crate) struct PipelineOutcome {
    pub(crate) record: InvocationRecord,
    pub(crate) summary: String,
}

/// Presentational preview of a pending write, shown as the tool message's
/// children while the gate is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationPreview {
    pub path: String,
    pub is_new_file: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior: Option<String>,
    pub diff: String,
}

struct Invocation {
    call_id: String,
    tool_name: String,
    input: Value,
    message_id: Option<String>,
    resource_path: Option<String>,
    snapshot_id: Option<String>,
}

impl Invocation {
    fn new(call: &CompletedToolCall) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: Value::String(call.arguments.clone()),
            message_id: None,
            resource_path: None,
            snapshot_id: None,
        }
    }

    fn finish(self, decision: ToolDecision, summary: String) -> PipelineOutcome {
        tracing::info!(
            call_id = %self.call_id,
            tool = %self.tool_name,
            ?decision,
            snapshot_id = self.snapshot_id.as_deref().unwrap_or(""),
            "tool invocation finished"
        );
        PipelineOutcome {
            record: InvocationRecord {
                tool_call_id: self.call_id,
                tool_name: self.tool_name,
                input: self.input,
                message_id: self.message_id,
                resource_path: self.resource_path,
                snapshot_id: self.snapshot_id,
                decision,
            },
            summary,
        }
    }

    fn errored_payload(&self, err: &CoreError) -> ToolResultPayload {
        ToolResultPayload::errored(
            self.tool_name.as_str(),
            self.call_id.as_str(),
            err.to_payload(),
            self.snapshot_id.clone(),
        )
    }

    /// Failure before the invocation owns a message: the error message is
    /// the only trace of the call. When the call id already belongs to
    /// another message the error is recorded without it.
    async fn fail_without_message(mut self, ctx: &AgentContext, err: CoreError) -> PipelineOutcome {
        tracing::warn!(
            call_id = %self.call_id,
            tool = %self.tool_name,
            kind = ?err.kind(),
            error = %err,
            "tool invocation rejected before execution"
        );
        let payload = self.errored_payload(&err);
        let summary = payload.summary();
        let error = err.to_payload();
        let tagged = Message::error(
            self.tool_name.as_str(),
            Some(self.call_id.clone()),
            &error,
            summary.clone(),
        );
        let message_id = tagged.id().to_string();
        match ctx.transcript.insert(tagged).await {
            Ok(()) => self.message_id = Some(message_id),
            Err(_) => {
                let untagged = Message::error(self.tool_name.as_str(), None, &error, summary.clone());
                let message_id = untagged.id().to_string();
                match ctx.transcript.insert(untagged).await {
                    Ok(()) => self.message_id = Some(message_id),
                    Err(insert_err) => {
                        tracing::warn!(call_id = %self.call_id, error = %insert_err, "error message not recorded");
                    }
                }
            }
        }
        self.finish(ToolDecision::Errored, summary)
    }

    /// Hand the invocation's message to the transcript.
    async fn attach(&mut self, ctx: &AgentContext, message: Message) -> CoreResult<()> {
        let message_id = message.id().to_string();
        ctx.transcript.insert(message).await?;
        self.message_id = Some(message_id);
        Ok(())
    }

    /// Write the terminal payload into the owned message and close it.
    async fn finalize(
        self,
        ctx: &AgentContext,
        payload: ToolResultPayload,
        mark: impl FnOnce(&mut Message) + Send,
    ) -> PipelineOutcome {
        let summary = payload.summary();
        if let Some(message_id) = self.message_id.as_deref() {
            let content = summary.clone();
            let updated = ctx
                .transcript
                .update(message_id, move |message| {
                    mark(message);
                    message.set_content(content);
                    message.close();
                })
                .await;
            if updated.is_none() {
                tracing::debug!(call_id = %self.call_id, "message evicted before finalize");
            }
        }
        self.finish(payload.decision, summary)
    }

    async fn finalize_tool(
        self,
        ctx: &AgentContext,
        status: ToolStatus,
        payload: ToolResultPayload,
    ) -> PipelineOutcome {
        self.finalize(ctx, payload, move |message| {
            if let Some(tool) = message.as_tool_mut() {
                tool.status = status;
            }
        })
        .await
    }
}

pub(crate) async fn run_pipeline(ctx: &AgentContext, call: CompletedToolCall) -> PipelineOutcome {
    let mut invocation = Invocation::new(&call);
    tracing::info!(call_id = %call.call_id, tool = %call.tool_name, "tool invocation started");

    let (args, plan) = match validate(ctx, &call) {
        Ok(validated) => validated,
        Err(err) => return invocation.fail_without_message(ctx, err).await,
    };
    invocation.input = args.to_value();

    match plan {
        ToolPlan::Query(plan) => run_query(ctx, invocation, plan).await,
        ToolPlan::Mutation(plan) => run_mutation(ctx, invocation, plan).await,
        ToolPlan::Question(plan) => run_question(ctx, invocation, plan).await,
    }
}

fn validate(ctx: &AgentContext, call: &CompletedToolCall) -> CoreResult<(ParsedToolArgs, ToolPlan)> {
    let tool = ctx
        .tools
        .get(&call.tool_name)
        .ok_or_else(|| CoreError::Validation(format!("unknown tool `{}`", call.tool_name)))?;
    let args = ParsedToolArgs::from_raw(&call.arguments)?;
    let plan = tool.plan(&args)?;
    if let ToolPlan::Mutation(mutation) = &plan {
        if ctx.snapshots.holds(&mutation.path) {
            return Err(CoreError::Validation(format!(
                "`{}` is inside the snapshot folder",
                mutation.path
            )));
        }
    }
    Ok((args, plan))
}

async fn run_query(
    ctx: &AgentContext,
    mut invocation: Invocation,
    plan: QueryPlan,
) -> PipelineOutcome {
    let QueryPlan { summary, run } = plan;
    let mut message = Message::tool(invocation.tool_name.as_str(), invocation.call_id.as_str());
    message.set_content(summary);
    if let Err(err) = invocation.attach(ctx, message).await {
        return invocation.fail_without_message(ctx, err).await;
    }

    match run.await {
        Ok(result) => {
            let payload = ToolResultPayload::applied(
                invocation.tool_name.as_str(),
                invocation.call_id.as_str(),
                result,
                None,
            );
            invocation
                .finalize_tool(ctx, ToolStatus::Applied, payload)
                .await
        }
        Err(err) => {
            let payload = invocation.errored_payload(&err);
            invocation
                .finalize_tool(ctx, ToolStatus::Failed, payload)
                .await
        }
    }
}

async fn run_mutation(
    ctx: &AgentContext,
    mut invocation: Invocation,
    plan: MutationPlan,
) -> PipelineOutcome {
    let preview = match build_preview(ctx.documents.as_ref(), &plan).await {
        Ok(preview) => preview,
        Err(err) => return invocation.fail_without_message(ctx, err).await,
    };
    invocation.resource_path = Some(plan.path.clone());

    let mut message = Message::tool(invocation.tool_name.as_str(), invocation.call_id.as_str());
    message.set_content(describe_preview(&plan, &preview));
    if let Some(tool) = message.as_tool_mut() {
        tool.status = ToolStatus::AwaitingApproval;
        tool.children = serde_json::to_value(&preview).ok();
    }

    let gate = ApprovalGate::<Decision>::open();
    let gate_id = gate.id();
    let approvals = ctx.transcript.approvals();
    let policy = ctx.config.approvals.policy;
    if policy == ApprovalPolicy::Ask && !approvals.register_decision(&invocation.call_id, gate.resolver()) {
        let err = in_flight(&invocation.call_id);
        return invocation.fail_without_message(ctx, err).await;
    }
    if let Err(err) = invocation.attach(ctx, message).await {
        approvals.release_decision(&invocation.call_id, &gate_id);
        return invocation.fail_without_message(ctx, err).await;
    }
    if policy == ApprovalPolicy::AutoApply {
        gate.resolver().resolve(Decision::Apply);
    }

    let decision = wait(ctx, gate).await;
    approvals.release_decision(&invocation.call_id, &gate_id);
    tracing::info!(call_id = %invocation.call_id, path = %plan.path, ?decision, "write decided");

    if decision == Decision::Reject {
        let payload = ToolResultPayload::rejected(
            invocation.tool_name.as_str(),
            invocation.call_id.as_str(),
            "rejected by user",
        );
        return invocation
            .finalize_tool(ctx, ToolStatus::Rejected, payload)
            .await;
    }

    if let Some(message_id) = invocation.message_id.as_deref() {
        ctx.transcript
            .update(message_id, |message| {
                if let Some(tool) = message.as_tool_mut() {
                    tool.status = ToolStatus::Running;
                }
            })
            .await;
    }

    let _guard = if ctx.config.tools.lock_paths {
        Some(ctx.locks.lock(&plan.path).await)
    } else {
        None
    };

    let snapshot_id = match ctx.snapshots.create_snapshot(&plan.path).await {
        Ok(id) => id,
        Err(err) => {
            let payload = invocation.errored_payload(&err);
            return invocation
                .finalize_tool(ctx, ToolStatus::Failed, payload)
                .await;
        }
    };
    invocation.snapshot_id = Some(snapshot_id.clone());

    match resource::put(ctx.documents.as_ref(), &plan.path, &plan.content).await {
        Ok(()) => {
            let result = json!({
                "path": plan.path,
                "is_new_file": preview.is_new_file,
                "bytes": plan.content.len(),
            });
            let payload = ToolResultPayload::applied(
                invocation.tool_name.as_str(),
                invocation.call_id.as_str(),
                result,
                Some(snapshot_id),
            );
            invocation
                .finalize_tool(ctx, ToolStatus::Applied, payload)
                .await
        }
        Err(err) => {
            let payload = invocation.errored_payload(&err);
            invocation
                .finalize_tool(ctx, ToolStatus::Failed, payload)
                .await
        }
    }
}

async fn run_question(
    ctx: &AgentContext,
    mut invocation: Invocation,
    plan: QuestionPlan,
) -> PipelineOutcome {
    let QuestionPlan { question, options } = plan;
    let mut message = Message::question(invocation.call_id.as_str(), question.as_str(), options);
    message.set_content(question);

    let gate = ApprovalGate::<QuestionAnswer>::open();
    let gate_id = gate.id();
    let approvals = ctx.transcript.approvals();
    if !approvals.register_question(&invocation.call_id, gate.resolver()) {
        let err = in_flight(&invocation.call_id);
        return invocation.fail_without_message(ctx, err).await;
    }
    if let Err(err) = invocation.attach(ctx, message).await {
        approvals.release_question(&invocation.call_id, &gate_id);
        return invocation.fail_without_message(ctx, err).await;
    }

    let answer = wait(ctx, gate).await;
    approvals.release_question(&invocation.call_id, &gate_id);

    let payload = match &answer {
        QuestionAnswer::Answered { text } => ToolResultPayload::applied(
            invocation.tool_name.as_str(),
            invocation.call_id.as_str(),
            json!({ "answer": text }),
            None,
        ),
        QuestionAnswer::Dismissed => ToolResultPayload::rejected(
            invocation.tool_name.as_str(),
            invocation.call_id.as_str(),
            "dismissed by user",
        ),
    };
    invocation
        .finalize(ctx, payload, move |message| {
            if let Some(question) = message.as_question_mut() {
                question.answer = Some(answer);
            }
        })
        .await
}

fn in_flight(call_id: &str) -> CoreError {
    CoreError::Validation(format!("tool call `{call_id}` is already in flight"))
}

async fn wait<T: GateOutcome>(ctx: &AgentContext, gate: ApprovalGate<T>) -> T {
    match ctx.config.approvals.timeout_secs {
        Some(secs) => gate.wait_with_timeout(Duration::from_secs(secs)).await,
        None => gate.wait_for_decision().await,
    }
}

pub(crate) async fn build_preview(
    store: &dyn ResourceStore,
    plan: &MutationPlan,
) -> CoreResult<MutationPreview> {
    let prior = if store.exists(&plan.path).await? {
        Some(store.read(&plan.path).await?)
    } else {
        None
    };
    let diff = unified_diff(&plan.path, prior.as_deref(), &plan.content);
    Ok(MutationPreview {
        path: plan.path.clone(),
        is_new_file: prior.is_none(),
        content: plan.content.clone(),
        prior,
        diff,
    })
}

fn unified_diff(path: &str, prior: Option<&str>, proposed: &str) -> String {
    let old_header = match prior {
        Some(_) => format!("a/{path}"),
        None => "/dev/null".to_string(),
    };
    TextDiff::from_lines(prior.unwrap_or(""), proposed)
        .unified_diff()
        .context_radius(DIFF_CONTEXT_LINES)
        .header(&old_header, &format!("b/{path}"))
        .to_string()
}

fn describe_preview(plan: &MutationPlan, preview: &MutationPreview) -> String {
    let state = if preview.is_new_file {
        "new document"
    } else {
        "replaces existing document"
    };
    format!("{} ({state}, awaiting approval)", plan.summary)
}
