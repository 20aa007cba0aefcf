//! Turn execution loop — the orchestrator that streams LLM responses,
//! activates tools per step, repairs malformed inputs, dispatches tool
//! calls, and persists the resulting messages.
//!
//! Entry point: [`run_turn`] spawns the async loop and returns a channel
//! of [`TurnEvent`]s for the request layer to stream to the client.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use wf_domain::error::{Error, Result, WireError};
use wf_domain::stream::{StreamEvent, Usage};
use wf_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use wf_providers::{with_retry, ChatRequest, RetryPolicy};
use wf_storage::{ProjectRow, StoredMessage};
use wf_tools::ToolCallError;

use crate::activation::select_active_tools;
use crate::cancel::CancelToken;
use crate::compress::compress_messages;
use crate::core::CoreRuntime;
use crate::repair::repair_input;
use crate::title::derive_title;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent — the streamed event type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single agent turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    /// Incremental assistant text.
    #[serde(rename = "text-delta")]
    TextDelta { text: String },

    /// The model is invoking a tool.
    #[serde(rename = "tool-call")]
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// Tool execution result.
    #[serde(rename = "tool-result")]
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    /// A step of the loop finished.
    #[serde(rename = "step-finish")]
    StepFinish {
        step_number: u32,
        finish_reason: Option<String>,
        tool_calls: usize,
        tokens_used: u32,
    },

    /// A turn-fatal error, in the tagged boundary form.
    #[serde(rename = "error")]
    Error { error: WireError },

    /// The turn is over; everything produced has been persisted.
    #[serde(rename = "done")]
    Done {
        cancelled: bool,
        input_tokens: u32,
        output_tokens: u32,
        total_tokens: u32,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
pub struct TurnInput {
    pub project_id: String,
    /// The conversation so far, newest message last.
    pub conversation: Vec<Message>,
    /// Model override. `None` = the provider default.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn. Returns the turn id and a channel of
/// [`TurnEvent`]s; the caller reads events as they arrive. The turn owns
/// a registered cancel token so `stop_turn` can abort it cleanly.
pub fn run_turn(
    runtime: Arc<CoreRuntime>,
    input: TurnInput,
) -> (uuid::Uuid, mpsc::Receiver<TurnEvent>) {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    let turn_id = uuid::Uuid::new_v4();
    let cancel = runtime.cancel_map.register(&input.project_id);
    let project_id = input.project_id.clone();

    let span = tracing::info_span!("turn", %turn_id, project_id = %project_id);
    tokio::spawn(
        async move {
            let result = run_turn_inner(&runtime, input, &tx, &cancel).await;
            runtime.cancel_map.remove(&project_id);
            if let Err(e) = result {
                tracing::error!(error = %e, "turn failed");
                let _ = tx
                    .send(TurnEvent::Error { error: e.to_wire() })
                    .await;
            }
        }
        .instrument(span),
    );

    (turn_id, rx)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inner loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do with one streamed tool call after validation and repair.
enum CallPlan {
    Execute(Value),
    Reject(String),
    SkipUnknown(String),
}

async fn run_turn_inner(
    runtime: &Arc<CoreRuntime>,
    input: TurnInput,
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancelToken,
) -> Result<()> {
    let project_id = input.project_id.clone();
    let _permit = runtime.turn_locks.acquire(&project_id).await?;

    ensure_project_row(runtime, &project_id, &input.conversation).await?;

    let cfg = runtime.config.orchestrator.clone();
    let retry = RetryPolicy::default();
    let mut messages = input.conversation.clone();
    // Messages produced this turn, persisted at the end (or on abort).
    let mut produced: Vec<Message> = Vec::new();
    let mut total_usage = Usage::default();
    let mut files_created = 0usize;
    let mut files_updated = 0usize;
    let mut step: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return finish(runtime, &project_id, tx, produced, &total_usage, true, 0, 0).await;
        }
        if let Some(cap) = cfg.max_steps {
            if step >= cap {
                tracing::warn!(step, cap, "step cap reached, truncating turn");
                produced.push(Message::assistant(
                    "[response truncated: step limit reached]",
                ));
                break;
            }
        }

        // ── Prepare the step: tool activation + compression ───────
        let ctx = runtime.context.get(&project_id).await?;
        let active = select_active_tools(&runtime.registry, step, &ctx);
        let compressed =
            compress_messages(&messages, cfg.compress_messages_above, cfg.compress_keep_tail);

        let req = ChatRequest {
            model: input.model.clone(),
            system: None,
            messages: compressed,
            tools: runtime.registry.definitions(),
            active_tools: Some(active),
            temperature: Some(cfg.temperature),
            max_tokens: None,
        };

        let mut stream = with_retry(&retry, "llm.chat_stream", || async {
            runtime.llm.chat_stream(&req).await
        })
        .await?;

        // ── Consume the stream ────────────────────────────────────
        let mut text_buf = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        // call_id → (tool_name, argument json buffer)
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();
        let mut step_usage: Option<Usage> = None;
        let mut finish_reason: Option<String> = None;
        let mut was_cancelled = false;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                was_cancelled = true;
                break;
            }
            match event? {
                StreamEvent::Token { text } => {
                    let _ = tx.send(TurnEvent::TextDelta { text: text.clone() }).await;
                    text_buf.push_str(&text);
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    tc_bufs.insert(call_id, (tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                        args.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    tc_bufs.remove(&call_id);
                    pending.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done {
                    usage,
                    finish_reason: reason,
                } => {
                    step_usage = usage;
                    finish_reason = reason;
                }
                StreamEvent::Error { message } => {
                    if !text_buf.is_empty() {
                        produced.push(Message::assistant(text_buf.clone()));
                    }
                    persist_messages(runtime, &project_id, &produced).await?;
                    let _ = tx
                        .send(TurnEvent::Error {
                            error: Error::ProviderUnavailable(message).to_wire(),
                        })
                        .await;
                    return Ok(());
                }
            }
        }

        // Assemble calls that streamed start/delta without a finish
        // marker (some providers never send one).
        for (call_id, (tool_name, args)) in tc_bufs.drain() {
            let arguments = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            pending.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        if let Some(usage) = &step_usage {
            total_usage.add(usage);
        }

        if was_cancelled {
            if !text_buf.is_empty() {
                produced.push(Message::assistant(text_buf.clone()));
            }
            return finish(runtime, &project_id, tx, produced, &total_usage, true, 0, 0).await;
        }

        // ── No tool calls: this is the final answer ───────────────
        if pending.is_empty() {
            if !text_buf.is_empty() {
                produced.push(Message::assistant(text_buf.clone()));
            }
            on_step_finish(tx, step, &finish_reason, 0, &step_usage).await;
            break;
        }

        // ── Record the assistant message with its tool-use parts ──
        let mut parts = Vec::new();
        if !text_buf.is_empty() {
            parts.push(ContentPart::Text {
                text: text_buf.clone(),
            });
        }
        for tc in &pending {
            parts.push(ContentPart::ToolUse {
                id: tc.call_id.clone(),
                name: tc.tool_name.clone(),
                input: tc.arguments.clone(),
            });
        }
        let assistant = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        };
        messages.push(assistant.clone());
        produced.push(assistant);

        // ── Validate and repair each call ─────────────────────────
        let plans: Vec<CallPlan> = pending
            .iter()
            .map(|tc| match runtime.registry.validate(&tc.tool_name, &tc.arguments) {
                Ok(()) => CallPlan::Execute(tc.arguments.clone()),
                Err(ToolCallError::UnknownTool { name }) => {
                    tracing::warn!(call_id = %tc.call_id, tool = %name, "unknown tool, skipping call");
                    CallPlan::SkipUnknown(name)
                }
                Err(ToolCallError::InvalidInput { message }) => {
                    let repaired = repair_input(&tc.arguments);
                    match runtime.registry.validate(&tc.tool_name, &repaired) {
                        Ok(()) => {
                            tracing::debug!(
                                call_id = %tc.call_id,
                                tool = %tc.tool_name,
                                "tool input repaired"
                            );
                            CallPlan::Execute(repaired)
                        }
                        Err(still_invalid) => {
                            tracing::debug!(
                                call_id = %tc.call_id,
                                tool = %tc.tool_name,
                                error = %still_invalid,
                                original = %message,
                                "tool input unrepairable, returning error to model"
                            );
                            CallPlan::Reject(still_invalid.to_string())
                        }
                    }
                }
            })
            .collect();

        if cancel.is_cancelled() {
            return finish(runtime, &project_id, tx, produced, &total_usage, true, 0, 0).await;
        }

        for tc in &pending {
            let _ = tx
                .send(TurnEvent::ToolCall {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                })
                .await;
        }

        // ── Dispatch concurrently; results keep declaration order. ─
        //    The cancel token rides into every dispatch so an abort
        //    reaches tools that are already running.
        let dispatches = pending.iter().zip(&plans).map(|(tc, plan)| {
            let executors = &runtime.executors;
            let project_id = project_id.as_str();
            async move {
                match plan {
                    CallPlan::Execute(args) => {
                        let span =
                            tracing::info_span!("tool.call", tool_name = %tc.tool_name);
                        Some(
                            executors
                                .dispatch(project_id, &tc.tool_name, args, cancel)
                                .instrument(span)
                                .await,
                        )
                    }
                    _ => None,
                }
            }
        });
        let outcomes = futures_util::future::join_all(dispatches).await;

        for ((tc, plan), outcome) in pending.iter().zip(&plans).zip(outcomes) {
            let (content, is_error) = match (plan, outcome) {
                (CallPlan::Execute(_), Some(outcome)) => {
                    if outcome.success {
                        track_file_changes(
                            &tc.tool_name,
                            &outcome.output,
                            &mut files_created,
                            &mut files_updated,
                        );
                    }
                    (outcome.content_string(), !outcome.success)
                }
                (CallPlan::Reject(message), _) => (
                    serde_json::json!({ "error": message }).to_string(),
                    true,
                ),
                (CallPlan::SkipUnknown(name), _) => (
                    serde_json::json!({ "error": format!("unknown tool '{name}'") }).to_string(),
                    true,
                ),
                (CallPlan::Execute(_), None) => (
                    serde_json::json!({ "error": "tool did not run" }).to_string(),
                    true,
                ),
            };

            let _ = tx
                .send(TurnEvent::ToolResult {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    content: content.clone(),
                    is_error,
                })
                .await;

            let message = if is_error {
                Message::tool_error(&tc.call_id, &content)
            } else {
                Message::tool_result(&tc.call_id, &content)
            };
            messages.push(message.clone());
            produced.push(message);
        }

        on_step_finish(tx, step, &finish_reason, pending.len(), &step_usage).await;
        step += 1;
    }

    // ── Fallback text ─────────────────────────────────────────────
    let has_text = produced
        .iter()
        .any(|m| m.role == Role::Assistant && m.content.has_text());
    if !has_text && files_created + files_updated > 0 {
        produced.push(Message::assistant(format!(
            "Completed the requested changes ({files_created} files created, {files_updated} files updated)."
        )));
    }

    finish(
        runtime,
        &project_id,
        tx,
        produced,
        &total_usage,
        false,
        files_created,
        files_updated,
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upsert the project row before anything references it, deriving a
/// title from the first user message while the name is a placeholder.
async fn ensure_project_row(
    runtime: &Arc<CoreRuntime>,
    project_id: &str,
    conversation: &[Message],
) -> Result<()> {
    let first_user_text = conversation
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.extract_all_text());
    let derived = first_user_text.as_deref().and_then(derive_title);
    let default_name = runtime.config.orchestrator.default_project_name.clone();

    match runtime.store.get_project(project_id).await? {
        None => {
            let name = derived.unwrap_or(default_name);
            runtime
                .store
                .upsert_project(ProjectRow::new(project_id, name))
                .await?;
        }
        Some(row) if row.name == project_id || row.name == default_name => {
            if let Some(title) = derived {
                let mut updated = row;
                updated.name = title;
                updated.updated_at = Utc::now();
                runtime.store.upsert_project(updated).await?;
            }
        }
        Some(_) => {}
    }
    Ok(())
}

fn track_file_changes(
    tool_name: &str,
    output: &Value,
    files_created: &mut usize,
    files_updated: &mut usize,
) {
    match tool_name {
        "writeFile" | "editFile" => match output.get("status").and_then(Value::as_str) {
            Some("created") => *files_created += 1,
            Some("updated") => *files_updated += 1,
            _ => {}
        },
        "batchWriteFiles" => {
            *files_created += output
                .get("created")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            *files_updated += output
                .get("updated")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
        }
        _ => {}
    }
}

async fn on_step_finish(
    tx: &mpsc::Sender<TurnEvent>,
    step: u32,
    finish_reason: &Option<String>,
    tool_calls: usize,
    usage: &Option<Usage>,
) {
    let tokens_used = usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
    tracing::info!(
        step_number = step,
        finish_reason = finish_reason.as_deref().unwrap_or("unknown"),
        tool_calls,
        tokens_used,
        "step finished"
    );
    let _ = tx
        .send(TurnEvent::StepFinish {
            step_number: step,
            finish_reason: finish_reason.clone(),
            tool_calls,
            tokens_used,
        })
        .await;
}

fn to_stored(message: &Message) -> StoredMessage {
    let parts = match &message.content {
        MessageContent::Text(text) => vec![ContentPart::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts.clone(),
    };
    StoredMessage {
        role: message.role,
        content: message.content.extract_all_text(),
        parts,
        created_at: Utc::now(),
    }
}

async fn persist_messages(
    runtime: &Arc<CoreRuntime>,
    project_id: &str,
    produced: &[Message],
) -> Result<()> {
    if produced.is_empty() {
        return Ok(());
    }
    let stored: Vec<StoredMessage> = produced.iter().map(to_stored).collect();
    runtime.store.append_messages(project_id, stored).await
}

#[allow(clippy::too_many_arguments)]
async fn finish(
    runtime: &Arc<CoreRuntime>,
    project_id: &str,
    tx: &mpsc::Sender<TurnEvent>,
    produced: Vec<Message>,
    usage: &Usage,
    cancelled: bool,
    files_created: usize,
    files_updated: usize,
) -> Result<()> {
    persist_messages(runtime, project_id, &produced).await?;
    tracing::info!(
        cancelled,
        messages = produced.len(),
        files_created,
        files_updated,
        total_tokens = usage.total_tokens,
        "turn complete"
    );
    let _ = tx
        .send(TurnEvent::Done {
            cancelled,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .await;
    Ok(())
}
