//! The deterministic streaming tool loop.
//!
//! Wraps one stage's LLM interaction: stream the model, collect the tool
//! calls it emits, dispatch them in received order under the capability
//! firewall, inject the results as tool messages, and go another round
//! until the model produces a tool-free response or the round bound
//! forces a final formatting pass.
//!
//! Tool failures of every class become `{ok:false, error:{...}}` tool
//! messages; they are never fatal to the stage or the turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;

use cortex_domain::config::Limits;
use cortex_domain::error::{Error, Result};
use cortex_domain::event::{EventPayload, ToolError, ToolErrorKind};
use cortex_domain::message::{Message, Role, ToolCall};
use cortex_domain::stream::{FinishReason, StreamEvent, Usage};
use cortex_providers::{ChatProvider, ChatRequest, ResponseFormat};

use crate::cancel::CancelToken;
use crate::digest::{args_digest, raw_digest};
use crate::emitter::Emitter;
use crate::registry::{RoleParams, ToolResources, Toolset};
use crate::state::EvidencePacket;
use crate::toolbox::evidence_from;

/// Back-off before the single transient-transport retry. Bounded so the
/// whole retry envelope stays under two seconds.
const RETRY_BACKOFF: Duration = Duration::from_millis(800);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How text deltas surface on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    /// `assistant_delta` events inside a stream-start/end span.
    Assistant,
    /// `delta_thinking` diagnostic events.
    Thinking,
    /// No delta events (mechanical stages).
    Silent,
}

/// Re-render hook invoked between rounds with the evidence gathered so
/// far; a `Some` return replaces the leading system message.
pub type SystemRefresh = Arc<dyn Fn(&[EvidencePacket]) -> Option<String> + Send + Sync>;

pub struct ToolLoopRequest {
    pub stage_id: &'static str,
    pub messages: Vec<Message>,
    pub toolset: Arc<Toolset>,
    pub response_format: ResponseFormat,
    /// System directive appended for the final formatting pass.
    pub format_directive: Option<String>,
    pub delta_mode: DeltaMode,
    pub role: RoleParams,
    /// Stage-specific round budget; defaults to `limits.tool_rounds`.
    pub rounds_override: Option<u32>,
    pub system_refresh: Option<SystemRefresh>,
}

pub struct LoopOutcome {
    /// Final concatenated text (the formatting pass replaces earlier
    /// rounds' text when it runs).
    pub text: String,
    pub usage: Usage,
    pub usage_seen: bool,
    pub issues: Vec<String>,
    /// Evidence packets from successful read-tool calls, in dispatch order.
    pub evidence: Vec<EvidencePacket>,
    pub rounds: u32,
}

struct RoundOutput {
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    #[allow(dead_code)]
    finish: FinishReason,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_tool_loop(
    provider: &dyn ChatProvider,
    mut req: ToolLoopRequest,
    resources: &Arc<ToolResources>,
    emitter: &Emitter,
    cancel: &CancelToken,
    limits: &Limits,
) -> Result<LoopOutcome> {
    let mut outcome = LoopOutcome {
        text: String::new(),
        usage: Usage::default(),
        usage_seen: false,
        issues: Vec::new(),
        evidence: Vec::new(),
        rounds: 0,
    };

    if req.delta_mode == DeltaMode::Assistant {
        emitter.emit(EventPayload::AssistantStreamStart {});
    }

    // Fast path: no tools means a single streaming call with the format
    // hint as given, forwarded 1:1.
    if req.toolset.is_empty() {
        let result = stream_round(
            provider,
            &req.messages,
            &req,
            req.response_format.clone(),
            true,
            emitter,
            cancel,
            &mut outcome.text,
        )
        .await;
        outcome.rounds = 1;
        let result = match result {
            Ok(round) => {
                if let Some(usage) = &round.usage {
                    outcome.usage.add(usage);
                    outcome.usage_seen = true;
                }
                Ok(())
            }
            Err(e) => Err(e),
        };
        return finish_loop(result, req.delta_mode, emitter, outcome);
    }

    let max_rounds = req.rounds_override.unwrap_or(limits.tool_rounds).max(1);

    loop {
        if cancel.is_cancelled() {
            return finish_loop(Err(Error::Cancelled), req.delta_mode, emitter, outcome);
        }
        if outcome.rounds >= max_rounds {
            // Round bound exceeded: force a formatting pass with tools
            // disabled, even when no response format was requested.
            outcome.issues.push("tool_rounds_bounded".into());
            tracing::debug!(stage = req.stage_id, rounds = outcome.rounds, "tool rounds bounded");
            let result = formatting_pass(provider, &req, emitter, cancel, &mut outcome).await;
            return finish_loop(result, req.delta_mode, emitter, outcome);
        }

        outcome.rounds += 1;
        tracing::debug!(stage = req.stage_id, round = outcome.rounds, "tool loop round");

        let mut round_text = String::new();
        let round = match stream_round(
            provider,
            &req.messages,
            &req,
            ResponseFormat::Null,
            false,
            emitter,
            cancel,
            &mut round_text,
        )
        .await
        {
            Ok(round) => round,
            Err(e) => return finish_loop(Err(e), req.delta_mode, emitter, outcome),
        };

        if let Some(usage) = &round.usage {
            outcome.usage.add(usage);
            outcome.usage_seen = true;
        }

        if round.tool_calls.is_empty() {
            outcome.text = round_text;
            if !req.response_format.is_null() {
                // The rounds ran with tools enabled and no format hint;
                // one tool-free pass produces the structured output.
                let result = formatting_pass(provider, &req, emitter, cancel, &mut outcome).await;
                return finish_loop(result, req.delta_mode, emitter, outcome);
            }
            return finish_loop(Ok(()), req.delta_mode, emitter, outcome);
        }

        // Inject the assistant's tool-call message, then every result.
        req.messages
            .push(Message::assistant_with_tool_calls(&round_text, &round.tool_calls));

        for tc in &round.tool_calls {
            if cancel.is_cancelled() {
                return finish_loop(Err(Error::Cancelled), req.delta_mode, emitter, outcome);
            }
            let exec = execute_tool(tc, &req.toolset, resources, emitter, req.stage_id, limits).await;
            if let Some(issue) = exec.issue {
                outcome.issues.push(issue);
            }
            if let Some(packet) = exec.evidence {
                outcome.evidence.push(packet);
            }
            req.messages
                .push(Message::tool_result(&tc.call_id, &exec.result_string));
        }

        // Between rounds the stage may re-render its system prompt with
        // the evidence gathered so far.
        if let Some(refresh) = &req.system_refresh {
            if let Some(new_system) = refresh(&outcome.evidence) {
                if let Some(first) = req.messages.first_mut() {
                    if first.role == Role::System {
                        *first = Message::system(new_system);
                    }
                }
            }
        }
    }
}

/// Close out the loop: end the assistant span (also on cancellation, with
/// whatever was streamed) and map the result onto the outcome.
fn finish_loop(
    result: Result<()>,
    delta_mode: DeltaMode,
    emitter: &Emitter,
    outcome: LoopOutcome,
) -> Result<LoopOutcome> {
    if delta_mode == DeltaMode::Assistant {
        emitter.emit(EventPayload::AssistantStreamEnd {
            text_total: outcome.text.clone(),
        });
    }
    result.map(|()| outcome)
}

/// One tool-free pass that produces the stage's structured output. Uses
/// the same message list (with all injected tool messages) plus the
/// stage's format directive.
async fn formatting_pass(
    provider: &dyn ChatProvider,
    req: &ToolLoopRequest,
    emitter: &Emitter,
    cancel: &CancelToken,
    outcome: &mut LoopOutcome,
) -> Result<()> {
    let mut messages = req.messages.clone();
    if let Some(directive) = &req.format_directive {
        messages.push(Message::system(directive.clone()));
    }

    outcome.rounds += 1;
    let mut text = String::new();
    let round = stream_round(
        provider,
        &messages,
        req,
        req.response_format.clone(),
        true,
        emitter,
        cancel,
        &mut text,
    )
    .await?;

    if let Some(usage) = &round.usage {
        outcome.usage.add(usage);
        outcome.usage_seen = true;
    }
    outcome.text = text;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One streaming provider call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn stream_round(
    provider: &dyn ChatProvider,
    messages: &[Message],
    req: &ToolLoopRequest,
    response_format: ResponseFormat,
    tools_disabled: bool,
    emitter: &Emitter,
    cancel: &CancelToken,
    text_acc: &mut String,
) -> Result<RoundOutput> {
    let chat_req = ChatRequest {
        messages: messages.to_vec(),
        tools: if tools_disabled {
            Vec::new()
        } else {
            req.toolset.schemas()
        },
        temperature: req.role.temperature,
        max_tokens: req.role.max_tokens,
        stop: Vec::new(),
        response_format,
        model: Some(req.role.model.clone()),
    };

    // Single retry with back-off for transient transport failures at
    // connect time; mid-stream failures surface directly.
    let mut stream = match provider.chat_stream(&chat_req).await {
        Ok(stream) => stream,
        Err(e) if e.is_transient() => {
            tracing::warn!(stage = req.stage_id, error = %e, "transient provider error, retrying once");
            tokio::time::sleep(RETRY_BACKOFF).await;
            provider.chat_stream(&chat_req).await?
        }
        Err(e) => return Err(e),
    };

    // Tool-call assembly: call_id → (name, args buffer), received order
    // tracked separately.
    let mut bufs: HashMap<String, (String, String)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut completed: HashMap<String, ToolCall> = HashMap::new();
    let mut usage: Option<Usage> = None;
    let mut finish = FinishReason::Stop;

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match item? {
            StreamEvent::TextDelta { text } => {
                match req.delta_mode {
                    DeltaMode::Assistant => {
                        emitter.emit(EventPayload::AssistantDelta { text: text.clone() });
                    }
                    DeltaMode::Thinking => {
                        emitter.emit(EventPayload::DeltaThinking { text: text.clone() });
                    }
                    DeltaMode::Silent => {}
                }
                text_acc.push_str(&text);
            }
            StreamEvent::Thinking { text } => {
                if req.delta_mode != DeltaMode::Silent {
                    emitter.emit(EventPayload::DeltaThinking { text });
                }
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                if !bufs.contains_key(&call_id) {
                    order.push(call_id.clone());
                }
                bufs.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = bufs.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallCompleted { call } => {
                if !bufs.contains_key(&call.call_id) && !completed.contains_key(&call.call_id) {
                    order.push(call.call_id.clone());
                }
                bufs.remove(&call.call_id);
                completed.insert(call.call_id.clone(), call);
            }
            StreamEvent::Finished {
                reason,
                usage: round_usage,
            } => {
                finish = reason;
                if round_usage.is_some() {
                    usage = round_usage;
                }
            }
        }
    }

    // Finalize buffered calls in received order.
    let mut tool_calls = Vec::with_capacity(order.len());
    for call_id in order {
        if let Some(call) = completed.remove(&call_id) {
            tool_calls.push(call);
        } else if let Some((tool_name, args)) = bufs.remove(&call_id) {
            let args_json = if args.trim().is_empty() {
                "{}".to_string()
            } else {
                args
            };
            tool_calls.push(ToolCall {
                call_id,
                tool_name,
                args_json,
            });
        }
    }

    Ok(RoundOutput {
        tool_calls,
        usage,
        finish,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct ToolExecOutcome {
    pub result_string: String,
    pub ok: bool,
    pub issue: Option<String>,
    pub evidence: Option<EvidencePacket>,
}

fn error_result(kind: ToolErrorKind, message: impl Into<String>) -> (String, ToolError) {
    let error = ToolError {
        kind,
        message: message.into(),
    };
    let body = serde_json::json!({ "ok": false, "error": &error });
    (body.to_string(), error)
}

/// Parse a model-emitted argument payload. Guards against double
/// encoding: a JSON string that itself parses to JSON is unwrapped once.
fn parse_args(raw: &str) -> std::result::Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let parsed: Value =
        serde_json::from_str(trimmed).map_err(|e| format!("arguments are not JSON: {e}"))?;
    let parsed = match parsed {
        Value::String(inner) => {
            serde_json::from_str(&inner).map_err(|e| format!("double-encoded arguments: {e}"))?
        }
        v => v,
    };
    match parsed {
        Value::Object(_) => Ok(parsed),
        other => Err(format!("arguments must be an object, got {other}")),
    }
}

/// Run one tool call end to end: firewall check, bounded execution,
/// validation, result normalisation, and the `tool_call` / `tool_result`
/// event pair.
pub(crate) async fn execute_tool(
    tc: &ToolCall,
    toolset: &Toolset,
    resources: &Arc<ToolResources>,
    emitter: &Emitter,
    stage_id: &str,
    limits: &Limits,
) -> ToolExecOutcome {
    let parsed = parse_args(&tc.args_json);
    let digest = match &parsed {
        Ok(args) => args_digest(args),
        Err(_) => raw_digest(&tc.args_json),
    };

    emitter.emit(EventPayload::ToolCall {
        stage_id: stage_id.to_string(),
        name: tc.tool_name.clone(),
        id: tc.call_id.clone(),
        args_digest: digest.clone(),
    });

    let started = Instant::now();
    let (result_string, ok, error, value) = match parsed {
        Err(message) => {
            let (body, err) = error_result(ToolErrorKind::BadArgs, message);
            (body, false, Some(err), None)
        }
        Ok(args) => match toolset.get(&tc.tool_name) {
            None => {
                let (body, err) = error_result(
                    ToolErrorKind::Forbidden,
                    format!("tool \"{}\" is not in this stage's toolset", tc.tool_name),
                );
                (body, false, Some(err), None)
            }
            Some(entry) => {
                let deadline =
                    Duration::from_millis(entry.deadline_ms.unwrap_or(limits.tool_deadline_ms));
                let handler = entry.handler.clone();
                let res = resources.clone();
                let call_args = args.clone();
                // Spawned so a panicking handler is contained.
                let handle =
                    tokio::spawn(async move { handler.call(&call_args, &res).await });

                match tokio::time::timeout(deadline, handle).await {
                    Err(_) => {
                        let (body, err) = error_result(
                            ToolErrorKind::Timeout,
                            format!("tool \"{}\" exceeded {}ms", tc.tool_name, deadline.as_millis()),
                        );
                        (body, false, Some(err), None)
                    }
                    Ok(Err(join_err)) => {
                        let (body, err) = error_result(
                            ToolErrorKind::Handler,
                            format!("handler aborted: {join_err}"),
                        );
                        (body, false, Some(err), None)
                    }
                    Ok(Ok(Err(e))) => {
                        let (body, err) =
                            error_result(ToolErrorKind::Handler, e.to_string());
                        (body, false, Some(err), None)
                    }
                    Ok(Ok(Ok(result))) => {
                        if let Some(validator) = entry.validator {
                            if let Err(message) = validator(&result) {
                                let (body, err) =
                                    error_result(ToolErrorKind::InvalidResult, message);
                                (body, false, Some(err), None)
                            } else {
                                (normalise_result(&result), true, None, Some(result))
                            }
                        } else {
                            (normalise_result(&result), true, None, Some(result))
                        }
                    }
                }
            }
        },
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    emitter.emit(EventPayload::ToolResult {
        stage_id: stage_id.to_string(),
        name: tc.tool_name.clone(),
        id: tc.call_id.clone(),
        ok,
        duration_ms,
        bytes: result_string.len() as u64,
        error: error.clone(),
    });

    let issue = error.as_ref().and_then(|e| match e.kind {
        ToolErrorKind::Forbidden => Some(format!("tool_forbidden:{}", tc.tool_name)),
        ToolErrorKind::Timeout => Some(format!("tool_timeout:{}", tc.tool_name)),
        _ => None,
    });

    let evidence = match (&value, ok) {
        (Some(v), true) => evidence_from(&tc.tool_name, &digest, v),
        _ => None,
    };

    ToolExecOutcome {
        result_string,
        ok,
        issue,
        evidence,
    }
}

/// Strings pass through; everything else serialises as canonical JSON.
fn normalise_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_plain_object() {
        let v = parse_args(r#"{"query": "trip"}"#).unwrap();
        assert_eq!(v["query"], "trip");
    }

    #[test]
    fn parse_args_empty_defaults_to_object() {
        assert_eq!(parse_args(""), Ok(Value::Object(Default::default())));
        assert_eq!(parse_args("  "), Ok(Value::Object(Default::default())));
    }

    #[test]
    fn parse_args_double_encoded_unwraps_once() {
        let raw = r#""{\"k\": 3}""#;
        let v = parse_args(raw).unwrap();
        assert_eq!(v["k"], 3);
    }

    #[test]
    fn parse_args_non_object_rejected() {
        assert!(parse_args("[1,2]").is_err());
        assert!(parse_args("42").is_err());
        assert!(parse_args("not json").is_err());
    }

    #[test]
    fn error_result_wire_shape() {
        let (body, err) = error_result(ToolErrorKind::Forbidden, "nope");
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "forbidden");
        assert_eq!(err.kind, ToolErrorKind::Forbidden);
    }

    #[test]
    fn normalise_string_passthrough() {
        assert_eq!(normalise_result(&Value::String("plain".into())), "plain");
        assert_eq!(
            normalise_result(&serde_json::json!({"a": 1})),
            r#"{"a":1}"#
        );
    }
}
