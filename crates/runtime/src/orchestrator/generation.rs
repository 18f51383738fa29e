//! The generation loop of a single session.

use super::session::{SessionEvent, SessionSummary};
use crate::model::{
    Backend, Message, ModelError, ModelRequest, Part, Role, StreamEvent, ToolCall, ToolResult,
    ToolSpec, Usage,
};
use crate::tools::{ToolDescriptor, ToolError, ToolOutcome};
use crate::Result;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::{Event, EventKind, EventStore, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a generation run stopped, before the orchestrator attaches a reason.
#[derive(Debug)]
pub(crate) enum Stop {
    Finished(SessionSummary),
    StepLimit(SessionSummary),
    Cancelled,
}

/// Appends session events to the optional store. Failures are logged only.
#[derive(Clone)]
pub(crate) struct Recorder {
    id: SessionId,
    store: Option<Arc<EventStore>>,
}

impl Recorder {
    pub(crate) fn new(id: SessionId, store: Option<Arc<EventStore>>) -> Self {
        Self { id, store }
    }

    pub(crate) fn record(&self, kind: EventKind) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.append(&Event::new(self.id, kind)) {
            warn!(session_id = %self.id, error = %e, "failed to record session event");
        }
    }

    /// Record the start of a session run.
    ///
    /// The first run of a session records the whole history; later runs
    /// under the same id only record the newest user message.
    pub(crate) fn record_start(&self, history: &[Message]) {
        let Some(store) = &self.store else {
            return;
        };
        let seen = store.contains(self.id).unwrap_or(false);
        if !seen {
            self.record(EventKind::SessionStart);
        }
        let new_messages = if seen {
            history
                .last()
                .filter(|m| m.role == Role::User)
                .map(std::slice::from_ref)
                .unwrap_or_default()
        } else {
            history
        };
        for message in new_messages {
            self.record_message(message);
        }
    }

    fn record_message(&self, message: &Message) {
        let content = message.text();
        if message.role != Role::Tool && !content.is_empty() {
            self.record(EventKind::Message {
                role: message.role,
                content,
            });
        }
    }
}

enum Turn {
    Complete(Message),
    Cancelled,
}

pub(crate) struct Generation<B> {
    pub(crate) id: SessionId,
    pub(crate) backend: Arc<B>,
    pub(crate) tools: BTreeMap<String, ToolDescriptor>,
    pub(crate) history: Vec<Message>,
    pub(crate) max_steps: usize,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) recorder: Recorder,
}

struct Counters {
    usage: Usage,
    steps: usize,
    model_calls: usize,
}

impl<B: Backend> Generation<B> {
    pub(crate) async fn run(mut self) -> Result<Stop> {
        let specs: Vec<ToolSpec> = self.tools.values().map(ToolDescriptor::spec).collect();
        let mut counters = Counters {
            usage: Usage::default(),
            steps: 0,
            model_calls: 0,
        };

        self.recorder.record_start(&self.history);

        loop {
            if counters.steps >= self.max_steps {
                info!(session_id = %self.id, steps = counters.steps, "step budget exhausted");
                return Ok(Stop::StepLimit(self.summary(counters)));
            }
            counters.steps += 1;
            counters.model_calls += 1;

            let mut message = match self.stream_turn(&specs, &mut counters.usage).await? {
                Turn::Complete(message) => message,
                Turn::Cancelled => return Ok(Stop::Cancelled),
            };

            let calls = message.tool_calls();
            let _ = self.events.send(SessionEvent::StepFinished {
                step: counters.steps,
                usage: counters.usage,
            });

            if calls.is_empty() {
                self.recorder.record_message(&message);
                self.history.push(message);
                return Ok(Stop::Finished(self.summary(counters)));
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let Some((call, result)) =
                    self.run_tool(call, &message, &specs, &mut counters).await
                else {
                    return Ok(Stop::Cancelled);
                };
                substitute_call(&mut message, call);
                results.push(result);
            }

            self.recorder.record_message(&message);
            self.history.push(message);
            self.history.push(Message::tool_results(results));
        }
    }

    fn summary(self, counters: Counters) -> SessionSummary {
        SessionSummary {
            history: self.history,
            usage: counters.usage,
            steps: counters.steps,
            model_calls: counters.model_calls,
        }
    }

    /// Stream one model turn, forwarding deltas as they arrive.
    async fn stream_turn(&self, specs: &[ToolSpec], usage: &mut Usage) -> Result<Turn> {
        let mut stream = self.backend.stream(ModelRequest {
            messages: &self.history,
            tools: specs,
        });

        let mut text = String::new();
        let mut calls = Vec::new();

        loop {
            // biased: prefer cancellation when both a stream event and cancel are ready
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(Turn::Cancelled),
                event = stream.next() => event,
            };

            match event {
                None => return Err(ModelError::Truncated.into()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    text.push_str(&delta);
                    let _ = self.events.send(SessionEvent::TextDelta(delta));
                }
                Some(Ok(StreamEvent::ToolCall(call))) => {
                    let _ = self.events.send(SessionEvent::ToolCall(call.clone()));
                    calls.push(call);
                }
                Some(Ok(StreamEvent::Done { usage: turn })) => {
                    *usage += turn;
                    break;
                }
            }
        }

        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        parts.extend(calls.into_iter().map(Part::ToolCall));
        Ok(Turn::Complete(Message {
            role: Role::Assistant,
            parts,
        }))
    }

    /// Validate, repair if needed, and execute one call.
    ///
    /// Returns the call as finally executed with its result, or `None` if
    /// the session was cancelled meanwhile.
    async fn run_tool(
        &self,
        call: ToolCall,
        turn: &Message,
        specs: &[ToolSpec],
        counters: &mut Counters,
    ) -> Option<(ToolCall, ToolResult)> {
        self.recorder.record(EventKind::ToolCall {
            name: call.name.clone(),
            input: call.input.clone(),
        });

        let Some(tool) = self.tools.get(&call.name) else {
            let result = ToolResult::new(
                &call.id,
                ToolOutcome::Error(ToolError::NotFound(call.name.clone()).to_string()),
            );
            return Some(self.finish_tool(call, result));
        };

        let call = match tool.validate(&call.input) {
            Ok(()) => call,
            Err(error) => {
                let prefix = turn_prefix(turn);
                match self.repair(&call, tool, &error, prefix, specs, counters).await {
                    Repair::Repaired(call) => call,
                    Repair::Failed(reason) => {
                        let result = ToolResult::new(&call.id, ToolOutcome::Error(reason));
                        return Some(self.finish_tool(call, result));
                    }
                    Repair::Cancelled => return None,
                }
            }
        };

        debug!(session_id = %self.id, tool = %call.name, "executing tool");
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            outcome = tool.execute(call.input.clone()) => outcome,
        };
        let result = ToolResult::new(&call.id, outcome);
        Some(self.finish_tool(call, result))
    }

    fn finish_tool(&self, call: ToolCall, result: ToolResult) -> (ToolCall, ToolResult) {
        let output = match &result {
            ToolResult::Success { output, .. } => output.clone(),
            ToolResult::Failure { error, .. } => serde_json::Value::String(error.clone()),
        };
        self.recorder.record(EventKind::ToolResult {
            name: call.name.clone(),
            output,
            is_error: result.is_error(),
        });
        let _ = self.events.send(SessionEvent::ToolResult {
            name: call.name.clone(),
            result: result.clone(),
        });
        (call, result)
    }

    /// One non-streaming request asking the model to fix a call's arguments.
    ///
    /// Replays the history, the assistant turn's text with only this call,
    /// and a tool result carrying the validation error. Never retried.
    async fn repair(
        &self,
        call: &ToolCall,
        tool: &ToolDescriptor,
        error: &ToolError,
        prefix: Vec<Part>,
        specs: &[ToolSpec],
        counters: &mut Counters,
    ) -> Repair {
        info!(session_id = %self.id, tool = %call.name, %error, "attempting tool call repair");

        let mut assistant = prefix;
        assistant.push(Part::ToolCall(call.clone()));
        let mut messages = self.history.clone();
        messages.push(Message {
            role: Role::Assistant,
            parts: assistant,
        });
        messages.push(Message::tool_results(vec![ToolResult::Failure {
            tool_call_id: call.id.clone(),
            error: format!("{error}. Call {} again with corrected arguments.", call.name),
        }]));

        counters.model_calls += 1;
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Repair::Cancelled,
            response = self.backend.call(ModelRequest { messages: &messages, tools: specs }) => response,
        };

        let outcome = match response {
            Ok(response) => {
                counters.usage += response.usage;
                match response
                    .message
                    .tool_calls()
                    .into_iter()
                    .find(|candidate| candidate.name == call.name)
                {
                    Some(candidate) => {
                        let repaired = ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: candidate.input,
                        };
                        match tool.validate(&repaired.input) {
                            Ok(()) => Repair::Repaired(repaired),
                            Err(e) => Repair::Failed(format!("{e} (after repair)")),
                        }
                    }
                    None => Repair::Failed(format!("{error} (repair returned no call)")),
                }
            }
            Err(e) => Repair::Failed(format!("{error} (repair failed: {e})")),
        };

        let repaired = matches!(outcome, Repair::Repaired(_));
        if repaired {
            info!(session_id = %self.id, tool = %call.name, "tool call repaired");
        } else {
            warn!(session_id = %self.id, tool = %call.name, "tool call repair failed");
        }
        self.recorder.record(EventKind::ToolRepair {
            name: call.name.clone(),
            repaired,
        });
        let _ = self.events.send(SessionEvent::ToolRepair {
            name: call.name.clone(),
            repaired,
        });
        outcome
    }
}

enum Repair {
    Repaired(ToolCall),
    Failed(String),
    Cancelled,
}

/// Text parts of an assistant turn, without its tool calls.
fn turn_prefix(turn: &Message) -> Vec<Part> {
    turn.parts
        .iter()
        .filter(|part| matches!(part, Part::Text(_)))
        .cloned()
        .collect()
}

/// Replace the arguments of the call with the same id.
fn substitute_call(message: &mut Message, call: ToolCall) {
    for part in &mut message.parts {
        if let Part::ToolCall(existing) = part {
            if existing.id == call.id {
                *existing = call;
                return;
            }
        }
    }
}
