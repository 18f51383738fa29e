//! Scripted backend for orchestrator tests.

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, Usage,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// One canned model turn.
pub(crate) enum Script {
    Reply(Message),
    Fail(ModelError),
    /// Never answer; only cancellation ends the call.
    Hang,
    /// Answer once the notify fires.
    After(Arc<Notify>, Message),
}

/// Replays canned turns in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }
}

impl Backend for ScriptedBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.messages.to_vec());
        let next = self.script.lock().pop_front();

        let message = match next {
            Some(Script::Reply(message)) => message,
            Some(Script::Fail(e)) => return Err(e),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::After(notify, message)) => {
                notify.notified().await;
                message
            }
            None => return Err(ModelError::Api("script exhausted".into())),
        };
        Ok(ModelResponse {
            message,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}

pub(crate) fn text(text: &str) -> Script {
    Script::Reply(Message::assistant(text))
}

pub(crate) fn tool_call(id: &str, name: &str, input: Value) -> Script {
    Script::Reply(call_message(id, name, input))
}

pub(crate) fn call_message(id: &str, name: &str, input: Value) -> Message {
    Message {
        role: Role::Assistant,
        parts: vec![Part::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        })],
    }
}
