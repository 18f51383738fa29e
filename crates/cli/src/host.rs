//! Wires the policy resolver, the orchestrator and the state bus together.

use crate::error::Result;
use bus::{StateBus, Topic};
use parking_lot::RwLock;
use policy::{GroupReport, Policy, Resolver};
use runtime::{
    Backend, Message, ModelHandle, Orchestrator, SessionEnd, SessionEvent, ToolDescriptor,
    ToolRegistry,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::SessionId;
use tracing::{debug, info};

/// Value of the `tools/status` topic.
#[derive(Debug, Serialize)]
struct ToolStatusView {
    groups: Vec<GroupReport>,
}

/// Value of the `session/active` topic.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSessionView {
    session_id: Option<String>,
}

/// Value of a `sessions/<id>` topic.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    id: String,
    status: String,
    steps: usize,
    model_calls: usize,
    input_tokens: u32,
    output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl SessionView {
    fn running(id: SessionId) -> Self {
        Self {
            id: id.to_string(),
            status: "running".into(),
            steps: 0,
            model_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
            reason: None,
        }
    }

    fn ended(id: SessionId, end: &std::result::Result<SessionEnd, runtime::Error>) -> Self {
        let mut view = Self::running(id);
        match end {
            Ok(end) => {
                view.status = end.status().to_string();
                if let Some(summary) = end.summary() {
                    view.steps = summary.steps;
                    view.model_calls = summary.model_calls;
                    view.input_tokens = summary.usage.input_tokens;
                    view.output_tokens = summary.usage.output_tokens;
                }
                if let SessionEnd::Cancelled { reason } = end {
                    view.reason = Some(reason.clone());
                }
            }
            Err(e) => {
                view.status = storage::EndStatus::Failed.to_string();
                view.reason = Some(e.to_string());
            }
        }
        view
    }
}

/// Owns everything a session needs and keeps the bus informed.
pub struct Host<B> {
    model: ModelHandle<B>,
    custom_instructions: String,
    registry: RwLock<ToolRegistry>,
    policy: RwLock<Policy>,
    orchestrator: Orchestrator,
    bus: Arc<StateBus>,
}

impl<B: Backend + 'static> Host<B> {
    pub fn new(
        model: ModelHandle<B>,
        custom_instructions: impl Into<String>,
        registry: ToolRegistry,
        policy: Policy,
        orchestrator: Orchestrator,
        bus: Arc<StateBus>,
    ) -> Self {
        Self {
            model,
            custom_instructions: custom_instructions.into(),
            registry: RwLock::new(registry),
            policy: RwLock::new(policy),
            orchestrator,
            bus,
        }
    }

    pub fn bus(&self) -> &StateBus {
        &self.bus
    }

    /// Every registered tool, grouped and resolved against the current policy.
    pub fn status_report(&self) -> Vec<GroupReport> {
        let policy = self.policy.read();
        let registry = self.registry.read();
        Resolver::new(&policy).compute_status_report(registry.iter())
    }

    /// The tools a session started now would see.
    pub fn effective_tools(&self) -> BTreeMap<String, ToolDescriptor> {
        let policy = self.policy.read();
        let tools = self.registry.read().list_all();
        Resolver::new(&policy).prepare_effective_set(tools)
    }

    pub async fn publish_tool_status(&self) {
        let outcome = self
            .bus
            .publish(&Topic::tool_status(), || async {
                Ok::<_, std::convert::Infallible>(ToolStatusView {
                    groups: self.status_report(),
                })
            })
            .await;
        debug!(?outcome, "tool status published");
    }

    /// Apply a policy mutation; republishes the tool status if it changed
    /// anything.
    pub async fn update_policy(&self, mutate: impl FnOnce(&mut Policy) -> bool) -> bool {
        let changed = mutate(&mut self.policy.write());
        if changed {
            info!("tool policy changed");
            self.publish_tool_status().await;
        }
        changed
    }

    /// Replace a source's tools after rediscovery.
    pub async fn set_source_tools(&self, source: &str, tools: Vec<ToolDescriptor>) {
        self.registry.write().set_source_tools(source, tools);
        self.publish_tool_status().await;
    }

    /// Run one session to completion, handing each event to `on_event`.
    ///
    /// Session state goes out on `sessions/<id>` and `session/active`, text
    /// deltas on `session-output/<id>`.
    pub async fn run_session(
        &self,
        id: SessionId,
        history: Vec<Message>,
        mut on_event: impl FnMut(&SessionEvent),
    ) -> Result<SessionEnd> {
        let mut handle = self
            .orchestrator
            .start_session(
                id,
                self.model.clone(),
                history,
                &self.custom_instructions,
                self.effective_tools(),
            )
            .await?;

        let session_topic = Topic::session(id.to_string());
        let output_topic = Topic::session_output(id.to_string());
        self.publish_active_session().await;
        self.bus
            .publish_value(&session_topic, SessionView::running(id))
            .await;

        while let Some(event) = handle.next_event().await {
            if let SessionEvent::TextDelta(delta) = &event {
                self.bus.publish_value(&output_topic, delta).await;
            }
            on_event(&event);
        }

        let end = handle.wait().await;
        self.bus
            .publish_value(&session_topic, SessionView::ended(id, &end))
            .await;
        self.publish_active_session().await;
        Ok(end?)
    }

    /// Cancel whatever session is running.
    pub fn abort_active(&self, reason: &str) -> bool {
        self.orchestrator.abort_active(reason)
    }

    async fn publish_active_session(&self) {
        let view = ActiveSessionView {
            session_id: self.orchestrator.active_session().map(|id| id.to_string()),
        };
        self.bus.publish_value(&Topic::active_session(), view).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::{OutboundMessage, UpdateData, apply_patch};
    use parking_lot::Mutex;
    use policy::{Status, ToolStatus};
    use pretty_assertions::assert_eq;
    use runtime::tools::builtin;
    use runtime::{ModelError, ModelRequest, ModelResponse, Part, Role, Usage};
    use serde_json::{Value, json};

    /// Replies with the last user message.
    struct Echo;

    impl Backend for Echo {
        async fn call(&self, request: ModelRequest<'_>) -> std::result::Result<ModelResponse, ModelError> {
            let last = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(Message::text)
                .unwrap_or_default();
            Ok(ModelResponse {
                message: Message {
                    role: Role::Assistant,
                    parts: vec![Part::Text(format!("echo: {last}"))],
                },
                usage: Usage {
                    input_tokens: 4,
                    output_tokens: 2,
                },
            })
        }
    }

    fn host() -> (Host<Echo>, Arc<Mutex<Vec<OutboundMessage>>>) {
        let mut registry = ToolRegistry::new();
        builtin::register_all(&mut registry);

        let bus = Arc::new(StateBus::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        bus.set_transport(Arc::new(move |message: OutboundMessage| {
            sink.lock().push(message);
        }))
        .unwrap();

        let host = Host::new(
            ModelHandle::new("test", "echo-1", Echo),
            "Be brief.",
            registry,
            Policy::default(),
            Orchestrator::default(),
            bus,
        );
        (host, sent)
    }

    fn taken(sent: &Mutex<Vec<OutboundMessage>>, topic: &Topic) -> Vec<UpdateData> {
        sent.lock()
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::PushUpdate(update) if &update.topic == topic => {
                    Some(update.data.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Rebuild a diffed topic's value from the patches sent so far.
    fn mirror(sent: &Mutex<Vec<OutboundMessage>>, topic: &Topic, empty: Value) -> Value {
        taken(sent, topic)
            .into_iter()
            .fold(empty, |mut value, data| match data {
                UpdateData::Patch(ops) => {
                    apply_patch(&mut value, &ops).unwrap();
                    value
                }
                UpdateData::Full(full) => full,
            })
    }

    #[test]
    fn report_lists_builtin_categories() {
        let (host, _) = host();
        let report = host.status_report();
        let groups: Vec<_> = report.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(groups, vec!["filesystem", "system"]);
        assert_eq!(host.effective_tools().len(), 3);
    }

    #[tokio::test]
    async fn policy_change_republishes_status() {
        let (host, sent) = host();
        host.bus().subscribe(Topic::tool_status());
        host.publish_tool_status().await;

        let changed = host
            .update_policy(|policy| policy.set_category_status(builtin::FILESYSTEM, Status::Disabled))
            .await;
        assert!(changed);
        assert_eq!(
            host.effective_tools().keys().collect::<Vec<_>>(),
            vec!["current_time"]
        );

        let status = mirror(&sent, &Topic::tool_status(), json!({}));
        assert_eq!(status["groups"][0]["id"], "filesystem");
        assert_eq!(status["groups"][0]["status"], "disabled");
        assert_eq!(
            status["groups"][0]["tools"][0]["resolvedStatus"],
            "disabled"
        );
    }

    #[tokio::test]
    async fn unchanged_policy_publishes_nothing() {
        let (host, sent) = host();
        host.bus().subscribe(Topic::tool_status());
        host.publish_tool_status().await;
        let before = sent.lock().len();

        let changed = host
            .update_policy(|policy| policy.set_tool_status("read_file", ToolStatus::Inherited))
            .await;
        assert!(!changed);
        assert_eq!(sent.lock().len(), before);
    }

    #[tokio::test]
    async fn session_state_and_output_are_published() {
        let (host, sent) = host();
        let id = SessionId::new();
        host.bus().subscribe(Topic::active_session());
        host.bus().subscribe(Topic::session(id.to_string()));
        host.bus().subscribe(Topic::session_output(id.to_string()));

        let mut deltas = Vec::new();
        let end = host
            .run_session(id, vec![Message::user("hi")], |event| {
                if let SessionEvent::TextDelta(delta) = event {
                    deltas.push(delta.clone());
                }
            })
            .await
            .unwrap();

        assert!(matches!(end, SessionEnd::Finished(_)));
        assert_eq!(deltas, vec!["echo: hi".to_string()]);
        assert_eq!(
            taken(&sent, &Topic::session_output(id.to_string())),
            vec![UpdateData::Full(json!("echo: hi"))]
        );

        let session = mirror(&sent, &Topic::session(id.to_string()), json!({}));
        assert_eq!(session["status"], "finished");
        assert_eq!(session["steps"], 1);
        assert_eq!(session["outputTokens"], 2);

        let active = mirror(&sent, &Topic::active_session(), json!({}));
        assert_eq!(active, json!({"sessionId": null}));
        assert_eq!(taken(&sent, &Topic::active_session()).len(), 2);
    }

    #[tokio::test]
    async fn unsubscribed_topics_stay_silent() {
        let (host, sent) = host();
        host.run_session(SessionId::new(), vec![Message::user("hi")], |_| {})
            .await
            .unwrap();
        assert!(sent.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let (host, _) = host();
        let err = host
            .run_session(SessionId::new(), Vec::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Runtime(runtime::Error::PreconditionFailed(_))
        ));
    }

    #[test]
    fn abort_without_session_reports_nothing_active() {
        let (host, _) = host();
        assert!(!host.abort_active("interrupted"));
    }
}
