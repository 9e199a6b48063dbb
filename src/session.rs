//! Chat session controller
//!
//! `SessionController` owns one conversation thread: the committed turns,
//! the streaming accumulator for the reply in flight, and the bookkeeping
//! needed to persist the thread under a session key derived from the
//! agents involved and the document being discussed.
//!
//! Nothing here fails outward. Transport failures become assistant turns,
//! persistence failures are logged, corrupt history is discarded, and
//! precondition violations are reported through the `Notifier`.
//!
//! Replies arrive asynchronously. After `submit`, the host drives the
//! controller with `process_pending` (non-blocking, e.g. once per frame) or
//! `next_signal` / `wait_idle` (async).

use crate::config::SessionConfig;
use crate::message_store::MessageStore;
use crate::notify::{Notifier, TracingNotifier};
use crate::persistence::{KeyValueStorage, PersistenceAdapter};
use crate::streaming::{
    StreamEnvelope, StreamOutcome, StreamSink, StreamState, StreamingAccumulator,
};
use crate::transport::{ChatTransport, SendRequest};
use crate::types::{AgentContext, AgentDescriptor, ChatTurn, Notification, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Content fragment identifying a transition marker
pub const TRANSITION_MARKER: &str = "joined the conversation";

/// Supplies the current document body at send time
pub type DocumentSource = Arc<dyn Fn() -> String + Send + Sync>;

/// The document or context a conversation is about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: Option<String>,
    pub title: String,
}

impl DocumentRef {
    pub fn new(id: Option<&str>, title: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            title: title.into(),
        }
    }
}

/// Result of `activate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivateOutcome {
    /// No agent is selected
    NoAgent,
    /// The thread already had turns; nothing changed
    AlreadyActive,
    /// History was restored from storage (number of turns)
    Restored(usize),
    /// A fresh greeting was seeded
    Greeted,
}

/// Why a submission did not start a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    /// Input was empty or whitespace
    Blank,
    /// A reply is still streaming
    InFlight,
    /// No agent is selected
    NoAgent,
}

/// Result of `submit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The send was dispatched under this generation
    Sent { generation: u64 },
    Rejected(SubmitRejection),
}

impl SubmitOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SubmitOutcome::Sent { .. })
    }
}

/// One exported turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedTurn {
    pub role: Role,
    pub content: String,
    /// ISO-8601 time of the turn
    pub timestamp: String,
    /// Display name of the author
    pub from: String,
}

/// Downloadable snapshot of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptExport {
    pub agent: String,
    pub document: String,
    /// ISO-8601 time of the export
    pub timestamp: String,
    pub messages: Vec<ExportedTurn>,
}

impl TranscriptExport {
    /// Suggested file name: `conversation_<agent>_<YYYY-MM-DD>.json`
    pub fn filename(&self) -> String {
        let date = self.timestamp.split('T').next().unwrap_or_default();
        let agent = self
            .agent
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        format!("conversation_{}_{}.json", agent, date)
    }

    /// Pretty-printed JSON body
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Whether a turn is an agent-joined marker (display only, never sent)
pub fn is_transition_marker(turn: &ChatTurn) -> bool {
    turn.role == Role::Assistant && turn.content.contains(TRANSITION_MARKER)
}

/// Render turns as a flat `Sender: content` transcript, skipping transition markers
pub fn render_transcript(turns: &[ChatTurn], agents: &[AgentDescriptor]) -> String {
    turns
        .iter()
        .filter(|turn| !is_transition_marker(turn))
        .map(|turn| {
            let sender = match (turn.role, turn.agent_id.as_deref()) {
                (Role::Assistant, Some(agent_id)) => agents
                    .iter()
                    .find(|a| a.id == agent_id)
                    .map(|a| a.name.as_str())
                    .unwrap_or("AI"),
                (Role::User, _) => "User",
                _ => "AI",
            };
            format!("{}: {}", sender, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn iso_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Controller for a single mounted chat surface
pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn ChatTransport>,
    notifier: Arc<dyn Notifier>,
    persistence: PersistenceAdapter,
    document: DocumentRef,
    document_source: Option<DocumentSource>,

    agents: Vec<AgentDescriptor>,
    /// Agent the thread started with
    origin_agent: Option<String>,
    /// Agent currently answering
    active_agent: Option<String>,

    store: MessageStore,
    /// Id of the seeded greeting while it is still the first turn
    greeting_id: Option<String>,
    accumulator: StreamingAccumulator,
    signals_tx: mpsc::UnboundedSender<StreamEnvelope>,
    signals_rx: mpsc::UnboundedReceiver<StreamEnvelope>,
    history_saved: bool,
}

impl SessionController {
    /// Create a controller with default configuration
    pub fn new(
        transport: impl ChatTransport + 'static,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        Self::with_config(transport, storage, SessionConfig::default())
    }

    /// Create a controller with explicit configuration
    pub fn with_config(
        transport: impl ChatTransport + 'static,
        storage: Arc<dyn KeyValueStorage>,
        config: SessionConfig,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            persistence: PersistenceAdapter::new(storage, config.namespace.clone()),
            config,
            transport: Arc::new(transport),
            notifier: Arc::new(TracingNotifier),
            document: DocumentRef::default(),
            document_source: None,
            agents: Vec::new(),
            origin_agent: None,
            active_agent: None,
            store: MessageStore::new(),
            greeting_id: None,
            accumulator: StreamingAccumulator::new(),
            signals_tx,
            signals_rx,
            history_saved: false,
        }
    }

    /// Route notifications to `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Scope the session to a document
    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = document;
        self
    }

    /// Read the document body from `source` at every send
    pub fn with_document_source(
        mut self,
        source: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.document_source = Some(Arc::new(source));
        self
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Committed turns, oldest first
    pub fn turns(&self) -> &[ChatTurn] {
        self.store.turns()
    }

    /// Reply currently streaming, for live rendering
    pub fn pending_turn(&self) -> Option<&ChatTurn> {
        self.accumulator.pending()
    }

    pub fn stream_state(&self) -> StreamState {
        self.accumulator.state()
    }

    /// Whether a send is in flight (input should be disabled)
    pub fn is_sending(&self) -> bool {
        self.accumulator.is_busy()
    }

    pub fn agents(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn active_agent_id(&self) -> Option<&str> {
        self.active_agent.as_deref()
    }

    pub fn active_agent(&self) -> Option<&AgentDescriptor> {
        self.active_agent.as_deref().and_then(|id| self.agent(id))
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    /// Whether the current thread has a durable copy
    pub fn history_saved(&self) -> bool {
        self.history_saved
    }

    /// Storage key for the current thread
    ///
    /// Solo threads use the agent's key; once another agent joins, the
    /// key names both the originating and the answering agent.
    pub fn session_key(&self) -> Option<String> {
        let active = self.active_agent.as_deref()?;
        let origin = self.origin_agent.as_deref().unwrap_or(active);
        let secondary = (origin != active).then_some(active);
        Some(
            self.persistence
                .key_for(origin, self.document.id.as_deref(), secondary),
        )
    }

    fn agent(&self, id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.id == id)
    }

    fn agent_name(&self, id: &str) -> String {
        self.agent(id)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| self.config.fallback_agent_name.clone())
    }

    // ─── Agents ──────────────────────────────────────────────────

    /// Replace the agent roster
    ///
    /// When no agent is selected yet, the first one becomes active.
    pub fn set_agents(&mut self, agents: Vec<AgentDescriptor>) {
        self.agents = agents;
        if self.active_agent.is_none() {
            if let Some(first) = self.agents.first() {
                tracing::debug!(agent = %first.id, "Selecting default agent");
                self.active_agent = Some(first.id.clone());
                self.origin_agent = Some(first.id.clone());
            }
        }
    }

    /// Make `agent_id` the answering agent
    ///
    /// With an existing thread, a transition marker is appended and the
    /// thread continues as a group conversation. With an empty thread the
    /// agent is simply swapped. Returns false when `agent_id` is already
    /// active.
    pub fn switch_agent(&mut self, agent_id: &str) -> bool {
        if self.active_agent.as_deref() == Some(agent_id) {
            return false;
        }

        let had_agent = self.active_agent.is_some();
        self.active_agent = Some(agent_id.to_string());

        if had_agent && !self.store.is_empty() {
            let marker = ChatTurn::assistant(
                format!(
                    "*{} {} and will continue responding.*",
                    self.agent_name(agent_id),
                    TRANSITION_MARKER
                ),
                agent_id,
            );
            self.store.append(marker);
            tracing::debug!(agent = %agent_id, "Agent joined conversation");
            self.persist();
        } else {
            self.origin_agent = Some(agent_id.to_string());
            tracing::debug!(agent = %agent_id, "Agent selected");
        }
        true
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    /// Load the thread for the current session key, or greet
    pub fn activate(&mut self) -> ActivateOutcome {
        let Some(agent_id) = self.active_agent.clone() else {
            return ActivateOutcome::NoAgent;
        };
        if !self.store.is_empty() {
            return ActivateOutcome::AlreadyActive;
        }

        if self.config.enable_history {
            if let Some(key) = self.session_key() {
                match self.persistence.load(&key) {
                    Some(turns) if !turns.is_empty() => {
                        let opening = turns
                            .first()
                            .filter(|t| t.role == Role::Assistant)
                            .map(|t| t.id.clone());
                        self.store.replace_all(turns);
                        self.store.retain_last(self.config.max_messages);
                        // A trimmed thread no longer starts with its greeting
                        self.greeting_id = opening
                            .filter(|id| self.store.turns().first().is_some_and(|t| &t.id == id));
                        self.history_saved = true;
                        return ActivateOutcome::Restored(self.store.len());
                    }
                    _ => self.history_saved = false,
                }
            }
        }

        self.seed_greeting(&agent_id);
        ActivateOutcome::Greeted
    }

    fn greeting(&self, agent_id: &str) -> ChatTurn {
        let name = self.agent_name(agent_id);
        let content = if self.document.title.is_empty() {
            format!("Hello! I'm {}. How can I help you?", name)
        } else {
            format!(
                "Hello! I'm {}. How can I help you with \"{}\"?",
                name, self.document.title
            )
        };
        ChatTurn::assistant(content, agent_id)
    }

    fn seed_greeting(&mut self, agent_id: &str) {
        let greeting = self.greeting(agent_id);
        self.greeting_id = Some(greeting.id.clone());
        self.store.replace_all(vec![greeting]);
        self.persist();
    }

    /// Abandon the reply in flight
    ///
    /// Called when the chat surface closes. Signals from the abandoned send
    /// are ignored, including after a quick close-and-reopen.
    pub fn cancel(&mut self) {
        let was_busy = self.accumulator.is_busy();
        self.accumulator.cancel();
        if was_busy {
            self.persist();
        }
    }

    /// Wipe the thread and its durable copy, then greet again
    pub fn clear(&mut self) {
        let Some(agent_id) = self.active_agent.clone() else {
            return;
        };

        self.accumulator.cancel();
        if self.config.enable_history {
            if let Some(key) = self.session_key() {
                self.persistence.clear(&key);
            }
        }
        self.store.clear();
        self.history_saved = false;
        self.origin_agent = Some(agent_id.clone());

        self.seed_greeting(&agent_id);
        self.notifier.notify(Notification::info(
            "History cleared",
            "The conversation was cleared.",
        ));
    }

    // ─── Messaging ───────────────────────────────────────────────

    /// Submit user input and dispatch it to the active agent
    ///
    /// Must be called from within a Tokio runtime; without one the send
    /// fails into an in-thread error turn.
    pub fn submit(&mut self, input: &str) -> SubmitOutcome {
        let Some(agent_id) = self.active_agent.clone() else {
            self.notifier.notify(Notification::error(
                "Attention",
                "Please select an agent.",
            ));
            return SubmitOutcome::Rejected(SubmitRejection::NoAgent);
        };

        let text = input.trim();
        if text.is_empty() {
            return SubmitOutcome::Rejected(SubmitRejection::Blank);
        }
        if self.accumulator.is_busy() {
            tracing::debug!(agent = %agent_id, "Send already in flight, ignoring submit");
            return SubmitOutcome::Rejected(SubmitRejection::InFlight);
        }

        let transcript = render_transcript(self.history(), &self.agents);
        let Some(generation) = self.accumulator.begin(&agent_id) else {
            return SubmitOutcome::Rejected(SubmitRejection::InFlight);
        };
        self.store.append(ChatTurn::user(text));

        let message = if transcript.is_empty() {
            text.to_string()
        } else {
            format!("{}\n\nUser: {}", transcript, text)
        };
        let context = AgentContext {
            document_id: self.document.id.clone(),
            document_title: Some(self.document.title.clone()),
            document_content: self.document_source.as_ref().map(|source| source()),
            fields: Vec::new(),
            chat_history: (!transcript.is_empty()).then_some(transcript),
        };
        let request = SendRequest {
            message,
            context,
            agent_id: agent_id.clone(),
        };

        tracing::debug!(agent = %agent_id, generation, "Dispatching message");
        self.dispatch(request, StreamSink::new(generation, self.signals_tx.clone()));
        SubmitOutcome::Sent { generation }
    }

    /// Committed turns sent as history: everything after the greeting
    fn history(&self) -> &[ChatTurn] {
        let turns = self.store.turns();
        match turns.first() {
            Some(first) if self.greeting_id.as_deref() == Some(first.id.as_str()) => &turns[1..],
            _ => turns,
        }
    }

    fn dispatch(&self, request: SendRequest, sink: StreamSink) {
        let transport = Arc::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.send(request, sink.clone()).await {
                        tracing::warn!(
                            transport = transport.name(),
                            error = %e,
                            "Send failed"
                        );
                        sink.error(e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "No async runtime available for send");
                sink.error(e);
            }
        }
    }

    /// Apply every signal that has already arrived; returns how many were read
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(envelope) = self.signals_rx.try_recv() {
            self.apply(envelope);
            count += 1;
        }
        count
    }

    /// Wait for the next signal and apply it
    pub async fn next_signal(&mut self) -> Option<StreamOutcome> {
        let envelope = self.signals_rx.recv().await?;
        Some(self.apply(envelope))
    }

    /// Apply signals until no send is in flight
    pub async fn wait_idle(&mut self) {
        while self.accumulator.is_busy() {
            if self.next_signal().await.is_none() {
                break;
            }
        }
    }

    fn apply(&mut self, envelope: StreamEnvelope) -> StreamOutcome {
        let outcome = self.accumulator.apply(envelope);
        if let StreamOutcome::Finalized(turn) = &outcome {
            if let Some(turn) = turn {
                self.store.append(turn.clone());
            }
            self.persist();
        }
        outcome
    }

    // ─── Persistence & export ────────────────────────────────────

    /// Save the thread unless a reply is mid-stream
    fn persist(&mut self) {
        if !self.config.enable_history || self.accumulator.is_busy() || self.store.is_empty() {
            return;
        }
        if let Some(key) = self.session_key() {
            self.history_saved = self.persistence.save(&key, self.store.turns());
        }
    }

    /// Structured snapshot of the thread for download
    ///
    /// Returns `None` when no agent is selected or the thread is empty.
    pub fn export_transcript(&self) -> Option<TranscriptExport> {
        let agent_id = self.active_agent.as_deref()?;
        if self.store.is_empty() {
            return None;
        }

        let messages = self
            .store
            .turns()
            .iter()
            .map(|turn| {
                let from = match (turn.role, turn.agent_id.as_deref()) {
                    (Role::Assistant, Some(id)) => self
                        .agent(id)
                        .map(|a| a.name.clone())
                        .unwrap_or_else(|| "assistant".to_string()),
                    (role, _) => role.to_string(),
                };
                ExportedTurn {
                    role: turn.role,
                    content: turn.content.clone(),
                    timestamp: iso_timestamp(turn.timestamp),
                    from,
                }
            })
            .collect();

        Some(TranscriptExport {
            agent: self.agent_name(agent_id),
            document: self.document.title.clone(),
            timestamp: iso_timestamp(crate::types::now_millis()),
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::persistence::MemoryStorage;
    use crate::transport::{ScriptedReply, ScriptedTransport};
    use crate::types::NotificationVariant;

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("ana", "Ana"),
            AgentDescriptor::new("bob", "Bob Builder"),
        ]
    }

    fn controller(
        transport: ScriptedTransport,
    ) -> (SessionController, Arc<MemoryStorage>, Arc<MemoryNotifier>) {
        let storage = Arc::new(MemoryStorage::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let mut ctrl = SessionController::new(transport, storage.clone())
            .with_notifier(notifier.clone())
            .with_document(DocumentRef::new(Some("42"), "Doc1"));
        ctrl.set_agents(agents());
        (ctrl, storage, notifier)
    }

    #[test]
    fn test_default_agent_selected() {
        let (ctrl, _, _) = controller(ScriptedTransport::new());
        assert_eq!(ctrl.active_agent_id(), Some("ana"));
        assert_eq!(ctrl.active_agent().unwrap().name, "Ana");
    }

    #[test]
    fn test_activate_greets_empty_session() {
        let (mut ctrl, storage, _) = controller(ScriptedTransport::new());
        assert_eq!(ctrl.activate(), ActivateOutcome::Greeted);

        assert_eq!(ctrl.turns().len(), 1);
        let greeting = &ctrl.turns()[0];
        assert_eq!(greeting.role, Role::Assistant);
        assert!(greeting.content.contains("Ana"));
        assert!(greeting.content.contains("Doc1"));
        assert!(storage.contains("agent_chat_history_ana_42"));
        assert!(ctrl.history_saved());

        assert_eq!(ctrl.activate(), ActivateOutcome::AlreadyActive);
    }

    #[test]
    fn test_activate_without_agent() {
        let storage = Arc::new(MemoryStorage::new());
        let mut ctrl = SessionController::new(ScriptedTransport::new(), storage);
        assert_eq!(ctrl.activate(), ActivateOutcome::NoAgent);
        assert!(ctrl.turns().is_empty());
        assert!(ctrl.session_key().is_none());
    }

    #[test]
    fn test_activate_restores_and_limits_history() {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = PersistenceAdapter::new(storage.clone(), "agent_chat_history");
        let turns: Vec<ChatTurn> = (0..5).map(|i| ChatTurn::user(format!("m{}", i))).collect();
        adapter.save("agent_chat_history_ana_42", &turns);

        let config = SessionConfig {
            max_messages: 3,
            ..Default::default()
        };
        let mut ctrl = SessionController::with_config(ScriptedTransport::new(), storage, config)
            .with_document(DocumentRef::new(Some("42"), "Doc1"));
        ctrl.set_agents(agents());

        assert_eq!(ctrl.activate(), ActivateOutcome::Restored(3));
        assert_eq!(ctrl.turns()[0].content, "m2");
        assert!(ctrl.history_saved());
    }

    #[test]
    fn test_activate_ignores_history_when_disabled() {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = PersistenceAdapter::new(storage.clone(), "agent_chat_history");
        adapter.save("agent_chat_history_ana_none", &[ChatTurn::user("old")]);

        let config = SessionConfig::default().without_history();
        let mut ctrl =
            SessionController::with_config(ScriptedTransport::new(), storage.clone(), config);
        ctrl.set_agents(agents());

        assert_eq!(ctrl.activate(), ActivateOutcome::Greeted);
        assert_eq!(storage.len(), 1);
        assert!(!ctrl.history_saved());
    }

    #[test]
    fn test_switch_agent_inserts_marker() {
        let (mut ctrl, storage, _) = controller(ScriptedTransport::new());
        ctrl.activate();
        let before = ctrl.turns().to_vec();

        assert!(ctrl.switch_agent("bob"));
        assert_eq!(ctrl.turns().len(), before.len() + 1);
        assert_eq!(&ctrl.turns()[..before.len()], before.as_slice());

        let marker = ctrl.turns().last().unwrap();
        assert!(is_transition_marker(marker));
        assert!(marker.content.contains("Bob Builder"));
        assert_eq!(marker.agent_id.as_deref(), Some("bob"));

        assert_eq!(
            ctrl.session_key().as_deref(),
            Some("agent_chat_history_ana_bob_42")
        );
        assert!(storage.contains("agent_chat_history_ana_bob_42"));
    }

    #[test]
    fn test_switch_to_same_agent_is_noop() {
        let (mut ctrl, _, _) = controller(ScriptedTransport::new());
        ctrl.activate();
        assert!(!ctrl.switch_agent("ana"));
        assert_eq!(ctrl.turns().len(), 1);
    }

    #[test]
    fn test_switch_agent_on_empty_thread_swaps() {
        let (mut ctrl, _, _) = controller(ScriptedTransport::new());
        assert!(ctrl.switch_agent("bob"));
        assert!(ctrl.turns().is_empty());
        assert_eq!(
            ctrl.session_key().as_deref(),
            Some("agent_chat_history_bob_42")
        );
    }

    #[test]
    fn test_submit_without_agent_notifies() {
        let storage = Arc::new(MemoryStorage::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let mut ctrl = SessionController::new(ScriptedTransport::new(), storage)
            .with_notifier(notifier.clone());

        assert_eq!(
            ctrl.submit("Hello"),
            SubmitOutcome::Rejected(SubmitRejection::NoAgent)
        );
        assert!(ctrl.turns().is_empty());
        assert_eq!(
            notifier.last().unwrap().variant,
            NotificationVariant::Destructive
        );
    }

    #[test]
    fn test_submit_blank_is_rejected() {
        let (mut ctrl, _, notifier) = controller(ScriptedTransport::new());
        ctrl.activate();
        assert_eq!(
            ctrl.submit("   "),
            SubmitOutcome::Rejected(SubmitRejection::Blank)
        );
        assert_eq!(ctrl.turns().len(), 1);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_submit_outside_runtime_becomes_error_turn() {
        let (mut ctrl, _, _) = controller(ScriptedTransport::new());
        ctrl.activate();
        assert!(ctrl.submit("Hello").is_sent());
        assert_eq!(ctrl.process_pending(), 1);

        assert!(!ctrl.is_sending());
        let last = ctrl.turns().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.starts_with("Sorry, an error occurred"));
    }

    #[tokio::test]
    async fn test_submit_streams_reply() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::chunks(["Hi", " there"])]);
        let (mut ctrl, _, _) = controller(transport.clone());
        ctrl.activate();

        assert!(ctrl.submit("Hello").is_sent());
        assert!(ctrl.is_sending());
        assert_eq!(ctrl.turns().last().unwrap().content, "Hello");
        ctrl.wait_idle().await;

        let turns = ctrl.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].content, "Hello");
        assert_eq!(turns[2].role, Role::Assistant);
        assert_eq!(turns[2].content, "Hi there");
        assert_eq!(turns[2].agent_id.as_deref(), Some("ana"));

        let requests = transport.requests().await;
        assert_eq!(requests[0].message, "Hello");
        assert_eq!(requests[0].agent_id, "ana");
        assert_eq!(requests[0].context.document_title.as_deref(), Some("Doc1"));
        assert!(requests[0].context.chat_history.is_none());
    }

    #[tokio::test]
    async fn test_submit_error_becomes_turn() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::Fail(
            vec!["partial".to_string()],
            "boom".to_string(),
        )]);
        let (mut ctrl, _, _) = controller(transport);
        ctrl.activate();

        ctrl.submit("Hello");
        ctrl.wait_idle().await;

        let last = ctrl.turns().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("boom"));
        assert!(!last.content.contains("partial"));
    }

    #[tokio::test]
    async fn test_rejected_send_becomes_turn() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::Reject("offline".into())]);
        let (mut ctrl, _, _) = controller(transport);
        ctrl.activate();

        ctrl.submit("Hello");
        ctrl.wait_idle().await;
        assert!(ctrl.turns().last().unwrap().content.contains("offline"));
    }

    #[tokio::test]
    async fn test_second_submit_while_in_flight_is_ignored() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::chunks(["ok"])]);
        let (mut ctrl, _, _) = controller(transport.clone());
        ctrl.activate();

        assert!(ctrl.submit("first").is_sent());
        assert_eq!(
            ctrl.submit("second"),
            SubmitOutcome::Rejected(SubmitRejection::InFlight)
        );
        ctrl.wait_idle().await;

        assert_eq!(transport.call_count().await, 1);
        let users: Vec<_> = ctrl
            .turns()
            .iter()
            .filter(|t| t.role == Role::User)
            .collect();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].content, "first");
    }

    #[tokio::test]
    async fn test_transcript_sent_with_history() {
        let transport = ScriptedTransport::with_replies([
            ScriptedReply::chunks(["First answer"]),
            ScriptedReply::chunks(["Second answer"]),
        ]);
        let (mut ctrl, _, _) = controller(transport.clone());
        ctrl.activate();

        ctrl.submit("One");
        ctrl.wait_idle().await;
        ctrl.switch_agent("bob");
        ctrl.submit("Two");
        ctrl.wait_idle().await;

        let requests = transport.requests().await;
        assert_eq!(
            requests[1].context.chat_history.as_deref(),
            Some("User: One\n\nAna: First answer")
        );
        assert_eq!(
            requests[1].message,
            "User: One\n\nAna: First answer\n\nUser: Two"
        );
        assert_eq!(requests[1].agent_id, "bob");
        assert_eq!(ctrl.turns().last().unwrap().agent_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_cancel_ignores_late_signals() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::chunks(["late reply"])]);
        let (mut ctrl, _, _) = controller(transport);
        ctrl.activate();

        ctrl.submit("Hello");
        ctrl.cancel();
        assert!(!ctrl.is_sending());

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ctrl.process_pending();

        assert_eq!(ctrl.turns().len(), 2);
        assert!(ctrl.pending_turn().is_none());
        assert!(ctrl.turns().iter().all(|t| t.content != "late reply"));
    }

    #[tokio::test]
    async fn test_user_turn_persisted_after_reply() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::Hang]);
        let (mut ctrl, storage, _) = controller(transport);
        ctrl.activate();
        let key = ctrl.session_key().unwrap();

        ctrl.submit("Hello");
        let saved = storage.get(&key).unwrap().unwrap();
        assert!(!saved.contains("Hello"));

        ctrl.cancel();
        let saved = storage.get(&key).unwrap().unwrap();
        assert!(saved.contains("Hello"));
    }

    #[test]
    fn test_clear_reseeds_greeting() {
        let (mut ctrl, storage, notifier) = controller(ScriptedTransport::new());
        ctrl.activate();
        ctrl.switch_agent("bob");
        assert!(storage.contains("agent_chat_history_ana_bob_42"));

        ctrl.clear();
        assert!(!storage.contains("agent_chat_history_ana_bob_42"));
        assert_eq!(ctrl.turns().len(), 1);
        assert!(ctrl.turns()[0].content.contains("Bob Builder"));
        assert_eq!(
            ctrl.session_key().as_deref(),
            Some("agent_chat_history_bob_42")
        );
        assert_eq!(notifier.last().unwrap().title, "History cleared");
    }

    #[test]
    fn test_render_transcript_skips_markers() {
        let turns = vec![
            ChatTurn::user("Hi"),
            ChatTurn::assistant("Hey", "ana"),
            ChatTurn::assistant(format!("*Bob {}*", TRANSITION_MARKER), "bob"),
            ChatTurn::assistant("Yo", "ghost"),
            ChatTurn::new(Role::System, "note"),
        ];
        assert_eq!(
            render_transcript(&turns, &agents()),
            "User: Hi\n\nAna: Hey\n\nAI: Yo\n\nAI: note"
        );
        assert_eq!(render_transcript(&[], &agents()), "");
    }

    #[tokio::test]
    async fn test_history_without_greeting_keeps_first_turn() {
        let transport = ScriptedTransport::with_replies([
            ScriptedReply::chunks(["First answer"]),
            ScriptedReply::chunks(["Second answer"]),
        ]);
        let (mut ctrl, _, _) = controller(transport.clone());

        ctrl.submit("One");
        ctrl.wait_idle().await;
        ctrl.submit("Two");
        ctrl.wait_idle().await;

        let requests = transport.requests().await;
        assert_eq!(requests[0].message, "One");
        assert_eq!(
            requests[1].message,
            "User: One\n\nAna: First answer\n\nUser: Two"
        );
    }

    fn stored_thread(storage: &Arc<MemoryStorage>) {
        let adapter = PersistenceAdapter::new(storage.clone(), "agent_chat_history");
        let turns = vec![
            ChatTurn::assistant("Hello! I'm Ana. How can I help you?", "ana"),
            ChatTurn::user("Q1"),
            ChatTurn::assistant("A1", "ana"),
        ];
        adapter.save("agent_chat_history_ana_42", &turns);
    }

    fn restored(max_messages: usize, transport: ScriptedTransport) -> SessionController {
        let storage = Arc::new(MemoryStorage::new());
        stored_thread(&storage);
        let config = SessionConfig {
            max_messages,
            ..Default::default()
        };
        let mut ctrl = SessionController::with_config(transport, storage, config)
            .with_document(DocumentRef::new(Some("42"), "Doc1"));
        ctrl.set_agents(agents());
        ctrl
    }

    #[tokio::test]
    async fn test_history_after_trimmed_restore_keeps_first_turn() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::chunks(["A2"])]);
        let mut ctrl = restored(2, transport.clone());

        assert_eq!(ctrl.activate(), ActivateOutcome::Restored(2));
        assert_eq!(ctrl.turns()[0].content, "Q1");

        ctrl.submit("Q2");
        ctrl.wait_idle().await;
        let requests = transport.requests().await;
        assert_eq!(requests[0].message, "User: Q1\n\nAna: A1\n\nUser: Q2");
    }

    #[tokio::test]
    async fn test_history_after_full_restore_skips_greeting() {
        let transport = ScriptedTransport::with_replies([ScriptedReply::chunks(["A2"])]);
        let mut ctrl = restored(100, transport.clone());

        assert_eq!(ctrl.activate(), ActivateOutcome::Restored(3));
        ctrl.submit("Q2");
        ctrl.wait_idle().await;
        let requests = transport.requests().await;
        assert_eq!(requests[0].message, "User: Q1\n\nAna: A1\n\nUser: Q2");
        assert_eq!(
            requests[0].context.chat_history.as_deref(),
            Some("User: Q1\n\nAna: A1")
        );
    }

    #[test]
    fn test_export_uses_fallback_agent_name() {
        let (mut ctrl, _, _) = controller(ScriptedTransport::new());
        assert!(ctrl.switch_agent("ghost"));
        ctrl.activate();

        let export = ctrl.export_transcript().unwrap();
        assert_eq!(export.agent, "Agent");
        assert!(export.filename().starts_with("conversation_agent_"));
        assert_eq!(export.messages[0].from, "assistant");
    }

    #[test]
    fn test_export_transcript() {
        let (mut ctrl, _, _) = controller(ScriptedTransport::new());
        assert!(ctrl.export_transcript().is_none());
        ctrl.activate();
        ctrl.switch_agent("bob");

        let export = ctrl.export_transcript().unwrap();
        assert_eq!(export.agent, "Bob Builder");
        assert_eq!(export.document, "Doc1");
        assert_eq!(export.messages.len(), 2);
        assert_eq!(export.messages[0].from, "Ana");
        assert_eq!(export.messages[1].from, "Bob Builder");
        assert!(export.messages[0].timestamp.ends_with('Z'));

        let filename = export.filename();
        assert!(filename.starts_with("conversation_bob_builder_"));
        assert!(filename.ends_with(".json"));

        let json = export.to_json().unwrap();
        assert!(json.contains("\"agent\": \"Bob Builder\""));
    }

    #[test]
    fn test_export_filename_format() {
        let export = TranscriptExport {
            agent: "Data  Wizard".to_string(),
            document: String::new(),
            timestamp: "2026-10-19T08:00:00.000Z".to_string(),
            messages: Vec::new(),
        };
        assert_eq!(export.filename(), "conversation_data_wizard_2026-10-19.json");
    }
}
