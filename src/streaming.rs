//! Streaming reply accumulation
//!
//! A send produces zero or more chunks followed by exactly one terminal
//! signal. The accumulator folds chunks into a transient assistant turn and
//! hands the finished turn back on completion; the turn is not part of the
//! message store until then.
//!
//! Signals travel through a `StreamSink` stamped with the generation of the
//! send that created it. `cancel()` bumps the generation, so signals from an
//! abandoned send are ignored even if a newer send is already running.

use crate::types::ChatTurn;
use tokio::sync::mpsc;

/// Accumulator lifecycle
///
/// `Finalizing` and `ErrorFinalizing` are passed through inside a single
/// terminal call and are only observable in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No send in flight
    Idle,
    /// Send started, no chunk received yet
    Sending,
    /// At least one chunk received
    Streaming,
    /// Completion received, committing the reply
    Finalizing,
    /// Error received, committing the error reply
    ErrorFinalizing,
}

impl StreamState {
    /// Whether a send is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, StreamState::Sending | StreamState::Streaming)
    }
}

/// A signal emitted by the send operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// Next text fragment
    Chunk(String),
    /// Terminal failure; carries the already formatted message
    Error(String),
    /// Terminal success
    Completed,
}

/// A signal tagged with the generation of the send that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnvelope {
    pub generation: u64,
    pub signal: StreamSignal,
}

/// Callback handle given to the send operation
///
/// Equivalent to the `onChunk` / `onError` / `onCompletion` triple.
/// Sending after the controller is gone is a silent no-op.
#[derive(Debug, Clone)]
pub struct StreamSink {
    generation: u64,
    tx: mpsc::UnboundedSender<StreamEnvelope>,
}

impl StreamSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<StreamEnvelope>) -> Self {
        Self { generation, tx }
    }

    /// Create a detached sink and the receiver its signals arrive on
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<StreamEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    /// Generation this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a text fragment
    pub fn chunk(&self, text: impl Into<String>) {
        self.emit(StreamSignal::Chunk(text.into()));
    }

    /// Terminate with an error-like value
    pub fn error(&self, err: impl std::fmt::Display) {
        self.emit(StreamSignal::Error(format_error(&err)));
    }

    /// Terminate with an arbitrary structured error payload
    pub fn error_value(&self, value: &serde_json::Value) {
        self.emit(StreamSignal::Error(format_error_value(value)));
    }

    /// Terminate successfully
    pub fn complete(&self) {
        self.emit(StreamSignal::Completed);
    }

    fn emit(&self, signal: StreamSignal) {
        let _ = self.tx.send(StreamEnvelope {
            generation: self.generation,
            signal,
        });
    }
}

/// Render an error-like value for display in the thread
pub fn format_error(err: &dyn std::fmt::Display) -> String {
    format!("Sorry, an error occurred: {}", err)
}

/// Render an untyped error payload
///
/// Objects with a string `message` are treated as error-like, bare strings
/// are used verbatim, anything else is shown as JSON.
pub fn format_error_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "An unknown error occurred.".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message") {
            Some(serde_json::Value::String(message)) => format_error(message),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Result of feeding one envelope to the accumulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Stale generation or no send in flight
    Ignored,
    /// Transient turn grew
    Updated,
    /// Send finished; carries the turn to commit, if any
    Finalized(Option<ChatTurn>),
}

/// State machine owning the in-progress assistant turn
#[derive(Debug)]
pub struct StreamingAccumulator {
    state: StreamState,
    generation: u64,
    active: Option<u64>,
    pending: Option<ChatTurn>,
}

impl Default for StreamingAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingAccumulator {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            generation: 0,
            active: None,
            pending: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Latest generation handed out (or invalidated)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The in-progress reply, for live rendering
    pub fn pending(&self) -> Option<&ChatTurn> {
        self.pending.as_ref()
    }

    /// Start a new send attributed to `agent_id`
    ///
    /// Returns the generation for the send's sink, or `None` if a send is
    /// already in flight.
    pub fn begin(&mut self, agent_id: &str) -> Option<u64> {
        if self.is_busy() {
            return None;
        }
        self.generation += 1;
        self.active = Some(self.generation);
        self.pending = Some(ChatTurn::assistant(String::new(), agent_id));
        self.transition(StreamState::Sending);
        Some(self.generation)
    }

    /// Feed one envelope through the state machine
    pub fn apply(&mut self, envelope: StreamEnvelope) -> StreamOutcome {
        if self.active != Some(envelope.generation) || !self.is_busy() {
            tracing::trace!(
                generation = envelope.generation,
                active = ?self.active,
                "Ignoring stale stream signal"
            );
            return StreamOutcome::Ignored;
        }

        match envelope.signal {
            StreamSignal::Chunk(text) => {
                if let Some(turn) = self.pending.as_mut() {
                    turn.content.push_str(&text);
                }
                self.transition(StreamState::Streaming);
                StreamOutcome::Updated
            }
            StreamSignal::Completed => {
                self.transition(StreamState::Finalizing);
                let turn = self.pending.take().filter(ChatTurn::is_complete);
                self.reset();
                StreamOutcome::Finalized(turn)
            }
            StreamSignal::Error(message) => {
                self.transition(StreamState::ErrorFinalizing);
                let turn = self
                    .pending
                    .take()
                    .map(|mut turn| {
                        turn.content = message;
                        turn
                    })
                    .filter(ChatTurn::is_complete);
                self.reset();
                StreamOutcome::Finalized(turn)
            }
        }
    }

    /// Abandon the in-flight send; its late signals will be ignored
    pub fn cancel(&mut self) {
        if self.is_busy() {
            tracing::debug!(generation = self.generation, "Cancelling in-flight reply");
        }
        self.generation += 1;
        self.reset();
    }

    fn reset(&mut self) {
        self.active = None;
        self.pending = None;
        self.transition(StreamState::Idle);
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            tracing::trace!(
                from = ?self.state,
                to = ?next,
                generation = self.generation,
                "Stream state"
            );
            self.state = next;
        }
    }
}
