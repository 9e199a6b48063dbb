//! # a3s-chat
//!
//! Document-scoped chat sessions with AI agents for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-chat` manages the conversation thread between a user and one or more
//! agents: it holds the thread in memory, streams replies in as they arrive,
//! persists the thread per document and agent, and hands the user's message
//! to a host-supplied transport. Swap transports and storage backends
//! without changing application code.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_chat::{
//!     AgentDescriptor, DocumentRef, MemoryStorage, ScriptedReply, ScriptedTransport,
//!     SessionController,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_chat::Result<()> {
//! let transport = ScriptedTransport::with_replies([ScriptedReply::chunks(["Hi", " there"])]);
//! let mut session = SessionController::new(transport, Arc::new(MemoryStorage::new()))
//!     .with_document(DocumentRef::new(Some("doc-1"), "Doc1"));
//!
//! session.set_agents(vec![AgentDescriptor::new("a1", "Ana")]);
//! session.activate();
//!
//! session.submit("Hello");
//! session.wait_idle().await;
//!
//! for turn in session.turns() {
//!     println!("{}: {}", turn.role, turn.content);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage backends
//!
//! - **memory**: In-memory key-value storage for testing and single-process use
//! - **file**: One JSON file per key in a directory
//!
//! ## Architecture
//!
//! - **SessionController**: session lifecycle, agent switching, submit and stream wiring
//! - **MessageStore**: ordered, validated thread of turns
//! - **StreamingAccumulator**: folds chunks into the pending reply with cancellation
//! - **PersistenceAdapter**: best-effort, self-healing durable threads
//! - **ChatTransport** trait: the send operation the host provides
//! - **AgentManager**: create, edit, share and delete agents through an `AgentService`

pub mod config;
pub mod error;
pub mod layout;
pub mod management;
pub mod message_store;
pub mod notify;
pub mod persistence;
pub mod session;
pub mod streaming;
pub mod styles;
pub mod transport;
pub mod types;

// Re-export core types
pub use config::SessionConfig;
pub use error::{ChatError, Result};
pub use message_store::{sanitize_values, MessageStore};
pub use notify::{MemoryNotifier, Notifier, TracingNotifier};
pub use persistence::{FileStorage, KeyValueStorage, MemoryStorage, PersistenceAdapter};
pub use session::{
    render_transcript, ActivateOutcome, DocumentRef, ExportedTurn, SessionController,
    SubmitOutcome, SubmitRejection, TranscriptExport,
};
pub use streaming::{
    StreamEnvelope, StreamOutcome, StreamSignal, StreamSink, StreamState, StreamingAccumulator,
};
pub use transport::{ChatTransport, ScriptedReply, ScriptedTransport, SendRequest};
pub use types::{
    agent_color, create_turn_id, AgentContext, AgentDescriptor, AvatarType, ChatTurn,
    ContextField, Notification, NotificationVariant, Role,
};

// Re-export agent management and presentation helpers
pub use layout::{Breakpoints, LayoutCapabilities, LayoutMode};
pub use management::{
    AgentDraft, AgentFilter, AgentManager, AgentService, Command, FilterCounts,
    MemoryAgentService, MutationCommand,
};
pub use styles::{ensure_chat_styles, StyleHost};
