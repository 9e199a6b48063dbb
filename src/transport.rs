//! Send operation abstraction
//!
//! The host supplies the actual language-model transport. A transport
//! delivers zero or more chunks and then exactly one terminal signal
//! through the `StreamSink`. Returning `Err` counts as the terminal error.

use crate::error::{ChatError, Result};
use crate::streaming::StreamSink;
use crate::types::AgentContext;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One outgoing message
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// Message text, prefixed with the thread transcript when one exists
    pub message: String,

    /// Structured context for transports that read it
    pub context: AgentContext,

    /// Agent that should answer
    pub agent_id: String,
}

/// Core trait for chat backends
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message, streaming the reply into `sink`
    async fn send(&self, request: SendRequest, sink: StreamSink) -> Result<()>;

    /// Transport name (e.g., "http", "scripted")
    fn name(&self) -> &str;
}

/// A canned reply for `ScriptedTransport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Stream these chunks, then complete
    Chunks(Vec<String>),
    /// Stream these chunks, then signal this error
    Fail(Vec<String>, String),
    /// Return `Err` from `send` without touching the sink
    Reject(String),
    /// Never signal anything
    Hang,
}

impl ScriptedReply {
    /// Reply streamed as the given chunks
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedReply::Chunks(chunks.into_iter().map(Into::into).collect())
    }
}

/// In-process transport replaying scripted replies
///
/// Useful for tests, demos and offline development. Replies are consumed
/// in order; once exhausted, every send echoes the message back.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<std::collections::VecDeque<ScriptedReply>>>,
    requests: Arc<Mutex<Vec<SendRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with a queue of replies
    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    /// Queue another reply
    pub async fn push_reply(&self, reply: ScriptedReply) {
        self.replies.lock().await.push_back(reply);
    }

    /// Every request received so far
    pub async fn requests(&self) -> Vec<SendRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of sends received so far
    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, request: SendRequest, sink: StreamSink) -> Result<()> {
        let reply = self.replies.lock().await.pop_front();
        let echo = request.message.clone();
        self.requests.lock().await.push(request);

        match reply.unwrap_or_else(|| ScriptedReply::Chunks(vec![echo])) {
            ScriptedReply::Chunks(chunks) => {
                for chunk in chunks {
                    sink.chunk(chunk);
                    tokio::task::yield_now().await;
                }
                sink.complete();
            }
            ScriptedReply::Fail(chunks, error) => {
                for chunk in chunks {
                    sink.chunk(chunk);
                }
                sink.error(error);
            }
            ScriptedReply::Reject(reason) => return Err(ChatError::Transport(reason)),
            ScriptedReply::Hang => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
