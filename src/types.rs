//! Core chat types for the a3s-chat system
//!
//! All types use camelCase JSON serialization so persisted sessions stay
//! readable by web hosts sharing the same storage.

use serde::{Deserialize, Serialize};

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn in a conversation
///
/// Persisted as a JSON object: `{"id", "role", "content", "timestamp", "agentId"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    /// Unique turn identifier (msg_<ms>_<random>)
    pub id: String,

    /// Who produced the turn
    pub role: Role,

    /// Text content; empty only while a reply is still streaming
    pub content: String,

    /// Unix timestamp in milliseconds
    pub timestamp: i64,

    /// Agent that produced (or is addressed by) this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ChatTurn {
    /// Create a new turn with auto-generated id and timestamp
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: create_turn_id(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            agent_id: None,
        }
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn attributed to an agent
    pub fn assistant(content: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content).with_agent(agent_id)
    }

    /// Attribute the turn to an agent
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Structural validity: a turn needs a non-empty id to be stored
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Validity for a turn leaving the streaming holder: it must also carry text
    pub fn is_complete(&self) -> bool {
        self.is_valid() && !self.content.trim().is_empty()
    }
}

/// Read-only description of a selectable agent
///
/// Supplied by the host (usually from its agent list query).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub system_instruction: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub personality_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// How the avatar was produced
    #[serde(default)]
    pub avatar_type: AvatarType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_prompt: Option<String>,

    /// Visible to every user of the host application
    #[serde(default)]
    pub is_public: bool,

    /// Owned by the current user
    #[serde(default)]
    pub is_owner: bool,
}

/// Default model for newly drafted agents
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default sampling temperature for newly drafted agents
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl AgentDescriptor {
    /// Create a descriptor with just an id and display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            system_instruction: String::new(),
            model: default_model(),
            temperature: None,
            personality_tags: Vec::new(),
            avatar_url: None,
            avatar_type: AvatarType::None,
            avatar_prompt: None,
            is_public: false,
            is_owner: false,
        }
    }
}

/// Avatar provenance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarType {
    #[default]
    None,
    Generated,
    Uploaded,
}

/// A form field the agent may reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextField {
    pub field_id: String,
    pub field_name: String,
}

/// Context payload handed to the send operation alongside each message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,

    /// Document body captured at send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_content: Option<String>,

    #[serde(default)]
    pub fields: Vec<ContextField>,

    /// Prior turns rendered as a flat transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<String>,
}

/// Visual weight of a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationVariant {
    #[default]
    Default,
    Destructive,
}

/// A user-visible notification (toast)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub variant: NotificationVariant,
}

impl Notification {
    /// Informational notification
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NotificationVariant::Default,
        }
    }

    /// Error notification
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NotificationVariant::Destructive,
        }
    }
}

/// Generate a unique turn id: `msg_<epoch-ms>_<9 random chars>`
pub fn create_turn_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("msg_{}_{}", now_millis(), &random[..9])
}

/// Stable hue in `0..360` derived from an agent id
pub fn agent_hue(agent_id: &str) -> u32 {
    agent_id
        .chars()
        .fold(0u32, |acc, c| acc.wrapping_add(c as u32))
        % 360
}

/// Pastel background colour used to tint an agent's turns
pub fn agent_color(agent_id: &str) -> String {
    format!("hsla({}, 85%, 96%, 1)", agent_hue(agent_id))
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
