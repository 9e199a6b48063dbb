//! One-time stylesheet registration
//!
//! Chat surfaces need a shared stylesheet in the host document. Insertion is
//! tracked in a process-wide registry keyed by stylesheet id, so each id is
//! inserted at most once no matter how many surfaces mount.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Identifier of the chat surface stylesheet
pub const CHAT_STYLES_ID: &str = "agents-tab-styles";

/// Stylesheet for chat surfaces
pub const CHAT_STYLES: &str = r#".compact-markdown-images img {
  margin-top: 0.5em !important;
  margin-bottom: 0.5em !important;
  max-width: 100% !important;
  height: auto !important;
  object-fit: contain !important;
  display: block !important;
  border-radius: 4px;
}

.circular-avatar {
  border-radius: 9999px !important;
  overflow: hidden !important;
}

.agent-avatar-selected {
  border: 2px solid #0070f3 !important;
}

.history-indicator {
  display: flex;
  align-items: center;
  font-size: 11px;
  gap: 4px;
}
"#;

/// Document that can receive stylesheets
pub trait StyleHost: Send + Sync {
    /// Whether the host already contains a stylesheet with `id`
    fn has_style(&self, id: &str) -> bool;

    /// Insert a stylesheet
    fn insert_style(&self, id: &str, css: &str);
}

fn registry() -> &'static Mutex<HashSet<String>> {
    static REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Insert `css` under `id` unless this process already did, or the host
/// already has it. Returns whether the stylesheet was inserted.
pub fn ensure_registered(host: &dyn StyleHost, id: &str, css: &str) -> bool {
    let mut registered = match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if registered.contains(id) {
        return false;
    }
    registered.insert(id.to_string());

    if host.has_style(id) {
        return false;
    }
    host.insert_style(id, css);
    tracing::debug!(id = %id, "Stylesheet registered");
    true
}

/// Register the chat surface stylesheet
pub fn ensure_chat_styles(host: &dyn StyleHost) -> bool {
    ensure_registered(host, CHAT_STYLES_ID, CHAT_STYLES)
}
