//! Responsive agent list layout
//!
//! Picks a presentation mode for the agent gallery from the width of its
//! container and describes what each mode shows.

use serde::{Deserialize, Serialize};

/// Presentation mode, narrowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Name and avatar only
    Compact,
    /// Basic cards
    Narrow,
    /// Cards with model info
    Medium,
    /// Full cards with tags
    Wide,
    /// Grid view
    Full,
}

/// Width thresholds in pixels; a width below a threshold selects that mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakpoints {
    pub compact: u32,
    pub narrow: u32,
    pub medium: u32,
    pub wide: u32,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            compact: 250,
            narrow: 350,
            medium: 500,
            wide: 650,
        }
    }
}

impl Breakpoints {
    /// Mode for a container `width` pixels wide
    pub fn mode_for(&self, width: u32) -> LayoutMode {
        if width < self.compact {
            LayoutMode::Compact
        } else if width < self.narrow {
            LayoutMode::Narrow
        } else if width < self.medium {
            LayoutMode::Medium
        } else if width < self.wide {
            LayoutMode::Wide
        } else {
            LayoutMode::Full
        }
    }
}

/// How per-agent actions (edit, delete, share, chat) are offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStyle {
    /// Clicking the item opens chat; no other actions
    ClickOnly,
    /// Actions behind an overflow menu
    Menu,
    /// Action buttons on the card
    Inline,
}

/// What a layout mode displays for each agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutCapabilities {
    pub show_description: bool,
    pub show_model: bool,
    /// Personality tags shown before collapsing into "+N"
    pub max_tags: usize,
    /// Whether the all/own/public filter is offered
    pub show_filter: bool,
    pub actions: ActionStyle,
}

impl LayoutMode {
    /// Mode for `width` using the default breakpoints
    pub fn for_width(width: u32) -> Self {
        Breakpoints::default().mode_for(width)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMode::Compact => "compact",
            LayoutMode::Narrow => "narrow",
            LayoutMode::Medium => "medium",
            LayoutMode::Wide => "wide",
            LayoutMode::Full => "full",
        }
    }

    pub fn capabilities(&self) -> LayoutCapabilities {
        match self {
            LayoutMode::Compact => LayoutCapabilities {
                show_description: false,
                show_model: false,
                max_tags: 0,
                show_filter: false,
                actions: ActionStyle::ClickOnly,
            },
            LayoutMode::Narrow => LayoutCapabilities {
                show_description: true,
                show_model: false,
                max_tags: 0,
                show_filter: true,
                actions: ActionStyle::Menu,
            },
            LayoutMode::Medium => LayoutCapabilities {
                show_description: true,
                show_model: true,
                max_tags: 0,
                show_filter: true,
                actions: ActionStyle::Menu,
            },
            LayoutMode::Wide | LayoutMode::Full => LayoutCapabilities {
                show_description: true,
                show_model: true,
                max_tags: 3,
                show_filter: true,
                actions: ActionStyle::Inline,
            },
        }
    }
}

/// Split tags into the visible ones and the count of hidden ones
pub fn visible_tags(tags: &[String], max: usize) -> (&[String], usize) {
    let shown = tags.len().min(max);
    (&tags[..shown], tags.len() - shown)
}
