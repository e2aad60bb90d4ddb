//! Platform event and invocation payload types
//!
//! `PlatformEvent` is the typed form of raw host events entering the bridge;
//! `RuleEvent` is the flat payload a handler invocation receives. Typed
//! variants per notification kind replace stringly-typed payload casting.

use serde::{Deserialize, Serialize};

/// Raw platform notification, classified by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// Item appeared in the host registry
    ItemAdded { item: String },
    /// Item removed from the host registry
    ItemRemoved { item: String },
    /// Item definition updated in the host registry
    ItemUpdated { item: String },
    /// Command sent to an item
    ItemCommand { item: String, command: String },
    /// Item state update (may repeat the same state)
    ItemStateUpdated { item: String, state: String },
    /// Item state transition
    ItemStateChanged {
        item: String,
        old_state: String,
        new_state: String,
    },
    /// Group item state transition caused by a member update
    GroupStateChanged {
        group: String,
        member: String,
        old_state: String,
        new_state: String,
    },
    /// Channel fired a triggered event
    ChannelTriggered { channel: String, event: String },
    /// Thing appeared in the host registry
    ThingAdded { thing: String },
    /// Thing removed from the host registry
    ThingRemoved { thing: String },
    /// Thing status transition
    ThingStatusChanged {
        thing: String,
        old_status: String,
        new_status: String,
    },
    /// System start level reached
    StartLevel { level: u8 },
}

impl PlatformEvent {
    /// Identity name of the event's target, when it has one
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::ItemAdded { item }
            | Self::ItemRemoved { item }
            | Self::ItemUpdated { item }
            | Self::ItemCommand { item, .. }
            | Self::ItemStateUpdated { item, .. }
            | Self::ItemStateChanged { item, .. } => Some(item),
            Self::GroupStateChanged { group, .. } => Some(group),
            Self::ChannelTriggered { channel, .. } => Some(channel),
            Self::ThingAdded { thing }
            | Self::ThingRemoved { thing }
            | Self::ThingStatusChanged { thing, .. } => Some(thing),
            Self::StartLevel { .. } => None,
        }
    }

    /// Whether this event describes registry shape (add/remove/update)
    /// rather than state flow
    pub fn is_registry_event(&self) -> bool {
        matches!(
            self,
            Self::ItemAdded { .. }
                | Self::ItemRemoved { .. }
                | Self::ItemUpdated { .. }
                | Self::ThingAdded { .. }
                | Self::ThingRemoved { .. }
        )
    }
}

/// Flat payload handed to a rule handler
///
/// One invocation corresponds to exactly one handler call with one payload.
/// Only the fields relevant to the firing trigger are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    /// Trigger label (e.g. "change", "command", "cron")
    pub trigger: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_event: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thing_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_level: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
}
