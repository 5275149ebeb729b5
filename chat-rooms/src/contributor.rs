//! Room features and their lifecycle contributors

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelAdapter;
use crate::error::ErrorInfo;
use crate::subscription::{BufferingPolicy, Emitter, Subscription};

/// A feature of a chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Messages,
    Presence,
    Typing,
    Reactions,
    Occupancy,
}

impl Feature {
    /// The transport channel name backing this feature for a given room.
    ///
    /// Messages, presence, reactions and occupancy share one channel; typing
    /// indicators have their own.
    pub fn channel_name(&self, room_id: &str) -> String {
        match self {
            Feature::Typing => format!("{room_id}::$chat::$typingIndicators"),
            _ => format!("{room_id}::$chat::$chatMessages"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Messages => "messages",
            Feature::Presence => "presence",
            Feature::Typing => "typing",
            Feature::Reactions => "reactions",
            Feature::Occupancy => "occupancy",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one contributor within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContributorId(Uuid);

impl ContributorId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ContributorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctb_{}", self.0)
    }
}

/// A break in message continuity on one contributor's channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscontinuityEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// One feature's channel, participating in the room lifecycle.
#[derive(Debug)]
pub struct Contributor {
    id: ContributorId,
    feature: Feature,
    channel: ChannelAdapter,
    discontinuities: Emitter<DiscontinuityEvent>,
}

impl Contributor {
    pub fn new(feature: Feature, channel: ChannelAdapter) -> Self {
        Self {
            id: ContributorId::new(),
            feature,
            channel,
            discontinuities: Emitter::new(),
        }
    }

    pub fn id(&self) -> ContributorId {
        self.id
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    pub fn channel(&self) -> &ChannelAdapter {
        &self.channel
    }

    /// Subscribe to discontinuity events observed on this contributor.
    pub fn subscribe_discontinuities(
        &self,
        policy: BufferingPolicy,
    ) -> Subscription<DiscontinuityEvent> {
        self.discontinuities.subscribe(policy)
    }

    pub(crate) fn emit_discontinuity(&self, event: DiscontinuityEvent) {
        self.discontinuities.emit(event);
    }
}
