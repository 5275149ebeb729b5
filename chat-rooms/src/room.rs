//! Room assembly
//!
//! A [`Room`] wires the enabled features to transport channels and hands the
//! resulting contributors to a [`RoomLifecycleManager`]. The heavy feature
//! facades (message history, typing debounce, reaction send) live outside
//! this crate; what they all need from here is the lifecycle surface and the
//! per-feature discontinuity streams.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelAdapter, RealtimeChannel};
use crate::contributor::{Contributor, DiscontinuityEvent, Feature};
use crate::error::RoomResult;
use crate::manager::RoomLifecycleManager;
use crate::status::{RoomStatus, RoomStatusChange};
use crate::subscription::{BufferingPolicy, Subscription};

/// Which optional features a room is created with.
///
/// Messages are always enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOptions {
    pub presence: bool,
    pub typing: bool,
    pub reactions: bool,
    pub occupancy: bool,
}

impl RoomOptions {
    /// Every feature enabled.
    pub fn all_features() -> Self {
        Self {
            presence: true,
            typing: true,
            reactions: true,
            occupancy: true,
        }
    }

    fn features(&self) -> Vec<Feature> {
        let mut features = vec![Feature::Messages];
        if self.presence {
            features.push(Feature::Presence);
        }
        if self.typing {
            features.push(Feature::Typing);
        }
        if self.reactions {
            features.push(Feature::Reactions);
        }
        if self.occupancy {
            features.push(Feature::Occupancy);
        }
        features
    }
}

/// Hands out transport channels by name.
pub trait ChannelProvider: Send + Sync + 'static {
    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel>;
}

/// One logical conversation: a fixed set of feature contributors behind a
/// lifecycle manager.
#[derive(Debug)]
pub struct Room {
    id: String,
    options: RoomOptions,
    manager: RoomLifecycleManager,
}

impl Room {
    /// Build a room's contributors from its options and start its manager.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(id: impl Into<String>, options: RoomOptions, provider: &dyn ChannelProvider) -> Self {
        let id = id.into();
        let contributors = options
            .features()
            .into_iter()
            .map(|feature| {
                let channel = provider.channel(&feature.channel_name(&id));
                Contributor::new(feature, ChannelAdapter::new(channel))
            })
            .collect();
        Self {
            id,
            options,
            manager: RoomLifecycleManager::new(contributors),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    /// Current public room status.
    pub fn status(&self) -> RoomStatus {
        self.manager.room_status()
    }

    /// Subscribe to room status changes.
    pub fn on_status_change(&self, policy: BufferingPolicy) -> Subscription<RoomStatusChange> {
        self.manager.on_room_status_change(policy)
    }

    /// Subscribe to discontinuities on one feature's channel, if that
    /// feature is enabled.
    pub fn subscribe_discontinuities(
        &self,
        feature: Feature,
        policy: BufferingPolicy,
    ) -> Option<Subscription<DiscontinuityEvent>> {
        self.manager
            .contributors()
            .iter()
            .find(|contributor| contributor.feature() == feature)
            .map(|contributor| contributor.subscribe_discontinuities(policy))
    }

    pub async fn attach(&self) -> RoomResult<()> {
        self.manager.attach().await
    }

    pub async fn detach(&self) -> RoomResult<()> {
        self.manager.detach().await
    }

    pub async fn release(&self) {
        self.manager.release().await;
    }

    /// Presence-readiness gate for feature facades; see
    /// [`RoomLifecycleManager::wait_to_be_able_to_perform_presence_operations`].
    pub async fn wait_to_be_able_to_perform_presence_operations(
        &self,
        requester: Feature,
    ) -> RoomResult<()> {
        self.manager
            .wait_to_be_able_to_perform_presence_operations(requester)
            .await
    }
}
