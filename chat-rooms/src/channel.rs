//! Contributor adapter over one realtime channel
//!
//! The adapter does not interpret channel state; it forwards state-change
//! records and proxies attach/detach together with their causes. The
//! transport itself is out of scope and is reached through the
//! [`RealtimeChannel`] trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;
use crate::subscription::Subscription;

/// Lifecycle state of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

/// Event kind carried by a state-change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelEvent {
    Attaching,
    Attached,
    Detached,
    Suspended,
    Failed,
    Update,
}

/// A state-change record streamed by a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStateChange {
    pub current: ChannelState,
    pub previous: ChannelState,
    pub event: ChannelEvent,
    /// Whether continuity was preserved across the transition.
    pub resumed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorInfo>,
}

/// Future type for channel attach/detach calls.
pub type ChannelFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ErrorInfo>> + Send + 'a>>;

/// Object-safe handle to one realtime channel.
pub trait RealtimeChannel: Send + Sync + 'static {
    /// The transport-level channel name.
    fn name(&self) -> &str;

    fn attach(&self) -> ChannelFuture<'_>;

    fn detach(&self) -> ChannelFuture<'_>;

    /// Current state snapshot.
    fn state(&self) -> ChannelState;

    /// Last error the channel reported, if any.
    fn error_reason(&self) -> Option<ErrorInfo>;

    /// Lazy sequence of state-change records.
    fn subscribe_state_changes(&self) -> Subscription<ChannelStateChange>;
}

/// Wraps one channel for a lifecycle contributor.
#[derive(Clone)]
pub struct ChannelAdapter {
    channel: Arc<dyn RealtimeChannel>,
}

impl ChannelAdapter {
    pub fn new(channel: Arc<dyn RealtimeChannel>) -> Self {
        Self { channel }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub async fn attach(&self) -> Result<(), ErrorInfo> {
        self.channel.attach().await
    }

    pub async fn detach(&self) -> Result<(), ErrorInfo> {
        self.channel.detach().await
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.channel.error_reason()
    }

    pub fn subscribe_state_changes(&self) -> Subscription<ChannelStateChange> {
        self.channel.subscribe_state_changes()
    }
}

impl std::fmt::Debug for ChannelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAdapter")
            .field("name", &self.channel.name())
            .field("state", &self.channel.state())
            .finish()
    }
}
