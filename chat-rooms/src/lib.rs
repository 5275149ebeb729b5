//! # Chat Rooms
//!
//! Room lifecycle coordination for a realtime chat SDK.
//!
//! ## Overview
//!
//! A *room* is a logical conversation composed of feature channels —
//! messages, presence, typing indicators, reactions, occupancy. Each enabled
//! feature is backed by a *contributor*: a stateful realtime channel that
//! attaches, detaches, fails, suspends and loses continuity on its own
//! schedule. This crate folds those independent lifecycles into one coherent
//! room status:
//!
//! - **Lifecycle manager** with ATTACH / DETACH / RELEASE operations plus
//!   scheduled RETRY and RUNDOWN recovery operations
//! - **Contributor state-change handling** with 5-second transient-disconnect
//!   grace timers and pending-discontinuity bookkeeping
//! - **Presence-readiness gate** for feature facades that need the room
//!   attached
//! - **Broadcast subscriptions** for room status changes and per-contributor
//!   discontinuities, bounded (drop-oldest) or unbounded
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Application / Facades                 │
//! │   attach() detach() release()   presence gate   status   │
//! └──────────────┬───────────────────────────┬───────────────┘
//!                ▼                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  RoomLifecycleManager                    │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ Operations │  │ State-change │  │ Status + per-    │  │
//! │  │ + waiters  │  │ handler      │  │ contributor notes│  │
//! │  └─────┬──────┘  └──────┬───────┘  └──────────────────┘  │
//! └────────┼────────────────┼────────────────────────────────┘
//!          ▼                ▲ state changes
//! ┌──────────────────────────────────────────────────────────┐
//! │     Contributors (one ChannelAdapter per feature)        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chat_rooms::prelude::*;
//!
//! let rooms = Rooms::new(provider);
//! let room = rooms.get("basketball", RoomOptions::all_features())?;
//!
//! let mut statuses = room.on_status_change(BufferingPolicy::Unbounded);
//! room.attach().await?;
//!
//! // Presence facades gate on attachment:
//! room.wait_to_be_able_to_perform_presence_operations(Feature::Presence)
//!     .await?;
//!
//! rooms.release("basketball").await;
//! ```
//!
//! ## Module Structure
//!
//! - [`RoomLifecycleManager`] - the lifecycle state machine
//! - [`Room`] / [`Rooms`] - feature wiring and the per-id registry
//! - [`subscription`] - broadcast primitive used for every event stream
//! - [`channel`] - the adapter over one transport channel
//! - [`ErrorInfo`] / [`ErrorCode`] - the transport's error envelope
//! - [`backoff`] - the retry envelope for presence reads

pub mod backoff;
pub mod channel;
pub mod contributor;
mod error;
mod manager;
mod room;
mod rooms;
mod status;
pub mod subscription;

#[cfg(test)]
mod tests;

// Public API
pub use backoff::{Backoff, BackoffPolicy, retry_with_backoff};
pub use channel::{
    ChannelAdapter, ChannelEvent, ChannelFuture, ChannelState, ChannelStateChange, RealtimeChannel,
};
pub use contributor::{Contributor, ContributorId, DiscontinuityEvent, Feature};
pub use error::{ErrorCode, ErrorInfo, RoomResult};
pub use manager::{
    DETACH_RETRY_INTERVAL, OperationId, RoomLifecycleManager, TRANSIENT_DISCONNECT_TIMEOUT,
    TimeoutId,
};
pub use room::{ChannelProvider, Room, RoomOptions};
pub use rooms::Rooms;
pub use status::{RoomStatus, RoomStatusChange};
pub use subscription::{BufferingPolicy, Emitter, Subscription, SubscriptionId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Backoff,
        BackoffPolicy,
        BufferingPolicy,
        ChannelAdapter,
        ChannelEvent,
        ChannelProvider,
        ChannelState,
        ChannelStateChange,
        Contributor,
        ContributorId,
        DiscontinuityEvent,
        Emitter,
        ErrorCode,
        ErrorInfo,
        Feature,
        OperationId,
        RealtimeChannel,
        Room,
        RoomLifecycleManager,
        RoomOptions,
        RoomResult,
        RoomStatus,
        RoomStatusChange,
        Rooms,
        Subscription,
        SubscriptionId,
        retry_with_backoff,
    };
}
