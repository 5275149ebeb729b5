//! Public room status
//!
//! The application-visible lifecycle status of a room. The manager keeps a
//! finer internal status; every internal status maps to exactly one of these
//! cases, and a change event is emitted only when the public case changes.

use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;

/// The lifecycle status of a room, as observed by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RoomStatus {
    Initialized,
    Attaching {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    Attached,
    Detaching,
    Detached,
    Suspended {
        error: ErrorInfo,
    },
    Failed {
        error: ErrorInfo,
    },
    Releasing,
    Released,
}

impl RoomStatus {
    /// Stable string for observability.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Initialized => "initialized",
            RoomStatus::Attaching { .. } => "attaching",
            RoomStatus::Attached => "attached",
            RoomStatus::Detaching => "detaching",
            RoomStatus::Detached => "detached",
            RoomStatus::Suspended { .. } => "suspended",
            RoomStatus::Failed { .. } => "failed",
            RoomStatus::Releasing => "releasing",
            RoomStatus::Released => "released",
        }
    }

    /// The cause carried by this status, if any.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            RoomStatus::Attaching { error } => error.as_ref(),
            RoomStatus::Suspended { error } | RoomStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Whether two statuses are the same case, ignoring carried causes.
    ///
    /// Status-change events compare cases: two internal statuses that share
    /// a public case never produce an event, even if their causes differ.
    pub fn same_case(&self, other: &RoomStatus) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room status transition delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatusChange {
    pub current: RoomStatus,
    pub previous: RoomStatus,
}
