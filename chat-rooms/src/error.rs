//! Error types for room operations
//!
//! Every error surfaced by the room lifecycle reuses the realtime
//! transport's error envelope: a numeric code, an HTTP-ish status code, a
//! message, and an optional nested cause. [`ErrorCode`] names the codes this
//! crate itself produces; transport causes may carry any code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contributor::Feature;

/// Error codes produced by the room lifecycle.
///
/// The numeric values follow the chat SDK convention: per-feature attachment
/// failures in the 102001 range, per-feature detachment failures in the
/// 102050 range, and room state preconditions in the 102101 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Room options of a second `get` did not match the existing room.
    InconsistentRoomOptions = 40_000,
    /// The transport reported a failure without telling us why.
    UnknownError = 50_000,
    MessagesAttachmentFailed = 102_001,
    PresenceAttachmentFailed = 102_002,
    TypingAttachmentFailed = 102_003,
    ReactionsAttachmentFailed = 102_004,
    OccupancyAttachmentFailed = 102_005,
    MessagesDetachmentFailed = 102_050,
    PresenceDetachmentFailed = 102_051,
    TypingDetachmentFailed = 102_052,
    ReactionsDetachmentFailed = 102_053,
    OccupancyDetachmentFailed = 102_054,
    RoomInFailedState = 102_101,
    RoomIsReleasing = 102_102,
    RoomIsReleased = 102_103,
    RoomInInvalidState = 102_107,
}

impl ErrorCode {
    /// The wire-level numeric code.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub(crate) fn attachment_failed(feature: Feature) -> Self {
        match feature {
            Feature::Messages => Self::MessagesAttachmentFailed,
            Feature::Presence => Self::PresenceAttachmentFailed,
            Feature::Typing => Self::TypingAttachmentFailed,
            Feature::Reactions => Self::ReactionsAttachmentFailed,
            Feature::Occupancy => Self::OccupancyAttachmentFailed,
        }
    }

    pub(crate) fn detachment_failed(feature: Feature) -> Self {
        match feature {
            Feature::Messages => Self::MessagesDetachmentFailed,
            Feature::Presence => Self::PresenceDetachmentFailed,
            Feature::Typing => Self::TypingDetachmentFailed,
            Feature::Reactions => Self::ReactionsDetachmentFailed,
            Feature::Occupancy => Self::OccupancyDetachmentFailed,
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error envelope shared with the realtime transport.
///
/// # Example
/// ```rust,ignore
/// let error = ErrorInfo::attachment_failed(Feature::Presence, cause);
/// assert!(error.is(ErrorCode::PresenceAttachmentFailed));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}/{status_code}] {message}")]
pub struct ErrorInfo {
    /// Wire-level error code
    pub code: u32,
    /// HTTP-style status code (400 for client preconditions, 500 otherwise)
    pub status_code: u16,
    /// Human-readable error message
    pub message: String,
    /// Optional underlying cause
    #[serde(skip_serializing_if = "Option::is_none")]
    #[source]
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    /// Create a new error with code, status code and message.
    pub fn new(code: impl Into<u32>, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status_code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_cause(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Whether this error carries the given lifecycle code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.code()
    }

    // Preconditions for user operations

    pub fn room_is_releasing() -> Self {
        Self::new(
            ErrorCode::RoomIsReleasing,
            400,
            "cannot perform operation; room is releasing",
        )
    }

    pub fn room_is_released() -> Self {
        Self::new(
            ErrorCode::RoomIsReleased,
            400,
            "cannot perform operation; room is released",
        )
    }

    pub fn room_in_failed_state() -> Self {
        Self::new(
            ErrorCode::RoomInFailedState,
            400,
            "cannot perform operation; room is in failed state",
        )
    }

    // Cascading causes carried through status transitions

    pub fn attachment_failed(feature: Feature, cause: ErrorInfo) -> Self {
        Self::new(
            ErrorCode::attachment_failed(feature),
            500,
            format!("the {feature} feature failed to attach"),
        )
        .with_cause(cause)
    }

    pub fn detachment_failed(feature: Feature, cause: ErrorInfo) -> Self {
        Self::new(
            ErrorCode::detachment_failed(feature),
            500,
            format!("the {feature} feature failed to detach"),
        )
        .with_cause(cause)
    }

    // Presence-readiness gate outcomes

    pub fn presence_operation_requires_room_attach(feature: Feature) -> Self {
        Self::new(
            ErrorCode::RoomInInvalidState,
            400,
            format!("cannot perform {feature} presence operation; room must be attached"),
        )
    }

    pub fn room_transitioned_to_invalid_state_for_presence_operation(
        cause: Option<ErrorInfo>,
    ) -> Self {
        let error = Self::new(
            ErrorCode::RoomInInvalidState,
            500,
            "room transitioned to an invalid state whilst waiting to perform a presence operation",
        );
        match cause {
            Some(cause) => error.with_cause(cause),
            None => error,
        }
    }

    pub fn inconsistent_room_options(requested: &str, existing: &str) -> Self {
        Self::new(
            ErrorCode::InconsistentRoomOptions,
            400,
            format!(
                "room already exists with different options; requested {requested}, existing {existing}"
            ),
        )
    }

    pub fn unknown_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownError, 500, message)
    }
}

/// Result type alias for room operations
pub type RoomResult<T> = Result<T, ErrorInfo>;
