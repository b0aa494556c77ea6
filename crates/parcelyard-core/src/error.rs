// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for parcelyard-core.
//!
//! Provides a unified error type that maps to `error` events on the wire.

use parcelyard_protocol::{DecodeError, Event, FrameError, PackageStatus};
use thiserror::Error;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while processing a frame or command.
///
/// None of these are fatal to the connection that caused them.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A required command field was absent or empty.
    #[error("{field} is required")]
    MissingField {
        /// Wire name of the missing field.
        field: &'static str,
    },

    /// A field was present but carried an unusable value.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Package was not found.
    #[error("Package '{package_id}' not found")]
    PackageNotFound {
        /// The package ID that was not found.
        package_id: String,
    },

    /// The command `type` is not part of the protocol.
    #[error("Unknown message type '{received}'")]
    UnknownType {
        /// The type string as received.
        received: String,
    },

    /// The frame was not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The frame was JSON but had no string `type` field.
    #[error("Message has no 'type' field")]
    MissingType,

    /// The frame had a known type but malformed fields.
    #[error("Malformed message: {0}")]
    InvalidMessage(String),

    /// Failure injection redirected the operation to its error outcome.
    #[error("Injected failure during {operation}")]
    InjectedFailure {
        /// The lifecycle step that was failed.
        operation: &'static str,
        /// Package affected, if one exists yet.
        package_id: Option<String>,
        /// Order the operation belonged to.
        order_id: Option<String>,
    },

    /// The transition table rejects the requested step.
    #[error("Package '{package_id}' cannot {transition} from status '{from}'")]
    InvalidTransition {
        /// The package ID.
        package_id: String,
        /// Status at the time of the attempt.
        from: PackageStatus,
        /// The rejected step.
        transition: &'static str,
    },
}

impl EngineError {
    /// Wire `message` for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField { .. } | Self::InvalidValue { .. } => "validation_error",
            Self::PackageNotFound { .. } => "not_found",
            Self::UnknownType { .. } => "unknown_type",
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingType => "missing_type",
            Self::InvalidMessage(_) => "invalid_message",
            Self::InjectedFailure { .. } => "injected_failure",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Convert this error to an `error` event for the originating connection.
    pub fn to_event(&self) -> Event {
        let (package_id, order_id) = match self {
            Self::PackageNotFound { package_id } | Self::InvalidTransition { package_id, .. } => {
                (Some(package_id.clone()), None)
            }
            Self::InjectedFailure {
                package_id,
                order_id,
                ..
            } => (package_id.clone(), order_id.clone()),
            _ => (None, None),
        };

        Event::error(self.error_code())
            .with_package(package_id, order_id)
            .with_details(self.to_string())
    }
}

impl From<DecodeError> for EngineError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::InvalidJson(reason) => EngineError::InvalidJson(reason),
            DecodeError::MissingType => EngineError::MissingType,
            DecodeError::UnknownType(received) => EngineError::UnknownType { received },
            err @ DecodeError::InvalidMessage { .. } => {
                EngineError::InvalidMessage(err.to_string())
            }
        }
    }
}

impl From<FrameError> for EngineError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::InvalidUtf8 => EngineError::InvalidJson(err.to_string()),
            other => EngineError::InvalidMessage(other.to_string()),
        }
    }
}
