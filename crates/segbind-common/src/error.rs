//! Error types for binding operations.
//!
//! Every layer (store, reconciler, dispatcher, device drivers) reports
//! failures through [`BindError`]. Store errors reach the caller of the
//! reconciler unchanged.

use std::fmt::Display;
use std::io;
use thiserror::Error;

/// Result type alias for binding operations.
pub type BindResult<T> = Result<T, BindError>;

/// Errors that can occur while storing, reconciling or pushing bindings.
#[derive(Debug, Error)]
pub enum BindError {
    /// A lookup expected at least one row and found none.
    #[error("No binding found for {filter}")]
    NotFound {
        /// The filter that matched nothing.
        filter: String,
    },

    /// A lookup expected at most one row and found several.
    #[error("Expected a single binding for {filter}, found {count}")]
    Ambiguous {
        /// The filter that matched too much.
        filter: String,
        /// Number of matching rows.
        count: usize,
    },

    /// An insert would violate the uniqueness of a key.
    #[error("Conflicting entry: {key} already exists")]
    Conflict {
        /// The duplicated key.
        key: String,
    },

    /// A profile is still referenced by bindings.
    #[error("Profile '{profile}' is still referenced by {bindings} binding(s)")]
    ProfileInUse {
        /// The profile name or id.
        profile: String,
        /// Number of referencing bindings.
        bindings: usize,
    },

    /// A profile lookup found nothing.
    #[error("Profile '{profile}' not found")]
    ProfileNotFound {
        /// The profile name or id.
        profile: String,
    },

    /// A segment or VNI identifier is out of range.
    #[error("Invalid segment {value}: {reason}")]
    InvalidSegment {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// A device driver failed to push a change.
    #[error("Device push to {target} failed: {message}")]
    Device {
        /// The physical target.
        target: String,
        /// Error message.
        message: String,
    },

    /// A one-way cast could not be handed to the transport.
    #[error("Failed to cast '{method}' to {topic}.{host}: {message}")]
    Messaging {
        /// Message topic.
        topic: String,
        /// Addressed host.
        host: String,
        /// RPC method name.
        method: String,
        /// Error message.
        message: String,
    },

    /// Reading a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file involved.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Internal error (broken invariant).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl BindError {
    /// Creates a not found error for a filter.
    pub fn not_found(filter: impl Display) -> Self {
        Self::NotFound {
            filter: filter.to_string(),
        }
    }

    /// Creates an ambiguous lookup error.
    pub fn ambiguous(filter: impl Display, count: usize) -> Self {
        Self::Ambiguous {
            filter: filter.to_string(),
            count,
        }
    }

    /// Creates a conflict error.
    pub fn conflict(key: impl Display) -> Self {
        Self::Conflict {
            key: key.to_string(),
        }
    }

    /// Creates a profile in use error.
    pub fn profile_in_use(profile: impl Display, bindings: usize) -> Self {
        Self::ProfileInUse {
            profile: profile.to_string(),
            bindings,
        }
    }

    /// Creates a profile not found error.
    pub fn profile_not_found(profile: impl Display) -> Self {
        Self::ProfileNotFound {
            profile: profile.to_string(),
        }
    }

    /// Creates an invalid segment error.
    pub fn invalid_segment(value: impl Display, reason: impl Into<String>) -> Self {
        Self::InvalidSegment {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a device push error.
    pub fn device(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a messaging error.
    pub fn messaging(
        topic: impl Into<String>,
        host: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Messaging {
            topic: topic.into(),
            host: host.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error for a path.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for lookups that found nothing (rows or profiles).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BindError::NotFound { .. } | BindError::ProfileNotFound { .. }
        )
    }

    /// Returns true if the failure happened outside the store and a later
    /// compensating reconciliation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BindError::Device { .. } | BindError::Messaging { .. })
    }
}
