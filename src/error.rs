// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for channel operations and for the persistence boundary.

use crate::channel::{ChannelId, MessageId};

/// Errors produced by channel operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Paging configuration failed validation.
    #[error("invalid paging params: {reason}")]
    InvalidPagingParams {
        /// Validation error details.
        reason: String,
    },
    /// A reliable reference was submitted to a channel that does not accept
    /// reliable messages.
    #[error("reliable reference `{message_id}` cannot be added to channel `{channel}`")]
    ReliableNotAccepted {
        /// Channel that rejected the reference.
        channel: ChannelId,
        /// Identifier of the rejected message.
        message_id: MessageId,
    },
    /// A batched body load returned a different number of messages than
    /// requested.
    #[error("did not load correct number of messages, wanted {wanted} but got {got}")]
    LoadCountMismatch {
        /// Number of message bodies requested.
        wanted: usize,
        /// Number of message bodies returned by the store.
        got: usize,
    },
    /// A persistence operation failed. Never retried by the channel; the
    /// caller decides.
    #[error("store operation `{op}` failed for channel `{channel}`: {reason}")]
    Store {
        /// Channel the operation was issued for.
        channel: ChannelId,
        /// Name of the failed store operation.
        op: &'static str,
        /// Failure details from the persistence layer.
        reason: String,
    },
    /// A recovery-boundary operation was invoked while the channel was
    /// active.
    #[error("cannot {op} channel `{channel}` while active")]
    ChannelActive {
        /// Channel the operation was issued for.
        channel: ChannelId,
        /// Name of the rejected operation.
        op: &'static str,
    },
    /// A producer or consumer operation was invoked while the channel was
    /// inactive.
    #[error("cannot {op} on inactive channel `{channel}`")]
    ChannelNotActive {
        /// Channel the operation was issued for.
        channel: ChannelId,
        /// Name of the rejected operation.
        op: &'static str,
    },
    /// The channel's serializer task is gone; no further operations are
    /// possible on this handle.
    #[error("channel `{channel}` is closed")]
    ChannelClosed {
        /// Channel the operation was issued for.
        channel: ChannelId,
    },
}

/// Error reported by a persistence-layer implementation.
///
/// Store implementations return this opaque error; the channel core wraps it
/// into [`Error::Store`] together with the failed operation name.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct StoreError {
    /// Failure details.
    pub reason: String,
}

impl StoreError {
    /// Creates a store error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
