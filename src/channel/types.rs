// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Core value types shared across the crate.
//!
//! This module defines the data that flows through the public API. No
//! behavior lives here -- only data definitions and small accessors.
//!
//! # References vs. messages
//!
//! A [`Message`] is the body record, owned by the message store and shared
//! (`Arc`) between every channel that routes it. A [`MessageReference`] is a
//! per-channel handle around that body carrying the channel-local delivery
//! state: delivery count, the reliable flag, and the page order assigned
//! while the reference sits in the paged segment of the channel.
//!
//! # Reliability lives on the reference
//!
//! The message body carries a `reliable` flag, but it is advisory: it only
//! seeds the reference when one is first created. On recovery the flag is
//! restored from the store row ([`ReferenceInfo`]), never from the body --
//! the same body can be routed reliably on one channel and unreliably on
//! another.

use std::fmt;
use std::sync::Arc;

/// Number of distinct message priorities. Valid priorities are
/// `0..PRIORITY_LEVELS`; higher values are delivered first.
pub const PRIORITY_LEVELS: usize = 10;

/// Identifier of a logical channel (queue or topic subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message body, assigned by the broker on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message body record. Owned by the message store, shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    priority: u8,
    reliable: bool,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a message body. Priorities above the maximum are clamped.
    #[must_use]
    pub fn new(id: MessageId, priority: u8, reliable: bool, payload: Vec<u8>) -> Self {
        Self {
            id,
            priority: priority.min(PRIORITY_LEVELS as u8 - 1),
            reliable,
            payload,
        }
    }

    /// Returns the message identifier.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the message priority. Higher priorities are delivered first.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Returns the advisory reliable flag carried by the body.
    #[must_use]
    pub fn reliable(&self) -> bool {
        self.reliable
    }

    /// Returns the opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A per-channel handle to a message body.
///
/// Cloning is cheap (one `Arc` bump plus scalar copies). The reference is
/// the unit the channel stores, pages out, and hands to consumers.
#[derive(Debug, Clone)]
pub struct MessageReference {
    message: Arc<Message>,
    delivery_count: u32,
    reliable: bool,
    paging_order: Option<i64>,
}

impl MessageReference {
    /// Creates a fresh reference around a body. The reliable flag is seeded
    /// from the body; the reference starts undelivered and unpaged.
    #[must_use]
    pub fn new(message: Arc<Message>) -> Self {
        let reliable = message.reliable();
        Self {
            message,
            delivery_count: 0,
            reliable,
            paging_order: None,
        }
    }

    /// Returns the shared message body.
    #[must_use]
    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Returns the identifier of the referenced message.
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        self.message.id()
    }

    /// Returns the delivery priority of the referenced message.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.message.priority()
    }

    /// Returns how many times this reference has been delivered.
    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Returns whether this reference must survive a process restart.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Returns the page order while the reference sits in the paged segment,
    /// or `None` when it is not paged.
    #[must_use]
    pub fn paging_order(&self) -> Option<i64> {
        self.paging_order
    }

    pub(crate) fn set_delivery_count(&mut self, count: u32) {
        self.delivery_count = count;
    }

    pub(crate) fn increment_delivery_count(&mut self) {
        self.delivery_count = self.delivery_count.saturating_add(1);
    }

    pub(crate) fn set_reliable(&mut self, reliable: bool) {
        self.reliable = reliable;
    }

    pub(crate) fn set_paging_order(&mut self, order: Option<i64>) {
        self.paging_order = order;
    }
}

/// Compact store-row projection of a reference, as read back from the
/// persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceInfo {
    /// Identifier of the referenced message.
    pub message_id: MessageId,
    /// Delivery count recorded when the reference was persisted.
    pub delivery_count: u32,
    /// Reliable flag of the reference (authoritative on recovery).
    pub reliable: bool,
    /// Page order of the row, or `None` for an unpaged row.
    pub paging_order: Option<i64>,
}

/// Result of loading the unpaged prefix of a channel from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialLoadInfo {
    /// Unpaged rows in their original arrival order.
    pub refs: Vec<ReferenceInfo>,
    /// `(min, max)` page orders over the channel's paged rows, inclusive,
    /// or `None` when the channel has no paged rows.
    pub page_order_range: Option<(i64, i64)>,
}
