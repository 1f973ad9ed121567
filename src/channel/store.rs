// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator contracts for the message body store and the persistence
//! layer.
//!
//! Both collaborators are process-global and thread-safe; channels hold them
//! as `Arc<dyn ...>`. The message store is synchronous (it is an in-memory
//! body cache), the persistence manager is async because every operation can
//! block on I/O.
//!
//! # Persisted state layout (semantic)
//!
//! One row per `(channel, message)` pair: message id, delivery count,
//! reliable flag, and a nullable page order. An unpaged row has no page
//! order. Page order is a per-channel signed scalar; the paged segment
//! `[first, next)` is read back in page-order and is allowed to contain
//! holes, because depaging clears the page order of reliable rows without
//! compacting the remainder of the interval.

use async_trait::async_trait;

use crate::channel::types::{
    ChannelId, InitialLoadInfo, Message, MessageId, MessageReference, ReferenceInfo,
};
use crate::error::StoreError;

/// The message body store: deduplicates bodies and hands out references.
pub trait MessageStore: Send + Sync {
    /// Returns a fresh reference to an already-known body, pinning it, or
    /// `None` when the body is not resident.
    fn reference(&self, message_id: MessageId) -> Option<MessageReference>;

    /// Registers a body (idempotent on id) and returns a fresh pinned
    /// reference to it.
    fn insert_reference(&self, message: Message) -> MessageReference;

    /// Releases one pin on a body; the store may evict the body once no pins
    /// remain.
    fn release_reference(&self, message_id: MessageId);
}

/// Durable store for per-channel reference rows.
#[async_trait]
pub trait PersistenceManager: Send + Sync {
    /// Inserts an unpaged row for a reference on arrival.
    async fn add_reference(
        &self,
        channel: ChannelId,
        reference: &MessageReference,
    ) -> Result<(), StoreError>;

    /// Deletes the row of an acknowledged reference.
    async fn remove_reference(
        &self,
        channel: ChannelId,
        message_id: MessageId,
    ) -> Result<(), StoreError>;

    /// Loads the unpaged prefix of a channel (up to `limit` rows, in arrival
    /// order) together with the min/max page orders of its paged rows.
    async fn initial_reference_infos(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<InitialLoadInfo, StoreError>;

    /// Reads rows with page order in `[from_order, from_order + count)`,
    /// ordered by page order. Holes in the interval are skipped.
    async fn paged_reference_infos(
        &self,
        channel: ChannelId,
        from_order: i64,
        count: usize,
    ) -> Result<Vec<ReferenceInfo>, StoreError>;

    /// Loads message bodies by id, order preserved. Implementations return
    /// what they find; the caller treats a length mismatch as fatal.
    async fn messages(&self, ids: &[MessageId]) -> Result<Vec<Message>, StoreError>;

    /// Inserts rows for spilled references. With `paged == true` each row
    /// carries the page order currently assigned to its reference.
    async fn page_references(
        &self,
        channel: ChannelId,
        refs: &[MessageReference],
        paged: bool,
    ) -> Result<(), StoreError>;

    /// Stamps the current page order of each reference onto its existing
    /// row. Used for reliable references, whose rows were inserted on
    /// arrival.
    async fn update_page_order(
        &self,
        channel: ChannelId,
        refs: &[MessageReference],
    ) -> Result<(), StoreError>;

    /// Deletes the rows of depaged references that must not be reloaded.
    async fn remove_depaged_references(
        &self,
        channel: ChannelId,
        refs: &[MessageReference],
    ) -> Result<(), StoreError>;

    /// Clears the page order of reliable rows in the inclusive span
    /// `[from_order, to_order]`. `expected` is the number of rows the caller
    /// computed for the span; implementations fail the call on a mismatch
    /// instead of silently updating a different row count.
    async fn update_reliable_refs_not_paged_in_range(
        &self,
        channel: ChannelId,
        from_order: i64,
        to_order: i64,
        expected: usize,
    ) -> Result<(), StoreError>;
}
