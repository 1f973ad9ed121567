// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory backend implementing both collaborator contracts.
//!
//! This backend is process-local: "durable" rows survive channel teardown
//! and reload but not the process, which is exactly what the test suite's
//! simulated crashes need. Durable store implementations provide the same
//! two traits.
//!
//! Design notes:
//! - One mutex over the whole store state. Channels serialize their own
//!   operations, so the lock is effectively uncontended; a single lock keeps
//!   the body cache, the message table, and the reference rows mutually
//!   consistent.
//! - The body cache (the [`MessageStore`] role) is pin-counted and evicts at
//!   zero pins. The message table (the [`PersistenceManager`] role) holds a
//!   body for as long as any channel row references it.
//! - Rows carry an arrival sequence so the unpaged prefix loads back in its
//!   original order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::store::{MessageStore, PersistenceManager};
use crate::channel::types::{
    ChannelId, InitialLoadInfo, Message, MessageId, MessageReference, ReferenceInfo,
};
use crate::error::StoreError;

struct BodyEntry {
    message: Arc<Message>,
    pins: usize,
}

#[derive(Clone)]
struct Row {
    message_id: MessageId,
    delivery_count: u32,
    reliable: bool,
    paging_order: Option<i64>,
    seq: u64,
}

#[derive(Default)]
struct StoreState {
    /// Resident body cache, pin-counted.
    bodies: HashMap<MessageId, BodyEntry>,
    /// Durable message table: bodies referenced by at least one row.
    persisted: HashMap<MessageId, Arc<Message>>,
    /// Per-channel reference rows.
    rows: HashMap<ChannelId, Vec<Row>>,
    next_seq: u64,
}

impl StoreState {
    fn channel_rows(&mut self, channel: ChannelId) -> &mut Vec<Row> {
        self.rows.entry(channel).or_default()
    }

    /// Drops message-table bodies no channel row references any more.
    fn collect_bodies(&mut self, candidates: &[MessageId]) {
        for id in candidates {
            let referenced = self
                .rows
                .values()
                .any(|rows| rows.iter().any(|row| row.message_id == *id));
            if !referenced {
                _ = self.persisted.remove(id);
            }
        }
    }
}

/// Process-local implementation of [`MessageStore`] and
/// [`PersistenceManager`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryStore {
    fn reference(&self, message_id: MessageId) -> Option<MessageReference> {
        let mut state = self.state.lock();
        let entry = state.bodies.get_mut(&message_id)?;
        entry.pins += 1;
        Some(MessageReference::new(Arc::clone(&entry.message)))
    }

    fn insert_reference(&self, message: Message) -> MessageReference {
        let mut state = self.state.lock();
        let entry = state
            .bodies
            .entry(message.id())
            .or_insert_with(|| BodyEntry {
                message: Arc::new(message),
                pins: 0,
            });
        entry.pins += 1;
        MessageReference::new(Arc::clone(&entry.message))
    }

    fn release_reference(&self, message_id: MessageId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.bodies.get_mut(&message_id) {
            entry.pins = entry.pins.saturating_sub(1);
            if entry.pins == 0 {
                _ = state.bodies.remove(&message_id);
            }
        }
    }
}

#[async_trait]
impl PersistenceManager for InMemoryStore {
    async fn add_reference(
        &self,
        channel: ChannelId,
        reference: &MessageReference,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let message_id = reference.message_id();
        _ = state
            .persisted
            .insert(message_id, Arc::clone(reference.message()));
        let rows = state.channel_rows(channel);
        let row = Row {
            message_id,
            delivery_count: reference.delivery_count(),
            reliable: reference.is_reliable(),
            paging_order: None,
            seq,
        };
        match rows.iter_mut().find(|r| r.message_id == message_id) {
            Some(existing) => *existing = Row { seq: existing.seq, ..row },
            None => rows.push(row),
        }
        Ok(())
    }

    async fn remove_reference(
        &self,
        channel: ChannelId,
        message_id: MessageId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state
            .channel_rows(channel)
            .retain(|row| row.message_id != message_id);
        state.collect_bodies(&[message_id]);
        Ok(())
    }

    async fn initial_reference_infos(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<InitialLoadInfo, StoreError> {
        let state = self.state.lock();
        let rows = state.rows.get(&channel);
        let mut unpaged: Vec<&Row> = rows
            .map(|rows| rows.iter().filter(|row| row.paging_order.is_none()).collect())
            .unwrap_or_default();
        unpaged.sort_by_key(|row| row.seq);
        let refs = unpaged
            .into_iter()
            .take(limit)
            .map(|row| ReferenceInfo {
                message_id: row.message_id,
                delivery_count: row.delivery_count,
                reliable: row.reliable,
                paging_order: None,
            })
            .collect();
        let orders: Vec<i64> = rows
            .map(|rows| rows.iter().filter_map(|row| row.paging_order).collect())
            .unwrap_or_default();
        let page_order_range = match (orders.iter().min(), orders.iter().max()) {
            (Some(min), Some(max)) => Some((*min, *max)),
            _ => None,
        };
        Ok(InitialLoadInfo {
            refs,
            page_order_range,
        })
    }

    async fn paged_reference_infos(
        &self,
        channel: ChannelId,
        from_order: i64,
        count: usize,
    ) -> Result<Vec<ReferenceInfo>, StoreError> {
        let state = self.state.lock();
        let end = from_order + count as i64;
        let mut paged: Vec<&Row> = state
            .rows
            .get(&channel)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.paging_order
                            .is_some_and(|order| order >= from_order && order < end)
                    })
                    .collect()
            })
            .unwrap_or_default();
        paged.sort_by_key(|row| row.paging_order);
        Ok(paged
            .into_iter()
            .map(|row| ReferenceInfo {
                message_id: row.message_id,
                delivery_count: row.delivery_count,
                reliable: row.reliable,
                paging_order: row.paging_order,
            })
            .collect())
    }

    async fn messages(&self, ids: &[MessageId]) -> Result<Vec<Message>, StoreError> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.persisted.get(id).map(|body| (**body).clone()))
            .collect())
    }

    async fn page_references(
        &self,
        channel: ChannelId,
        refs: &[MessageReference],
        paged: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        for reference in refs {
            let seq = state.next_seq;
            state.next_seq += 1;
            let message_id = reference.message_id();
            _ = state
                .persisted
                .insert(message_id, Arc::clone(reference.message()));
            let row = Row {
                message_id,
                delivery_count: reference.delivery_count(),
                reliable: reference.is_reliable(),
                paging_order: if paged { reference.paging_order() } else { None },
                seq,
            };
            let rows = state.channel_rows(channel);
            match rows.iter_mut().find(|r| r.message_id == message_id) {
                Some(existing) => *existing = Row { seq: existing.seq, ..row },
                None => rows.push(row),
            }
        }
        Ok(())
    }

    async fn update_page_order(
        &self,
        channel: ChannelId,
        refs: &[MessageReference],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let rows = state.channel_rows(channel);
        for reference in refs {
            let row = rows
                .iter_mut()
                .find(|row| row.message_id == reference.message_id())
                .ok_or_else(|| {
                    StoreError::new(format!(
                        "no row for message `{}` on channel `{channel}`",
                        reference.message_id()
                    ))
                })?;
            row.paging_order = reference.paging_order();
        }
        Ok(())
    }

    async fn remove_depaged_references(
        &self,
        channel: ChannelId,
        refs: &[MessageReference],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let ids: Vec<MessageId> = refs.iter().map(MessageReference::message_id).collect();
        state
            .channel_rows(channel)
            .retain(|row| !ids.contains(&row.message_id));
        state.collect_bodies(&ids);
        Ok(())
    }

    async fn update_reliable_refs_not_paged_in_range(
        &self,
        channel: ChannelId,
        from_order: i64,
        to_order: i64,
        expected: usize,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let rows = state.channel_rows(channel);
        let in_range: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.reliable
                    && row
                        .paging_order
                        .is_some_and(|order| order >= from_order && order <= to_order)
            })
            .map(|(idx, _)| idx)
            .collect();
        if in_range.len() != expected {
            return Err(StoreError::new(format!(
                "expected {expected} reliable rows in page-order range [{from_order}, {to_order}] \
                 on channel `{channel}`, found {}",
                in_range.len()
            )));
        }
        for idx in in_range {
            rows[idx].paging_order = None;
        }
        Ok(())
    }
}
