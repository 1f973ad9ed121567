// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Channel internals -- the paging state machine.
//!
//! `ChannelState` owns everything a single logical channel knows: the
//! in-memory ordered multiset, the write-behind down-cache, the page-order
//! interval `[first, next)` describing the paged segment in storage, and the
//! paging/active flags. It is owned exclusively by the channel's serializer
//! task (see `serializer.rs`), so nothing here is locked.
//!
//! # The paged segment
//!
//! The logical order of a channel's references is: (a) references in memory,
//! in multiset order; (b) references persisted with a page order in
//! `[first, next)`; (c) references in the down-cache -- these already carry a
//! page order inside the interval, they just have not been written yet.
//! Spilling appends at `next`; cancellation evicts the in-memory tail to
//! page order `first - 1`, which grows the interval downward so the evicted
//! reference logically sits at the front of the paged segment.
//!
//! # Mode transitions
//!
//! The channel is `Flowing` until memory reaches `full_size`, at which point
//! it goes into `Paging` mode and subsequent arrivals are routed through the
//! down-cache. Draining consumers trigger `check_load`, which refills memory
//! a page at a time and leaves paging mode once the interval is empty and
//! memory has headroom again.
//!
//! # Failure posture
//!
//! Store failures are never retried here. A failed spill keeps the
//! down-cache contents for the next attempt; a failed paged load performs
//! its store deletions *before* touching memory and advances `first` only
//! after every store call succeeded, so a retry can only re-load rows that
//! are still present. Reliable rows are thus never lost, and unreliable rows
//! can only disappear after they were durably written and then deliberately
//! depage-removed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::channel::down_cache::DownCache;
use crate::channel::ordered::OrderedMultiset;
use crate::channel::store::{MessageStore, PersistenceManager};
use crate::channel::types::{ChannelId, MessageId, MessageReference, ReferenceInfo};
use crate::config::{validate_paging_params, ChannelConfig};
use crate::error::{Error, StoreError};

/// Snapshot of the inspector-visible fields, published by the serializer
/// task after every operation and read under the handle's coarse lock.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChannelGauges {
    pub(crate) message_count: usize,
    pub(crate) in_memory_count: usize,
    pub(crate) down_cache_count: usize,
    pub(crate) paging: bool,
    pub(crate) active: bool,
}

/// Per-channel paging state. Exclusively owned by the serializer task.
pub(crate) struct ChannelState {
    channel_id: ChannelId,
    ms: Arc<dyn MessageStore>,
    pm: Arc<dyn PersistenceManager>,
    accept_reliable: bool,
    recoverable: bool,
    full_size: usize,
    page_size: usize,
    refs: OrderedMultiset,
    down_cache: DownCache,
    paging: bool,
    first_paging_order: i64,
    next_paging_order: i64,
    active: bool,
}

impl ChannelState {
    /// Creates a channel in the active, empty state. The configuration must
    /// already be validated.
    pub(crate) fn new(
        channel_id: ChannelId,
        ms: Arc<dyn MessageStore>,
        pm: Arc<dyn PersistenceManager>,
        config: &ChannelConfig,
    ) -> Self {
        Self {
            channel_id,
            ms,
            pm,
            accept_reliable: config.accept_reliable_messages,
            recoverable: config.recoverable,
            full_size: config.full_size,
            page_size: config.page_size,
            refs: OrderedMultiset::new(),
            down_cache: DownCache::new(config.down_cache_size),
            paging: false,
            first_paging_order: 0,
            next_paging_order: 0,
            active: true,
        }
    }

    // -----------------------------------------------------------------
    // Producer / consumer operations
    // -----------------------------------------------------------------

    /// Accepts a newly-received reference.
    pub(crate) async fn add(&mut self, reference: MessageReference) -> Result<(), Error> {
        self.ensure_active("add")?;

        if reference.is_reliable() && !self.accept_reliable {
            return Err(Error::ReliableNotAccepted {
                channel: self.channel_id,
                message_id: reference.message_id(),
            });
        }

        // Reliable references on a recoverable channel get their unpaged row
        // on arrival; spilling later only stamps a page order onto it.
        if reference.is_reliable() && self.recoverable {
            self.pm
                .add_reference(self.channel_id, &reference)
                .await
                .map_err(|e| self.store_err("add_reference", e))?;
        }

        if self.paging {
            self.add_to_down_cache(reference, false).await
        } else {
            self.refs.add_last(reference);
            if self.refs.len() == self.full_size {
                trace!(channel = %self.channel_id, "going into paging mode");
                self.paging = true;
            }
            Ok(())
        }
    }

    /// Removes the head reference for delivery, then tops memory back up
    /// from the paged segment when there is room.
    pub(crate) async fn remove_first(&mut self) -> Result<Option<MessageReference>, Error> {
        self.ensure_active("remove_first")?;
        let result = self.refs.remove_first();
        if let Err(e) = self.check_load().await {
            // Put the head back so a failed refill loses nothing.
            if let Some(reference) = result {
                self.refs.add_first(reference);
            }
            return Err(e);
        }
        Ok(result)
    }

    /// Restores a previously-delivered reference to the head of its
    /// priority class.
    pub(crate) async fn cancel(&mut self, mut reference: MessageReference) -> Result<(), Error> {
        self.ensure_active("cancel")?;

        reference.increment_delivery_count();
        reference.set_paging_order(None);
        self.refs.add_first(reference);

        if self.paging {
            // The re-insert may leave memory one over budget; evict the tail
            // to the front of the paged segment to restore the bound.
            if self.refs.len() == self.full_size + 1 {
                if let Some(evicted) = self.refs.remove_last() {
                    self.add_to_down_cache(evicted, true).await?;
                }
            }
        } else if self.refs.len() == self.full_size {
            trace!(channel = %self.channel_id, "going into paging mode");
            self.paging = true;
        }
        Ok(())
    }

    /// Finalizes a delivered reference: drops its durable row (reliable on a
    /// recoverable channel) and releases the body pin.
    pub(crate) async fn acknowledge(&mut self, reference: MessageReference) -> Result<(), Error> {
        self.ensure_active("acknowledge")?;
        if reference.is_reliable() && self.recoverable {
            self.pm
                .remove_reference(self.channel_id, reference.message_id())
                .await
                .map_err(|e| self.store_err("remove_reference", e))?;
        }
        self.ms.release_reference(reference.message_id());
        Ok(())
    }

    // -----------------------------------------------------------------
    // Recovery boundary
    // -----------------------------------------------------------------

    /// Rebuilds the channel from the store. The channel must be inactive.
    pub(crate) async fn load(&mut self) -> Result<(), Error> {
        self.ensure_inactive("load")?;
        trace!(channel = %self.channel_id, "loading channel state");

        self.reset();

        let info = self
            .pm
            .initial_reference_infos(self.channel_id, self.full_size)
            .await
            .map_err(|e| self.store_err("initial_reference_infos", e))?;

        if let Some((min, max)) = info.page_order_range {
            self.first_paging_order = min;
            self.next_paging_order = max + 1;
            self.paging = true;
        } else {
            self.first_paging_order = 0;
            self.next_paging_order = 0;
        }

        let loaded = self.materialize(&info.refs).await?;
        for reference in loaded {
            self.refs.add_last(reference);
        }

        // Greedy top-up from the paged segment.
        while self.check_load().await? {}

        if self.refs.len() == self.full_size {
            self.paging = true;
        }
        Ok(())
    }

    /// Discards all in-memory state. The channel must be inactive.
    pub(crate) fn unload(&mut self) -> Result<(), Error> {
        self.ensure_inactive("unload")?;
        self.reset();
        Ok(())
    }

    /// Marks the channel active; producer and consumer operations are
    /// accepted again.
    pub(crate) fn activate(&mut self) {
        self.active = true;
    }

    /// Marks the channel inactive, opening the recovery boundary.
    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    /// Replaces the paging parameters. The channel must be inactive.
    pub(crate) fn set_paging_params(
        &mut self,
        full_size: usize,
        page_size: usize,
        down_cache_size: usize,
    ) -> Result<(), Error> {
        self.ensure_inactive("set paging params on")?;
        validate_paging_params(full_size, page_size, down_cache_size)?;
        self.full_size = full_size;
        self.page_size = page_size;
        self.down_cache.set_capacity(down_cache_size);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    /// Total references the channel is responsible for. Down-cache entries
    /// already carry a page order inside `[first, next)`, so the interval
    /// width covers both the persisted segment and the pending spill batch.
    pub(crate) fn message_count(&self) -> usize {
        self.refs.len() + (self.next_paging_order - self.first_paging_order) as usize
    }

    pub(crate) fn gauges(&self) -> ChannelGauges {
        ChannelGauges {
            message_count: self.message_count(),
            in_memory_count: self.refs.len(),
            down_cache_count: self.down_cache.len(),
            paging: self.paging,
            active: self.active,
        }
    }

    // -----------------------------------------------------------------
    // Paging internals
    // -----------------------------------------------------------------

    /// Assigns a page order and buffers the reference for a batched spill.
    /// Cancelled references grow the interval downward so they re-enter at
    /// the front of the paged segment; fresh arrivals append at the back.
    async fn add_to_down_cache(
        &mut self,
        mut reference: MessageReference,
        cancelling: bool,
    ) -> Result<(), Error> {
        if cancelling {
            self.first_paging_order -= 1;
            reference.set_paging_order(Some(self.first_paging_order));
        } else {
            reference.set_paging_order(Some(self.next_paging_order));
            self.next_paging_order += 1;
        }

        trace!(
            channel = %self.channel_id,
            message = %reference.message_id(),
            order = reference.paging_order().unwrap_or_default(),
            "reference sent to down-cache"
        );
        self.down_cache.push(reference);

        if self.down_cache.is_full() {
            self.flush_down_cache().await?;
        }
        Ok(())
    }

    /// Persists the buffered batch. Unreliable references get fresh rows;
    /// reliable ones on a recoverable channel already have rows and only get
    /// their page order stamped. Body pins are released strictly after the
    /// store writes succeed, and the buffer is kept intact on failure so the
    /// next spill retries the same batch.
    async fn flush_down_cache(&mut self) -> Result<(), Error> {
        if self.down_cache.is_empty() {
            return Ok(());
        }
        trace!(
            channel = %self.channel_id,
            count = self.down_cache.len(),
            "flushing down-cache"
        );

        let mut to_add = Vec::new();
        let mut to_update = Vec::new();
        for reference in self.down_cache.iter() {
            if reference.is_reliable() && self.recoverable {
                to_update.push(reference.clone());
            } else {
                to_add.push(reference.clone());
            }
        }

        if !to_add.is_empty() {
            self.pm
                .page_references(self.channel_id, &to_add, true)
                .await
                .map_err(|e| self.store_err("page_references", e))?;
        }
        if !to_update.is_empty() {
            self.pm
                .update_page_order(self.channel_id, &to_update)
                .await
                .map_err(|e| self.store_err("update_page_order", e))?;
        }

        for reference in self.down_cache.iter() {
            self.ms.release_reference(reference.message_id());
        }
        self.down_cache.clear();
        Ok(())
    }

    /// Refills memory from the paged segment when a full page (or the whole
    /// remaining interval, if smaller) fits under the memory budget. Returns
    /// whether a load happened.
    async fn check_load(&mut self) -> Result<bool, Error> {
        let ref_num = self.next_paging_order - self.first_paging_order;
        if ref_num == 0 {
            if self.paging && self.refs.len() != self.full_size {
                trace!(channel = %self.channel_id, "leaving paging mode");
                self.paging = false;
            }
            return Ok(false);
        }

        let number_loadable = (ref_num as usize).min(self.page_size);
        if self.refs.len() + number_loadable <= self.full_size {
            self.load_paged_references(number_loadable).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Brings `number` page orders' worth of references back into memory.
    async fn load_paged_references(&mut self, number: usize) -> Result<(), Error> {
        trace!(channel = %self.channel_id, number, "loading paged references from storage");

        // The down-cache may hold orders inside the window; persist it first.
        self.flush_down_cache().await?;

        let infos = self
            .pm
            .paged_reference_infos(self.channel_id, self.first_paging_order, number)
            .await
            .map_err(|e| self.store_err("paged_reference_infos", e))?;

        let loaded = self.materialize(&infos).await?;

        let mut to_remove = Vec::new();
        let mut loaded_reliable = 0usize;
        for reference in &loaded {
            if self.recoverable && reference.is_reliable() {
                loaded_reliable += 1;
            } else {
                // Unreliable rows (or reliable rows in a non-recoverable
                // store) must not be re-loaded next time.
                to_remove.push(reference.clone());
            }
        }

        // Store cleanup happens before memory is touched: a failure here
        // leaves memory as it was and `first` unadvanced, and the retry can
        // only re-load rows that still exist.
        if !to_remove.is_empty() {
            if let Err(e) = self
                .pm
                .remove_depaged_references(self.channel_id, &to_remove)
                .await
            {
                self.release_loaded(&loaded);
                return Err(self.store_err("remove_depaged_references", e));
            }
        }
        if loaded_reliable > 0 {
            // Reliable rows stay (they are not acknowledged yet); clearing
            // their page order keeps them out of the next paged read.
            if let Err(e) = self
                .pm
                .update_reliable_refs_not_paged_in_range(
                    self.channel_id,
                    self.first_paging_order,
                    self.first_paging_order + number as i64 - 1,
                    loaded_reliable,
                )
                .await
            {
                self.release_loaded(&loaded);
                return Err(self.store_err("update_reliable_refs_not_paged_in_range", e));
            }
        }

        let count = loaded.len();
        for reference in loaded {
            self.refs.add_last(reference);
        }
        self.first_paging_order += number as i64;

        if self.first_paging_order == self.next_paging_order {
            // Paged segment drained.
            self.first_paging_order = 0;
            self.next_paging_order = 0;
            if self.refs.len() != self.full_size {
                trace!(channel = %self.channel_id, "leaving paging mode");
                self.paging = false;
            }
        }
        trace!(channel = %self.channel_id, count, "loaded paged references");
        Ok(())
    }

    /// Turns store rows back into live references: bodies still resident in
    /// the message store are re-referenced directly, the rest are batch
    /// loaded. Per-reference attributes come from the rows, not the bodies.
    /// Fails without touching channel state.
    async fn materialize(
        &self,
        infos: &[ReferenceInfo],
    ) -> Result<Vec<MessageReference>, Error> {
        let mut by_id: HashMap<MessageId, MessageReference> = HashMap::with_capacity(infos.len());
        let mut missing: Vec<MessageId> = Vec::new();

        for info in infos {
            match self.ms.reference(info.message_id) {
                Some(reference) => {
                    _ = by_id.insert(info.message_id, reference);
                }
                None => missing.push(info.message_id),
            }
        }

        if !missing.is_empty() {
            let messages = self
                .pm
                .messages(&missing)
                .await
                .map_err(|e| self.store_err("messages", e))?;
            if messages.len() != missing.len() {
                // Drop the pins taken above before bailing out.
                for id in by_id.keys() {
                    self.ms.release_reference(*id);
                }
                return Err(Error::LoadCountMismatch {
                    wanted: missing.len(),
                    got: messages.len(),
                });
            }
            for message in messages {
                // The store may already know the body by now (another channel
                // can have registered it in the meantime); either way this
                // returns a reference to the canonical copy.
                let reference = self.ms.insert_reference(message);
                _ = by_id.insert(reference.message_id(), reference);
            }
        }

        let mut out = Vec::with_capacity(infos.len());
        for info in infos {
            let Some(mut reference) = by_id.remove(&info.message_id) else {
                for id in by_id.keys() {
                    self.ms.release_reference(*id);
                }
                return Err(self.store_err(
                    "messages",
                    StoreError::new(format!(
                        "loaded batch is missing message `{}`",
                        info.message_id
                    )),
                ));
            };
            reference.set_delivery_count(info.delivery_count);
            reference.set_paging_order(None);
            reference.set_reliable(info.reliable);
            out.push(reference);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn reset(&mut self) {
        self.refs.clear();
        self.down_cache.clear();
        self.paging = false;
        self.first_paging_order = 0;
        self.next_paging_order = 0;
    }

    fn release_loaded(&self, loaded: &[MessageReference]) {
        for reference in loaded {
            self.ms.release_reference(reference.message_id());
        }
    }

    fn ensure_active(&self, op: &'static str) -> Result<(), Error> {
        if self.active {
            Ok(())
        } else {
            Err(Error::ChannelNotActive {
                channel: self.channel_id,
                op,
            })
        }
    }

    fn ensure_inactive(&self, op: &'static str) -> Result<(), Error> {
        if self.active {
            Err(Error::ChannelActive {
                channel: self.channel_id,
                op,
            })
        } else {
            Ok(())
        }
    }

    fn store_err(&self, op: &'static str, source: StoreError) -> Error {
        Error::Store {
            channel: self.channel_id,
            op,
            reason: source.reason,
        }
    }
}
