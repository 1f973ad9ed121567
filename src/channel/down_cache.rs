// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Write-behind buffer of references awaiting a batched spill to storage.
//!
//! The cache only batches; it performs no I/O. Entries keep the order in
//! which they were admitted, which is also their page-order. A failed spill
//! leaves the entries in place, so the buffer can transiently exceed its
//! capacity until the next spill attempt succeeds -- `is_full` therefore
//! checks `>=`, not `==`.

use crate::channel::types::MessageReference;

/// Fixed-capacity ordered buffer of references pending a store write.
#[derive(Debug)]
pub(crate) struct DownCache {
    entries: Vec<MessageReference>,
    capacity: usize,
}

impl DownCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, reference: MessageReference) {
        self.entries.push(reference);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &MessageReference> {
        self.entries.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }
}
