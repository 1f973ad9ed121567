// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Paging channel core for a message broker.
//!
//! A [`PagedChannel`] holds arbitrarily many message references -- millions,
//! if need be -- while keeping at most `full_size` of them resident in
//! memory. References beyond the budget are spilled to a persistent store
//! through a write-behind batch buffer (the down-cache) and loaded back a
//! page at a time as consumers drain memory, preserving FIFO-by-priority
//! order throughout. Reliable references survive process restart; unreliable
//! ones get best-effort in-memory retention.
//!
//! The crate ships the channel core and its two collaborator contracts:
//! [`MessageStore`] (the shared body cache) and [`PersistenceManager`] (the
//! durable row store). [`InMemoryStore`] implements both for process-local
//! use; durable backends implement the same traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use paged_channel::{
//!     ChannelConfig, ChannelId, InMemoryStore, Message, MessageId, MessageStore, PagedChannel,
//! };
//!
//! # async fn example() -> Result<(), paged_channel::Error> {
//! let store = Arc::new(InMemoryStore::new());
//! let channel = PagedChannel::spawn(
//!     ChannelId(1),
//!     store.clone(),
//!     store.clone(),
//!     ChannelConfig::default(),
//! )?;
//!
//! let reference = store.insert_reference(Message::new(MessageId(1), 4, true, b"hi".to_vec()));
//! channel.add(reference).await?;
//!
//! if let Some(delivered) = channel.remove_first().await? {
//!     channel.acknowledge(delivered).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod channel;
mod config;
mod error;

pub use channel::{
    ChannelId, InMemoryStore, InitialLoadInfo, Message, MessageId, MessageReference, MessageStore,
    PagedChannel, PersistenceManager, ReferenceInfo, PRIORITY_LEVELS,
};
pub use config::ChannelConfig;
pub use error::{Error, StoreError};
