// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The user-facing channel handle.
//!
//! `PagedChannel` is intentionally thin: a sender into the channel's command
//! queue plus a shared gauges snapshot. Cloning is an `Arc` bump and a
//! sender clone, so handles can be passed freely into spawned tasks.
//!
//! Mutating operations are async -- they enqueue a command and await its
//! reply, stalling under backpressure when the serializer is busy with store
//! I/O. Inspectors are synchronous: they read the snapshot the serializer
//! publishes after every operation, so they are safe from any thread and
//! never wait on the store.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::channel::serializer::{self, Command};
use crate::channel::state::{ChannelGauges, ChannelState};
use crate::channel::store::{MessageStore, PersistenceManager};
use crate::channel::types::{ChannelId, MessageReference};
use crate::config::ChannelConfig;
use crate::error::Error;

/// Depth of the per-channel command queue. Small on purpose: producers
/// should feel backpressure as soon as the store slows down.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// A handle to a paging channel.
///
/// Thread-safe and cheaply cloneable. The channel itself lives in a
/// dedicated task that processes one operation at a time; it shuts down
/// once every handle has been dropped.
#[derive(Clone)]
pub struct PagedChannel {
    channel_id: ChannelId,
    commands: mpsc::Sender<Command>,
    gauges: Arc<Mutex<ChannelGauges>>,
}

impl PagedChannel {
    /// Validates the configuration and spawns the channel task.
    ///
    /// The channel starts active and empty; recovery goes through
    /// [`deactivate`](Self::deactivate), [`load`](Self::load),
    /// [`activate`](Self::activate).
    pub fn spawn(
        channel_id: ChannelId,
        ms: Arc<dyn MessageStore>,
        pm: Arc<dyn PersistenceManager>,
        config: ChannelConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        let state = ChannelState::new(channel_id, ms, pm, &config);
        let gauges = Arc::new(Mutex::new(state.gauges()));
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        drop(tokio::spawn(serializer::run(state, rx, Arc::clone(&gauges))));
        Ok(Self {
            channel_id,
            commands,
            gauges,
        })
    }

    /// Returns the channel identifier.
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    // -----------------------------------------------------------------
    // Mutating operations
    // -----------------------------------------------------------------

    /// Submits a newly-received reference to the channel.
    ///
    /// May await under backpressure; while the channel is paging the
    /// reference is routed through the down-cache instead of memory.
    pub async fn add(&self, reference: MessageReference) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Add { reference, reply }, rx).await
    }

    /// Removes the head reference for delivery, or `None` when the channel
    /// is empty. Draining triggers a refill from the paged segment when
    /// memory has room.
    pub async fn remove_first(&self) -> Result<Option<MessageReference>, Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::RemoveFirst { reply }, rx).await
    }

    /// Restores a delivered-but-unacknowledged reference to the head of the
    /// logical sequence for its priority.
    pub async fn cancel(&self, reference: MessageReference) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Cancel { reference, reply }, rx).await
    }

    /// Acknowledges a delivered reference, destroying it.
    pub async fn acknowledge(&self, reference: MessageReference) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Acknowledge { reference, reply }, rx)
            .await
    }

    /// Rebuilds channel state from the store. Requires an inactive channel.
    pub async fn load(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Load { reply }, rx).await
    }

    /// Discards all in-memory channel state. Requires an inactive channel.
    pub async fn unload(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Unload { reply }, rx).await
    }

    /// Marks the channel active.
    pub async fn activate(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Activate { reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Marks the channel inactive, opening the recovery boundary.
    pub async fn deactivate(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Deactivate { reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Replaces the paging parameters. Requires an inactive channel.
    pub async fn set_paging_params(
        &self,
        full_size: usize,
        page_size: usize,
        down_cache_size: usize,
    ) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.submit(
            Command::SetPagingParams {
                full_size,
                page_size,
                down_cache_size,
                reply,
            },
            rx,
        )
        .await
    }

    // -----------------------------------------------------------------
    // Inspectors
    // -----------------------------------------------------------------

    /// Total references this channel holds: in memory, persisted in the
    /// paged segment, and pending in the down-cache.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.gauges.lock().message_count
    }

    /// References currently resident in memory.
    #[must_use]
    pub fn in_memory_count(&self) -> usize {
        self.gauges.lock().in_memory_count
    }

    /// References buffered for the next spill.
    #[must_use]
    pub fn down_cache_count(&self) -> usize {
        self.gauges.lock().down_cache_count
    }

    /// Whether the channel is in paging mode.
    #[must_use]
    pub fn is_paging(&self) -> bool {
        self.gauges.lock().paging
    }

    /// Whether the channel accepts producer and consumer operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gauges.lock().active
    }

    // -----------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------

    async fn submit<R>(&self, command: Command, rx: oneshot::Receiver<Result<R, Error>>) -> Result<R, Error> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    fn closed(&self) -> Error {
        Error::ChannelClosed {
            channel: self.channel_id,
        }
    }
}
