// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-channel FIFO executor.
//!
//! Every state-mutating operation is a [`Command`] submitted to a bounded
//! queue and processed one at a time by a task that exclusively owns the
//! [`ChannelState`]. Submissions from producers, consumers, and the refill
//! path are all linearized here; while a store call blocks, the queue does
//! not drain, which is the channel's natural backpressure.
//!
//! Commands are non-cancellable once enqueued: a caller that stops awaiting
//! its reply only drops the reply receiver, the operation itself still runs
//! to completion. After every command the task republishes the inspector
//! gauges under the coarse lock shared with the handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::channel::state::{ChannelGauges, ChannelState};
use crate::channel::types::MessageReference;
use crate::error::Error;

/// One state-mutating channel operation with its reply slot.
pub(crate) enum Command {
    Add {
        reference: MessageReference,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    RemoveFirst {
        reply: oneshot::Sender<Result<Option<MessageReference>, Error>>,
    },
    Cancel {
        reference: MessageReference,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Acknowledge {
        reference: MessageReference,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Load {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Unload {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Activate {
        reply: oneshot::Sender<()>,
    },
    Deactivate {
        reply: oneshot::Sender<()>,
    },
    SetPagingParams {
        full_size: usize,
        page_size: usize,
        down_cache_size: usize,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

/// Drains the command queue until every handle is gone.
///
/// The gauges snapshot is published before each reply is sent, so a caller
/// that just awaited an operation always observes its effect through the
/// inspectors.
pub(crate) async fn run(
    mut state: ChannelState,
    mut commands: mpsc::Receiver<Command>,
    gauges: Arc<Mutex<ChannelGauges>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Add { reference, reply } => {
                let result = state.add(reference).await;
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
            Command::RemoveFirst { reply } => {
                let result = state.remove_first().await;
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
            Command::Cancel { reference, reply } => {
                let result = state.cancel(reference).await;
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
            Command::Acknowledge { reference, reply } => {
                let result = state.acknowledge(reference).await;
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
            Command::Load { reply } => {
                let result = state.load().await;
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
            Command::Unload { reply } => {
                let result = state.unload();
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
            Command::Activate { reply } => {
                state.activate();
                *gauges.lock() = state.gauges();
                _ = reply.send(());
            }
            Command::Deactivate { reply } => {
                state.deactivate();
                *gauges.lock() = state.gauges();
                _ = reply.send(());
            }
            Command::SetPagingParams {
                full_size,
                page_size,
                down_cache_size,
                reply,
            } => {
                let result = state.set_paging_params(full_size, page_size, down_cache_size);
                *gauges.lock() = state.gauges();
                _ = reply.send(result);
            }
        }
    }
}
