// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Channel configuration.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Configuration of a paging channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Maximum number of references held in memory before the channel goes
    /// into paging mode.
    #[serde(default = "default_full_size")]
    pub full_size: usize,

    /// Maximum number of references loaded back from storage in one go.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum number of references spilled to storage in one batch.
    #[serde(default = "default_down_cache_size")]
    pub down_cache_size: usize,

    /// Whether this channel accepts reliable references at all.
    #[serde(default = "default_true")]
    pub accept_reliable_messages: bool,

    /// Whether this channel is backed by a durable store that honors
    /// reliable references across restarts.
    #[serde(default = "default_true")]
    pub recoverable: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            full_size: default_full_size(),
            page_size: default_page_size(),
            down_cache_size: default_down_cache_size(),
            accept_reliable_messages: true,
            recoverable: true,
        }
    }
}

impl ChannelConfig {
    /// Validates the paging parameters.
    pub fn validate(&self) -> Result<(), Error> {
        validate_paging_params(self.full_size, self.page_size, self.down_cache_size)
    }
}

/// Validates a `(full_size, page_size, down_cache_size)` triple; the
/// required shape is `0 < down_cache_size <= page_size < full_size`.
pub(crate) fn validate_paging_params(
    full_size: usize,
    page_size: usize,
    down_cache_size: usize,
) -> Result<(), Error> {
    if page_size == 0 {
        return Err(Error::InvalidPagingParams {
            reason: "page_size must be greater than zero".to_owned(),
        });
    }
    if down_cache_size == 0 {
        return Err(Error::InvalidPagingParams {
            reason: "down_cache_size must be greater than zero".to_owned(),
        });
    }
    if page_size >= full_size {
        return Err(Error::InvalidPagingParams {
            reason: "page_size must be less than full_size".to_owned(),
        });
    }
    if down_cache_size > page_size {
        return Err(Error::InvalidPagingParams {
            reason: "down_cache_size cannot be greater than page_size".to_owned(),
        });
    }
    Ok(())
}

fn default_full_size() -> usize {
    75_000
}

fn default_page_size() -> usize {
    2_000
}

fn default_down_cache_size() -> usize {
    2_000
}

fn default_true() -> bool {
    true
}
