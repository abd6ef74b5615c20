// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-sender reassembly state.
//!
//! A [`Session`] accumulates bytes from one sender until they form complete
//! newline-terminated lines. Complete lines are handed out from the front of
//! the buffer and the untouched remainder is moved down once per extraction,
//! so a burst of many short lines costs a single compaction.

use crate::constants::round_up;
use crate::errors::Fatal;
use std::net::SocketAddr;

pub struct Session {
    identity: SocketAddr,
    display_prefix: String,
    pending: Vec<u8>,
    first_byte_time: Option<i64>,
}

impl Session {
    #[must_use]
    pub fn new(identity: SocketAddr) -> Self {
        Self {
            identity,
            display_prefix: format!("{}:{}", identity.ip(), identity.port()),
            pending: Vec::new(),
            first_byte_time: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> SocketAddr {
        self.identity
    }

    /// `address:port` rendering, computed once per session.
    #[must_use]
    pub fn display_prefix(&self) -> &str {
        &self.display_prefix
    }

    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// When the current pending bytes started arriving. `None` while the
    /// buffer is empty.
    #[must_use]
    pub fn first_byte_time(&self) -> Option<i64> {
        self.first_byte_time
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pending.capacity()
    }

    /// Whether the pending data is older than `timeout_secs` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: i64, timeout_secs: i64) -> bool {
        match self.first_byte_time {
            Some(first) => now.saturating_sub(first) >= timeout_secs,
            None => false,
        }
    }

    /// Appends `bytes` to the pending buffer.
    ///
    /// Growth is rounded up to the allocation granularity. Failure to grow is
    /// fatal: the caller must stop and flush everything it still holds.
    pub fn append(&mut self, bytes: &[u8], now: i64) -> Result<(), Fatal> {
        if bytes.is_empty() {
            return Ok(());
        }
        let needed = self.pending.len() + bytes.len();
        if self.pending.capacity() < needed {
            self.pending
                .try_reserve_exact(round_up(needed) - self.pending.len())
                .map_err(|_| Fatal::AllocationFailure)?;
        }
        if self.pending.is_empty() {
            self.first_byte_time = Some(now);
        }
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    /// Hands every complete line (terminator included) to `emit` along with
    /// the display prefix, front to back, and drops them from the buffer.
    /// Returns the number of lines.
    pub fn extract_complete_lines<F>(&mut self, mut emit: F) -> usize
    where
        F: FnMut(&str, &[u8]),
    {
        let mut consumed = 0;
        let mut lines = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset + 1;
            emit(&self.display_prefix, &self.pending[consumed..end]);
            consumed = end;
            lines += 1;
        }
        if consumed > 0 {
            self.pending.drain(..consumed);
            if self.pending.is_empty() {
                self.first_byte_time = None;
            }
        }
        lines
    }

    /// Hands the unterminated remainder to `emit` and empties the buffer.
    /// Returns `false` when there was nothing to flush.
    pub fn force_flush<F>(&mut self, emit: F) -> bool
    where
        F: FnOnce(&str, &[u8]),
    {
        if self.pending.is_empty() {
            return false;
        }
        emit(&self.display_prefix, &self.pending);
        self.pending.clear();
        self.first_byte_time = None;
        true
    }

    /// Shrinks the backing allocation to the granularity-rounded content
    /// size. An empty buffer gives its allocation back entirely.
    pub fn shrink(&mut self) -> bool {
        let target = round_up(self.pending.len());
        if self.pending.capacity() <= target {
            return false;
        }
        self.pending.shrink_to(target);
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("pending", &self.pending.len())
            .field("first_byte_time", &self.first_byte_time)
            .finish()
    }
}
