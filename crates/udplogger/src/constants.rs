// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Allocation granularity for session buffers and the registry.
pub const ALLOCATION_GRANULARITY: usize = 4096;

/// Largest datagram accepted in one receive call.
pub const RECEIVE_BUFFER_SIZE: usize = 65536;

/// How long to wait for traffic while some session holds a partial line.
pub const PENDING_WAKE_INTERVAL: Duration = Duration::from_millis(1000);

/// Returned by the clock when the wall clock cannot be read.
pub const SENTINEL_TIME: i64 = 0;

pub const DEFAULT_PORT: u16 = 6666;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_LOG_DIR: &str = ".";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 10;
pub const MIN_WAIT_TIMEOUT_SECS: u64 = 5;
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_MAX_SESSIONS: usize = 1024;
pub const MIN_MAX_SESSIONS: usize = 10;
pub const MAX_MAX_SESSIONS: usize = 65536;

pub const DEFAULT_MAX_BUFFER: usize = 65536;
pub const MIN_MAX_BUFFER: usize = 1024;
pub const MAX_MAX_BUFFER: usize = 1_048_576;

pub const DEFAULT_RECV_BUFFER: usize = 8 * 1_048_576;
pub const MIN_RECV_BUFFER: usize = 65536;
pub const MAX_RECV_BUFFER: usize = 1024 * 1_048_576;

/// Rounds `size` up to the next multiple of [`ALLOCATION_GRANULARITY`].
#[inline]
pub fn round_up(size: usize) -> usize {
    size.div_ceil(ALLOCATION_GRANULARITY)
        .saturating_mul(ALLOCATION_GRANULARITY)
}
