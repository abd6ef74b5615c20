// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wall clock access with whole-second resolution.

use crate::constants::SENTINEL_TIME;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in unix seconds.
pub trait Clock {
    fn now(&self) -> i64;
}

/// Reads the system wall clock. A clock that reads before the epoch yields
/// [`SENTINEL_TIME`] so the event loop never stalls on a clock fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|elapsed| i64::try_from(elapsed.as_secs()).ok())
            .unwrap_or(SENTINEL_TIME)
    }
}

/// Manually driven clock for tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: std::rc::Rc<std::cell::Cell<i64>>,
}

#[cfg(test)]
impl ManualClock {
    #[must_use]
    pub fn new(start: i64) -> Self {
        Self {
            now: std::rc::Rc::new(std::cell::Cell::new(start)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.set(now);
    }

    pub fn advance(&self, secs: i64) {
        self.now.set(self.now.get() + secs);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.get()
    }
}
