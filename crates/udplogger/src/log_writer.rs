// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Formats records as `YYYY-MM-DD HH:MM:SS <ip>:<port> <payload>` and writes
//! them to the file for the record's local date.

use crate::errors::Error;
use crate::rotation::{DailyLogFile, Rotation};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rendered timestamp of the most recent record. High-rate senders emit many
/// lines within one second, so the rendering is only redone when the second
/// changes.
struct StampCache {
    second: Option<i64>,
    local: NaiveDateTime,
    rendered: String,
}

impl StampCache {
    fn new(local: NaiveDateTime) -> Self {
        Self {
            second: None,
            local,
            rendered: String::new(),
        }
    }

    /// Returns true when the second changed and `local` was recomputed.
    fn update(&mut self, timestamp: i64) -> bool {
        if self.second == Some(timestamp) {
            return false;
        }
        // No unique local time (clock fault, DST gap): keep the last known
        // calendar fields.
        if let Some(local) = local_time(timestamp) {
            self.local = local;
        }
        self.rendered = self.local.format(STAMP_FORMAT).to_string();
        self.second = Some(timestamp);
        true
    }
}

fn write_record(
    out: &mut impl Write,
    stamp: &str,
    prefix: &str,
    line: &[u8],
    terminate: bool,
) -> std::io::Result<()> {
    out.write_all(stamp.as_bytes())?;
    out.write_all(b" ")?;
    out.write_all(prefix.as_bytes())?;
    out.write_all(b" ")?;
    out.write_all(line)?;
    if terminate {
        out.write_all(b"\n")?;
    }
    Ok(())
}

pub struct LogWriter {
    file: DailyLogFile,
    stamp: StampCache,
    rotated: bool,
    write_errors: u64,
}

/// Local wall time of a unix timestamp, if it has a unique rendering.
#[must_use]
pub fn local_time(timestamp: i64) -> Option<NaiveDateTime> {
    Local
        .timestamp_opt(timestamp, 0)
        .earliest()
        .map(|dt| dt.naive_local())
}

impl LogWriter {
    /// Opens the file for the local date of `now` in `dir`.
    pub fn open(dir: impl Into<PathBuf>, now: i64) -> Result<Self, Error> {
        let local = local_time(now).unwrap_or_default();
        let file = DailyLogFile::open(dir, local.date())?;
        Ok(Self {
            file,
            stamp: StampCache::new(local),
            rotated: false,
            write_errors: 0,
        })
    }

    /// Writes one record. `terminate` appends the newline a forced partial
    /// flush lacks.
    pub fn emit(&mut self, prefix: &str, line: &[u8], timestamp: i64, terminate: bool) {
        if self.stamp.update(timestamp)
            && self.file.ensure_current(self.stamp.local.date()) == Rotation::Rotated
        {
            self.rotated = true;
        }
        let result = write_record(
            self.file.writer(),
            &self.stamp.rendered,
            prefix,
            line,
            terminate,
        );
        if result.is_err() {
            self.write_errors += 1;
        }
    }

    /// Writes a bare marker line, without timestamp or sender.
    pub fn write_marker(&mut self, reason: &str) {
        if let Err(e) = writeln!(self.file.writer(), "[aborted due to {reason}]") {
            warn!("Failed to write abort marker: {}", e);
        }
    }

    /// Flushes buffered records to the file. Reports (once) how many records
    /// failed to write since the previous flush.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.write_errors > 0 {
            warn!(
                "Failed to write {} records to {}",
                self.write_errors,
                self.file.path().display()
            );
            self.write_errors = 0;
        }
        self.file.flush()
    }

    /// True once after each successful rotation.
    pub fn take_rotation_hint(&mut self) -> bool {
        std::mem::take(&mut self.rotated)
    }

    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.file.path()
    }
}
