// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Date-named output files, switched at local midnight.

use crate::errors::Error;
use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of [`DailyLogFile::ensure_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Already writing to the file for this date
    Current,
    /// Switched to a freshly opened file
    Rotated,
    /// The new file could not be opened; the previous one stays active
    Failed,
}

/// The open log file and the calendar date it belongs to.
pub struct DailyLogFile {
    dir: PathBuf,
    out: BufWriter<File>,
    date: NaiveDate,
    last_checked: NaiveDate,
}

/// `YYYY-MM-DD.log`
#[must_use]
pub fn file_name(date: NaiveDate) -> String {
    format!("{}.log", date.format("%Y-%m-%d"))
}

fn open_append(path: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::OpenLog {
            path: path.to_path_buf(),
            source,
        })
}

impl DailyLogFile {
    /// Opens (appending, never truncating) the file for `date` inside `dir`.
    pub fn open(dir: impl Into<PathBuf>, date: NaiveDate) -> Result<Self, Error> {
        let dir = dir.into();
        let path = dir.join(file_name(date));
        let file = open_append(&path)?;
        info!("Writing to {}", path.display());
        Ok(Self {
            dir,
            out: BufWriter::new(file),
            date,
            last_checked: date,
        })
    }

    /// Date of the file currently being written.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(file_name(self.date))
    }

    /// Makes sure the active file matches `date`.
    ///
    /// A failed open keeps the previous file and is not retried until a
    /// record carries yet another date.
    pub fn ensure_current(&mut self, date: NaiveDate) -> Rotation {
        if date == self.date || date == self.last_checked {
            return Rotation::Current;
        }
        self.last_checked = date;

        let path = self.dir.join(file_name(date));
        match open_append(&path) {
            Ok(file) => {
                if let Err(e) = self.out.flush() {
                    warn!("Failed to flush {} before rotation: {}", self.path().display(), e);
                }
                self.out = BufWriter::new(file);
                debug!("Rotated log file from {} to {}", self.date, date);
                self.date = date;
                Rotation::Rotated
            }
            Err(e) => {
                warn!("{e}; continuing with {}", self.path().display());
                Rotation::Failed
            }
        }
    }

    pub fn writer(&mut self) -> &mut BufWriter<File> {
        &mut self.out
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}
