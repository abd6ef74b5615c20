// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors surfaced while starting up or reconfiguring the logger.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    #[error("Can't open log file {}: {source}", path.display())]
    OpenLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't change directory to {}: {source}", path.display())]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Conditions that end the event loop for good.
///
/// These never turn into an [`Error`]: the only way out is
/// [`Collector::abort`](crate::Collector::abort), which writes whatever is
/// still buffered and a marker line before the process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fatal {
    #[error("memory allocation failure")]
    AllocationFailure,

    #[error("terminated by user")]
    Interrupted,
}
