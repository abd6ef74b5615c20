// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Receiving half of a remote console forwarding pipeline.
//!
//! Many machines send raw console output as UDP payloads. This crate rebuilds
//! per-sender line streams from those datagrams and appends them to a log file
//! rotated at local-day boundaries, while keeping memory proportional to the
//! number of *active* senders.
//!
//! - [`registry`]: bounded set of per-sender sessions
//! - [`session`]: pending byte buffer and line extraction for one sender
//! - [`log_writer`]: record formatting and timestamp caching
//! - [`rotation`]: the date-named output file
//! - [`collector`]: the single owner of all of the above
//! - [`server`]: the wait / timeout-scan / drain event loop

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod clock;
pub mod collector;
pub mod config;
pub mod constants;
pub mod errors;
pub mod log_writer;
pub mod registry;
pub mod rotation;
pub mod server;
pub mod session;

pub use collector::Collector;
pub use config::{CollectorConfig, ServerConfig};
pub use errors::{Error, Fatal};
pub use server::{DatagramReader, UdpLogger};
