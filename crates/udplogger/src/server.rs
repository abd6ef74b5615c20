// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP logger event loop.
//!
//! One task owns the socket, the [`Collector`] and the clock. Each cycle it
//! flushes the output file, waits for the socket to become readable (bounded
//! while partial lines are pending so they can time out), flushes stale
//! partial lines, and then drains every datagram that is immediately
//! available until the wall clock moves to the next second.

use crate::clock::{Clock, SystemClock};
use crate::collector::{Collector, Ingest};
use crate::constants::{PENDING_WAKE_INTERVAL, RECEIVE_BUFFER_SIZE};
use crate::errors::Fatal;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Outcome of waiting on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// Outcome of one non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Datagram(usize, SocketAddr),
    WouldBlock,
}

// DatagramReader abstracts where datagrams come from.
pub enum DatagramReader {
    /// UDP socket reader
    UdpSocket(tokio::net::UdpSocket),

    /// Mirror reader for testing - replays scripted datagrams in order
    MirrorTest(VecDeque<(SocketAddr, Vec<u8>)>),
}

impl DatagramReader {
    /// Waits until a datagram can be received, or `timeout` elapses. `None`
    /// waits indefinitely.
    pub async fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<Readiness> {
        match self {
            DatagramReader::UdpSocket(socket) => match timeout {
                Some(limit) => match tokio::time::timeout(limit, socket.readable()).await {
                    Ok(ready) => ready.map(|()| Readiness::Ready),
                    Err(_) => Ok(Readiness::TimedOut),
                },
                None => socket.readable().await.map(|()| Readiness::Ready),
            },
            DatagramReader::MirrorTest(queue) => {
                if !queue.is_empty() {
                    return Ok(Readiness::Ready);
                }
                match timeout {
                    Some(limit) => {
                        tokio::time::sleep(limit).await;
                        Ok(Readiness::TimedOut)
                    }
                    None => std::future::pending().await,
                }
            }
        }
    }

    /// Receives one datagram into `buf` without blocking.
    pub fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Received> {
        match self {
            DatagramReader::UdpSocket(socket) => match socket.try_recv_from(buf) {
                Ok((len, src)) => Ok(Received::Datagram(len, src)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Received::WouldBlock),
                Err(e) => Err(e),
            },
            DatagramReader::MirrorTest(queue) => match queue.pop_front() {
                Some((src, data)) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(Received::Datagram(len, src))
                }
                None => Ok(Received::WouldBlock),
            },
        }
    }
}

/// UDP logger server: receives datagrams and hands them to the collector.
pub struct UdpLogger<C: Clock = SystemClock> {
    reader: DatagramReader,
    collector: Collector,
    clock: C,
    buf: Box<[u8]>,
}

impl<C: Clock> UdpLogger<C> {
    #[must_use]
    pub fn new(reader: DatagramReader, collector: Collector, clock: C) -> Self {
        Self {
            reader,
            collector,
            clock,
            buf: vec![0; RECEIVE_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Runs until interrupted (Ctrl-C / SIGINT) or a fatal condition, then
    /// writes out everything still buffered. Never returns otherwise.
    pub async fn spin(self) -> Fatal {
        self.spin_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Can't listen for interrupt signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Like [`UdpLogger::spin`] but stops when `shutdown` resolves.
    pub async fn spin_until<F>(mut self, shutdown: F) -> Fatal
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if let Err(e) = self.collector.flush_output() {
                warn!("Failed to flush log file: {}", e);
            }

            let timeout = self
                .collector
                .has_pending()
                .then_some(PENDING_WAKE_INTERVAL);
            let woke = tokio::select! {
                biased;
                () = &mut shutdown => None,
                readiness = self.reader.wait_readable(timeout) => Some(readiness),
            };
            match woke {
                None => return self.terminate(Fatal::Interrupted),
                Some(Err(e)) => debug!("Wait for datagrams failed: {}", e),
                Some(Ok(readiness)) => trace!("Woke up: {:?}", readiness),
            }

            if let Err(fatal) = self.cycle() {
                return self.terminate(fatal);
            }
        }
    }

    /// One timeout-scan followed by one drain burst.
    pub fn cycle(&mut self) -> Result<(), Fatal> {
        let now = self.clock.now();
        self.collector.timeout_scan(now);
        self.drain(now)?;
        self.collector.reclaim_if_requested();
        Ok(())
    }

    /// Receives datagrams until none are immediately available or the clock
    /// leaves the second the burst started in.
    fn drain(&mut self, now: i64) -> Result<usize, Fatal> {
        let mut received = 0;
        while self.clock.now() == now {
            let (len, src) = match self.reader.try_receive(&mut self.buf) {
                Ok(Received::Datagram(len, src)) => (len, src),
                Ok(Received::WouldBlock) => break,
                Err(e) => {
                    debug!("Receive failed: {}", e);
                    break;
                }
            };
            if len == 0 {
                continue;
            }
            received += 1;
            if self.collector.ingest(src, &self.buf[..len], now)? == Ingest::Rejected {
                trace!("Dropped datagram from {}", src);
            }
        }
        Ok(received)
    }

    fn terminate(mut self, reason: Fatal) -> Fatal {
        let now = self.clock.now();
        self.collector.abort(reason, now);
        reason
    }
}
