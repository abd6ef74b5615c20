// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Owner of all reassembly state: sessions, the output file and the bounds.
//!
//! Every operation takes the current time explicitly; the event loop is the
//! only caller that reads the clock.

use crate::config::CollectorConfig;
use crate::errors::{Error, Fatal};
use crate::log_writer::LogWriter;
use crate::registry::{ReclaimStats, SessionRegistry};
use crate::session::Session;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, error, trace};

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Accepted,
    /// Registry full; the datagram was dropped
    Rejected,
}

pub struct Collector {
    config: CollectorConfig,
    registry: SessionRegistry,
    writer: LogWriter,
    reclaim_requested: bool,
    /// Bytes that may still be appended before appends fail as if out of
    /// memory. `None` means unlimited.
    #[cfg(test)]
    append_budget: Option<usize>,
}

fn emit_complete_lines(session: &mut Session, writer: &mut LogWriter, now: i64) -> usize {
    let timestamp = session.first_byte_time().unwrap_or(now);
    session.extract_complete_lines(|prefix, line| writer.emit(prefix, line, timestamp, false))
}

fn emit_partial(session: &mut Session, writer: &mut LogWriter, now: i64) -> bool {
    let timestamp = session.first_byte_time().unwrap_or(now);
    session.force_flush(|prefix, rest| writer.emit(prefix, rest, timestamp, true))
}

impl Collector {
    /// Opens today's log file in `log_dir`.
    pub fn new(
        config: CollectorConfig,
        log_dir: impl Into<PathBuf>,
        now: i64,
    ) -> Result<Self, Error> {
        Ok(Self {
            config,
            registry: SessionRegistry::new(config.max_sessions),
            writer: LogWriter::open(log_dir, now)?,
            reclaim_requested: false,
            #[cfg(test)]
            append_budget: None,
        })
    }

    #[cfg(test)]
    pub(crate) fn fail_appends_after(&mut self, bytes: usize) {
        self.append_budget = Some(bytes);
    }

    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.registry.has_pending()
    }

    /// Feeds one datagram from `from` received at `now`.
    ///
    /// The whole datagram is appended, complete lines are written, and if
    /// what remains has reached the configured maximum it is flushed as a
    /// partial line. Pending bytes therefore stay below the maximum plus one
    /// datagram.
    pub fn ingest(&mut self, from: SocketAddr, bytes: &[u8], now: i64) -> Result<Ingest, Fatal> {
        let Some(session) = self.registry.find_or_create(from) else {
            return Ok(Ingest::Rejected);
        };
        trace!("Received {} bytes from {}", bytes.len(), from);

        #[cfg(test)]
        if let Some(budget) = self.append_budget.as_mut() {
            *budget = budget
                .checked_sub(bytes.len())
                .ok_or(Fatal::AllocationFailure)?;
        }
        session.append(bytes, now)?;
        if bytes.contains(&b'\n') {
            emit_complete_lines(session, &mut self.writer, now);
        }
        if session.pending().len() >= self.config.max_buffer {
            debug!(
                "Flushing {} bytes from {} without newline: buffer limit reached",
                session.pending().len(),
                from
            );
            emit_partial(session, &mut self.writer, now);
        }

        if self.writer.take_rotation_hint() {
            self.reclaim_requested = true;
        }
        Ok(Ingest::Accepted)
    }

    /// Flushes every partial line that has waited at least the idle timeout.
    /// Returns the number of sessions flushed.
    pub fn timeout_scan(&mut self, now: i64) -> usize {
        let timeout = self.config.wait_timeout_secs();
        let writer = &mut self.writer;
        let flushed = self
            .registry
            .sessions_mut()
            .filter(|session| session.is_stale(now, timeout))
            .map(|session| emit_partial(session, writer, now))
            .filter(|&flushed| flushed)
            .count();
        if flushed > 0 {
            debug!("Flushed {} stale partial lines", flushed);
        }
        if self.writer.take_rotation_hint() {
            self.reclaim_requested = true;
        }
        flushed
    }

    /// Runs a reclamation pass unconditionally.
    pub fn reclaim(&mut self) -> ReclaimStats {
        self.reclaim_requested = false;
        self.registry.reclaim()
    }

    /// Runs a reclamation pass if a rotation happened since the last pass.
    pub fn reclaim_if_requested(&mut self) -> Option<ReclaimStats> {
        if self.reclaim_requested {
            Some(self.reclaim())
        } else {
            None
        }
    }

    pub fn flush_output(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    #[must_use]
    pub fn current_log_path(&self) -> PathBuf {
        self.writer.current_path()
    }

    /// Terminal path: writes out every partial line, then a marker naming
    /// `reason`, then flushes. Nothing is reclaimed or retried.
    pub fn abort(&mut self, reason: Fatal, now: i64) {
        let writer = &mut self.writer;
        for session in self.registry.sessions_mut() {
            emit_partial(session, writer, now);
        }
        writer.write_marker(&reason.to_string());
        if let Err(e) = writer.flush() {
            error!("Failed to flush log file while aborting: {}", e);
        }
        error!("Aborted due to {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::net::{IpAddr, Ipv4Addr};
    use tracing_test::traced_test;

    const NOW: i64 = 1_700_000_000;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last)), 6665)
    }

    fn setup(config: CollectorConfig) -> (tempfile::TempDir, Collector) {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(config, dir.path(), NOW).unwrap();
        (dir, collector)
    }

    fn contents(collector: &mut Collector) -> String {
        collector.flush_output().unwrap();
        std::fs::read_to_string(collector.current_log_path()).unwrap()
    }

    fn payloads(log: &str) -> Vec<&str> {
        // "YYYY-MM-DD HH:MM:SS ip:port payload"
        log.lines()
            .map(|line| line.splitn(4, ' ').nth(3).unwrap_or(""))
            .collect()
    }

    #[test]
    fn test_lines_split_across_datagrams() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.ingest(addr(1), b"Linux version 6.1", NOW).unwrap();
        collector.ingest(addr(1), b".0\nCommand line: ro", NOW).unwrap();
        collector.ingest(addr(1), b"ot=/dev/sda1\n", NOW).unwrap();

        let log = contents(&mut collector);
        assert_eq!(
            payloads(&log),
            ["Linux version 6.1.0", "Command line: root=/dev/sda1"]
        );
        assert!(log.lines().all(|l| l.contains(" 192.168.1.1:6665 ")));
        assert!(!collector.has_pending());
    }

    #[test]
    fn test_senders_are_reassembled_independently() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.ingest(addr(1), b"alpha ", NOW).unwrap();
        collector.ingest(addr(2), b"beta ", NOW).unwrap();
        collector.ingest(addr(1), b"one\n", NOW).unwrap();
        collector.ingest(addr(2), b"two\n", NOW).unwrap();

        let log = contents(&mut collector);
        let lines: Vec<&str> = log.lines().map(|l| &l[20..]).collect();
        assert_eq!(
            lines,
            ["192.168.1.1:6665 alpha one", "192.168.1.2:6665 beta two"]
        );
    }

    #[test]
    fn test_record_uses_time_line_started_arriving() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.ingest(addr(1), b"slow ", NOW).unwrap();
        collector.ingest(addr(1), b"line\nnext", NOW + 3).unwrap();

        let session = collector.registry().get(&addr(1)).unwrap();
        assert_eq!(session.first_byte_time(), Some(NOW));

        let log = contents(&mut collector);
        let expected = Local
            .timestamp_opt(NOW, 0)
            .unwrap()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        assert!(log.starts_with(&expected));
    }

    #[test]
    fn test_remainder_keeps_original_start_time_for_timeout() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.ingest(addr(1), b"a", NOW).unwrap();
        collector.ingest(addr(1), b"\nb", NOW + 5).unwrap();

        assert_eq!(collector.timeout_scan(NOW + 10), 1);
        assert!(!collector.has_pending());
        assert_eq!(payloads(&contents(&mut collector)), ["a", "b"]);
    }

    #[test]
    fn test_oversized_buffer_is_force_flushed() {
        let config = CollectorConfig::new(10, 10, 1024);
        let (_dir, mut collector) = setup(config);

        for _ in 0..3 {
            collector.ingest(addr(1), &[b'a'; 400], NOW).unwrap();
        }
        let log = contents(&mut collector);
        assert_eq!(payloads(&log), [&"a".repeat(1200)[..]]);
        assert!(log.ends_with('\n'));

        let session = collector.registry().get(&addr(1)).unwrap();
        assert!(!session.has_pending());
    }

    #[test]
    fn test_single_datagram_larger_than_limit_is_flushed_whole() {
        let config = CollectorConfig::new(10, 10, 1024);
        let (_dir, mut collector) = setup(config);

        collector.ingest(addr(1), &[b'b'; 2500], NOW).unwrap();
        let log = contents(&mut collector);
        assert_eq!(payloads(&log), [&"b".repeat(2500)[..]]);
        assert!(!collector.registry().get(&addr(1)).unwrap().has_pending());
    }

    #[test]
    fn test_line_completed_by_datagram_crossing_limit_stays_whole() {
        let config = CollectorConfig::new(10, 10, 1024);
        let (_dir, mut collector) = setup(config);

        collector.ingest(addr(1), &[b'a'; 1000], NOW).unwrap();
        let mut tail = vec![b'b'; 49];
        tail.push(b'\n');
        collector.ingest(addr(1), &tail, NOW).unwrap();

        let log = contents(&mut collector);
        let expected = format!("{}{}", "a".repeat(1000), "b".repeat(49));
        assert_eq!(payloads(&log), [expected.as_str()]);
        assert!(!collector.has_pending());
    }

    #[test]
    fn test_remainder_past_limit_after_lines_is_flushed() {
        let config = CollectorConfig::new(10, 10, 1024);
        let (_dir, mut collector) = setup(config);

        let mut datagram = b"short\n".to_vec();
        datagram.extend_from_slice(&[b'c'; 1100]);
        collector.ingest(addr(1), &datagram, NOW).unwrap();

        let log = contents(&mut collector);
        assert_eq!(payloads(&log), ["short", &"c".repeat(1100)[..]]);
        assert!(!collector.has_pending());
    }

    #[test]
    fn test_timeout_scan_flushes_stale_partial_once() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.ingest(addr(1), b"login: ", NOW).unwrap();

        assert_eq!(collector.timeout_scan(NOW + 9), 0);
        assert_eq!(collector.timeout_scan(NOW + 10), 1);
        assert!(!collector.has_pending());
        assert_eq!(collector.timeout_scan(NOW + 20), 0);

        let log = contents(&mut collector);
        assert_eq!(payloads(&log), ["login: "]);
    }

    #[test]
    fn test_rejected_sender_is_dropped_silently() {
        let config = CollectorConfig::new(10, 10, 65536);
        let (_dir, mut collector) = setup(config);
        for i in 0..10 {
            assert_eq!(
                collector.ingest(addr(i), b"busy", NOW).unwrap(),
                Ingest::Accepted
            );
        }

        assert_eq!(
            collector.ingest(addr(100), b"hello\n", NOW).unwrap(),
            Ingest::Rejected
        );
        assert!(contents(&mut collector).is_empty());

        collector.ingest(addr(0), b"\n", NOW).unwrap();
        assert_eq!(
            collector.ingest(addr(100), b"hello\n", NOW).unwrap(),
            Ingest::Accepted
        );
        assert_eq!(payloads(&contents(&mut collector)), ["busy", "hello"]);
    }

    #[test]
    fn test_rotation_requests_reclaim() {
        let dir = tempfile::tempdir().unwrap();
        let before = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap().timestamp();
        let after = Local.with_ymd_and_hms(2024, 2, 1, 0, 0, 1).unwrap().timestamp();
        let mut collector = Collector::new(CollectorConfig::default(), dir.path(), before).unwrap();

        collector.ingest(addr(1), b"old day\n", before).unwrap();
        assert!(collector.reclaim_if_requested().is_none());
        collector.ingest(addr(2), b"new day\n", after).unwrap();
        let stats = collector.reclaim_if_requested().unwrap();
        assert_eq!(stats.removed, 2);

        collector.flush_output().unwrap();
        let old = std::fs::read_to_string(dir.path().join("2024-01-31.log")).unwrap();
        let new = std::fs::read_to_string(dir.path().join("2024-02-01.log")).unwrap();
        assert_eq!(old, "2024-01-31 23:59:59 192.168.1.1:6665 old day\n");
        assert_eq!(new, "2024-02-01 00:00:01 192.168.1.2:6665 new day\n");
    }

    #[test]
    fn test_append_failure_is_fatal() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.fail_appends_after(4);
        assert_eq!(collector.ingest(addr(1), b"boot", NOW), Ok(Ingest::Accepted));
        assert_eq!(
            collector.ingest(addr(1), b"more", NOW),
            Err(Fatal::AllocationFailure)
        );
        assert_eq!(collector.registry().get(&addr(1)).unwrap().pending(), b"boot");
    }

    #[test]
    #[traced_test]
    fn test_abort_flushes_partials_and_writes_marker() {
        let (_dir, mut collector) = setup(CollectorConfig::default());
        collector.ingest(addr(1), b"Kernel panic - not syncing", NOW).unwrap();
        collector.ingest(addr(2), b"complete\n", NOW).unwrap();

        collector.abort(Fatal::AllocationFailure, NOW + 1);

        let log = std::fs::read_to_string(collector.current_log_path()).unwrap();
        assert_eq!(payloads(&log)[..2], ["complete", "Kernel panic - not syncing"]);
        assert!(log.ends_with("[aborted due to memory allocation failure]\n"));
        assert!(logs_contain("Aborted due to memory allocation failure"));
    }
}
