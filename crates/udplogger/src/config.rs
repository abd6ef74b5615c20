// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::*;
use crate::errors::Error;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Bounds enforced by the reassembly core.
///
/// Every value is clamped into its allowed range on construction rather than
/// rejected, so callers may pass anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Partial lines older than this are written out without a newline
    pub wait_timeout: Duration,
    /// Maximum number of tracked senders
    pub max_sessions: usize,
    /// A sender's pending bytes are force-flushed once they reach this size
    pub max_buffer: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl CollectorConfig {
    #[must_use]
    pub fn new(wait_timeout_secs: u64, max_sessions: usize, max_buffer: usize) -> Self {
        Self {
            wait_timeout: Duration::from_secs(
                wait_timeout_secs.clamp(MIN_WAIT_TIMEOUT_SECS, MAX_WAIT_TIMEOUT_SECS),
            ),
            max_sessions: max_sessions.clamp(MIN_MAX_SESSIONS, MAX_MAX_SESSIONS),
            max_buffer: max_buffer.clamp(MIN_MAX_BUFFER, MAX_MAX_BUFFER),
        }
    }

    /// The idle timeout in whole seconds.
    #[must_use]
    pub fn wait_timeout_secs(&self) -> i64 {
        i64::try_from(self.wait_timeout.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Everything the server binary needs: bind target, output location, socket
/// tuning and the core bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to (e.g., "0.0.0.0")
    pub host: IpAddr,
    /// Port to bind the UDP socket to
    pub port: u16,
    /// Directory that receives the daily log files
    pub log_dir: PathBuf,
    /// Requested SO_RCVBUF size; the kernel may adjust it
    pub recv_buffer: usize,
    /// Diagnostic log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub collector: CollectorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            recv_buffer: DEFAULT_RECV_BUFFER,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            collector: CollectorConfig::default(),
        }
    }
}

/// Parses a bounded numeric option. Garbage reads as zero and is then clamped
/// to the lower bound by the caller.
/// Reads the leading run of digits, ignoring whatever follows. No digits, or
/// a negative sign, reads as 0; overflow saturates.
fn lenient_number(value: &str) -> u64 {
    let value = value.trim_start();
    let value = value.strip_prefix('+').unwrap_or(value);
    value
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u64::from(digit - b'0'))
        })
}

fn lenient_usize(value: &str) -> usize {
    usize::try_from(lenient_number(value)).unwrap_or(usize::MAX)
}

impl ServerConfig {
    /// Create configuration from `UDPLOGGER_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup, using the same
    /// variable names as [`ServerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let pairs = [
            ("UDPLOGGER_IP", "ip"),
            ("UDPLOGGER_PORT", "port"),
            ("UDPLOGGER_DIR", "dir"),
            ("UDPLOGGER_TIMEOUT", "timeout"),
            ("UDPLOGGER_CLIENTS", "clients"),
            ("UDPLOGGER_WBUF", "wbuf"),
            ("UDPLOGGER_RBUF", "rbuf"),
        ];
        for (var, key) in pairs {
            if let Some(value) = lookup(var) {
                config.set(key, &value)?;
            }
        }
        if let Some(level) = lookup("UDPLOGGER_LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `key=value` command line arguments on top of this configuration.
    pub fn apply_args<I, S>(mut self, args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once('=') else {
                return Err(Error::UnknownOption(arg.to_string()));
            };
            self.set(key, value)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let collector = self.collector;
        match key {
            "ip" => {
                self.host = value.trim().parse().map_err(|_| {
                    Error::InvalidConfig(format!("'{value}' is not an IP address"))
                })?;
            }
            "port" => {
                self.port = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("'{value}' is not a port")))?;
            }
            "dir" => self.log_dir = PathBuf::from(value),
            "timeout" => {
                self.collector = CollectorConfig::new(
                    lenient_number(value),
                    collector.max_sessions,
                    collector.max_buffer,
                );
            }
            "clients" => {
                self.collector = CollectorConfig::new(
                    collector.wait_timeout.as_secs(),
                    lenient_usize(value),
                    collector.max_buffer,
                );
            }
            "wbuf" => {
                self.collector = CollectorConfig::new(
                    collector.wait_timeout.as_secs(),
                    collector.max_sessions,
                    lenient_usize(value),
                );
            }
            "rbuf" => {
                self.recv_buffer = lenient_usize(value).clamp(MIN_RECV_BUFFER, MAX_RECV_BUFFER);
            }
            _ => return Err(Error::UnknownOption(format!("{key}={value}"))),
        }
        Ok(())
    }

    /// Validate the parts of the configuration that are not clamped
    pub fn validate(&self) -> Result<(), Error> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.host, self.port)
    }
}

/// Usage text printed for an unrecognised argument.
#[must_use]
pub fn usage(name: &str) -> String {
    format!(
        "Simple UDP logger\n\n\
         Usage:\n  {name} [ip=$listen_ip] [port=$listen_port] [dir=$log_dir] \
         [timeout=$seconds_waiting_for_newline] [clients=$max_clients] \
         [wbuf=$write_buffer_size] [rbuf=$receive_buffer_size]\n\n\
         The value of $seconds_waiting_for_newline should be between {MIN_WAIT_TIMEOUT_SECS} and {MAX_WAIT_TIMEOUT_SECS}.\n\
         The value of $max_clients should be between {MIN_MAX_SESSIONS} and {MAX_MAX_SESSIONS}.\n\
         The value of $write_buffer_size should be between {MIN_MAX_BUFFER} and {MAX_MAX_BUFFER}.\n\
         The value of $receive_buffer_size should be between {MIN_RECV_BUFFER} and {MAX_RECV_BUFFER} \
         (though actual size might be adjusted by the kernel).\n\
         Every option may also be set through UDPLOGGER_<OPTION> environment variables.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 6666);
        assert_eq!(config.collector.wait_timeout, Duration::from_secs(10));
        assert_eq!(config.collector.max_sessions, 1024);
        assert_eq!(config.collector.max_buffer, 65536);
    }

    #[test]
    fn test_collector_config_clamps_low_values() {
        let config = CollectorConfig::new(0, 1, 10);
        assert_eq!(config.wait_timeout, Duration::from_secs(5));
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.max_buffer, 1024);
    }

    #[test]
    fn test_collector_config_clamps_high_values() {
        let config = CollectorConfig::new(10_000, 1_000_000, usize::MAX);
        assert_eq!(config.wait_timeout, Duration::from_secs(600));
        assert_eq!(config.max_sessions, 65536);
        assert_eq!(config.max_buffer, 1_048_576);
    }

    #[test]
    fn test_args_override_and_clamp() {
        let config = ServerConfig::default()
            .apply_args([
                "ip=127.0.0.1",
                "port=7777",
                "dir=/var/log/netconsole",
                "timeout=1",
                "clients=70000",
                "wbuf=2048",
                "rbuf=1",
            ])
            .unwrap();
        assert_eq!(config.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.port, 7777);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/netconsole"));
        assert_eq!(config.collector.wait_timeout, Duration::from_secs(5));
        assert_eq!(config.collector.max_sessions, 65536);
        assert_eq!(config.collector.max_buffer, 2048);
        assert_eq!(config.recv_buffer, 65536);
    }

    #[test]
    fn test_garbage_number_clamps_to_lower_bound() {
        let config = ServerConfig::default()
            .apply_args(["timeout=soon", "wbuf=-5"])
            .unwrap();
        assert_eq!(config.collector.wait_timeout, Duration::from_secs(5));
        assert_eq!(config.collector.max_buffer, 1024);
    }

    #[test]
    fn test_number_with_trailing_garbage_reads_leading_digits() {
        let config = ServerConfig::default()
            .apply_args(["timeout=100abc", "clients= 40x"])
            .unwrap();
        assert_eq!(config.collector.wait_timeout, Duration::from_secs(100));
        assert_eq!(config.collector.max_sessions, 40);
    }

    #[test]
    fn test_unknown_argument_is_rejected() {
        let result = ServerConfig::default().apply_args(["verbose"]);
        assert!(matches!(result, Err(Error::UnknownOption(_))));

        let result = ServerConfig::default().apply_args(["color=red"]);
        assert!(matches!(result, Err(Error::UnknownOption(_))));
    }

    #[test]
    fn test_bad_ip_is_rejected() {
        let result = ServerConfig::default().apply_args(["ip=not.an.ip"]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_lookup() {
        let config = ServerConfig::from_lookup(|key| match key {
            "UDPLOGGER_PORT" => Some("514".to_string()),
            "UDPLOGGER_CLIENTS" => Some("20".to_string()),
            "UDPLOGGER_LOG_LEVEL" => Some("DEBUG".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.port, 514);
        assert_eq!(config.collector.max_sessions, 20);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_log_level() {
        let config = ServerConfig {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("UDPLOGGER_TIMEOUT", "30");
        env::set_var("UDPLOGGER_DIR", "/tmp/consoles");
        let config = ServerConfig::from_env();
        env::remove_var("UDPLOGGER_TIMEOUT");
        env::remove_var("UDPLOGGER_DIR");

        let config = config.unwrap();
        assert_eq!(config.collector.wait_timeout, Duration::from_secs(30));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/consoles"));
    }

    #[test]
    #[serial]
    fn test_args_take_precedence_over_env() {
        env::set_var("UDPLOGGER_PORT", "9000");
        let config = ServerConfig::from_env().and_then(|c| c.apply_args(["port=9001"]));
        env::remove_var("UDPLOGGER_PORT");

        assert_eq!(config.unwrap().port, 9001);
    }

    #[test]
    fn test_usage_mentions_every_option() {
        let text = usage("udplogger");
        for key in ["ip=", "port=", "dir=", "timeout=", "clients=", "wbuf=", "rbuf="] {
            assert!(text.contains(key), "usage is missing {key}");
        }
    }
}
