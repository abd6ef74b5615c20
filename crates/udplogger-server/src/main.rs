// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use udplogger::{
    clock::{Clock, SystemClock},
    config::{usage, ServerConfig},
    log_writer::local_time,
    Collector, DatagramReader, Error, UdpLogger,
};

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> ExitCode {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "udplogger".to_string());

    let config = match ServerConfig::from_env().and_then(|config| config.apply_args(args)) {
        Ok(config) => config,
        Err(Error::UnknownOption(option)) => {
            eprintln!("Unknown option '{option}'\n");
            eprint!("{}", usage(&program));
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = config.log_level.clone();

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    // The loop only ends through the abort path, which already logged why.
    if let Err(e) = run(config).await {
        error!("{e}");
    }
    ExitCode::FAILURE
}

async fn run(config: ServerConfig) -> Result<udplogger::Fatal, Error> {
    let (socket, granted_recv_buffer) = bind_socket(&config)?;
    let bound = socket.local_addr()?;
    let log_dir = resolve_log_dir(&config.log_dir)?;

    let now = SystemClock.now();
    let collector = Collector::new(config.collector, &log_dir, now)?;

    let started = local_time(now)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    info!("Started at {} at {}", started, log_dir.display());
    info!(
        "Options: ip={} port={} dir={} timeout={} clients={} wbuf={} rbuf={}",
        bound.ip(),
        bound.port(),
        log_dir.display(),
        config.collector.wait_timeout.as_secs(),
        config.collector.max_sessions,
        config.collector.max_buffer,
        granted_recv_buffer,
    );

    let logger = UdpLogger::new(DatagramReader::UdpSocket(socket), collector, SystemClock);
    Ok(logger.spin().await)
}

/// Creates the UDP socket with the requested receive buffer. The kernel may
/// grant a different size; the granted size is returned.
fn bind_socket(config: &ServerConfig) -> Result<(tokio::net::UdpSocket, usize), Error> {
    let addr = config.bind_addr();
    let bind_error = |source| Error::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(config.recv_buffer)?;
    let granted = socket.recv_buffer_size()?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.set_nonblocking(true)?;

    let socket = tokio::net::UdpSocket::from_std(socket.into())?;
    Ok((socket, granted))
}

fn resolve_log_dir(dir: &Path) -> Result<PathBuf, Error> {
    let resolved = std::fs::canonicalize(dir).map_err(|source| Error::LogDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    if !resolved.is_dir() {
        return Err(Error::LogDirectory {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }
    Ok(resolved)
}
