//! CLI entry point: parses flags, wires up logging, and runs the reactor
//! until a shutdown signal brings it down. Mirrors the source's
//! `webserver.cpp`'s `main`/`getopt` handling.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use webserver_log::LogConfig;
use webserver_net::ReactorConfig;

/// A small HTTP/1.1 static file server.
#[derive(Parser, Debug)]
#[command(name = "webserver", version, about)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// 1 registers connection sockets edge-triggered, 0 level-triggered.
    #[arg(long, default_value_t = 1)]
    et: u8,

    /// Directory static files are served from.
    #[arg(long)]
    doc_root: PathBuf,

    /// Number of worker threads processing parsed requests.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Requests queued per worker pool before new ones are refused.
    #[arg(long, default_value_t = 10_000)]
    worker_queue_capacity: usize,

    /// Seconds between idle-connection sweeps; a connection is evicted
    /// after three sweeps with no activity, plus one second of grace.
    #[arg(long, default_value_t = 5)]
    timeslot_secs: u64,

    /// Directory rotating log files are written to. Defaults to `./logs`.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Lines per physical log file before rolling to a numeric-suffix
    /// overflow file.
    #[arg(long, default_value_t = 5_000_000)]
    log_lines_per_file: usize,

    /// Depth of the async log writer's queue (only used with `--async-log`).
    #[arg(long, default_value_t = 1_000)]
    log_queue_size: usize,

    /// Write logs on a dedicated background thread instead of the calling
    /// thread.
    #[arg(long)]
    async_log: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    ignore_sigpipe();

    let log_config = LogConfig {
        dir: cli.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs")),
        base_name: "webserver".to_string(),
        lines_per_file: cli.log_lines_per_file,
        async_queue_size: cli.async_log.then_some(cli.log_queue_size),
    };
    let (writer, log_handle) = webserver_log::build_writer(&log_config)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    let timeslot = Duration::from_secs(cli.timeslot_secs);
    let config = ReactorConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], cli.port)),
        doc_root: cli.doc_root,
        edge_triggered: cli.et != 0,
        worker_threads: cli.workers,
        worker_queue_capacity: cli.worker_queue_capacity,
        timeslot,
        idle_timeout: timeslot * 3 + Duration::from_secs(1),
    };

    webserver_net::run(config)?;
    log_handle.join();
    Ok(())
}

/// Without this, writing to a socket the peer already closed raises
/// `SIGPIPE` and kills the process instead of the write returning `EPIPE`.
fn ignore_sigpipe() {
    // SAFETY: SIG_IGN is always a valid disposition for SIGPIPE.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
