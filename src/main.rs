// vim: cc=81
mod app;
mod bluetooth;
mod cli;
mod config;
mod console;
mod error;
mod utils;

use anyhow::{Context, Result};
use app::{Inbox, Session};
use bluetooth::agent::PairingAgent;
use bluetooth::bluez::{self, BluezSignals, BluezTransport};
use bluetooth::commands::CommandRunner;
use bluetooth::dispatcher;
use bluetooth::radio::Rfkill;
use bluetooth::refresh::RefreshScheduler;
use bluetooth::BluetoothTransport;
use clap_complete::Shell;
use cli::Overrides;
use config::Config;
use crossbeam::channel::{self, Sender};
use std::{
    ffi::OsStr,
    io::{self, BufRead},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{info, warn};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::EnvFilter;

/// How long background loops block before checking for shutdown
const POLL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    if let Some(("completions", sub)) = matches.subcommand() {
        if let Some(shell) = sub.get_one::<Shell>("shell") {
            cli::print_completions(*shell);
        }
        return Ok(());
    }

    let overrides = Overrides::from_matches(&matches);
    let config = load_config(&overrides)?;
    let _log_guard = init_logging(&config.log_file(), overrides.debug)?;
    info!("starting bluedeck {}", env!("CARGO_PKG_VERSION"));
    run(&config)
}

fn load_config(overrides: &Overrides) -> Result<Config> {
    let path = overrides.config.clone().or_else(config::default_path);
    let mut config = match &path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(secs) = overrides.refresh_interval {
        config.refresh_interval_secs = secs;
    }
    if let Some(color) = overrides.color {
        config.color = color;
    }
    if let Some(log_file) = &overrides.log_file {
        config.log_file = Some(log_file.clone());
    }
    config.validate()?;
    Ok(config)
}

/// A never rotating appender writing exactly to path.
fn log_appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .unwrap_or(OsStr::new("bluedeck.log"))
        .to_string_lossy();
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .with_context(|| format!("could not open log file {}", path.display()))
}

/// Logs go to a file, the terminal belongs to the session. Keep the guard
/// alive until exit so buffered lines get flushed.
fn init_logging(path: &Path, debug: bool) -> Result<WorkerGuard> {
    let appender = log_appender(path)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bluedeck={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true)
        .init();
    Ok(guard)
}

fn read_input(lines: Sender<String>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("input".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines.send(line).is_err() {
                break;
            }
        }
    })
}

fn run(config: &Config) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let transport: Arc<dyn BluetoothTransport> = Arc::new(
        BluezTransport::new(config.call_timeout())
            .context("could not connect to the system bus")?,
    );

    let signals = BluezSignals::subscribe(POLL)
        .context("could not subscribe to Bluetooth signals")?;
    let (signal_tx, signal_rx) = channel::unbounded();
    let signal_thread = dispatcher::spawn(signals, signal_tx, shutdown.clone())
        .context("could not start the signal dispatcher")?;

    let mut agent = PairingAgent::new(Arc::clone(&transport));
    let (responder, requests) = agent.attach(config.answer_timeout());
    let agent_thread = match bluez::agent::spawn(
        agent,
        &config.agent.path,
        &config.agent.capability,
        config.call_timeout(),
        POLL,
        shutdown.clone(),
    ) {
        Ok(handle) => Some(handle),
        Err(err) => {
            // Pairing devices that need no credentials still works
            warn!("pairing agent unavailable: {err}");
            None
        }
    };

    let (failure_tx, failure_rx) = channel::unbounded();
    let runner = CommandRunner::new(
        Arc::clone(&transport),
        Arc::new(Rfkill::new()),
        failure_tx,
    );
    let (refresh, resyncs) =
        RefreshScheduler::new(Arc::clone(&transport), config.refresh_interval());
    let (input_tx, input_rx) = channel::unbounded();
    read_input(input_tx).context("could not read from the terminal")?;

    let inbox = Inbox {
        signals: signal_rx,
        resyncs,
        requests,
        failures: failure_rx,
        input: input_rx,
    };
    let session = Session::new(runner, refresh, responder, config.color);
    let result = session.run(inbox, &mut io::stdout().lock());

    shutdown.store(true, Ordering::Relaxed);
    // The input thread stays blocked on stdin and dies with the process
    for handle in [Some(signal_thread), agent_thread].into_iter().flatten() {
        if handle.join().is_err() {
            warn!("a background thread panicked");
        }
    }
    result
}
