//! dbwin - listen on (or write to) the DBWIN debug-output relay

mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use dbwin_relay::config::DEFAULT_CONFIG_FILE;
use dbwin_relay::producer::{current_pid, DEFAULT_SEND_TIMEOUT};
use dbwin_relay::{
    ConsoleSink, FileSink, ListenerConfig, RelayProducer, RelaySession, SessionConfig, TeeSink,
};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dbwin")]
#[command(version, about = "Listener for the DBWIN debug-output relay", long_about = None)]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Claim the relay and print accepted messages until Enter or Ctrl+C (default)
    Listen {
        /// Output file, overriding the config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send one message to the running listener
    Send {
        /// Message text
        text: String,

        /// Process id to report instead of our own
        #[arg(long)]
        pid: Option<i32>,

        /// Seconds to wait for the relay slot
        #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT.as_secs())]
        timeout_secs: u64,
    },

    /// Remove relay names left behind by a listener that crashed.
    /// Do not run while a listener is active.
    #[cfg(unix)]
    Clean,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_json);

    let config = ListenerConfig::load(&cli.config)?;
    debug!(path = %cli.config.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Listen { output: None }) {
        Commands::Listen { output } => listen(&config, output),
        Commands::Send {
            text,
            pid,
            timeout_secs,
        } => send(&config, &text, pid, Duration::from_secs(timeout_secs)),
        #[cfg(unix)]
        Commands::Clean => clean(&config),
    }
}

fn listen(config: &ListenerConfig, output: Option<PathBuf>) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| config.output.file.clone());
    let console = ConsoleSink::new(config.foreground()?, config.background()?);
    // Opened only once the relay is ours, so a second listener leaves the log alone
    let sink = Arc::new(TeeSink::new().with(console).with(FileSink::new(&output)));

    let (shutdown_tx, shutdown) = mpsc::channel();
    let on_signal = shutdown_tx.clone();
    ctrlc::set_handler(move || {
        let _ = on_signal.send(());
    })
    .context("cannot install signal handler")?;

    let session = RelaySession::new(SessionConfig::from(config), sink);
    session.start()?;
    info!(output = %output.display(), "listening");
    eprintln!("{}", style("Press Enter or Ctrl+C to stop.").dim());

    thread::Builder::new()
        .name("dbwin-stdin".into())
        .spawn(move || {
            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(n) if n > 0 => {
                    let _ = shutdown_tx.send(());
                }
                // Closed stdin: only a signal stops us now
                Ok(_) => debug!("stdin closed"),
                Err(e) => debug!(error = %e, "stdin unreadable"),
            }
        })
        .context("cannot spawn stdin reader")?;

    if !run_until_shutdown(&session, &shutdown) {
        warn!("listener did not stop cleanly");
    }
    Ok(())
}

/// Block until a stop request arrives, then stop the session
fn run_until_shutdown(session: &RelaySession, shutdown: &Receiver<()>) -> bool {
    if shutdown.recv().is_ok() {
        info!("shutdown requested");
    }
    session.stop()
}

fn send(
    config: &ListenerConfig,
    text: &str,
    pid: Option<i32>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let producer = RelayProducer::open(&config.relay_names(), config.relay.encoding)?;
    let pid = pid.unwrap_or_else(current_pid);
    producer.send(pid, text, timeout)?;
    println!("{} sent as pid {}", style("✓").green(), pid);
    Ok(())
}

#[cfg(unix)]
fn clean(config: &ListenerConfig) -> anyhow::Result<()> {
    for name in config.relay_names().all() {
        match dbwin_relay::sys::unlink(name) {
            Ok(()) => println!("{} removed {}", style("✓").green(), name),
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!(name, "not present"),
            Err(e) => return Err(e).with_context(|| format!("cannot remove '{name}'")),
        }
    }
    Ok(())
}
