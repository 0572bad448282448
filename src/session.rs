//! Relay session: owns the relay objects and runs the receive loop
//!
//! ```text
//!   start():  create events + slot -> set "buffer ready" -> Started -> spawn loop
//!   loop:     wait "data ready" -> read slot -> decode -> filter -> sink
//!             -> set "buffer ready"
//!   exit:     release events + slot -> Stopped / Error: ...
//! ```
//!
//! Only one process on the machine can own the relay at a time.

use crate::buffer::SharedRelayBuffer;
use crate::codec::{decode, TextEncoding};
use crate::config::{ListenerConfig, DEFAULT_STOP_TIMEOUT};
use crate::error::{RelayError, Result};
use crate::filter::FilterChain;
use crate::names::RelayNames;
use crate::signal::{CancellationToken, SignalPair, WaitOutcome};
use crate::sink::{Sink, Status};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub names: RelayNames,
    pub filter: FilterChain,
    pub encoding: TextEncoding,
    /// Bound on joining the receive loop in [`RelaySession::stop`]
    pub stop_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            names: RelayNames::default(),
            filter: FilterChain::accept_all(),
            encoding: TextEncoding::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl From<&ListenerConfig> for SessionConfig {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            names: config.relay_names(),
            filter: config.filter_chain(),
            encoding: config.relay.encoding,
            stop_timeout: config.stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

/// Why the receive loop ended
#[derive(Debug)]
pub enum LoopExit {
    Cancelled,
    Failed(RelayError),
}

/// Events and slot, held for exactly as long as the loop runs
struct RelayChannel {
    signals: SignalPair,
    buffer: SharedRelayBuffer,
}

impl RelayChannel {
    fn create(names: &RelayNames) -> Result<Self> {
        let signals = SignalPair::create(names)?;
        let buffer = SharedRelayBuffer::create(&names.buffer)?;
        Ok(Self { signals, buffer })
    }
}

struct Listener {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    /// Disconnects when the loop thread is done
    done: mpsc::Receiver<()>,
}

#[derive(Default)]
struct Inner {
    listener: Option<Listener>,
    started: bool,
}

/// The single listener of a relay
pub struct RelaySession {
    config: SessionConfig,
    sink: Arc<dyn Sink>,
    inner: Mutex<Inner>,
}

impl RelaySession {
    pub fn new(config: SessionConfig, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            sink,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, status: &Status) {
        if let Err(e) = self.sink.status(status) {
            warn!(error = %e, %status, "failed to write status line");
        }
    }

    pub fn state(&self) -> SessionState {
        let inner = self.lock();
        match &inner.listener {
            Some(listener) if !listener.handle.is_finished() => SessionState::Running,
            Some(_) => SessionState::Stopped,
            None if inner.started => SessionState::Stopped,
            None => SessionState::Idle,
        }
    }

    /// Claim the relay and start receiving on a background thread.
    ///
    /// A no-op while already running. Setup failures are written to the sink
    /// as an error line and returned; the session then stays stopped.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if let Some(listener) = &inner.listener {
            if !listener.handle.is_finished() {
                debug!("relay session already running");
                return Ok(());
            }
        }
        // A loop that ended on its own still needs reaping
        if let Some(old) = inner.listener.take() {
            if old.handle.join().is_err() {
                warn!("previous receive loop panicked");
            }
        }
        inner.started = true;

        let channel = match self.claim() {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "relay setup failed");
                self.report(&Status::Error(e.to_string()));
                return Err(e);
            }
        };
        self.report(&Status::Started);
        info!(
            buffer = %self.config.names.buffer,
            encoding = ?self.config.encoding,
            "relay session started"
        );

        let cancel = CancellationToken::new();
        let (done_tx, done) = mpsc::channel();
        let worker = ReceiveLoop {
            channel,
            cancel: cancel.clone(),
            filter: self.config.filter.clone(),
            encoding: self.config.encoding,
            sink: Arc::clone(&self.sink),
        };

        // On failure the closure is dropped, and the relay objects with it
        let spawned = thread::Builder::new()
            .name("dbwin-listener".into())
            .spawn(move || {
                worker.run();
                drop(done_tx);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                let e = RelayError::Setup {
                    name: "dbwin-listener thread".to_string(),
                    source,
                };
                error!(error = %e, "cannot spawn receive loop");
                self.report(&Status::Error(e.to_string()));
                return Err(e);
            }
        };

        inner.listener = Some(Listener {
            handle,
            cancel,
            done,
        });
        Ok(())
    }

    /// Create the relay objects and open the slot to producers
    fn claim(&self) -> Result<RelayChannel> {
        let channel = RelayChannel::create(&self.config.names)?;
        channel.signals.signal_buffer_ready()?;
        Ok(channel)
    }

    /// Stop with the configured join timeout
    pub fn stop(&self) -> bool {
        self.stop_timeout(self.config.stop_timeout)
    }

    /// Cancel the loop and join it for at most `timeout`.
    ///
    /// Returns `false` if the loop was still running when the timeout hit;
    /// it is detached in that case. A no-op on an idle session.
    pub fn stop_timeout(&self, timeout: Duration) -> bool {
        let mut inner = self.lock();
        let Some(listener) = inner.listener.take() else {
            return true;
        };

        listener.cancel.cancel();
        match listener.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "receive loop did not stop in time, detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if listener.handle.join().is_err() {
                    warn!("receive loop panicked");
                }
                true
            }
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the loop thread owns
struct ReceiveLoop {
    channel: RelayChannel,
    cancel: CancellationToken,
    filter: FilterChain,
    encoding: TextEncoding,
    sink: Arc<dyn Sink>,
}

impl ReceiveLoop {
    fn run(self) {
        let Self {
            channel,
            cancel,
            filter,
            encoding,
            sink,
        } = self;

        let exit = match relay_messages(&channel, &cancel, &filter, encoding, sink.as_ref()) {
            Ok(()) => LoopExit::Cancelled,
            Err(e) => LoopExit::Failed(e),
        };
        // Release the names before anyone hears that we stopped
        drop(channel);

        let status = match exit {
            LoopExit::Cancelled => {
                info!("relay session stopped");
                Status::Stopped
            }
            LoopExit::Failed(e) => {
                error!(error = %e, "relay session failed");
                Status::Error(e.to_string())
            }
        };
        if let Err(e) = sink.status(&status) {
            warn!(error = %e, %status, "failed to write status line");
        }
    }
}

/// Shuttle messages until cancelled; any error ends the session
fn relay_messages(
    channel: &RelayChannel,
    cancel: &CancellationToken,
    filter: &FilterChain,
    encoding: TextEncoding,
    sink: &dyn Sink,
) -> Result<()> {
    loop {
        if channel.signals.wait_data_ready(cancel)? == WaitOutcome::Cancelled {
            return Ok(());
        }

        let message = decode(&channel.buffer.read_all(), encoding);
        let accepted = filter.accept(&message.text);
        debug!(pid = message.process_id, accepted, "relay message");
        if accepted {
            sink.emit(&message).map_err(RelayError::Sink)?;
        }

        // The slot goes back to producers whether or not the message was kept
        channel.signals.signal_buffer_ready()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodedMessage;
    use crate::producer::RelayProducer;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl Sink for Recorder {
        fn emit(&self, message: &DecodedMessage) -> io::Result<()> {
            self.lines.lock().unwrap().push(crate::sink::format_line(message));
            Ok(())
        }

        fn status(&self, status: &Status) -> io::Result<()> {
            self.lines.lock().unwrap().push(status.to_string());
            Ok(())
        }
    }

    fn wait_for_line(recorder: &Recorder, line: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !recorder.lines().iter().any(|l| l == line) {
            assert!(Instant::now() < deadline, "never saw {line:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn private_config() -> SessionConfig {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        SessionConfig {
            names: RelayNames::with_prefix(&format!("ses{}_{}", std::process::id(), n)),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_idle_until_started() {
        let recorder = Arc::new(Recorder::default());
        let session = RelaySession::new(private_config(), recorder.clone());
        assert_eq!(session.state(), SessionState::Idle);
        // Stopping an idle session does nothing
        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(recorder.lines().is_empty());
    }

    #[test]
    fn test_start_twice_runs_one_loop() {
        let recorder = Arc::new(Recorder::default());
        let session = RelaySession::new(private_config(), recorder.clone());

        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);

        assert!(session.stop());
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(recorder.lines(), vec!["Started.", "Stopped."]);
    }

    #[test]
    fn test_stop_interrupts_blocked_wait() {
        let recorder = Arc::new(Recorder::default());
        let session = RelaySession::new(private_config(), recorder.clone());
        session.start().unwrap();

        let started = Instant::now();
        assert!(session.stop_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(recorder.lines().last().map(String::as_str), Some("Stopped."));
    }

    #[test]
    fn test_second_session_is_already_running() {
        let config = private_config();
        let first_sink = Arc::new(Recorder::default());
        let second_sink = Arc::new(Recorder::default());
        let first = RelaySession::new(config.clone(), first_sink.clone());
        let second = RelaySession::new(config, second_sink.clone());

        first.start().unwrap();
        let err = second.start().unwrap_err();
        assert!(err.is_already_running());
        assert_eq!(second.state(), SessionState::Stopped);

        let lines = second_sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error: "));

        // The winner keeps working
        let producer = RelayProducer::open(&first.config.names, TextEncoding::Utf8).unwrap();
        producer.send(7, "still mine", Duration::from_secs(5)).unwrap();
        wait_for_line(&first_sink, "[00007] still mine");
        assert!(first.stop());
    }

    #[test]
    fn test_restart_after_stop() {
        let recorder = Arc::new(Recorder::default());
        let session = RelaySession::new(private_config(), recorder.clone());

        session.start().unwrap();
        session.stop();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        session.stop();

        assert_eq!(
            recorder.lines(),
            vec!["Started.", "Stopped.", "Started.", "Stopped."]
        );
    }

    struct Broken;

    impl Sink for Broken {
        fn emit(&self, _: &DecodedMessage) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }

        fn status(&self, _: &Status) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_ends_session_and_releases_names() {
        let config = private_config();
        let names = config.names.clone();
        let session = RelaySession::new(config, Arc::new(Broken));
        session.start().unwrap();

        let producer = RelayProducer::open(&names, TextEncoding::Utf8).unwrap();
        producer.send(1, "doomed", Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.state() == SessionState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.state(), SessionState::Stopped);

        // Names were released, so a new owner can claim them
        drop(producer);
        assert!(SignalPair::create(&names).is_ok());
    }

    struct Panicking;

    impl Sink for Panicking {
        fn emit(&self, _: &DecodedMessage) -> io::Result<()> {
            panic!("sink exploded");
        }

        fn status(&self, _: &Status) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_restart_reaps_panicked_loop() {
        let config = private_config();
        let names = config.names.clone();
        let session = RelaySession::new(config, Arc::new(Panicking));
        session.start().unwrap();

        let producer = RelayProducer::open(&names, TextEncoding::Utf8).unwrap();
        producer.send(1, "boom", Duration::from_secs(5)).unwrap();
        drop(producer);

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.state() == SessionState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.state(), SessionState::Stopped);

        // The dead loop is joined and the unwound names can be claimed again
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.stop());
    }
}
