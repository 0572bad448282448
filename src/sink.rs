//! Destinations for accepted messages and session status lines

use crate::codec::DecodedMessage;
use colored::{Color, Colorize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Prefix of session status lines
pub const STATUS_PREFIX: &str = "[dbwin]";

/// Session lifecycle lines written next to the relayed messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Started,
    Stopped,
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Started => write!(f, "Started."),
            Status::Stopped => write!(f, "Stopped."),
            Status::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// `[PPPPP] text`, pid zero-padded to five digits
pub fn format_line(message: &DecodedMessage) -> String {
    let pid = message.process_id;
    if pid < 0 {
        format!("[-{:05}] {}", pid.unsigned_abs(), message.text)
    } else {
        format!("[{:05}] {}", pid, message.text)
    }
}

/// `[dbwin] Started.` and friends
pub fn format_status(status: &Status) -> String {
    format!("{STATUS_PREFIX} {status}")
}

/// Receiver of relayed output
pub trait Sink: Send + Sync {
    fn emit(&self, message: &DecodedMessage) -> io::Result<()>;

    fn status(&self, status: &Status) -> io::Result<()>;
}

/// Line-oriented writer sink, flushed after every line
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("sink writer poisoned"))?;
        writer.write_all(line.as_bytes())?;
        // Producers usually end their strings with a newline already
        if !line.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn emit(&self, message: &DecodedMessage) -> io::Result<()> {
        self.write_line(&format_line(message))
    }

    fn status(&self, status: &Status) -> io::Result<()> {
        self.write_line(&format_status(status))
    }
}

/// Sink writing to a log file.
///
/// The file is created (or truncated) only when the session reports
/// [`Status::Started`], i.e. once the relay is ours. A session that loses the
/// relay to another listener never touches that listener's log. Lines before
/// the first start are dropped.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<WriterSink<BufWriter<File>>>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Option<WriterSink<BufWriter<File>>>>> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("file sink poisoned"))
    }
}

impl Sink for FileSink {
    fn emit(&self, message: &DecodedMessage) -> io::Result<()> {
        match self.lock()?.as_ref() {
            Some(writer) => writer.emit(message),
            None => Ok(()),
        }
    }

    fn status(&self, status: &Status) -> io::Result<()> {
        let mut file = self.lock()?;
        // A restarted session keeps appending to the log it already owns
        if *status == Status::Started && file.is_none() {
            *file = Some(WriterSink::new(BufWriter::new(File::create(&self.path)?)));
        }
        match file.as_ref() {
            Some(writer) => writer.status(status),
            None => Ok(()),
        }
    }
}

/// Sink printing to stdout, optionally coloured
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    foreground: Option<Color>,
    background: Option<Color>,
}

impl ConsoleSink {
    pub fn new(foreground: Option<Color>, background: Option<Color>) -> Self {
        Self {
            foreground,
            background,
        }
    }

    fn paint(&self, line: &str) -> String {
        let mut styled = line.normal();
        if let Some(fg) = self.foreground {
            styled = styled.color(fg);
        }
        if let Some(bg) = self.background {
            styled = styled.on_color(bg);
        }
        styled.to_string()
    }

    fn print(&self, line: &str) -> io::Result<()> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut out = io::stdout().lock();
        writeln!(out, "{}", self.paint(line))?;
        out.flush()
    }
}

impl Sink for ConsoleSink {
    fn emit(&self, message: &DecodedMessage) -> io::Result<()> {
        self.print(&format_line(message))
    }

    fn status(&self, status: &Status) -> io::Result<()> {
        self.print(&format_status(status))
    }
}

/// Fans every line out to several sinks
#[derive(Default)]
pub struct TeeSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Run `f` on every sink; the first error is reported after all ran
    fn each<F>(&self, f: F) -> io::Result<()>
    where
        F: Fn(&dyn Sink) -> io::Result<()>,
    {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = f(sink.as_ref()) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Sink for TeeSink {
    fn emit(&self, message: &DecodedMessage) -> io::Result<()> {
        self.each(|sink| sink.emit(message))
    }

    fn status(&self, status: &Status) -> io::Result<()> {
        self.each(|sink| sink.status(status))
    }
}
