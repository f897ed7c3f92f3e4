//! Serialized event sink with monotonic timestamps.
//!
//! Every observable fact in a run is one line: `t=<ms>ms <TAG> <body>`, with
//! `<ms>` counted from sink creation. Monitors emit while holding their own
//! lock so occupancy fields in the log are linearization evidence; the sink
//! mutex is a leaf and is only ever taken inside [`EventLog::emit`].

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;

/// Event categories, one per emitting component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Cashier,
    Tourist,
    Vip,
    Guide,
    Guard,
    Bridge,
    Tower,
    Ferry,
    Main,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Cashier => "CASHIER",
            Tag::Tourist => "TOURIST",
            Tag::Vip => "VIP",
            Tag::Guide => "GUIDE",
            Tag::Guard => "GUARD",
            Tag::Bridge => "BRIDGE",
            Tag::Tower => "TOWER",
            Tag::Ferry => "FERRY",
            Tag::Main => "MAIN",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("cannot open log file {path:?} (cwd {cwd:?}): {source}")]
    Open {
        path: PathBuf,
        cwd: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Shared in-memory sink returned by [`EventLog::capture`].
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Snapshot of everything emitted so far, split into lines.
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.bytes.lock().expect("capture buffer lock poisoned");
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .expect("capture buffer lock poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The single serialized log sink for one simulation run.
pub struct EventLog {
    sink: Mutex<Box<dyn Write + Send>>,
    t0: Instant,
}

impl EventLog {
    /// Open (truncating) the log file at `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, LogError> {
        let open_err = |source| LogError::Open {
            path: path.to_owned(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("?")),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(open_err)?;
            }
        }
        let file = File::create(path).map_err(open_err)?;
        Ok(Self::from_writer(Box::new(BufWriter::new(file))))
    }

    /// Wrap an arbitrary writer.
    pub fn from_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
            t0: Instant::now(),
        }
    }

    /// Sink into a shared in-memory buffer; used by tests that assert on
    /// emitted lines without touching the filesystem.
    pub fn capture() -> (Self, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        (Self::from_writer(Box::new(buffer.clone())), buffer)
    }

    /// Write exactly one line, prefixed with milliseconds since creation.
    ///
    /// Emission never fails: a broken sink drops lines rather than poisoning
    /// monitor critical sections.
    pub fn emit(&self, tag: Tag, body: impl fmt::Display) {
        let ms = self.t0.elapsed().as_millis();
        let mut sink = self.sink.lock().expect("log sink lock poisoned");
        let _ = writeln!(sink, "t={ms}ms {tag} {body}");
        let _ = sink.flush();
    }
}
