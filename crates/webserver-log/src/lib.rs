//! A day- and line-count-rotating log sink for `tracing`, grounded in the
//! source's `log.{h,cpp}`.
//!
//! The original ran a dedicated writer thread draining a bounded queue,
//! falling back to a synchronous write when the queue was full rather than
//! dropping the line. This crate reproduces that behavior as a
//! [`tracing_subscriber::fmt::MakeWriter`] sink so the rest of the engine
//! can keep using `tracing`'s macros unmodified.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        mpsc::{Receiver, SyncSender, TrySendError, sync_channel},
    },
    thread::JoinHandle,
};

use chrono::{Local, NaiveDate};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to open log file {path:?}: {source}")]
    Open { path: PathBuf, #[source] source: io::Error },
    #[error("log directory {0:?} does not exist and could not be created")]
    Dir(PathBuf, #[source] io::Error),
}

/// How the rotating log file is named and split. Mirrors the constructor
/// arguments of the source's `Log::init`.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub base_name: String,
    /// Lines per physical file before rolling to a numeric-suffix overflow
    /// file (`log_max_lines` in the source).
    pub lines_per_file: usize,
    /// `Some(n)` runs the writer on a background thread behind a bounded
    /// queue of depth `n`; `None` writes synchronously on the calling
    /// thread (the source's non-async mode).
    pub async_queue_size: Option<usize>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            base_name: "webserver".to_string(),
            lines_per_file: 5_000_000,
            async_queue_size: None,
        }
    }
}

struct RotatingState {
    dir: PathBuf,
    base_name: String,
    lines_per_file: usize,
    current_date: NaiveDate,
    split_index: u32,
    current_lines: usize,
    file: File,
}

impl RotatingState {
    fn open(config: &LogConfig) -> Result<Self, LogError> {
        std::fs::create_dir_all(&config.dir)
            .map_err(|e| LogError::Dir(config.dir.clone(), e))?;
        let today = Local::now().date_naive();
        let path = file_path(&config.dir, &config.base_name, today, 0);
        let file = open_append(&path)?;
        Ok(Self {
            dir: config.dir.clone(),
            base_name: config.base_name.clone(),
            lines_per_file: config.lines_per_file.max(1),
            current_date: today,
            split_index: 0,
            current_lines: 0,
            file,
        })
    }

    fn roll_if_needed(&mut self, today: NaiveDate) -> io::Result<()> {
        if today != self.current_date {
            self.current_date = today;
            self.split_index = 0;
            self.current_lines = 0;
            self.reopen()?;
        } else if self.current_lines >= self.lines_per_file {
            self.split_index += 1;
            self.current_lines = 0;
            self.reopen()?;
        }
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        let path = file_path(&self.dir, &self.base_name, self.current_date, self.split_index);
        self.file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(())
    }

    fn write_line(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.roll_if_needed(Local::now().date_naive())?;
        let n = self.file.write(buf)?;
        self.current_lines += bytecount_newlines(buf);
        Ok(n)
    }
}

fn bytecount_newlines(buf: &[u8]) -> usize {
    buf.iter().filter(|&&b| b == b'\n').count()
}

fn file_path(dir: &Path, base_name: &str, date: NaiveDate, split_index: u32) -> PathBuf {
    let day = date.format("%Y_%m_%d");
    if split_index == 0 {
        dir.join(format!("{day}_{base_name}"))
    } else {
        dir.join(format!("{day}_{base_name}_{split_index}"))
    }
}

fn open_append(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::Open { path: path.to_path_buf(), source })
}

/// Synchronous rotating sink. Each call to `make_writer` hands out a guard
/// sharing the same underlying file state.
#[derive(Clone)]
pub struct RotatingWriter {
    inner: Arc<Mutex<RotatingState>>,
}

impl RotatingWriter {
    pub fn new(config: &LogConfig) -> Result<Self, LogError> {
        Ok(Self { inner: Arc::new(Mutex::new(RotatingState::open(config)?)) })
    }

    pub fn flush(&self) -> io::Result<()> {
        self.inner.lock().unwrap().file.flush()
    }
}

pub struct RotatingWriterGuard {
    inner: Arc<Mutex<RotatingState>>,
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().write_line(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard { inner: self.inner.clone() }
    }
}

/// Async rotating sink: hands lines off to a dedicated writer thread over
/// a bounded channel, falling back to writing on the calling thread when
/// the channel is saturated rather than dropping the log line (mirrors the
/// source's `block_queue`-backed async logger).
#[derive(Clone)]
pub struct AsyncWriter {
    sender: SyncSender<Vec<u8>>,
    fallback: Arc<Mutex<RotatingState>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sender.try_send(buf.to_vec()) {
            Ok(()) => Ok(buf.len()),
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.fallback.lock().unwrap().write_line(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for AsyncWriter {
    type Writer = AsyncWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn run_writer_thread(receiver: Receiver<Vec<u8>>, state: Arc<Mutex<RotatingState>>) {
    for buf in receiver.iter() {
        if let Err(err) = state.lock().unwrap().write_line(&buf) {
            eprintln!("webserver-log: write failed: {err}");
        }
    }
}

/// Handle returned by [`init`]. Holds the writer thread (if any) so the
/// caller can keep it alive for the process lifetime; dropping it does not
/// stop the thread while the installed subscriber still holds its own
/// sender clone.
pub struct LogHandle {
    writer_thread: Option<JoinHandle<()>>,
}

impl LogHandle {
    pub fn join(self) {
        if let Some(handle) = self.writer_thread {
            let _ = handle.join();
        }
    }
}

/// Builds a `tracing_subscriber` writer for the configured mode. Returns
/// the writer (to be handed to `fmt::layer().with_writer(..)`) and the
/// handle owning the background thread, if any.
pub fn build_writer(config: &LogConfig) -> Result<(WriterKind, LogHandle), LogError> {
    match config.async_queue_size {
        None => {
            let writer = RotatingWriter::new(config)?;
            Ok((WriterKind::Sync(writer), LogHandle { writer_thread: None }))
        }
        Some(depth) => {
            let state = Arc::new(Mutex::new(RotatingState::open(config)?));
            let (tx, rx) = sync_channel(depth.max(1));
            let thread_state = state.clone();
            let handle = std::thread::Builder::new()
                .name("webserver-log-writer".to_string())
                .spawn(move || run_writer_thread(rx, thread_state))
                .expect("failed to spawn log writer thread");
            let writer = AsyncWriter { sender: tx, fallback: state };
            Ok((WriterKind::Async(writer), LogHandle { writer_thread: Some(handle) }))
        }
    }
}

/// Either sink, so callers that don't care which mode was configured can
/// treat `build_writer`'s result uniformly.
pub enum WriterKind {
    Sync(RotatingWriter),
    Async(AsyncWriter),
}

impl<'a> MakeWriter<'a> for WriterKind {
    type Writer = Box<dyn Write + Send>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            WriterKind::Sync(w) => Box::new(w.make_writer()),
            WriterKind::Async(w) => Box::new(w.make_writer()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path, lines_per_file: usize) -> LogConfig {
        LogConfig {
            dir: dir.to_path_buf(),
            base_name: "test".to_string(),
            lines_per_file,
            async_queue_size: None,
        }
    }

    #[test]
    fn sync_writer_creates_todays_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(&config_in(dir.path(), 100)).unwrap();
        let mut guard = writer.make_writer();
        guard.write_all(b"hello\n").unwrap();
        guard.flush().unwrap();

        let today = Local::now().date_naive().format("%Y_%m_%d");
        let expected = dir.path().join(format!("{today}_test"));
        assert!(expected.exists());
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "hello\n");
    }

    #[test]
    fn rolls_to_numeric_suffix_once_line_budget_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(&config_in(dir.path(), 2)).unwrap();
        let mut guard = writer.make_writer();
        for _ in 0..5 {
            guard.write_all(b"line\n").unwrap();
        }

        let today = Local::now().date_naive().format("%Y_%m_%d");
        assert!(dir.path().join(format!("{today}_test")).exists());
        assert!(dir.path().join(format!("{today}_test_1")).exists());
    }

    #[test]
    fn async_writer_eventually_flushes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            async_queue_size: Some(8),
            ..config_in(dir.path(), 1_000)
        };
        let (writer, handle) = build_writer(&config).unwrap();
        {
            let mut guard = writer.make_writer();
            guard.write_all(b"async line\n").unwrap();
        }
        drop(writer);
        handle.join();
    }
}
