use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::{
    READ_CAP, WRITE_CAP,
    parser::{CheckState, Method, ParseOutcome},
};

pub(crate) struct RequestFields {
    pub(crate) method: Method,
    pub(crate) url: Range<usize>,
    pub(crate) host: Option<Range<usize>>,
    pub(crate) content_length: usize,
    pub(crate) linger: bool,
}

impl Default for RequestFields {
    fn default() -> Self {
        Self { method: Method::Get, url: 0..0, host: None, content_length: 0, linger: false }
    }
}

/// What the response body is backed by. `Mapped` is the zero-copy static
/// file path; `Owned` holds one of the canned error bodies.
pub(crate) enum ResponseBody {
    None,
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl ResponseBody {
    fn as_slice(&self) -> &[u8] {
        match self {
            ResponseBody::None => &[],
            ResponseBody::Owned(v) => v,
            ResponseBody::Mapped(m) => m,
        }
    }
}

/// Outcome of flushing more bytes of a response, telling the reactor what
/// to do with the socket next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// More bytes remain; keep the writable interest armed.
    Pending,
    /// Response fully sent. `linger` says whether to re-arm readable (and
    /// the connection has already been reset for reuse) or close.
    Complete { linger: bool },
}

/// The two buffers a vectored write draws from: response headers (always a
/// slice of the in-struct write buffer) and the body (mmap or owned bytes).
pub struct PendingWrite<'a> {
    pub head: &'a [u8],
    pub body: &'a [u8],
}

/// Per-connection read/write buffers, parser state, and response state.
/// Mirrors `http_conn`'s data members minus the socket fd and epoll
/// registration, which `webserver-net` owns.
pub struct HttpConnection {
    pub(crate) read_buf: Box<[u8; READ_CAP]>,
    pub(crate) read_end: usize,
    pub(crate) check_idx: usize,
    pub(crate) line_start: usize,
    pub(crate) check_state: CheckState,
    pub(crate) request: RequestFields,

    pub(crate) write_buf: Box<[u8; WRITE_CAP]>,
    pub(crate) write_end: usize,
    pub(crate) body: ResponseBody,
    pub(crate) bytes_to_send: usize,
    pub(crate) bytes_sent: usize,

    doc_root: PathBuf,
}

impl HttpConnection {
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self {
            read_buf: Box::new([0; READ_CAP]),
            read_end: 0,
            check_idx: 0,
            line_start: 0,
            check_state: CheckState::RequestLine,
            request: RequestFields::default(),
            write_buf: Box::new([0; WRITE_CAP]),
            write_end: 0,
            body: ResponseBody::None,
            bytes_to_send: 0,
            bytes_sent: 0,
            doc_root: doc_root.into(),
        }
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    /// Resets parser and response state for a fresh request on the same
    /// (kept-alive) socket — `http_conn::init()`'s state-machine half. Any
    /// bytes already read past the completed request are discarded: this
    /// engine does not support pipelined requests within one kernel read.
    pub fn reset(&mut self) {
        self.read_end = 0;
        self.check_idx = 0;
        self.line_start = 0;
        self.check_state = CheckState::RequestLine;
        self.request = RequestFields::default();
        self.write_end = 0;
        self.body = ResponseBody::None;
        self.bytes_to_send = 0;
        self.bytes_sent = 0;
    }

    /// Free space at the tail of the read buffer the reactor may `read()`
    /// into directly. Empty once the buffer is full (`read_end <=
    /// READ_CAP` always holds).
    pub fn read_slot(&mut self) -> &mut [u8] {
        &mut self.read_buf[self.read_end..]
    }

    pub fn read_buffer_full(&self) -> bool {
        self.read_end >= READ_CAP
    }

    /// Records that `n` more bytes landed in the slot returned by
    /// [`read_slot`](Self::read_slot).
    pub fn note_received(&mut self, n: usize) {
        self.read_end += n;
    }

    pub fn keep_alive(&self) -> bool {
        self.request.linger
    }

    pub fn has_pending_write(&self) -> bool {
        self.bytes_to_send > 0
    }

    /// The two slices a vectored write should draw from right now.
    pub fn pending_write(&self) -> PendingWrite<'_> {
        let header_len = self.write_end;
        let body = self.body.as_slice();
        if self.bytes_sent < header_len {
            PendingWrite { head: &self.write_buf[self.bytes_sent..header_len], body }
        } else {
            let body_sent = self.bytes_sent - header_len;
            PendingWrite { head: &[], body: &body[body_sent..] }
        }
    }

    /// Records that `n` more bytes were handed to the kernel. Mirrors
    /// `http_conn::write`'s iovec bookkeeping, minus the syscall itself.
    pub fn advance_sent(&mut self, n: usize) -> WriteOutcome {
        self.bytes_sent += n;
        self.bytes_to_send = self.bytes_to_send.saturating_sub(n);
        if self.bytes_to_send == 0 {
            self.body = ResponseBody::None;
            let linger = self.request.linger;
            if linger {
                self.reset();
            }
            WriteOutcome::Complete { linger }
        } else {
            WriteOutcome::Pending
        }
    }

    /// Drives the parser over whatever is currently in the read buffer.
    /// Returns `ParseOutcome::Incomplete` if more bytes are needed; any
    /// other outcome means a response is ready to be built with
    /// [`build_response`](Self::build_response).
    pub fn try_parse(&mut self) -> ParseOutcome {
        self.process_read()
    }

    /// Assembles the response (status line, headers, body) for a parse
    /// outcome into the write buffer, arming `bytes_to_send` for the
    /// reactor's vectored flush. Mirrors `http_conn::process_write`.
    pub fn build_response(&mut self, outcome: ParseOutcome) {
        self.process_write(outcome);
    }
}
