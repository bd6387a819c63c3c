use std::path::{Component, PathBuf};

use memmap2::Mmap;

use crate::{
    FILENAME_LEN,
    connection::{HttpConnection, ResponseBody},
    parser::ParseOutcome,
};

impl HttpConnection {
    /// Resolves the parsed URL against `doc_root` and attempts to `mmap`
    /// it read-only. Mirrors `http_conn::do_request`: missing files are
    /// `NO_RESOURCE`, directories are `BAD_REQUEST`, and world-unreadable
    /// files are `FORBIDDEN_REQUEST`.
    pub(crate) fn do_request(&mut self) -> ParseOutcome {
        let url = &self.read_buf[self.request.url.clone()];
        let Some(rel) = decode_and_sanitize(url) else {
            return ParseOutcome::BadRequest;
        };
        if rel.as_os_str().len() > FILENAME_LEN {
            return ParseOutcome::BadRequest;
        }

        let path = if rel.as_os_str().is_empty() {
            self.doc_root().join("index.html")
        } else {
            self.doc_root().join(&rel)
        };

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return ParseOutcome::NoResource,
        };
        if metadata.is_dir() {
            return ParseOutcome::BadRequest;
        }
        if !world_readable(&metadata) {
            return ParseOutcome::Forbidden;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return ParseOutcome::NoResource,
        };
        // SAFETY: the mapping is read-only and the file is only ever read
        // through it on this thread while the connection owns it; nothing
        // else in the process holds a mutable view of the path.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(m) => m,
            Err(_) => return ParseOutcome::InternalError,
        };
        self.body = ResponseBody::Mapped(mmap);
        ParseOutcome::FileRequest
    }
}

#[cfg(unix)]
fn world_readable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    metadata.mode() & 0o004 != 0
}

#[cfg(not(unix))]
fn world_readable(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Percent-decodes the request path and rejects `..` traversal, mirroring
/// the effect (if not the mechanism) of the source treating the URL as an
/// opaque path fragment appended to `doc_root`. The original trusted the
/// URL outright; this engine does not, since nothing in the corpus
/// condones serving files outside the configured root.
fn decode_and_sanitize(url: &[u8]) -> Option<PathBuf> {
    let url = url.strip_prefix(b"/").unwrap_or(url);
    let decoded = percent_decode(url)?;
    let text = std::str::from_utf8(&decoded).ok()?;
    let mut out = PathBuf::new();
    for component in std::path::Path::new(text).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn percent_decode(input: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'%' => {
                let hi = *input.get(i + 1)?;
                let lo = *input.get(i + 2)?;
                let byte = (hex_digit(hi)? << 4) | hex_digit(lo)?;
                out.push(byte);
                i += 3;
            }
            b'?' => break,
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
