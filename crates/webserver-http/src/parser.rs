use crate::connection::HttpConnection;

/// Only `GET` is accepted; everything else is a bad request. No request
/// bodies, no other verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
}

/// Which part of the request the parser is currently consuming. Mirrors
/// `CHECK_STATE` in `http_conn.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckState {
    RequestLine,
    Headers,
    /// Present for parity with the source's state machine; this engine
    /// never expects a body (`GET` only), so this state is entered and
    /// immediately satisfied with zero bytes.
    Body,
}

/// Result of scanning the read buffer for the next CRLF-terminated line.
/// Mirrors `LINE_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStatus {
    Ok,
    Bad,
    Open,
}

/// What [`HttpConnection::try_parse`](crate::HttpConnection::try_parse)
/// produced. Mirrors `HTTP_CODE`, collapsed to the cases this engine can
/// actually reach (`NO_REQUEST` is folded into `Incomplete`, `CLOSED_
/// CONNECTION` is the caller's concern once `read()` returns 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Need more bytes before a verdict can be reached.
    Incomplete,
    BadRequest,
    NoResource,
    Forbidden,
    FileRequest,
    InternalError,
}

impl HttpConnection {
    /// Scans `read_buf[line_start..check_idx]` for a terminating CRLF,
    /// advancing `check_idx` as it goes. A bare `\n` is accepted as a
    /// terminator (recovering from a stray `\r` already consumed); a bare
    /// `\r` not yet followed by anything is `Open` (need more bytes), and
    /// one followed by anything but `\n` is `Bad`. Mirrors `parse_line`.
    fn scan_line(&mut self) -> LineStatus {
        while self.check_idx < self.read_end {
            let byte = self.read_buf[self.check_idx];
            if byte == b'\r' {
                if self.check_idx + 1 == self.read_end {
                    return LineStatus::Open;
                }
                if self.read_buf[self.check_idx + 1] == b'\n' {
                    self.check_idx += 2;
                    return LineStatus::Ok;
                }
                return LineStatus::Bad;
            }
            if byte == b'\n' {
                if self.check_idx > self.line_start && self.read_buf[self.check_idx - 1] == b'\r' {
                    self.check_idx += 1;
                    return LineStatus::Ok;
                }
                return LineStatus::Bad;
            }
            self.check_idx += 1;
        }
        LineStatus::Open
    }

    fn current_line(&self) -> &[u8] {
        let end = if self.check_idx >= 2 { self.check_idx - 2 } else { self.check_idx };
        &self.read_buf[self.line_start..end]
    }

    fn parse_request_line(&mut self) -> Option<ParseOutcome> {
        let line = self.current_line();
        let mut parts = line.splitn(3, |&b| b == b' ');
        let method = parts.next().unwrap_or(b"");
        let url = parts.next().unwrap_or(b"");
        let version = parts.next().unwrap_or(b"");

        if method != b"GET" {
            return Some(ParseOutcome::BadRequest);
        }
        if version != b"HTTP/1.1" && version != b"HTTP/1.0" {
            return Some(ParseOutcome::BadRequest);
        }
        if url.is_empty() {
            return Some(ParseOutcome::BadRequest);
        }
        let url = strip_scheme(url);

        let line_start = self.line_start;
        let url_off = offset_of(line, url) + line_start;
        self.request.method = Method::Get;
        self.request.url = url_off..(url_off + url.len());
        self.check_state = CheckState::Headers;
        None
    }

    fn parse_header_line(&mut self) -> Option<ParseOutcome> {
        let line = self.current_line();
        if line.is_empty() {
            // Blank line: end of headers.
            if self.request.content_length > 0 {
                self.check_state = CheckState::Body;
                return None;
            }
            return Some(ParseOutcome::FileRequest);
        }

        if let Some(rest) = strip_prefix_ci(line, b"Connection:") {
            let value = trim(rest);
            self.request.linger = value.eq_ignore_ascii_case(b"keep-alive");
        } else if let Some(rest) = strip_prefix_ci(line, b"Content-Length:") {
            let value = trim(rest);
            let Some(len) = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()) else {
                return Some(ParseOutcome::BadRequest);
            };
            self.request.content_length = len;
        } else if let Some(rest) = strip_prefix_ci(line, b"Host:") {
            let value = trim(rest);
            let line_start = self.line_start;
            let off = offset_of(line, value) + line_start;
            self.request.host = Some(off..(off + value.len()));
        } else {
            tracing::info!(header = %String::from_utf8_lossy(line), "oop!unknow header");
        }
        None
    }

    fn parse_body_line(&mut self) -> Option<ParseOutcome> {
        // No request bodies are supported; reaching this state with a
        // declared Content-Length still yields a request, since the
        // engine never asked the client to send one.
        Some(ParseOutcome::FileRequest)
    }

    /// Drives the request-line/header/body state machine over whatever
    /// bytes are currently buffered, mirroring `http_conn::process_read`'s
    /// top-level loop. Returns `Incomplete` once a line is not yet fully
    /// buffered.
    pub(crate) fn process_read(&mut self) -> ParseOutcome {
        loop {
            let status = if self.check_state == CheckState::Body {
                LineStatus::Ok
            } else {
                self.scan_line()
            };
            match status {
                LineStatus::Open => return ParseOutcome::Incomplete,
                LineStatus::Bad => return ParseOutcome::BadRequest,
                LineStatus::Ok => {
                    tracing::trace!(line = %String::from_utf8_lossy(self.current_line()));
                    let outcome = match self.check_state {
                        CheckState::RequestLine => self.parse_request_line(),
                        CheckState::Headers => self.parse_header_line(),
                        CheckState::Body => self.parse_body_line(),
                    };
                    self.line_start = self.check_idx;
                    if let Some(outcome) = outcome {
                        if outcome == ParseOutcome::FileRequest {
                            return self.do_request();
                        }
                        return outcome;
                    }
                    if self.check_idx >= self.read_end && self.check_state != CheckState::Body {
                        return ParseOutcome::Incomplete;
                    }
                }
            }
        }
    }
}

fn offset_of(haystack: &[u8], needle: &[u8]) -> usize {
    let haystack_ptr = haystack.as_ptr() as usize;
    let needle_ptr = needle.as_ptr() as usize;
    needle_ptr.saturating_sub(haystack_ptr)
}

fn strip_scheme(url: &[u8]) -> &[u8] {
    for prefix in [&b"http://"[..], &b"https://"[..]] {
        if url.len() > prefix.len() && url[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let rest = &url[prefix.len()..];
            if let Some(pos) = rest.iter().position(|&b| b == b'/') {
                return &rest[pos..];
            }
        }
    }
    url
}

fn strip_prefix_ci<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != b' ' && b != b'\t').map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use crate::{HttpConnection, ParseOutcome};
    use std::io::Write;

    fn feed(conn: &mut HttpConnection, data: &[u8]) -> ParseOutcome {
        let slot = conn.read_slot();
        let n = data.len().min(slot.len());
        slot[..n].copy_from_slice(&data[..n]);
        conn.note_received(n);
        conn.try_parse()
    }

    fn doc_root_with(name: &str, contents: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
        f.write_all(contents).unwrap();
        dir
    }

    #[test]
    fn incomplete_request_line_asks_for_more_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = HttpConnection::new(dir.path());
        assert_eq!(feed(&mut conn, b"GET /index.html HTTP/1.1\r\n"), ParseOutcome::Incomplete);
    }

    #[test]
    fn well_formed_get_of_existing_file_serves_it() {
        let dir = doc_root_with("index.html", b"hello world");
        let mut conn = HttpConnection::new(dir.path());
        let outcome = feed(
            &mut conn,
            b"GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n",
        );
        assert_eq!(outcome, ParseOutcome::FileRequest);
        assert!(conn.keep_alive());
    }

    #[test]
    fn nonexistent_file_is_no_resource() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = HttpConnection::new(dir.path());
        let outcome = feed(&mut conn, b"GET /missing.html HTTP/1.1\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::NoResource);
    }

    #[test]
    fn non_get_method_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = HttpConnection::new(dir.path());
        let outcome = feed(&mut conn, b"POST /index.html HTTP/1.1\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::BadRequest);
    }

    #[test]
    fn bare_lf_without_preceding_cr_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = HttpConnection::new(dir.path());
        let outcome = feed(&mut conn, b"GET /index.html HTTP/1.1\n\n");
        assert_eq!(outcome, ParseOutcome::BadRequest);
    }

    #[test]
    fn directory_request_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut conn = HttpConnection::new(dir.path());
        let outcome = feed(&mut conn, b"GET /sub HTTP/1.1\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::BadRequest);
    }

    #[test]
    fn malformed_content_length_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = HttpConnection::new(dir.path());
        let outcome = feed(
            &mut conn,
            b"GET /index.html HTTP/1.1\r\nContent-Length: abc\r\n\r\n",
        );
        assert_eq!(outcome, ParseOutcome::BadRequest);
    }
}
