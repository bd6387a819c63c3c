use std::io::Write;

use crate::{
    connection::{HttpConnection, ResponseBody},
    parser::ParseOutcome,
};

/// Status codes this engine ever emits. Mirrors the handful of canned
/// responses in `http_conn.h` (`error_400_form` and friends) plus 200 and
/// 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok200,
    BadRequest400,
    Forbidden403,
    NotFound404,
    InternalError500,
}

impl StatusCode {
    fn line(self) -> &'static str {
        match self {
            StatusCode::Ok200 => "HTTP/1.1 200 OK",
            StatusCode::BadRequest400 => "HTTP/1.1 400 Bad Request",
            StatusCode::Forbidden403 => "HTTP/1.1 403 Forbidden",
            StatusCode::NotFound404 => "HTTP/1.1 404 Not Found",
            StatusCode::InternalError500 => "HTTP/1.1 500 Internal Server Error",
        }
    }

    /// The canned one-line body for every non-200 response, taken verbatim
    /// from the source's `error_*_form` string constants.
    fn canned_body(self) -> &'static str {
        match self {
            StatusCode::Ok200 => "",
            StatusCode::BadRequest400 => {
                "<html><title>Bad Request</title><body>Your request has bad syntax or is inherently impossible to satisfy.\n</body></html>"
            }
            StatusCode::Forbidden403 => {
                "<html><title>Forbidden</title><body>You do not have permission to get file from this server.\n</body></html>"
            }
            StatusCode::NotFound404 => {
                "<html><title>Not Found</title><body>The requested file was not found on this server.\n</body></html>"
            }
            StatusCode::InternalError500 => {
                "<html><title>Internal Error</title><body>There was an unusual problem serving the requested file.\n</body></html>"
            }
        }
    }
}

impl HttpConnection {
    /// Builds the response for a parse outcome into `write_buf`, attaching
    /// the canned error body (or leaving the already-`mmap`ped file body
    /// in place for `FileRequest`). Mirrors `http_conn::process_write`.
    pub(crate) fn process_write(&mut self, outcome: ParseOutcome) {
        let status = match outcome {
            ParseOutcome::FileRequest => StatusCode::Ok200,
            ParseOutcome::NoResource => StatusCode::NotFound404,
            ParseOutcome::Forbidden => StatusCode::Forbidden403,
            ParseOutcome::InternalError => StatusCode::InternalError500,
            ParseOutcome::BadRequest | ParseOutcome::Incomplete => StatusCode::BadRequest400,
        };

        let body_len = match (&self.body, status) {
            (ResponseBody::Mapped(m), _) => m.len(),
            _ => {
                let canned = status.canned_body();
                self.body = ResponseBody::Owned(canned.as_bytes().to_vec());
                canned.len()
            }
        };

        let mut header = Vec::with_capacity(128);
        let _ = write!(header, "{}\r\n", status.line());
        let _ = write!(header, "Content-Length: {body_len}\r\n");
        let _ = write!(header, "Content-Type: text/html\r\n");
        if self.request.linger {
            let _ = write!(header, "Connection: keep-alive\r\n");
        } else {
            let _ = write!(header, "Connection: close\r\n");
        }
        let _ = write!(header, "\r\n");

        self.write_end = header.len().min(crate::WRITE_CAP);
        self.write_buf[..self.write_end].copy_from_slice(&header[..self.write_end]);
        self.bytes_sent = 0;
        self.bytes_to_send = self.write_end + body_len;
    }
}
