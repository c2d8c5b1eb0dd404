//! Buffers response status/size and guarantees exactly one header write.
//!
//! No direct teacher precedent — `xitca-web`'s response path is a typed
//! `http::Response<ResponseBody>` builder returned from a `Service`, not a
//! push-based wrapper over a platform writer (that distinction only exists
//! because this crate's transport loop writes bytes directly to a
//! `TcpStream` rather than assembling a typed response value). Written
//! fresh, following the teacher's error-handling register: warn and ignore
//! rather than panic on a double header write.

use std::io::{self, Write};

use tracing::warn;

/// Sentinel `size` meaning "nothing has been written yet".
pub const NOT_WRITTEN: i64 = -1;

/// Wraps the connection's writer with the status/size bookkeeping the
/// dispatcher and handlers need: a status code that can be set any number
/// of times before the first byte goes out, and a guarantee that the
/// status line is emitted exactly once.
pub struct ResponseWriter {
    inner: Option<Box<dyn Write + Send>>,
    status: u16,
    size: i64,
    wrote_header: bool,
    headers: Vec<(String, String)>,
    peer_gone: bool,
}

impl ResponseWriter {
    /// An unattached writer, as produced by a freshly allocated (not yet
    /// reset) pooled [`crate::context::Context`].
    pub fn empty() -> Self {
        Self {
            inner: None,
            status: 200,
            size: NOT_WRITTEN,
            wrote_header: false,
            headers: Vec::new(),
            peer_gone: false,
        }
    }

    /// Queues a response header, to be flushed alongside the status line by
    /// the next [`Self::write_header_now`]. Ignored (with a warning) once
    /// headers have already gone out.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.wrote_header {
            let name = name.into();
            warn!(header = %name, "set_header called after headers were already sent; ignoring");
            return;
        }
        self.headers.push((name.into(), value.into()));
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    /// `true` once [`Self::write_header_now`] has run for this response.
    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }

    /// Records `status` to be emitted by the next [`Self::write_header_now`].
    /// Ignored (with a warning) once headers have already gone out.
    pub fn write_header(&mut self, status: u16) {
        if self.wrote_header {
            warn!(status, "WriteHeader called after headers were already sent; ignoring");
            return;
        }
        self.status = status;
    }

    /// Emits the status line exactly once; idempotent on repeat calls.
    ///
    /// A broken-pipe / connection-reset error is recorded at `warn` and
    /// swallowed rather than propagated: the peer is gone, so there is no
    /// response left to fail to write. [`Self::peer_gone`] reports this so
    /// callers (see [`crate::context::Context::next`]) can stop running
    /// further handlers instead of repeatedly hitting the same dead socket.
    pub fn write_header_now(&mut self) -> io::Result<()> {
        if self.wrote_header {
            return Ok(());
        }
        self.wrote_header = true;
        self.size = 0;
        if let Some(inner) = self.inner.as_mut() {
            let result = (|| -> io::Result<()> {
                write!(inner, "HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status))?;
                for (name, value) in &self.headers {
                    write!(inner, "{name}: {value}\r\n")?;
                }
                write!(inner, "\r\n")?;
                Ok(())
            })();
            return self.swallow_peer_gone(result);
        }
        Ok(())
    }

    /// Writes `buf` to the underlying writer, flushing the header first if
    /// it hasn't gone out yet. See [`Self::write_header_now`] for the
    /// broken-pipe / connection-reset handling.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_header_now()?;
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        match self.swallow_peer_gone(inner.write(buf)) {
            Ok(n) => {
                self.size += n as i64;
                Ok(n)
            }
            Err(e) => Err(e),
        }
    }

    pub fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes())
    }

    /// Delegates to the underlying writer's `flush`, if attached.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }

    /// `true` once a write against this response has failed with a
    /// broken-pipe / connection-reset error.
    pub fn peer_gone(&self) -> bool {
        self.peer_gone
    }

    fn swallow_peer_gone<T: Default>(&mut self, result: io::Result<T>) -> io::Result<T> {
        match result {
            Err(e) if matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) => {
                warn!(error = %e, "peer gone while writing response");
                self.peer_gone = true;
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Reattaches this wrapper to a new underlying writer and resets the
    /// status/size sentinels, for reuse from a pooled `Context`.
    pub fn reset(&mut self, inner: Box<dyn Write + Send>) {
        self.inner = Some(inner);
        self.status = 200;
        self.size = NOT_WRITTEN;
        self.wrote_header = false;
        self.headers.clear();
        self.peer_gone = false;
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::empty()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_written_exactly_once() {
        let mut w = ResponseWriter::empty();
        w.reset(Box::new(Vec::new()));
        w.write_header(404);
        w.write_header_now().unwrap();
        assert!(w.wrote_header());
        assert_eq!(w.status(), 404);
        w.write_header(500);
        assert_eq!(w.status(), 404);
    }

    #[test]
    fn write_flushes_header_lazily() {
        let mut w = ResponseWriter::empty();
        w.reset(Box::new(Vec::new()));
        assert_eq!(w.size(), NOT_WRITTEN);
        w.write(b"hello").unwrap();
        assert!(w.wrote_header());
        assert_eq!(w.size(), 5);
    }

    #[test]
    fn unattached_writer_counts_nothing() {
        let mut w = ResponseWriter::empty();
        assert_eq!(w.write(b"x").unwrap(), 0);
    }

    struct BrokenPipe;
    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn broken_pipe_is_swallowed_and_marks_peer_gone() {
        let mut w = ResponseWriter::empty();
        w.reset(Box::new(BrokenPipe));
        assert!(!w.peer_gone());
        let n = w.write(b"x").unwrap();
        assert_eq!(n, 0);
        assert!(w.peer_gone());
    }

    #[test]
    fn headers_flush_with_status_line() {
        let mut w = ResponseWriter::empty();
        w.reset(Box::new(Vec::new()));
        w.write_header(405);
        w.set_header("Allow", "GET, POST");
        w.write_header_now().unwrap();
        assert_eq!(w.status(), 405);
    }
}
