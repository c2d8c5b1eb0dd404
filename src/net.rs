//! The blocking transport loop: accepts connections, parses pipelined
//! HTTP/1.1 requests with `httparse`, and hands each one to
//! [`crate::engine::Engine::serve_http`].
//!
//! Grounded on `examples/HFQR-xitca-web/server/src/worker/mod.rs`'s accept
//! loop and its `connection_error`/`fatal_error` split between errors worth
//! retrying and ones that should stop the listener. That reference loop is
//! async (`tokio` + a `Limit` semaphore); this one is synchronous, so the
//! "bounded concurrency" equivalent is a fixed pool of OS threads reading
//! off a channel instead of a permit-gated task spawn.

use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use socket2::{Domain, Socket, Type};
use tracing::{debug, error, info};

use crate::engine::Engine;

/// Binds `addr` and serves connections on a pool of
/// `max(4, available_parallelism())` worker threads until the listener
/// errors fatally.
pub fn serve(engine: Engine, addr: SocketAddr) -> io::Result<()> {
    let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(4);
    serve_with_threads(engine, addr, threads)
}

/// As [`serve`], but with an explicit worker thread count (§4.11 calls the
/// default "overridable").
pub(crate) fn serve_with_threads(engine: Engine, addr: SocketAddr, threads: usize) -> io::Result<()> {
    let listener = bind(addr)?;
    info!(%addr, threads, "listening");

    let (tx, rx) = mpsc::channel::<TcpStream>();
    let rx = Arc::new(std::sync::Mutex::new(rx));

    let mut handles = Vec::with_capacity(threads);
    for id in 0..threads {
        let engine = engine.clone();
        let rx = rx.clone();
        handles.push(thread::Builder::new().name(format!("kestrel-worker-{id}")).spawn(move || {
            while let Ok(stream) = rx.lock().unwrap().recv() {
                handle_connection(&engine, stream);
            }
        })?);
    }
    drop(rx);

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                if tx.send(stream).is_err() {
                    break;
                }
            }
            Err(ref e) if connection_error(e) => {
                debug!(error = %e, "per-connection accept error, continuing");
                continue;
            }
            Err(ref e) if fatal_error(e) => {
                error!(error = %e, "listener closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "error accepting connection");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    drop(tx);
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(false)?;
    Ok(socket.into())
}

/// Serves pipelined requests off one accepted connection until the peer
/// closes the connection, sends `Connection: close`, or a parse error ends
/// the stream.
fn handle_connection(engine: &Engine, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to clone connection for writing");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        let request = match read_request(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) if connection_error(&e) => return,
            Err(e) => {
                debug!(?peer, error = %e, "closing connection after parse error");
                return;
            }
        };

        let close_after = wants_close(request.headers());
        let writer = match write_half.try_clone() {
            Ok(w) => w,
            Err(e) => {
                error!(?peer, error = %e, "failed to clone connection for writing");
                return;
            }
        };
        engine.serve_http(request, Box::new(writer));

        if close_after {
            return;
        }
    }
}

/// Reads and parses a single HTTP/1.1 request (headers via `httparse`, body
/// via `Content-Length`) off `reader`. Returns `Ok(None)` on a clean EOF
/// before any bytes of a new request arrive. Bytes read past the header
/// terminator that belong to a pipelined next request are left buffered in
/// `reader` via `BufReader::consume`, not copied out here.
fn read_request(reader: &mut BufReader<TcpStream>) -> io::Result<Option<Request<Bytes>>> {
    let mut header_buf = Vec::with_capacity(4 * 1024);
    let header_end = loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return if header_buf.is_empty() { Ok(None) } else { Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-request")) };
        }
        header_buf.extend_from_slice(available);
        let read_len = available.len();

        if let Some(end) = find_header_end(&header_buf) {
            reader.consume(read_len - (header_buf.len() - end));
            break end;
        }
        reader.consume(read_len);
        if header_buf.len() > 64 * 1024 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request header too large"));
        }
    };
    header_buf.truncate(header_end);

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut headers);
    let status = parsed.parse(&header_buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    if status.is_partial() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "incomplete request line"));
    }

    let method = parsed.method.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?;
    let path = parsed.path.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing path"))?;

    let mut builder = Request::builder().method(Method::from_bytes(method.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?).uri(path.parse::<Uri>().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?);

    let mut content_length = 0usize;
    for header in parsed.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed Content-Length"))?;
        }
        if let Some(map) = builder.headers_mut() {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(header.name.as_bytes()), HeaderValue::from_bytes(header.value)) {
                map.append(name, value);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-body")
        } else {
            e
        }
    })?;

    let request = builder.body(Bytes::from(body)).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(Some(request))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

/// Per-connection errors worth retrying the accept loop for, mirroring the
/// reference worker's `connection_error`.
fn connection_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset)
}

/// Errors that mean the listener itself is no longer usable.
fn fatal_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn finds_header_end() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody";
        assert_eq!(find_header_end(buf), Some(buf.len() - 4));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn detects_connection_close_header() {
        let mut map = HeaderMap::new();
        map.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        assert!(wants_close(&map));

        let empty = HeaderMap::new();
        assert!(!wants_close(&empty));
    }

    #[test]
    fn parses_request_line_and_headers() {
        let raw = b"GET /user/42?x=1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n".to_vec();
        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Request::new(&mut headers);
        let status = parsed.parse(&raw).unwrap();
        assert!(status.is_complete());
        assert_eq!(parsed.method, Some("GET"));
        assert_eq!(parsed.path, Some("/user/42?x=1"));
    }

    /// Exercises `read_request` over a real loopback socket, including a
    /// second pipelined request immediately behind the first's body.
    #[test]
    fn reads_two_pipelined_requests_off_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyzGET /b HTTP/1.1\r\n\r\n").unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);

        let first = read_request(&mut reader).unwrap().unwrap();
        assert_eq!(first.method(), Method::POST);
        assert_eq!(first.uri().path(), "/a");

        let second = read_request(&mut reader).unwrap().unwrap();
        assert_eq!(second.method(), Method::GET);
        assert_eq!(second.uri().path(), "/b");

        client.join().unwrap();
    }
}
