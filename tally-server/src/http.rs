//! Minimal blocking HTTP/1.1 server.
//!
//! Uses `std::net::TcpListener` with a fixed pool of worker threads, each
//! blocking in `accept()` on a clone of the same listener. One request per
//! connection: the request line, headers and a `Content-Length` body are
//! read, the handler runs, and the response is sent with
//! `Connection: close`.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// Longest accepted request line or header line, in bytes.
pub const MAX_LINE_BYTES: usize = 8 << 10;

/// Most header lines accepted per request.
pub const MAX_HEADERS: usize = 100;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure to read a request off the wire.
#[derive(Error, Debug)]
pub enum HttpError {
    /// Socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The request line or a header could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The declared body is larger than [`MAX_BODY_BYTES`].
    #[error("request body of {0} bytes is too large")]
    BodyTooLarge(usize),

    /// A line exceeds [`MAX_LINE_BYTES`] or there are more than
    /// [`MAX_HEADERS`] headers.
    #[error("request head is too large")]
    HeadTooLarge,
}

/// A parsed request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// `GET`, `POST`, ...
    pub method: String,
    /// Percent-decoded, non-empty path segments.
    pub segments: Vec<String>,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Header names are stored lowercased.
    headers: HashMap<String, String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl Request {
    /// Builds a request without a socket (used by tests and the router).
    pub fn new(method: &str, target: &str) -> Result<Self, HttpError> {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Ok(Self {
            method: method.to_ascii_uppercase(),
            segments: parse_segments(path)?,
            query: parse_query(query),
            headers: HashMap::new(),
            body: Vec::new(),
        })
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.trim().to_string());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Query parameter value.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// A response ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header value.
    pub content_type: &'static str,
    /// Body text.
    pub body: String,
}

impl Response {
    /// A JSON response. Serialization of plain maps and lists cannot fail;
    /// if it ever does, a 500 is returned instead.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    /// A `text/plain` response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }

    /// An empty-bodied response.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: String::new(),
        }
    }

    /// `{"error": message}`.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }
}

/// Request handler shared by all workers.
pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// A running server. Dropping the handle stops it.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// The bound address (useful after binding port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Blocks until every worker exits.
    pub fn join(mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("http worker panicked");
            }
        }
    }

    /// Stops accepting connections and waits for the workers.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Wake every worker blocked in accept().
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        for _ in &self.workers {
            let _ = TcpStream::connect_timeout(&wake, Duration::from_secs(1));
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

/// Serves `handler` on `listener` with `workers` threads.
///
/// # Errors
///
/// Returns the I/O error if the listener cannot be cloned or a thread cannot
/// be spawned.
pub fn serve(listener: TcpListener, workers: usize, handler: Handler) -> io::Result<ServerHandle> {
    let addr = listener.local_addr()?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(workers.max(1));
    for id in 0..workers.max(1) {
        let listener = listener.try_clone()?;
        let shutdown = Arc::clone(&shutdown);
        let handler = Arc::clone(&handler);
        let handle = thread::Builder::new()
            .name(format!("http-{id}"))
            .spawn(move || worker_loop(&listener, &shutdown, &handler))?;
        handles.push(handle);
    }

    tracing::info!(%addr, workers = handles.len(), "http server listening");
    Ok(ServerHandle {
        addr,
        shutdown,
        workers: handles,
    })
}

fn worker_loop(listener: &TcpListener, shutdown: &AtomicBool, handler: &Handler) {
    loop {
        let accepted = listener.accept();
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };

        // Set a short read timeout so we don't block forever on slow clients
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

        let response = match read_request(&stream) {
            Ok(Some(request)) => handler(&request),
            Ok(None) => continue,
            Err(HttpError::Io(e)) => {
                tracing::debug!("request read error: {e}");
                continue;
            }
            Err(e) => Response::error(400, &e.to_string()),
        };

        if let Err(e) = write_response(&stream, &response) {
            tracing::debug!("response write error: {e}");
        }
    }
}

/// Reads one request. `Ok(None)` means the peer closed without sending one.
///
/// # Errors
///
/// Returns [`HttpError`] on socket failure, a malformed request line or
/// header, an oversized head, or an oversized body.
pub fn read_request(stream: &TcpStream) -> Result<Option<Request>, HttpError> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if read_line(&mut reader, &mut request_line)? == 0 {
        return Ok(None);
    }

    // Parse: "GET /path?query HTTP/1.x"
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(HttpError::Malformed(request_line.trim().to_string()));
    }
    let mut request = Request::new(parts[0], parts[1])?;

    let mut headers = 0;
    loop {
        let mut line = String::new();
        read_line(&mut reader, &mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADERS {
            return Err(HttpError::HeadTooLarge);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::Malformed(format!("bad header '{line}'")))?;
        request = request.with_header(name.trim(), value);
    }

    let length = match request.header("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| HttpError::Malformed(format!("bad content-length '{value}'")))?,
        None => 0,
    };
    if length > MAX_BODY_BYTES {
        return Err(HttpError::BodyTooLarge(length));
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;
    request.body = body;

    Ok(Some(request))
}

fn read_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<usize, HttpError> {
    let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX);
    let read = reader.take(limit + 1).read_line(line)?;
    if read > MAX_LINE_BYTES {
        return Err(HttpError::HeadTooLarge);
    }
    Ok(read)
}

/// Writes `response` and closes the exchange.
///
/// # Errors
///
/// Returns the socket error, if any.
pub fn write_response(mut stream: &TcpStream, response: &Response) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        response.status,
        status_text(response.status),
        response.content_type,
        response.body.len(),
        response.body,
    )?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn parse_segments(path: &str) -> Result<Vec<String>, HttpError> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(std::borrow::Cow::into_owned)
                .map_err(|_| HttpError::Malformed(format!("path segment '{s}' is not UTF-8")))
        })
        .collect()
}

/// Parses a query string into key-value pairs. Undecodable values are kept
/// as sent.
fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(s).map_or_else(|_| s.to_string(), std::borrow::Cow::into_owned)
            };
            (decode(k), decode(v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_target_parsing() {
        let req = Request::new("get", "/my%20app/prod/things?days=7&by_date=true").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.segments, vec!["my app", "prod", "things"]);
        assert_eq!(req.param("days"), Some("7"));
        assert_eq!(req.param("by_date"), Some("true"));
        assert_eq!(req.param("keys"), None);
    }

    #[test]
    fn test_root_has_no_segments() {
        let req = Request::new("GET", "/").unwrap();
        assert!(req.segments.is_empty());
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = Request::new("GET", "/").unwrap().with_header("X-From-Peer", " true ");
        assert_eq!(req.header("x-from-peer"), Some("true"));
        assert_eq!(req.header("X-FROM-PEER"), Some("true"));
    }

    #[test]
    fn test_invalid_utf8_segment() {
        assert!(Request::new("GET", "/%FF/env").is_err());
    }

    fn read_raw(raw: &[u8]) -> Result<Option<Request>, HttpError> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client.write_all(raw).unwrap();
        let (server, _) = listener.accept().unwrap();
        read_request(&server)
    }

    #[test]
    fn test_oversized_header_line_is_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', MAX_LINE_BYTES + 10));
        raw.extend_from_slice(b"\r\n\r\n");
        assert!(matches!(read_raw(&raw), Err(HttpError::HeadTooLarge)));
    }

    #[test]
    fn test_too_many_headers_are_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            raw.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        assert!(matches!(read_raw(&raw), Err(HttpError::HeadTooLarge)));

        let ok = read_raw(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n").unwrap().unwrap();
        assert_eq!(ok.segments, vec!["a"]);
    }

    #[test]
    fn test_round_trip_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let handler: Handler = Arc::new(|req: &Request| {
            Response::json(200, &(req.segments.clone(), String::from_utf8_lossy(&req.body)))
        });
        let server = serve(listener, 2, handler).unwrap();

        let mut stream = TcpStream::connect(server.addr()).unwrap();
        write!(
            stream,
            "POST /a/b HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close"));
        assert!(response.ends_with(r#"[["a","b"],"hello"]"#));
    }
}
