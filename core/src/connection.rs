//! HTTP/1.1 connection state machine for one pool slot.
//!
//! A slot owns at most one transport and at most one in-flight request. It is
//! driven entirely by the client's processing step: `assign` starts a
//! request, `on_event` reacts to socket readiness and `on_timer` to expired
//! deadlines. Each of them may finish the request and hand back a
//! [`Completion`]; the client invokes the callback once it has released its
//! own state.
//!
//! ```text
//! Idle/Closed --assign--> Connecting --writable--> Sending
//! Sending --head written, body held--> AwaitingContinue --100 / wait over--> Sending
//! Sending --all written--> AwaitingResponse --response--> Idle | Closed
//! any --timeout / transport error / malformed--> Closed (request failed)
//! ```
//!
//! The transport is dropped after every failure and after responses that
//! ask for the connection to be closed, so the next request reconnects.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ErrorCode;
use crate::http::{DebugEvent, HttpClientCallbacks, HttpMethod, HttpRequest, HttpResponse};
use crate::sys::{Event, READABLE, WRITABLE};
use crate::transport::{Connector, Transport};

const MAX_HEADERS: usize = 100;
const READ_CHUNK: usize = 64 * 1024;
const DEBUG_HOOK_PANICKED: &str = "debug hook panicked";

/// A submitted request waiting for, or owned by, a slot.
pub(crate) struct PendingRequest {
    pub request: HttpRequest,
    pub callbacks: Arc<dyn HttpClientCallbacks>,
}

/// A finished request, ready for its callback.
pub(crate) struct Completion {
    pub pending: PendingRequest,
    pub response: HttpResponse,
}

/// Where requests go: resolved addresses plus what goes into the head.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub host_header: String,
    pub path_prefix: String,
    /// Resolution failure message when the host did not resolve.
    pub addrs: Result<Vec<SocketAddr>, String>,
}

/// Per-step view of the client settings a connection needs.
pub(crate) struct ConnectContext<'a> {
    pub connector: &'a dyn Connector,
    pub endpoint: &'a Endpoint,
    pub expect_100_continue: bool,
    pub expect_100_threshold: usize,
    pub continue_timeout: Duration,
    pub default_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Sending,
    AwaitingContinue,
    AwaitingResponse,
    Closed,
}

#[derive(Debug)]
struct ResponseHead {
    status: u16,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
enum Framing {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

struct Transfer {
    pending: PendingRequest,
    head: Vec<u8>,
    head_pos: usize,
    body_pos: usize,
    expect_continue: bool,
    send_body: bool,
    deadline: Option<Instant>,
    continue_deadline: Option<Instant>,
    addr_index: usize,
    inbuf: Vec<u8>,
    received_any: bool,
    response: Option<(ResponseHead, Framing)>,
    body: Vec<u8>,
    close_after: bool,
    resent: bool,
}

impl Transfer {
    fn body_bytes(&self) -> &[u8] {
        self.pending
            .request
            .content
            .as_ref()
            .map_or(&[][..], |c| c.body.as_slice())
    }

    fn fully_sent(&self) -> bool {
        self.head_pos == self.head.len() && self.body_pos == self.body_bytes().len()
    }

    fn rewind(&mut self) {
        self.head_pos = 0;
        self.body_pos = 0;
        self.send_body = !self.expect_continue;
        self.continue_deadline = None;
        self.inbuf.clear();
        self.received_any = false;
        self.response = None;
        self.body.clear();
        self.close_after = false;
    }
}

pub(crate) struct HttpConnection {
    index: usize,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    /// Bumped for every new transport, so stale registrations are noticed
    /// even when the kernel reuses a descriptor number.
    generation: u64,
    /// Requests completed on the current transport.
    completed_on_transport: u64,
    peer_http10: bool,
    transfer: Option<Transfer>,
    read_buf: Vec<u8>,
}

impl HttpConnection {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: ConnectionState::Closed,
            transport: None,
            generation: 0,
            completed_on_transport: 0,
            peer_http10: false,
            transfer: None,
            read_buf: vec![0u8; READ_CHUNK],
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True when the slot can take a request.
    pub fn is_free(&self) -> bool {
        self.transfer.is_none()
    }

    /// Descriptor, generation and interest the client should register.
    pub fn registration(&self) -> Option<(u64, RawFd, u32)> {
        let transport = self.transport.as_ref()?;
        let interest = match self.state {
            ConnectionState::Connecting => WRITABLE,
            ConnectionState::Sending => READABLE | WRITABLE,
            ConnectionState::Idle
            | ConnectionState::AwaitingContinue
            | ConnectionState::AwaitingResponse => READABLE,
            ConnectionState::Closed => return None,
        };
        Some((self.generation, transport.raw_fd(), interest))
    }

    /// Earliest instant at which `on_timer` has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let transfer = self.transfer.as_ref()?;
        let continue_deadline = if self.state == ConnectionState::AwaitingContinue {
            transfer.continue_deadline
        } else {
            None
        };
        match (transfer.deadline, continue_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start a request on this slot.
    pub fn assign(&mut self, pending: PendingRequest, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        debug_assert!(self.is_free());
        let request = &pending.request;
        let body_len = request.body_len();
        let expect_continue = ctx.expect_100_continue
            && body_len > 0
            && body_len >= ctx.expect_100_threshold
            && !self.peer_http10
            && request.wants_header("expect");

        let head = build_head(request, ctx.endpoint, expect_continue);
        if !run_debug_hook(&pending, DebugEvent::HeaderOut, &head) {
            return Some(Completion {
                pending,
                response: HttpResponse::failure(ErrorCode::Other, DEBUG_HOOK_PANICKED),
            });
        }

        let deadline = request.timeout.or(ctx.default_timeout).map(|t| now + t);
        self.transfer = Some(Transfer {
            pending,
            head,
            head_pos: 0,
            body_pos: 0,
            expect_continue,
            send_body: !expect_continue,
            deadline,
            continue_deadline: None,
            addr_index: 0,
            inbuf: Vec::new(),
            received_any: false,
            response: None,
            body: Vec::new(),
            close_after: false,
            resent: false,
        });

        if self.transport.is_some() && self.state == ConnectionState::Idle {
            tracing::trace!(slot = self.index, "reusing connection");
            self.state = ConnectionState::Sending;
            self.write_pending(ctx, now)
        } else {
            self.open(ctx)
        }
    }

    /// React to readiness of this slot's descriptor.
    pub fn on_event(&mut self, event: &Event, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        match self.state {
            ConnectionState::Connecting => self.on_connect_ready(event, ctx, now),
            ConnectionState::Sending => {
                if event.readable || event.error {
                    if let Some(done) = self.read_available(ctx, now) {
                        return Some(done);
                    }
                }
                if event.writable && self.state == ConnectionState::Sending {
                    return self.write_pending(ctx, now);
                }
                None
            }
            ConnectionState::AwaitingContinue | ConnectionState::AwaitingResponse => {
                if event.readable || event.error {
                    self.read_available(ctx, now)
                } else {
                    None
                }
            }
            ConnectionState::Idle => {
                // Nothing is expected on an idle keep-alive connection: this
                // is the server closing it (or sending garbage).
                tracing::debug!(slot = self.index, "idle connection closed by peer");
                self.close();
                None
            }
            ConnectionState::Closed => None,
        }
    }

    /// Enforce the request timeout and the `100 Continue` wait.
    pub fn on_timer(&mut self, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        let transfer = self.transfer.as_mut()?;
        if transfer.deadline.is_some_and(|d| now >= d) {
            tracing::debug!(slot = self.index, "request timed out");
            return self.fail(ErrorCode::Timeout, "request timed out");
        }
        if self.state == ConnectionState::AwaitingContinue && transfer.continue_deadline.is_some_and(|d| now >= d) {
            tracing::debug!(slot = self.index, "no 100 Continue, sending body anyway");
            return self.release_body(ctx, now);
        }
        None
    }

    fn open(&mut self, ctx: &ConnectContext<'_>) -> Option<Completion> {
        self.close();
        let addrs = match &ctx.endpoint.addrs {
            Ok(addrs) if !addrs.is_empty() => addrs,
            Ok(_) => return self.fail(ErrorCode::HostUnknown, "host resolved to no address"),
            Err(e) => {
                let detail = e.clone();
                return self.fail(ErrorCode::HostUnknown, detail);
            }
        };

        let start = self.transfer.as_ref().map_or(0, |t| t.addr_index);
        let mut last_error = None;
        for (i, addr) in addrs.iter().enumerate().skip(start) {
            match ctx.connector.connect(*addr) {
                Ok(transport) => {
                    if let Some(transfer) = self.transfer.as_mut() {
                        transfer.addr_index = i;
                    }
                    tracing::debug!(slot = self.index, %addr, "connecting");
                    self.transport = Some(transport);
                    self.generation += 1;
                    self.completed_on_transport = 0;
                    self.peer_http10 = false;
                    self.state = ConnectionState::Connecting;
                    return None;
                }
                Err(e) => {
                    tracing::debug!(slot = self.index, %addr, error = %e, "connect failed");
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error.map_or_else(|| "no address left to try".to_string(), |e| e.to_string());
        self.fail(ErrorCode::CouldNotConnect, detail)
    }

    fn on_connect_ready(&mut self, event: &Event, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        let transport = self.transport.as_ref()?;
        let outcome = match transport.take_error() {
            Ok(None) if !event.error => Ok(()),
            Ok(None) => Err("connection hung up while connecting".to_string()),
            Ok(Some(e)) | Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => {
                tracing::trace!(slot = self.index, "connected");
                self.state = ConnectionState::Sending;
                self.write_pending(ctx, now)
            }
            Err(detail) => {
                let next = self.transfer.as_ref().map_or(0, |t| t.addr_index + 1);
                let more = matches!(&ctx.endpoint.addrs, Ok(addrs) if next < addrs.len());
                if more {
                    if let Some(transfer) = self.transfer.as_mut() {
                        transfer.addr_index = next;
                    }
                    self.open(ctx)
                } else {
                    tracing::debug!(slot = self.index, detail = %detail, "could not connect");
                    self.fail(ErrorCode::CouldNotConnect, detail)
                }
            }
        }
    }

    fn write_pending(&mut self, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        loop {
            let (Some(transfer), Some(transport)) = (self.transfer.as_mut(), self.transport.as_mut()) else {
                return None;
            };
            let result = if transfer.head_pos < transfer.head.len() {
                transport.write(&transfer.head[transfer.head_pos..]).map(|n| (n, true))
            } else if transfer.send_body && transfer.body_pos < transfer.body_bytes().len() {
                let pos = transfer.body_pos;
                let body = transfer
                    .pending
                    .request
                    .content
                    .as_ref()
                    .map_or(&[][..], |c| &c.body[pos..]);
                transport.write(body).map(|n| (n, false))
            } else {
                break;
            };

            match result {
                Ok((0, _)) => {
                    return self.transport_failed(io::Error::from(io::ErrorKind::WriteZero), ctx);
                }
                Ok((n, true)) => transfer.head_pos += n,
                Ok((n, false)) => transfer.body_pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.transport_failed(e, ctx),
            }
        }

        let transfer = self.transfer.as_mut()?;
        if !transfer.send_body {
            transfer.continue_deadline = Some(now + ctx.continue_timeout);
            self.state = ConnectionState::AwaitingContinue;
        } else if transfer.fully_sent() {
            self.state = ConnectionState::AwaitingResponse;
        }
        None
    }

    fn release_body(&mut self, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        let transfer = self.transfer.as_mut()?;
        transfer.send_body = true;
        transfer.continue_deadline = None;
        self.state = ConnectionState::Sending;
        self.write_pending(ctx, now)
    }

    fn read_available(&mut self, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        let mut eof = false;
        loop {
            let (Some(transfer), Some(transport)) = (self.transfer.as_mut(), self.transport.as_mut()) else {
                return None;
            };
            match transport.read(&mut self.read_buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    transfer.inbuf.extend_from_slice(&self.read_buf[..n]);
                    transfer.received_any = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.transport_failed(e, ctx),
            }
        }
        self.parse_input(eof, ctx, now)
    }

    fn parse_input(&mut self, eof: bool, ctx: &ConnectContext<'_>, now: Instant) -> Option<Completion> {
        loop {
            let transfer = self.transfer.as_mut()?;
            if transfer.response.is_some() {
                break;
            }

            let (head, consumed) = match parse_head(&transfer.inbuf) {
                Ok(Some(parsed)) => parsed,
                Ok(None) if eof => return self.closed_early(ctx),
                Ok(None) => return None,
                Err(detail) => {
                    tracing::warn!(slot = self.index, detail = %detail, "malformed response");
                    return self.fail(ErrorCode::Other, detail);
                }
            };
            if !run_debug_hook(&transfer.pending, DebugEvent::HeaderIn, &transfer.inbuf[..consumed]) {
                return self.fail(ErrorCode::Other, DEBUG_HOOK_PANICKED);
            }
            transfer.inbuf.drain(..consumed);

            if (100..200).contains(&head.status) {
                if head.status == 100 && self.state == ConnectionState::AwaitingContinue {
                    tracing::trace!(slot = self.index, "100 Continue received");
                    if let Some(done) = self.release_body(ctx, now) {
                        return Some(done);
                    }
                }
                continue;
            }

            if !transfer.fully_sent() {
                // Final answer before the body went out: stop sending and
                // do not reuse the connection, the server may still expect
                // the rest of the body.
                transfer.close_after = true;
                transfer.send_body = false;
                self.state = ConnectionState::AwaitingResponse;
            }
            let framing = match framing_for(&head) {
                Ok(framing) => framing,
                Err(detail) => return self.fail(ErrorCode::Other, detail),
            };
            transfer.response = Some((head, framing));
        }

        let transfer = self.transfer.as_mut()?;
        let framing = match &transfer.response {
            Some((_, framing)) => *framing,
            None => return None,
        };
        match framing {
            Framing::Empty => self.complete(),
            Framing::Length(len) => {
                if transfer.inbuf.len() >= len {
                    transfer.body = transfer.inbuf.drain(..len).collect();
                    self.complete()
                } else if eof {
                    self.fail(ErrorCode::Other, "connection closed in the middle of the body")
                } else {
                    None
                }
            }
            Framing::Chunked => match decode_chunks(&mut transfer.inbuf, &mut transfer.body) {
                Ok(true) => self.complete(),
                Ok(false) if eof => self.fail(ErrorCode::Other, "connection closed in the middle of a chunk"),
                Ok(false) => None,
                Err(detail) => self.fail(ErrorCode::Other, detail),
            },
            Framing::UntilClose => {
                if eof {
                    transfer.body = std::mem::take(&mut transfer.inbuf);
                    transfer.close_after = true;
                    self.complete()
                } else {
                    None
                }
            }
        }
    }

    fn complete(&mut self) -> Option<Completion> {
        let transfer = self.transfer.take()?;
        let (head, _) = transfer.response?;
        let close = transfer.close_after || !transfer.inbuf.is_empty() || wants_close(&head);

        self.peer_http10 = head.version == 0;
        self.completed_on_transport += 1;
        if close {
            tracing::debug!(slot = self.index, status = head.status, "server closed the connection");
            self.close();
        } else {
            self.state = ConnectionState::Idle;
        }

        Some(Completion {
            pending: transfer.pending,
            response: HttpResponse::success(head.status, head.headers, transfer.body),
        })
    }

    /// The peer closed before a full response arrived.
    fn closed_early(&mut self, ctx: &ConnectContext<'_>) -> Option<Completion> {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before the response completed");
        self.transport_failed(err, ctx)
    }

    fn transport_failed(&mut self, err: io::Error, ctx: &ConnectContext<'_>) -> Option<Completion> {
        let stale = self.completed_on_transport > 0
            && self
                .transfer
                .as_ref()
                .is_some_and(|t| !t.received_any && !t.resent);
        if stale {
            // A kept-alive connection the server had already given up on.
            // Nothing was answered, so send the request once more on a new
            // connection.
            tracing::debug!(slot = self.index, error = %err, "stale connection, resending on a new one");
            if let Some(transfer) = self.transfer.as_mut() {
                transfer.resent = true;
                transfer.addr_index = 0;
                transfer.rewind();
            }
            return self.open(ctx);
        }
        tracing::debug!(slot = self.index, error = %err, "transport failure");
        self.fail(ErrorCode::Other, err.to_string())
    }

    fn fail(&mut self, code: ErrorCode, detail: impl Into<String>) -> Option<Completion> {
        self.close();
        let transfer = self.transfer.take()?;
        Some(Completion {
            pending: transfer.pending,
            response: HttpResponse::failure(code, detail),
        })
    }

    fn close(&mut self) {
        self.transport = None;
        self.state = ConnectionState::Closed;
    }
}

/// Pass raw protocol data to the request's debug hook. Returns false if the
/// hook panicked; the request is then failed rather than left half sent.
fn run_debug_hook(pending: &PendingRequest, event: DebugEvent, data: &[u8]) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pending.callbacks.on_debug(&pending.request, event, data)
    }));
    if outcome.is_err() {
        tracing::error!(resource = %pending.request.resource, ?event, "debug hook panicked");
    }
    outcome.is_ok()
}

/// Serialize the request line and headers.
fn build_head(request: &HttpRequest, endpoint: &Endpoint, expect_continue: bool) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(request.method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(endpoint.path_prefix.as_bytes());
    head.extend_from_slice(request.target().as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    let mut push_header = |name: &str, value: &str| {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    };

    if request.wants_header("host") {
        push_header("Host", &endpoint.host_header);
    }
    if request.wants_header("accept") {
        push_header("Accept", "*/*");
    }
    for (name, value) in &request.headers {
        push_header(name, value);
    }
    match &request.content {
        Some(content) => {
            if request.wants_header("content-type") {
                push_header("Content-Type", &content.content_type);
            }
            if request.wants_header("content-length") {
                push_header("Content-Length", &content.body.len().to_string());
            }
        }
        None if matches!(request.method, HttpMethod::Post | HttpMethod::Put) => {
            push_header("Content-Length", "0");
        }
        None => {}
    }
    if expect_continue {
        push_header("Expect", "100-continue");
    }

    head.extend_from_slice(b"\r\n");
    head
}

/// Parse a response head. `Ok(None)` means more bytes are needed.
fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let status = response.code.ok_or_else(|| "missing status code".to_string())?;
            let head = ResponseHead {
                status,
                version: response.version.unwrap_or(1),
                headers: response
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect(),
            };
            Ok(Some((head, len)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(format!("malformed response head: {e}")),
    }
}

fn header<'a>(head: &'a ResponseHead, name: &str) -> Option<&'a str> {
    head.headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn framing_for(head: &ResponseHead) -> Result<Framing, String> {
    if head.status == 204 || head.status == 304 || (100..200).contains(&head.status) {
        return Ok(Framing::Empty);
    }
    if let Some(te) = header(head, "transfer-encoding") {
        if te
            .rsplit(',')
            .next()
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
        {
            return Ok(Framing::Chunked);
        }
        return Ok(Framing::UntilClose);
    }
    if let Some(cl) = header(head, "content-length") {
        return cl
            .trim()
            .parse()
            .map(Framing::Length)
            .map_err(|_| format!("invalid content-length: {cl}"));
    }
    Ok(Framing::UntilClose)
}

fn wants_close(head: &ResponseHead) -> bool {
    let connection = header(head, "connection").unwrap_or("");
    if has_token(connection, "close") {
        return true;
    }
    head.version == 0 && !has_token(connection, "keep-alive")
}

enum Chunk {
    Data { start: usize, end: usize, consumed: usize },
    Last { consumed: usize },
    NeedMore,
}

/// Decode one chunk at the start of `data`.
fn decode_chunk(data: &[u8]) -> Result<Chunk, String> {
    let Some(crlf) = find_crlf(data) else {
        return Ok(Chunk::NeedMore);
    };
    let line = std::str::from_utf8(&data[..crlf]).map_err(|_| "invalid chunk size line".to_string())?;
    // Strip chunk extensions (;key=value).
    let size_hex = line.split(';').next().unwrap_or("").trim();
    let size = usize::from_str_radix(size_hex, 16).map_err(|_| format!("invalid chunk size: {size_hex}"))?;

    let start = crlf + 2;
    if size == 0 {
        // Optional trailers, then the final empty line.
        let rest = &data[start..];
        if rest.starts_with(b"\r\n") {
            return Ok(Chunk::Last { consumed: start + 2 });
        }
        return Ok(match find_header_end(rest) {
            Some(end) => Chunk::Last {
                consumed: start + end + 4,
            },
            None => Chunk::NeedMore,
        });
    }

    let Some((end, consumed)) = start
        .checked_add(size)
        .and_then(|end| end.checked_add(2).map(|consumed| (end, consumed)))
    else {
        return Err(format!("chunk size too large: {size_hex}"));
    };
    if data.len() < consumed {
        return Ok(Chunk::NeedMore);
    }
    if &data[end..consumed] != b"\r\n" {
        return Err("chunk not terminated by CRLF".to_string());
    }
    Ok(Chunk::Data { start, end, consumed })
}

/// Move every complete chunk from `inbuf` into `body`. Returns true once the
/// last chunk has been seen.
fn decode_chunks(inbuf: &mut Vec<u8>, body: &mut Vec<u8>) -> Result<bool, String> {
    let mut pos = 0;
    let mut done = false;
    loop {
        match decode_chunk(&inbuf[pos..])? {
            Chunk::Data { start, end, consumed } => {
                body.extend_from_slice(&inbuf[pos + start..pos + end]);
                pos += consumed;
            }
            Chunk::Last { consumed } => {
                pos += consumed;
                done = true;
                break;
            }
            Chunk::NeedMore => break,
        }
    }
    inbuf.drain(..pos);
    Ok(done)
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}
