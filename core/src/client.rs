//! Asynchronous HTTP/1.1 client: a fixed pool of connections fed from a
//! request queue.
//!
//! # Design
//! Submission is the only operation other threads perform: `submit` (and the
//! `get`/`post`/`put`/`delete` helpers) push into a [`TypedMessageQueue`] and
//! return immediately. Everything else happens inside `process_one`, on the
//! thread driving the client:
//!
//! - the client owns an epoll set holding the queue wakeup, a timerfd for
//!   request deadlines and one socket per busy slot; that set's descriptor is
//!   the client's `handle`, so a [`MessageLoop`](crate::MessageLoop) can nest
//!   it like any other source;
//! - ready sockets and expired deadlines advance the slots' state machines;
//! - finished requests are collected and their callbacks run after the slot
//!   lock is released, so a callback may submit again;
//! - queued requests are then handed to free slots in the same step,
//!   repeating while that produces more completions.
//!
//! While every slot is busy the queue wakeup is masked in the client's epoll
//! set, so a backlog does not keep the loop spinning. Freeing a slot drains
//! the queue directly.
//!
//! Callers without a loop of their own can [`start`](HttpClient::start) the
//! client on a private one-thread loop instead of registering it.

use std::fmt;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use url::Url;

use crate::config::{HttpClientConfig, MessageLoopConfig};
use crate::connection::{Completion, ConnectContext, Endpoint, HttpConnection, PendingRequest};
use crate::error::CoreError;
use crate::event_loop::MessageLoop;
use crate::http::{HttpClientCallbacks, HttpMethod, HttpRequest, MimeContent, RestParams};
use crate::queue::TypedMessageQueue;
use crate::source::EventSource;
use crate::sys::{Epoll, Event, TimerFd, READABLE};
use crate::transport::{Connector, TcpConnector};

const QUEUE_TOKEN: u64 = 0;
const TIMER_TOKEN: u64 = 1;
const SLOT_TOKEN_BASE: u64 = 2;

/// Drain rounds per `process_one` before yielding back to the loop.
const MAX_DRAIN_ROUNDS: usize = 16;

/// What is currently registered in the epoll set for one slot.
type Registration = (u64, RawFd, u32);

struct PoolState {
    slots: Vec<HttpConnection>,
    registered: Vec<Option<Registration>>,
    queue_armed: bool,
    timer_deadline: Option<Instant>,
    events: Vec<Event>,
}

pub struct HttpClient {
    base_url: String,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    queue: TypedMessageQueue<PendingRequest>,
    pool_size: usize,
    pool: Mutex<PoolState>,
    epoll: Epoll,
    timer: TimerFd,
    expect_100_continue: AtomicBool,
    expect_100_threshold: AtomicUsize,
    continue_timeout: Duration,
    default_timeout: Option<Duration>,
    standalone: Mutex<Option<MessageLoop>>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, CoreError> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Client whose connections are opened by `connector`.
    pub fn with_connector(config: HttpClientConfig, connector: Arc<dyn Connector>) -> Result<Self, CoreError> {
        config.validate()?;
        let endpoint = parse_endpoint(&config.base_url)?;
        if let Err(e) = &endpoint.addrs {
            tracing::warn!(base_url = %config.base_url, error = %e, "host did not resolve");
        }

        let queue = TypedMessageQueue::new(config.queue_bound)?;
        let epoll = Epoll::new()?;
        let timer = TimerFd::new()?;
        epoll.add(queue.handle(), QUEUE_TOKEN, READABLE)?;
        epoll.add(timer.fd(), TIMER_TOKEN, READABLE)?;

        let slots = (0..config.pool_size).map(HttpConnection::new).collect();
        tracing::info!(
            base_url = %config.base_url,
            pool_size = config.pool_size,
            queue_bound = config.queue_bound,
            "http client created"
        );

        Ok(Self {
            base_url: config.base_url.clone(),
            endpoint,
            connector,
            queue,
            pool_size: config.pool_size,
            pool: Mutex::new(PoolState {
                slots,
                registered: vec![None; config.pool_size],
                queue_armed: true,
                timer_deadline: None,
                events: Vec::with_capacity(config.pool_size + 2),
            }),
            epoll,
            timer,
            expect_100_continue: AtomicBool::new(config.expect_100_continue),
            expect_100_threshold: AtomicUsize::new(config.expect_100_threshold),
            continue_timeout: config.continue_timeout(),
            default_timeout: config.default_timeout_duration(),
            standalone: Mutex::new(None),
        })
    }

    /// Drive the client from its own one-thread loop. Calling it on a
    /// started client is a no-op. The loop only holds a weak reference, so
    /// dropping the last `Arc` stops it as well.
    pub fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let mut standalone = self.standalone.lock();
        if standalone.is_some() {
            return Ok(());
        }
        let event_loop = MessageLoop::new(MessageLoopConfig::default())?;
        let driver = StandaloneDriver {
            client: Arc::downgrade(self),
            fd: self.handle(),
        };
        event_loop.add_source("http-client", Arc::new(driver))?;
        event_loop.start()?;
        *standalone = Some(event_loop);
        tracing::debug!(base_url = %self.base_url, "http client started standalone");
        Ok(())
    }

    /// Stop the loop started by `start`. Queued requests stay queued until
    /// the client is driven again.
    pub fn shutdown(&self) {
        let event_loop = self.standalone.lock().take();
        if let Some(event_loop) = event_loop {
            event_loop.shutdown();
            tracing::debug!(base_url = %self.base_url, "http client stopped");
        }
    }

    /// Queue a request. Returns false when the queue is bounded and full;
    /// the caller may retry later or drop the request.
    pub fn submit(&self, request: HttpRequest, callbacks: Arc<dyn HttpClientCallbacks>) -> bool {
        let resource = request.resource.clone();
        let accepted = self.queue.push_back(PendingRequest { request, callbacks });
        if !accepted {
            tracing::debug!(resource = %resource, queue_size = self.queue.size(), "request queue full");
        }
        accepted
    }

    pub fn get(
        &self,
        resource: &str,
        callbacks: Arc<dyn HttpClientCallbacks>,
        query: RestParams,
        headers: RestParams,
        timeout: Option<Duration>,
    ) -> bool {
        self.submit(build(HttpMethod::Get, resource, None, query, headers, timeout), callbacks)
    }

    pub fn post(
        &self,
        resource: &str,
        callbacks: Arc<dyn HttpClientCallbacks>,
        content: MimeContent,
        query: RestParams,
        headers: RestParams,
        timeout: Option<Duration>,
    ) -> bool {
        self.submit(build(HttpMethod::Post, resource, Some(content), query, headers, timeout), callbacks)
    }

    pub fn put(
        &self,
        resource: &str,
        callbacks: Arc<dyn HttpClientCallbacks>,
        content: MimeContent,
        query: RestParams,
        headers: RestParams,
        timeout: Option<Duration>,
    ) -> bool {
        self.submit(build(HttpMethod::Put, resource, Some(content), query, headers, timeout), callbacks)
    }

    pub fn delete(
        &self,
        resource: &str,
        callbacks: Arc<dyn HttpClientCallbacks>,
        query: RestParams,
        headers: RestParams,
        timeout: Option<Duration>,
    ) -> bool {
        self.submit(build(HttpMethod::Delete, resource, None, query, headers, timeout), callbacks)
    }

    /// Change the pending-queue bound; 0 means unbounded.
    pub fn set_queue_bound(&self, bound: usize) {
        self.queue.set_max_messages(bound);
    }

    pub fn queue_bound(&self) -> usize {
        self.queue.max_messages()
    }

    /// Requests waiting for a connection.
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn send_expect_100_continue(&self, enabled: bool) {
        self.expect_100_continue.store(enabled, Ordering::Relaxed);
    }

    pub fn set_expect_100_threshold(&self, threshold: usize) {
        self.expect_100_threshold.store(threshold, Ordering::Relaxed);
    }

    fn context(&self) -> ConnectContext<'_> {
        ConnectContext {
            connector: self.connector.as_ref(),
            endpoint: &self.endpoint,
            expect_100_continue: self.expect_100_continue.load(Ordering::Relaxed),
            expect_100_threshold: self.expect_100_threshold.load(Ordering::Relaxed),
            continue_timeout: self.continue_timeout,
            default_timeout: self.default_timeout,
        }
    }

    /// Advance slots with ready sockets or expired deadlines.
    fn poll_slots(&self) -> Vec<Completion> {
        let mut completions = Vec::new();
        let mut pool = self.pool.lock();
        let pool = &mut *pool;
        let ctx = self.context();

        let max = pool.slots.len() + 2;
        if let Err(e) = self.epoll.wait(&mut pool.events, max, Some(Duration::ZERO)) {
            tracing::warn!(error = %e, "client epoll wait failed");
        }
        let now = Instant::now();
        for event in &pool.events {
            match event.token {
                // Handled by the drain that follows.
                QUEUE_TOKEN => {}
                TIMER_TOKEN => {
                    self.timer.drain();
                    pool.timer_deadline = None;
                }
                token => {
                    let index = (token - SLOT_TOKEN_BASE) as usize;
                    if let Some(slot) = pool.slots.get_mut(index) {
                        completions.extend(slot.on_event(event, &ctx, now));
                    }
                }
            }
        }
        for slot in &mut pool.slots {
            completions.extend(slot.on_timer(&ctx, now));
        }

        self.sync(pool, now);
        completions
    }

    /// Hand queued requests to free slots.
    fn drain_queue(&self) -> Vec<Completion> {
        let mut completions = Vec::new();
        let mut pool = self.pool.lock();
        let pool = &mut *pool;
        let ctx = self.context();

        let free = pool.slots.iter().filter(|s| s.is_free()).count();
        if free > 0 {
            let mut batch = Vec::new();
            self.queue.process_with(|| batch = self.queue.pop_front(free));
            let now = Instant::now();
            let mut slots = pool.slots.iter_mut().filter(|s| s.is_free());
            for pending in batch {
                // `free` slots were counted under this lock; one exists.
                let Some(slot) = slots.next() else { break };
                completions.extend(slot.assign(pending, &ctx, now));
            }
        }

        self.sync(pool, Instant::now());
        completions
    }

    /// Bring the epoll set and the timer in line with the slots.
    fn sync(&self, pool: &mut PoolState, now: Instant) {
        // Removals first: a descriptor number freed by one slot may already
        // belong to another slot's new transport.
        for (index, slot) in pool.slots.iter().enumerate() {
            let wanted = slot.registration();
            if let Some((generation, fd, _)) = pool.registered[index] {
                let same_transport = wanted.is_some_and(|(g, _, _)| g == generation);
                if !same_transport {
                    // Usually already gone with the closed descriptor.
                    let _ = self.epoll.delete(fd);
                    pool.registered[index] = None;
                }
            }
        }

        for (index, slot) in pool.slots.iter().enumerate() {
            let wanted = slot.registration();
            if wanted == pool.registered[index] {
                continue;
            }
            let token = SLOT_TOKEN_BASE + index as u64;
            let result = match (pool.registered[index], wanted) {
                (Some(_), Some((_, fd, interest))) => self.epoll.modify(fd, token, interest),
                (None, Some((_, fd, interest))) => self.epoll.add(fd, token, interest),
                (_, None) => Ok(()),
            };
            match result {
                Ok(()) => pool.registered[index] = wanted,
                Err(e) => tracing::error!(slot = index, error = %e, "failed to register connection"),
            }
        }

        let arm_queue = pool.slots.iter().any(|s| s.is_free());
        if arm_queue != pool.queue_armed {
            let interest = if arm_queue { READABLE } else { 0 };
            match self.epoll.modify(self.queue.handle(), QUEUE_TOKEN, interest) {
                Ok(()) => pool.queue_armed = arm_queue,
                Err(e) => tracing::error!(error = %e, "failed to update queue interest"),
            }
        }

        let deadline = pool.slots.iter().filter_map(|s| s.next_deadline()).min();
        if deadline != pool.timer_deadline {
            let after = deadline.map(|d| d.saturating_duration_since(now));
            match self.timer.set(after) {
                Ok(()) => pool.timer_deadline = deadline,
                Err(e) => tracing::error!(error = %e, "failed to arm request timer"),
            }
        }
    }

    /// Run callbacks. A panicking callback is logged and does not stop the
    /// others.
    fn deliver(&self, completions: Vec<Completion>) {
        for Completion { pending, response } in completions {
            let PendingRequest { request, callbacks } = pending;
            tracing::trace!(
                method = %request.method,
                resource = %request.resource,
                error = %response.error,
                status = response.status,
                "request finished"
            );
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callbacks.on_response(&request, response)));
            if outcome.is_err() {
                tracing::error!(resource = %request.resource, "response callback panicked");
            }
        }
    }
}

impl EventSource for HttpClient {
    fn handle(&self) -> RawFd {
        self.epoll.fd()
    }

    fn has_work(&self) -> bool {
        self.epoll.is_ready()
    }

    fn process_one(&self) -> bool {
        let mut completions = self.poll_slots();
        for _ in 0..MAX_DRAIN_ROUNDS {
            self.deliver(std::mem::take(&mut completions));
            completions = self.drain_queue();
            if completions.is_empty() {
                return false;
            }
        }
        self.deliver(completions);
        true
    }
}

/// Loop member standing in for a started client.
struct StandaloneDriver {
    client: Weak<HttpClient>,
    fd: RawFd,
}

impl EventSource for StandaloneDriver {
    fn handle(&self) -> RawFd {
        self.fd
    }

    fn has_work(&self) -> bool {
        self.client.upgrade().is_some_and(|client| client.has_work())
    }

    fn process_one(&self) -> bool {
        self.client.upgrade().is_some_and(|client| client.process_one())
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("HttpClient");
        out.field("base_url", &self.base_url)
            .field("queue_size", &self.queue.size())
            .field("queue_bound", &self.queue.max_messages())
            .field("pool_size", &self.pool_size);
        // Slot states are skipped while a processing step holds them, which
        // includes formatting from inside a debug hook.
        if let Some(pool) = self.pool.try_lock() {
            out.field("slots", &pool.slots.iter().map(|s| s.state()).collect::<Vec<_>>());
        }
        out.finish()
    }
}

fn build(
    method: HttpMethod,
    resource: &str,
    content: Option<MimeContent>,
    query: RestParams,
    headers: RestParams,
    timeout: Option<Duration>,
) -> HttpRequest {
    let mut request = HttpRequest::new(method, resource);
    request.query_params = query;
    request.headers = headers;
    request.content = content;
    request.timeout = timeout;
    request
}

/// Parse the base URL and resolve its host once.
fn parse_endpoint(base_url: &str) -> Result<Endpoint, CoreError> {
    let url = Url::parse(base_url).map_err(|e| CoreError::InvalidUrl(format!("{base_url}: {e}")))?;
    if url.scheme() != "http" {
        return Err(CoreError::UnsupportedScheme(url.scheme().to_string()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| CoreError::InvalidUrl(format!("{base_url}: missing host")))?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path_prefix = url.path().trim_end_matches('/').to_string();
    let addrs = url.socket_addrs(|| Some(80)).map_err(|e| e.to_string());

    Ok(Endpoint {
        host_header,
        path_prefix,
        addrs,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::config::MessageLoopConfig;
    use crate::error::ErrorCode;
    use crate::event_loop::MessageLoop;
    use crate::http::{DebugEvent, HttpClientSimpleCallbacks, HttpResponse};

    type Responses = Arc<parking_lot::Mutex<Vec<HttpResponse>>>;

    fn collector() -> (Arc<dyn HttpClientCallbacks>, Responses) {
        let responses: Responses = Arc::default();
        let sink = responses.clone();
        let callbacks = HttpClientSimpleCallbacks::new(move |_, response| sink.lock().push(response));
        (Arc::new(callbacks), responses)
    }

    fn drive_until(client: &Arc<HttpClient>, mut done: impl FnMut() -> bool) {
        let event_loop = MessageLoop::new(MessageLoopConfig::default()).unwrap();
        event_loop.add_source("client", client.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out driving the client");
            event_loop.poll_once(Some(Duration::from_millis(20))).unwrap();
        }
        event_loop.remove_source("client").unwrap();
    }

    fn read_request_head(stream: &mut std::net::TcpStream) -> Vec<u8> {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => head.push(byte[0]),
            }
        }
        head
    }

    #[test]
    fn endpoint_keeps_port_and_prefix() {
        let endpoint = parse_endpoint("http://127.0.0.1:8080/api/").unwrap();
        assert_eq!(endpoint.host_header, "127.0.0.1:8080");
        assert_eq!(endpoint.path_prefix, "/api");
        assert_eq!(endpoint.addrs.unwrap(), vec!["127.0.0.1:8080".parse().unwrap()]);

        let endpoint = parse_endpoint("http://127.0.0.1").unwrap();
        assert_eq!(endpoint.host_header, "127.0.0.1");
        assert_eq!(endpoint.path_prefix, "");
    }

    #[test]
    fn only_plain_http_is_accepted() {
        assert!(matches!(
            parse_endpoint("https://example.com"),
            Err(CoreError::UnsupportedScheme(s)) if s == "https"
        ));
        assert!(matches!(parse_endpoint("not a url"), Err(CoreError::InvalidUrl(_))));
    }

    #[test]
    fn bounded_queue_rejects_overflow() {
        let client = HttpClient::new(HttpClientConfig::new("http://127.0.0.1:9").queue_bound(2)).unwrap();
        let (callbacks, _) = collector();
        assert!(client.get("/a", callbacks.clone(), vec![], vec![], None));
        assert!(client.get("/b", callbacks.clone(), vec![], vec![], None));
        assert!(!client.get("/c", callbacks.clone(), vec![], vec![], None));
        assert_eq!(client.queue_size(), 2);

        client.set_queue_bound(0);
        assert_eq!(client.queue_bound(), 0);
        assert!(client.get("/c", callbacks, vec![], vec![], None));
        assert_eq!(client.queue_size(), 3);
        assert_eq!(client.pool_size(), 4);
    }

    #[test]
    fn refused_connection_is_reported() {
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}"))).unwrap());
        let (callbacks, responses) = collector();
        assert!(client.get("/", callbacks, vec![], vec![], None));

        drive_until(&client, || !responses.lock().is_empty());
        let responses = responses.lock();
        assert_eq!(responses[0].error, ErrorCode::CouldNotConnect);
        assert_eq!(responses[0].status, 0);
    }

    #[test]
    fn keep_alive_connection_is_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for _ in 0..3 {
                read_request_head(&mut stream);
                stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
            }
        });

        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}")).pool_size(1)).unwrap());
        let (callbacks, responses) = collector();
        for _ in 0..3 {
            assert!(client.get("/", callbacks.clone(), vec![], vec![], None));
        }
        drive_until(&client, || responses.lock().len() == 3);
        server.join().unwrap();
        for response in responses.lock().iter() {
            assert_eq!(response.error, ErrorCode::Success);
            assert_eq!(response.body, b"ok");
        }
    }

    #[test]
    fn server_closing_an_idle_connection_is_transparent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                read_request_head(&mut stream);
                // No `Connection: close`, yet the server hangs up.
                stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
            }
        });

        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}")).pool_size(1)).unwrap());
        let (callbacks, responses) = collector();
        let resubmit = {
            let client = Arc::downgrade(&client);
            let callbacks = callbacks.clone();
            Arc::new(HttpClientSimpleCallbacks::new(move |_, response| {
                assert_eq!(response.error, ErrorCode::Success);
                if let Some(client) = client.upgrade() {
                    client.get("/again", callbacks.clone(), vec![], vec![], None);
                }
            }))
        };
        assert!(client.get("/", resubmit, vec![], vec![], None));

        drive_until(&client, || responses.lock().len() == 1);
        server.join().unwrap();
        assert_eq!(responses.lock()[0].error, ErrorCode::Success);
        assert_eq!(responses.lock()[0].body, b"ok");
    }

    #[test]
    fn panicking_callback_does_not_lose_other_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for _ in 0..2 {
                read_request_head(&mut stream);
                stream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
            }
        });

        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}")).pool_size(1)).unwrap());
        let panicking: Arc<dyn HttpClientCallbacks> =
            Arc::new(HttpClientSimpleCallbacks::new(|_, _| panic!("callback failure")));
        let (callbacks, responses) = collector();
        assert!(client.get("/first", panicking, vec![], vec![], None));
        assert!(client.get("/second", callbacks, vec![], vec![], None));

        drive_until(&client, || responses.lock().len() == 1);
        server.join().unwrap();
        assert_eq!(responses.lock()[0].status, 204);
    }

    #[test]
    fn debug_hook_may_query_the_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_request_head(&mut stream);
            stream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        });

        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}")).pool_size(1)).unwrap());
        let seen: Arc<parking_lot::Mutex<Vec<(usize, String)>>> = Arc::default();
        let (_, responses) = collector();
        let callbacks = {
            let client = Arc::downgrade(&client);
            let seen = seen.clone();
            let sink = responses.clone();
            HttpClientSimpleCallbacks::new(move |_, response| sink.lock().push(response)).with_debug(move |_, _, _| {
                if let Some(client) = client.upgrade() {
                    seen.lock().push((client.pool_size(), format!("{client:?}")));
                }
            })
        };
        assert!(client.get("/", Arc::new(callbacks), vec![], vec![], None));

        drive_until(&client, || !responses.lock().is_empty());
        server.join().unwrap();
        assert_eq!(responses.lock()[0].status, 204);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        for (pool_size, debug) in seen.iter() {
            assert_eq!(*pool_size, 1);
            assert!(debug.contains("pool_size: 1"), "{debug}");
        }
    }

    #[test]
    fn panicking_debug_hook_fails_only_its_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                read_request_head(&mut stream);
                stream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
            }
        });

        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}")).pool_size(1)).unwrap());
        let (_, responses) = collector();
        let sink = responses.clone();
        let callbacks = HttpClientSimpleCallbacks::new(move |_, response| sink.lock().push(response)).with_debug(
            |request, event, _| {
                if request.resource == "/first" && event == DebugEvent::HeaderIn {
                    panic!("hook failure");
                }
            },
        );
        let callbacks: Arc<dyn HttpClientCallbacks> = Arc::new(callbacks);
        assert!(client.get("/first", callbacks.clone(), vec![], vec![], None));
        assert!(client.get("/second", callbacks, vec![], vec![], None));

        drive_until(&client, || responses.lock().len() == 2);
        server.join().unwrap();
        let responses = responses.lock();
        assert_eq!(responses[0].error, ErrorCode::Other);
        assert_eq!(responses[0].detail, "debug hook panicked");
        assert_eq!(responses[1].error, ErrorCode::Success);
        assert_eq!(responses[1].status, 204);
    }

    #[test]
    fn request_without_answer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = Arc::new(HttpClient::new(HttpClientConfig::new(&format!("http://{addr}"))).unwrap());
        let (callbacks, responses) = collector();
        let start = Instant::now();
        assert!(client.get("/", callbacks, vec![], vec![], Some(Duration::from_millis(200))));

        drive_until(&client, || !responses.lock().is_empty());
        let elapsed = start.elapsed();
        assert_eq!(responses.lock()[0].error, ErrorCode::Timeout);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(3));
        drop(listener);
    }
}
