//! Event-loop driven HTTP client runtime.
//!
//! # Overview
//! Producer threads hand work to a single consumer loop through two channel
//! primitives: [`TypedMessageSink`] (bounded ring, one handler call per
//! message) and [`TypedMessageQueue`] (optionally bounded, one coalesced
//! notification per burst). A [`MessageLoop`] multiplexes any number of
//! [`EventSource`]s on epoll. [`HttpClient`] is such a source: it runs a
//! fixed pool of HTTP/1.1 connections fed from a request queue and reports
//! every request through its [`HttpClientCallbacks`]. The [`sink`] module
//! adds byte sinks for components that stream output to a descriptor or fan
//! input out to several receivers.
//!
//! # Design
//! - Every source exposes a pollable descriptor; readiness, not polling,
//!   decides when `process_one` runs, and a source is processed by one thread
//!   at a time.
//! - The channels are the only state shared with producer threads. Slot
//!   state, queue draining and callbacks all run on the loop thread.
//! - Request outcomes are data (`ErrorCode` in an `HttpResponse`), never a
//!   Rust error: they are produced long after `submit` returned.
//! - Linux only: eventfd, epoll and timerfd through `libc`.

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod http;
pub mod queue;
pub mod sink;
pub mod source;
pub mod sys;
pub mod transport;

pub use channel::TypedMessageSink;
pub use client::HttpClient;
pub use config::{HttpClientConfig, MessageLoopConfig};
pub use connection::ConnectionState;
pub use error::{CoreError, ErrorCode};
pub use event_loop::MessageLoop;
pub use http::{
    DebugEvent, HttpClientCallbacks, HttpClientSimpleCallbacks, HttpMethod, HttpRequest, HttpResponse, MimeContent,
    RestParams,
};
pub use queue::TypedMessageQueue;
pub use sink::{
    AsyncFdOutputSink, CallbackInputSink, CallbackOutputSink, ChainInputSink, InputSink, NullInputSink, OutputSink,
    SinkState, WriterInputSink,
};
pub use source::EventSource;
pub use transport::{Connector, TcpConnector, Transport};
