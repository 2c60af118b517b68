//! Byte sinks: endpoints a component writes its output to, or receives
//! someone else's output through.
//!
//! Output sinks accept data and have a close lifecycle (`Open`, then
//! `Closing` while the close handler runs, then `Closed`) that other threads
//! can block on with `wait_state`. [`AsyncFdOutputSink`] is the non-blocking
//! one: it buffers writes and flushes them to a descriptor from
//! `process_one`, so it is registered with a [`MessageLoop`](crate::MessageLoop)
//! like any other source.
//!
//! Input sinks are the receiving side: notified of each piece of data and of
//! the end of the stream.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::CoreError;
use crate::source::EventSource;
use crate::sys::{Epoll, Event, WakeupFd, READABLE, WRITABLE};

type OnClose = Box<dyn Fn() + Send + Sync>;
type OnHangup = Box<dyn Fn() + Send + Sync>;
type OnData = Box<dyn Fn(Vec<u8>) -> bool + Send + Sync>;
type OnReceived = Box<dyn Fn(Vec<u8>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Closing,
    Closed,
}

pub trait OutputSink: Send + Sync {
    /// Hand data to the sink. Returns false if it was not accepted.
    fn write(&self, data: Vec<u8>) -> bool;

    /// Ask the sink to close once it is done with what it accepted.
    fn request_close(&self);

    fn state(&self) -> SinkState;

    /// Block until the sink reaches `expected`.
    fn wait_state(&self, expected: SinkState);
}

/// Close lifecycle shared by the output sinks.
struct Lifecycle {
    state: Mutex<SinkState>,
    changed: Condvar,
    on_close: Option<OnClose>,
}

impl Lifecycle {
    fn new(on_close: Option<OnClose>) -> Self {
        Self {
            state: Mutex::new(SinkState::Open),
            changed: Condvar::new(),
            on_close,
        }
    }

    fn get(&self) -> SinkState {
        *self.state.lock()
    }

    fn set(&self, state: SinkState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }

    /// Run the close handler once, publishing `Closing` then `Closed`.
    fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != SinkState::Open {
                return;
            }
            *state = SinkState::Closing;
        }
        self.changed.notify_all();
        if let Some(on_close) = &self.on_close {
            on_close();
        }
        self.set(SinkState::Closed);
    }

    fn wait(&self, expected: SinkState) {
        let mut state = self.state.lock();
        while *state != expected {
            self.changed.wait(&mut state);
        }
    }
}

/// Output sink forwarding every write to a closure.
pub struct CallbackOutputSink {
    on_data: OnData,
    lifecycle: Lifecycle,
}

impl CallbackOutputSink {
    pub fn new<F>(on_data: F) -> Self
    where
        F: Fn(Vec<u8>) -> bool + Send + Sync + 'static,
    {
        Self {
            on_data: Box::new(on_data),
            lifecycle: Lifecycle::new(None),
        }
    }

    pub fn with_close<F>(on_data: F, on_close: impl Fn() + Send + Sync + 'static) -> Self
    where
        F: Fn(Vec<u8>) -> bool + Send + Sync + 'static,
    {
        Self {
            on_data: Box::new(on_data),
            lifecycle: Lifecycle::new(Some(Box::new(on_close))),
        }
    }
}

impl OutputSink for CallbackOutputSink {
    fn write(&self, data: Vec<u8>) -> bool {
        self.lifecycle.get() == SinkState::Open && (self.on_data)(data)
    }

    fn request_close(&self) {
        self.lifecycle.close();
    }

    fn state(&self) -> SinkState {
        self.lifecycle.get()
    }

    fn wait_state(&self, expected: SinkState) {
        self.lifecycle.wait(expected);
    }
}

impl fmt::Debug for CallbackOutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOutputSink")
            .field("state", &self.lifecycle.get())
            .finish()
    }
}

const WAKEUP_TOKEN: u64 = 0;
const OUTPUT_TOKEN: u64 = 1;

struct WriterState {
    output: Option<File>,
    pending: VecDeque<Vec<u8>>,
    /// Bytes of the front message already written.
    offset: usize,
    close_requested: bool,
    interest: u32,
}

/// Flushes buffered writes to a non-blocking descriptor from the loop.
///
/// `write` may be called from any thread; data goes out in order. A peer
/// that goes away (broken pipe, reset) triggers the hang-up handler and
/// closes the sink. A requested close takes effect once the buffer is empty.
pub struct AsyncFdOutputSink {
    state: Mutex<WriterState>,
    max_messages: usize,
    epoll: Epoll,
    wakeup: WakeupFd,
    on_hangup: Option<OnHangup>,
    lifecycle: Lifecycle,
}

impl AsyncFdOutputSink {
    /// Sink writing to `output`, buffering at most `max_messages` writes
    /// (0 for no bound). The descriptor is switched to non-blocking mode.
    pub fn new(output: OwnedFd, max_messages: usize) -> Result<Self, CoreError> {
        set_nonblocking(output.as_raw_fd())?;
        let epoll = Epoll::new()?;
        let wakeup = WakeupFd::new()?;
        epoll.add(wakeup.fd(), WAKEUP_TOKEN, READABLE)?;
        // Errors and hang-ups are reported even without interest.
        epoll.add(output.as_raw_fd(), OUTPUT_TOKEN, 0)?;

        Ok(Self {
            state: Mutex::new(WriterState {
                output: Some(File::from(output)),
                pending: VecDeque::new(),
                offset: 0,
                close_requested: false,
                interest: 0,
            }),
            max_messages,
            epoll,
            wakeup,
            on_hangup: None,
            lifecycle: Lifecycle::new(None),
        })
    }

    pub fn on_hangup(mut self, on_hangup: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_hangup = Some(Box::new(on_hangup));
        self
    }

    pub fn on_close(mut self, on_close: impl Fn() + Send + Sync + 'static) -> Self {
        self.lifecycle.on_close = Some(Box::new(on_close));
        self
    }

    /// Writes accepted but not yet fully flushed.
    pub fn buffered(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Write out as much as the descriptor takes. Returns true if the peer
    /// went away.
    fn flush(state: &mut WriterState) -> bool {
        let WriterState {
            output, pending, offset, ..
        } = state;
        let Some(file) = output.as_mut() else {
            return false;
        };
        while let Some(front) = pending.front() {
            match file.write(&front[*offset..]) {
                Ok(0) => return true,
                Ok(n) => {
                    *offset += n;
                    if *offset == front.len() {
                        pending.pop_front();
                        *offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "output peer went away");
                    return true;
                }
            }
        }
        false
    }

    fn release(&self, state: &mut WriterState) {
        if let Some(file) = state.output.take() {
            // Gone with the descriptor anyway.
            let _ = self.epoll.delete(file.as_raw_fd());
        }
        state.pending.clear();
        state.offset = 0;
    }
}

impl OutputSink for AsyncFdOutputSink {
    fn write(&self, data: Vec<u8>) -> bool {
        if self.lifecycle.get() != SinkState::Open {
            return false;
        }
        let mut state = self.state.lock();
        if state.output.is_none() || state.close_requested {
            return false;
        }
        if self.max_messages > 0 && state.pending.len() >= self.max_messages {
            return false;
        }
        if data.is_empty() {
            return true;
        }
        state.pending.push_back(data);
        self.wakeup.signal();
        true
    }

    fn request_close(&self) {
        self.state.lock().close_requested = true;
        self.wakeup.signal();
    }

    fn state(&self) -> SinkState {
        self.lifecycle.get()
    }

    fn wait_state(&self, expected: SinkState) {
        self.lifecycle.wait(expected);
    }
}

impl EventSource for AsyncFdOutputSink {
    fn handle(&self) -> RawFd {
        self.epoll.fd()
    }

    fn has_work(&self) -> bool {
        self.epoll.is_ready()
    }

    fn process_one(&self) -> bool {
        let mut events: Vec<Event> = Vec::with_capacity(2);
        if let Err(e) = self.epoll.wait(&mut events, 2, Some(Duration::ZERO)) {
            tracing::warn!(error = %e, "output sink epoll wait failed");
        }
        self.wakeup.try_read();
        let peer_error = events.iter().any(|e| e.token == OUTPUT_TOKEN && e.error);

        let mut state = self.state.lock();
        let hung_up = peer_error || Self::flush(&mut state);
        let closing = !hung_up && state.close_requested && state.pending.is_empty() && state.output.is_some();
        if hung_up || closing {
            self.release(&mut state);
        } else if let Some(file) = &state.output {
            let interest = if state.pending.is_empty() { 0 } else { WRITABLE };
            if interest != state.interest {
                match self.epoll.modify(file.as_raw_fd(), OUTPUT_TOKEN, interest) {
                    Ok(()) => state.interest = interest,
                    Err(e) => tracing::error!(error = %e, "failed to update output interest"),
                }
            }
        }
        drop(state);

        if hung_up {
            if let Some(on_hangup) = &self.on_hangup {
                on_hangup();
            }
        }
        if hung_up || closing {
            self.lifecycle.close();
        }
        false
    }
}

impl fmt::Debug for AsyncFdOutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AsyncFdOutputSink")
            .field("state", &self.lifecycle.get())
            .field("buffered", &state.pending.len())
            .field("close_requested", &state.close_requested)
            .finish()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub trait InputSink: Send + Sync {
    fn notify_received(&self, data: Vec<u8>);

    fn notify_closed(&self);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInputSink;

impl InputSink for NullInputSink {
    fn notify_received(&self, _data: Vec<u8>) {}

    fn notify_closed(&self) {}
}

pub struct CallbackInputSink {
    on_data: OnReceived,
    on_close: Option<OnClose>,
}

impl CallbackInputSink {
    pub fn new(on_data: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        Self {
            on_data: Box::new(on_data),
            on_close: None,
        }
    }

    pub fn on_close(mut self, on_close: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }
}

impl InputSink for CallbackInputSink {
    fn notify_received(&self, data: Vec<u8>) {
        (self.on_data)(data)
    }

    fn notify_closed(&self) {
        if let Some(on_close) = &self.on_close {
            on_close();
        }
    }
}

impl fmt::Debug for CallbackInputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInputSink")
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// Copies received data into any `io::Write`.
#[derive(Debug)]
pub struct WriterInputSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterInputSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn writer(&self) -> MutexGuard<'_, W> {
        self.writer.lock()
    }
}

impl<W: Write + Send> InputSink for WriterInputSink<W> {
    fn notify_received(&self, data: Vec<u8>) {
        if let Err(e) = self.writer.lock().write_all(&data) {
            tracing::warn!(error = %e, "input sink write failed");
        }
    }

    fn notify_closed(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!(error = %e, "input sink flush failed");
        }
    }
}

/// Fans every notification out to a list of sinks, in order.
#[derive(Default)]
pub struct ChainInputSink {
    sinks: Mutex<Vec<Arc<dyn InputSink>>>,
}

impl ChainInputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_sink(&self, sink: Arc<dyn InputSink>) {
        self.sinks.lock().push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn InputSink>> {
        self.sinks.lock().clone()
    }
}

impl InputSink for ChainInputSink {
    fn notify_received(&self, data: Vec<u8>) {
        for sink in self.snapshot() {
            sink.notify_received(data.clone());
        }
    }

    fn notify_closed(&self) {
        for sink in self.snapshot() {
            sink.notify_closed();
        }
    }
}

impl fmt::Debug for ChainInputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainInputSink").field("sinks", &self.len()).finish()
    }
}
