//! Optionally bounded, multi-producer message queue with coalesced wakeups.
//!
//! # Design
//! Unlike [`TypedMessageSink`](crate::channel::TypedMessageSink) the queue
//! does not hand messages to a handler one at a time. `process_one` invokes a
//! notification once and the receiver pulls as many messages as it can use
//! with [`pop_front`](TypedMessageQueue::pop_front). A `pending` flag kept
//! under the queue lock makes sure the wakeup is raised once per non-empty
//! period, however many pushes happen, and only lowered when processing finds
//! the queue empty.
//!
//! The lock is held for the push/pop itself and never across the
//! notification, so a notification handler may push into the same queue.

use std::collections::VecDeque;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::source::EventSource;
use crate::sys::WakeupFd;

type OnNotify = Box<dyn Fn() + Send + Sync>;

struct QueueState<M> {
    queue: VecDeque<M>,
    /// The wakeup has been raised and not yet acknowledged by an empty
    /// queue.
    pending: bool,
}

pub struct TypedMessageQueue<M> {
    state: Mutex<QueueState<M>>,
    max_messages: AtomicUsize,
    wakeup: WakeupFd,
    on_notify: Option<OnNotify>,
}

impl<M: Send> TypedMessageQueue<M> {
    /// Queue without a notification handler; `max_messages == 0` means
    /// unbounded.
    pub fn new(max_messages: usize) -> Result<Self, CoreError> {
        Ok(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                pending: false,
            }),
            max_messages: AtomicUsize::new(max_messages),
            wakeup: WakeupFd::new()?,
            on_notify: None,
        })
    }

    /// Queue whose `process_one` calls `on_notify` while messages are
    /// available. The handler is responsible for draining with `pop_front`.
    pub fn with_notify<F>(max_messages: usize, on_notify: F) -> Result<Self, CoreError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut queue = Self::new(max_messages)?;
        queue.on_notify = Some(Box::new(on_notify));
        Ok(queue)
    }

    /// Change the bound for subsequent pushes. Messages already queued are
    /// kept even if they exceed the new bound.
    pub fn set_max_messages(&self, count: usize) {
        self.max_messages.store(count, Ordering::Release);
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages.load(Ordering::Acquire)
    }

    /// Append a message. Returns false if the queue is bounded and full.
    pub fn push_back(&self, message: M) -> bool {
        let max = self.max_messages();
        let mut state = self.state.lock();
        if max > 0 && state.queue.len() >= max {
            return false;
        }

        state.queue.push_back(message);
        if !state.pending {
            state.pending = true;
            self.wakeup.signal();
        }
        true
    }

    /// Remove up to `number` of the oldest messages, or all of them when
    /// `number` is 0.
    pub fn pop_front(&self, number: usize) -> Vec<M> {
        let mut state = self.state.lock();
        let available = state.queue.len();
        let number = if number == 0 || number > available {
            available
        } else {
            number
        };
        state.queue.drain(..number).collect()
    }

    pub fn size(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// One processing step with a caller-supplied notification: drain the
    /// wakeup, notify, then lower `pending` if the queue is empty or raise
    /// the wakeup again if it is not.
    pub fn process_with<F: FnOnce()>(&self, notify: F) -> bool {
        while self.wakeup.try_read() {}
        notify();

        // Pushes racing with the notification either land before this lock
        // (queue non-empty, signal restored here) or after it (pending is
        // already false, so the push raises the signal itself).
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            state.pending = false;
        } else {
            self.wakeup.signal();
        }
        false
    }

    fn notify(&self) {
        if let Some(on_notify) = &self.on_notify {
            on_notify();
        }
    }
}

impl<M: Send> EventSource for TypedMessageQueue<M> {
    fn handle(&self) -> RawFd {
        self.wakeup.fd()
    }

    fn has_work(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    /// Always reports no further work: the wakeup count is decoupled from
    /// the message count, the notification handler does the draining.
    fn process_one(&self) -> bool {
        self.process_with(|| self.notify())
    }
}

impl<M> fmt::Debug for TypedMessageQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TypedMessageQueue")
            .field("size", &state.queue.len())
            .field("pending", &state.pending)
            .field("max_messages", &self.max_messages.load(Ordering::Relaxed))
            .finish()
    }
}
