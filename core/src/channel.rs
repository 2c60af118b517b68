//! Fixed-capacity typed channel feeding a single consumer loop.
//!
//! Producers on any thread push into a lock-free ring and raise a wakeup
//! descriptor; the loop thread pops one message per `process_one` and hands
//! it to the registered handler. Capacity is fixed at construction so a slow
//! consumer pushes back on producers instead of growing memory.

use std::fmt;
use std::os::fd::RawFd;

use crossbeam_queue::ArrayQueue;

use crate::error::CoreError;
use crate::source::EventSource;
use crate::sys::WakeupFd;

type OnEvent<M> = Box<dyn Fn(M) + Send + Sync>;

/// Single-reader, multi-writer bounded channel.
pub struct TypedMessageSink<M> {
    buf: ArrayQueue<M>,
    wakeup: WakeupFd,
    on_event: OnEvent<M>,
}

impl<M: Send> TypedMessageSink<M> {
    pub fn new<F>(capacity: usize, on_event: F) -> Result<Self, CoreError>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(CoreError::InvalidCapacity);
        }
        Ok(Self {
            buf: ArrayQueue::new(capacity),
            wakeup: WakeupFd::new()?,
            on_event: Box::new(on_event),
        })
    }

    /// Enqueue a message, failing immediately if the ring is full.
    pub fn push(&self, message: M) -> Result<(), CoreError> {
        if self.try_push(message) {
            Ok(())
        } else {
            Err(CoreError::CapacityExceeded {
                capacity: self.buf.capacity(),
            })
        }
    }

    /// Enqueue a message. Returns false if the ring is full.
    pub fn try_push(&self, message: M) -> bool {
        match self.buf.push(message) {
            Ok(()) => {
                self.wakeup.signal();
                true
            }
            Err(_) => false,
        }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl<M: Send> EventSource for TypedMessageSink<M> {
    fn handle(&self) -> RawFd {
        self.wakeup.fd()
    }

    fn has_work(&self) -> bool {
        !self.buf.is_empty()
    }

    fn process_one(&self) -> bool {
        let Some(message) = self.buf.pop() else {
            // Signal left over from a message an earlier step already took.
            return self.settle();
        };
        (self.on_event)(message);

        if !self.buf.is_empty() {
            return true;
        }
        self.settle()
    }
}

impl<M> TypedMessageSink<M> {
    /// Clear the wakeup once the ring looks empty. A producer may push
    /// between that check and the clear, and its signal is then eaten by
    /// `try_read`, so check again and put the signal back.
    fn settle(&self) -> bool {
        self.wakeup.try_read();
        if self.buf.is_empty() {
            false
        } else {
            self.wakeup.signal();
            true
        }
    }
}

impl<M> fmt::Debug for TypedMessageSink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedMessageSink")
            .field("size", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}
