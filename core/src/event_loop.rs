//! Cooperative, descriptor-driven event loop.
//!
//! # Design
//! Sources are registered in an epoll set in one-shot mode: once a source is
//! reported ready it is handed to exactly one worker, which calls
//! `process_one` until the source reports no more work or the fairness bound
//! is reached, and only then re-arms it. A per-source busy lock backs this up
//! for callers driving the loop by hand with `poll_once`, and gives
//! `remove_source` something to wait on so teardown never races an
//! in-progress step.
//!
//! The loop's own epoll descriptor is readable whenever a member is ready,
//! so a `MessageLoop` is itself an [`EventSource`] and loops nest.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::MessageLoopConfig;
use crate::error::CoreError;
use crate::source::EventSource;
use crate::sys::{Epoll, Event, WakeupFd, ONESHOT, READABLE};

const SHUTDOWN_TOKEN: u64 = u64::MAX;
const MAX_EVENTS: usize = 64;

struct SourceEntry {
    name: String,
    fd: RawFd,
    source: Arc<dyn EventSource>,
    busy: Mutex<()>,
    processing_thread: Mutex<Option<ThreadId>>,
}

#[derive(Default)]
struct Registry {
    by_token: HashMap<u64, Arc<SourceEntry>>,
    by_name: HashMap<String, u64>,
    next_token: u64,
}

struct LoopInner {
    config: MessageLoopConfig,
    epoll: Epoll,
    shutdown_fd: WakeupFd,
    shutdown: AtomicBool,
    registry: RwLock<Registry>,
}

pub struct MessageLoop {
    inner: Arc<LoopInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageLoop {
    pub fn new(config: MessageLoopConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let epoll = Epoll::new()?;
        let shutdown_fd = WakeupFd::new()?;
        epoll.add(shutdown_fd.fd(), SHUTDOWN_TOKEN, READABLE)?;
        Ok(Self {
            inner: Arc::new(LoopInner {
                config,
                epoll,
                shutdown_fd,
                shutdown: AtomicBool::new(false),
                registry: RwLock::new(Registry::default()),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Register a source under a unique name. It is polled from the next
    /// iteration on.
    pub fn add_source(&self, name: &str, source: Arc<dyn EventSource>) -> Result<(), CoreError> {
        let mut registry = self.inner.registry.write();
        if registry.by_name.contains_key(name) {
            return Err(CoreError::DuplicateSource(name.to_string()));
        }

        let token = registry.next_token;
        registry.next_token += 1;
        let fd = source.handle();
        self.inner.epoll.add(fd, token, READABLE | ONESHOT)?;

        registry.by_name.insert(name.to_string(), token);
        registry.by_token.insert(
            token,
            Arc::new(SourceEntry {
                name: name.to_string(),
                fd,
                source,
                busy: Mutex::new(()),
                processing_thread: Mutex::new(None),
            }),
        );
        tracing::debug!(source = name, fd, "event source added");
        Ok(())
    }

    /// Detach a source. Blocks until any in-progress `process_one` of that
    /// source has returned, unless called from inside that very step.
    pub fn remove_source(&self, name: &str) -> Result<(), CoreError> {
        let entry = {
            let mut registry = self.inner.registry.write();
            let token = registry
                .by_name
                .remove(name)
                .ok_or_else(|| CoreError::UnknownSource(name.to_string()))?;
            let entry = registry
                .by_token
                .remove(&token)
                .ok_or_else(|| CoreError::UnknownSource(name.to_string()))?;
            // The descriptor may already be closed by its owner.
            let _ = self.inner.epoll.delete(entry.fd);
            entry
        };

        if *entry.processing_thread.lock() == Some(thread::current().id()) {
            tracing::debug!(source = name, "event source removed from its own step");
            return Ok(());
        }
        let _wait = entry.busy.lock();
        tracing::debug!(source = %entry.name, "event source removed");
        Ok(())
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.registry.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn num_sources(&self) -> usize {
        self.inner.registry.read().by_name.len()
    }

    /// Run one iteration on the calling thread. Returns the number of
    /// sources processed.
    pub fn poll_once(&self, timeout: Option<Duration>) -> Result<usize, CoreError> {
        self.inner.poll_once(timeout)
    }

    /// Spawn the configured number of worker threads. Calling it on a
    /// running loop is a no-op.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }
        self.inner.shutdown.store(false, Ordering::Release);
        self.inner.shutdown_fd.try_read();

        for i in 0..self.inner.config.threads {
            let inner = self.inner.clone();
            let handle = thread::Builder::new()
                .name(format!("message-loop-{i}"))
                .spawn(move || inner.run())?;
            workers.push(handle);
        }
        tracing::debug!(threads = workers.len(), "message loop started");
        Ok(())
    }

    /// Stop and join the worker threads. Registered sources stay registered.
    pub fn shutdown(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.shutdown_fd.signal();

        let me = thread::current().id();
        for worker in workers {
            if worker.thread().id() == me {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!("message loop worker panicked");
            }
        }
        tracing::debug!("message loop stopped");
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EventSource for MessageLoop {
    fn handle(&self) -> RawFd {
        self.inner.epoll.fd()
    }

    fn has_work(&self) -> bool {
        self.inner.epoll.is_ready()
    }

    fn process_one(&self) -> bool {
        match self.inner.poll_once(Some(Duration::ZERO)) {
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "nested message loop poll failed");
                false
            }
        }
    }
}

impl LoopInner {
    fn run(&self) {
        let timeout = self.config.poll_timeout();
        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poll_once(Some(timeout)) {
                tracing::error!(error = %e, "message loop wait failed");
                thread::sleep(timeout);
            }
        }
    }

    fn poll_once(&self, timeout: Option<Duration>) -> Result<usize, CoreError> {
        let mut events: Vec<Event> = Vec::with_capacity(MAX_EVENTS);
        self.epoll.wait(&mut events, MAX_EVENTS, timeout)?;

        let mut processed = 0;
        for event in &events {
            if event.token == SHUTDOWN_TOKEN {
                continue;
            }
            let entry = self.registry.read().by_token.get(&event.token).cloned();
            if let Some(entry) = entry {
                self.process_entry(event.token, &entry);
                processed += 1;
            }
        }
        Ok(processed)
    }

    fn process_entry(&self, token: u64, entry: &SourceEntry) {
        let _busy = entry.busy.lock();
        if !self.registry.read().by_token.contains_key(&token) {
            return;
        }

        *entry.processing_thread.lock() = Some(thread::current().id());
        let mut iterations = 0;
        while iterations < self.config.max_iterations {
            iterations += 1;
            if !entry.source.process_one() {
                break;
            }
        }
        *entry.processing_thread.lock() = None;
        tracing::trace!(source = %entry.name, iterations, "event source processed");

        let registry = self.registry.read();
        if registry.by_token.contains_key(&token) {
            if let Err(e) = self.epoll.modify(entry.fd, token, READABLE | ONESHOT) {
                tracing::warn!(source = %entry.name, error = %e, "could not re-arm event source");
            }
        }
    }
}
