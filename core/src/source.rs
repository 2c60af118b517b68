//! The contract every pollable unit implements.
//!
//! An event source exposes one descriptor the loop can wait on and a
//! non-blocking processing step. The loop only ever calls `process_one` from
//! one thread at a time per source; implementations rely on that and never
//! block inside it.

use std::os::fd::RawFd;
use std::sync::Arc;

pub trait EventSource: Send + Sync {
    /// Descriptor that becomes readable when `process_one` may make
    /// progress. Must stay the same while the source is registered.
    fn handle(&self) -> RawFd;

    /// Cheap, non-blocking check whether processing would make progress.
    fn has_work(&self) -> bool;

    /// Do at most one unit of work. Returns true if more work is
    /// immediately available.
    fn process_one(&self) -> bool;
}

impl<S: EventSource + ?Sized> EventSource for Arc<S> {
    fn handle(&self) -> RawFd {
        (**self).handle()
    }

    fn has_work(&self) -> bool {
        (**self).has_work()
    }

    fn process_one(&self) -> bool {
        (**self).process_one()
    }
}
