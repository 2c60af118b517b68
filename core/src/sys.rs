//! Thin wrappers over the Linux readiness primitives the runtime is built on:
//! `eventfd` for wakeups, `epoll` for waiting on many descriptors, and
//! `timerfd` for deadlines. All descriptors are non-blocking and close-on-exec
//! and are closed when the wrapper is dropped.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readable interest.
pub const READABLE: u32 = libc::EPOLLIN as u32;
/// Writable interest.
pub const WRITABLE: u32 = libc::EPOLLOUT as u32;
/// Deliver one event, then stay disarmed until `Epoll::modify`.
pub const ONESHOT: u32 = libc::EPOLLONESHOT as u32;

const ERROR_EVENTS: u32 = (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn owned(fd: libc::c_int) -> io::Result<OwnedFd> {
    let fd = cvt(fd)?;
    // SAFETY: the descriptor was just returned by the kernel and nothing else
    // owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Edge-style wakeup signal backed by an `eventfd` counter.
///
/// `signal` increments the counter (making the descriptor readable);
/// `try_read` resets it to zero in a single syscall and reports whether it
/// was raised.
#[derive(Debug)]
pub struct WakeupFd {
    fd: OwnedFd,
}

impl WakeupFd {
    pub fn new() -> io::Result<Self> {
        let fd = owned(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn signal(&self) {
        let val: u64 = 1;
        // The only failure is EAGAIN on counter overflow, at which point the
        // descriptor is readable anyway.
        unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// Clear the signal. Returns true if it was raised.
    pub fn try_read(&self) -> bool {
        let mut val: u64 = 0;
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        n == std::mem::size_of::<u64>() as isize
    }

    /// Non-destructive readiness check.
    pub fn is_raised(&self) -> bool {
        poll_readable(self.fd.as_raw_fd())
    }
}

/// Readiness reported by `Epoll::wait`.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up condition on the descriptor.
    pub error: bool,
}

/// An epoll set. The set's own descriptor is readable whenever one of its
/// members is ready, which is what lets sets nest inside other sets.
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = owned(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn add(&self, fd: RawFd, token: u64, interest: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    pub fn modify(&self, fd: RawFd, token: u64, interest: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        cvt(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut ev) })?;
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: interest,
            u64: token,
        };
        cvt(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut ev) })?;
        Ok(())
    }

    /// Wait for readiness. `None` blocks indefinitely, `Some(ZERO)` polls.
    /// An interrupted wait reports no events.
    pub fn wait(&self, events: &mut Vec<Event>, max: usize, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        let max = max.max(1);
        let mut raw: Vec<libc::epoll_event> = Vec::with_capacity(max);
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                raw.as_mut_ptr(),
                max as libc::c_int,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        // SAFETY: epoll_wait initialised the first `n` entries.
        unsafe { raw.set_len(n as usize) };
        for ev in &raw {
            let bits = ev.events;
            events.push(Event {
                token: ev.u64,
                readable: bits & READABLE != 0,
                writable: bits & WRITABLE != 0,
                error: bits & ERROR_EVENTS != 0,
            });
        }
        Ok(events.len())
    }

    /// True if at least one member is ready.
    pub fn is_ready(&self) -> bool {
        poll_readable(self.fd.as_raw_fd())
    }
}

/// Monotonic one-shot timer descriptor.
#[derive(Debug)]
pub struct TimerFd {
    fd: OwnedFd,
}

impl TimerFd {
    pub fn new() -> io::Result<Self> {
        let fd = owned(unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        })?;
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Arm the timer to fire once after `after`, or disarm it with `None`.
    pub fn set(&self, after: Option<Duration>) -> io::Result<()> {
        let value = match after {
            // A zero it_value disarms, so round up to one nanosecond.
            Some(d) => {
                let d = d.max(Duration::from_nanos(1));
                libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as libc::c_long,
                }
            }
            None => libc::timespec { tv_sec: 0, tv_nsec: 0 },
        };
        let spec = libc::itimerspec {
            it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
            it_value: value,
        };
        cvt(unsafe { libc::timerfd_settime(self.fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) })?;
        Ok(())
    }

    /// Consume expirations so the descriptor stops being readable.
    pub fn drain(&self) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

fn poll_readable(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, 0) };
    n > 0 && pfd.revents & libc::POLLIN != 0
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakeup_signal_is_coalesced_by_one_read() {
        let w = WakeupFd::new().unwrap();
        assert!(!w.try_read());
        w.signal();
        w.signal();
        w.signal();
        assert!(w.is_raised());
        assert!(w.try_read());
        assert!(!w.try_read());
        assert!(!w.is_raised());
    }

    #[test]
    fn epoll_reports_tokens_of_ready_members() {
        let ep = Epoll::new().unwrap();
        let a = WakeupFd::new().unwrap();
        let b = WakeupFd::new().unwrap();
        ep.add(a.fd(), 7, READABLE).unwrap();
        ep.add(b.fd(), 9, READABLE).unwrap();

        let mut events = Vec::new();
        assert_eq!(ep.wait(&mut events, 8, Some(Duration::ZERO)).unwrap(), 0);
        assert!(!ep.is_ready());

        b.signal();
        assert!(ep.is_ready());
        ep.wait(&mut events, 8, Some(Duration::ZERO)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 9);
        assert!(events[0].readable);
    }

    #[test]
    fn oneshot_needs_rearming() {
        let ep = Epoll::new().unwrap();
        let w = WakeupFd::new().unwrap();
        ep.add(w.fd(), 1, READABLE | ONESHOT).unwrap();
        w.signal();

        let mut events = Vec::new();
        assert_eq!(ep.wait(&mut events, 8, Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(ep.wait(&mut events, 8, Some(Duration::ZERO)).unwrap(), 0);
        ep.modify(w.fd(), 1, READABLE | ONESHOT).unwrap();
        assert_eq!(ep.wait(&mut events, 8, Some(Duration::ZERO)).unwrap(), 1);
    }

    #[test]
    fn timer_fires_after_its_delay() {
        let ep = Epoll::new().unwrap();
        let t = TimerFd::new().unwrap();
        ep.add(t.fd(), 3, READABLE).unwrap();
        t.set(Some(Duration::from_millis(20))).unwrap();

        let mut events = Vec::new();
        ep.wait(&mut events, 8, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(events.len(), 1);
        t.drain();
        assert!(!ep.is_ready());

        t.set(Some(Duration::from_millis(20))).unwrap();
        t.set(None).unwrap();
        assert_eq!(ep.wait(&mut events, 8, Some(Duration::from_millis(60))).unwrap(), 0);
    }
}
