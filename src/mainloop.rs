//! The cooperative I/O reactor.
//!
//! A single thread repeatedly builds a [`MainloopContext`] (three fd sets and
//! a shrinking timeout), lets every registered [`MainloopProcessor`] add its
//! descriptors, blocks in `select(2)`, and then gives every processor a
//! chance to perform bounded non-blocking work. Auxiliary threads never touch
//! processors directly; they either post tasks through a
//! [`TaskRunner`](crate::task_runner::TaskRunner) or break the loop through a
//! [`MainloopBreaker`].

use std::cell::RefCell;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, warn};
use nix::errno::Errno;

use crate::task_runner::TaskRunner;

/// One iteration's worth of fd sets and deadline, handed to processors.
pub struct MainloopContext {
    read_set: libc::fd_set,
    write_set: libc::fd_set,
    error_set: libc::fd_set,
    max_fd: RawFd,
    timeout: Duration,
}

impl MainloopContext {
    pub fn new(max_timeout: Duration) -> Self {
        // fd_set has no safe initializer; FD_ZERO over zeroed storage is the
        // canonical setup.
        unsafe {
            let mut read_set = mem::zeroed::<libc::fd_set>();
            let mut write_set = mem::zeroed::<libc::fd_set>();
            let mut error_set = mem::zeroed::<libc::fd_set>();
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_ZERO(&mut error_set);
            MainloopContext {
                read_set,
                write_set,
                error_set,
                max_fd: -1,
                timeout: max_timeout,
            }
        }
    }

    pub fn add_fd_to_read_set(&mut self, fd: RawFd) {
        debug_assert!(fd >= 0);
        unsafe { libc::FD_SET(fd, &mut self.read_set) };
        self.max_fd = self.max_fd.max(fd);
    }

    pub fn add_fd_to_write_set(&mut self, fd: RawFd) {
        debug_assert!(fd >= 0);
        unsafe { libc::FD_SET(fd, &mut self.write_set) };
        self.max_fd = self.max_fd.max(fd);
    }

    pub fn add_fd_to_error_set(&mut self, fd: RawFd) {
        debug_assert!(fd >= 0);
        unsafe { libc::FD_SET(fd, &mut self.error_set) };
        self.max_fd = self.max_fd.max(fd);
    }

    pub fn is_fd_readable(&self, fd: RawFd) -> bool {
        fd >= 0 && unsafe { libc::FD_ISSET(fd, &self.read_set as *const _ as *mut _) }
    }

    pub fn is_fd_writable(&self, fd: RawFd) -> bool {
        fd >= 0 && unsafe { libc::FD_ISSET(fd, &self.write_set as *const _ as *mut _) }
    }

    pub fn has_fd_error(&self, fd: RawFd) -> bool {
        fd >= 0 && unsafe { libc::FD_ISSET(fd, &self.error_set as *const _ as *mut _) }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Clamps the iteration timeout downward; never extends it.
    pub fn set_timeout_if_earlier(&mut self, timeout: Duration) {
        if timeout < self.timeout {
            self.timeout = timeout;
        }
    }
}

/// A participant in the mainloop.
///
/// `update` adds descriptors and clamps the timeout; `process` examines which
/// descriptors fired and performs bounded non-blocking work. Processors must
/// not panic across the reactor boundary: failures are logged and the loop
/// continues.
pub trait MainloopProcessor {
    fn update(&mut self, context: &mut MainloopContext);
    fn process(&mut self, context: &MainloopContext);
}

struct BreakState {
    should_break: AtomicBool,
    // Wakeup slot, populated only while `run` is active. Breaking posts a
    // no-op task so a blocked select() returns immediately.
    wakeup: Mutex<Option<Arc<TaskRunner>>>,
}

/// Thread-safe handle that forces `MainloopManager::run` to return.
///
/// Invoking it before `run` latches: the next `run` exits on its first
/// iteration.
#[derive(Clone)]
pub struct MainloopBreaker {
    state: Arc<BreakState>,
}

impl MainloopBreaker {
    pub fn break_mainloop(&self) {
        self.state.should_break.store(true, Ordering::SeqCst);

        let wakeup = self.state.wakeup.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(runner) = wakeup.as_ref() {
            runner.post(|| {});
        }
    }
}

/// Owns the processor list and drives the select loop.
pub struct MainloopManager {
    processors: Vec<Rc<RefCell<dyn MainloopProcessor>>>,
    break_state: Arc<BreakState>,
}

impl MainloopManager {
    pub fn new() -> Self {
        MainloopManager {
            processors: Vec::new(),
            break_state: Arc::new(BreakState {
                should_break: AtomicBool::new(false),
                wakeup: Mutex::new(None),
            }),
        }
    }

    /// Registers a processor. Each processor may be registered exactly once.
    pub fn add_processor(&mut self, processor: Rc<RefCell<dyn MainloopProcessor>>) {
        debug_assert!(
            !self
                .processors
                .iter()
                .any(|p| Rc::ptr_eq(p, &processor)),
            "mainloop processor registered twice"
        );
        self.processors.push(processor);
    }

    pub fn remove_processor(&mut self, processor: &Rc<RefCell<dyn MainloopProcessor>>) {
        self.processors.retain(|p| !Rc::ptr_eq(p, processor));
    }

    /// Returns a `Send + Clone` handle usable from signal handlers and
    /// auxiliary threads.
    pub fn breaker(&self) -> MainloopBreaker {
        MainloopBreaker {
            state: self.break_state.clone(),
        }
    }

    /// Walks processors in registration order collecting fds and deadlines.
    pub fn update(&mut self, context: &mut MainloopContext) {
        let wakeup = self
            .break_state
            .wakeup
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(runner) = wakeup.as_ref() {
            TaskRunner::update(runner, context);
        }
        drop(wakeup);

        for processor in &self.processors {
            processor.borrow_mut().update(context);
        }
    }

    /// Walks processors in registration order dispatching readiness.
    pub fn process(&mut self, context: &MainloopContext) {
        let wakeup = {
            let slot = self
                .break_state
                .wakeup
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        if let Some(runner) = wakeup.as_ref() {
            TaskRunner::process(runner, context);
        }

        for processor in &self.processors {
            processor.borrow_mut().process(context);
        }
    }

    /// Runs one update/select/process iteration.
    ///
    /// Returns `Ok(true)` if a break was observed (the latch is consumed),
    /// `Ok(false)` otherwise. A select() failure other than `EINTR` is
    /// returned as an error.
    pub fn poll(&mut self, max_timeout: Duration) -> io::Result<bool> {
        if self.consume_break() {
            return Ok(true);
        }

        let mut context = MainloopContext::new(max_timeout);
        self.update(&mut context);

        let mut timeout = to_timeval(context.timeout);
        let rval = unsafe {
            libc::select(
                context.max_fd + 1,
                &mut context.read_set,
                &mut context.write_set,
                &mut context.error_set,
                &mut timeout,
            )
        };

        if rval == -1 {
            let errno = Errno::last();
            if errno != Errno::EINTR {
                error!("select() failed: {errno}");
                return Err(io::Error::from_raw_os_error(errno as i32));
            }
            // Interrupted by a signal; not an error.
            return Ok(self.consume_break());
        }

        if self.consume_break() {
            return Ok(true);
        }

        self.process(&context);
        Ok(false)
    }

    /// Blocks the calling thread in the select loop until
    /// [`MainloopBreaker::break_mainloop`] is invoked or select fails with
    /// something other than a signal interruption.
    pub fn run(&mut self, max_poll_timeout: Duration) -> io::Result<()> {
        {
            let mut wakeup = self
                .break_state
                .wakeup
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if wakeup.is_none() {
                match TaskRunner::new() {
                    Ok(runner) => *wakeup = Some(Arc::new(runner)),
                    Err(err) => {
                        warn!("Failed to create mainloop wakeup task runner: {err}");
                        return Err(err);
                    }
                }
            }
        }

        let result = loop {
            match self.poll(max_poll_timeout) {
                Ok(true) => break Ok(()),
                Ok(false) => continue,
                Err(err) => break Err(err),
            }
        };

        let mut wakeup = self
            .break_state
            .wakeup
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *wakeup = None;

        result
    }

    fn consume_break(&self) -> bool {
        self.break_state.should_break.swap(false, Ordering::SeqCst)
    }
}

impl Default for MainloopManager {
    fn default() -> Self {
        MainloopManager::new()
    }
}

fn to_timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}
