//! Deferred-work queue integrated with the mainloop.
//!
//! Tasks are ordered by deadline, FIFO among equal deadlines. Posting from
//! any thread writes one byte into a self-pipe so a blocked `select(2)`
//! returns and the reactor can recompute its timeout.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::warn;
use nix::errno::Errno;

use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::{MainloopContext, MainloopProcessor};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so BinaryHeap pops the earliest deadline; seq breaks ties in
    // posting order.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TaskQueue {
    heap: BinaryHeap<DelayedTask>,
    next_seq: u64,
}

/// Multi-producer, single-consumer deferred task queue.
///
/// The consumer is the reactor thread, which drains ready tasks from
/// `process`. All entry points are safe from any thread.
pub struct TaskRunner {
    queue: Mutex<TaskQueue>,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl TaskRunner {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let rval = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rval != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(TaskRunner {
            queue: Mutex::new(TaskQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Enqueues a task for execution on the next reactor iteration.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.push(Instant::now(), Box::new(task));
    }

    /// Enqueues a task to run no earlier than `delay` from now.
    pub fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        self.push(Instant::now() + delay, Box::new(task));
    }

    /// Posts a task and blocks the calling thread until it has run, handing
    /// back its result.
    ///
    /// Returns `Abort` if the runner is destroyed before the task executes,
    /// so callers parked across a reactor teardown do not hang.
    pub fn post_and_wait<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();

        self.post(move || {
            // The receiver may have given up; nothing to do then.
            let _ = sender.send(task());
        });

        receiver
            .recv()
            .map_err(|_| Error::new(ErrorKind::Abort, "task runner destroyed"))
    }

    fn push(&self, deadline: Instant, task: Task) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(DelayedTask {
                deadline,
                seq,
                task,
            });
        }
        self.wake();
    }

    fn wake(&self) {
        let buf = [0u8; 1];
        let rval =
            unsafe { libc::write(self.write_fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if rval == -1 {
            let errno = Errno::last();
            // A full pipe already guarantees a pending wakeup.
            if errno != Errno::EAGAIN {
                warn!("Failed to write to wakeup pipe: {errno}");
            }
        }
    }

    fn drain_pipe(&self) {
        let mut buf = [0u8; 64];
        loop {
            let rval = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if rval <= 0 {
                break;
            }
        }
    }

    pub fn update(&self, context: &mut MainloopContext) {
        context.add_fd_to_read_set(self.read_fd);

        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = queue.heap.peek() {
            let timeout = task
                .deadline
                .saturating_duration_since(Instant::now());
            context.set_timeout_if_earlier(timeout);
        }
    }

    pub fn process(&self, context: &MainloopContext) {
        if context.is_fd_readable(self.read_fd) {
            self.drain_pipe();
        }

        // Pop-then-run without holding the lock, so tasks may post further
        // tasks. A task posted during the drain runs in this pass only if it
        // is already ready.
        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                match queue.heap.peek() {
                    Some(entry) if entry.deadline <= Instant::now() => {
                        queue.heap.pop().map(|entry| entry.task)
                    }
                    _ => None,
                }
            };

            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl MainloopProcessor for std::sync::Arc<TaskRunner> {
    fn update(&mut self, context: &mut MainloopContext) {
        TaskRunner::update(self, context);
    }

    fn process(&mut self, context: &MainloopContext) {
        TaskRunner::process(self, context);
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        // Dropping queued tasks here disconnects any `post_and_wait` callers,
        // delivering their Abort.
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .clear();
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn drive(runner: &TaskRunner, rounds: usize) {
        for _ in 0..rounds {
            let mut context = MainloopContext::new(Duration::from_millis(20));
            runner.update(&mut context);
            std::thread::sleep(context.timeout().min(Duration::from_millis(20)));
            runner.process(&context);
        }
    }

    #[test]
    fn test_posted_task_runs_exactly_once() {
        let runner = TaskRunner::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        runner.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        drive(&runner, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_smaller_delay_runs_earlier() {
        let runner = TaskRunner::new().unwrap();
        let order = Arc::new(Mutex::new(String::new()));

        let o = order.clone();
        runner.post_delayed(Duration::from_millis(10), move || {
            o.lock().unwrap().push('a');
        });
        let o = order.clone();
        runner.post_delayed(Duration::from_millis(9), move || {
            o.lock().unwrap().push('b');
        });
        let o = order.clone();
        runner.post_delayed(Duration::from_millis(10), move || {
            o.lock().unwrap().push('c');
        });

        drive(&runner, 4);
        assert_eq!(order.lock().unwrap().as_str(), "bac");
    }
}
