//! Task executors the runtime schedules its work on.
//!
//! The driver, producer reads, and downstream callbacks all run as short
//! tasks submitted here. An executor must be stack-safe: submitting from
//! inside a running task enqueues rather than recursing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

/// A unit of work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs submitted tasks, eventually and in any order.
pub trait Executor: Send + Sync {
    /// Schedule `task`. Must not grow the native stack when called from
    /// inside a running task.
    fn submit(&self, task: Task);
}

/// A deterministic inline executor: the first submitter on an idle
/// executor drains the queue on its own thread, and tasks submitted
/// while draining are appended rather than run recursively.
///
/// Useful for tests and single-threaded pipelines, and the reason the
/// crate needs no runtime of its own to be exercised.
#[derive(Default)]
pub struct Trampoline {
    inner: Mutex<TrampolineQueue>,
}

#[derive(Default)]
struct TrampolineQueue {
    tasks: VecDeque<Task>,
    running: bool,
}

impl Trampoline {
    /// Create an idle trampoline.
    pub fn new() -> Trampoline {
        Trampoline::default()
    }
}

impl Executor for Trampoline {
    fn submit(&self, task: Task) {
        {
            let mut queue = self.inner.lock();
            queue.tasks.push_back(task);
            if queue.running {
                return;
            }
            queue.running = true;
        }
        loop {
            let task = {
                let mut queue = self.inner.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.running = false;
                        return;
                    }
                }
            };
            task();
        }
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("queued", &self.inner.lock().tasks.len())
            .finish()
    }
}

struct PoolShared {
    queue: Mutex<VecDeque<Task>>,
    ready: Condvar,
    shutdown: AtomicBool,
}

/// A fixed-size pool of worker threads. Dropping the pool drains the
/// queue and joins the workers.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with `workers` threads.
    pub fn new(workers: usize) -> ThreadPool {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let workers = (0..workers)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || worker_loop(shared))
            })
            .collect();
        ThreadPool { shared, workers }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.ready.wait(&mut queue);
            }
        };
        task();
    }
}

impl Executor for ThreadPool {
    fn submit(&self, task: Task) {
        self.shared.queue.lock().push_back(task);
        self.shared.ready.notify_one();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.ready.notify_all();
        // the last handle may be dropped from inside a worker task
        let me = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn trampoline_runs_nested_submissions_iteratively() {
        let exec = Arc::new(Trampoline::new());
        let count = Arc::new(AtomicUsize::new(0));

        fn submit_chain(exec: Arc<Trampoline>, count: Arc<AtomicUsize>, depth: usize) {
            if depth == 0 {
                return;
            }
            let exec2 = exec.clone();
            let count2 = count.clone();
            exec.submit(Box::new(move || {
                count2.fetch_add(1, Ordering::SeqCst);
                submit_chain(exec2.clone(), count2.clone(), depth - 1);
            }));
        }

        // deep enough to overflow the stack if submission recursed
        submit_chain(exec, count.clone(), 100_000);
        assert_eq!(count.load(Ordering::SeqCst), 100_000);
    }

    #[test]
    fn thread_pool_runs_all_tasks_before_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(4);
            for _ in 0..64 {
                let count = count.clone();
                pool.submit(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 64);
    }
}
