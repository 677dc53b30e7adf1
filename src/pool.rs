//! Bounded worker pool with a FIFO task queue and a completion barrier.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::warn;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    tasks: VecDeque<Task>,
    stop: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    enqueue_cond: Condvar,
    finish_lock: Mutex<()>,
    finish_cond: Condvar,
    /// Pending + running tasks.
    active_tasks: AtomicUsize,
}

/// A fixed pool of worker threads executing caller-provided closures.
///
/// Tasks are dequeued FIFO; completion order is unspecified. The pool
/// offers no per-task handles or cancellation — cooperative cancel is
/// the caller's responsibility (see
/// [`DirWalker::walk_parallel`](crate::walker::DirWalker::walk_parallel)).
/// Dropping the pool stops the workers and joins them; tasks still
/// queued at that point are not run.
pub struct ThreadPool {
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Spawn a pool with `max_count` worker threads.
    pub fn new(max_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                stop: false,
            }),
            enqueue_cond: Condvar::new(),
            finish_lock: Mutex::new(()),
            finish_cond: Condvar::new(),
            active_tasks: AtomicUsize::new(0),
        });

        let workers = (0..max_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self { workers, shared }
    }

    /// Number of worker threads.
    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    /// Append a task to the queue and wake one worker.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.queue.lock().unwrap();
            self.shared.active_tasks.fetch_add(1, Ordering::AcqRel);
            state.tasks.push_back(Box::new(task));
        }
        self.shared.enqueue_cond.notify_one();
    }

    /// Snapshot check: are tasks pending or running right now?
    pub fn is_busy(&self) -> bool {
        self.shared.active_tasks.load(Ordering::Acquire) > 0
    }

    /// Block until every enqueued task has finished.
    pub fn wait_until_finished(&self) {
        let mut guard = self.shared.finish_lock.lock().unwrap();
        while self.shared.active_tasks.load(Ordering::Acquire) > 0 {
            guard = self.shared.finish_cond.wait(guard).unwrap();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.queue.lock().unwrap();
            state.stop = true;
        }
        self.shared.enqueue_cond.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut state = shared.queue.lock().unwrap();
            while !state.stop && state.tasks.is_empty() {
                state = shared.enqueue_cond.wait(state).unwrap();
            }
            if state.stop && state.tasks.is_empty() {
                return;
            }
            state.tasks.pop_front().expect("queue checked non-empty")
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("pool task panicked");
        }

        if shared.active_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last outstanding task: take the finish lock so a waiter
            // between its predicate check and its wait cannot miss us.
            let _guard = shared.finish_lock.lock().unwrap();
            shared.finish_cond.notify_all();
        }
    }
}
