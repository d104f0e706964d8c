//! A single long-lived thread that GPU work can be funneled through.
//!
//! Callers either hand a task to the direct slot and wait for it
//! ([`invoke_and_wait`](WorkerThread::invoke_and_wait)) or append it to the
//! FIFO queue ([`invoke_later`](WorkerThread::invoke_later)). Each pass of
//! the loop runs the direct task first, then drains the queue. Panics in
//! queued tasks are logged and swallowed; a panic in a direct task is handed
//! back to the waiting caller as [`WorkerError::TaskPanicked`].
//!
//! The loop wakes up every poll interval even when idle. If a context is
//! current on the worker and another thread is parked on its lock, the worker
//! releases it.

use crate::error::{panic_message, WorkerError};
use common::GlConfig;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// A unit of work for the worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: Lazy<Arc<WorkerThread>> = Lazy::new(|| {
    let config = GlConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "ignoring malformed environment configuration");
        GlConfig::default()
    });
    Arc::new(WorkerThread::new(Duration::from_millis(config.worker_poll_interval_ms)))
});

#[derive(Default)]
struct WorkerState {
    starting: bool,
    running: bool,
    shutdown: bool,
    thread: Option<ThreadId>,
    handle: Option<JoinHandle<()>>,
    /// Pending direct task and its ticket.
    direct: Option<(u64, Task)>,
    next_ticket: u64,
    /// Ticket of the last direct task that finished.
    completed: u64,
    queue: VecDeque<Task>,
}

struct Shared {
    state: Mutex<WorkerState>,
    /// Wakes the worker.
    work: Condvar,
    /// Wakes callers waiting for start, stop or a direct task.
    progress: Condvar,
    poll_interval: Duration,
}

/// The worker thread handle. Cheap to share; all state lives behind an `Arc`.
pub struct WorkerThread {
    shared: Arc<Shared>,
}

impl WorkerThread {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::default()),
                work: Condvar::new(),
                progress: Condvar::new(),
                poll_interval,
            }),
        }
    }

    /// The process-wide worker, polling at the configured interval.
    pub fn global() -> Arc<WorkerThread> {
        GLOBAL.clone()
    }

    /// Spawn the worker if needed and wait until it runs.
    ///
    /// Only the first caller spawns; concurrent callers wait for it.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut state = self.shared.state.lock();
        if state.running {
            return Ok(());
        }
        if !state.starting {
            state.starting = true;
            state.shutdown = false;
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name("glcore-worker".to_string())
                .spawn(move || shared.run());
            match spawned {
                Ok(handle) => state.handle = Some(handle),
                Err(err) => {
                    state.starting = false;
                    return Err(WorkerError::Spawn(err.to_string()));
                }
            }
        }
        while !state.running {
            self.shared.progress.wait(&mut state);
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn is_worker_thread(&self) -> bool {
        self.shared.state.lock().thread == Some(thread::current().id())
    }

    /// Run `task` on the worker and wait for its result.
    ///
    /// Must not be called from the worker itself.
    pub fn invoke_and_wait<F, R>(&self, task: F) -> Result<R, WorkerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot: Arc<Mutex<Option<thread::Result<R>>>> = Arc::new(Mutex::new(None));
        let output = slot.clone();
        let wrapped: Task = Box::new(move || {
            *output.lock() = Some(panic::catch_unwind(AssertUnwindSafe(task)));
        });

        let mut state = self.shared.state.lock();
        if state.thread == Some(thread::current().id()) {
            return Err(WorkerError::OnWorkerThread);
        }
        while state.running && !state.shutdown && state.direct.is_some() {
            self.shared.progress.wait(&mut state);
        }
        if !state.running || state.shutdown {
            return Err(WorkerError::NotRunning);
        }
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.direct = Some((ticket, wrapped));
        self.shared.work.notify_one();
        while state.completed < ticket && state.running {
            self.shared.progress.wait(&mut state);
        }
        drop(state);

        let result = slot.lock().take();
        match result {
            Some(Ok(value)) => Ok(value),
            Some(Err(payload)) => Err(WorkerError::TaskPanicked(panic_message(payload.as_ref()))),
            None => Err(WorkerError::NotRunning),
        }
    }

    /// Queue `task` without waiting.
    pub fn invoke_later<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.running || state.shutdown {
            return Err(WorkerError::NotRunning);
        }
        state.queue.push_back(Box::new(task));
        self.shared.work.notify_one();
        Ok(())
    }

    /// Number of queued tasks not yet picked up.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Finish pending work, stop the worker and join it.
    pub fn stop(&self) -> Result<(), WorkerError> {
        let handle = {
            let mut state = self.shared.state.lock();
            if state.thread == Some(thread::current().id()) {
                return Err(WorkerError::OnWorkerThread);
            }
            if !state.running {
                return Ok(());
            }
            state.shutdown = true;
            self.shared.work.notify_one();
            while state.running {
                self.shared.progress.wait(&mut state);
            }
            state.handle.take()
        };
        if let Some(handle) = handle {
            handle.join().map_err(|payload| WorkerError::TaskPanicked(panic_message(payload.as_ref())))?;
        }
        tracing::debug!("worker thread stopped");
        Ok(())
    }
}

impl Default for WorkerThread {
    fn default() -> Self {
        Self::new(Duration::from_millis(GlConfig::default().worker_poll_interval_ms))
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "worker thread not stopped cleanly");
        }
    }
}

impl Shared {
    fn run(&self) {
        {
            let mut state = self.state.lock();
            state.running = true;
            state.starting = false;
            state.thread = Some(thread::current().id());
            self.progress.notify_all();
        }
        tracing::debug!(poll_ms = self.poll_interval.as_millis() as u64, "worker thread running");

        loop {
            let (direct, queued, shutdown) = {
                let mut state = self.state.lock();
                while state.direct.is_none() && state.queue.is_empty() && !state.shutdown {
                    if self.work.wait_for(&mut state, self.poll_interval).timed_out() {
                        break;
                    }
                }
                let queued: Vec<Task> = state.queue.drain(..).collect();
                (state.direct.take(), queued, state.shutdown)
            };

            if let Some((ticket, task)) = direct {
                task();
                let mut state = self.state.lock();
                state.completed = ticket;
                self.progress.notify_all();
            }
            for task in queued {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    tracing::error!(panic = %panic_message(payload.as_ref()), "queued worker task panicked");
                }
            }
            match glcontext::release_if_contended() {
                Ok(true) => tracing::debug!("worker released a contended context"),
                Ok(false) => {}
                Err(err) => tracing::warn!(error = %err, "worker could not release its context"),
            }

            if shutdown {
                let state = self.state.lock();
                if state.direct.is_none() && state.queue.is_empty() {
                    break;
                }
            }
        }

        let mut state = self.state.lock();
        state.running = false;
        state.thread = None;
        self.progress.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glcontext::{Context, ContextRegistry, ContextRequest, HeadlessDriver, MakeCurrent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn worker() -> WorkerThread {
        let worker = WorkerThread::new(Duration::from_millis(5));
        worker.start().unwrap();
        worker
    }

    #[test]
    fn test_start_is_idempotent() {
        let worker = Arc::new(WorkerThread::new(Duration::from_millis(5)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = worker.clone();
                thread::spawn(move || worker.start().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(worker.is_started());
        assert!(!worker.is_worker_thread());
        worker.stop().unwrap();
        assert!(!worker.is_started());
    }

    #[test]
    fn test_invoke_and_wait_returns_value() {
        let worker = worker();
        let on_worker = worker.invoke_and_wait(|| thread::current().name().map(str::to_string)).unwrap();
        assert_eq!(on_worker.as_deref(), Some("glcore-worker"));
        assert_eq!(worker.invoke_and_wait(|| 6 * 7).unwrap(), 42);
        worker.stop().unwrap();
    }

    #[test]
    fn test_task_panic_is_wrapped() {
        let worker = worker();
        let err = worker.invoke_and_wait(|| -> u32 { panic!("boom") }).unwrap_err();
        assert_eq!(err, WorkerError::TaskPanicked("boom".to_string()));
        assert_eq!(worker.invoke_and_wait(|| 1).unwrap(), 1);
        worker.stop().unwrap();
    }

    #[test]
    fn test_queue_is_fifo_and_survives_panics() {
        let worker = worker();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            worker
                .invoke_later(move || {
                    if i == 2 {
                        panic!("queued task failure");
                    }
                    tx.send(i).unwrap();
                })
                .unwrap();
        }
        worker.invoke_and_wait(|| ()).unwrap();
        worker.stop().unwrap();
        drop(tx);
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_stop_drains_queue() {
        let worker = worker();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = ran.clone();
            worker.invoke_later(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        worker.stop().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(worker.invoke_later(|| ()), Err(WorkerError::NotRunning));
        assert_eq!(worker.invoke_and_wait(|| ()), Err(WorkerError::NotRunning));
    }

    #[test]
    fn test_restart_after_stop() {
        let worker = worker();
        worker.stop().unwrap();
        worker.start().unwrap();
        assert_eq!(worker.invoke_and_wait(|| 3).unwrap(), 3);
        worker.stop().unwrap();
    }

    #[test]
    fn test_reentrant_invoke_is_rejected() {
        let worker = Arc::new(worker());
        let inner = worker.clone();
        let result = worker.invoke_and_wait(move || inner.invoke_and_wait(|| ())).unwrap();
        assert_eq!(result, Err(WorkerError::OnWorkerThread));
        let inner = worker.clone();
        assert!(worker.invoke_and_wait(move || inner.is_worker_thread()).unwrap());
        worker.stop().unwrap();
    }

    #[test]
    fn test_worker_releases_contended_context() {
        let worker = worker();
        let registry = Arc::new(ContextRegistry::new(&GlConfig::default().with_fail_fast(false)));
        let context = Context::new(registry, Arc::new(HeadlessDriver::default()), "headless:0", ContextRequest::default());

        let on_worker = context.clone();
        let created = worker.invoke_and_wait(move || on_worker.make_current()).unwrap().unwrap();
        assert_eq!(created, MakeCurrent::CurrentNew);
        assert!(context.is_locked());

        let waiter = context.clone();
        let outcome = thread::spawn(move || {
            let outcome = waiter.make_current();
            waiter.release().unwrap();
            outcome
        })
        .join()
        .unwrap()
        .unwrap();
        assert_eq!(outcome, MakeCurrent::Current);
        worker.stop().unwrap();
    }
}
