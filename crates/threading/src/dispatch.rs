//! Routing of GPU work according to the threading configuration.
//!
//! In multi-threaded mode work runs on the calling thread. In single-threaded
//! mode it is funneled either to the dedicated [`WorkerThread`] or to the
//! windowing toolkit's own thread through a registered [`ToolkitExecutor`].

use crate::error::{panic_message, WorkerError};
use crate::worker::{Task, WorkerThread};
use common::{GlConfig, ThreadingConfig, ThreadingStrategy};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// The windowing toolkit's event thread, as seen by the core.
pub trait ToolkitExecutor: Send + Sync {
    fn is_toolkit_thread(&self) -> bool;

    /// Run `task` on the toolkit thread and return once it has run.
    fn run_and_wait(&self, task: Task);
}

pub struct Threading {
    config: ThreadingConfig,
    worker: Arc<WorkerThread>,
    toolkit: RwLock<Option<Arc<dyn ToolkitExecutor>>>,
}

impl Threading {
    pub fn new(config: ThreadingConfig, worker: Arc<WorkerThread>) -> Self {
        Self {
            config,
            worker,
            toolkit: RwLock::new(None),
        }
    }

    /// Dispatch per `config`, using the process-wide worker.
    pub fn from_config(config: &GlConfig) -> Self {
        Self::new(config.threading.clone(), WorkerThread::global())
    }

    pub fn config(&self) -> &ThreadingConfig {
        &self.config
    }

    pub fn is_single_threaded(&self) -> bool {
        self.config.single_threaded
    }

    pub fn worker(&self) -> &Arc<WorkerThread> {
        &self.worker
    }

    pub fn set_toolkit_executor(&self, executor: Arc<dyn ToolkitExecutor>) {
        *self.toolkit.write() = Some(executor);
    }

    /// Whether GPU work may run on the calling thread right now.
    pub fn is_gl_thread(&self) -> bool {
        if !self.config.single_threaded {
            return true;
        }
        match self.config.strategy {
            ThreadingStrategy::Worker => self.worker.is_worker_thread(),
            ThreadingStrategy::Toolkit => self
                .toolkit
                .read()
                .as_ref()
                .is_some_and(|toolkit| toolkit.is_toolkit_thread()),
        }
    }

    /// Run `task` where GPU work belongs and wait for its result.
    pub fn invoke_on_gl_thread<F, R>(&self, task: F) -> Result<R, WorkerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_gl_thread() {
            return Ok(task());
        }
        match self.config.strategy {
            ThreadingStrategy::Worker => {
                self.worker.start()?;
                self.worker.invoke_and_wait(task)
            }
            ThreadingStrategy::Toolkit => {
                let toolkit = self.toolkit.read().clone().ok_or(WorkerError::NoToolkit)?;
                let slot: Arc<Mutex<Option<thread::Result<R>>>> = Arc::new(Mutex::new(None));
                let output = slot.clone();
                toolkit.run_and_wait(Box::new(move || {
                    *output.lock() = Some(panic::catch_unwind(AssertUnwindSafe(task)));
                }));
                let result = slot.lock().take();
                match result {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(payload)) => Err(WorkerError::TaskPanicked(panic_message(payload.as_ref()))),
                    None => {
                        tracing::warn!("toolkit executor returned without running the task");
                        Err(WorkerError::NotRunning)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingToolkit {
        runs: AtomicUsize,
    }

    impl ToolkitExecutor for CountingToolkit {
        fn is_toolkit_thread(&self) -> bool {
            false
        }

        fn run_and_wait(&self, task: Task) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            task();
        }
    }

    fn worker() -> Arc<WorkerThread> {
        Arc::new(WorkerThread::new(Duration::from_millis(5)))
    }

    #[test]
    fn test_multi_threaded_runs_inline() {
        let threading = Threading::new(ThreadingConfig::default(), worker());
        let caller = thread::current().id();
        assert!(threading.is_gl_thread());
        assert_eq!(threading.invoke_on_gl_thread(move || thread::current().id() == caller), Ok(true));
        assert!(!threading.worker().is_started());
    }

    #[test]
    fn test_worker_strategy_starts_worker() {
        let config = GlConfig::default().with_single_thread(ThreadingStrategy::Worker);
        let threading = Threading::new(config.threading, worker());
        assert!(!threading.is_gl_thread());

        let name = threading
            .invoke_on_gl_thread(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("glcore-worker"));
        threading.worker().stop().unwrap();
    }

    #[test]
    fn test_toolkit_strategy() {
        let config = GlConfig::default().with_single_thread(ThreadingStrategy::Toolkit);
        let threading = Threading::new(config.threading, worker());
        assert_eq!(threading.invoke_on_gl_thread(|| ()), Err(WorkerError::NoToolkit));

        let toolkit = Arc::new(CountingToolkit::default());
        threading.set_toolkit_executor(toolkit.clone());
        assert_eq!(threading.invoke_on_gl_thread(|| 5), Ok(5));
        assert_eq!(
            threading.invoke_on_gl_thread(|| -> u8 { panic!("toolkit task") }),
            Err(WorkerError::TaskPanicked("toolkit task".to_string()))
        );
        assert_eq!(toolkit.runs.load(Ordering::SeqCst), 2);
        assert!(!threading.worker().is_started());
    }
}
