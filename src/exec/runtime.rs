use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::{fmt, io};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;

use super::{panic_message, Executor, Work};
use crate::error::ExecError;

/// Executor and timer over a tokio runtime
///
/// Submitted work runs on the blocking pool, at most `workers` bodies at a
/// time. Timers sleep on the runtime and submit their body once expired.
#[derive(Clone)]
pub struct Exec(Arc<ExecInner>);

pub(super) struct ExecInner {
    rt: Option<Runtime>,
    handle: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    closed: AtomicBool,
}

impl Exec {
    /// Start a runtime with `workers` concurrent work bodies.
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let rt = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("h2-exec")
            .enable_time()
            .build()?;
        let handle = rt.handle().clone();

        Ok(Exec(Arc::new(ExecInner {
            workers,
            handle,
            rt: Some(rt),
            permits: Arc::new(Semaphore::new(workers)),
            closed: AtomicBool::new(false),
        })))
    }

    /// Max number of concurrently running work bodies
    pub fn workers(&self) -> usize {
        self.0.workers
    }

    /// Runtime handle, used for connection flushers
    pub fn handle(&self) -> &Handle {
        &self.0.handle
    }

    /// Reject new work, already queued work still runs
    pub fn shutdown(&self) {
        self.0.closed.store(true, Ordering::Release);
    }

    pub(super) fn downgrade(&self) -> Weak<ExecInner> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn upgrade(inner: &Weak<ExecInner>) -> Option<Exec> {
        inner.upgrade().map(Exec)
    }
}

impl Executor for Exec {
    fn submit(&self, work: Work) -> Result<(), ExecError> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(ExecError::Shutdown);
        }

        let permits = self.0.permits.clone();
        self.0.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let res = tokio::task::spawn_blocking(move || {
                if let Err(e) = panic::catch_unwind(AssertUnwindSafe(work)) {
                    log::error!("work panicked: {}", panic_message(&*e));
                }
            })
            .await;
            if let Err(e) = res {
                log::debug!("work is dropped: {}", e);
            }
        });
        Ok(())
    }
}

impl Drop for ExecInner {
    fn drop(&mut self) {
        // last handle may be released on one of the runtime threads
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}

impl fmt::Debug for Exec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exec")
            .field("workers", &self.0.workers)
            .field("closed", &self.0.closed.load(Ordering::Relaxed))
            .finish()
    }
}
