//! Execution substrate shared by the session engine and the container
//!
//! Three narrow capabilities: submitting work to a worker, scheduling
//! cancellable one-shot timers and flushing framed bytes in call order.
//! [`Exec`] provides the first two on top of a tokio runtime.
use std::{any::Any, io, sync::Arc, time::Duration};

use ntex_bytes::Bytes;

mod flusher;
mod runtime;
mod timer;

pub use self::flusher::IoFlusher;
pub use self::runtime::Exec;
pub use self::timer::TimerHandle;

use crate::error::ExecError;

/// Unit of work
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Completion of a flush
pub type FlushDone = Box<dyn FnOnce(io::Result<()>) + Send + 'static>;

/// Work submitter
pub trait Executor: Send + Sync {
    /// Enqueue work for later execution on some worker.
    ///
    /// Work is never executed inline.
    fn submit(&self, work: Work) -> Result<(), ExecError>;
}

/// One-shot deferred execution
pub trait Scheduler: Send + Sync {
    /// Run `work` after `delay`, the returned handle cancels it.
    fn schedule(&self, delay: Duration, work: Work) -> TimerHandle;
}

/// Outbound byte sink of a connection
pub trait Flusher: Send + Sync {
    /// Write `buf`, `done` fires exactly once.
    ///
    /// Completions are reported in call order.
    fn flush(&self, buf: Bytes, done: FlushDone);

    /// Close the outbound half, called once the session is closed and drained.
    fn shutdown(&self) {}
}

impl<T: Executor + ?Sized> Executor for Arc<T> {
    fn submit(&self, work: Work) -> Result<(), ExecError> {
        (**self).submit(work)
    }
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn schedule(&self, delay: Duration, work: Work) -> TimerHandle {
        (**self).schedule(delay, work)
    }
}

pub(crate) fn panic_message(e: &(dyn Any + Send)) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
