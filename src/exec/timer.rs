use std::sync::atomic::{AtomicU8, Ordering};
use std::{fmt, sync::Arc, time::Duration};

use tokio::task::AbortHandle;

use super::{Exec, Executor, Scheduler, Work};

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const STARTED: u8 = 2;

/// Handle of a scheduled timer
///
/// The sleeping task is aborted on cancel. The body itself runs on the
/// executor and checks the handle state before it starts.
#[derive(Clone)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    /// Handle of a timer that never fires
    pub fn cancelled() -> Self {
        TimerHandle {
            state: Arc::new(AtomicU8::new(CANCELLED)),
            task: None,
        }
    }

    /// Cancel the timer.
    ///
    /// Returns `true` if the timer body has not begun and never will.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if let Some(ref task) = self.task {
                    task.abort();
                }
                true
            }
            Err(state) => state == CANCELLED,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }
}

fn start(state: &AtomicU8) -> bool {
    state
        .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

impl Scheduler for Exec {
    fn schedule(&self, delay: Duration, work: Work) -> TimerHandle {
        let state = Arc::new(AtomicU8::new(PENDING));
        let exec = self.downgrade();
        let st = state.clone();

        let task = self.handle().spawn(async move {
            tokio::time::sleep(delay).await;
            if st.load(Ordering::Acquire) != PENDING {
                return;
            }
            let Some(exec) = Exec::upgrade(&exec) else {
                return;
            };
            let res = exec.submit(Box::new(move || {
                if start(&st) {
                    work()
                }
            }));
            if let Err(e) = res {
                log::warn!("cannot submit expired timer: {}", e);
            }
        });

        TimerHandle {
            state,
            task: Some(task.abort_handle()),
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            PENDING => "pending",
            CANCELLED => "cancelled",
            _ => "started",
        };
        f.debug_tuple("TimerHandle").field(&state).finish()
    }
}
