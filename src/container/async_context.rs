use std::panic::{self, AssertUnwindSafe};
use std::{fmt, sync::Arc, time::Duration};

use ntex_http::StatusCode;
use ntex_util::time::Millis;

use super::{channel::Channel, request::Request, response::Response, DispatchKind};
use crate::error::{AsyncError, ExecError, HandlerError};
use crate::exec::{panic_message, TimerHandle};

/// Lifecycle state of an async request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AsyncState {
    /// Request is not in async mode
    None,
    /// Async cycle is started, waiting for dispatch, complete or timeout
    Started,
    /// Re-entry into the pipeline is pending
    Dispatching,
    /// Pipeline is re-entered with an ASYNC dispatch
    Dispatched,
    /// Response completion is pending
    Completing,
    /// Response is completed
    Complete,
    /// Error dispatch is pending
    Erroring,
    /// Error is handled
    Errored,
}

impl AsyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncState::None => "NONE",
            AsyncState::Started => "STARTED",
            AsyncState::Dispatching => "DISPATCHING",
            AsyncState::Dispatched => "DISPATCHED",
            AsyncState::Completing => "COMPLETING",
            AsyncState::Complete => "COMPLETE",
            AsyncState::Erroring => "ERRORING",
            AsyncState::Errored => "ERRORED",
        }
    }

    fn illegal(self) -> AsyncError {
        AsyncError::IllegalState(self.as_str())
    }

    fn terminated(self) -> AsyncError {
        AsyncError::AlreadyTerminated(self.as_str())
    }
}

/// Async lifecycle callbacks
///
/// Errors returned from listeners are logged, a timeout listener error is
/// attached to the error dispatch of the expired request.
pub trait AsyncListener: Send + Sync {
    /// Request is put into async mode again, the listener is unregistered
    /// and has to register itself again to keep receiving events.
    fn on_start_async(&self, _event: &AsyncEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Response is completed
    fn on_complete(&self, _event: &AsyncEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Async cycle is expired
    fn on_timeout(&self, _event: &AsyncEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Request failed, called before the error dispatch
    fn on_error(&self, _event: &AsyncEvent) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Event passed to async listeners
#[derive(Clone, Debug)]
pub struct AsyncEvent {
    context: AsyncContext,
    error: Option<HandlerError>,
}

impl AsyncEvent {
    pub(super) fn new(context: AsyncContext, error: Option<HandlerError>) -> Self {
        AsyncEvent { context, error }
    }

    pub fn async_context(&self) -> &AsyncContext {
        &self.context
    }

    pub fn request(&self) -> &Request {
        self.context.request()
    }

    pub fn response(&self) -> &Response {
        self.context.response()
    }

    pub fn error(&self) -> Option<&HandlerError> {
        self.error.as_ref()
    }
}

/// Handle of one async cycle of a request
///
/// Operations of a handle of an older cycle fail with
/// [`AsyncError::AlreadyTerminated`].
#[derive(Clone)]
pub struct AsyncContext {
    channel: Arc<Channel>,
    cycle: u64,
    request: Request,
    response: Response,
}

impl AsyncContext {
    pub(super) fn new(
        channel: Arc<Channel>,
        cycle: u64,
        request: Request,
        response: Response,
    ) -> Self {
        AsyncContext {
            channel,
            cycle,
            request,
            response,
        }
    }

    pub(super) fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Request passed to `start_async`
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Response passed to `start_async`
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Check if the cycle was started with the request and response of the
    /// channel
    pub fn has_original_request_and_response(&self) -> bool {
        self.channel.is_original(&self.request, &self.response)
    }

    pub fn state(&self) -> AsyncState {
        self.channel.async_state()
    }

    /// Re-enter the pipeline
    ///
    /// The target is the original request uri if the cycle was started with
    /// `start_async`, or the path of the request at the time of
    /// `start_async_with`.
    pub fn dispatch(&self) -> Result<(), AsyncError> {
        self.channel.dispatch(self.cycle, None)
    }

    /// Re-enter the pipeline at a context relative path
    ///
    /// Percent-encoded octets of `path` are preserved in the request uri.
    pub fn dispatch_to(&self, path: &str) -> Result<(), AsyncError> {
        self.channel.dispatch(self.cycle, Some(path.to_string()))
    }

    /// Complete the response
    pub fn complete(&self) -> Result<(), AsyncError> {
        self.channel.complete(self.cycle)
    }

    /// Fail the async cycle, the error is handled with an error dispatch
    pub fn error(&self, err: HandlerError) -> Result<(), AsyncError> {
        self.channel.error(self.cycle, err)
    }

    /// Set timeout of the cycle, zero disables the timeout
    ///
    /// Re-arming cancels the previous timer.
    pub fn set_timeout(&self, timeout: Millis) -> Result<(), AsyncError> {
        let timeout = Duration::from_millis(u64::from(timeout.0));
        self.channel.set_timeout(self.cycle, timeout)
    }

    pub fn timeout(&self) -> Millis {
        let ms = self.channel.timeout().as_millis();
        Millis(u32::try_from(ms).unwrap_or(u32::MAX))
    }

    pub fn add_listener<L>(&self, listener: L) -> Result<(), AsyncError>
    where
        L: AsyncListener + 'static,
    {
        self.channel.add_listener(Arc::new(listener))
    }

    /// Run `work` on the container executor
    pub fn start<F>(&self, work: F) -> Result<(), ExecError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.channel.submit(Box::new(work))
    }
}

impl fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContext")
            .field("cycle", &self.cycle)
            .field("state", &self.state())
            .field("request", &self.request)
            .finish()
    }
}

/// Next step of the handling loop
#[derive(Debug)]
pub(super) enum Action {
    /// Invoke handler, `Some` target re-points the request
    Dispatch(DispatchKind, Option<String>),
    /// Error dispatch
    Error(StatusCode, Option<HandlerError>),
    /// Complete response
    Complete,
    /// Nothing to do until an async actor acts
    Wait,
}

/// Async lifecycle of one request
///
/// Transitions happen under the channel lock, each async cycle has exactly
/// one terminal transition.
pub(super) struct Lifecycle {
    pub(super) state: AsyncState,
    /// Handler invocation is in progress
    handling: bool,
    initial: bool,
    finished: bool,
    expired: bool,
    pub(super) cycle: u64,
    pub(super) timeout: Duration,
    pub(super) timer: Option<TimerHandle>,
    pub(super) timer_gen: u64,
    pub(super) listeners: Vec<Arc<dyn AsyncListener>>,
    /// Request and response of the current cycle
    pub(super) pair: Option<(Request, Response)>,
    original_target: String,
    default_target: Option<String>,
    target: Option<String>,
    error: Option<(StatusCode, Option<HandlerError>)>,
}

impl Lifecycle {
    pub(super) fn new(original_target: String, timeout: Duration) -> Self {
        Lifecycle {
            original_target,
            timeout,
            state: AsyncState::None,
            handling: false,
            initial: true,
            finished: false,
            expired: false,
            cycle: 0,
            timer: None,
            timer_gen: 0,
            listeners: Vec::new(),
            pair: None,
            default_target: None,
            target: None,
            error: None,
        }
    }

    pub(super) fn next_action(&mut self) -> Action {
        if self.initial {
            self.initial = false;
            self.handling = true;
            return Action::Dispatch(DispatchKind::Request, None);
        }

        match self.state {
            AsyncState::Started => {
                self.handling = false;
                Action::Wait
            }
            AsyncState::Dispatching => {
                self.state = AsyncState::Dispatched;
                self.handling = true;
                Action::Dispatch(DispatchKind::Async, self.target.take())
            }
            AsyncState::Erroring => {
                self.state = AsyncState::Errored;
                self.handling = true;
                let (status, err) = self
                    .error
                    .take()
                    .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, None));
                Action::Error(status, err)
            }
            AsyncState::None | AsyncState::Dispatched => {
                self.state = AsyncState::Completing;
                self.finish()
            }
            AsyncState::Completing | AsyncState::Errored | AsyncState::Complete => self.finish(),
        }
    }

    fn finish(&mut self) -> Action {
        self.handling = false;
        if self.finished {
            Action::Wait
        } else {
            self.finished = true;
            Action::Complete
        }
    }

    /// Handler invocation returned
    pub(super) fn unhandle(&mut self, res: Result<(), HandlerError>, committed: bool) {
        if let Err(err) = res {
            if self.state == AsyncState::Errored {
                log::error!("error dispatch failed: {}", err);
            } else if committed {
                log::warn!("response is committed, ignore handler error: {}", err);
            } else {
                log::debug!("handler failed in {} state: {}", self.state.as_str(), err);
                self.cancel_timer();
                self.error = Some((StatusCode::INTERNAL_SERVER_ERROR, Some(err)));
                self.state = AsyncState::Erroring;
            }
        }
    }

    /// Start async cycle, returns listeners of the previous cycle
    pub(super) fn start_async(
        &mut self,
        pair: (Request, Response),
        default_target: Option<String>,
    ) -> Result<Vec<Arc<dyn AsyncListener>>, AsyncError> {
        match self.state {
            AsyncState::None | AsyncState::Dispatched if self.handling => {
                self.state = AsyncState::Started;
                self.cycle += 1;
                self.expired = false;
                self.pair = Some(pair);
                self.default_target = default_target;
                Ok(std::mem::take(&mut self.listeners))
            }
            state => Err(state.illegal()),
        }
    }

    fn check_cycle(&self, cycle: u64) -> Result<(), AsyncError> {
        if cycle == self.cycle {
            Ok(())
        } else {
            Err(AsyncError::AlreadyTerminated("STALE"))
        }
    }

    /// Returns `true` if the handling loop must be scheduled
    pub(super) fn dispatch(
        &mut self,
        cycle: u64,
        target: Option<String>,
    ) -> Result<bool, AsyncError> {
        self.check_cycle(cycle)?;
        match self.state {
            AsyncState::Started | AsyncState::Dispatched => {
                self.cancel_timer();
                self.state = AsyncState::Dispatching;
                self.target = Some(
                    target
                        .or_else(|| self.default_target.clone())
                        .unwrap_or_else(|| self.original_target.clone()),
                );
                Ok(!self.handling)
            }
            AsyncState::None => Err(self.state.illegal()),
            state => Err(state.terminated()),
        }
    }

    /// Returns `true` if the handling loop must be scheduled
    pub(super) fn complete(&mut self, cycle: u64) -> Result<bool, AsyncError> {
        self.check_cycle(cycle)?;
        match self.state {
            AsyncState::Started | AsyncState::Dispatched => {
                self.cancel_timer();
                self.state = AsyncState::Completing;
                Ok(!self.handling)
            }
            AsyncState::None => Err(self.state.illegal()),
            state => Err(state.terminated()),
        }
    }

    /// Returns `true` if the handling loop must be scheduled
    pub(super) fn error(&mut self, cycle: u64, err: HandlerError) -> Result<bool, AsyncError> {
        self.check_cycle(cycle)?;
        match self.state {
            AsyncState::Started | AsyncState::Dispatched => {
                self.cancel_timer();
                self.state = AsyncState::Erroring;
                self.error = Some((StatusCode::INTERNAL_SERVER_ERROR, Some(err)));
                Ok(!self.handling)
            }
            AsyncState::None => Err(self.state.illegal()),
            state => Err(state.terminated()),
        }
    }

    /// Returns `true` if the timer must be re-armed
    pub(super) fn set_timeout(
        &mut self,
        cycle: u64,
        timeout: Duration,
    ) -> Result<bool, AsyncError> {
        self.check_cycle(cycle)?;
        match self.state {
            AsyncState::Started | AsyncState::Dispatched => {
                self.timeout = timeout;
                Ok(self.state == AsyncState::Started && !self.expired)
            }
            state => Err(state.illegal()),
        }
    }

    pub(super) fn add_listener(
        &mut self,
        listener: Arc<dyn AsyncListener>,
    ) -> Result<(), AsyncError> {
        match self.state {
            AsyncState::None | AsyncState::Started => {
                self.listeners.push(listener);
                Ok(())
            }
            state => Err(state.illegal()),
        }
    }

    /// Timer fired, returns listeners to notify
    pub(super) fn expire(&mut self, gen: u64) -> Option<Vec<Arc<dyn AsyncListener>>> {
        if gen != self.timer_gen || self.state != AsyncState::Started || self.expired {
            None
        } else {
            self.expired = true;
            self.timer = None;
            Some(self.listeners.clone())
        }
    }

    /// Timeout listeners are notified, returns `true` if the handling loop
    /// must be scheduled
    pub(super) fn expired(&mut self, cycle: u64, err: Option<HandlerError>) -> bool {
        if cycle == self.cycle && self.state == AsyncState::Started {
            self.state = AsyncState::Erroring;
            self.error = Some((StatusCode::INTERNAL_SERVER_ERROR, err));
            !self.handling
        } else {
            if let Some(err) = err {
                log::warn!("timeout listener failed: {}", err);
            }
            false
        }
    }

    /// Response is written, returns listeners for `on_complete`
    pub(super) fn completed(&mut self) -> Vec<Arc<dyn AsyncListener>> {
        if self.state == AsyncState::Completing {
            self.state = AsyncState::Complete;
        }
        self.cancel_timer();
        std::mem::take(&mut self.listeners)
    }

    pub(super) fn cancel_timer(&mut self) {
        self.timer_gen += 1;
        if let Some(timer) = self.timer.take() {
            if !timer.cancel() {
                log::trace!("async timer is already started");
            }
        }
    }

    pub(super) fn is_started(&self) -> bool {
        matches!(self.state, AsyncState::Started | AsyncState::Dispatching)
    }
}

/// Run listener callback, panics become errors
pub(super) fn guarded<F>(f: F) -> Result<(), HandlerError>
where
    F: FnOnce() -> Result<(), HandlerError>,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|e| Err(HandlerError::panic(panic_message(&*e))))
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Weak};

    use ntex_bytes::Bytes;
    use ntex_http::Method;

    use super::*;
    use crate::callback::Callback;
    use crate::container::{request::RequestHead, response::ResponseHead, Transport};

    struct Discard;

    impl Transport for Discard {
        fn write(&self, _: Option<ResponseHead>, _: Bytes, _: bool, done: Callback) {
            done.succeed()
        }
    }

    fn pair() -> (Request, Response) {
        let req = Request::new(RequestHead::new(Method::GET, "/ctx/a"), "/ctx", Weak::new());
        (req, Response::new(Arc::new(Discard)))
    }

    fn io_err() -> HandlerError {
        HandlerError::new(io::Error::new(io::ErrorKind::Other, "Test"))
    }

    fn lifecycle() -> Lifecycle {
        Lifecycle::new("/a".to_string(), Duration::from_secs(30))
    }

    #[test]
    fn test_sync_request() {
        let mut lc = lifecycle();
        assert!(matches!(lc.next_action(), Action::Dispatch(DispatchKind::Request, None)));
        lc.unhandle(Ok(()), false);
        assert!(matches!(lc.next_action(), Action::Complete));
        assert_eq!(lc.state, AsyncState::Completing);
        assert!(matches!(lc.next_action(), Action::Wait));
        lc.completed();
        assert_eq!(lc.state, AsyncState::Complete);
    }

    #[test]
    fn test_first_writer_wins() {
        let mut lc = lifecycle();
        lc.next_action();
        lc.start_async(pair(), None).unwrap();
        lc.unhandle(Ok(()), false);
        assert!(matches!(lc.next_action(), Action::Wait));

        // handler returned, dispatch schedules the loop
        assert!(lc.dispatch(1, None).unwrap());
        assert_eq!(lc.complete(1), Err(AsyncError::AlreadyTerminated("DISPATCHING")));
        assert!(!lc.expired(1, None));
        assert!(lc.error(1, io_err()).is_err());

        match lc.next_action() {
            Action::Dispatch(DispatchKind::Async, Some(target)) => assert_eq!(target, "/a"),
            act => panic!("unexpected action {:?}", act),
        }
        assert_eq!(lc.state, AsyncState::Dispatched);
        // stale handle
        assert_eq!(lc.complete(0), Err(AsyncError::AlreadyTerminated("STALE")));
        lc.unhandle(Ok(()), false);
        assert!(matches!(lc.next_action(), Action::Complete));
    }

    #[test]
    fn test_dispatch_while_handling() {
        let mut lc = lifecycle();
        lc.next_action();
        lc.start_async(pair(), Some("/current?x=1".to_string())).unwrap();
        // handler still runs, the loop picks up the dispatch
        assert!(!lc.dispatch(1, None).unwrap());
        lc.unhandle(Ok(()), false);
        match lc.next_action() {
            Action::Dispatch(DispatchKind::Async, Some(target)) => {
                assert_eq!(target, "/current?x=1")
            }
            act => panic!("unexpected action {:?}", act),
        }
    }

    #[test]
    fn test_handler_error_overrides_pending_complete() {
        let mut lc = lifecycle();
        lc.next_action();
        lc.start_async(pair(), None).unwrap();
        assert!(!lc.complete(1).unwrap());
        lc.unhandle(Err(io_err()), false);
        assert_eq!(lc.state, AsyncState::Erroring);
        match lc.next_action() {
            Action::Error(status, Some(_)) => assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR),
            act => panic!("unexpected action {:?}", act),
        }
        assert_eq!(lc.state, AsyncState::Errored);
        lc.unhandle(Ok(()), false);
        assert!(matches!(lc.next_action(), Action::Complete));
        lc.completed();
        assert_eq!(lc.state, AsyncState::Errored);
    }

    #[test]
    fn test_committed_error_is_swallowed() {
        let mut lc = lifecycle();
        lc.next_action();
        lc.start_async(pair(), None).unwrap();
        lc.complete(1).unwrap();
        lc.unhandle(Err(io_err()), true);
        assert_eq!(lc.state, AsyncState::Completing);
        assert!(matches!(lc.next_action(), Action::Complete));
    }

    #[test]
    fn test_expire() {
        let mut lc = lifecycle();
        lc.next_action();
        lc.start_async(pair(), None).unwrap();
        lc.unhandle(Ok(()), false);
        lc.next_action();

        let gen = lc.timer_gen;
        assert!(lc.expire(gen + 1).is_none());
        assert!(lc.expire(gen).is_some());
        assert!(lc.expire(gen).is_none());
        assert!(lc.expired(1, None));
        assert_eq!(lc.state, AsyncState::Erroring);
        assert!(matches!(lc.next_action(), Action::Error(_, None)));
    }

    #[test]
    fn test_timeout_listener_completes() {
        let mut lc = lifecycle();
        lc.next_action();
        lc.start_async(pair(), None).unwrap();
        lc.unhandle(Ok(()), false);
        lc.next_action();

        let gen = lc.timer_gen;
        lc.expire(gen).unwrap();
        // listener completes the request
        assert!(lc.complete(1).unwrap());
        assert!(!lc.expired(1, Some(io_err())));
        assert!(matches!(lc.next_action(), Action::Complete));
    }

    #[test]
    fn test_illegal_states() {
        let mut lc = lifecycle();
        assert_eq!(lc.dispatch(0, None), Err(AsyncError::IllegalState("NONE")));
        assert!(matches!(
            lc.start_async(pair(), None),
            Err(AsyncError::IllegalState("NONE"))
        ));
        lc.next_action();
        lc.start_async(pair(), None).unwrap();
        assert!(lc.start_async(pair(), None).is_err());
        assert!(lc.set_timeout(1, Duration::from_millis(100)).unwrap());
        lc.complete(1).unwrap();
        assert!(lc.set_timeout(1, Duration::ZERO).is_err());
        assert!(lc.add_listener(Arc::new(Nop)).is_err());
    }

    struct Nop;

    impl AsyncListener for Nop {}
}
