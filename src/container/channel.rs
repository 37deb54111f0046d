use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::{fmt, time::Duration};

use ntex_http::{header, HeaderValue, StatusCode};

use super::async_context::{guarded, Action, AsyncContext, AsyncEvent, AsyncListener};
use super::async_context::{AsyncState, Lifecycle};
use super::request::{Request, RequestHead};
use super::response::{Response, Transport};
use super::{context::Context, DispatchKind};
use crate::callback::Callback;
use crate::error::{AsyncError, ExecError, HandlerError};
use crate::exec::{panic_message, Work};

/// Pipeline of one request
///
/// Runs handler invocations one at a time, either on the thread that
/// received the request or on a worker woken by an async actor.
pub(super) struct Channel {
    context: Context,
    request: Request,
    response: Response,
    lifecycle: Mutex<Lifecycle>,
    weak: Weak<Channel>,
}

impl Channel {
    pub(super) fn new(
        context: Context,
        head: RequestHead,
        transport: Arc<dyn Transport>,
    ) -> Arc<Channel> {
        Arc::new_cyclic(|weak| {
            let request = Request::new(head, context.context_path(), weak.clone());
            let timeout = context.config().async_timeout_duration();
            let lifecycle = Lifecycle::new(request.current_target(), timeout);
            Channel {
                request,
                context,
                response: Response::new(transport),
                lifecycle: Mutex::new(lifecycle),
                weak: weak.clone(),
            }
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn response(&self) -> &Response {
        &self.response
    }

    /// Handling loop, returns when the request waits for an async actor or
    /// the response is completed.
    pub(super) fn run(self: &Arc<Self>) {
        loop {
            let action = self.lifecycle().next_action();
            log::trace!("{:?}: {:?}", self.request.request_uri(), action);

            match action {
                Action::Dispatch(kind, target) => {
                    match target {
                        Some(target) => self.request.set_target(kind, &target),
                        None => self.request.set_kind(kind),
                    }
                    let res = self.invoke(&self.request, &self.response);
                    let committed = self.response.is_committed();
                    self.lifecycle().unhandle(res, committed);
                }
                Action::Error(status, err) => {
                    self.error_dispatch(status, err);
                }
                Action::Complete => {
                    self.finish();
                    return;
                }
                Action::Wait => return,
            }
        }
    }

    /// Route request and call the handler
    pub(super) fn invoke(&self, req: &Request, resp: &Response) -> Result<(), HandlerError> {
        let path = req.path();
        match self.context.router().route(&path) {
            Some(route) => {
                req.set_route(route.servlet_path, route.path_info);
                log::trace!(
                    "{} dispatch of {:?} to {:?}",
                    req.dispatch_kind(),
                    req.request_uri(),
                    req.servlet_path()
                );
                let handler = route.handler;
                panic::catch_unwind(AssertUnwindSafe(|| handler.handle(req, resp)))
                    .unwrap_or_else(|e| Err(HandlerError::panic(panic_message(&*e))))
            }
            None => {
                log::debug!("no route for {:?}", path);
                resp.set_status(StatusCode::NOT_FOUND);
                Ok(())
            }
        }
    }

    fn error_dispatch(self: &Arc<Self>, status: StatusCode, err: Option<HandlerError>) {
        if let Some(ctx) = self.current_context() {
            let listeners = self.lifecycle().listeners.clone();
            let event = AsyncEvent::new(ctx, err.clone());
            for listener in listeners {
                if let Err(e) = guarded(|| listener.on_error(&event)) {
                    log::warn!("async listener failed: {}", e);
                }
            }
        }

        let path = self.request.path();
        if self.response.reset().is_err() {
            log::warn!(
                "response of {:?} is committed, cannot send error {}: {:?}",
                path,
                status,
                err
            );
            return;
        }
        self.response.set_status(status);

        match self.context.error_mapper().error_page(status, err.as_ref(), &path) {
            Some(page) => {
                log::debug!("error dispatch of {:?} to {:?}", path, page);
                let req = &self.request;
                req.set_attribute(super::ERROR_STATUS_CODE, i64::from(status.as_u16()));
                req.set_attribute(super::ERROR_REQUEST_URI, req.request_uri());
                match err {
                    Some(err) => {
                        req.set_attribute(super::ERROR_MESSAGE, err.get_ref().to_string());
                        req.set_attribute(super::ERROR_EXCEPTION_TYPE, err.type_name());
                        req.set_attribute(super::ERROR_EXCEPTION, err);
                    }
                    None => {
                        let reason = status.canonical_reason().unwrap_or_default();
                        req.set_attribute(super::ERROR_MESSAGE, reason);
                    }
                }
                req.set_target(DispatchKind::Error, &page);

                let res = self.invoke(&self.request, &self.response);
                let committed = self.response.is_committed();
                self.lifecycle().unhandle(res, committed);
            }
            None => {
                log::debug!("no error page for {:?}, status {}", path, status);
                self.response.set_header(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                self.response.print(&format!(
                    "HTTP ERROR {} {}\n",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default()
                ));
            }
        }
    }

    fn finish(self: &Arc<Self>) {
        let channel = self.clone();
        self.response.complete(Callback::new(move |res| {
            if let Err(err) = res {
                log::debug!(
                    "cannot write response of {:?}: {}",
                    channel.request.request_uri(),
                    err
                );
            }
            channel.completed();
        }));
    }

    fn completed(self: &Arc<Self>) {
        let ctx = self.current_context();
        let listeners = self.lifecycle().completed();
        if let Some(ctx) = ctx {
            let event = AsyncEvent::new(ctx, None);
            for listener in listeners {
                if let Err(e) = guarded(|| listener.on_complete(&event)) {
                    log::warn!("async listener failed: {}", e);
                }
            }
        }
        log::trace!("request {:?} is completed", self.request.request_uri());
    }

    /// Wake up the handling loop on a worker
    fn schedule(self: &Arc<Self>) {
        let channel = self.clone();
        if let Err(err) = self.context.submit(Box::new(move || channel.run())) {
            log::error!("cannot schedule {:?}: {}", self.request.request_uri(), err);
        }
    }

    fn arm_timer(&self, lc: &mut Lifecycle) {
        lc.cancel_timer();
        if !lc.timeout.is_zero() {
            let gen = lc.timer_gen;
            let weak = self.weak.clone();
            let handle = self.context.scheduler().schedule(
                lc.timeout,
                Box::new(move || {
                    if let Some(channel) = weak.upgrade() {
                        channel.expire(gen)
                    }
                }),
            );
            lc.timer = Some(handle);
        }
    }

    fn expire(self: &Arc<Self>, gen: u64) {
        let (ctx, listeners) = {
            let mut lc = self.lifecycle();
            match lc.expire(gen) {
                Some(listeners) => (self.context_of(&lc), listeners),
                None => return,
            }
        };
        let Some(ctx) = ctx else { return };
        let cycle = ctx.cycle();
        log::debug!("async cycle of {:?} is expired", self.request.request_uri());

        let event = AsyncEvent::new(ctx, None);
        let mut failure = None;
        for listener in listeners {
            if let Err(err) = guarded(|| listener.on_timeout(&event)) {
                log::warn!("timeout listener failed: {}", err);
                failure.get_or_insert(err);
            }
        }
        if self.lifecycle().expired(cycle, failure) {
            self.schedule();
        }
    }

    fn context_of(&self, lc: &Lifecycle) -> Option<AsyncContext> {
        let channel = self.weak.upgrade()?;
        lc.pair
            .as_ref()
            .map(|(req, resp)| AsyncContext::new(channel, lc.cycle, req.clone(), resp.clone()))
    }

    fn current_context(&self) -> Option<AsyncContext> {
        let lc = self.lifecycle();
        self.context_of(&lc)
    }

    pub(super) fn start_async(
        self: &Arc<Self>,
        req: Request,
        resp: Response,
        default_target: Option<String>,
    ) -> Result<AsyncContext, AsyncError> {
        let (ctx, listeners) = {
            let mut lc = self.lifecycle();
            let listeners = lc.start_async((req.clone(), resp.clone()), default_target)?;
            self.arm_timer(&mut lc);
            (AsyncContext::new(self.clone(), lc.cycle, req, resp), listeners)
        };
        log::trace!("start async cycle {} of {:?}", ctx.cycle(), self.request.request_uri());
        self.request.capture_async_attributes();

        let event = AsyncEvent::new(ctx.clone(), None);
        for listener in listeners {
            if let Err(e) = guarded(|| listener.on_start_async(&event)) {
                log::warn!("async listener failed: {}", e);
            }
        }
        Ok(ctx)
    }

    pub(super) fn async_context(&self) -> Result<AsyncContext, AsyncError> {
        let lc = self.lifecycle();
        match lc.state {
            AsyncState::None | AsyncState::Complete | AsyncState::Errored => {
                Err(AsyncError::IllegalState(lc.state.as_str()))
            }
            _ => self.context_of(&lc).ok_or(AsyncError::IllegalState("NONE")),
        }
    }

    pub(super) fn is_async_started(&self) -> bool {
        self.lifecycle().is_started()
    }

    pub(super) fn async_state(&self) -> AsyncState {
        self.lifecycle().state
    }

    pub(super) fn is_original(&self, req: &Request, resp: &Response) -> bool {
        self.request.ptr_eq(req) && self.response.ptr_eq(resp)
    }

    pub(super) fn dispatch(
        self: &Arc<Self>,
        cycle: u64,
        target: Option<String>,
    ) -> Result<(), AsyncError> {
        if self.lifecycle().dispatch(cycle, target)? {
            self.schedule();
        }
        Ok(())
    }

    pub(super) fn complete(self: &Arc<Self>, cycle: u64) -> Result<(), AsyncError> {
        if self.lifecycle().complete(cycle)? {
            self.schedule();
        }
        Ok(())
    }

    pub(super) fn error(self: &Arc<Self>, cycle: u64, err: HandlerError) -> Result<(), AsyncError> {
        if self.lifecycle().error(cycle, err)? {
            self.schedule();
        }
        Ok(())
    }

    pub(super) fn set_timeout(&self, cycle: u64, timeout: Duration) -> Result<(), AsyncError> {
        let mut lc = self.lifecycle();
        if lc.set_timeout(cycle, timeout)? {
            self.arm_timer(&mut lc);
        }
        Ok(())
    }

    pub(super) fn timeout(&self) -> Duration {
        self.lifecycle().timeout
    }

    pub(super) fn add_listener(&self, listener: Arc<dyn AsyncListener>) -> Result<(), AsyncError> {
        self.lifecycle().add_listener(listener)
    }

    pub(super) fn submit(&self, work: Work) -> Result<(), ExecError> {
        self.context.submit(work)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("request", &self.request)
            .field("response", &self.response)
            .finish()
    }
}
