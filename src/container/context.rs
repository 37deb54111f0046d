use std::{fmt, io, sync::Arc};

use ntex_http::StatusCode;

use super::channel::Channel;
use super::config::ContainerConfig;
use super::error_page::{ErrorMapper, ErrorPages};
use super::request::RequestHead;
use super::response::{Response, Transport};
use super::routes::{Router, Routes};
use crate::callback::Callback;
use crate::error::ExecError;
use crate::exec::{Exec, Executor, Scheduler, Work};
use crate::registry::Registry;

/// Request handling context
///
/// Owns routing, error pages and the executor used for request handling.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

struct ContextInner {
    config: ContainerConfig,
    router: Arc<dyn Router>,
    errors: Arc<dyn ErrorMapper>,
    exec: Exec,
    registry: Arc<Registry>,
}

/// Context builder
pub struct ContextBuilder {
    config: ContainerConfig,
    router: Arc<dyn Router>,
    errors: Arc<dyn ErrorMapper>,
    exec: Option<Exec>,
    registry: Option<Arc<Registry>>,
}

impl ContextBuilder {
    /// Request router, no routes by default
    pub fn router<R>(mut self, router: R) -> Self
    where
        R: Router + 'static,
    {
        self.router = Arc::new(router);
        self
    }

    /// Error pages, none by default
    pub fn error_mapper<E>(mut self, mapper: E) -> Self
    where
        E: ErrorMapper + 'static,
    {
        self.errors = Arc::new(mapper);
        self
    }

    /// Use shared executor, by default a new one is started with
    /// configured number of workers
    pub fn exec(mut self, exec: Exec) -> Self {
        self.exec = Some(exec);
        self
    }

    /// Use shared component registry
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn finish(self) -> io::Result<Context> {
        let exec = match self.exec {
            Some(exec) => exec,
            None => Exec::new(self.config.workers)?,
        };
        log::debug!(
            "context {:?} is started, workers: {}",
            self.config.context_path,
            exec.workers()
        );
        Ok(Context(Arc::new(ContextInner {
            exec,
            config: self.config,
            router: self.router,
            errors: self.errors,
            registry: self.registry.unwrap_or_default(),
        })))
    }
}

impl Context {
    pub fn builder(config: ContainerConfig) -> ContextBuilder {
        ContextBuilder {
            config,
            router: Arc::new(Routes::new()),
            errors: Arc::new(ErrorPages::new()),
            exec: None,
            registry: None,
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.0.config
    }

    pub fn context_path(&self) -> &str {
        &self.0.config.context_path
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.0.registry
    }

    pub fn exec(&self) -> &Exec {
        &self.0.exec
    }

    /// Run request through the context
    ///
    /// Handling starts on an executor worker, the response is written to
    /// `transport`. Requests outside of the context path get 404.
    pub fn handle(
        &self,
        head: RequestHead,
        transport: Arc<dyn Transport>,
    ) -> Result<(), ExecError> {
        if !self.in_context(&head.target) {
            log::debug!("{:?} is not in context {:?}", head.target, self.context_path());
            let resp = Response::new(transport);
            resp.set_status(StatusCode::NOT_FOUND);
            resp.complete(Callback::noop());
            return Ok(());
        }

        log::trace!("handle {} {:?}", head.method, head.target);
        let channel = Channel::new(self.clone(), head, transport);
        self.submit(Box::new(move || channel.run()))
    }

    fn in_context(&self, target: &str) -> bool {
        let ctx = self.context_path();
        match target.strip_prefix(ctx) {
            Some(rest) => {
                ctx.is_empty() || rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')
            }
            None => false,
        }
    }

    pub(super) fn router(&self) -> &dyn Router {
        &*self.0.router
    }

    pub(super) fn error_mapper(&self) -> &dyn ErrorMapper {
        &*self.0.errors
    }

    pub(super) fn submit(&self, work: Work) -> Result<(), ExecError> {
        self.0.exec.submit(work)
    }

    pub(super) fn scheduler(&self) -> &dyn Scheduler {
        &self.0.exec
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.0.config)
            .finish()
    }
}
