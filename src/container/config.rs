use std::time::Duration;

use ntex_util::time::Millis;

const DEFAULT_ASYNC_TIMEOUT: Millis = Millis(30_000);
const DEFAULT_WORKERS: usize = 8;

#[derive(Clone, Debug)]
/// Container configuration
pub struct ContainerConfig {
    pub(super) async_timeout: Millis,
    pub(super) workers: usize,
    pub(super) context_path: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig::new()
    }
}

impl ContainerConfig {
    /// Create configuration for the root context
    pub fn new() -> Self {
        ContainerConfig {
            async_timeout: DEFAULT_ASYNC_TIMEOUT,
            workers: DEFAULT_WORKERS,
            context_path: String::new(),
        }
    }

    /// Default timeout of async cycles
    ///
    /// Zero disables the timeout. By default 30 seconds.
    pub fn async_timeout(mut self, timeout: Millis) -> Self {
        self.async_timeout = timeout;
        self
    }

    /// Number of worker threads
    pub fn workers(mut self, workers: usize) -> Self {
        assert!(workers > 0, "at least one worker is required");
        self.workers = workers;
        self
    }

    /// Context path, for example `/ctx`. Empty path is the root context.
    ///
    /// Trailing slashes are removed.
    pub fn context_path(mut self, path: &str) -> Self {
        let path = path.trim_end_matches('/');
        assert!(
            path.is_empty() || path.starts_with('/'),
            "context path must start with '/'"
        );
        self.context_path = path.to_string();
        self
    }

    pub(super) fn async_timeout_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.async_timeout.0))
    }
}
