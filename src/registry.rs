//! Per-server component registry
use std::any::{type_name, Any};
use std::sync::{Arc, Mutex, Weak};

use fxhash::FxHashMap;

use crate::session::{Session, SessionShared, SessionState};

type Component = Arc<dyn Any + Send + Sync>;

/// Registry errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Registered component has a different type
    #[error("Component {key} of context {context} is not {expected}")]
    TypeMismatch {
        context: String,
        key: &'static str,
        expected: &'static str,
    },
}

/// Maps `(context-id, component-key)` to shared components
///
/// Components are constructed lazily, at most once per key.
#[derive(Default)]
pub struct Registry {
    components: Mutex<FxHashMap<(String, &'static str), Component>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Get component or construct it with `init`
    ///
    /// `init` runs under the registry lock and must not access the registry.
    pub fn get_or_init<T, F>(
        &self,
        context: &str,
        key: &'static str,
        init: F,
    ) -> Result<Arc<T>, RegistryError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        let item = components
            .entry((context.to_string(), key))
            .or_insert_with(|| {
                log::debug!("register component {:?} for context {:?}", key, context);
                Arc::new(init())
            })
            .clone();
        downcast(context, key, item)
    }

    /// Get registered component
    pub fn get<T>(&self, context: &str, key: &'static str) -> Result<Option<Arc<T>>, RegistryError>
    where
        T: Any + Send + Sync,
    {
        let components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        match components.get(&(context.to_string(), key)) {
            Some(item) => downcast(context, key, item.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Remove component, returns `true` if it was registered
    pub fn remove(&self, context: &str, key: &'static str) -> bool {
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        components.remove(&(context.to_string(), key)).is_some()
    }

    /// Remove all components of a context
    pub fn remove_context(&self, context: &str) -> usize {
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        let before = components.len();
        components.retain(|(ctx, _), _| ctx != context);
        before - components.len()
    }
}

fn downcast<T>(context: &str, key: &'static str, item: Component) -> Result<Arc<T>, RegistryError>
where
    T: Any + Send + Sync,
{
    item.downcast::<T>()
        .map_err(|_| RegistryError::TypeMismatch {
            context: context.to_string(),
            key,
            expected: type_name::<T>(),
        })
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Registry")
            .field("components", &components.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Open HTTP/2 sessions of a context
///
/// Sessions are tracked by weak reference, closed sessions are pruned
/// on access.
#[derive(Default)]
pub struct SessionTracker {
    sessions: Mutex<Vec<Weak<SessionShared>>>,
}

impl SessionTracker {
    /// Registry key of the tracker
    pub const KEY: &'static str = "h2.sessions";

    /// Track session, returns `false` if the session is tracked already
    pub fn add(&self, session: &Session) -> bool {
        let weak = session.downgrade();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.iter().any(|s| s.ptr_eq(&weak)) {
            false
        } else {
            sessions.push(weak);
            true
        }
    }

    /// Open sessions
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut open = Vec::with_capacity(sessions.len());
        sessions.retain(|weak| match weak.upgrade() {
            Some(shared) => {
                let session = Session::from_shared(shared);
                if session.state() == SessionState::Closed {
                    false
                } else {
                    open.push(session);
                    true
                }
            }
            None => false,
        });
        open
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gracefully close all open sessions
    pub fn close_all(&self) {
        for session in self.sessions() {
            session.close();
        }
    }
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("SessionTracker")
            .field("sessions", &sessions.len())
            .finish()
    }
}
