use std::fmt;

use crate::error::OperationError;

type Sink = Box<dyn FnOnce(Result<(), OperationError>) + Send>;

/// Completion sink
///
/// Fires exactly once. A callback that is dropped without being called
/// fails with `OperationError::Closed`.
pub struct Callback(Option<Sink>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<(), OperationError>) + Send + 'static,
    {
        Callback(Some(Box::new(f)))
    }

    /// Callback that ignores the result
    pub fn noop() -> Self {
        Callback(None)
    }

    pub fn succeed(mut self) {
        if let Some(f) = self.0.take() {
            f(Ok(()))
        }
    }

    pub fn fail(mut self, err: OperationError) {
        if let Some(f) = self.0.take() {
            f(Err(err))
        }
    }

    pub fn complete(self, res: Result<(), OperationError>) {
        match res {
            Ok(()) => self.succeed(),
            Err(e) => self.fail(e),
        }
    }
}

impl Drop for Callback {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f(Err(OperationError::Closed))
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.0.is_some()).finish()
    }
}

/// Sink for an asynchronously produced value
pub struct Promise<T>(Option<Box<dyn FnOnce(Result<T, OperationError>) + Send>>);

impl<T> Promise<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<T, OperationError>) + Send + 'static,
    {
        Promise(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Promise(None)
    }

    pub fn succeed(mut self, val: T) {
        if let Some(f) = self.0.take() {
            f(Ok(val))
        }
    }

    pub fn fail(mut self, err: OperationError) {
        if let Some(f) = self.0.take() {
            f(Err(err))
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f(Err(OperationError::Closed))
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.0.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicUsize, atomic::Ordering, Arc};

    use super::*;

    #[test]
    fn test_fires_once() {
        let cnt = Arc::new(AtomicUsize::new(0));
        let cnt2 = cnt.clone();
        let cb = Callback::new(move |res| {
            assert!(res.is_ok());
            cnt2.fetch_add(1, Ordering::Relaxed);
        });
        cb.succeed();
        assert_eq!(cnt.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_fails() {
        let failed = Arc::new(AtomicUsize::new(0));
        let failed2 = failed.clone();
        drop(Callback::new(move |res| {
            if let Err(OperationError::Closed) = res {
                failed2.fetch_add(1, Ordering::Relaxed);
            }
        }));
        assert_eq!(failed.load(Ordering::Relaxed), 1);
    }
}
