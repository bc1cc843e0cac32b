//! Lazy, memoized futures.
//!
//! A [`Lazy`] holds the factory of exactly one computation. Nothing runs at
//! construction; the first subscription (awaiting any clone of the value)
//! invokes the factory, and the settled result is shared with every other
//! subscriber without running the computation again.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::error::{Result, WorkflowError};

type Factory<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Future returned when subscribing to a [`Lazy`].
pub type LazyFuture<T> = Shared<BoxFuture<'static, Result<T>>>;

struct LazyInner<T> {
    factory: Mutex<Option<Factory<T>>>,
    started: OnceCell<LazyFuture<T>>,
}

/// A deferred computation that runs at most once.
pub struct Lazy<T> {
    inner: Arc<LazyInner<T>>,
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy").field("started", &self.inner.started.get().is_some()).finish()
    }
}

impl<T> Lazy<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a lazy value from a future factory.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let factory: Factory<T> = Box::new(move || factory().boxed());
        Self {
            inner: Arc::new(LazyInner {
                factory: Mutex::new(Some(factory)),
                started: OnceCell::new(),
            }),
        }
    }

    /// Alias of [`Lazy::new`].
    pub fn from<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(factory)
    }

    /// Create a lazy value from an executor that settles it explicitly.
    ///
    /// The executor is not called until the first subscription. Dropping the
    /// [`Settle`] handle without settling rejects the value.
    pub fn with_executor<E>(executor: E) -> Self
    where
        E: FnOnce(Settle<T>) + Send + 'static,
    {
        Self::new(move || {
            let (tx, rx) = oneshot::channel();
            executor(Settle { tx });
            async move {
                rx.await.unwrap_or_else(|_| {
                    Err(WorkflowError::msg("Lazy executor dropped without settling"))
                })
            }
        })
    }

    /// An already-known value, still delivered lazily.
    pub fn resolve(value: T) -> Self {
        Self::new(move || async move { Ok(value) })
    }

    /// An already-known failure, still delivered lazily.
    pub fn reject(error: WorkflowError) -> Self {
        Self::new(move || async move { Err(error) })
    }

    /// Whether a subscriber has started the computation.
    pub fn is_started(&self) -> bool {
        self.inner.started.get().is_some()
    }

    /// Subscribe: start the computation if needed and return the shared future.
    pub fn subscribe(&self) -> LazyFuture<T> {
        self.inner
            .started
            .get_or_init(|| match self.inner.factory.lock().take() {
                Some(factory) => factory().shared(),
                None => futures::future::ready(Err(WorkflowError::msg(
                    "Lazy factory was already consumed",
                )))
                .boxed()
                .shared(),
            })
            .clone()
    }

    /// Derive a lazy value that maps this one's success.
    pub fn then<U, F, Fut>(&self, f: F) -> Lazy<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let source = self.clone();
        Lazy::new(move || async move {
            let value = source.subscribe().await?;
            f(value).await
        })
    }

    /// Derive a lazy value that recovers from this one's failure.
    pub fn catch<F, Fut>(&self, f: F) -> Lazy<T>
    where
        F: FnOnce(WorkflowError) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let source = self.clone();
        Lazy::new(move || async move {
            match source.subscribe().await {
                Ok(value) => Ok(value),
                Err(err) => f(err).await,
            }
        })
    }
}

impl<T> IntoFuture for Lazy<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = LazyFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.subscribe()
    }
}

impl<T> IntoFuture for &Lazy<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = LazyFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.subscribe()
    }
}

/// Handle used by [`Lazy::with_executor`] to settle the value.
pub struct Settle<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Settle<T> {
    /// Fulfil the lazy value.
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Reject the lazy value.
    pub fn reject(self, error: WorkflowError) {
        let _ = self.tx.send(Err(error));
    }
}
