//! Multi-observer handle to a computation running on the tokio runtime.
//!
//! The computation is spawned as its own task, so dropping (cancelling) an
//! observer only detaches that observer; the work keeps running for everyone
//! else still awaiting a clone of the handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use super::errors::PicklesError;

pub struct Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Shared<BoxFuture<'static, Result<T, PicklesError>>>,
}

impl<T> Clone for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns `fut` on the current runtime. Panics outside a tokio runtime.
    pub fn spawn<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T, PicklesError>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let inner = async move { handle.await.map_err(PicklesError::from).and_then(|r| r) }
            .boxed()
            .shared();
        Self { inner }
    }

    /// Runs CPU-bound `f` on the blocking pool.
    pub fn spawn_blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, PicklesError> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(f);
        let inner = async move { handle.await.map_err(PicklesError::from).and_then(|r| r) }
            .boxed()
            .shared();
        Self { inner }
    }

    /// The result, if the computation already finished and was observed.
    pub fn peek(&self) -> Option<&Result<T, PicklesError>> {
        self.inner.peek()
    }

    pub fn observers(&self) -> Option<usize> {
        self.inner.strong_count()
    }

    /// Whether both handles observe the same computation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<T> Future for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, PicklesError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}
