//! Deferred values resolved while a deployment runs.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;

use crate::{Error, Result};

/// A handle to a value that becomes available during deployment.
///
/// Outputs are cheap to clone and every clone observes the same
/// resolution. A continuation registered with [`Output::apply`] runs
/// at most once: the underlying future is shared and memoized, so the
/// body executes on first await and later consumers read the stored
/// value. A failed upstream fails every downstream consumer.
pub struct Output<T> {
    inner: Shared<BoxFuture<'static, Result<T>>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Output")
    }
}

impl<T: Clone + Send + Sync + 'static> Output<T> {
    /// An output that is already resolved.
    pub fn ready(value: T) -> Self {
        Self::from_future(async move { Ok(value) })
    }

    /// An output resolved by the given future.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// An output resolved later through the returned resolver.
    pub fn pending() -> (OutputResolver<T>, Self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let output = Self::from_future(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Program(
                    "output dropped before resolution".to_string(),
                )),
            }
        });
        (OutputResolver { tx }, output)
    }

    /// Wait for the value.
    pub async fn get(&self) -> Result<T> {
        self.inner.clone().await
    }

    /// Derive a new output by running `f` once this one resolves.
    pub fn apply<U, F, Fut>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let upstream = self.inner.clone();
        Output::from_future(async move {
            let value = upstream.await?;
            f(value).await
        })
    }

    /// Derive a new output through an infallible function.
    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.apply(move |value| async move { Ok(f(value)) })
    }

    /// Combine this output with another; resolves once both have.
    pub fn zip<U: Clone + Send + Sync + 'static>(&self, other: &Output<U>) -> Output<(T, U)> {
        let a = self.inner.clone();
        let b = other.inner.clone();
        Output::from_future(async move { Ok((a.await?, b.await?)) })
    }

    /// Resolve once every input has resolved, preserving order.
    pub fn all(outputs: Vec<Output<T>>) -> Output<Vec<T>> {
        Output::from_future(async move {
            let mut values = Vec::with_capacity(outputs.len());
            for output in outputs {
                values.push(output.get().await?);
            }
            Ok(values)
        })
    }
}

/// Resolves a pending [`Output`]. Consuming methods make a second
/// resolution unrepresentable.
pub struct OutputResolver<T> {
    tx: tokio::sync::oneshot::Sender<Result<T>>,
}

impl<T> OutputResolver<T> {
    /// Publish the value.
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Fail the output and everything derived from it.
    pub fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}
