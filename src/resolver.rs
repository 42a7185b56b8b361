//! Values that are either known up front or produced on demand.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;

type Thunk<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A fixed value, or an operation (possibly asynchronous) producing one.
///
/// Callers never branch on the variant: `resolve` is the only way to get at
/// the value.
pub enum Resolver<T> {
    Value(T),
    Thunk(Thunk<T>),
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Resolver::Thunk(Arc::new(move || f().boxed()))
    }

    pub async fn resolve(&self) -> Result<T> {
        match self {
            Resolver::Value(value) => Ok(value.clone()),
            Resolver::Thunk(thunk) => thunk().await,
        }
    }
}

impl Resolver<Vec<String>> {
    /// Shorthand for a fixed list of strings.
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Resolver::Value(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        match self {
            Resolver::Value(value) => Resolver::Value(value.clone()),
            Resolver::Thunk(thunk) => Resolver::Thunk(Arc::clone(thunk)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolver::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}
