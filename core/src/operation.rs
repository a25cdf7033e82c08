//! The operation contract.
//!
//! An operation is a callable taking positional JSON arguments and returning
//! one of the supported asynchronous shapes. The shapes form a closed sum
//! type, [`OperationOutput`]; the runtime's stream adapter turns each of them
//! into a [`PushSource`].
//!
//! Operations carry an optional, explicitly supplied name. It becomes the
//! infix of every action type string produced for the operation. Anonymous
//! operations fall back to the instance id (see
//! [`Lifecycle::new`](crate::lifecycle::Lifecycle::new)).

use crate::stream::PushSource;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Result of a single step of an operation: an item or an error value.
pub type Outcome = Result<Value, Value>;

/// The asynchronous shapes an operation may return.
pub enum OperationOutput {
    /// Resolves once (promise-like). `Ok` yields one item then completes.
    Future(BoxFuture<'static, Outcome>),

    /// Yields items until exhausted (async iterable). An `Err` item terminates
    /// the stream with an error.
    Stream(BoxStream<'static, Outcome>),

    /// Already a push stream.
    Push(Box<dyn PushSource>),
}

impl OperationOutput {
    /// Wrap a future.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        Self::Future(future.boxed())
    }

    /// Wrap a stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Outcome> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Wrap a push source.
    pub fn push<P>(source: P) -> Self
    where
        P: PushSource + 'static,
    {
        Self::Push(Box::new(source))
    }

    /// An already resolved future.
    #[must_use]
    pub fn ready(value: Value) -> Self {
        Self::Future(futures::future::ready(Ok(value)).boxed())
    }

    /// An already rejected future.
    #[must_use]
    pub fn failed(error: Value) -> Self {
        Self::Future(futures::future::ready(Err(error)).boxed())
    }

    /// Short label of the shape, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Future(_) => "future",
            Self::Stream(_) => "stream",
            Self::Push(_) => "push",
        }
    }
}

impl fmt::Debug for OperationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationOutput::{}(..)", self.kind())
    }
}

/// An asynchronous operation managed by a lifecycle.
pub trait Operation: Send + Sync {
    /// Stable name used in action type strings. `None` for anonymous operations.
    fn name(&self) -> Option<&str>;

    /// Invoke the operation.
    ///
    /// # Errors
    ///
    /// An `Err` models a synchronous failure of the call itself (before any
    /// asynchronous work starts). It is reported as an `error` action.
    fn invoke(&self, params: &[Value]) -> Result<OperationOutput, Value>;
}

/// An [`Operation`] backed by a closure.
///
/// ```
/// use serde_json::json;
/// use stately_core::operation::{FnOperation, Operation, OperationOutput};
///
/// let add = FnOperation::named("add", |params| {
///     let sum = params.iter().filter_map(|p| p.as_i64()).sum::<i64>();
///     Ok(OperationOutput::ready(json!(sum)))
/// });
/// assert_eq!(add.name(), Some("add"));
/// ```
pub struct FnOperation<F> {
    name: Option<String>,
    f: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&[Value]) -> Result<OperationOutput, Value> + Send + Sync,
{
    /// A named operation.
    pub fn named(name: impl Into<String>, f: F) -> Self {
        Self {
            name: Some(name.into()),
            f,
        }
    }

    /// An operation without a name. Action types fall back to the instance id.
    pub const fn anonymous(f: F) -> Self {
        Self { name: None, f }
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&[Value]) -> Result<OperationOutput, Value> + Send + Sync,
{
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn invoke(&self, params: &[Value]) -> Result<OperationOutput, Value> {
        (self.f)(params)
    }
}

impl<F> fmt::Debug for FnOperation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Convert any displayable error into an error value.
pub fn error_value(error: impl fmt::Display) -> Value {
    Value::String(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn named_and_anonymous() {
        let named = FnOperation::named("load", |_| Ok(OperationOutput::ready(json!(null))));
        let anonymous = FnOperation::anonymous(|_| Ok(OperationOutput::ready(json!(null))));
        assert_eq!(named.name(), Some("load"));
        assert_eq!(anonymous.name(), None);
    }

    #[test]
    fn sync_failure_is_an_err() {
        let op = FnOperation::named("boom", |_| Err(json!("bad arguments")));
        assert_eq!(op.invoke(&[]).err(), Some(json!("bad arguments")));
    }

    #[tokio::test]
    async fn ready_future_resolves() {
        let op = FnOperation::named("double", |params| {
            let n = params.first().and_then(Value::as_i64).unwrap_or_default();
            Ok(OperationOutput::ready(json!(n * 2)))
        });
        let Ok(OperationOutput::Future(future)) = op.invoke(&[json!(21)]) else {
            unreachable!("ready() builds a future");
        };
        assert_eq!(future.await, Ok(json!(42)));
    }

    #[test]
    fn kinds() {
        assert_eq!(OperationOutput::failed(json!(1)).kind(), "future");
        assert_eq!(
            OperationOutput::stream(futures::stream::empty()).kind(),
            "stream"
        );
        assert_eq!(
            OperationOutput::push(crate::stream::from_items(Vec::new())).kind(),
            "push"
        );
    }

    #[test]
    fn error_value_uses_display() {
        assert_eq!(error_value("timed out"), json!("timed out"));
    }
}
