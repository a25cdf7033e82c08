//! Stream adapter.
//!
//! Normalizes every [`OperationOutput`] shape into a [`PushSource`]:
//!
//! - `Future`: driven on a spawned task; `Ok` becomes one item then
//!   `complete`, `Err` becomes `error`.
//! - `Stream`: driven on a spawned task; items are forwarded in order, the
//!   first `Err` terminates with `error`, exhaustion becomes `complete`.
//! - `Push`: subscribed directly.
//!
//! Every adapted source delivers at most one terminal event and nothing after
//! it, and delivers nothing once unsubscribed. Unsubscribing aborts the
//! driving task, which drops the future or stream and whatever it holds.
//! A future or stream that panics terminates with `error`.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::{Value, json};
use stately_core::operation::{OperationOutput, Outcome};
use stately_core::stream::{Observer, PushSource, Subscription};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Adapt an operation result into the canonical push stream.
#[must_use]
pub fn adapt(output: OperationOutput) -> Box<dyn PushSource> {
    match output {
        OperationOutput::Future(future) => Box::new(from_future(future)),
        OperationOutput::Stream(stream) => Box::new(from_stream(stream)),
        OperationOutput::Push(source) => Box::new(passthrough(source)),
    }
}

fn from_future(future: BoxFuture<'static, Outcome>) -> impl PushSource {
    move |observer: Arc<dyn Observer>| {
        drive(observer, |observer| async move {
            match future.await {
                Ok(item) => {
                    observer.on_item(item);
                    observer.on_complete();
                },
                Err(error) => observer.on_error(error),
            }
        })
    }
}

fn from_stream(mut stream: BoxStream<'static, Outcome>) -> impl PushSource {
    move |observer: Arc<dyn Observer>| {
        drive(observer, |observer| async move {
            while let Some(outcome) = stream.next().await {
                match outcome {
                    Ok(item) => observer.on_item(item),
                    Err(error) => {
                        observer.on_error(error);
                        return;
                    },
                }
            }
            observer.on_complete();
        })
    }
}

fn passthrough(source: Box<dyn PushSource>) -> impl PushSource {
    move |observer: Arc<dyn Observer>| {
        let guarded = Arc::new(Guarded::new(observer));
        let inner = source.subscribe(Arc::clone(&guarded) as Arc<dyn Observer>);
        Subscription::new(move || {
            guarded.close();
            inner.unsubscribe();
        })
    }
}

/// Spawn `body` on the current tokio runtime and tie its lifetime to the
/// returned subscription.
fn drive<F, Fut>(observer: Arc<dyn Observer>, body: F) -> Subscription
where
    F: FnOnce(Arc<Guarded>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let guarded = Arc::new(Guarded::new(observer));
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::error!("Operation output subscribed outside of a tokio runtime");
        guarded.on_error(json!("operation output requires a tokio runtime"));
        return Subscription::empty();
    };

    let observer = Arc::clone(&guarded);
    let body = AssertUnwindSafe(body(Arc::clone(&guarded))).catch_unwind();
    let task = runtime.spawn(async move {
        if let Err(panic) = body.await {
            let error = panic_error(&*panic);
            tracing::error!(%error, "Operation output panicked");
            observer.on_error(error);
        }
    });
    Subscription::new(move || {
        guarded.close();
        task.abort();
    })
}

/// Error value reported for a panic with `payload`.
pub(crate) fn panic_error(payload: &(dyn Any + Send)) -> Value {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    json!(format!("operation panicked: {message}"))
}

/// Observer wrapper that enforces the terminal and unsubscribe rules.
struct Guarded {
    inner: Arc<dyn Observer>,
    closed: AtomicBool,
}

impl Guarded {
    fn new(inner: Arc<dyn Observer>) -> Self {
        Self {
            inner,
            closed: AtomicBool::new(false),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Observer for Guarded {
    fn on_item(&self, item: Value) {
        if !self.closed.load(Ordering::Acquire) {
            self.inner.on_item(item);
        }
    }

    fn on_error(&self, error: Value) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.on_error(error);
        }
    }

    fn on_complete(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.on_complete();
        }
    }
}
