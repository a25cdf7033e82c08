//! Canonical push-stream contract.
//!
//! Every operation result is normalized into a [`PushSource`]: subscribing
//! hands it an [`Observer`] that receives zero or more items followed by at
//! most one terminal event (`error` or `complete`). The returned
//! [`Subscription`] releases whatever the source holds (tasks, timers,
//! sockets) when it is unsubscribed or dropped.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Receiver of push-stream events.
pub trait Observer: Send + Sync {
    /// An item was produced.
    fn on_item(&self, item: Value);

    /// The stream failed. Terminal.
    fn on_error(&self, error: Value);

    /// The stream finished. Terminal.
    fn on_complete(&self);
}

/// A source of push-stream events.
///
/// Sources are single-use: subscribing consumes them.
pub trait PushSource: Send {
    /// Start delivering events to `observer`.
    fn subscribe(self: Box<Self>, observer: Arc<dyn Observer>) -> Subscription;
}

impl<F> PushSource for F
where
    F: FnOnce(Arc<dyn Observer>) -> Subscription + Send,
{
    fn subscribe(self: Box<Self>, observer: Arc<dyn Observer>) -> Subscription {
        (*self)(observer)
    }
}

/// Handle to a live subscription.
///
/// The teardown runs exactly once: on [`Subscription::unsubscribe`] or when the
/// handle is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `teardown` when released.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to release.
    pub const fn empty() -> Self {
        Self { teardown: None }
    }

    /// Release the underlying resources.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("open", &self.teardown.is_some())
            .finish()
    }
}

/// A source that synchronously emits `items` and completes on subscribe.
pub fn from_items<I>(items: I) -> impl PushSource
where
    I: IntoIterator<Item = Value> + Send + 'static,
{
    move |observer: Arc<dyn Observer>| {
        for item in items {
            observer.on_item(item);
        }
        observer.on_complete();
        Subscription::empty()
    }
}

/// A source that synchronously fails with `error` on subscribe.
pub fn failing(error: Value) -> impl PushSource {
    move |observer: Arc<dyn Observer>| {
        observer.on_error(error);
        Subscription::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl Observer for Collect {
        fn on_item(&self, item: Value) {
            self.push(format!("item:{item}"));
        }
        fn on_error(&self, error: Value) {
            self.push(format!("error:{error}"));
        }
        fn on_complete(&self) {
            self.push("complete".to_string());
        }
    }

    impl Collect {
        fn push(&self, event: String) {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    #[test]
    fn teardown_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_items_emits_then_completes() {
        let observer = Arc::new(Collect::default());
        let source: Box<dyn PushSource> = Box::new(from_items(vec![json!(1), json!(2)]));
        let _subscription = source.subscribe(observer.clone());
        assert_eq!(observer.events(), vec!["item:1", "item:2", "complete"]);
    }

    #[test]
    fn failing_source_errors() {
        let observer = Arc::new(Collect::default());
        let source: Box<dyn PushSource> = Box::new(failing(json!("boom")));
        let _subscription = source.subscribe(observer.clone());
        assert_eq!(observer.events(), vec!["error:\"boom\""]);
    }
}
