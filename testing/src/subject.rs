//! Manually driven push streams.

use serde_json::Value;
use stately_core::stream::{Observer, PushSource, Subscription};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    observers: Vec<(u64, Arc<dyn Observer>)>,
    next_id: u64,
    subscribes: usize,
    unsubscribes: usize,
}

/// A hot push stream driven by the test.
///
/// Every source created with [`Subject::source`] registers its observer on
/// subscribe; [`Subject::next`], [`Subject::error`] and [`Subject::complete`]
/// push to all current observers. Subscribe and unsubscribe calls are
/// counted so tests can check that cancellation reached the source.
///
/// ```
/// use serde_json::json;
/// use stately_core::{FnOperation, OperationOutput};
/// use stately_testing::Subject;
///
/// let subject = Subject::new();
/// let feed = subject.clone();
/// let operation = FnOperation::named("live", move |_| Ok(OperationOutput::push(feed.source())));
/// # let _ = operation;
/// assert_eq!(subject.subscribe_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct Subject {
    state: Arc<Mutex<State>>,
}

impl Subject {
    /// A subject without observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-use source subscribing to this subject.
    pub fn source(&self) -> impl PushSource + 'static {
        let state = Arc::clone(&self.state);
        move |observer: Arc<dyn Observer>| {
            let id = {
                let mut guard = lock(&state);
                let id = guard.next_id;
                guard.next_id += 1;
                guard.subscribes += 1;
                guard.observers.push((id, observer));
                id
            };
            Subscription::new(move || {
                let mut guard = lock(&state);
                guard.unsubscribes += 1;
                guard.observers.retain(|(observer_id, _)| *observer_id != id);
            })
        }
    }

    /// Push an item to every observer.
    pub fn next(&self, item: Value) {
        for observer in self.observers() {
            observer.on_item(item.clone());
        }
    }

    /// Fail every observer and forget them.
    pub fn error(&self, error: Value) {
        for observer in self.take_observers() {
            observer.on_error(error.clone());
        }
    }

    /// Complete every observer and forget them.
    pub fn complete(&self) {
        for observer in self.take_observers() {
            observer.on_complete();
        }
    }

    /// How many times a source of this subject was subscribed.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        lock(&self.state).subscribes
    }

    /// How many subscriptions were released.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        lock(&self.state).unsubscribes
    }

    /// Number of observers currently attached.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }

    fn observers(&self) -> Vec<Arc<dyn Observer>> {
        lock(&self.state)
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    fn take_observers(&self) -> Vec<Arc<dyn Observer>> {
        std::mem::take(&mut lock(&self.state).observers)
            .into_iter()
            .map(|(_, observer)| observer)
            .collect()
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Subject")
            .field("observers", &state.observers.len())
            .field("subscribes", &state.subscribes)
            .field("unsubscribes", &state.unsubscribes)
            .finish()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Observer for Log {
        fn on_item(&self, item: Value) {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).push(item.to_string());
        }
        fn on_error(&self, error: Value) {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).push(format!("error {error}"));
        }
        fn on_complete(&self) {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).push("complete".into());
        }
    }

    impl Log {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    #[test]
    fn pushes_to_subscribers_and_counts() {
        let subject = Subject::new();
        let log = Arc::new(Log::default());
        let source: Box<dyn PushSource> = Box::new(subject.source());
        let subscription = source.subscribe(log.clone());

        subject.next(json!(1));
        subject.next(json!(2));
        assert_eq!(subject.subscribe_count(), 1);
        assert_eq!(subject.observer_count(), 1);

        subscription.unsubscribe();
        subject.next(json!(3));

        assert_eq!(log.entries(), vec!["1", "2"]);
        assert_eq!(subject.unsubscribe_count(), 1);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn terminal_detaches_observers() {
        let subject = Subject::new();
        let log = Arc::new(Log::default());
        let source: Box<dyn PushSource> = Box::new(subject.source());
        let _subscription = source.subscribe(log.clone());

        subject.complete();
        subject.next(json!("ignored"));

        assert_eq!(log.entries(), vec!["complete"]);
        assert_eq!(subject.observer_count(), 0);
    }
}
