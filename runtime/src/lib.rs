//! # Stately Runtime
//!
//! The imperative shell around `stately-core`: a unidirectional [`Store`],
//! the stream adapter that normalizes operation results, and the invocation
//! epic that runs operations in response to `call` actions.
//!
//! ## Core Components
//!
//! - **Store**: holds state, runs the reducer and the middleware chain
//! - **Stream adapter**: turns futures, streams and push sources into one push stream
//! - **Epic**: at most one live invocation per instance, with supersede and cancellation
//! - **`LifecycleMiddleware`**: connects the epic to the store
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use stately_core::reducers::{AsyncSliceReducer, LifecycleEnvironment};
//! use stately_core::{AsyncAction, AsyncSlice, FnOperation, Lifecycle, OperationOutput, Registry};
//! use stately_runtime::{LifecycleMiddleware, Store};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), stately_runtime::StoreError> {
//! let registry = Registry::new();
//! let store = Store::builder(
//!     AsyncSlice::new(),
//!     AsyncSliceReducer::<AsyncAction>::new(),
//!     LifecycleEnvironment::new(registry.clone()),
//! )
//! .middleware(LifecycleMiddleware::<AsyncAction>::new(registry.clone()))
//! .build();
//!
//! let add = Lifecycle::new(
//!     &registry,
//!     FnOperation::named("add", |params| {
//!         let sum: i64 = params.iter().filter_map(|p| p.as_i64()).sum();
//!         Ok(OperationOutput::ready(json!(sum)))
//!     }),
//! );
//!
//! let complete = add.creator(stately_core::Phase::Complete).clone();
//! store
//!     .dispatch_and_wait_for(
//!         add.call(vec![json!(2), json!(3)]),
//!         move |action| complete.matches(action),
//!         Duration::from_secs(1),
//!     )
//!     .await?;
//!
//! let state = store.state(|slice| add.selector(slice)).await;
//! assert_eq!(state.data, Some(json!(5)));
//! # Ok(())
//! # }
//! ```

use stately_core::reducer::Reducer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub mod adapter;
pub mod epic;
pub mod middleware;

pub use adapter::adapt;
pub use epic::{Emission, Epic, InvocationToken};
pub use error::StoreError;
pub use middleware::{Dispatcher, LifecycleMiddleware, Middleware};
pub use store::{ListenerHandle, Store, StoreBuilder};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    ///
    /// Operation failures are not store errors; they end up in the
    /// instance state as `status: error`.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Timeout waiting for a matching action
        ///
        /// Returned by `dispatch_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        ///
        /// The store was dropped while an observer was waiting.
        #[error("Action broadcast channel closed")]
        ChannelClosed,

        /// No tokio runtime to run the store on
        ///
        /// Returned by `StoreBuilder::try_build` outside of a tokio runtime.
        #[error("Store requires a tokio runtime")]
        NoRuntime,
    }
}

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use stately_runtime::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_action_broadcast_capacity(256)
///     .with_default_wait_timeout(Duration::from_secs(1));
/// assert_eq!(config.action_broadcast_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the action broadcast channel
    pub action_broadcast_capacity: usize,
    /// Timeout used by `dispatch_and_wait`
    pub default_wait_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(action_broadcast_capacity: usize, default_wait_timeout: Duration) -> Self {
        Self {
            action_broadcast_capacity,
            default_wait_timeout,
        }
    }

    /// Set the action broadcast capacity
    ///
    /// Slow observers that fall further behind than this skip actions.
    #[must_use]
    pub const fn with_action_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.action_broadcast_capacity = capacity;
        self
    }

    /// Set the default wait timeout
    #[must_use]
    pub const fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            action_broadcast_capacity: 64,
            default_wait_timeout: Duration::from_secs(5),
        }
    }
}

/// Store module - the runtime coordinator
pub mod store {
    use super::{Arc, Duration, Reducer, RwLock, StoreConfig, StoreError};
    use crate::middleware::{Dispatcher, Feedback, Guard, Middleware};
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
    use tokio::sync::{broadcast, mpsc};

    type Listener<S> = Arc<dyn Fn(&S) + Send + Sync>;
    type Listeners<S> = Mutex<Vec<(u64, Listener<S>)>>;

    struct Inner<S, A, R, E> {
        state: RwLock<S>,
        reducer: R,
        environment: E,
        middleware: Vec<Box<dyn Middleware<S, A>>>,
        /// Serializes dispatches: one action goes through the whole pipeline
        /// before the next one starts.
        pipeline: tokio::sync::Mutex<()>,
        listeners: Arc<Listeners<S>>,
        next_listener: AtomicU64,
        action_broadcast: broadcast::Sender<A>,
        dispatcher: Dispatcher<A>,
        config: StoreConfig,
    }

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer and environment
    /// 3. Middleware chain (with a feedback loop for follow-up actions)
    /// 4. State listeners and the action broadcast
    ///
    /// Cheap to clone; clones share the same state.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `R`: Reducer implementation
    /// - `E`: Environment type
    pub struct Store<S, A, R, E> {
        inner: Arc<Inner<S, A, R, E>>,
    }

    impl<S, A, R, E> Clone for Store<S, A, R, E> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<S, A, R, E> std::fmt::Debug for Store<S, A, R, E> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Store")
                .field("middleware", &self.inner.middleware.len())
                .field("config", &self.inner.config)
                .finish_non_exhaustive()
        }
    }

    /// Builder for [`Store`].
    pub struct StoreBuilder<S, A, R, E> {
        state: S,
        reducer: R,
        environment: E,
        middleware: Vec<Box<dyn Middleware<S, A>>>,
        config: StoreConfig,
    }

    impl<S, A, R, E> StoreBuilder<S, A, R, E>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Append a middleware. Middleware runs in the order it was added.
        #[must_use]
        pub fn middleware(mut self, middleware: impl Middleware<S, A> + 'static) -> Self {
            self.middleware.push(Box::new(middleware));
            self
        }

        /// Replace the configuration.
        #[must_use]
        pub fn config(mut self, config: StoreConfig) -> Self {
            self.config = config;
            self
        }

        /// Build the store, or fail with [`StoreError::NoRuntime`] outside
        /// of a tokio runtime.
        ///
        /// # Errors
        ///
        /// - [`StoreError::NoRuntime`]: no tokio runtime is running
        pub fn try_build(self) -> Result<Store<S, A, R, E>, StoreError> {
            if tokio::runtime::Handle::try_current().is_err() {
                tracing::error!("Store built outside of a tokio runtime");
                return Err(StoreError::NoRuntime);
            }
            Ok(self.build())
        }

        /// Build the store and attach its middleware.
        ///
        /// # Panics
        ///
        /// Panics if called outside of a tokio runtime; see
        /// [`StoreBuilder::try_build`].
        #[must_use]
        pub fn build(self) -> Store<S, A, R, E> {
            let (tx, rx) = mpsc::unbounded_channel();
            let dispatcher = Dispatcher::new(tx);
            for middleware in &self.middleware {
                middleware.attach(dispatcher.clone());
            }

            let (action_broadcast, _) = broadcast::channel(self.config.action_broadcast_capacity.max(1));
            let inner = Arc::new(Inner {
                state: RwLock::new(self.state),
                reducer: self.reducer,
                environment: self.environment,
                middleware: self.middleware,
                pipeline: tokio::sync::Mutex::new(()),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener: AtomicU64::new(0),
                action_broadcast,
                dispatcher,
                config: self.config,
            });

            tokio::spawn(pump(Arc::downgrade(&inner), rx));
            Store { inner }
        }
    }

    /// Reduce fed-back actions until the store is dropped.
    async fn pump<S, A, R, E>(store: Weak<Inner<S, A, R, E>>, mut rx: mpsc::UnboundedReceiver<Feedback<A>>)
    where
        R: Reducer<State = S, Action = A, Environment = E>,
        A: Clone,
    {
        while let Some(Feedback { action, guard }) = rx.recv().await {
            let Some(inner) = store.upgrade() else {
                break;
            };
            // tokio locks do not poison, so the loop can keep going.
            let processed = AssertUnwindSafe(inner.process(action, guard)).catch_unwind().await;
            if processed.is_err() {
                tracing::error!("Panic while processing a follow-up action");
            }
        }
        tracing::trace!("Store feedback loop stopped");
    }

    impl<S, A, R, E> Inner<S, A, R, E>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
        A: Clone,
    {
        async fn process(&self, action: A, guard: Option<Guard>) -> Option<A> {
            let _pipeline = self.pipeline.lock().await;

            if let Some(guard) = guard {
                if !guard() {
                    tracing::trace!("Dropping stale follow-up action");
                    metrics::counter!("stately.store.stale_dropped").increment(1);
                    return None;
                }
            }

            metrics::counter!("stately.store.dispatched").increment(1);

            let mut action = action;
            {
                let state = self.state.read().await;
                for middleware in &self.middleware {
                    let Some(next) = middleware.before_reduce(action, &*state) else {
                        tracing::trace!("Action swallowed by middleware");
                        return None;
                    };
                    action = next;
                }
            }

            {
                let mut state = self.state.write().await;
                let span = tracing::debug_span!("reducer_execution");
                let _enter = span.enter();

                let start = std::time::Instant::now();
                self.reducer.reduce(&mut *state, &action, &self.environment);
                metrics::histogram!("stately.store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());
            }

            let state = self.state.read().await;
            for middleware in &self.middleware {
                middleware.after_reduce(&action, &*state);
            }
            for listener in self.listener_snapshot() {
                listener(&*state);
            }
            drop(state);

            // No receivers is not an error.
            let _ = self.action_broadcast.send(action.clone());
            tracing::trace!("Action processed");
            Some(action)
        }

        fn listener_snapshot(&self) -> Vec<Listener<S>> {
            lock(&self.listeners)
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        }
    }

    fn lock<S>(listeners: &Listeners<S>) -> MutexGuard<'_, Vec<(u64, Listener<S>)>> {
        listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    impl<S, A, R, E> Store<S, A, R, E>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Start building a store.
        pub fn builder(initial_state: S, reducer: R, environment: E) -> StoreBuilder<S, A, R, E> {
            StoreBuilder {
                state: initial_state,
                reducer,
                environment,
                middleware: Vec::new(),
                config: StoreConfig::default(),
            }
        }

        /// Create a store without middleware.
        ///
        /// # Panics
        ///
        /// Panics if called outside of a tokio runtime; see
        /// [`StoreBuilder::try_build`].
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::builder(initial_state, reducer, environment).build()
        }

        /// Dispatch an action through the pipeline
        ///
        /// 1. Middleware `before_reduce` hooks (may rewrite or swallow)
        /// 2. Reducer
        /// 3. Middleware `after_reduce` hooks
        /// 4. State listeners
        /// 5. Action broadcast
        ///
        /// Concurrent dispatches (including follow-up actions from middleware)
        /// are serialized. Returns the reduced action, or `None` if a
        /// middleware swallowed it.
        #[tracing::instrument(skip(self, action), name = "store_dispatch")]
        pub async fn dispatch(&self, action: A) -> Option<A> {
            self.inner.process(action, None).await
        }

        /// Dispatch an action and wait for a matching broadcast action
        ///
        /// Subscribes before dispatching, so the dispatched action itself and
        /// every follow-up action are candidates.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action within `timeout`
        /// - [`StoreError::ChannelClosed`]: the store was dropped
        pub async fn dispatch_and_wait_for<F>(&self, action: A, predicate: F, timeout: Duration) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.inner.action_broadcast.subscribe();
            self.dispatch(action).await;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged, {} actions skipped", skipped);
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// [`Store::dispatch_and_wait_for`] with the configured default timeout.
        ///
        /// # Errors
        ///
        /// See [`Store::dispatch_and_wait_for`].
        pub async fn dispatch_and_wait<F>(&self, action: A, predicate: F) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let timeout = self.inner.config.default_wait_timeout;
            self.dispatch_and_wait_for(action, predicate, timeout).await
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let status = store.state(|s| lifecycle.selector(s).status).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.inner.state.read().await;
            f(&state)
        }

        /// Register a state listener, called after every reduced action.
        ///
        /// The listener stays registered until the handle is dropped or
        /// [`ListenerHandle::unsubscribe`] is called.
        pub fn subscribe(&self, listener: impl Fn(&S) + Send + Sync + 'static) -> ListenerHandle<S> {
            let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
            lock(&self.inner.listeners).push((id, Arc::new(listener)));
            ListenerHandle {
                id,
                listeners: Arc::downgrade(&self.inner.listeners),
            }
        }

        /// Subscribe to every reduced action
        ///
        /// If the receiver lags, it skips old actions and receives
        /// [`broadcast::error::RecvError::Lagged`].
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.inner.action_broadcast.subscribe()
        }

        /// A handle for feeding actions back into this store.
        #[must_use]
        pub fn dispatcher(&self) -> Dispatcher<A> {
            self.inner.dispatcher.clone()
        }

        /// The environment passed to the reducer.
        #[must_use]
        pub fn environment(&self) -> &E {
            &self.inner.environment
        }
    }

    impl<S, A, R, E> Store<S, A, R, E>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Clone of the current state.
        pub async fn snapshot(&self) -> S {
            self.state(S::clone).await
        }
    }

    /// Registration of a state listener.
    #[must_use = "dropping a ListenerHandle unsubscribes the listener"]
    pub struct ListenerHandle<S> {
        id: u64,
        listeners: Weak<Listeners<S>>,
    }

    impl<S> ListenerHandle<S> {
        /// Remove the listener.
        pub fn unsubscribe(self) {
            self.remove();
        }

        fn remove(&self) {
            if let Some(listeners) = self.listeners.upgrade() {
                lock(&listeners).retain(|(id, _)| *id != self.id);
            }
        }
    }

    impl<S> Drop for ListenerHandle<S> {
        fn drop(&mut self) {
            self.remove();
        }
    }

    impl<S> std::fmt::Debug for ListenerHandle<S> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ListenerHandle").field("id", &self.id).finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stately_core::reducer::Reducer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    enum CounterAction {
        Add(i64),
        Echo(i64),
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = i64;
        type Action = CounterAction;
        type Environment = ();

        fn reduce(&self, state: &mut i64, action: &CounterAction, _env: &()) {
            if let CounterAction::Add(n) = action {
                *state += n;
            }
        }
    }

    /// Doubles every `Add` and echoes it back through the dispatcher.
    #[derive(Default)]
    struct Doubler {
        dispatcher: std::sync::OnceLock<Dispatcher<CounterAction>>,
    }

    impl Middleware<i64, CounterAction> for Doubler {
        fn attach(&self, dispatcher: Dispatcher<CounterAction>) {
            let _ = self.dispatcher.set(dispatcher);
        }

        fn before_reduce(&self, action: CounterAction, _state: &i64) -> Option<CounterAction> {
            match action {
                CounterAction::Add(0) => None,
                CounterAction::Add(n) => Some(CounterAction::Add(n * 2)),
                echo @ CounterAction::Echo(_) => Some(echo),
            }
        }

        fn after_reduce(&self, action: &CounterAction, state: &i64) {
            if let (CounterAction::Add(_), Some(dispatcher)) = (action, self.dispatcher.get()) {
                dispatcher.dispatch(CounterAction::Echo(*state));
            }
        }
    }

    #[tokio::test]
    async fn middleware_rewrites_swallows_and_feeds_back() {
        let store = Store::builder(0, CounterReducer, ()).middleware(Doubler::default()).build();

        let echo = store
            .dispatch_and_wait_for(
                CounterAction::Add(3),
                |a| matches!(a, CounterAction::Echo(_)),
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(echo, Ok(CounterAction::Echo(6)));

        assert_eq!(store.dispatch(CounterAction::Add(0)).await, None);
        assert_eq!(store.snapshot().await, 6);
    }

    #[tokio::test]
    async fn listeners_see_every_state() {
        let store = Store::new(0, CounterReducer, ());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = store.subscribe(move |_state| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.dispatch(CounterAction::Add(1)).await;
        store.dispatch(CounterAction::Add(1)).await;
        handle.unsubscribe();
        store.dispatch(CounterAction::Add(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.state(|s| *s).await, 3);
    }

    #[tokio::test]
    async fn wait_times_out() {
        let store = Store::builder(0, CounterReducer, ())
            .config(StoreConfig::default().with_default_wait_timeout(Duration::from_millis(20)))
            .build();
        let result = store
            .dispatch_and_wait(CounterAction::Add(1), |a| matches!(a, CounterAction::Echo(_)))
            .await;
        assert_eq!(result, Err(StoreError::Timeout));
    }

    #[test]
    fn try_build_outside_runtime_fails() {
        let result = Store::builder(0, CounterReducer, ()).try_build();
        assert!(matches!(result, Err(StoreError::NoRuntime)));
    }

    #[tokio::test]
    async fn try_build_inside_runtime() -> Result<(), StoreError> {
        let store = Store::builder(0, CounterReducer, ()).try_build()?;
        store.dispatch(CounterAction::Add(2)).await;
        assert_eq!(store.snapshot().await, 2);
        Ok(())
    }

    /// Panics while reducing `Add(13)`.
    struct Fragile;

    impl Reducer for Fragile {
        type State = i64;
        type Action = CounterAction;
        type Environment = ();

        #[allow(clippy::panic)] // Exercises panic recovery of the feedback loop
        fn reduce(&self, state: &mut i64, action: &CounterAction, _env: &()) {
            match action {
                CounterAction::Add(13) => panic!("unlucky"),
                CounterAction::Add(n) => *state += n,
                CounterAction::Echo(_) => {},
            }
        }
    }

    #[tokio::test]
    async fn feedback_loop_survives_a_panicking_action() {
        let store = Store::new(0, Fragile, ());
        let mut actions = store.subscribe_actions();

        let dispatcher = store.dispatcher();
        dispatcher.dispatch(CounterAction::Add(13));
        dispatcher.dispatch(CounterAction::Add(1));

        let received = tokio::time::timeout(Duration::from_secs(1), actions.recv()).await;
        assert!(matches!(received, Ok(Ok(CounterAction::Add(1)))));
        assert_eq!(store.snapshot().await, 1);
    }

    #[tokio::test]
    async fn guarded_feedback_is_dropped_when_stale() {
        let store = Store::new(0, CounterReducer, ());
        let mut actions = store.subscribe_actions();

        let dispatcher = store.dispatcher();
        dispatcher.dispatch_if(CounterAction::Add(10), || false);
        dispatcher.dispatch_if(CounterAction::Add(1), || true);

        let received = tokio::time::timeout(Duration::from_secs(1), actions.recv()).await;
        assert!(matches!(received, Ok(Ok(CounterAction::Add(1)))));
        assert_eq!(store.snapshot().await, 1);
    }
}
