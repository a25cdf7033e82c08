//! Invocation epic.
//!
//! Turns `call` actions into operation invocations and invocation events
//! into `data`, `error` and `complete` actions.
//!
//! Per instance id there is at most one live invocation. A new `call`
//! supersedes the previous invocation; `unsubscribe` and `destroy` cancel it.
//! Cancellation happens synchronously inside [`Epic::handle`]: the old
//! invocation's token is cancelled before `handle` returns, and any of its
//! events that arrive later are dropped. Emissions already queued downstream
//! carry the same token, so the consumer can drop them too (see
//! [`Emission::is_current`]).

use crate::adapter::{adapt, panic_error};
use serde_json::Value;
use stately_core::action::{AsyncAction, Phase};
use stately_core::id::InstanceId;
use stately_core::lifecycle::Lifecycle;
use stately_core::registry::Registry;
use stately_core::stream::{Observer, Subscription};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

/// Identity and liveness of one invocation.
#[derive(Clone)]
pub struct InvocationToken(Arc<TokenState>);

struct TokenState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl InvocationToken {
    fn new() -> Self {
        Self(Arc::new(TokenState {
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }))
    }

    /// Whether the invocation was superseded, unsubscribed or destroyed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Whether the invocation reached a terminal event.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }

    fn finish(&self) {
        self.0.finished.store(true, Ordering::Release);
    }

    fn is(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for InvocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationToken")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// A follow-up action produced by an invocation.
#[derive(Clone, Debug)]
pub struct Emission {
    /// The `data`, `error` or `complete` action.
    pub action: AsyncAction,
    /// Token of the invocation that produced it.
    pub token: InvocationToken,
}

impl Emission {
    /// False once the producing invocation was cancelled.
    ///
    /// Re-check this right before reducing the action.
    #[must_use]
    pub fn is_current(&self) -> bool {
        !self.token.is_cancelled()
    }
}

struct Invocation {
    token: InvocationToken,
    subscription: Option<Subscription>,
}

struct Shared {
    registry: Registry,
    output: mpsc::UnboundedSender<Emission>,
    // Entries outlive natural completion so the next call can still cancel
    // emissions that are queued downstream.
    invocations: Mutex<HashMap<InstanceId, Invocation>>,
}

impl Shared {
    fn invocations(&self) -> MutexGuard<'_, HashMap<InstanceId, Invocation>> {
        self.invocations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The invocation state machine for every instance.
///
/// Cheap to clone; clones share the same invocations.
#[derive(Clone)]
pub struct Epic {
    shared: Arc<Shared>,
}

impl Epic {
    /// Create an epic that resolves ids through `registry` and sends its
    /// follow-up actions to `output`.
    #[must_use]
    pub fn new(registry: Registry, output: mpsc::UnboundedSender<Emission>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                output,
                invocations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// React to a dispatched lifecycle action.
    ///
    /// Only `call`, `unsubscribe` and `destroy` have an effect.
    pub fn handle(&self, action: &AsyncAction) {
        match action.phase() {
            Phase::Call => self.call(action),
            Phase::Unsubscribe | Phase::Destroy => self.cancel(action.id(), action.phase()),
            Phase::Data | Phase::Error | Phase::Complete | Phase::Reset => {},
        }
    }

    /// Number of invocations that have not reached a terminal event.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared
            .invocations()
            .values()
            .filter(|invocation| !invocation.token.is_finished())
            .count()
    }

    /// Whether `id` has an invocation that has not reached a terminal event.
    #[must_use]
    pub fn is_in_flight(&self, id: &InstanceId) -> bool {
        self.shared
            .invocations()
            .get(id)
            .is_some_and(|invocation| !invocation.token.is_finished())
    }

    /// Cancel every invocation.
    pub fn cancel_all(&self) {
        let drained: Vec<Invocation> = {
            let mut invocations = self.shared.invocations();
            invocations
                .drain()
                .map(|(_, invocation)| {
                    invocation.token.cancel();
                    invocation
                })
                .collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Cancelled all invocations");
        }
    }

    fn call(&self, action: &AsyncAction) {
        let id = action.id();
        let Some(lifecycle) = self.shared.registry.lookup(id) else {
            tracing::debug!(%id, "No lifecycle registered for call, ignoring");
            metrics::counter!("stately.epic.registry_miss").increment(1);
            return;
        };

        let token = InvocationToken::new();
        let previous = {
            let mut invocations = self.shared.invocations();
            let previous = invocations.insert(
                id.clone(),
                Invocation {
                    token: token.clone(),
                    subscription: None,
                },
            );
            if let Some(previous) = &previous {
                previous.token.cancel();
            }
            previous
        };
        if let Some(previous) = previous {
            if !previous.token.is_finished() {
                tracing::debug!(%id, "Superseding in-flight invocation");
                metrics::counter!("stately.epic.superseded").increment(1);
            }
            drop(previous.subscription);
        }

        tracing::trace!(%id, params = action.payload().len(), "Invoking operation");
        metrics::counter!("stately.epic.invocations").increment(1);

        let observer = Arc::new(InvocationObserver {
            lifecycle: lifecycle.clone(),
            token: token.clone(),
            output: self.shared.output.clone(),
            shared: Arc::downgrade(&self.shared),
        });

        // A panic while invoking or subscribing is a synchronous failure of
        // this instance only.
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            lifecycle
                .operation()
                .invoke(action.payload())
                .map(|output| adapt(output).subscribe(Arc::clone(&observer) as Arc<dyn Observer>))
        }));
        let subscription = match started {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(error)) => {
                tracing::debug!(%id, "Operation failed synchronously");
                observer.on_error(error);
                return;
            },
            Err(payload) => {
                let error = panic_error(&*payload);
                tracing::error!(%id, %error, "Operation panicked");
                if !token.is_finished() {
                    observer.on_error(error);
                }
                return;
            },
        };

        // Keep the subscription only if nothing superseded or finished this
        // invocation while it was being set up.
        let rejected = {
            let mut invocations = self.shared.invocations();
            match invocations.get_mut(id) {
                Some(entry) if entry.token.is(&token) && !token.is_finished() => {
                    entry.subscription = Some(subscription);
                    None
                },
                _ => Some(subscription),
            }
        };
        drop(rejected);
    }

    fn cancel(&self, id: &InstanceId, phase: Phase) {
        let removed = {
            let mut invocations = self.shared.invocations();
            invocations.remove(id).inspect(|invocation| invocation.token.cancel())
        };
        if let Some(invocation) = removed {
            if !invocation.token.is_finished() {
                tracing::debug!(%id, %phase, "Cancelled in-flight invocation");
            }
            drop(invocation.subscription);
        }
    }
}

impl fmt::Debug for Epic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Epic")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

struct InvocationObserver {
    lifecycle: Lifecycle,
    token: InvocationToken,
    output: mpsc::UnboundedSender<Emission>,
    shared: Weak<Shared>,
}

impl InvocationObserver {
    fn emit(&self, action: AsyncAction) {
        if self.token.is_cancelled() {
            tracing::trace!(id = %self.lifecycle.id(), phase = %action.phase(), "Dropping event of cancelled invocation");
            return;
        }
        let emission = Emission {
            action,
            token: self.token.clone(),
        };
        if self.output.send(emission).is_err() {
            tracing::debug!(id = %self.lifecycle.id(), "Epic output closed, dropping event");
        }
    }

    /// Mark the invocation terminal and release its subscription.
    fn finish(&self) {
        self.token.finish();
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let released = {
            let mut invocations = shared.invocations();
            invocations
                .get_mut(self.lifecycle.id())
                .filter(|entry| entry.token.is(&self.token))
                .and_then(|entry| entry.subscription.take())
        };
        drop(released);
    }
}

impl Observer for InvocationObserver {
    fn on_item(&self, item: Value) {
        self.emit(self.lifecycle.data(item));
    }

    fn on_error(&self, error: Value) {
        metrics::counter!("stately.epic.errors").increment(1);
        self.emit(self.lifecycle.error(error));
        self.finish();
    }

    fn on_complete(&self) {
        self.emit(self.lifecycle.complete());
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stately_core::operation::{FnOperation, OperationOutput};
    use std::time::Duration;

    fn epic() -> (Registry, Epic, mpsc::UnboundedReceiver<Emission>) {
        let registry = Registry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.clone(), Epic::new(registry, tx), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Emission>) -> Option<Emission> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn call_emits_data_then_complete() {
        let (registry, epic, mut rx) = epic();
        let add = Lifecycle::new(
            &registry,
            FnOperation::named("add", |params| {
                let sum: i64 = params.iter().filter_map(Value::as_i64).sum();
                Ok(OperationOutput::ready(json!(sum)))
            }),
        );

        epic.handle(&add.call(vec![json!(2), json!(3)]));

        let data = next(&mut rx).await.map(|e| e.action);
        assert_eq!(data, Some(add.data(json!(5))));
        let complete = next(&mut rx).await.map(|e| e.action);
        assert_eq!(complete, Some(add.complete()));
        assert!(!epic.is_in_flight(add.id()));
    }

    #[tokio::test]
    async fn synchronous_failure_becomes_error() {
        let (registry, epic, mut rx) = epic();
        let op = Lifecycle::new(&registry, FnOperation::named("bad", |_| Err(json!("thrown"))));

        epic.handle(&op.call(vec![]));

        let emission = next(&mut rx).await;
        assert_eq!(emission.map(|e| e.action), Some(op.error(json!("thrown"))));
        assert_eq!(epic.in_flight(), 0);
    }

    #[tokio::test]
    #[allow(clippy::panic)] // The operation under test panics on purpose
    async fn panicking_invoke_becomes_error() {
        let (registry, epic, mut rx) = epic();
        let op = Lifecycle::new(&registry, FnOperation::named("bad", |_| panic!("boom")));

        epic.handle(&op.call(vec![]));

        let emission = next(&mut rx).await;
        assert_eq!(
            emission.map(|e| e.action),
            Some(op.error(json!("operation panicked: boom")))
        );
        assert!(!epic.is_in_flight(op.id()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_id_is_ignored() {
        let (registry, epic, mut rx) = epic();
        let op = Lifecycle::new(
            &registry,
            FnOperation::named("op", |_| Ok(OperationOutput::ready(json!(1)))),
        );
        registry.unregister(op.id());

        epic.handle(&op.call(vec![]));

        assert!(rx.try_recv().is_err());
        assert_eq!(epic.in_flight(), 0);
    }

    #[tokio::test]
    async fn superseded_call_is_cancelled() {
        let (registry, epic, mut rx) = epic();
        let op = Lifecycle::new(
            &registry,
            FnOperation::named("slow", |params| {
                let delay = params.first().and_then(Value::as_u64).unwrap_or_default();
                Ok(OperationOutput::future(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(json!(delay))
                }))
            }),
        );

        epic.handle(&op.call(vec![json!(50)]));
        assert!(epic.is_in_flight(op.id()));
        epic.handle(&op.call(vec![json!(1)]));
        assert_eq!(epic.in_flight(), 1);

        let first = next(&mut rx).await;
        assert_eq!(first.map(|e| e.action), Some(op.data(json!(1))));
        let second = next(&mut rx).await;
        assert_eq!(second.map(|e| e.action), Some(op.complete()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn queued_emissions_go_stale_on_supersede() {
        let (registry, epic, mut rx) = epic();
        let op = Lifecycle::new(
            &registry,
            FnOperation::named("items", |_| {
                Ok(OperationOutput::push(stately_core::stream::from_items(vec![
                    json!(1),
                    json!(2),
                ])))
            }),
        );

        epic.handle(&op.call(vec![]));
        let queued: Vec<Emission> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(queued.len(), 3);
        assert!(queued.iter().all(Emission::is_current));

        epic.handle(&op.call(vec![]));
        assert!(queued.iter().all(|emission| !emission.is_current()));
    }

    #[tokio::test]
    async fn destroy_cancels() {
        let (registry, epic, mut rx) = epic();
        let op = Lifecycle::new(
            &registry,
            FnOperation::named("never", |_| {
                Ok(OperationOutput::future(futures::future::pending()))
            }),
        );

        epic.handle(&op.call(vec![]));
        assert!(epic.is_in_flight(op.id()));

        epic.handle(&op.destroy());
        assert!(!epic.is_in_flight(op.id()));
        epic.handle(&op.destroy());
        assert!(rx.try_recv().is_err());
    }
}
