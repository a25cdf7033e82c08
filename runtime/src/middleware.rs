//! Store middleware.
//!
//! Middleware observes every action going through a [`Store`](crate::Store)'s
//! dispatch pipeline: `before_reduce` may rewrite or swallow an action,
//! `after_reduce` sees it together with the updated state. Follow-up actions
//! are fed back through the [`Dispatcher`] handed to [`Middleware::attach`].
//!
//! [`LifecycleMiddleware`] installs the invocation [`Epic`].

use crate::epic::{Emission, Epic};
use stately_core::action::{AsyncAction, AsyncActionSource};
use stately_core::registry::Registry;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Guard re-evaluated right before a fed-back action is reduced.
pub(crate) type Guard = Box<dyn FnOnce() -> bool + Send>;

pub(crate) struct Feedback<A> {
    pub(crate) action: A,
    pub(crate) guard: Option<Guard>,
}

/// Feeds actions back into the store that created it.
///
/// Actions are reduced in the order they are sent, one at a time, through
/// the same pipeline as [`Store::dispatch`](crate::Store::dispatch).
pub struct Dispatcher<A> {
    tx: mpsc::UnboundedSender<Feedback<A>>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<A> Dispatcher<A> {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<Feedback<A>>) -> Self {
        Self { tx }
    }

    /// Queue `action`. Returns `false` if the store is gone.
    pub fn dispatch(&self, action: A) -> bool {
        self.tx.send(Feedback { action, guard: None }).is_ok()
    }

    /// Queue `action`, to be dropped unless `guard` still holds when its turn
    /// comes. Returns `false` if the store is gone.
    pub fn dispatch_if(&self, action: A, guard: impl FnOnce() -> bool + Send + 'static) -> bool {
        self.tx
            .send(Feedback {
                action,
                guard: Some(Box::new(guard)),
            })
            .is_ok()
    }
}

/// A hook into the store's dispatch pipeline.
///
/// All methods have no-op defaults.
pub trait Middleware<S, A>: Send + Sync {
    /// Called once when the store is built.
    fn attach(&self, dispatcher: Dispatcher<A>) {
        let _ = dispatcher;
    }

    /// Runs before the reducer. Return `None` to swallow the action.
    fn before_reduce(&self, action: A, state: &S) -> Option<A> {
        let _ = state;
        Some(action)
    }

    /// Runs after the reducer with the updated state.
    fn after_reduce(&self, action: &A, state: &S) {
        let _ = (action, state);
    }
}

/// Middleware that runs the invocation [`Epic`].
///
/// Every lifecycle action is handed to the epic after it was reduced, so a
/// `call` is `active` in the state before its first `data` arrives.
/// Emissions are dispatched back guarded by their invocation token: if a
/// newer `call`, `unsubscribe` or `destroy` was reduced in the meantime, the
/// stale emission is dropped instead of reduced.
pub struct LifecycleMiddleware<A> {
    epic: Epic,
    emissions: Mutex<Option<mpsc::UnboundedReceiver<Emission>>>,
    _action: PhantomData<fn() -> A>,
}

impl<A> LifecycleMiddleware<A> {
    /// Middleware resolving instances through `registry`.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            epic: Epic::new(registry, tx),
            emissions: Mutex::new(Some(rx)),
            _action: PhantomData,
        }
    }

    /// The epic driven by this middleware.
    #[must_use]
    pub const fn epic(&self) -> &Epic {
        &self.epic
    }
}

impl<A> fmt::Debug for LifecycleMiddleware<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleMiddleware")
            .field("epic", &self.epic)
            .finish_non_exhaustive()
    }
}

impl<S, A> Middleware<S, A> for LifecycleMiddleware<A>
where
    A: AsyncActionSource + From<AsyncAction> + Send + 'static,
{
    fn attach(&self, dispatcher: Dispatcher<A>) {
        let taken = self
            .emissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut emissions) = taken else {
            tracing::warn!("LifecycleMiddleware attached twice, ignoring");
            return;
        };

        tokio::spawn(async move {
            while let Some(emission) = emissions.recv().await {
                let Emission { action, token } = emission;
                let guard = move || !token.is_cancelled();
                if !dispatcher.dispatch_if(A::from(action), guard) {
                    break;
                }
            }
            tracing::trace!("Lifecycle emission forwarder stopped");
        });
    }

    fn after_reduce(&self, action: &A, _state: &S) {
        if let Some(action) = action.as_async_action() {
            self.epic.handle(action);
        }
    }
}

impl<A> Drop for LifecycleMiddleware<A> {
    fn drop(&mut self) {
        self.epic.cancel_all();
    }
}
