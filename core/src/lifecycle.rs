//! Action creator bundles.
//!
//! A [`Lifecycle`] is created once per use of an operation (for example once
//! per mounted view). It owns a fresh [`InstanceId`], registers itself in the
//! [`Registry`] and produces the lifecycle actions for that id.
//!
//! Most consumers only need [`Lifecycle::call`], [`Lifecycle::destroy`] and
//! [`Lifecycle::select`]. The `data`, `error` and `complete` creators are
//! dispatched by the epic; they are public for advanced composition.
//!
//! Dispatch `destroy` once the instance is no longer needed. Until then the
//! registry entry and the instance state stay alive.

use crate::action::{AsyncAction, AsyncActionSource, AsyncMeta, Phase};
use crate::id::InstanceId;
use crate::operation::Operation;
use crate::registry::Registry;
use crate::state::{AsyncSlice, HasAsyncSlice, LifecycleState};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Factory for the actions of one phase of one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionCreator {
    action_type: String,
    meta: AsyncMeta,
}

impl ActionCreator {
    fn new(id: &InstanceId, operation_name: &str, phase: Phase) -> Self {
        let meta = AsyncMeta {
            id: id.clone(),
            phase,
            operation_name: operation_name.to_string(),
        };
        Self {
            action_type: crate::action::action_type(operation_name, phase),
            meta,
        }
    }

    /// Full type string of the produced actions.
    #[must_use]
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Metadata attached to every produced action.
    #[must_use]
    pub const fn meta(&self) -> &AsyncMeta {
        &self.meta
    }

    /// Build an action carrying `payload`.
    #[must_use]
    pub fn create(&self, payload: Vec<Value>) -> AsyncAction {
        AsyncAction::new(self.meta.clone(), payload)
    }

    /// Whether `action` was produced for this instance and phase.
    ///
    /// The `(id, phase)` comparison is authoritative; two operations sharing a
    /// name produce identical type strings but never share an id.
    #[must_use]
    pub fn matches(&self, action: &AsyncAction) -> bool {
        action.id() == &self.meta.id
            && action.phase() == self.meta.phase
            && action.action_type() == self.action_type
    }

    /// [`ActionCreator::matches`] for application actions.
    #[must_use]
    pub fn matches_source<A: AsyncActionSource + ?Sized>(&self, action: &A) -> bool {
        action
            .as_async_action()
            .is_some_and(|action| self.matches(action))
    }
}

struct Inner {
    id: InstanceId,
    operation_name: String,
    anonymous: bool,
    operation: Arc<dyn Operation>,
    call: ActionCreator,
    data: ActionCreator,
    error: ActionCreator,
    complete: ActionCreator,
    unsubscribe: ActionCreator,
    reset: ActionCreator,
    destroy: ActionCreator,
}

/// The action creator bundle of one operation instance.
///
/// Cheap to clone; clones share the same id.
///
/// ```
/// use serde_json::json;
/// use stately_core::lifecycle::Lifecycle;
/// use stately_core::operation::{FnOperation, OperationOutput};
/// use stately_core::registry::Registry;
///
/// let registry = Registry::new();
/// let search = Lifecycle::new(
///     &registry,
///     FnOperation::named("search", |_| Ok(OperationOutput::ready(json!([])))),
/// );
///
/// let action = search.call(vec![json!("rust")]);
/// assert_eq!(action.action_type(), "stately-async/search/call");
/// assert_eq!(action.id(), search.id());
/// assert!(registry.contains(search.id()));
/// ```
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    /// Create and register a bundle for `operation` under a fresh id.
    pub fn new(registry: &Registry, operation: impl Operation + 'static) -> Self {
        Self::with_id(registry, InstanceId::generate(), Arc::new(operation))
    }

    /// Create and register a bundle for a shared operation under `id`.
    ///
    /// `id` must not be in use by another live instance.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `id` is already registered.
    pub fn with_id(registry: &Registry, id: InstanceId, operation: Arc<dyn Operation>) -> Self {
        let (operation_name, anonymous) = match operation.name() {
            Some(name) => (name.to_string(), false),
            None => {
                tracing::warn!(
                    %id,
                    "Lifecycle created for an anonymous operation; action types fall back to the \
                     instance id and the operation cannot be matched by name"
                );
                (id.to_string(), true)
            },
        };

        let creator = |phase| ActionCreator::new(&id, &operation_name, phase);
        let inner = Inner {
            call: creator(Phase::Call),
            data: creator(Phase::Data),
            error: creator(Phase::Error),
            complete: creator(Phase::Complete),
            unsubscribe: creator(Phase::Unsubscribe),
            reset: creator(Phase::Reset),
            destroy: creator(Phase::Destroy),
            id,
            operation_name,
            anonymous,
            operation,
        };

        let lifecycle = Self {
            inner: Arc::new(inner),
        };
        registry.register(lifecycle.clone());
        lifecycle
    }

    /// Id of this instance.
    #[must_use]
    pub fn id(&self) -> &InstanceId {
        &self.inner.id
    }

    /// Name used as the action type infix (the id for anonymous operations).
    #[must_use]
    pub fn operation_name(&self) -> &str {
        &self.inner.operation_name
    }

    /// Whether the operation had no name.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.inner.anonymous
    }

    /// The managed operation.
    #[must_use]
    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.inner.operation
    }

    /// The creator for `phase`.
    #[must_use]
    pub fn creator(&self, phase: Phase) -> &ActionCreator {
        let inner = &self.inner;
        match phase {
            Phase::Call => &inner.call,
            Phase::Data => &inner.data,
            Phase::Error => &inner.error,
            Phase::Complete => &inner.complete,
            Phase::Unsubscribe => &inner.unsubscribe,
            Phase::Reset => &inner.reset,
            Phase::Destroy => &inner.destroy,
        }
    }

    /// Invoke the operation with `params` when dispatched.
    #[must_use]
    pub fn call(&self, params: Vec<Value>) -> AsyncAction {
        self.inner.call.create(params)
    }

    /// The operation emitted `item`.
    #[must_use]
    pub fn data(&self, item: Value) -> AsyncAction {
        self.inner.data.create(vec![item])
    }

    /// The operation failed with `error`.
    #[must_use]
    pub fn error(&self, error: Value) -> AsyncAction {
        self.inner.error.create(vec![error])
    }

    /// The operation finished.
    #[must_use]
    pub fn complete(&self) -> AsyncAction {
        self.inner.complete.create(Vec::new())
    }

    /// Cancel the in-flight call and return to the initial state.
    #[must_use]
    pub fn unsubscribe(&self) -> AsyncAction {
        self.inner.unsubscribe.create(Vec::new())
    }

    /// Return to the initial state.
    #[must_use]
    pub fn reset(&self) -> AsyncAction {
        self.inner.reset.create(Vec::new())
    }

    /// Cancel the in-flight call, delete the state and unregister the instance.
    #[must_use]
    pub fn destroy(&self) -> AsyncAction {
        self.inner.destroy.create(Vec::new())
    }

    /// This instance's state within `slice` (initial when absent).
    #[must_use]
    pub fn selector(&self, slice: &AsyncSlice) -> LifecycleState {
        slice.get_or_initial(self.id()).clone()
    }

    /// This instance's state within an application state.
    #[must_use]
    pub fn select<S: HasAsyncSlice + ?Sized>(&self, state: &S) -> LifecycleState {
        self.selector(state.async_slice())
    }

    /// Whether `action` belongs to this instance.
    #[must_use]
    pub fn owns(&self, action: &AsyncAction) -> bool {
        action.id() == self.id()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.inner.id)
            .field("operation_name", &self.inner.operation_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FnOperation, OperationOutput};
    use serde_json::json;

    fn named(registry: &Registry, name: &str) -> Lifecycle {
        Lifecycle::new(
            registry,
            FnOperation::named(name, |_| Ok(OperationOutput::ready(json!(1)))),
        )
    }

    #[test]
    fn creators_share_meta() {
        let registry = Registry::new();
        let lifecycle = named(&registry, "fetchUser");

        for phase in Phase::ALL {
            let creator = lifecycle.creator(phase);
            assert_eq!(creator.meta().phase, phase);
            assert_eq!(creator.meta().id, *lifecycle.id());
            assert_eq!(
                creator.action_type(),
                format!("stately-async/fetchUser/{phase}")
            );
        }
    }

    #[test]
    fn payload_shapes() {
        let registry = Registry::new();
        let lifecycle = named(&registry, "f");

        assert_eq!(lifecycle.call(vec![json!(2), json!(3)]).payload(), &[json!(2), json!(3)]);
        assert_eq!(lifecycle.data(json!("x")).payload(), &[json!("x")]);
        assert_eq!(lifecycle.error(json!("e")).payload(), &[json!("e")]);
        assert!(lifecycle.complete().payload().is_empty());
        assert!(lifecycle.destroy().payload().is_empty());
    }

    #[test]
    fn match_requires_same_instance() {
        let registry = Registry::new();
        let first = named(&registry, "same");
        let second = named(&registry, "same");

        let action = first.call(vec![]);
        assert_eq!(action.action_type(), second.call(vec![]).action_type());
        assert!(first.creator(Phase::Call).matches(&action));
        assert!(!second.creator(Phase::Call).matches(&action));
        assert!(!first.creator(Phase::Destroy).matches(&action));
    }

    #[test]
    fn anonymous_operation_falls_back_to_id() {
        let registry = Registry::new();
        let lifecycle = Lifecycle::new(
            &registry,
            FnOperation::anonymous(|_| Ok(OperationOutput::ready(json!(1)))),
        );

        assert!(lifecycle.is_anonymous());
        assert_eq!(lifecycle.operation_name(), lifecycle.id().as_str());
        assert_eq!(
            lifecycle.call(vec![]).action_type(),
            format!("stately-async/{}/call", lifecycle.id())
        );
    }

    #[test]
    fn explicit_id() {
        let registry = Registry::new();
        let operation: Arc<dyn Operation> = Arc::new(FnOperation::named("op", |_| {
            Ok(OperationOutput::ready(json!(1)))
        }));
        let lifecycle = Lifecycle::with_id(&registry, InstanceId::new("fixed"), operation);

        assert_eq!(lifecycle.id().as_str(), "fixed");
        assert!(registry.contains(&InstanceId::new("fixed")));
    }

    #[test]
    fn selector_defaults_to_initial() {
        let registry = Registry::new();
        let lifecycle = named(&registry, "f");
        assert_eq!(lifecycle.selector(&AsyncSlice::new()), LifecycleState::INITIAL);
    }
}
