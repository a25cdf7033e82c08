//! Lifecycle reducers.
//!
//! [`LifecycleReducer`] applies the transition table to one instance record.
//! [`AsyncSliceReducer`] routes lifecycle actions by instance id into an
//! [`AsyncSlice`], deletes entries on `destroy` and unregisters the instance.
//!
//! | phase | status | params | data | error |
//! |---|---|---|---|---|
//! | `call` | `Active` | payload | cleared | cleared |
//! | `data` | unchanged | unchanged | `payload[0]` | cleared |
//! | `error` | `Error` | unchanged | unchanged | `payload[0]` |
//! | `complete` | `Completed` | unchanged | unchanged | cleared |
//! | `unsubscribe`, `reset` | initial record |||
//! | `destroy` | entry removed |||

use crate::action::{AsyncAction, AsyncActionSource, Phase};
use crate::reducer::Reducer;
use crate::registry::Registry;
use crate::state::{AsyncSlice, LifecycleState, Status};
use std::marker::PhantomData;

/// Apply `action` to a single instance record.
pub fn transition(state: &mut LifecycleState, action: &AsyncAction) {
    match action.phase() {
        Phase::Call => {
            state.status = Status::Active;
            state.params = Some(action.payload().to_vec());
            state.data = None;
            state.error = None;
        },
        Phase::Data => {
            state.data = action.first().cloned();
            state.error = None;
        },
        Phase::Error => {
            state.status = Status::Error;
            state.error = action.first().cloned();
        },
        Phase::Complete => {
            state.status = Status::Completed;
            state.error = None;
        },
        Phase::Unsubscribe | Phase::Reset | Phase::Destroy => {
            *state = LifecycleState::INITIAL;
        },
    }
}

/// Reducer for a single instance record.
///
/// Does not filter by id; route actions to it yourself, or use
/// [`AsyncSliceReducer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecycleReducer;

impl Reducer for LifecycleReducer {
    type State = LifecycleState;
    type Action = AsyncAction;
    type Environment = ();

    fn reduce(&self, state: &mut LifecycleState, action: &AsyncAction, _env: &()) {
        transition(state, action);
    }
}

/// How the slice reducer treats output actions for an id without state.
///
/// This happens when `data`, `error` or `complete` reach the reducer before
/// any `call` was reduced for the id (for example when replaying a recorded
/// action log that starts mid-invocation).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Start from the initial record and apply the transition.
    #[default]
    Permissive,
    /// Ignore the action and log an error.
    Strict,
}

/// Dependencies of [`AsyncSliceReducer`].
#[derive(Clone, Debug, Default)]
pub struct LifecycleEnvironment {
    /// Registry the destroyed instances are removed from.
    pub registry: Registry,
    /// Treatment of output actions without a preceding `call`.
    pub replay_policy: ReplayPolicy,
}

impl LifecycleEnvironment {
    /// Environment backed by `registry`, with the permissive replay policy.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            replay_policy: ReplayPolicy::default(),
        }
    }

    /// Use `policy` for output actions without a preceding `call`.
    #[must_use]
    pub const fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.replay_policy = policy;
        self
    }
}

/// Reducer for the id-keyed map of instance states.
///
/// Generic over the application action type; actions that do not carry a
/// lifecycle action leave the slice untouched.
///
/// Actions for an id that has neither state nor a registry entry are ignored,
/// so a late `data` cannot resurrect a destroyed instance.
pub struct AsyncSliceReducer<A = AsyncAction> {
    _action: PhantomData<fn(&A)>,
}

impl<A> AsyncSliceReducer<A> {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _action: PhantomData,
        }
    }
}

impl<A> Default for AsyncSliceReducer<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for AsyncSliceReducer<A> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for AsyncSliceReducer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncSliceReducer")
    }
}

impl<A: AsyncActionSource> Reducer for AsyncSliceReducer<A> {
    type State = AsyncSlice;
    type Action = A;
    type Environment = LifecycleEnvironment;

    fn reduce(&self, slice: &mut AsyncSlice, action: &A, env: &LifecycleEnvironment) {
        let Some(action) = action.as_async_action() else {
            return;
        };
        let id = action.id();
        let phase = action.phase();

        if phase == Phase::Destroy {
            slice.remove(id);
            env.registry.unregister(id);
            return;
        }

        if slice.contains(id) {
            transition(slice.entry_or_initial(id.clone()), action);
            return;
        }

        if !env.registry.contains(id) {
            tracing::debug!(%id, %phase, "Ignoring action for unknown instance");
            return;
        }

        match phase {
            // Absent state already reads as initial.
            Phase::Unsubscribe | Phase::Reset => {},
            Phase::Data | Phase::Error | Phase::Complete
                if env.replay_policy == ReplayPolicy::Strict =>
            {
                tracing::error!(%id, %phase, "Output action without a preceding call");
            },
            _ => {
                if phase.is_output() {
                    tracing::debug!(%id, %phase, "Output action without a preceding call");
                }
                transition(slice.entry_or_initial(id.clone()), action);
            },
        }
    }
}
