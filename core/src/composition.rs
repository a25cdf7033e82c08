//! Reducer composition utilities
//!
//! - **`combine_reducers`**: run several reducers on the same state and action
//! - **`scope_reducer`**: focus a reducer on a field of a larger state
//!
//! # Examples
//!
//! Mounting the lifecycle slice inside an application state:
//!
//! ```
//! use stately_core::composition::scope_reducer;
//! use stately_core::reducer::Reducer;
//! use stately_core::reducers::{AsyncSliceReducer, LifecycleEnvironment};
//! use stately_core::state::{AsyncSlice, HasAsyncSlice};
//! use stately_core::action::AsyncAction;
//!
//! #[derive(Default)]
//! struct AppState {
//!     stately_async: AsyncSlice,
//!     title: String,
//! }
//!
//! impl HasAsyncSlice for AppState {
//!     fn async_slice(&self) -> &AsyncSlice {
//!         &self.stately_async
//!     }
//! }
//!
//! let reducer = scope_reducer(
//!     AsyncSliceReducer::<AsyncAction>::new(),
//!     |state: &mut AppState| &mut state.stately_async,
//! );
//! # let _ = reducer;
//! ```

use crate::reducer::Reducer;
use std::marker::PhantomData;

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each reducer runs in sequence, in the given order.
///
/// # Examples
///
/// ```
/// use stately_core::composition::combine_reducers;
/// use stately_core::reducer::Reducer;
///
/// #[derive(Default)]
/// struct AppState {
///     counter: i32,
///     logged: bool,
/// }
///
/// enum AppAction {
///     Increment,
///     Log,
/// }
///
/// struct CounterReducer;
/// struct LoggingReducer;
///
/// impl Reducer for CounterReducer {
///     type State = AppState;
///     type Action = AppAction;
///     type Environment = ();
///
///     fn reduce(&self, state: &mut AppState, action: &AppAction, _env: &()) {
///         if matches!(action, AppAction::Increment) {
///             state.counter += 1;
///         }
///     }
/// }
///
/// impl Reducer for LoggingReducer {
///     type State = AppState;
///     type Action = AppAction;
///     type Environment = ();
///
///     fn reduce(&self, state: &mut AppState, action: &AppAction, _env: &()) {
///         if matches!(action, AppAction::Log) {
///             state.logged = true;
///         }
///     }
/// }
///
/// let combined = combine_reducers(vec![Box::new(CounterReducer), Box::new(LoggingReducer)]);
///
/// let mut state = AppState::default();
/// combined.reduce(&mut state, &AppAction::Increment, &());
/// assert_eq!(state.counter, 1);
/// ```
#[must_use]
pub fn combine_reducers<S, A, E>(
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
) -> CombinedReducer<S, A, E> {
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A, E> {
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
}

impl<S, A, E> Reducer for CombinedReducer<S, A, E> {
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(&self, state: &mut S, action: &A, env: &E) {
        for reducer in &self.reducers {
            reducer.reduce(state, action, env);
        }
    }
}

/// Scopes a reducer to a field of a larger state.
///
/// The child reducer sees the same action and environment; `focus` selects
/// the part of the parent state it owns.
pub fn scope_reducer<S, SubS, R>(reducer: R, focus: fn(&mut S) -> &mut SubS) -> ScopedReducer<S, SubS, R>
where
    R: Reducer<State = SubS>,
{
    ScopedReducer {
        reducer,
        focus,
        _state: PhantomData,
    }
}

/// A scoped reducer that operates on a subset of state.
///
/// Created by [`scope_reducer`].
pub struct ScopedReducer<S, SubS, R> {
    reducer: R,
    focus: fn(&mut S) -> &mut SubS,
    _state: PhantomData<fn(&mut S)>,
}

impl<S, SubS, R> Reducer for ScopedReducer<S, SubS, R>
where
    R: Reducer<State = SubS>,
{
    type State = S;
    type Action = R::Action;
    type Environment = R::Environment;

    fn reduce(&self, state: &mut S, action: &R::Action, env: &R::Environment) {
        self.reducer.reduce((self.focus)(state), action, env);
    }
}
