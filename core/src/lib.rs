//! # Stately Core
//!
//! Core types for managing the lifecycle of asynchronous operations inside a
//! unidirectional state store.
//!
//! An operation (a future, a stream or a push stream) is wrapped in a
//! [`Lifecycle`](lifecycle::Lifecycle) bundle. Dispatching the bundle's `call`
//! action invokes the operation; its results flow back into the store as
//! `data`, `error` and `complete` actions, and the lifecycle reducers keep a
//! per-instance record (`status`, `params`, `data`, `error`) in an
//! [`AsyncSlice`](state::AsyncSlice).
//!
//! This crate is the functional core: ids, actions, state, the registry, the
//! reducers and the push-stream contract. Invocation, cancellation and the
//! store itself live in `stately-runtime`.
//!
//! ## Core Concepts
//!
//! - **Instance**: one use of an operation, identified by an [`InstanceId`]
//! - **Phase**: one lifecycle step (`call`, `data`, `error`, `complete`, ...)
//! - **Reducer**: `(State, Action, Environment) → State`, applied in place
//! - **Registry**: maps instance ids back to their bundles and operations
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use stately_core::lifecycle::Lifecycle;
//! use stately_core::operation::{FnOperation, OperationOutput};
//! use stately_core::reducer::Reducer;
//! use stately_core::reducers::{AsyncSliceReducer, LifecycleEnvironment};
//! use stately_core::registry::Registry;
//! use stately_core::state::{AsyncSlice, Status};
//! use stately_core::AsyncAction;
//!
//! let registry = Registry::new();
//! let add = Lifecycle::new(
//!     &registry,
//!     FnOperation::named("add", |params| {
//!         let sum: i64 = params.iter().filter_map(|p| p.as_i64()).sum();
//!         Ok(OperationOutput::ready(json!(sum)))
//!     }),
//! );
//!
//! let env = LifecycleEnvironment::new(registry);
//! let reducer = AsyncSliceReducer::<AsyncAction>::new();
//! let mut slice = AsyncSlice::new();
//!
//! reducer.reduce(&mut slice, &add.call(vec![json!(2), json!(3)]), &env);
//! assert_eq!(add.selector(&slice).status, Status::Active);
//! ```

pub mod action;
pub mod composition;
pub mod id;
pub mod lifecycle;
pub mod operation;
pub mod reducers;
pub mod registry;
pub mod state;
pub mod stream;

pub use action::{ActionMatcher, AsyncAction, AsyncActionSource, AsyncMeta, Phase};
pub use id::InstanceId;
pub use lifecycle::{ActionCreator, Lifecycle};
pub use operation::{FnOperation, Operation, OperationOutput, Outcome};
pub use registry::Registry;
pub use state::{AsyncSlice, HasAsyncSlice, LifecycleState, Status};
pub use stream::{Observer, PushSource, Subscription};

// Re-export commonly used types
pub use serde::{Deserialize, Serialize};
pub use serde_json::{Value, json};

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action, Environment) → State`.
/// They are deterministic and run synchronously inside the store's dispatch
/// pipeline; asynchronous work belongs to middleware.
pub mod reducer {
    /// The Reducer trait
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```
    /// use stately_core::reducer::Reducer;
    ///
    /// struct Counter;
    ///
    /// impl Reducer for Counter {
    ///     type State = i64;
    ///     type Action = i64;
    ///     type Environment = ();
    ///
    ///     fn reduce(&self, state: &mut i64, action: &i64, _env: &()) {
    ///         *state += action;
    ///     }
    /// }
    ///
    /// let mut total = 0;
    /// Counter.reduce(&mut total, &5, &());
    /// assert_eq!(total, 5);
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Apply `action` to `state` in place.
        ///
        /// Must not panic on actions it does not understand; those leave the
        /// state unchanged.
        fn reduce(&self, state: &mut Self::State, action: &Self::Action, env: &Self::Environment);
    }
}
