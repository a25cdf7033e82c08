//! Lifecycle actions.
//!
//! An [`AsyncAction`] describes one step of an instance's lifecycle. Its
//! wire shape is
//!
//! ```text
//! { type: "stately-async/<operationName>/<phase>", payload: [..], meta: { id, phase, operationName } }
//! ```
//!
//! The `(id, phase)` pair in [`AsyncMeta`] is authoritative; the type string is
//! derived from it and exists for diagnostics and fast filtering.

use crate::id::InstanceId;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The type prefix applied to every [`AsyncAction`].
pub const ACTION_PREFIX: &str = "stately-async";

/// One step in an instance lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Invoke the operation with the action payload as arguments.
    Call,
    /// The invocation emitted an item.
    Data,
    /// The invocation failed.
    Error,
    /// The invocation finished normally.
    Complete,
    /// Cancel the in-flight invocation and return to the initial state.
    Unsubscribe,
    /// Return to the initial state without cancelling anything.
    Reset,
    /// Cancel, forget the instance state and drop the registry entry.
    Destroy,
}

impl Phase {
    /// All phases, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Call,
        Self::Data,
        Self::Error,
        Self::Complete,
        Self::Unsubscribe,
        Self::Reset,
        Self::Destroy,
    ];

    /// Lowercase name used as the type string suffix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Unsubscribe => "unsubscribe",
            Self::Reset => "reset",
            Self::Destroy => "destroy",
        }
    }

    /// Whether an action of this phase ends the in-flight invocation of its instance.
    #[must_use]
    pub const fn cancels_invocation(self) -> bool {
        matches!(self, Self::Call | Self::Unsubscribe | Self::Destroy)
    }

    /// Whether this phase is produced by the epic rather than by callers.
    #[must_use]
    pub const fn is_output(self) -> bool {
        matches!(self, Self::Data | Self::Error | Self::Complete)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the type string for a given operation name and phase.
///
/// ```
/// use stately_core::action::{action_type, Phase};
///
/// assert_eq!(action_type("fetchUser", Phase::Call), "stately-async/fetchUser/call");
/// ```
#[must_use]
pub fn action_type(operation_name: &str, phase: Phase) -> String {
    format!("{ACTION_PREFIX}/{operation_name}/{phase}")
}

/// Metadata binding an action to a lifecycle instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncMeta {
    /// Id of the owning instance.
    pub id: InstanceId,
    /// Lifecycle step.
    pub phase: Phase,
    /// Operation name, or the instance id for anonymous operations.
    pub operation_name: String,
}

/// An action describing a state change of one lifecycle instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsyncAction {
    #[serde(rename = "type")]
    action_type: String,
    payload: Vec<Value>,
    meta: AsyncMeta,
}

impl AsyncAction {
    /// Create an action, deriving its type string from `meta`.
    #[must_use]
    pub fn new(meta: AsyncMeta, payload: Vec<Value>) -> Self {
        Self {
            action_type: action_type(&meta.operation_name, meta.phase),
            payload,
            meta,
        }
    }

    /// Full type string, e.g. `stately-async/fetchUser/call`.
    #[must_use]
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Positional payload.
    #[must_use]
    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// First payload element (the item for `data`, the error for `error`).
    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.payload.first()
    }

    /// Consume the action, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<Value> {
        self.payload
    }

    /// Lifecycle metadata.
    #[must_use]
    pub const fn meta(&self) -> &AsyncMeta {
        &self.meta
    }

    /// Id of the owning instance.
    #[must_use]
    pub const fn id(&self) -> &InstanceId {
        &self.meta.id
    }

    /// Lifecycle step.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.meta.phase
    }

    /// Operation name (or id fallback).
    #[must_use]
    pub fn operation_name(&self) -> &str {
        &self.meta.operation_name
    }
}

/// Access to lifecycle actions embedded in an application action type.
///
/// Applications usually wrap [`AsyncAction`] in their own action enum. The
/// reducers and middleware only need to see the lifecycle part:
///
/// ```
/// use stately_core::action::{AsyncAction, AsyncActionSource};
///
/// #[derive(Clone, Debug)]
/// enum AppAction {
///     Lifecycle(AsyncAction),
///     Logout,
/// }
///
/// impl AsyncActionSource for AppAction {
///     fn as_async_action(&self) -> Option<&AsyncAction> {
///         match self {
///             AppAction::Lifecycle(action) => Some(action),
///             AppAction::Logout => None,
///         }
///     }
/// }
///
/// impl From<AsyncAction> for AppAction {
///     fn from(action: AsyncAction) -> Self {
///         AppAction::Lifecycle(action)
///     }
/// }
///
/// assert!(AppAction::Logout.as_async_action().is_none());
/// ```
pub trait AsyncActionSource {
    /// Returns the lifecycle action carried by `self`, if any.
    fn as_async_action(&self) -> Option<&AsyncAction>;
}

impl AsyncActionSource for AsyncAction {
    fn as_async_action(&self) -> Option<&AsyncAction> {
        Some(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum OperationFilter {
    Any,
    Named(String),
    // Anonymous operations cannot be matched by name.
    Unmatchable,
}

/// Library-wide filter for lifecycle actions.
///
/// Unlike [`ActionCreator::matches`](crate::lifecycle::ActionCreator::matches),
/// which is bound to a single instance, a matcher recognizes actions across
/// instances: any lifecycle action, optionally narrowed to a phase and/or to an
/// operation name. Useful for custom reducers or middleware that react to every
/// `call` of a given operation.
///
/// ```
/// use stately_core::action::{ActionMatcher, AsyncAction, AsyncMeta, Phase};
/// use stately_core::id::InstanceId;
///
/// let action = AsyncAction::new(
///     AsyncMeta { id: InstanceId::new("a"), phase: Phase::Call, operation_name: "search".into() },
///     vec![],
/// );
///
/// assert!(ActionMatcher::any().matches(&action));
/// assert!(ActionMatcher::phase(Phase::Call).with_operation_name("search").matches(&action));
/// assert!(!ActionMatcher::phase(Phase::Data).matches(&action));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionMatcher {
    phase: Option<Phase>,
    operation: OperationFilter,
}

impl ActionMatcher {
    /// Matches every lifecycle action.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            phase: None,
            operation: OperationFilter::Any,
        }
    }

    /// Matches lifecycle actions of the given phase.
    #[must_use]
    pub const fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            operation: OperationFilter::Any,
        }
    }

    /// Narrow to actions whose operation name equals `name`.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation = OperationFilter::Named(name.into());
        self
    }

    /// Narrow to actions produced for `operation`.
    ///
    /// Anonymous operations have no name to compare against, so the resulting
    /// matcher never matches.
    #[must_use]
    pub fn with_operation(mut self, operation: &dyn Operation) -> Self {
        self.operation = match operation.name() {
            Some(name) => OperationFilter::Named(name.to_string()),
            None => OperationFilter::Unmatchable,
        };
        self
    }

    /// Test an action against this matcher.
    #[must_use]
    pub fn matches(&self, action: &AsyncAction) -> bool {
        let phase_ok = self.phase.is_none_or(|phase| phase == action.phase());
        let operation_ok = match &self.operation {
            OperationFilter::Any => true,
            OperationFilter::Named(name) => name == action.operation_name(),
            OperationFilter::Unmatchable => false,
        };
        phase_ok && operation_ok
    }

    /// Test an application action; non-lifecycle actions never match.
    #[must_use]
    pub fn matches_source<A: AsyncActionSource + ?Sized>(&self, action: &A) -> bool {
        action
            .as_async_action()
            .is_some_and(|action| self.matches(action))
    }
}

impl Default for ActionMatcher {
    fn default() -> Self {
        Self::any()
    }
}
