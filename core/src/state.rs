//! Lifecycle state records.

use crate::id::InstanceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Where an instance is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Never called (or reset).
    #[default]
    None,
    /// A call is in flight.
    Active,
    /// The last call failed.
    Error,
    /// The last call finished normally.
    Completed,
}

/// State of one lifecycle instance.
///
/// | status | params | data | error |
/// |---|---|---|---|
/// | `None` | `None` | `None` | `None` |
/// | `Active` | last call args | latest item, if any | `None` |
/// | `Error` | last call args | latest item, if any | error value |
/// | `Completed` | last call args | final item, if any | `None` |
///
/// `params` is `Some(vec![])` for a call without arguments, which
/// distinguishes "called with no args" from "never called".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleState {
    /// Lifecycle status.
    pub status: Status,
    /// Arguments of the last call.
    pub params: Option<Vec<Value>>,
    /// Latest item emitted by the last call.
    pub data: Option<Value>,
    /// Error reported by the last call.
    pub error: Option<Value>,
}

impl LifecycleState {
    /// The initial record.
    pub const INITIAL: Self = Self {
        status: Status::None,
        params: None,
        data: None,
        error: None,
    };

    /// Whether the instance was never called (or was reset).
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        matches!(self.status, Status::None)
    }

    /// Whether a call is in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, Status::Active)
    }

    /// Whether the last call failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, Status::Error)
    }

    /// Whether the last call finished normally.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.status, Status::Completed)
    }

    /// Deserialize `data` into `T`.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if `data` does not have the shape of `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data.clone().map(serde_json::from_value).transpose()
    }

    /// Deserialize `error` into `T`.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if `error` does not have the shape of `T`.
    pub fn error_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.error.clone().map(serde_json::from_value).transpose()
    }
}

static INITIAL_STATE: LifecycleState = LifecycleState::INITIAL;

/// The map of all live instance states, keyed by instance id.
///
/// Managed by [`AsyncSliceReducer`](crate::reducers::AsyncSliceReducer). An id
/// is present iff its instance has been touched and not destroyed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsyncSlice {
    states: HashMap<InstanceId, LifecycleState>,
}

impl AsyncSlice {
    /// An empty slice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State of `id`, if present.
    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<&LifecycleState> {
        self.states.get(id)
    }

    /// State of `id`, or the initial record when absent.
    #[must_use]
    pub fn get_or_initial(&self, id: &InstanceId) -> &LifecycleState {
        self.states.get(id).unwrap_or(&INITIAL_STATE)
    }

    /// Whether `id` has state.
    #[must_use]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.states.contains_key(id)
    }

    /// Number of instances with state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no instance has state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Iterate over `(id, state)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&InstanceId, &LifecycleState)> {
        self.states.iter()
    }

    pub(crate) fn entry_or_initial(&mut self, id: InstanceId) -> &mut LifecycleState {
        self.states.entry(id).or_default()
    }

    pub(crate) fn remove(&mut self, id: &InstanceId) -> Option<LifecycleState> {
        self.states.remove(id)
    }
}

/// Root states that embed an [`AsyncSlice`].
///
/// Lets [`Lifecycle::select`](crate::lifecycle::Lifecycle::select) read an
/// instance state straight from the application state.
pub trait HasAsyncSlice {
    /// The embedded slice.
    fn async_slice(&self) -> &AsyncSlice;
}

impl HasAsyncSlice for AsyncSlice {
    fn async_slice(&self) -> &AsyncSlice {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_record_is_empty() {
        let state = LifecycleState::default();
        assert_eq!(state, LifecycleState::INITIAL);
        assert!(state.is_initial());
        assert_eq!(state.params, None);
    }

    #[test]
    fn typed_data_access() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
        }

        let state = LifecycleState {
            status: Status::Completed,
            params: Some(vec![]),
            data: Some(json!({ "name": "ada" })),
            error: None,
        };
        let user = state.data_as::<User>().ok().flatten();
        assert_eq!(user, Some(User { name: "ada".into() }));
        assert!(state.data_as::<Vec<u8>>().is_err());
        assert_eq!(state.error_as::<String>().ok(), Some(None));
    }

    #[test]
    fn missing_ids_read_as_initial() {
        let slice = AsyncSlice::new();
        assert_eq!(
            slice.get_or_initial(&InstanceId::new("nope")),
            &LifecycleState::INITIAL
        );
        assert!(slice.is_empty());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Status::Completed).ok(), Some(json!("completed")));
    }
}
