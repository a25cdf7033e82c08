//! # Stately Testing
//!
//! Testing utilities and helpers for stately.
//!
//! This crate provides:
//! - [`Subject`]: a push stream driven by the test, counting subscriptions
//! - [`ReducerTest`]: Given-When-Then reducer tests
//! - [`ActionRecorder`]: collects broadcast actions and waits for matches
//! - [`init_tracing`]: log output for tests, filtered by `RUST_LOG`
//! - [`properties`]: proptest strategies for lifecycle payloads
//!
//! ## Example
//!
//! ```ignore
//! use stately_testing::{ActionRecorder, Subject};
//!
//! #[tokio::test]
//! async fn live_feed() {
//!     let subject = Subject::new();
//!     let feed = subject.clone();
//!     let live = Lifecycle::new(&registry, FnOperation::named("live", move |_| {
//!         Ok(OperationOutput::push(feed.source()))
//!     }));
//!
//!     let mut recorder = ActionRecorder::new(store.subscribe_actions());
//!     store.dispatch(live.call(vec![])).await;
//!     subject.next(json!(1));
//!
//!     recorder.wait_for(|a| live.creator(Phase::Data).matches(a), timeout).await;
//! }
//! ```

pub mod recorder;
pub mod subject;

pub use recorder::ActionRecorder;
pub use reducer_test::{ReducerTest, assertions};
pub use subject::Subject;

/// Install a `tracing` subscriber writing to the test output.
///
/// The filter comes from `RUST_LOG` (default `warn`). Safe to call from every
/// test; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use serde_json::{Value, json};

    /// Scalar JSON values: null, booleans, integers and short strings.
    pub fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z0-9]{0,8}".prop_map(Value::String),
        ]
    }

    /// Call arguments: up to `max` scalar values.
    pub fn params(max: usize) -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(scalar(), 0..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
