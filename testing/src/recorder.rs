//! Recording of broadcast actions.

use stately_core::{AsyncActionSource, InstanceId, Phase};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Collects every action a store broadcasts.
///
/// Wrap the receiver returned by `Store::subscribe_actions` before
/// dispatching, then wait for the actions the test expects.
#[derive(Debug)]
pub struct ActionRecorder<A> {
    rx: broadcast::Receiver<A>,
    recorded: Vec<A>,
}

impl<A: Clone> ActionRecorder<A> {
    /// Record from `rx`.
    #[must_use]
    pub const fn new(rx: broadcast::Receiver<A>) -> Self {
        Self {
            rx,
            recorded: Vec::new(),
        }
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn actions(&self) -> &[A] {
        &self.recorded
    }

    /// Record until an action matches `predicate`, returning it.
    ///
    /// Returns `None` on timeout or when the store is gone.
    pub async fn wait_for<F>(&mut self, predicate: F, timeout: Duration) -> Option<A>
    where
        F: Fn(&A) -> bool,
    {
        let rx = &mut self.rx;
        let recorded = &mut self.recorded;
        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) => {
                        recorded.push(action.clone());
                        if predicate(&action) {
                            return Some(action);
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action recorder lagged");
                    },
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Record until no action arrives for `quiet`.
    pub async fn settle(&mut self, quiet: Duration) -> &[A] {
        loop {
            match tokio::time::timeout(quiet, self.rx.recv()).await {
                Ok(Ok(action)) => self.recorded.push(action),
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Action recorder lagged");
                },
                Ok(Err(RecvError::Closed)) | Err(_) => break,
            }
        }
        &self.recorded
    }

    /// Record whatever is already queued.
    pub fn drain(&mut self) -> &[A] {
        loop {
            match self.rx.try_recv() {
                Ok(action) => self.recorded.push(action),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Action recorder lagged");
                },
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        &self.recorded
    }
}

impl<A: AsyncActionSource> ActionRecorder<A> {
    /// Phases of the recorded lifecycle actions for `id`, in order.
    #[must_use]
    pub fn phases_for(&self, id: &InstanceId) -> Vec<Phase> {
        self.recorded
            .iter()
            .filter_map(AsyncActionSource::as_async_action)
            .filter(|action| action.id() == id)
            .map(stately_core::AsyncAction::phase)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stately_core::{FnOperation, Lifecycle, OperationOutput, Registry};

    #[tokio::test]
    async fn records_until_match() {
        let (tx, rx) = broadcast::channel(8);
        let mut recorder = ActionRecorder::new(rx);
        for n in 0..4 {
            let _ = tx.send(n);
        }

        assert_eq!(recorder.wait_for(|n| *n == 2, Duration::from_secs(1)).await, Some(2));
        assert_eq!(recorder.actions(), &[0, 1, 2]);
        assert_eq!(recorder.drain(), &[0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn wait_times_out() {
        let (_tx, rx) = broadcast::channel::<u8>(8);
        let mut recorder = ActionRecorder::new(rx);
        assert_eq!(recorder.wait_for(|_| true, Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn phases_per_instance() {
        let registry = Registry::new();
        let a = Lifecycle::new(&registry, FnOperation::named("a", |_| Ok(OperationOutput::ready(json!(1)))));
        let b = Lifecycle::new(&registry, FnOperation::named("b", |_| Ok(OperationOutput::ready(json!(1)))));

        let (tx, rx) = broadcast::channel(8);
        let mut recorder = ActionRecorder::new(rx);
        for action in [a.call(vec![]), b.call(vec![]), a.data(json!(1)), a.complete()] {
            let _ = tx.send(action);
        }
        drop(tx);

        recorder.settle(Duration::from_millis(10)).await;
        assert_eq!(recorder.phases_for(a.id()), vec![Phase::Call, Phase::Data, Phase::Complete]);
        assert_eq!(recorder.phases_for(b.id()), vec![Phase::Call]);
    }
}
