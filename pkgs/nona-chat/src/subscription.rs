//! Cancellable handle over a live feed

use crate::backend::Feed;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a live subscription
///
/// Batches are pushed to the callback from a spawned task. Once `cancel`
/// returns, the callback is neither running nor will it run again. Dropping
/// the handle cancels it.
pub struct Subscription {
    label: String,
    open: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Forward every batch of `feed` to `on_batch`
    ///
    /// `on_batch` must not cancel its own subscription.
    pub(crate) fn spawn<T, F>(label: impl Into<String>, mut feed: Feed<T>, mut on_batch: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let label = label.into();
        let open = Arc::new(Mutex::new(true));
        let gate = open.clone();
        let task_label = label.clone();

        let task = tokio::spawn(async move {
            while let Some(batch) = feed.next().await {
                let open = gate.lock();
                if !*open {
                    break;
                }
                on_batch(batch);
            }
            debug!("Feed {} closed", task_label);
        });

        Self {
            label,
            open,
            task: Some(task),
        }
    }

    /// Stop delivery; returns `false` if the subscription was already cancelled
    pub fn cancel(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        *self.open.lock() = false;
        task.abort();
        debug!("Cancelled subscription {}", self.label);
        true
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
