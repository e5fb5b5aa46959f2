//! Cooperative cancellation for runs

use crate::store::CancelSignalStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cancellation token shared between a run and whoever may stop it
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create a new cancellation token
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancel the token
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Check if cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll the cancel flag of `execute_id` and trip `token` once it is raised.
///
/// Stops when `done` trips, whichever comes first.
pub fn spawn_cancel_watcher(
    store: Arc<dyn CancelSignalStore>,
    execute_id: i64,
    token: CancellationToken,
    done: CancellationToken,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match store.get_workflow_cancel_flag(execute_id).await {
                Ok(true) => {
                    debug!(execute_id, "cancel flag observed");
                    token.cancel();
                    break;
                }
                Ok(false) => {}
                Err(e) => warn!(execute_id, error = %e, "failed to read cancel flag"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        assert!(!token1.is_cancelled());
        assert!(!token2.is_cancelled());

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_watcher_trips_token_on_flag() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let done = CancellationToken::new();
        let handle = spawn_cancel_watcher(
            store.clone(),
            9,
            token.clone(),
            done,
            Duration::from_millis(5),
        );

        store.set_workflow_cancel_flag(9).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_stops_when_done() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let done = CancellationToken::new();
        let handle = spawn_cancel_watcher(store, 9, token.clone(), done.clone(), Duration::from_millis(5));

        done.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!token.is_cancelled());
    }
}
