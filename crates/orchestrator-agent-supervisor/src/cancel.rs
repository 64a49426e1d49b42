use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation raised by the supervisor at teardown.
///
/// Raising it more than once has the same effect as raising it once.
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver side handed to background tasks.
    pub fn subscribe(&self) -> CancelWatch {
        CancelWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of a [`CancelSignal`].
#[derive(Clone)]
pub struct CancelWatch {
    rx: watch::Receiver<bool>,
}

impl CancelWatch {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the signal
    /// is dropped without being raised.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_idempotent_and_visible_to_watchers() {
        let signal = CancelSignal::new();
        let mut watch = signal.subscribe();
        assert!(!watch.is_cancelled());

        signal.cancel();
        signal.cancel();
        watch.cancelled().await;
        assert!(watch.is_cancelled());
        assert!(signal.is_cancelled());

        let mut late = signal.subscribe();
        late.cancelled().await;
        assert!(late.is_cancelled());
    }
}
