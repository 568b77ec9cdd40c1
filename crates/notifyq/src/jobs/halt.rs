use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative stop flag shared between a loop and whoever wants it stopped.
///
/// Loops poll it only at their suspension points, so in-flight work always
/// finishes. Requesting twice is harmless.
#[derive(Clone, Debug)]
pub struct HaltSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl HaltSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a halt has been requested, including before this call.
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|halted| *halted).await;
    }
}

impl Default for HaltSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn requested_resolves_for_earlier_request() {
        let halt = HaltSignal::new();
        halt.request();
        tokio::time::timeout(Duration::from_millis(100), halt.requested())
            .await
            .expect("already-requested halt should resolve immediately");
    }

    #[tokio::test]
    async fn requested_wakes_waiter() {
        let halt = HaltSignal::new();
        let waiter = {
            let halt = halt.clone();
            tokio::spawn(async move { halt.requested().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        halt.request();
        halt.request();
        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should observe halt")
            .unwrap();
        assert!(halt.is_requested());
    }
}
