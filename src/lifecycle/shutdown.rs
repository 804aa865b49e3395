//! Stop signal for accept loops.

use tokio::sync::watch;

/// Trigger side of a single-fire stop request.
///
/// Clones share the same signal. Once triggered it stays triggered, and
/// listeners subscribed afterwards observe it immediately.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to the stop request.
    pub fn subscribe(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Request a stop. Later calls have no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of listeners still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a [`StopSignal`].
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    /// The continuation flag: true once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop is requested.
    ///
    /// If every `StopSignal` was dropped without triggering, this never
    /// resolves.
    pub async fn stopped(&mut self) {
        let closed = self.rx.wait_for(|stopped| *stopped).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscriber_sees_trigger() {
        let signal = StopSignal::new();
        signal.trigger();

        let mut listener = signal.subscribe();
        assert!(listener.is_stopped());
        tokio::time::timeout(Duration::from_millis(100), listener.stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_resolves_on_trigger() {
        let signal = StopSignal::new();
        let mut listener = signal.subscribe();
        assert!(!listener.is_stopped());

        let waiter = tokio::spawn(async move {
            listener.stopped().await;
            listener.is_stopped()
        });
        signal.trigger();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_signal_never_fires() {
        let signal = StopSignal::new();
        let mut listener = signal.subscribe();
        drop(signal);

        let fired = tokio::time::timeout(Duration::from_secs(60), listener.stopped()).await;
        assert!(fired.is_err());
        assert!(!listener.is_stopped());
    }

    #[test]
    fn trigger_is_idempotent() {
        let signal = StopSignal::new();
        let _listener = signal.subscribe();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        assert_eq!(signal.receiver_count(), 1);
    }
}
