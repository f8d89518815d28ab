use std::time::Duration;

use tokio::task::JoinHandle;

/// One-shot cancelable timer.
///
/// Runs the callback once after `delay` unless stopped (or dropped) first.
/// Used for the scan timeout and the beacon region-exit timeout; both get
/// re-armed by replacing the stored `OneShot`, which cancels the old one.
pub struct OneShot {
    handle: JoinHandle<()>,
}

impl OneShot {
    pub fn start<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        OneShot { handle }
    }

    /// Cancel the timer. A stopped timer never fires, even if the deadline
    /// has already been reached but the callback has not run yet.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = OneShot::start(Duration::from_millis(10), move || {
            tx.send(()).unwrap();
        });
        assert!(rx.recv().await.is_some());
        // sender dropped after the single send
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let timer = OneShot::start(Duration::from_millis(10), move || {
            let _ = tx.send(());
        });
        timer.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        {
            let _timer = OneShot::start(Duration::from_millis(10), move || {
                let _ = tx.send(());
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
