//! Tools for propagating a graceful shutdown signal through the program.
//!
//! The receiver can be cloned, checked synchronously, or awaited.

use tokio::sync::watch;

#[derive(Debug)]
pub struct ShutdownError;

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shutdown requested")
    }
}

impl std::error::Error for ShutdownError {}

pub struct Sender(watch::Sender<bool>);

impl Sender {
    /// Requests shutdown explicitly, without waiting for drop.
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

#[derive(Clone)]
pub struct Receiver(watch::Receiver<bool>);

impl Receiver {
    /// Returns `Err` if shutdown has already been requested.
    pub fn check(&self) -> Result<(), ShutdownError> {
        if *self.0.borrow() {
            Err(ShutdownError)
        } else {
            Ok(())
        }
    }

    /// Resolves once shutdown has been requested.
    pub async fn recv(&mut self) {
        let _ = self.0.wait_for(|v| *v).await;
    }
}

/// Returns a sender and receiver for graceful shutdown.
///
/// Dropping the sender (or calling [`Sender::shutdown`]) requests shutdown.
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = watch::channel(false);
    (Sender(tx), Receiver(rx))
}

#[cfg(test)]
mod tests {
    #[test]
    fn simple_check() {
        let (tx, rx) = super::channel();
        rx.check().unwrap();
        drop(tx);
        rx.check().unwrap_err();
    }

    #[tokio::test]
    async fn explicit_shutdown_wakes_recv() {
        let (tx, mut rx) = super::channel();
        let mut rx2 = rx.clone();
        let h = tokio::spawn(async move { rx2.recv().await });
        tokio::task::yield_now().await;
        tx.shutdown();
        h.await.unwrap();
        rx.check().unwrap_err();
    }
}
