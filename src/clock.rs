//! Injectable delays.
//!
//! The controller needs to let the stage settle between sending the setup
//! program and starting the generators. Tests swap in [`NoDelay`] or
//! [`RecordingDelay`] so they neither wait nor lose track of the request.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Something that can wait.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock delay backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Delay for NoDelay {
    async fn sleep(&self, _duration: Duration) {}
}

/// Records every requested duration without waiting.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    requests: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far, oldest first.
    pub fn requests(&self) -> Vec<Duration> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_delay_keeps_requests_across_clones() {
        let delay = RecordingDelay::new();
        let handle = delay.clone();
        delay.sleep(Duration::from_secs(1)).await;
        delay.sleep(Duration::from_millis(5)).await;
        assert_eq!(
            handle.requests(),
            vec![Duration::from_secs(1), Duration::from_millis(5)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_delay_waits() {
        let before = tokio::time::Instant::now();
        TokioDelay.sleep(Duration::from_secs(1)).await;
        assert!(before.elapsed() >= Duration::from_secs(1));
    }
}
