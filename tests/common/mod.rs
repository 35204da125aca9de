//! Scripted stand-in for the motion controller.
//!
//! Records every line it receives and answers each `ERR?` with the next
//! scripted code, falling back to `0` once the script is exhausted.

#![allow(dead_code)]

use pi_scan::protocol::CommandProtocol;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;

pub struct FakeController {
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeController {
    /// Protocol wired to a fake answering `ERR?` with `replies` in order.
    pub fn start(replies: &[&str]) -> (CommandProtocol, Self) {
        let (host, device) = tokio::io::duplex(64 * 1024);
        let fake = Self::serve(device, replies, None);
        (CommandProtocol::from_stream(host, "fake-e727"), fake)
    }

    /// Like [`FakeController::start`], but the first `ERR?` answer is held
    /// back until the returned sender fires.
    pub fn start_gated(replies: &[&str]) -> (CommandProtocol, Self, oneshot::Sender<()>) {
        let (host, device) = tokio::io::duplex(64 * 1024);
        let (release, gate) = oneshot::channel();
        let fake = Self::serve(device, replies, Some(gate));
        (CommandProtocol::from_stream(host, "fake-e727"), fake, release)
    }

    fn serve(device: DuplexStream, replies: &[&str], gate: Option<oneshot::Receiver<()>>) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let mut replies: VecDeque<String> = replies.iter().map(|r| r.to_string()).collect();

        tokio::spawn(async move {
            let mut gate = gate;
            let (read, mut write) = tokio::io::split(device);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let is_query = line == "ERR?";
                log.lock().unwrap().push(line);
                if is_query {
                    if let Some(gate) = gate.take() {
                        let _ = gate.await;
                    }
                    let code = replies.pop_front().unwrap_or_else(|| "0".to_string());
                    if write.write_all(format!("{code}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self { received }
    }

    /// Every line received so far.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Number of `ERR?` queries received so far.
    pub fn queries(&self) -> usize {
        self.received().iter().filter(|l| *l == "ERR?").count()
    }

    /// Wait until `count` `ERR?` queries have arrived.
    pub async fn wait_for_queries(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.queries() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fake controller never saw the expected ERR? queries");
    }
}
