//! An in-process, in-memory [`Transport`] pair, used by tests and by any
//! caller that wants two coordinators talking to each other without a real
//! socket. Grounded on the teacher's `MemTransport` (paired `mpsc` channels,
//! one per direction, with a shared closed flag).

use crate::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const CHANNEL_CAPACITY: usize = 64;

struct Inner {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: AtomicBool,
}

pub struct MemTransport {
    inner: Arc<Inner>,
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Inner {
            tx: tx_b,
            rx: Mutex::new(rx_a),
            closed: AtomicBool::new(false),
        };
        let b = Inner {
            tx: tx_a,
            rx: Mutex::new(rx_b),
            closed: AtomicBool::new(false),
        };

        (
            MemTransport { inner: Arc::new(a) },
            MemTransport { inner: Arc::new(b) },
        )
    }
}

impl Transport for MemTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> std::io::Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "transport closed"));
        }
        self.inner
            .tx
            .send(bytes)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    async fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        let mut rx = self.inner.rx.lock().await;
        match rx.recv().await {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

impl Clone for MemTransport {
    fn clone(&self) -> Self {
        MemTransport { inner: self.inner.clone() }
    }
}
