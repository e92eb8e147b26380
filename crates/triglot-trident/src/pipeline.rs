//! Wires channel 0, 1, and 2 into three tasks connected by bounded queues.
//! Channels coordinate only through these queues — no shared mutable state
//! beyond each channel's own local tracker.

use crate::channel::{channel0, channel1, channel2, BipolarTracker, TridentError};
use crate::packet::{DiscriminantState, TridentPacket};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use triglot_duplex::Polarity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub queue_depth: usize,
    pub backpressure_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_depth: 64,
            backpressure_timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusEvent {
    pub sequence_token: u64,
    pub state: DiscriminantState,
}

async fn send_with_backpressure<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    timeout: Duration,
) -> Result<(), TridentError> {
    match tokio::time::timeout(timeout, tx.send(item)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(TridentError::ChannelClosed),
        Err(_) => Err(TridentError::BackpressureTimeout),
    }
}

/// A running trident pipeline: feed raw payload bytes in, receive verified
/// packets (or a structured failure) out.
pub struct Pipeline {
    inbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<Result<TridentPacket, TridentError>>>,
    consensus_rx: tokio::sync::Mutex<broadcast::Receiver<ConsensusEvent>>,
    consensus_tx: broadcast::Sender<ConsensusEvent>,
}

impl Pipeline {
    pub fn spawn(
        config: PipelineConfig,
        polarity: Polarity,
        protocol_tag: u32,
        session_key: [u8; 32],
        allowed_protocol_tags: Vec<u32>,
    ) -> Arc<Pipeline> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Vec<u8>>(config.queue_depth);
        let (ch0_to_ch1_tx, mut ch0_to_ch1_rx) = mpsc::channel::<TridentPacket>(config.queue_depth);
        let (ch1_to_ch2_tx, mut ch1_to_ch2_rx) = mpsc::channel::<TridentPacket>(config.queue_depth);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Result<TridentPacket, TridentError>>(config.queue_depth);
        let (consensus_tx, consensus_rx) = broadcast::channel(config.queue_depth.max(1));

        let sequence_counter = Arc::new(AtomicU64::new(0));
        let clock = Arc::new(AtomicU64::new(0));
        let timeout = config.backpressure_timeout;

        // Channel 0: transmitter.
        {
            let seq = sequence_counter.clone();
            let clock = clock.clone();
            let ch0_to_ch1_tx = ch0_to_ch1_tx.clone();
            tokio::spawn(async move {
                while let Some(raw) = inbound_rx.recv().await {
                    let packet = channel0(&raw, polarity, protocol_tag, &seq, &clock);
                    if send_with_backpressure(&ch0_to_ch1_tx, packet, timeout).await.is_err() {
                        tracing::warn!("channel 0 could not forward to channel 1");
                    }
                }
            });
        }

        // Channel 1: receiver.
        {
            let ch1_to_ch2_tx = ch1_to_ch2_tx.clone();
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                let tracker = BipolarTracker::new();
                while let Some(packet) = ch0_to_ch1_rx.recv().await {
                    match channel1(packet, &tracker) {
                        Ok(next) => {
                            if send_with_backpressure(&ch1_to_ch2_tx, next, timeout).await.is_err() {
                                tracing::warn!("channel 1 could not forward to channel 2");
                            }
                        }
                        Err(e) => {
                            let _ = outbound_tx.send(Err(e)).await;
                        }
                    }
                }
            });
        }

        // Channel 2: verifier.
        {
            let outbound_tx = outbound_tx.clone();
            let consensus_tx = consensus_tx.clone();
            tokio::spawn(async move {
                while let Some(packet) = ch1_to_ch2_rx.recv().await {
                    let sequence_token = packet.header.sequence_token;
                    match channel2(packet, &session_key, &allowed_protocol_tags) {
                        Ok((verified, state)) => {
                            let _ = consensus_tx.send(ConsensusEvent { sequence_token, state });
                            let _ = outbound_tx.send(Ok(verified)).await;
                        }
                        Err(e) => {
                            let _ = outbound_tx.send(Err(e)).await;
                        }
                    }
                }
            });
        }

        Arc::new(Pipeline {
            inbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            consensus_rx: tokio::sync::Mutex::new(consensus_rx),
            consensus_tx,
        })
    }

    pub async fn submit(&self, payload: Vec<u8>, timeout: Duration) -> Result<(), TridentError> {
        send_with_backpressure(&self.inbound_tx, payload, timeout).await
    }

    pub async fn recv(&self) -> Option<Result<TridentPacket, TridentError>> {
        self.outbound_rx.lock().await.recv().await
    }

    pub fn subscribe_consensus(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.consensus_tx.subscribe()
    }

    /// Drain the next consensus event using the pipeline's own default
    /// subscription (convenience for tests and simple callers).
    pub async fn recv_consensus(&self) -> Option<ConsensusEvent> {
        self.consensus_rx.lock().await.recv().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        triglot_hash::derive_key(b"pipeline-test-key")
    }

    #[tokio::test]
    async fn pipeline_delivers_a_verified_packet() {
        let pipeline = Pipeline::spawn(
            PipelineConfig::default(),
            Polarity::A,
            7,
            key(),
            vec![7],
        );

        pipeline
            .submit(b"hello trident".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();

        let result = pipeline.recv().await.expect("pipeline closed unexpectedly");
        let packet = result.expect("packet should verify cleanly");
        assert_eq!(packet.verification.rwx_flags, 0x07);
        assert_eq!(packet.topology.wheel_position, 240);
    }

    #[tokio::test]
    async fn pipeline_rejects_disallowed_protocol_tag() {
        let pipeline = Pipeline::spawn(
            PipelineConfig::default(),
            Polarity::B,
            42,
            key(),
            vec![1, 2, 3],
        );

        pipeline
            .submit(b"payload".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();

        let result = pipeline.recv().await.expect("pipeline closed unexpectedly");
        assert_eq!(result.unwrap_err(), TridentError::UnknownProtocolTag(42));
    }

    #[tokio::test]
    async fn pipeline_emits_a_consensus_event_per_verified_packet() {
        let pipeline = Pipeline::spawn(PipelineConfig::default(), Polarity::A, 1, key(), vec![1]);
        let mut sub = pipeline.subscribe_consensus();

        pipeline
            .submit(b"watch the wheel turn".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();

        let _ = pipeline.recv().await.unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.sequence_token, 0);
    }
}
