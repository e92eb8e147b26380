//! Per-channel processing. Each function is a pure transform from an
//! incoming packet (or, for channel 0, raw payload bytes) to an outgoing
//! packet — the pipeline wires these together with bounded queues.

use crate::packet::{
    classify, discriminant, set_bit_fraction, ChannelId, DiscriminantState, Header, Payload,
    Topology, TridentPacket, Verification, CODEC_VERSION, RWX_EXEC, RWX_FULL, RWX_READ, RWX_WRITE,
};
use crate::repair::repair;
use std::f64::consts::PI;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use triglot_duplex::{decode, encode, Encoded, Polarity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TridentError {
    HashMismatch,
    PermissionChainViolation { expected: u8, actual: u8 },
    WrongChannel { expected: u8, actual: u8 },
    WrongWheelPosition { expected: u16, actual: u16 },
    UnknownProtocolTag(u32),
    BackpressureTimeout,
    ChannelClosed,
}

impl fmt::Display for TridentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TridentError::HashMismatch => write!(f, "decoded payload does not match content_hash"),
            TridentError::PermissionChainViolation { expected, actual } => write!(
                f,
                "rwx_flags {actual:#04x} do not match required {expected:#04x} on entry"
            ),
            TridentError::WrongChannel { expected, actual } => {
                write!(f, "packet channel_id {actual} does not match channel {expected}")
            }
            TridentError::WrongWheelPosition { expected, actual } => write!(
                f,
                "wheel_position {actual} does not match expected {expected}"
            ),
            TridentError::UnknownProtocolTag(tag) => write!(f, "protocol tag {tag} is not allowed"),
            TridentError::BackpressureTimeout => write!(f, "downstream queue did not drain in time"),
            TridentError::ChannelClosed => write!(f, "a pipeline channel closed unexpectedly"),
        }
    }
}

impl std::error::Error for TridentError {}

/// Channel 0 (Transmitter): hashes and duplex-encodes a raw payload into a
/// fresh packet at wheel position 0 with the W permission bit set.
pub fn channel0(
    raw_payload: &[u8],
    polarity: Polarity,
    protocol_tag: u32,
    sequence_counter: &AtomicU64,
    clock: &AtomicU64,
) -> TridentPacket {
    let content_hash = triglot_hash::digest(raw_payload);
    let encoded: Encoded = encode(raw_payload, polarity);
    let sequence_token = sequence_counter.fetch_add(1, Ordering::Relaxed);
    let timestamp = clock.fetch_add(1, Ordering::Relaxed);

    TridentPacket {
        header: Header {
            channel_id: ChannelId::Transmitter as u8,
            sequence_token,
            timestamp,
            codec_version: CODEC_VERSION,
            polarity,
            odd_input_len: encoded.odd_input_len(),
        },
        payload: Payload {
            content_hash,
            content_length: encoded.bytes().len() as u32,
            content: encoded.bytes().to_vec(),
        },
        verification: Verification {
            rwx_flags: RWX_WRITE,
            consensus_signature: None,
            protocol_tag,
        },
        topology: Topology {
            next_channel: ChannelId::Receiver as u8,
            prev_channel: ChannelId::Transmitter as u8,
            wheel_position: 0,
        },
    }
}

/// Tracks channel 1's local bipolar (ORDER/CHAOS) state across packets,
/// toggled by `sequence_token` parity. This state belongs to the channel,
/// not the packet.
#[derive(Debug, Default)]
pub struct BipolarTracker {
    chaos: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bipolar {
    Order,
    Chaos,
}

impl BipolarTracker {
    pub fn new() -> Self {
        BipolarTracker {
            chaos: AtomicU8::new(0),
        }
    }

    /// Advance the tracker for `sequence_token`, returning the new state and
    /// whether it actually flipped from the previous one.
    pub fn observe(&self, sequence_token: u64) -> (Bipolar, bool) {
        let is_odd = sequence_token % 2 == 1;
        let target = if is_odd { 1u8 } else { 0u8 };
        let previous = self.chaos.swap(target, Ordering::Relaxed);
        let state = if target == 1 { Bipolar::Chaos } else { Bipolar::Order };
        (state, previous != target)
    }
}

/// Channel 1 (Receiver): verifies the duplex-decoded payload hash, toggles
/// the bipolar tracker, and advances the packet to wheel position 120 with
/// the R permission bit set.
pub fn channel1(
    mut packet: TridentPacket,
    tracker: &BipolarTracker,
) -> Result<TridentPacket, TridentError> {
    if packet.header.channel_id != ChannelId::Transmitter as u8 {
        return Err(TridentError::WrongChannel {
            expected: ChannelId::Transmitter as u8,
            actual: packet.header.channel_id,
        });
    }
    if packet.topology.wheel_position != 0 {
        return Err(TridentError::WrongWheelPosition {
            expected: 0,
            actual: packet.topology.wheel_position,
        });
    }

    let encoded = Encoded::from_parts(packet.payload.content.clone(), packet.header.odd_input_len);
    let decoded = decode(&encoded, packet.header.polarity);
    let actual_hash = triglot_hash::digest(&decoded);
    if actual_hash != packet.payload.content_hash {
        return Err(TridentError::HashMismatch);
    }

    let (state, flipped) = tracker.observe(packet.header.sequence_token);
    if flipped {
        tracing::debug!(?state, sequence_token = packet.header.sequence_token, "bipolar state transition");
    }

    packet.header.channel_id = ChannelId::Receiver as u8;
    packet.verification.rwx_flags |= RWX_READ;
    packet.topology.wheel_position = 120;
    packet.topology.prev_channel = ChannelId::Receiver as u8;
    packet.topology.next_channel = ChannelId::Verifier as u8;
    Ok(packet)
}

/// Channel 2 (Verifier): requires the W|R bits, computes the consensus
/// discriminant (repairing once if it lands in CHAOS), checks the protocol
/// tag, signs, and sets the final X bit.
pub fn channel2(
    mut packet: TridentPacket,
    session_key: &[u8; 32],
    allowed_protocol_tags: &[u32],
) -> Result<(TridentPacket, DiscriminantState), TridentError> {
    if packet.header.channel_id != ChannelId::Receiver as u8 {
        return Err(TridentError::WrongChannel {
            expected: ChannelId::Receiver as u8,
            actual: packet.header.channel_id,
        });
    }
    if packet.verification.rwx_flags != (RWX_WRITE | RWX_READ) {
        return Err(TridentError::PermissionChainViolation {
            expected: RWX_WRITE | RWX_READ,
            actual: packet.verification.rwx_flags,
        });
    }
    if packet.topology.wheel_position != 120 {
        return Err(TridentError::WrongWheelPosition {
            expected: 120,
            actual: packet.topology.wheel_position,
        });
    }

    let mut state = compute_discriminant_state(&packet);
    if state == DiscriminantState::Chaos {
        let repaired = repair(&packet.payload.content, packet.header.polarity);
        packet.payload.content = repaired;
        packet.payload.content_length = packet.payload.content.len() as u32;
        state = compute_discriminant_state(&packet);
    }

    if !allowed_protocol_tags.contains(&packet.verification.protocol_tag) {
        return Err(TridentError::UnknownProtocolTag(packet.verification.protocol_tag));
    }

    let to_sign = serialize_for_signature(&packet);
    let signature = triglot_hash::mac(session_key, &to_sign);

    packet.header.channel_id = ChannelId::Verifier as u8;
    packet.verification.rwx_flags |= RWX_EXEC;
    packet.verification.consensus_signature = Some(signature);
    packet.topology.wheel_position = 240;
    packet.topology.prev_channel = ChannelId::Verifier as u8;
    packet.topology.next_channel = ChannelId::Verifier as u8;

    debug_assert_eq!(packet.verification.rwx_flags, RWX_FULL);
    Ok((packet, state))
}

fn compute_discriminant_state(packet: &TridentPacket) -> DiscriminantState {
    let consensus = (set_bit_fraction(&packet.payload.content)
        + (packet.topology.wheel_position as f64 * PI / 180.0).sin())
    .abs()
        / 2.0;
    classify(discriminant(consensus))
}

/// Byte concatenation of every packet field except the consensus signature,
/// used as the MAC input.
fn serialize_for_signature(packet: &TridentPacket) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(packet.header.channel_id);
    buf.extend_from_slice(&packet.header.sequence_token.to_be_bytes());
    buf.extend_from_slice(&packet.header.timestamp.to_be_bytes());
    buf.push(packet.header.codec_version);
    buf.push(match packet.header.polarity {
        Polarity::A => 0,
        Polarity::B => 1,
    });
    buf.push(packet.header.odd_input_len as u8);
    buf.extend_from_slice(&packet.payload.content_hash);
    buf.extend_from_slice(&packet.payload.content_length.to_be_bytes());
    buf.extend_from_slice(&packet.payload.content);
    buf.push(packet.verification.rwx_flags);
    buf.extend_from_slice(&packet.verification.protocol_tag.to_be_bytes());
    buf.push(packet.topology.next_channel);
    buf.push(packet.topology.prev_channel);
    buf.extend_from_slice(&packet.topology.wheel_position.to_be_bytes());
    buf
}
