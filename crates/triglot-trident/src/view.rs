//! A serde-derived textual projection of a [`TridentPacket`], used only by
//! diagnostic endpoints. This is explicitly not the wire encoding — the
//! cross-language wire format is the tagged byte-oriented one described
//! alongside the packet's data model; this view exists purely so a packet
//! can be logged or inspected as JSON.

use crate::packet::TridentPacket;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TridentPacketView {
    pub channel_id: u8,
    pub sequence_token: u64,
    pub timestamp: u64,
    pub codec_version: u8,
    pub polarity: String,
    pub content_hash_hex: String,
    pub content_length: u32,
    pub rwx_flags: u8,
    pub consensus_signature_hex: Option<String>,
    pub protocol_tag: u32,
    pub next_channel: u8,
    pub prev_channel: u8,
    pub wheel_position: u16,
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl From<&TridentPacket> for TridentPacketView {
    fn from(packet: &TridentPacket) -> Self {
        TridentPacketView {
            channel_id: packet.header.channel_id,
            sequence_token: packet.header.sequence_token,
            timestamp: packet.header.timestamp,
            codec_version: packet.header.codec_version,
            polarity: match packet.header.polarity {
                triglot_duplex::Polarity::A => "A".to_string(),
                triglot_duplex::Polarity::B => "B".to_string(),
            },
            content_hash_hex: to_hex(&packet.payload.content_hash),
            content_length: packet.payload.content_length,
            rwx_flags: packet.verification.rwx_flags,
            consensus_signature_hex: packet.verification.consensus_signature.map(|s| to_hex(&s)),
            protocol_tag: packet.verification.protocol_tag,
            next_channel: packet.topology.next_channel,
            prev_channel: packet.topology.prev_channel,
            wheel_position: packet.topology.wheel_position,
        }
    }
}

impl TridentPacketView {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel0;
    use std::sync::atomic::AtomicU64;
    use triglot_duplex::Polarity;

    #[test]
    fn view_serializes_to_json() {
        let seq = AtomicU64::new(0);
        let clock = AtomicU64::new(0);
        let packet = channel0(b"ping", Polarity::A, 5, &seq, &clock);
        let view = TridentPacketView::from(&packet);
        let json = view.to_json().unwrap();
        assert!(json.contains("\"protocol_tag\":5"));
        assert!(json.contains("\"polarity\":\"A\""));
    }
}
