//! Trident pipeline: three sequential channels (transmitter, receiver,
//! verifier) advancing a W→R→X permission-bit chain and a 0°→120°→240°
//! wheel position, connected by bounded queues with backpressure.

mod channel;
mod packet;
mod pipeline;
mod repair;
mod view;

pub use channel::{Bipolar, BipolarTracker, TridentError};
pub use packet::{
    discriminant, set_bit_fraction, ChannelId, DiscriminantState, Header, Payload, Topology,
    TridentPacket, Verification, CODEC_VERSION, RWX_EXEC, RWX_FULL, RWX_READ, RWX_WRITE,
};
pub use pipeline::{ConsensusEvent, Pipeline, PipelineConfig};
pub use repair::repair;
pub use view::TridentPacketView;
