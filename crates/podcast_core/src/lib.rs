pub mod aggregator;
pub mod codec;
pub mod domain;
pub mod frame;
pub mod ports;

pub use aggregator::concat_chunks;
pub use codec::{decode, encode, CodecError, CodecResult};
pub use domain::{GenerationSession, PodcastOutput, Round, TranscriptEntry};
pub use frame::{DataType, Event, EventFrame, Message, MessageKind, MsgType, Sequence};
pub use ports::{
    Connection, Connector, FrameSink, FrameStream, InboundFrame, PortError, PortResult,
};
