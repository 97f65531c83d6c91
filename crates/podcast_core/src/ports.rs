//! crates/podcast_core/src/ports.rs
//!
//! Defines the transport contract the generation logic is written against.
//! A transport carries opaque byte frames in both directions over one
//! full-duplex connection; it knows nothing about the framing inside them.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// Errors raised by transport implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// The connection could not be established or dropped unexpectedly.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The connection was already closed when the operation was attempted.
    #[error("Connection closed")]
    Closed,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Frames
//=========================================================================================

/// One inbound unit as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Binary(Bytes),
    /// Text frames are fed through the same decoder as binary ones.
    Text(String),
    /// Ping, pong and other control traffic.
    Control,
    /// The peer closed the connection.
    Close,
}

/// The ordered stream of inbound frames for one connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = PortResult<InboundFrame>> + Send>>;

/// An open connection: the outbound half and the inbound stream.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub frames: FrameStream,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait FrameSink: Send {
    /// Sends one binary frame.
    async fn send(&mut self, frame: Bytes) -> PortResult<()>;

    /// Closes the outbound half. Closing twice is not an error.
    async fn close(&mut self) -> PortResult<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a fresh connection. Failures are reported, never retried here.
    async fn connect(&self) -> PortResult<Connection>;
}
