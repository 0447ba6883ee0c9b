//! The `Transport` trait: an abstract byte-stream boundary a connection
//! reads and writes whole frames through. Because a conduit connection is
//! driven by a single cooperative task, one trait with two async methods
//! is enough — no separate recv/send task pair or split read/write half
//! types are needed at this layer.
//!
//! A `Transport` deals in whole frames: each call to [`Transport::read_frame`]
//! or [`Transport::write_frame`] carries exactly one
//! `size16 channelId | payload` blob (§6). Framing the underlying byte
//! stream (length-prefixing, WebSocket message boundaries, ...) is the
//! transport's own concern; `conduit` never sees raw bytes.

use async_trait::async_trait;

use crate::error::ChannelError;

/// An established duplex connection capable of exchanging whole frames.
/// `conduit-tcp` implements this over a `tokio::net::TcpStream`; any other
/// concrete collaborator (WebSocket, in-memory duplex, ...) implements it
/// the same way.
#[async_trait]
pub trait Transport: Send {
    /// Read the next complete frame, or `Ok(None)` on a clean EOF.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;

    /// Write one complete frame.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError>;
}
