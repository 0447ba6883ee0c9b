//! A [`Transport`] over `tokio::net::TcpStream`, driven entirely from a
//! single `async_trait` object that `conduit::MultiplexedConnection::run`
//! can own outright rather than a separate recv/send task pair.
//!
//! `conduit`'s own [`conduit_common::messages::write_frame`] already prefixes
//! every payload with its `size16 channelId`; what is missing for a raw TCP
//! byte stream is an outer length prefix so a reader knows where one such
//! frame ends and the next begins. `conduit-tcp` adds exactly that: a
//! `size32` big-endian byte count ahead of each frame, keeping with
//! conduit's big-endian wire format throughout.

use std::net::SocketAddr;

use async_trait::async_trait;
use conduit::{ChannelError, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

/// Tunables for a TCP-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct TcpSettings {
    /// Maximum frame size in bytes; a peer that sends a larger length
    /// prefix is treated as a transport error rather than read into an
    /// unbounded buffer.
    ///
    /// ## Default
    /// 10MiB.
    pub max_frame_length: usize,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            max_frame_length: 10 * 1024 * 1024,
        }
    }
}

/// A [`Transport`] over one accepted or connected `TcpStream`.
pub struct TcpTransport {
    stream: TcpStream,
    settings: TcpSettings,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, settings: TcpSettings) -> Self {
        Self { stream, settings }
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Connect out to `addr`, the client-side counterpart of
    /// [`TcpAcceptor::accept`].
    pub async fn connect(addr: SocketAddr, settings: TcpSettings) -> Result<Self, ChannelError> {
        debug!(%addr, "connecting");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        stream.set_nodelay(true).ok();
        debug!(%addr, "connected");
        Ok(Self::new(stream, settings))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(ChannelError::Transport(err.to_string())),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.settings.max_frame_length {
            return Err(ChannelError::Transport(format!(
                "frame of {len} bytes exceeds max_frame_length {}",
                self.settings.max_frame_length
            )));
        }
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        trace!(len, "read frame");
        Ok(Some(buf))
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        if frame.len() > self.settings.max_frame_length {
            return Err(ChannelError::Transport(format!(
                "frame of {} bytes exceeds max_frame_length {}",
                frame.len(),
                self.settings.max_frame_length
            )));
        }
        let mut out = Vec::with_capacity(4 + frame.len());
        out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        out.extend_from_slice(frame);
        self.stream
            .write_all(&out)
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        trace!(len = frame.len(), "wrote frame");
        Ok(())
    }
}

/// Binds a listening socket and hands out one [`TcpTransport`] per accepted
/// connection, the server-side counterpart of [`TcpTransport::connect`].
pub struct TcpAcceptor {
    listener: TcpListener,
    settings: TcpSettings,
}

impl TcpAcceptor {
    pub async fn bind(addr: SocketAddr, settings: TcpSettings) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        Ok(Self { listener, settings })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept the next inbound connection. Returning an error here means
    /// the listening socket itself failed, not that one peer misbehaved.
    pub async fn accept(&self) -> Result<(TcpTransport, SocketAddr), ChannelError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        stream.set_nodelay(true).ok();
        debug!(%addr, "accepted connection");
        Ok((TcpTransport::new(stream, self.settings.clone()), addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::messages::{read_frame, write_frame};

    #[tokio::test]
    async fn frame_roundtrips_over_a_real_socket() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), TcpSettings::default())
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut transport, _) = acceptor.accept().await.unwrap();
            let frame = transport.read_frame().await.unwrap().unwrap();
            let (channel_id, payload) = read_frame(&frame).unwrap();
            assert_eq!(channel_id, 3);
            assert_eq!(payload, b"hello");
            assert!(transport.read_frame().await.unwrap().is_none());
        });

        let mut client = TcpTransport::connect(addr, TcpSettings::default()).await.unwrap();
        client.write_frame(&write_frame(3, b"hello")).await.unwrap();
        drop(client);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocating() {
        let acceptor = TcpAcceptor::bind(
            "127.0.0.1:0".parse().unwrap(),
            TcpSettings { max_frame_length: 4 },
        )
        .await
        .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut transport, _) = acceptor.accept().await.unwrap();
            let err = transport.read_frame().await.unwrap_err();
            assert!(matches!(err, ChannelError::Transport(_)));
        });

        let mut client = TcpTransport::connect(addr, TcpSettings::default()).await.unwrap();
        client.write_frame(&write_frame(1, b"too long")).await.unwrap();

        server.await.unwrap();
    }

    #[tokio::test]
    async fn clean_disconnect_before_any_bytes_is_eof() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), TcpSettings::default())
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut transport, _) = acceptor.accept().await.unwrap();
            assert!(transport.read_frame().await.unwrap().is_none());
        });

        let client = TcpTransport::connect(addr, TcpSettings::default()).await.unwrap();
        drop(client);

        server.await.unwrap();
    }
}
