//! End-to-end meta-channel scenarios driven over an in-memory duplex pipe,
//! per SPEC_FULL's ambient test-tooling note (no real sockets needed to
//! exercise the multiplexer).

use std::sync::Arc;

use async_trait::async_trait;
use conduit::{
    AllowAllValidator, ChannelAcceptor, ChannelError, ChannelSender, ChannelSettings,
    MultiplexedConnection, Transport,
};
use conduit_common::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Adapts a raw byte-stream half of `tokio::io::duplex` into [`Transport`]
/// by adding a `u32` length prefix around each frame — the concern a real
/// streaming transport (`conduit-tcp`) also owns, kept here minimal for
/// tests.
struct DuplexTransport(DuplexStream);

#[async_trait]
impl Transport for DuplexTransport {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut len_buf = [0u8; 4];
        match self.0.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ChannelError::Transport(e.to_string())),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.0
            .read_exact(&mut buf)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Some(buf))
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        let len = (frame.len() as u32).to_be_bytes();
        self.0
            .write_all(&len)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.0
            .write_all(frame)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

struct EchoAcceptor;

#[async_trait]
impl ChannelAcceptor for EchoAcceptor {
    async fn accept(
        self: Arc<Self>,
        _cpath: Path,
        _local_id: u16,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        outbound: ChannelSender,
    ) -> Result<(), String> {
        tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                let _ = outbound.send(payload).await;
            }
        });
        Ok(())
    }
}

fn pair() -> (DuplexTransport, DuplexTransport) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (DuplexTransport(a), DuplexTransport(b))
}

/// Best-effort `tracing` output for these tests, gated by `RUST_LOG` —
/// quiet by default, verbose on demand (`RUST_LOG=debug cargo test`).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn auth_then_open_channel_round_trips_payload() {
    init_tracing();
    let (client_io, server_io) = pair();

    let client = MultiplexedConnection::new(
        Box::new(client_io),
        ChannelSettings::default(),
        AllowAllValidator,
    );
    let server = MultiplexedConnection::new(
        Box::new(server_io),
        ChannelSettings::default(),
        AllowAllValidator,
    );
    server.register_acceptor("echo", Arc::new(EchoAcceptor));

    let client_run = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });
    let server_run = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    client.authenticate("password", "hunter2").await.unwrap();
    assert!(client.is_authed().await);

    let (sender, mut inbound) = client
        .open_channel("echo", Path::root().child("rooms"))
        .await
        .unwrap();

    sender.send(b"hello".to_vec()).await.unwrap();
    let echoed = inbound.recv().await.unwrap();
    assert_eq!(echoed, b"hello");

    drop(client);
    drop(server);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), client_run).await;
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), server_run).await;
}

#[tokio::test]
async fn open_with_unknown_ctype_fails() {
    init_tracing();
    let (client_io, server_io) = pair();

    let client = MultiplexedConnection::new(
        Box::new(client_io),
        ChannelSettings::default(),
        AllowAllValidator,
    );
    let server = MultiplexedConnection::new(
        Box::new(server_io),
        ChannelSettings::default(),
        AllowAllValidator,
    );

    let client_run = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });
    let server_run = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    let result = client.open_channel("nonexistent", Path::root()).await;
    assert!(result.is_err());

    drop(client);
    drop(server);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), client_run).await;
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), server_run).await;
}

#[tokio::test]
async fn closing_a_channel_fails_subsequent_sends() {
    init_tracing();
    let (client_io, server_io) = pair();

    let client = MultiplexedConnection::new(
        Box::new(client_io),
        ChannelSettings::default(),
        AllowAllValidator,
    );
    let server = MultiplexedConnection::new(
        Box::new(server_io),
        ChannelSettings::default(),
        AllowAllValidator,
    );
    server.register_acceptor("echo", Arc::new(EchoAcceptor));

    let client_run = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });
    let server_run = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    let (sender, _inbound) = client
        .open_channel("echo", Path::root().child("rooms"))
        .await
        .unwrap();

    sender.send(b"before close".to_vec()).await.unwrap();
    sender.close().await.unwrap();

    let err = sender.send(b"after close".to_vec()).await.unwrap_err();
    assert!(matches!(err, ChannelError::ChannelNotOpen { .. }));

    drop(client);
    drop(server);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), client_run).await;
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), server_run).await;
}

#[tokio::test]
async fn opening_past_max_channels_is_refused_on_both_sides() {
    init_tracing();
    let (client_io, server_io) = pair();

    let settings = ChannelSettings {
        max_channels: 1,
        ..ChannelSettings::default()
    };
    let client = MultiplexedConnection::new(Box::new(client_io), settings.clone(), AllowAllValidator);
    let server = MultiplexedConnection::new(Box::new(server_io), settings, AllowAllValidator);
    server.register_acceptor("echo", Arc::new(EchoAcceptor));

    let client_run = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });
    let server_run = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    let (_sender, _inbound) = client
        .open_channel("echo", Path::root().child("rooms"))
        .await
        .unwrap();

    // The client's own table is already at its configured max, so a
    // second `open_channel` is refused locally without a round trip.
    let err = client.open_channel("echo", Path::root().child("rooms")).await.unwrap_err();
    assert!(matches!(err, ChannelError::TooManyChannels { max_channels: 1 }));

    drop(client);
    drop(server);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), client_run).await;
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), server_run).await;
}
