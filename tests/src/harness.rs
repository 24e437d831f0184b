//! Scripted server for driving a real [`Connection`] over an in-memory pipe.
//!
//! The test plays the server: it reads what the client wrote and writes
//! whatever replies the scenario calls for, in whatever order.

use nodetree_client::{AuthKey, ClientConfig, Connection, ConnectionState};
use nodetree_proto::{encode, FrameDecoder, Message, PROTO_VERSION};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Upper bound for any single wait in a test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Auth key used by [`connected_pair`].
pub const TEST_KEY_HEX: &str = "c0ffee";

/// Server end of an in-memory connection.
pub struct ScriptedServer {
    stream: DuplexStream,
    decoder: FrameDecoder,
    buf: Vec<u8>,
    /// The 64-byte credential the client wrote first.
    pub credential: [u8; 64],
    /// The client's `connect` message.
    pub hello: Message,
}

impl ScriptedServer {
    /// Accept the client's credential and `connect`.
    pub async fn accept(mut stream: DuplexStream) -> Self {
        let mut credential = [0u8; 64];
        tokio::time::timeout(STEP_TIMEOUT, stream.read_exact(&mut credential))
            .await
            .expect("credential timed out")
            .expect("credential read failed");

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 8 * 1024];
        let hello = read_message(&mut stream, &mut decoder, &mut buf, STEP_TIMEOUT)
            .await
            .expect("client sent no connect");

        Self {
            stream,
            decoder,
            buf,
            credential,
            hello,
        }
    }

    /// Next message from the client; panics after [`STEP_TIMEOUT`].
    pub async fn recv(&mut self) -> Message {
        self.recv_within(STEP_TIMEOUT)
            .await
            .expect("client sent nothing in time")
    }

    /// Next message from the client, or `None` if nothing arrives in time
    /// or the client hung up.
    pub async fn recv_within(&mut self, limit: Duration) -> Option<Message> {
        read_message(&mut self.stream, &mut self.decoder, &mut self.buf, limit).await
    }

    pub async fn send(&mut self, msg: Message) {
        let bytes = encode(&msg).expect("encode");
        self.send_raw(&bytes).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("server write");
        self.stream.flush().await.expect("server flush");
    }
}

async fn read_message(
    stream: &mut DuplexStream,
    decoder: &mut FrameDecoder,
    buf: &mut [u8],
    limit: Duration,
) -> Option<Message> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Some(msg) = decoder.decode_next().expect("client sent garbage") {
            return Some(msg);
        }
        match tokio::time::timeout_at(deadline, stream.read(buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
            Ok(Ok(n)) => decoder.feed(&buf[..n]),
        }
    }
}

/// Test configuration with a short handshake deadline.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        client_name: "nodetree-tests".into(),
        handshake_timeout_ms: 2_000,
        ..ClientConfig::default()
    }
}

/// The `connected` reply the scripted server sends.
pub fn connected() -> Message {
    Message::Connected {
        proto_version: PROTO_VERSION,
        server_name: "scripted".into(),
        server_version: "0.0.0".into(),
    }
}

/// A client connection that has completed the handshake, and its server.
pub async fn connected_pair() -> (Connection, ScriptedServer) {
    connected_pair_with(test_config()).await
}

pub async fn connected_pair_with(config: ClientConfig) -> (Connection, ScriptedServer) {
    nodetree_telemetry::init_test_logging();

    let (client, server) = tokio::io::duplex(256 * 1024);
    let key = AuthKey::from_hex(TEST_KEY_HEX).expect("test key");
    let establish = tokio::spawn(async move { Connection::establish(client, &key, config).await });

    let mut server = ScriptedServer::accept(server).await;
    server.send(connected()).await;

    let conn = tokio::time::timeout(STEP_TIMEOUT, establish)
        .await
        .expect("handshake timed out")
        .expect("establish task panicked")
        .expect("handshake failed");
    (conn, server)
}

/// Wait until the connection reaches `Closed` or `Failed`.
pub async fn terminal_state(conn: &Connection) -> ConnectionState {
    let mut states = conn.watch_state();
    let state = tokio::time::timeout(STEP_TIMEOUT, states.wait_for(|s| s.is_terminal()))
        .await
        .expect("connection never terminated")
        .expect("state channel closed")
        .clone();
    state
}

/// Poll `check` until it holds, panicking after [`STEP_TIMEOUT`].
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_completes_handshake() {
        let (conn, server) = connected_pair().await;

        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(&server.credential[..3], &[0xc0, 0xff, 0xee]);
        assert!(matches!(server.hello, Message::Connect { .. }));
        assert_eq!(conn.server_info().unwrap().name, "scripted");
    }
}
