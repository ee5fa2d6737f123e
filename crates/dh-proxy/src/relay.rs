//! Relay loop between the client link and the real server link
//!
//! One task services both directions. Each iteration waits until either
//! socket has bytes or EOF queued (or the idle deadline passes), reads one complete
//! frame from the ready side, and handles it before looking again, so frames
//! in one direction are forwarded strictly in arrival order.

use crate::capture::{CaptureError, CaptureLogs};
use crate::handshake::LinkKeys;
use crate::intercept::Transform;
use dhlink_core::SessionKey;
use dhlink_net::framing::{self, FrameError};
use dhlink_net::wire::{read_frame, write_frame};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Bytes of plaintext shown in debug logs
const PREVIEW_LEN: usize = 100;

/// One of the two links of a relayed connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

/// Relay errors; every variant ends the connection
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Read from {side} failed: {source}")]
    Read { side: Side, source: FrameError },
    #[error("Read from {side} timed out after {secs}s")]
    ReadTimeout { side: Side, secs: u64 },
    #[error("Forward to {side} failed: {source}")]
    Write { side: Side, source: FrameError },
    #[error("Write to {side} timed out after {secs}s")]
    WriteTimeout { side: Side, secs: u64 },
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection relay settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaySettings {
    /// Close after this long without a forwarded frame
    pub idle_timeout: Duration,
    /// Bound on each frame read and each forward write
    pub io_timeout: Duration,
    /// Close after this many forwarded frames (`None` = unlimited)
    pub max_messages: Option<u64>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(10),
            max_messages: None,
        }
    }
}

/// Why a relay ended without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// No frame forwarded within the idle window
    IdleTimeout,
    /// Client closed its socket between frames
    ClientClosed,
    /// Real server closed its socket between frames
    ServerClosed,
    /// `max_messages` frames were forwarded
    MessageLimit,
}

/// Result of a completed relay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayOutcome {
    pub reason: CloseReason,
    pub messages_forwarded: u64,
}

/// State of one relayed connection
pub struct RelaySession {
    client: TcpStream,
    server: TcpStream,
    key_to_client: SessionKey,
    key_to_server: SessionKey,
    transform: Arc<dyn Transform>,
    capture: Arc<CaptureLogs>,
    settings: RelaySettings,
    last_activity: Instant,
    messages_forwarded: u64,
}

impl RelaySession {
    pub fn new(
        client: TcpStream,
        server: TcpStream,
        keys: LinkKeys,
        transform: Arc<dyn Transform>,
        capture: Arc<CaptureLogs>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            client,
            server,
            key_to_client: keys.client,
            key_to_server: keys.server,
            transform,
            capture,
            settings,
            last_activity: Instant::now(),
            messages_forwarded: 0,
        }
    }

    /// Frames forwarded so far, in either direction
    pub fn messages_forwarded(&self) -> u64 {
        self.messages_forwarded
    }

    /// Run until idle timeout, clean EOF, message limit, or a fatal error.
    ///
    /// Both sockets are closed when the session is dropped at the end.
    pub async fn run(mut self) -> Result<RelayOutcome, RelayError> {
        debug!("Entered relay loop");
        self.last_activity = Instant::now();

        loop {
            if let Some(max) = self.settings.max_messages {
                if self.messages_forwarded >= max {
                    info!("Forwarded {} messages, closing relay", max);
                    return Ok(self.outcome(CloseReason::MessageLimit));
                }
            }

            // peek only completes once bytes (or EOF) are queued, and consumes nothing
            let idle_deadline = self.last_activity + self.settings.idle_timeout;
            let mut client_probe = [0u8; 1];
            let mut server_probe = [0u8; 1];
            let side = tokio::select! {
                ready = self.client.peek(&mut client_probe) => {
                    ready?;
                    Side::Client
                }
                ready = self.server.peek(&mut server_probe) => {
                    ready?;
                    Side::Server
                }
                _ = sleep_until(idle_deadline) => {
                    info!(
                        "No activity for {}s, closing relay",
                        self.settings.idle_timeout.as_secs_f32()
                    );
                    return Ok(self.outcome(CloseReason::IdleTimeout));
                }
            };

            let body = match self.read_from(side).await? {
                Some(body) => body,
                None => {
                    info!("Socket closed by {} (normal EOF), ending relay", side);
                    let reason = match side {
                        Side::Client => CloseReason::ClientClosed,
                        Side::Server => CloseReason::ServerClosed,
                    };
                    return Ok(self.outcome(reason));
                }
            };
            debug!("Received {}-byte segment from {}", body.len(), side);

            let forwarded = match side {
                Side::Client => self.forward_from_client(&body).await?,
                Side::Server => self.forward_from_server(&body).await?,
            };
            if forwarded {
                self.messages_forwarded += 1;
                self.last_activity = Instant::now();
            }
        }
    }

    fn outcome(&self, reason: CloseReason) -> RelayOutcome {
        RelayOutcome {
            reason,
            messages_forwarded: self.messages_forwarded,
        }
    }

    /// Two-phase frame read from one side, bounded by the I/O timeout
    async fn read_from(&mut self, side: Side) -> Result<Option<Vec<u8>>, RelayError> {
        let io_timeout = self.settings.io_timeout;
        let stream = match side {
            Side::Client => &mut self.client,
            Side::Server => &mut self.server,
        };

        timeout(io_timeout, read_frame(stream))
            .await
            .map_err(|_| RelayError::ReadTimeout {
                side,
                secs: io_timeout.as_secs(),
            })?
            .map_err(|source| RelayError::Read { side, source })
    }

    /// Encrypt `plaintext` for `side` and write it, bounded by the I/O timeout
    async fn send_to(&mut self, side: Side, plaintext: &[u8]) -> Result<(), RelayError> {
        let io_timeout = self.settings.io_timeout;
        let (stream, key) = match side {
            Side::Client => (&mut self.client, &self.key_to_client),
            Side::Server => (&mut self.server, &self.key_to_server),
        };

        let frame = framing::encode(plaintext, key).map_err(|source| RelayError::Write { side, source })?;
        timeout(io_timeout, write_frame(stream, &frame))
            .await
            .map_err(|_| RelayError::WriteTimeout {
                side,
                secs: io_timeout.as_secs(),
            })?
            .map_err(|source| RelayError::Write { side, source })
    }

    /// Decrypt, record, rewrite and forward a client frame.
    ///
    /// A frame that fails to decrypt is logged and dropped.
    async fn forward_from_client(&mut self, body: &[u8]) -> Result<bool, RelayError> {
        let plaintext = match framing::decode(body, &self.key_to_client) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Decryption failed from client: {}", e);
                return Ok(false);
            }
        };
        debug!(
            "Intercepted from client ({} bytes): {}",
            plaintext.len(),
            preview(&plaintext)
        );

        self.capture.clone().record(Side::Client, plaintext.clone()).await?;
        let modified = self.transform.apply(&plaintext);
        self.send_to(Side::Server, &modified).await?;

        debug!("Forwarded client message to server");
        Ok(true)
    }

    /// Decrypt, record and forward a server frame unchanged.
    ///
    /// A frame that fails to decrypt is logged and dropped.
    async fn forward_from_server(&mut self, body: &[u8]) -> Result<bool, RelayError> {
        let plaintext = match framing::decode(body, &self.key_to_server) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Decryption failed from server: {}", e);
                return Ok(false);
            }
        };
        debug!(
            "Intercepted from server ({} bytes): {}",
            plaintext.len(),
            preview(&plaintext)
        );

        self.capture.clone().record(Side::Server, plaintext.clone()).await?;
        self.send_to(Side::Client, &plaintext).await?;

        debug!("Forwarded server message to client");
        Ok(true)
    }
}

/// Lossy UTF-8 rendering of the first few bytes of a message
fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LEN)];
    let mut text = String::from_utf8_lossy(shown).into_owned();
    if bytes.len() > PREVIEW_LEN {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{intercept_handshake, HandshakeSettings};
    use crate::intercept::{Passthrough, ReplaceToken};
    use dhlink_core::{GroupParams, Kdf};
    use dhlink_net::wire::send_sealed;
    use dhlink_net::{exchange_as_client, exchange_as_server};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Connected TCP pair: (proxy side, remote end)
    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (remote, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (accepted.unwrap().0, remote.unwrap())
    }

    struct Harness {
        session: RelaySession,
        client_end: TcpStream,
        server_end: TcpStream,
        client_key: SessionKey,
        server_key: SessionKey,
        capture: Arc<CaptureLogs>,
        _dir: TempDir,
    }

    /// Two linked TCP pairs that have already run the full interception
    /// handshake, so the relay starts on sockets that just served the
    /// 384-byte public value reads
    async fn harness(transform: Arc<dyn Transform>, settings: RelaySettings) -> Harness {
        let (mut proxy_client, mut client_end) = tcp_pair().await;
        let (mut proxy_server, mut server_end) = tcp_pair().await;
        let dir = tempfile::tempdir().unwrap();
        let capture = Arc::new(CaptureLogs::open_in(dir.path()).unwrap());

        let params = GroupParams::standard();
        let handshake = HandshakeSettings {
            params: params.clone(),
            kdf: Kdf::Hkdf,
            server_wait: Duration::from_secs(5),
            client_wait: Duration::from_secs(5),
        };
        let (keys, client_key, server_key) = tokio::join!(
            intercept_handshake(&mut proxy_client, &mut proxy_server, &handshake),
            exchange_as_client(&mut client_end, &params, Kdf::Hkdf),
            exchange_as_server(&mut server_end, &params, Kdf::Hkdf),
        );
        let (keys, client_key, server_key) =
            (keys.unwrap(), client_key.unwrap(), server_key.unwrap());
        assert_eq!(keys.client, client_key);
        assert_eq!(keys.server, server_key);
        let session = RelaySession::new(
            proxy_client,
            proxy_server,
            keys,
            transform,
            capture.clone(),
            settings,
        );
        Harness {
            session,
            client_end,
            server_end,
            client_key,
            server_key,
            capture,
            _dir: dir,
        }
    }

    async fn recv(stream: &mut TcpStream, key: &SessionKey) -> Vec<u8> {
        let body = read_frame(stream).await.unwrap().unwrap();
        framing::decode(&body, key).unwrap()
    }

    /// Like `recv`, but fails fast instead of waiting out the relay's I/O timeout
    async fn recv_within(stream: &mut TcpStream, key: &SessionKey, limit: Duration) -> Vec<u8> {
        timeout(limit, recv(stream, key))
            .await
            .expect("frame was not relayed in time")
    }

    #[tokio::test]
    async fn test_request_reply_rounds() {
        let h = harness(Arc::new(ReplaceToken::default()), RelaySettings::default()).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);
        let relay = tokio::spawn(h.session.run());
        let limit = Duration::from_secs(1);

        for round in 0..5u32 {
            let request = format!("transfer {}", round);
            send_sealed(&mut client_end, request.as_bytes(), &h.client_key)
                .await
                .unwrap();
            assert_eq!(
                recv_within(&mut server_end, &h.server_key, limit).await,
                format!("hacked {}", round).as_bytes()
            );

            let reply = format!("ok {}", round);
            send_sealed(&mut server_end, reply.as_bytes(), &h.server_key)
                .await
                .unwrap();
            assert_eq!(
                recv_within(&mut client_end, &h.client_key, limit).await,
                reply.as_bytes()
            );
        }

        drop(client_end);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert_eq!(outcome.messages_forwarded, 10);
    }

    #[tokio::test]
    async fn test_server_speaks_first() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);
        let relay = tokio::spawn(h.session.run());

        // Client stays silent after the handshake
        send_sealed(&mut server_end, b"welcome", &h.server_key).await.unwrap();
        assert_eq!(
            recv_within(&mut client_end, &h.client_key, Duration::from_secs(1)).await,
            b"welcome"
        );

        drop(server_end);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.reason, CloseReason::ServerClosed);
        assert_eq!(outcome.messages_forwarded, 1);
    }

    #[tokio::test]
    async fn test_client_speaks_first() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);
        let relay = tokio::spawn(h.session.run());

        // Server stays silent after the handshake
        send_sealed(&mut client_end, b"hello", &h.client_key).await.unwrap();
        assert_eq!(
            recv_within(&mut server_end, &h.server_key, Duration::from_secs(1)).await,
            b"hello"
        );

        drop(client_end);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert_eq!(outcome.messages_forwarded, 1);
    }

    #[tokio::test]
    async fn test_bidirectional_relay_with_rewrite() {
        let h = harness(Arc::new(ReplaceToken::default()), RelaySettings::default()).await;
        let Harness {
            session,
            mut client_end,
            mut server_end,
            client_key,
            server_key,
            capture,
            _dir,
        } = h;
        let relay = tokio::spawn(session.run());

        send_sealed(&mut client_end, b"transfer 100 units", &client_key).await.unwrap();
        assert_eq!(recv(&mut server_end, &server_key).await, b"hacked 100 units");

        send_sealed(&mut server_end, b"ok: transfer done", &server_key).await.unwrap();
        assert_eq!(recv(&mut client_end, &client_key).await, b"ok: transfer done");

        drop(client_end);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert_eq!(outcome.messages_forwarded, 2);

        assert_eq!(std::fs::read(capture.from_client.path()).unwrap(), b"transfer 100 units");
        assert_eq!(
            std::fs::read(capture.from_server.path()).unwrap(),
            b"ok: transfer done\n"
        );
    }

    #[tokio::test]
    async fn test_order_preserved_within_direction() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);
        let relay = tokio::spawn(h.session.run());

        for i in 0..20u32 {
            send_sealed(&mut client_end, format!("msg {}", i).as_bytes(), &h.client_key)
                .await
                .unwrap();
        }
        for i in 0..20u32 {
            assert_eq!(
                recv(&mut server_end, &h.server_key).await,
                format!("msg {}", i).as_bytes()
            );
        }

        drop(server_end);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.reason, CloseReason::ServerClosed);
        assert_eq!(outcome.messages_forwarded, 20);
    }

    #[tokio::test]
    async fn test_bad_frames_are_skipped() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);
        let relay = tokio::spawn(h.session.run());

        // Encrypted under the wrong key, then a frame too short for a nonce
        send_sealed(&mut client_end, b"forged", &h.server_key).await.unwrap();
        client_end.write_all(&[0x00, 0x04, 1, 2, 3, 4]).await.unwrap();
        send_sealed(&mut server_end, b"forged", &h.client_key).await.unwrap();

        send_sealed(&mut client_end, b"genuine", &h.client_key).await.unwrap();
        assert_eq!(recv(&mut server_end, &h.server_key).await, b"genuine");
        send_sealed(&mut server_end, b"reply", &h.server_key).await.unwrap();
        assert_eq!(recv(&mut client_end, &h.client_key).await, b"reply");

        drop(client_end);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.messages_forwarded, 2);
        assert_eq!(std::fs::read(h.capture.from_client.path()).unwrap(), b"genuine");
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_cleanly() {
        let settings = RelaySettings {
            idle_timeout: Duration::from_millis(300),
            ..RelaySettings::default()
        };
        let h = harness(Arc::new(Passthrough), settings).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);

        let started = std::time::Instant::now();
        let outcome = h.session.run().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.reason, CloseReason::IdleTimeout);
        assert_eq!(outcome.messages_forwarded, 0);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(300 + 100 + 500));

        // Session dropped: both remote ends now see EOF
        assert!(read_frame(&mut client_end).await.unwrap().is_none());
        assert!(read_frame(&mut server_end).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_eof_right_after_handshake() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        drop(h.client_end);

        let outcome = h.session.run().await.unwrap();
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert_eq!(outcome.messages_forwarded, 0);
    }

    #[tokio::test]
    async fn test_partial_length_is_fatal() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        let mut client_end = h.client_end;
        client_end.write_all(&[0x00]).await.unwrap();
        drop(client_end);

        let err = h.session.run().await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Read {
                side: Side::Client,
                source: FrameError::Truncated { expected: 2, received: 1 }
            }
        ));
    }

    #[tokio::test]
    async fn test_partial_payload_is_fatal() {
        let h = harness(Arc::new(Passthrough), RelaySettings::default()).await;
        let mut server_end = h.server_end;
        let frame = framing::encode(b"truncated", &h.server_key).unwrap();
        server_end.write_all(&frame[..frame.len() - 4]).await.unwrap();
        drop(server_end);

        let err = h.session.run().await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Read {
                side: Side::Server,
                source: FrameError::Truncated { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_stalled_frame_hits_read_timeout() {
        let settings = RelaySettings {
            io_timeout: Duration::from_millis(200),
            ..RelaySettings::default()
        };
        let h = harness(Arc::new(Passthrough), settings).await;
        let mut client_end = h.client_end;
        // Length prefix promises 64 bytes that never arrive
        client_end.write_all(&[0x00, 0x40, 0xaa]).await.unwrap();

        let err = h.session.run().await.unwrap_err();
        assert!(matches!(err, RelayError::ReadTimeout { side: Side::Client, .. }));
        drop(client_end);
    }

    #[tokio::test]
    async fn test_message_limit_enforced() {
        let settings = RelaySettings {
            max_messages: Some(2),
            ..RelaySettings::default()
        };
        let h = harness(Arc::new(Passthrough), settings).await;
        let (mut client_end, mut server_end) = (h.client_end, h.server_end);
        let relay = tokio::spawn(h.session.run());

        send_sealed(&mut client_end, b"a", &h.client_key).await.unwrap();
        send_sealed(&mut client_end, b"b", &h.client_key).await.unwrap();
        assert_eq!(recv(&mut server_end, &h.server_key).await, b"a");
        assert_eq!(recv(&mut server_end, &h.server_key).await, b"b");

        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.reason, CloseReason::MessageLimit);
        assert_eq!(outcome.messages_forwarded, 2);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview(b"short"), "short");
        let long = vec![b'a'; 150];
        let shown = preview(&long);
        assert_eq!(shown.len(), PREVIEW_LEN + 3);
        assert!(shown.ends_with("..."));
    }
}
