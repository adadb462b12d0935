//! Connection management — transport setup, handshake, failover.
//!
//! A [`ConnectionManager`] owns at most one live transport. `connect`
//! sweeps a ranked candidate list; each candidate gets an independent
//! timeout and a failed candidate is logged and skipped, never
//! propagated. Only exhausting the whole list reports failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use ember_protocol::codec::{is_complete, MAX_REPLY_SIZE};
use ember_protocol::handshake::{handshake_request, parse_server_version};
use ember_protocol::{Frame, parse_frame};
use ember_types::{ServerCandidate, Transport};

use crate::ClientError;

/// Per-candidate connect (and handshake) timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for reading one complete reply.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

struct ActiveTransport {
    reader: BufReader<ReadHalf<Box<dyn AsyncStream>>>,
    writer: WriteHalf<Box<dyn AsyncStream>>,
}

impl ActiveTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| ClientError::Transport("send".into(), e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ClientError::Transport("flush".into(), e.to_string()))?;
        Ok(())
    }

    /// Accumulate lines until the reply is structurally complete.
    async fn receive_complete(&mut self) -> Result<String, ClientError> {
        let mut buf = String::new();
        loop {
            let read = self
                .reader
                .read_line(&mut buf)
                .await
                .map_err(|e| ClientError::Transport("receive".into(), e.to_string()))?;
            if read == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            if is_complete(&buf) {
                return Ok(buf);
            }
            if buf.len() > MAX_REPLY_SIZE {
                return Err(ClientError::ReplyTooLarge);
            }
        }
    }
}

/// Owns the single live server connection.
pub struct ConnectionManager {
    state: ConnectionState,
    active: Option<ActiveTransport>,
    active_server: Option<ServerCandidate>,
    allow_invalid_certs: bool,
    read_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(allow_invalid_certs: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            active: None,
            active_server: None,
            allow_invalid_certs,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.active.is_some()
    }

    pub fn active_server(&self) -> Option<&ServerCandidate> {
        self.active_server.as_ref()
    }

    /// Try each candidate in rank order until one completes the handshake.
    ///
    /// Returns `false` only when every candidate failed. Individual
    /// candidate failures are logged at debug level and swallowed so the
    /// sweep continues.
    pub async fn connect(
        &mut self,
        candidates: &[ServerCandidate],
        connect_timeout: Duration,
    ) -> bool {
        self.close();

        let mut ordered: Vec<&ServerCandidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.rank);

        for candidate in ordered {
            self.state = ConnectionState::Connecting;

            match tokio::time::timeout(connect_timeout, try_candidate(candidate, self.allow_invalid_certs, self.read_timeout)).await {
                Ok(Ok((transport, banner))) => {
                    tracing::info!(server = %candidate, software = %banner, "connected");
                    self.active = Some(transport);
                    self.active_server = Some(candidate.clone());
                    self.state = ConnectionState::Connected;
                    return true;
                }
                Ok(Err(e)) => {
                    tracing::debug!(server = %candidate, error = %e, "candidate failed, trying next");
                }
                Err(_) => {
                    tracing::debug!(server = %candidate, timeout_ms = connect_timeout.as_millis() as u64, "candidate timed out, trying next");
                }
            }
        }

        tracing::warn!(count = candidates.len(), "all server candidates failed");
        self.state = ConnectionState::Failed;
        false
    }

    /// Write one pre-framed request to the wire.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let transport = self.active.as_mut().ok_or(ClientError::NotConnected)?;
        transport.send(bytes).await
    }

    /// Read one complete reply, bounded by the read timeout.
    pub async fn receive(&mut self) -> Result<String, ClientError> {
        let transport = self.active.as_mut().ok_or(ClientError::NotConnected)?;
        match tokio::time::timeout(self.read_timeout, transport.receive_complete()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ReadTimeout),
        }
    }

    /// Release the transport. Idempotent; safe in any state.
    pub fn close(&mut self) {
        self.active = None;
        self.active_server = None;
        self.state = ConnectionState::Disconnected;
    }
}

/// One full connection attempt: transport open, handshake, first reply.
async fn try_candidate(
    candidate: &ServerCandidate,
    allow_invalid_certs: bool,
    read_timeout: Duration,
) -> Result<(ActiveTransport, String), ClientError> {
    let tcp = TcpStream::connect((candidate.host.as_str(), candidate.port))
        .await
        .map_err(|e| ClientError::Transport(candidate.endpoint(), e.to_string()))?;

    let stream: Box<dyn AsyncStream> = match candidate.transport {
        Transport::Plain => Box::new(tcp),
        Transport::Encrypted => Box::new(
            open_tls(&candidate.host, tcp, allow_invalid_certs)
                .await
                .map_err(|e| ClientError::Transport(candidate.endpoint(), e))?,
        ),
    };

    let (read_half, write_half) = tokio::io::split(stream);
    let mut transport = ActiveTransport {
        reader: BufReader::new(read_half),
        writer: write_half,
    };

    let frame = handshake_request(0).to_frame()?;
    transport.send(frame.as_bytes()).await?;

    let reply = tokio::time::timeout(read_timeout, transport.receive_complete())
        .await
        .map_err(|_| ClientError::ReadTimeout)??;
    if reply.trim().is_empty() {
        return Err(ClientError::Transport(
            candidate.endpoint(),
            "empty handshake reply".into(),
        ));
    }

    let banner = match parse_frame(&reply) {
        Ok(Frame::Response(resp)) => parse_server_version(&resp.result)
            .map(|v| v.software)
            .unwrap_or_else(|_| "unknown".into()),
        _ => "unknown".into(),
    };

    Ok((transport, banner))
}

async fn open_tls(
    host: &str,
    tcp: TcpStream,
    allow_invalid_certs: bool,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, String> {
    let config = if allow_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification::new()))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| format!("invalid server name: {e}"))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| format!("TLS handshake failed: {e}"))
}

mod danger {
    //! Certificate-validation bypass for self-hosted servers with
    //! self-signed certificates. Opt-in via configuration only.

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification(CryptoProvider);

    impl NoCertificateVerification {
        pub fn new() -> Self {
            Self(rustls::crypto::ring::default_provider())
        }
    }

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Spawn a fake Electrum server that answers the version handshake
    /// and then echoes canned replies for each subsequent request.
    async fn spawn_server(replies: Vec<String>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];

            // Handshake request.
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"{\"id\": 0, \"result\": [\"FakeElectrum 0.1\", \"1.4\"]}\n")
                .await
                .unwrap();

            for reply in replies {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        port
    }

    /// A port that refuses connections: bind then immediately drop.
    async fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn candidate(port: u16, rank: u32) -> ServerCandidate {
        ServerCandidate::new("127.0.0.1", port, Transport::Plain, rank)
    }

    #[tokio::test]
    async fn connects_to_single_healthy_server() {
        let port = spawn_server(vec![]).await;
        let mut manager = ConnectionManager::new(false);

        let ok = manager.connect(&[candidate(port, 0)], CONNECT_TIMEOUT).await;
        assert!(ok);
        assert!(manager.is_connected());
        assert_eq!(manager.active_server().unwrap().port, port);
    }

    #[tokio::test]
    async fn fails_over_to_last_candidate() {
        // Five refusing servers ahead of one healthy one.
        let mut candidates = Vec::new();
        for rank in 0..5 {
            candidates.push(candidate(refused_port().await, rank));
        }
        let healthy = spawn_server(vec![]).await;
        candidates.push(candidate(healthy, 5));

        let mut manager = ConnectionManager::new(false);
        let ok = manager.connect(&candidates, CONNECT_TIMEOUT).await;

        assert!(ok);
        assert_eq!(manager.active_server().unwrap().port, healthy);
        assert_eq!(manager.active_server().unwrap().rank, 5);
    }

    #[tokio::test]
    async fn all_candidates_failing_returns_false() {
        let candidates = vec![
            candidate(refused_port().await, 0),
            candidate(refused_port().await, 1),
        ];

        let mut manager = ConnectionManager::new(false);
        let ok = manager.connect(&candidates, CONNECT_TIMEOUT).await;

        assert!(!ok);
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.active_server().is_none());
    }

    #[tokio::test]
    async fn candidates_tried_in_rank_order_not_list_order() {
        let healthy = spawn_server(vec![]).await;
        // Healthy server listed first but ranked last; a refused server
        // ranked first. The sweep must hit the refused one and then the
        // healthy one.
        let candidates = vec![candidate(healthy, 7), candidate(refused_port().await, 0)];

        let mut manager = ConnectionManager::new(false);
        assert!(manager.connect(&candidates, CONNECT_TIMEOUT).await);
        assert_eq!(manager.active_server().unwrap().rank, 7);
    }

    #[tokio::test]
    async fn send_receive_roundtrip() {
        let port = spawn_server(vec![
            "{\"id\": 1, \"result\": {\"confirmed\": 42, \"unconfirmed\": 0}}\n".to_string(),
        ])
        .await;

        let mut manager = ConnectionManager::new(false);
        assert!(manager.connect(&[candidate(port, 0)], CONNECT_TIMEOUT).await);

        manager
            .send(b"{\"id\": 1, \"method\": \"blockchain.scripthash.get_balance\", \"params\": [\"ab\"]}\n")
            .await
            .unwrap();
        let reply = manager.receive().await.unwrap();
        assert!(reply.contains("\"confirmed\": 42"));
    }

    #[tokio::test]
    async fn receive_assembles_multi_line_reply() {
        let port = spawn_server(vec![
            "{\"id\": 1,\n \"result\":\n [1, 2, 3]}\n".to_string(),
        ])
        .await;

        let mut manager = ConnectionManager::new(false);
        assert!(manager.connect(&[candidate(port, 0)], CONNECT_TIMEOUT).await);

        manager.send(b"{\"id\": 1}\n").await.unwrap();
        let reply = manager.receive().await.unwrap();
        assert!(ember_protocol::codec::is_complete(&reply));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut manager = ConnectionManager::new(false);
        manager.close();
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let port = spawn_server(vec![]).await;
        assert!(manager.connect(&[candidate(port, 0)], CONNECT_TIMEOUT).await);
        manager.close();
        manager.close();
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn send_without_connection_errors() {
        let mut manager = ConnectionManager::new(false);
        let err = manager.send(b"x").await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }
}
