//! Pre-built outbound clients, one per transport.
//!
//! The iterative resolver reuses these for every exchange. TLS-based
//! transports run opportunistically: certificate verification is
//! disabled at the TLS layer because authoritative servers are pinned
//! via DANE (the TLSA probes) when the policy asks for it, not via the
//! WebPKI.

use crate::dns::message::Message;
use crate::error::{Result, TdnsError};
use crate::resolver::authserver::Transport;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Default per-exchange timeout for encrypted transports.
pub const ENCRYPTED_TIMEOUT: Duration = Duration::from_secs(5);
/// Default Do53 timeout, configurable.
pub const DO53_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct NoVerify(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn opportunistic_tls_config(alpn: &[&[u8]]) -> rustls::ClientConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .expect("default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify(provider)))
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    config
}

pub struct TransportClients {
    do53_timeout: Duration,
    dot_connector: TlsConnector,
    doh_client: reqwest::Client,
    doq_endpoint: quinn::Endpoint,
    doq_config: quinn::ClientConfig,
}

impl TransportClients {
    pub fn new(do53_timeout: Duration) -> Result<Self> {
        let dot_connector = TlsConnector::from(Arc::new(opportunistic_tls_config(&[b"dot"])));

        let doh_client = reqwest::Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .timeout(ENCRYPTED_TIMEOUT)
            .build()
            .map_err(|e| TdnsError::Config(format!("DoH client: {}", e)))?;

        let quic_tls = opportunistic_tls_config(&[b"doq"]);
        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(quic_tls)
            .map_err(|e| TdnsError::Config(format!("DoQ TLS config: {}", e)))?;
        let doq_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
        let doq_endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())
            .map_err(|e| TdnsError::Config(format!("DoQ endpoint: {}", e)))?;

        Ok(Self {
            do53_timeout,
            dot_connector,
            doh_client,
            doq_endpoint,
            doq_config,
        })
    }

    /// One query/response exchange with an authoritative server.
    pub async fn exchange(
        &self,
        msg: &Message,
        addr: IpAddr,
        host: &str,
        transport: Transport,
    ) -> Result<Message> {
        let sockaddr = SocketAddr::new(addr, transport.default_port());
        trace!(%sockaddr, ?transport, "outbound exchange");
        match transport {
            Transport::Do53 => self.exchange_do53(msg, sockaddr).await,
            Transport::DoT => self.exchange_dot(msg, sockaddr, host).await,
            Transport::DoH => self.exchange_doh(msg, sockaddr).await,
            Transport::DoQ => self.exchange_doq(msg, sockaddr, host).await,
        }
    }

    async fn exchange_do53(&self, msg: &Message, addr: SocketAddr) -> Result<Message> {
        let bind: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind).await?;
        let bytes = msg.to_bytes();
        socket.send_to(&bytes, addr).await?;

        let mut buf = vec![0u8; 4096];
        let (n, _) = timeout(self.do53_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| TdnsError::Timeout)??;
        let reply = Message::from_bytes(&buf[..n])?;
        if reply.header.id != msg.header.id {
            return Err(TdnsError::ParseError("response id mismatch".into()));
        }
        if reply.header.tc {
            debug!(%addr, "truncated over UDP, retrying over TCP");
            return self.exchange_tcp(msg, addr).await;
        }
        Ok(reply)
    }

    async fn exchange_tcp(&self, msg: &Message, addr: SocketAddr) -> Result<Message> {
        let mut stream = timeout(self.do53_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TdnsError::Timeout)??;
        let bytes = msg.to_bytes();
        stream.write_all(&(bytes.len() as u16).to_be_bytes()).await?;
        stream.write_all(&bytes).await?;
        read_framed(&mut stream, msg.header.id, self.do53_timeout).await
    }

    async fn exchange_dot(&self, msg: &Message, addr: SocketAddr, host: &str) -> Result<Message> {
        let tcp = timeout(ENCRYPTED_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TdnsError::Timeout)??;
        let server_name = rustls::pki_types::ServerName::try_from(host.trim_end_matches('.').to_string())
            .map_err(|_| TdnsError::ParseError(format!("bad server name {:?}", host)))?;
        let mut stream = timeout(ENCRYPTED_TIMEOUT, self.dot_connector.connect(server_name, tcp))
            .await
            .map_err(|_| TdnsError::Timeout)??;

        let bytes = msg.to_bytes();
        stream.write_all(&(bytes.len() as u16).to_be_bytes()).await?;
        stream.write_all(&bytes).await?;
        read_framed(&mut stream, msg.header.id, ENCRYPTED_TIMEOUT).await
    }

    async fn exchange_doh(&self, msg: &Message, addr: SocketAddr) -> Result<Message> {
        let url = match addr.ip() {
            IpAddr::V4(ip) => format!("https://{}/dns-query", ip),
            IpAddr::V6(ip) => format!("https://[{}]/dns-query", ip),
        };
        let resp = self
            .doh_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/dns-message")
            .header(reqwest::header::ACCEPT, "application/dns-message")
            .body(msg.to_bytes())
            .send()
            .await
            .map_err(|e| TdnsError::Io(format!("DoH request: {}", e)))?;
        if !resp.status().is_success() {
            return Err(TdnsError::Io(format!("DoH status {}", resp.status())));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| TdnsError::Io(format!("DoH body: {}", e)))?;
        Message::from_bytes(&body)
    }

    async fn exchange_doq(&self, msg: &Message, addr: SocketAddr, host: &str) -> Result<Message> {
        let connecting = self
            .doq_endpoint
            .connect_with(self.doq_config.clone(), addr, host.trim_end_matches('.'))
            .map_err(|e| TdnsError::Io(format!("DoQ connect: {}", e)))?;
        let conn = timeout(ENCRYPTED_TIMEOUT, connecting)
            .await
            .map_err(|_| TdnsError::Timeout)?
            .map_err(|e| TdnsError::Io(format!("DoQ handshake: {}", e)))?;

        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| TdnsError::Io(format!("DoQ stream: {}", e)))?;

        // RFC 9250: message id zero, 2-byte length prefix, one query per
        // stream
        let mut wire = msg.clone();
        wire.header.id = 0;
        let bytes = wire.to_bytes();
        send.write_all(&(bytes.len() as u16).to_be_bytes())
            .await
            .map_err(|e| TdnsError::Io(format!("DoQ send: {}", e)))?;
        send.write_all(&bytes)
            .await
            .map_err(|e| TdnsError::Io(format!("DoQ send: {}", e)))?;
        send.finish().ok();

        let mut len_buf = [0u8; 2];
        timeout(ENCRYPTED_TIMEOUT, recv.read_exact(&mut len_buf))
            .await
            .map_err(|_| TdnsError::Timeout)?
            .map_err(|e| TdnsError::Io(format!("DoQ recv: {}", e)))?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        timeout(ENCRYPTED_TIMEOUT, recv.read_exact(&mut body))
            .await
            .map_err(|_| TdnsError::Timeout)?
            .map_err(|e| TdnsError::Io(format!("DoQ recv: {}", e)))?;
        let mut reply = Message::from_bytes(&body)?;
        reply.header.id = msg.header.id;
        Ok(reply)
    }
}

async fn read_framed<S>(stream: &mut S, expect_id: u16, limit: Duration) -> Result<Message>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    timeout(limit, stream.read_exact(&mut len_buf))
        .await
        .map_err(|_| TdnsError::Timeout)??;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    timeout(limit, stream.read_exact(&mut body))
        .await
        .map_err(|_| TdnsError::Timeout)??;
    let reply = Message::from_bytes(&body)?;
    if reply.header.id != expect_id {
        return Err(TdnsError::ParseError("response id mismatch".into()));
    }
    Ok(reply)
}
