//! Frame I/O against the server under test.
//!
//! [`FrameIo`] sends and receives HTTP/2 frames over any async byte stream.
//! [`Connector`] produces those streams: [`TcpConnector`] dials the real
//! server (optionally over TLS), tests plug in in-memory duplex pipes.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::{DEFAULT_TIMEOUT, RunConfig};
use crate::error::HarnessError;
use crate::protocol::{CONNECTION_PREFACE, Frame, OutboundFrame, decode_frame};

/// ALPN identifier for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

const READ_CHUNK: usize = 16 * 1024;

/// Anything the classifier can pull frames from.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    /// Wait at most `budget` for the next frame.
    ///
    /// Returns [`HarnessError::Timeout`] when the budget elapses and
    /// [`HarnessError::Closed`] when the peer closes the connection.
    async fn receive(&mut self, budget: Duration) -> Result<Frame, HarnessError>;
}

/// A byte stream the harness can speak HTTP/2 over.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Type-erased stream so plain and TLS connections share one session type.
pub type BoxedStream = Box<dyn ByteStream>;

/// Frame-level reader/writer over a byte stream.
///
/// Every write and the final shutdown are bounded by the write timeout, so a
/// server that stops reading cannot stall the run.
pub struct FrameIo<S> {
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
    write_timeout: Duration,
}

impl<S> FrameIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            write_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound each write and the shutdown by `timeout` instead of the default.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Write the client connection preface.
    pub async fn send_preface(&mut self) -> Result<(), HarnessError> {
        write_within(&mut self.stream, CONNECTION_PREFACE, self.write_timeout).await
    }

    /// Encode and write one frame.
    pub async fn send(&mut self, frame: &OutboundFrame) -> Result<(), HarnessError> {
        self.write_buf.clear();
        frame.encode(&mut self.write_buf);
        write_within(&mut self.stream, &self.write_buf, self.write_timeout).await
    }

    /// Receive one frame, waiting at most `budget`.
    ///
    /// Bytes read before the budget runs out stay buffered, so a timeout
    /// never drops part of a frame.
    pub async fn receive(&mut self, budget: Duration) -> Result<Frame, HarnessError> {
        match tokio::time::timeout(budget, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Timeout(budget)),
        }
    }

    async fn read_frame(&mut self) -> Result<Frame, HarnessError> {
        loop {
            if let Some(frame) = decode_frame(&mut self.read_buf)? {
                return Ok(frame);
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(HarnessError::from_read)?;
            if n == 0 {
                if !self.read_buf.is_empty() {
                    tracing::debug!(
                        buffered = self.read_buf.len(),
                        "peer closed mid-frame"
                    );
                }
                return Err(HarnessError::Closed);
            }
        }
    }

    /// Shut down the write half. Errors and a stalled peer are ignored: the
    /// connection is being abandoned either way.
    pub async fn shutdown(&mut self) {
        match tokio::time::timeout(self.write_timeout, self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::trace!(error = %e, "shutdown failed"),
            Err(_) => tracing::debug!(timeout = ?self.write_timeout, "shutdown timed out"),
        }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

async fn write_within<W>(stream: &mut W, bytes: &[u8], limit: Duration) -> Result<(), HarnessError>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match tokio::time::timeout(limit, write).await {
        Ok(result) => result.map_err(HarnessError::Write),
        Err(_) => Err(HarnessError::Write(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("write timed out after {limit:?}"),
        ))),
    }
}

impl<S> FrameSource for FrameIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn receive(&mut self, budget: Duration) -> Result<Frame, HarnessError> {
        FrameIo::receive(self, budget).await
    }
}

/// Opens a fresh connection to the server under test.
///
/// Called once per case; implementations must never hand out the same
/// underlying connection twice.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    async fn connect(&self) -> Result<Self::Stream, HarnessError>;
}

/// Connects over TCP, with TLS and ALPN `h2` in secure mode.
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
    tls: Option<TlsConnector>,
}

impl TcpConnector {
    pub fn new(config: &RunConfig) -> Self {
        let tls = config.secure.then(|| {
            let mut tls_config = ClientConfig::builder()
                .with_safe_defaults()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth();
            tls_config.alpn_protocols = vec![ALPN_H2.to_vec()];
            TlsConnector::from(Arc::new(tls_config))
        });

        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
            tls,
        }
    }
}

impl Connector for TcpConnector {
    type Stream = BoxedStream;

    async fn connect(&self) -> Result<BoxedStream, HarnessError> {
        let addr = (self.host.as_str(), self.port);
        let tcp = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| HarnessError::Connect(format!("connect timed out after {:?}", self.timeout)))?
            .map_err(|e| HarnessError::Connect(format!("{}:{}: {e}", self.host, self.port)))?;
        tcp.set_nodelay(true)
            .map_err(|e| HarnessError::Connect(format!("set_nodelay: {e}")))?;

        let Some(tls) = &self.tls else {
            return Ok(Box::new(tcp));
        };

        let server_name = ServerName::try_from(self.host.as_str())
            .map_err(|e| HarnessError::Connect(format!("invalid server name {:?}: {e}", self.host)))?;
        let stream = tokio::time::timeout(self.timeout, tls.connect(server_name, tcp))
            .await
            .map_err(|_| HarnessError::Connect(format!("TLS handshake timed out after {:?}", self.timeout)))?
            .map_err(|e| HarnessError::Connect(format!("TLS handshake failed: {e}")))?;

        let (_, session) = stream.get_ref();
        if session.alpn_protocol() != Some(ALPN_H2) {
            return Err(HarnessError::Connect(
                "server did not negotiate h2 via ALPN".to_string(),
            ));
        }

        Ok(Box::new(stream))
    }
}

/// Servers under test routinely present self-signed certificates; the
/// harness checks protocol behaviour, not identity.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
