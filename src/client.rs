//! A small client speaking the framed protocol, plain or over TLS.

use std::sync::Arc;

use rustls_pemfile::certs;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{Certificate, ClientConfig, RootCertStore, ServerName},
    TlsConnector,
};
use tracing::debug;

use crate::server::codec::{FrameCodec, ProtocolError};
use crate::utils::ServerError;

pub struct GenomaClient<S> {
    stream: S,
    codec: FrameCodec,
}

impl GenomaClient<TcpStream> {
    pub async fn connect_plain<A: ToSocketAddrs>(addr: A) -> Result<Self, ServerError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl GenomaClient<TlsStream<TcpStream>> {
    /// Connects over TLS, trusting only the certificates in `root_pem`.
    ///
    /// # Errors
    /// Returns `ServerError::TlsError` when `root_pem` holds no usable
    /// certificate or the handshake fails.
    pub async fn connect_tls<A: ToSocketAddrs>(
        addr: A,
        server_name: &str,
        root_pem: &[u8],
    ) -> Result<Self, ServerError> {
        let mut roots = RootCertStore::empty();
        let ders = certs(&mut &root_pem[..])
            .map_err(|e| ServerError::TlsError(format!("Root certificate parse error: {}", e)))?;
        if ders.is_empty() {
            return Err(ServerError::TlsError("No root certificate found".into()));
        }
        for der in ders {
            roots
                .add(&Certificate(der))
                .map_err(|e| ServerError::TlsError(e.to_string()))?;
        }

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let name = ServerName::try_from(server_name)
            .map_err(|e| ServerError::TlsError(format!("Invalid server name {}: {}", server_name, e)))?;

        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        let stream = TlsConnector::from(Arc::new(config))
            .connect(name, tcp)
            .await
            .map_err(|e| ServerError::TlsError(e.to_string()))?;
        Ok(Self::new(stream))
    }
}

impl<S> GenomaClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Sends one request and waits for its response.
    pub async fn request(&mut self, message: &str) -> Result<String, ProtocolError> {
        self.codec.write_frame(&mut self.stream, message).await?;
        let response = self.codec.read_frame(&mut self.stream).await?;
        debug!(request_len = message.len(), response_len = response.len(), "Round trip");
        Ok(response)
    }

    /// Writes bytes as-is, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one response frame without sending anything.
    pub async fn read_response(&mut self) -> Result<String, ProtocolError> {
        self.codec.read_frame(&mut self.stream).await
    }

    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
