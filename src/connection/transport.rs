//! Transport abstraction (TCP with optional TLS vs Unix socket)

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use sha2::Digest;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

/// Byte stream to the directory server
pub enum Transport {
    /// Plain TCP (`ldap://`, before StartTLS)
    Plain(TcpStream),
    /// TLS over TCP (`ldaps://`, after StartTLS)
    Tls(Box<TlsStream<TcpStream>>),
    /// Unix domain socket (`ldapi://`)
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
            Transport::Unix(_) => f.write_str("Transport::Unix(UnixStream)"),
        }
    }
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host.trim_start_matches('[').trim_end_matches(']'), port))
            .await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Plain(stream))
    }

    /// Connect via TCP and complete a TLS handshake immediately
    pub async fn connect_tcp_tls(host: &str, port: u16, tls_config: &TlsConfig) -> Result<Self> {
        Self::connect_tcp(host, port)
            .await?
            .upgrade_to_tls(tls_config, host)
            .await
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Transport::Unix(stream))
    }

    /// Upgrade a plain TCP transport to TLS.
    ///
    /// Consumes `self`; fails for transports that are already encrypted or
    /// not TCP.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        match self {
            Transport::Plain(tcp_stream) => {
                let server_name = parse_server_name(hostname)?;
                let connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| Error::Config(format!("TLS handshake failed: {}", e)))?;
                Ok(Transport::Tls(Box::new(tls_stream)))
            }
            Transport::Tls(_) => Err(Error::IllegalState(
                "transport is already TLS-encrypted".into(),
            )),
            Transport::Unix(_) => Err(Error::IllegalState(
                "cannot upgrade Unix socket to TLS".into(),
            )),
        }
    }

    /// Whether the stream is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// OS descriptor of the underlying socket
    pub fn raw_fd(&self) -> RawFd {
        match self {
            Transport::Plain(s) => s.as_raw_fd(),
            Transport::Tls(s) => s.get_ref().0.as_raw_fd(),
            Transport::Unix(s) => s.as_raw_fd(),
        }
    }

    /// `tls-server-end-point` channel binding: SHA-256 of the server's
    /// DER certificate. `None` for unencrypted transports.
    pub fn channel_binding_data(&self) -> Option<Vec<u8>> {
        match self {
            Transport::Tls(stream) => {
                let (_tcp, conn) = stream.get_ref();
                let server_cert = conn.peer_certificates()?.first()?;
                Some(sha2::Sha256::digest(server_cert.as_ref()).to_vec())
            }
            _ => None,
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Transport::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Transport::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Transport::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Transport::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(Transport::connect_tcp("127.0.0.1", port).await.is_err());
    }

    #[tokio::test]
    async fn test_plain_transport_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let mut transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();
        assert!(!transport.is_tls());
        assert!(transport.raw_fd() >= 0);
        assert!(transport.channel_binding_data().is_none());

        transport.write_all(b"ping").await.unwrap();
        let mut echo = [0u8; 4];
        transport.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unix_cannot_upgrade() {
        let (a, _b) = UnixStream::pair().unwrap();
        let tls = TlsConfig::from_options(&crate::connection::TlsOptions::default()).unwrap();
        let err = Transport::Unix(a)
            .upgrade_to_tls(&tls, "localhost")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }
}
