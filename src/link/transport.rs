//! Trait abstraction for opening the vehicle link to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte stream carrying motor commands out and telemetry in
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens a [`LinkStream`] to the vehicle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `host:port`
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn LinkStream>>;
}

/// TCP connector with Nagle disabled so 4-byte commands leave immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn LinkStream>> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!("TCP link open to {}:{} (nodelay)", host, port);
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 4];
            socket.read_exact(&mut command).await.unwrap();
            command
        });

        let mut stream = TcpConnector.connect("127.0.0.1", port).await.unwrap();
        stream.write_all(&[10, 20, 30, 40]).await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(server.await.unwrap(), [10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        assert!(TcpConnector.connect("127.0.0.1", port).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_connector_hands_out_stream() {
        let (client, _server) = tokio::io::duplex(64);
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(client) as Box<dyn LinkStream>));

        assert!(connector.connect("192.168.4.1", 2323).await.is_ok());
    }
}
