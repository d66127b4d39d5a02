//! Opening raw connections to guest endpoints.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Endpoint;

/// Byte stream to a guest endpoint.
pub trait GuestStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> GuestStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn GuestStream>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<BoxedStream>> + Send + 'a>>;

/// Opens connections for the channel registry.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, worker: &'a str, endpoint: &'a Endpoint) -> ConnectFuture<'a>;
}

/// Connects over TCP or Unix domain sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketConnector;

impl Connector for SocketConnector {
    fn connect<'a>(&'a self, _worker: &'a str, endpoint: &'a Endpoint) -> ConnectFuture<'a> {
        Box::pin(async move {
            match endpoint {
                Endpoint::Tcp(addr) => {
                    let stream = TcpStream::connect(addr.as_str()).await?;
                    stream.set_nodelay(true)?;
                    Ok(Box::new(stream) as BoxedStream)
                }
                #[cfg(unix)]
                Endpoint::Unix(path) => {
                    let stream = tokio::net::UnixStream::connect(path).await?;
                    Ok(Box::new(stream) as BoxedStream)
                }
                #[cfg(not(unix))]
                Endpoint::Unix(path) => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("Unix sockets are not available here: {}", path.display()),
                )),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn connects_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok\0").await.unwrap();
        });

        let mut stream = SocketConnector
            .connect("w", &Endpoint::Tcp(addr))
            .await
            .unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok\0");
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connects_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = SocketConnector
            .connect("w", &Endpoint::Unix(path))
            .await
            .unwrap();
        stream.write_all(b"ls /\n").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"ls /\n");
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(
            SocketConnector
                .connect("w", &Endpoint::Tcp(addr))
                .await
                .is_err()
        );
    }
}
