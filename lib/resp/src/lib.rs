//! A minimal client for the Redis line protocol.
//!
//! It only speaks what an `INFO` scraper needs: commands are written as a
//! single inline line and exactly one reply is read back per command.

#[macro_use]
extern crate tracing;

mod reply;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

pub use reply::{DecodeError, ProtocolError, Reply, read_reply};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the server listens, a TCP address or a unix domain socket,
/// never both.
#[derive(Clone, Debug, PartialEq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Tcp {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error connecting to redis on {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },

    #[error("error sending data to redis on {endpoint}: {source}")]
    Send { endpoint: String, source: io::Error },

    #[error("error reading data from redis on {endpoint}: {source}")]
    Receive { endpoint: String, source: io::Error },

    #[error("redis error: {0}")]
    Server(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("AUTH command failed: {0}")]
    Credential(String),
}

impl Error {
    /// Socket level failures, the connection has been torn down.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Send { .. } | Error::Receive { .. }
        )
    }
}

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Strictly request/reply, one command in flight at a time.
///
/// The connection is opened lazily and dropped on any transport or
/// protocol failure, the next command reconnects.
pub struct Client {
    endpoint: Endpoint,
    auth: Option<String>,
    timeout: Duration,

    stream: Option<BufStream<Stream>>,
}

impl Client {
    pub fn new(endpoint: Endpoint) -> Self {
        Client {
            endpoint,
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            stream: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }

    /// Deadline applied to connect and to every single read or write.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection, authenticate if a credential is configured and
    /// issue a harmless `SELECT 0` to make sure the session is usable.
    ///
    /// Calling it on an open connection does nothing.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = match deadline(self.timeout, self.open()).await {
            Ok(stream) => stream,
            Err(err) => {
                return Err(Error::Connect {
                    endpoint: self.endpoint.to_string(),
                    source: err,
                });
            }
        };
        self.stream = Some(BufStream::new(stream));
        debug!(message = "connected to redis", endpoint = %self.endpoint);

        if let Some(auth) = self.auth.clone() {
            let rejected = match self.roundtrip(&format!("AUTH {auth}")).await? {
                Reply::Simple(text) | Reply::Bulk(text) => text.is_empty().then_some(text),
                Reply::Null => Some("null reply".to_string()),
                Reply::Error(msg) => Some(msg),
            };

            if let Some(reason) = rejected {
                self.disconnect().await;
                return Err(Error::Credential(reason));
            }
        }

        match self.roundtrip("SELECT 0").await? {
            Reply::Null | Reply::Simple(_) | Reply::Bulk(_) => Ok(()),
            Reply::Error(msg) => {
                self.disconnect().await;
                Err(Error::Server(msg))
            }
        }
    }

    /// Close the socket if there is one, errors are ignored.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    /// Send one command and return the text of the reply, `None` for a null
    /// reply. An error reply is returned as `Error::Server`.
    pub async fn send_command(&mut self, command: &str) -> Result<Option<String>, Error> {
        match self.query(command).await? {
            Reply::Null => Ok(None),
            Reply::Simple(text) | Reply::Bulk(text) => Ok(Some(text)),
            Reply::Error(msg) => Err(Error::Server(msg)),
        }
    }

    /// Send one command and return the undecoded reply.
    pub async fn query(&mut self, command: &str) -> Result<Reply, Error> {
        self.connect().await?;
        self.roundtrip(command).await
    }

    async fn roundtrip(&mut self, command: &str) -> Result<Reply, Error> {
        let mut buf = BytesMut::with_capacity(command.len() + 2);
        buf.put_slice(command.as_bytes());
        buf.put_slice(b"\r\n");

        if let Err(err) = self.write_frame(&buf).await {
            self.disconnect().await;
            return Err(Error::Send {
                endpoint: self.endpoint.to_string(),
                source: err,
            });
        }

        let result = match self.stream.as_mut() {
            Some(stream) => deadline(self.timeout, read_reply(stream)).await,
            None => Err(io::Error::from(io::ErrorKind::NotConnected).into()),
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(DecodeError::Io(err)) => {
                self.disconnect().await;
                Err(Error::Receive {
                    endpoint: self.endpoint.to_string(),
                    source: err,
                })
            }
            Err(DecodeError::Protocol(err)) => {
                // the stream position is unknown now
                self.disconnect().await;
                Err(Error::Protocol(err))
            }
        }
    }

    async fn open(&self) -> io::Result<Stream> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            Endpoint::Unix(path) => UnixStream::connect(path).await.map(Stream::Unix),
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let timeout = self.timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        deadline(timeout, async {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await
    }
}

async fn deadline<T, E, F>(timeout: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<io::Error>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(io::Error::from(io::ErrorKind::TimedOut).into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, UnixListener};

    use super::*;

    /// Answers each inline command with a canned reply, unknown commands get
    /// an error reply. Returns the endpoint and a counter of accepted
    /// connections.
    async fn serve(replies: &[(&str, &str)]) -> (Endpoint, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let replies: Arc<HashMap<String, String>> = Arc::new(
            replies
                .iter()
                .map(|(cmd, reply)| (cmd.to_string(), reply.to_string()))
                .collect(),
        );
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let (stream, _peer) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);

                let replies = Arc::clone(&replies);
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = BufReader::new(reader).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply = replies
                            .get(line.trim())
                            .cloned()
                            .unwrap_or_else(|| "-ERR unknown command\r\n".to_string());
                        if writer.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let endpoint = Endpoint::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        };

        (endpoint, accepted)
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::default().to_string(), "127.0.0.1:6379");
        assert_eq!(
            Endpoint::Unix(PathBuf::from("/var/run/redis.sock")).to_string(),
            "/var/run/redis.sock"
        );
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (endpoint, accepted) = serve(&[("SELECT 0", "+OK\r\n")]).await;
        let mut client = Client::new(endpoint);

        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        client.disconnect().await;
        assert!(!client.is_connected());
        client.connect().await.unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_command_maps_replies() {
        let (endpoint, _) = serve(&[
            ("SELECT 0", "+OK\r\n"),
            ("info", "$22\r\n# Clients\r\nconnected:1\r\n"),
            ("get missing", "$-1\r\n"),
            ("bogus", "-ERR unknown command 'bogus'\r\n"),
        ])
        .await;
        let mut client = Client::new(endpoint);

        let info = client.send_command("info").await.unwrap();
        assert_eq!(info.as_deref(), Some("# Clients\r\nconnected:1"));

        assert_eq!(client.send_command("get missing").await.unwrap(), None);

        match client.send_command("bogus").await {
            Err(Error::Server(msg)) => assert_eq!(msg, "ERR unknown command 'bogus'"),
            other => panic!("unexpected {other:?}"),
        }
        // an error reply keeps the connection usable
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn auth_accepted() {
        let (endpoint, _) = serve(&[("AUTH secret", "+OK\r\n"), ("SELECT 0", "+OK\r\n")]).await;
        let mut client = Client::new(endpoint).with_auth(Some("secret".to_string()));

        client.connect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn auth_rejected() {
        let (endpoint, _) = serve(&[
            ("AUTH wrong", "-WRONGPASS invalid username-password pair\r\n"),
            ("AUTH empty", "$-1\r\n"),
            ("SELECT 0", "+OK\r\n"),
        ])
        .await;

        for auth in ["wrong", "empty"] {
            let mut client = Client::new(endpoint.clone()).with_auth(Some(auth.to_string()));
            let err = client.connect().await.unwrap_err();

            assert!(matches!(err, Error::Credential(_)), "{auth}: {err:?}");
            assert!(!err.is_transport());
            assert!(!client.is_connected());
        }
    }

    #[tokio::test]
    async fn connect_refused() {
        // bind and drop, so nothing listens on the port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = Client::new(Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        });
        let err = client.connect().await.unwrap_err();

        assert!(err.is_transport());
        assert!(
            err.to_string()
                .starts_with(&format!("error connecting to redis on 127.0.0.1:{port}")),
            "{err}"
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unknown_reply_type_disconnects() {
        let (endpoint, _) = serve(&[("SELECT 0", "+OK\r\n"), ("ping", ":1\r\n")]).await;
        let mut client = Client::new(endpoint);

        let err = client.send_command("ping").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnknownType(':'))
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // accept and never answer
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut client = Client::new(Endpoint::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
        .with_timeout(Duration::from_millis(100));

        match client.connect().await {
            Err(Error::Receive { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match line.as_str() {
                    "SELECT 0" => "+OK\r\n",
                    "info" => "$19\r\nconnected_clients:1\r\n",
                    _ => "-ERR\r\n",
                };
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let mut client = Client::new(Endpoint::Unix(path));
        let info = client.send_command("info").await.unwrap();
        assert_eq!(info.as_deref(), Some("connected_clients:1"));
    }
}
