//! Line-oriented GCS exchange with the controller.
//!
//! Every buffer is sent line by line and closed with an `ERR?` handshake: the
//! controller answers a single integer, `0` meaning every preceding command
//! was accepted. There is no per-line acknowledgement.
//!
//! Protocol overview:
//! - Transport: TCP (default port 50000), ASCII
//! - Framing: one command per line, `\n` terminated
//! - Error check: `ERR?` → `<code>\n`
//!
//! In dry-run mode nothing is connected; lines are logged and `ERR?` is
//! answered locally with `0`.

use crate::commands::{CommandBuffer, ERROR_QUERY};
use crate::error::{describe_gcs_error, ProtocolError, ScanError, ScanResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, instrument, warn};

/// Default GCS TCP port of the E-727.
pub const DEFAULT_PORT: u16 = 50000;

/// Bound on a single read before it is logged and retried.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 1024;

/// Any byte stream the protocol can run over.
///
/// Implemented for `TcpStream` in production and `tokio::io::DuplexStream`
/// in tests.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Type-erased transport.
pub type DynTransport = Box<dyn Transport>;

/// Owns the connection to one controller.
pub struct CommandProtocol {
    /// `None` in dry-run mode or after `close()`
    link: Option<DynTransport>,
    peer: String,
    read_timeout: Duration,
    dry_run: bool,
    /// Bytes received after the last returned line
    pending: Vec<u8>,
}

impl std::fmt::Debug for CommandProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProtocol")
            .field("peer", &self.peer)
            .field("dry_run", &self.dry_run)
            .field("connected", &self.link.is_some())
            .finish()
    }
}

impl CommandProtocol {
    /// Open a TCP connection to `host:port`.
    ///
    /// A single attempt is made, bounded by `connect_timeout`. Failure is
    /// returned as [`ScanError::Connection`].
    #[instrument(skip(connect_timeout))]
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> ScanResult<Self> {
        let addr = format!("{host}:{port}");
        info!("Connecting to controller at {addr}");

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                error!("Connection to {addr} failed: {source}");
                return Err(ScanError::Connection { addr, source });
            }
            Err(_) => {
                error!("Connection to {addr} timed out after {connect_timeout:?}");
                return Err(ScanError::Connection {
                    addr,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ),
                });
            }
        };
        stream.set_nodelay(true)?;

        info!("Connected to controller at {addr}");
        Ok(Self::from_stream(stream, addr))
    }

    /// Protocol that never touches the network.
    pub fn dry_run(peer: impl Into<String>) -> Self {
        let peer = peer.into();
        info!("Dry run: not connecting to {peer}");
        Self {
            link: None,
            peer,
            read_timeout: READ_TIMEOUT,
            dry_run: true,
            pending: Vec::new(),
        }
    }

    /// Wrap an already open stream.
    pub fn from_stream<S: Transport + 'static>(stream: S, peer: impl Into<String>) -> Self {
        Self {
            link: Some(Box::new(stream)),
            peer: peer.into(),
            read_timeout: READ_TIMEOUT,
            dry_run: false,
            pending: Vec::new(),
        }
    }

    /// Override the per-read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Address of the controller, as given at construction.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one command line.
    pub async fn send(&mut self, line: &str) -> ScanResult<()> {
        if self.dry_run {
            info!("Dry run send: {line}");
            return Ok(());
        }
        let link = self.link.as_mut().ok_or(ProtocolError::ConnectionClosed)?;

        debug!("-> {line}");
        link.write_all(line.as_bytes()).await?;
        link.write_all(b"\n").await?;
        link.flush().await?;
        Ok(())
    }

    /// Send multi-line text, then check `ERR?`.
    ///
    /// Blank lines are skipped with a warning.
    pub async fn send_multiline(&mut self, text: &str) -> ScanResult<()> {
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                warn!("Skipping empty command line");
                continue;
            }
            self.send(line).await?;
        }
        self.query_error().await
    }

    /// Send every line of `buffer` in order, then check `ERR?`.
    #[instrument(skip_all, fields(buffer = buffer.name(), lines = buffer.len()))]
    pub async fn send_buffer(&mut self, buffer: &CommandBuffer) -> ScanResult<()> {
        self.send_multiline(&buffer.render()).await
    }

    /// Ask the controller for its error code; `Ok` only for `0`.
    pub async fn query_error(&mut self) -> ScanResult<()> {
        self.send(ERROR_QUERY).await?;
        let response = self.receive_line().await?;
        debug!("<- {response}");

        let code: i32 = match response.trim().parse() {
            Ok(code) => code,
            Err(_) => {
                error!("Could not parse {ERROR_QUERY} response {response:?}");
                return Err(ProtocolError::UnparsableResponse {
                    query: ERROR_QUERY,
                    response,
                }
                .into());
            }
        };

        if code != 0 {
            error!(
                "Controller reported error {code}: {}",
                describe_gcs_error(code)
            );
            return Err(ProtocolError::controller(code).into());
        }
        Ok(())
    }

    /// Read up to the next newline and return the line without its terminator.
    ///
    /// Each read waits at most the read timeout; a timeout is logged and the
    /// read retried, so this only returns once a full line has arrived or the
    /// stream has ended.
    pub async fn receive_line(&mut self) -> ScanResult<String> {
        if self.dry_run {
            return Ok("0".to_string());
        }
        let link = self.link.as_mut().ok_or(ProtocolError::ConnectionClosed)?;

        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&raw);
                return Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string());
            }

            let mut chunk = [0u8; READ_CHUNK];
            match tokio::time::timeout(self.read_timeout, link.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    error!("Controller at {} closed the connection", self.peer);
                    return Err(ProtocolError::ConnectionClosed.into());
                }
                Ok(Ok(n)) => self.pending.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => warn!(
                    "No response from {} within {:?}, still waiting",
                    self.peer, self.read_timeout
                ),
            }
        }
    }

    /// Shut the connection down. Further sends fail with `ConnectionClosed`.
    pub async fn close(&mut self) -> ScanResult<()> {
        if let Some(mut link) = self.link.take() {
            info!("Closing connection to {}", self.peer);
            link.shutdown().await?;
        }
        Ok(())
    }
}

impl Drop for CommandProtocol {
    fn drop(&mut self) {
        if self.link.is_some() {
            debug!("Dropping open connection to {}", self.peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tracing_test::traced_test;

    /// Reads lines from the host side and answers each `ERR?` with `reply`.
    fn answering(device: DuplexStream, reply: &'static str) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(device);
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if line == ERROR_QUERY {
                    let _ = write.write_all(reply.as_bytes()).await;
                }
                seen.push(line);
            }
            seen
        })
    }

    #[tokio::test]
    async fn buffer_lines_are_sent_in_order_then_error_checked() {
        let (host, device) = tokio::io::duplex(1024);
        let fake = answering(device, "0\n");
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        let mut buffer = CommandBuffer::new("setup");
        buffer.extend(["SVO 1 1", "SVO 2 1"]);
        protocol.send_buffer(&buffer).await.unwrap();
        drop(protocol);

        let seen = fake.await.unwrap();
        assert_eq!(seen, vec!["SVO 1 1", "SVO 2 1", "ERR?"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn empty_lines_are_skipped() {
        let (host, device) = tokio::io::duplex(1024);
        let fake = answering(device, "0\n");
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        protocol
            .send_multiline("WGO 1 0 2 0\n   \n\nSTP\n")
            .await
            .unwrap();
        drop(protocol);

        assert_eq!(fake.await.unwrap(), vec!["WGO 1 0 2 0", "STP", "ERR?"]);
        assert!(logs_contain("Skipping empty command line"));
    }

    #[tokio::test]
    async fn nonzero_error_code_fails_the_send() {
        let (host, device) = tokio::io::duplex(1024);
        let _fake = answering(device, "1\n");
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        let err = protocol.send_multiline("XYZ").await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::Protocol(ProtocolError::Controller { code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn garbage_response_is_unparsable() {
        let (host, device) = tokio::io::duplex(1024);
        let _fake = answering(device, "hello\n");
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        let err = protocol.query_error().await.unwrap_err();
        match err {
            ScanError::Protocol(ProtocolError::UnparsableResponse { response, .. }) => {
                assert_eq!(response, "hello");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn wire_format_matches_gcs_framing() {
        let mock = tokio_test::io::Builder::new()
            .write(b"WGO 1 257 2 257")
            .write(b"\n")
            .write(b"ERR?")
            .write(b"\n")
            .read(b"0\n")
            .build();
        let mut protocol = CommandProtocol::from_stream(mock, "mock");

        protocol.send_multiline("WGO 1 257 2 257").await.unwrap();
    }

    #[tokio::test]
    async fn partial_reads_are_joined_and_leftovers_kept() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        device.write_all(b"1").await.unwrap();
        device.write_all(b"7\r\n0\n").await.unwrap();

        assert_eq!(protocol.receive_line().await.unwrap(), "17");
        assert_eq!(protocol.receive_line().await.unwrap(), "0");
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn read_timeouts_are_retried() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            device.write_all(b"0\n").await.unwrap();
            // keep the stream open until the reader is done
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        assert_eq!(protocol.receive_line().await.unwrap(), "0");
        assert!(logs_contain("still waiting"));
    }

    #[tokio::test]
    async fn closed_stream_is_reported() {
        let (host, device) = tokio::io::duplex(64);
        drop(device);
        let mut protocol = CommandProtocol::from_stream(host, "fake");

        let err = protocol.receive_line().await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::Protocol(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn dry_run_succeeds_without_io() {
        let mut protocol = CommandProtocol::dry_run("192.168.0.1:50000");
        assert!(protocol.is_dry_run());
        protocol.send_multiline("WGO 1 257 2 257").await.unwrap();
        assert_eq!(protocol.receive_line().await.unwrap(), "0");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (host, _device) = tokio::io::duplex(64);
        let mut protocol = CommandProtocol::from_stream(host, "fake");
        protocol.close().await.unwrap();

        let err = protocol.send("STP").await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::Protocol(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = CommandProtocol::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Connection { .. }));
    }

    #[tokio::test]
    async fn connect_talks_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let first = lines.next_line().await.unwrap();
            write.write_all(b"0\n").await.unwrap();
            first
        });

        let mut protocol = CommandProtocol::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        protocol.query_error().await.unwrap();
        protocol.close().await.unwrap();

        assert_eq!(server.await.unwrap().as_deref(), Some("ERR?"));
    }
}
