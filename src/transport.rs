//! TCP transport for the BMS, one connection per exchange scope.
//!
//! Responses are assembled from a chunked stream by a [`FrameAssembler`] until either a sentinel
//! (frame end marker, console prompt) or a declared length is seen. The [`Connector`] and
//! [`Connection`] traits decouple the client and the poll coordinator from the network.
//!
//! # Example
//!
//! ```no_run
//! use pylonbms_lib::transport::{send_and_receive, TcpConnector, Terminator};
//! use pylonbms_lib::protocol::{self, PackCount};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), pylonbms_lib::Error> {
//!     let connector = TcpConnector::new("192.168.1.50", protocol::DEFAULT_PORT);
//!     let raw = send_and_receive(&connector, &PackCount::request(), Terminator::FRAME).await?;
//!     let frame = protocol::Frame::decode(&raw)?;
//!     println!("packs: {}", PackCount::decode(&frame)?);
//!     Ok(())
//! }
//! ```

use crate::protocol::{END_BYTE, START_BYTE};
use crate::Error;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest read issued at once; some serial-to-TCP gateways refuse to deliver more atomically.
pub const CHUNK_SIZE: usize = 120;
pub const MAX_RESPONSE_LENGTH: usize = 16 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub const CONSOLE_PROMPT: &[u8] = b"pylon>";
const CONSOLE_END_LINES: [&str; 2] = ["Command completed successfully", "$$"];
const CONSOLE_SEPARATOR: &str = "@";

type Result<T> = std::result::Result<T, Error>;

/// How the end of a response is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Bytes before `start` are discarded; the response ends with the first `end` after it.
    Sentinel {
        start: Option<u8>,
        end: &'static [u8],
    },
    /// Exactly `n` bytes.
    Length(usize),
}

impl Terminator {
    /// Binary protocol frame `~ ... \r`.
    pub const FRAME: Terminator = Terminator::Sentinel {
        start: Some(START_BYTE),
        end: &[END_BYTE],
    };
    /// Console output up to and including the prompt.
    pub const CONSOLE: Terminator = Terminator::Sentinel {
        start: None,
        end: CONSOLE_PROMPT,
    };
}

/// Accumulates received chunks until a response is complete.
#[derive(Debug)]
pub struct FrameAssembler {
    until: Terminator,
    limit: usize,
    buffer: Vec<u8>,
    started: bool,
    discarded: usize,
}

impl FrameAssembler {
    pub fn new(until: Terminator) -> Self {
        Self::with_limit(until, MAX_RESPONSE_LENGTH)
    }

    pub fn with_limit(until: Terminator, limit: usize) -> Self {
        let started = !matches!(until, Terminator::Sentinel { start: Some(_), .. });
        Self {
            until,
            limit,
            buffer: Vec::new(),
            started,
            discarded: 0,
        }
    }

    /// Feeds received bytes, returns `true` once the response is complete.
    pub fn push(&mut self, mut data: &[u8]) -> Result<bool> {
        if !self.started {
            if let Terminator::Sentinel {
                start: Some(start), ..
            } = self.until
            {
                match data.iter().position(|b| *b == start) {
                    Some(position) => {
                        self.discarded += position;
                        self.started = true;
                        data = &data[position..];
                    }
                    None => {
                        self.discarded += data.len();
                        return Ok(false);
                    }
                }
            }
        }
        self.buffer.extend_from_slice(data);
        if self.frame_end().is_some() {
            return Ok(true);
        }
        if self.buffer.len() > self.limit {
            return Err(Error::Oversized { limit: self.limit });
        }
        Ok(false)
    }

    fn frame_end(&self) -> Option<usize> {
        match self.until {
            Terminator::Sentinel { start, end } => {
                let from = usize::from(start.is_some());
                if !self.started || end.is_empty() || self.buffer.len() < from + end.len() {
                    return None;
                }
                self.buffer[from..]
                    .windows(end.len())
                    .position(|window| window == end)
                    .map(|position| from + position + end.len())
            }
            Terminator::Length(n) => (self.buffer.len() >= n).then_some(n),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.frame_end().is_some()
    }

    /// Number of bytes kept so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes skipped while waiting for the start marker.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// The complete response, `None` while incomplete. Bytes after the terminator are dropped.
    pub fn into_frame(mut self) -> Option<Vec<u8>> {
        let end = self.frame_end()?;
        if end < self.buffer.len() {
            log::trace!(
                "dropping {} bytes after terminator",
                self.buffer.len() - end
            );
        }
        self.buffer.truncate(end);
        Some(self.buffer)
    }
}

/// A connected transport able to exchange one request for one response at a time.
#[async_trait]
pub trait Connection: Send {
    /// Sends `request` and reads until `until` is satisfied.
    async fn exchange(&mut self, request: &[u8], until: Terminator) -> Result<Vec<u8>>;
}

/// Opens connections to one BMS.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self) -> Result<Self::Connection>;

    /// Human readable peer name used in logs and errors.
    fn peer(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Sets the bound for each single read and for the request write.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self) -> Result<TcpConnection> {
        let peer = self.peer();
        log::trace!("connecting to {peer}");
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(Error::ConnectionFailure { peer, source }),
            Err(_) => {
                return Err(Error::ConnectionFailure {
                    peer,
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timeout {:?} elapsed", self.connect_timeout),
                    ),
                })
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("set_nodelay failed for {peer}: {err}");
        }
        Ok(TcpConnection {
            stream,
            peer,
            read_timeout: self.read_timeout,
        })
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Open TCP stream, closed when dropped.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: String,
    read_timeout: Duration,
}

impl TcpConnection {
    fn failure(&self, source: io::Error) -> Error {
        Error::ConnectionFailure {
            peer: self.peer.clone(),
            source,
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn exchange(&mut self, request: &[u8], until: Terminator) -> Result<Vec<u8>> {
        log::trace!("write bytes: {}", String::from_utf8_lossy(request).escape_debug());
        match tokio::time::timeout(self.read_timeout, self.stream.write_all(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(self.failure(err)),
            Err(_) => return Err(Error::ReadTimeout(self.read_timeout)),
        }

        let mut assembler = FrameAssembler::new(until);
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let received =
                match tokio::time::timeout(self.read_timeout, self.stream.read(&mut chunk)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(err)) => return Err(self.failure(err)),
                    Err(_) => {
                        log::trace!(
                            "read timeout, discarding {} partial bytes",
                            assembler.buffered()
                        );
                        return Err(Error::ReadTimeout(self.read_timeout));
                    }
                };
            if received == 0 {
                return Err(self.failure(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "connection closed after {} response bytes",
                        assembler.buffered()
                    ),
                )));
            }
            log::trace!("read {received} bytes: {:02X?}", &chunk[..received]);
            if assembler.push(&chunk[..received])? {
                break;
            }
        }
        if assembler.discarded() > 0 {
            log::debug!(
                "skipped {} bytes before start of response",
                assembler.discarded()
            );
        }
        assembler
            .into_frame()
            .ok_or_else(|| Error::Malformed("incomplete response".into()))
    }
}

/// Connects, exchanges one request and closes the connection again.
pub async fn send_and_receive<C: Connector + ?Sized>(
    connector: &C,
    request: &[u8],
    until: Terminator,
) -> Result<Vec<u8>> {
    let mut connection = connector.connect().await?;
    connection.exchange(request, until).await
}

/// Splits console output into lines, dropping blank lines, end markers and the prompt.
pub fn console_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .filter(|line| line.as_bytes() != CONSOLE_PROMPT)
        .filter(|line| !CONSOLE_END_LINES.contains(line))
        .map(str::to_string)
        .collect()
}

/// Runs one console command on an open connection and returns its output lines.
///
/// The console echoes the command, then prints an `@` line, the output, and the prompt.
pub async fn console_exec<T: Connection + ?Sized>(
    connection: &mut T,
    command: &str,
) -> Result<Vec<String>> {
    let raw = connection
        .exchange(format!("{command}\r").as_bytes(), Terminator::CONSOLE)
        .await?;
    parse_console(command, &raw)
}

fn parse_console(command: &str, raw: &[u8]) -> Result<Vec<String>> {
    let mut lines = console_lines(raw).into_iter();
    match lines.next() {
        Some(echo) if echo == command => {}
        Some(echo) => {
            return Err(Error::Console(format!(
                "command echo mismatch, sent {command:?} got {echo:?}"
            )))
        }
        None => return Err(Error::Console("empty response".into())),
    }
    if lines.next().as_deref() != Some(CONSOLE_SEPARATOR) {
        return Err(Error::Console("missing @ separator".into()));
    }
    Ok(lines.collect())
}
