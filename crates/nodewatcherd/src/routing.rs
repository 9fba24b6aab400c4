//! Routing daemon readers (babeld control port, bird control socket)
//!
//! Both daemons speak a line protocol: we write a dump command from a
//! detached task and scan the replies on the same connection until the
//! daemon's terminator. The reader never waits on the writer; the reply
//! stream delimits itself.
//!
//! A daemon that is not running is normal on most gateways, so connect
//! failures yield an empty [`RoutingInfo`] rather than an error.

use crate::types::is_ipv6_link_local;
use serde::Serialize;
use std::io;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// babeld local configuration interface
pub const BABELD_ADDRESS: &str = "[::1]:33123";

/// bird control socket
pub const BIRD_SOCKET: &str = "/run/bird/bird.ctl";

/// Bound for connecting and for the whole conversation
pub const ROUTING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingNeighbour {
    pub ip: String,
    pub outgoing_interface: String,
    pub link_cost: String,
}

/// Version string and neighbours reported by one or more daemons
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingInfo {
    pub version: String,
    pub neighbours: Vec<RoutingNeighbour>,
}

impl RoutingInfo {
    /// Combine babeld and bird results, babeld first
    pub fn merge(babeld: RoutingInfo, bird: RoutingInfo) -> RoutingInfo {
        let version = [babeld.version, bird.version]
            .into_iter()
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        let mut neighbours = babeld.neighbours;
        neighbours.extend(bird.neighbours);

        RoutingInfo {
            version,
            neighbours,
        }
    }
}

/// Where to find the daemons
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub babeld_address: String,
    pub bird_socket: PathBuf,
    pub timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            babeld_address: BABELD_ADDRESS.to_string(),
            bird_socket: PathBuf::from(BIRD_SOCKET),
            timeout: ROUTING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Incremental parser for one daemon's reply stream
pub trait ReplyParser {
    fn feed(&mut self, line: &str) -> Flow;

    /// `complete` is false when reading failed part way; neighbours are
    /// then dropped but the version seen so far is kept
    fn finish(self, complete: bool) -> RoutingInfo;
}

/// babeld `dump` output: banner until `ok`, then `add neighbour` lines until `ok`
#[derive(Debug, Default)]
pub struct BabeldParser {
    past_banner: bool,
    version: String,
    neighbours: Vec<RoutingNeighbour>,
}

impl ReplyParser for BabeldParser {
    fn feed(&mut self, line: &str) -> Flow {
        let fields: Vec<&str> = line.split_whitespace().collect();

        if !self.past_banner {
            if line == "ok" {
                self.past_banner = true;
            } else if fields.len() > 1 && fields[0] == "version" {
                self.version = fields[1..].join(" ");
            }
            return Flow::Continue;
        }

        if fields.len() == 1 && fields[0] == "ok" {
            return Flow::Done;
        }

        // add neighbour <id> address <ip> if <ifname> ... cost <cost>
        if fields.len() >= 7 && fields[0] == "add" && fields[1] == "neighbour" {
            self.neighbours.push(RoutingNeighbour {
                ip: fields[4].to_string(),
                outgoing_interface: fields[6].to_string(),
                link_cost: fields[fields.len() - 1].to_string(),
            });
        }
        Flow::Continue
    }

    fn finish(self, complete: bool) -> RoutingInfo {
        RoutingInfo {
            version: self.version,
            neighbours: if complete { self.neighbours } else { Vec::new() },
        }
    }
}

/// bird `show babel neighbors` output
#[derive(Debug, Default)]
pub struct BirdParser {
    version: String,
    neighbours: Vec<RoutingNeighbour>,
}

impl ReplyParser for BirdParser {
    fn feed(&mut self, line: &str) -> Flow {
        // 8xxx/9xxx are bird error replies
        if line.starts_with('8') || line.starts_with('9') {
            return Flow::Done;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() == 1 && fields[0] == "0000" {
            return Flow::Done;
        }

        // 0001 BIRD 2.0.8 ready.
        if fields.len() == 4 && fields[0].starts_with('0') && fields[1].contains("BIRD") {
            self.version = format!("bird-{}", fields[2]);
        }

        if fields.len() == 6 && line.starts_with(' ') {
            let link_local = fields[0]
                .parse::<Ipv6Addr>()
                .is_ok_and(|ip| is_ipv6_link_local(&ip));
            if link_local {
                self.neighbours.push(RoutingNeighbour {
                    ip: fields[0].to_string(),
                    outgoing_interface: fields[1].to_string(),
                    link_cost: fields[2].to_string(),
                });
            }
        }
        Flow::Continue
    }

    fn finish(self, complete: bool) -> RoutingInfo {
        RoutingInfo {
            version: self.version,
            neighbours: if complete { self.neighbours } else { Vec::new() },
        }
    }
}

async fn send_commands<W>(mut writer: WriteHalf<W>, commands: &'static [&'static str]) -> io::Result<WriteHalf<W>>
where
    W: AsyncWrite,
{
    for command in commands {
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(writer)
}

/// Run one command/reply exchange on an established connection
pub async fn exchange<S, P>(
    stream: S,
    commands: &'static [&'static str],
    farewell: Option<&'static str>,
    mut parser: P,
    timeout: Duration,
) -> RoutingInfo
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    P: ReplyParser,
{
    let deadline = Instant::now() + timeout;
    let (reader, writer) = tokio::io::split(stream);

    // Detached: the reply parser only reacts to what arrives
    let sender = tokio::spawn(send_commands(writer, commands));

    let mut lines = BufReader::new(reader).lines();
    let complete = loop {
        match tokio::time::timeout_at(deadline, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                trace!(line = %line, "Routing daemon reply");
                if parser.feed(&line) == Flow::Done {
                    break true;
                }
            }
            Ok(Ok(None)) => break true,
            Ok(Err(e)) => {
                debug!(error = %e, "Routing daemon read failed");
                break false;
            }
            Err(_) => {
                debug!("Routing daemon read timed out");
                break false;
            }
        }
    };

    let info = parser.finish(complete);

    if let Some(farewell) = farewell.filter(|_| complete) {
        match tokio::time::timeout_at(deadline, sender).await {
            Ok(Ok(Ok(mut writer))) => {
                let line = format!("{farewell}\n");
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!(error = %e, "Failed to send farewell");
                }
            }
            Ok(Ok(Err(e))) => debug!(error = %e, "Routing daemon command send failed"),
            Ok(Err(e)) => debug!(error = %e, "Command task failed"),
            Err(_) => debug!("Command task did not finish"),
        }
    }

    info
}

/// Query babeld over its TCP configuration interface
#[instrument(skip(config))]
pub async fn babeld_info(config: &RoutingConfig) -> RoutingInfo {
    let connect = TcpStream::connect(config.babeld_address.as_str());
    let stream = match tokio::time::timeout(config.timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(address = %config.babeld_address, error = %e, "babeld not reachable");
            return RoutingInfo::default();
        }
        Err(_) => {
            debug!(address = %config.babeld_address, "babeld connect timed out");
            return RoutingInfo::default();
        }
    };

    exchange(
        stream,
        &["dump"],
        Some("quit"),
        BabeldParser::default(),
        config.timeout,
    )
    .await
}

/// Query bird over its unix control socket
#[cfg(unix)]
#[instrument(skip(config))]
pub async fn bird_info(config: &RoutingConfig) -> RoutingInfo {
    use tokio::net::UnixStream;

    let connect = UnixStream::connect(&config.bird_socket);
    let stream = match tokio::time::timeout(config.timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(socket = %config.bird_socket.display(), error = %e, "bird not reachable");
            return RoutingInfo::default();
        }
        Err(_) => {
            debug!(socket = %config.bird_socket.display(), "bird connect timed out");
            return RoutingInfo::default();
        }
    };

    exchange(
        stream,
        &["show babel neighbors", "quit"],
        None,
        BirdParser::default(),
        config.timeout,
    )
    .await
}

#[cfg(not(unix))]
pub async fn bird_info(_config: &RoutingConfig) -> RoutingInfo {
    RoutingInfo::default()
}

/// Query both daemons and merge what they report
pub async fn collect(config: &RoutingConfig) -> RoutingInfo {
    let (babeld, bird) = tokio::join!(babeld_info(config), bird_info(config));
    let info = RoutingInfo::merge(babeld, bird);
    debug!(
        version = %info.version,
        neighbours = info.neighbours.len(),
        "Collected routing daemon data"
    );
    info
}
