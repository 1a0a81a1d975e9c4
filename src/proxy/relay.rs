//! Byte relay between a client and its destination.
//!
//! Each established connection becomes a [`RelayPair`] that is split into two
//! independent [`RelayDirection`] tasks. The directions share fate through a
//! cancellation token: whichever side finishes first closes the pair and the
//! other side abandons its blocked read or write, so both sockets are
//! released once both tasks have returned.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Copy buffer size per direction.
pub const RELAY_BUFFER_SIZE: usize = 8 * 1024;

/// Which way bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToTarget => f.write_str("client->target"),
            Direction::TargetToClient => f.write_str("target->client"),
        }
    }
}

/// How a relay direction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Source reached end of stream after transferring data
    Eof,
    /// Source ended before a single byte was copied
    Empty,
    /// Read or write failed
    Error(io::ErrorKind),
    /// The other direction closed the pair first
    Closed,
}

/// Result of one relay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub direction: Direction,
    pub bytes: u64,
    pub end: RelayEnd,
}

/// Closes the pair when dropped.
///
/// Held by each direction for the duration of its copy loop so that every
/// exit path, including a panic, releases the other direction.
pub struct PairGuard {
    token: CancellationToken,
}

impl PairGuard {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Close the pair now. Idempotent.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copy `from` into `to` until EOF, an error, or the pair is closed.
///
/// Both endpoints are consumed and dropped on return. Errors are reported
/// in the outcome only; shutdown errors are ignored.
pub async fn relay<R, W>(
    mut from: R,
    mut to: W,
    direction: Direction,
    pair: CancellationToken,
) -> RelayOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let guard = PairGuard::new(pair);
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        let n = tokio::select! {
            biased;
            _ = guard.token.cancelled() => break RelayEnd::Closed,
            res = from.read(&mut buf) => match res {
                Ok(0) => break RelayEnd::Eof,
                Ok(n) => n,
                Err(e) => break RelayEnd::Error(e.kind()),
            },
        };

        let res = tokio::select! {
            biased;
            _ = guard.token.cancelled() => break RelayEnd::Closed,
            res = to.write_all(&buf[..n]) => res,
        };
        if let Err(e) = res {
            break RelayEnd::Error(e.kind());
        }
        bytes += n as u64;
    };

    let end = match end {
        RelayEnd::Eof if bytes == 0 && !guard.is_closed() => RelayEnd::Empty,
        RelayEnd::Eof => {
            let _ = to.flush().await;
            let _ = to.shutdown().await;
            RelayEnd::Eof
        }
        other => other,
    };

    guard.close();
    RelayOutcome {
        direction,
        bytes,
        end,
    }
}

/// A client connection and its destination, ready to relay.
pub struct RelayPair {
    client: TcpStream,
    target: TcpStream,
    token: CancellationToken,
}

impl RelayPair {
    pub fn new(client: TcpStream, target: TcpStream) -> Self {
        Self {
            client,
            target,
            token: CancellationToken::new(),
        }
    }

    /// Split into the client->target and target->client tasks.
    pub fn into_directions(self) -> (RelayDirection, RelayDirection) {
        let client_label = peer_label(&self.client);
        let target_label = peer_label(&self.target);

        let (client_read, client_write) = self.client.into_split();
        let (target_read, target_write) = self.target.into_split();

        let upstream = RelayDirection {
            direction: Direction::ClientToTarget,
            from: client_read,
            to: target_write,
            label: format!("client({}) to remote({})", client_label, target_label),
            token: self.token.clone(),
        };
        let downstream = RelayDirection {
            direction: Direction::TargetToClient,
            from: target_read,
            to: client_write,
            label: format!("remote({}) to client({})", target_label, client_label),
            token: self.token,
        };

        (upstream, downstream)
    }
}

fn peer_label(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "?".into())
}

/// One direction of a [`RelayPair`].
pub struct RelayDirection {
    direction: Direction,
    from: OwnedReadHalf,
    to: OwnedWriteHalf,
    label: String,
    token: CancellationToken,
}

impl RelayDirection {
    pub async fn run(self) -> RelayOutcome {
        tracing::debug!("transfer from {}", self.label);
        let outcome = relay(self.from, self.to, self.direction, self.token).await;

        match outcome.end {
            RelayEnd::Empty => {
                tracing::debug!("transfer from {} ended without data", self.label)
            }
            RelayEnd::Error(kind) => {
                tracing::debug!("transfer from {} failed: {:?}", self.label, kind)
            }
            _ => tracing::debug!(
                "transfer from {} end, {} bytes",
                self.label,
                outcome.bytes
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (connected.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_relay_copies_then_closes_pair() {
        let input: &[u8] = b"hello relay";
        let (mut sink, writer) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let outcome = relay(input, writer, Direction::ClientToTarget, token.clone()).await;
        assert_eq!(outcome.end, RelayEnd::Eof);
        assert_eq!(outcome.bytes, 11);
        assert!(token.is_cancelled());

        let mut received = Vec::new();
        sink.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello relay");
    }

    #[tokio::test]
    async fn test_empty_stream_is_anomaly() {
        let input: &[u8] = b"";
        let (_sink, writer) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let outcome = relay(input, writer, Direction::TargetToClient, token.clone()).await;
        assert_eq!(outcome.end, RelayEnd::Empty);
        assert_eq!(outcome.bytes, 0);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_pair_stops_blocked_reader() {
        let (_peer, reader) = tokio::io::duplex(64);
        let (_sink, writer) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let task = tokio::spawn(relay(reader, writer, Direction::ClientToTarget, token.clone()));
        token.cancel();

        let outcome = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(outcome.end, RelayEnd::Closed);
    }

    #[tokio::test]
    async fn test_client_close_closes_target() {
        let (mut client, client_side) = tcp_pair().await;
        let (target_side, mut target) = tcp_pair().await;

        let pair = RelayPair::new(client_side, target_side);
        let (upstream, downstream) = pair.into_directions();
        let up = tokio::spawn(upstream.run());
        let down = tokio::spawn(downstream.run());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        target.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client);

        let mut rest = Vec::new();
        let n = timeout(Duration::from_secs(5), target.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        let up = up.await.unwrap();
        let down = down.await.unwrap();
        assert_eq!(up.bytes, 4);
        assert_eq!(down.bytes, 4);
        assert_eq!(down.end, RelayEnd::Closed);
    }
}
