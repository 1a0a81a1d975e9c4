//! SOCKS5 CONNECT handshake.
//!
//! Drives a client through `AwaitGreeting -> AwaitConnectRequest ->
//! Established`. Only the no-authentication method and the CONNECT command
//! are supported. Any failure is returned as an [`Error`] and the caller is
//! expected to drop the client connection.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::proxy::address::{Address, AddressType};
use crate::proxy::consts;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for `VER | NMETHODS | METHODS`
    AwaitGreeting,
    /// Method selected, waiting for the CONNECT request
    AwaitConnectRequest,
    /// Destination connected and success reply sent
    Established,
}

/// Client greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    pub methods: Vec<u8>,
}

impl Greeting {
    /// Read `VER | NMETHODS | METHODS`.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header).await?;
        check_version(header[0])?;

        let mut methods = vec![0u8; header[1] as usize];
        reader.read_exact(&mut methods).await?;

        Ok(Self {
            version: header[0],
            methods,
        })
    }
}

/// CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub version: u8,
    pub command: u8,
    pub reserved: u8,
    pub address: Address,
}

impl ConnectRequest {
    /// Read `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let [version, command, reserved, atyp] = header;

        check_version(version)?;
        if command != consts::SOCKS5_CMD_TCP_CONNECT {
            return Err(Error::UnsupportedCommand(command));
        }

        let atyp = AddressType::from_u8(atyp)?;
        let address = Address::read_from(reader, atyp).await?;

        Ok(Self {
            version,
            command,
            reserved,
            address,
        })
    }
}

/// Server reply to a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub reply: u8,
    pub address: Address,
}

impl HandshakeReply {
    /// Success reply echoing the requested address.
    pub fn success(address: Address) -> Self {
        Self {
            reply: consts::SOCKS5_REPLY_SUCCEEDED,
            address,
        }
    }

    /// Failure reply with an unspecified bind address.
    pub fn failure(reply: u8) -> Self {
        let unspecified = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        Self {
            reply,
            address: Address::from(unspecified),
        }
    }

    /// Encode `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(3 + self.address.serialized_len());
        buf.put_u8(consts::SOCKS5_VERSION);
        buf.put_u8(self.reply);
        buf.put_u8(0x00);
        self.address.write_to(&mut buf);
        buf
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn check_version(actual: u8) -> Result<()> {
    if actual != consts::SOCKS5_VERSION {
        return Err(Error::VersionMismatch {
            expected: consts::SOCKS5_VERSION,
            actual,
        });
    }
    Ok(())
}

/// Handshake state machine over a client stream.
pub struct Handshake<'a, S> {
    stream: &'a mut S,
    state: HandshakeState,
    failure_replies: bool,
}

impl<'a, S> Handshake<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a handshake on `stream`.
    ///
    /// With `failure_replies` set, a `REP != 0` reply is written before
    /// returning a request or connect error.
    pub fn new(stream: &'a mut S, failure_replies: bool) -> Self {
        Self {
            stream,
            state: HandshakeState::AwaitGreeting,
            failure_replies,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Read the greeting and select the no-authentication method.
    pub async fn greet(&mut self) -> Result<Greeting> {
        debug_assert_eq!(self.state, HandshakeState::AwaitGreeting);

        let greeting = Greeting::read_from(&mut *self.stream).await?;
        tracing::debug!(
            "client greeting version: {}, methods: {:?}",
            greeting.version,
            greeting.methods
        );

        self.stream
            .write_all(&[consts::SOCKS5_VERSION, consts::SOCKS5_AUTH_METHOD_NONE])
            .await?;
        self.stream.flush().await?;

        self.state = HandshakeState::AwaitConnectRequest;
        Ok(greeting)
    }

    /// Read the CONNECT request.
    pub async fn request(&mut self) -> Result<ConnectRequest> {
        debug_assert_eq!(self.state, HandshakeState::AwaitConnectRequest);

        match ConnectRequest::read_from(&mut *self.stream).await {
            Ok(request) => {
                tracing::debug!(
                    "client request cmd: {}, rsv: {}, atyp: {:?}, addr: {:?}, port: {:?}",
                    request.command,
                    request.reserved,
                    request.address.address_type(),
                    request.address.addr_bytes(),
                    request.address.port_bytes()
                );
                Ok(request)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Connect to the requested destination and send the success reply.
    pub async fn establish(&mut self, request: &ConnectRequest) -> Result<TcpStream> {
        debug_assert_eq!(self.state, HandshakeState::AwaitConnectRequest);

        let host = request.address.host();
        let port = request.address.port();
        tracing::info!("client request host: {}, port: {}", host, port);

        let target = match TcpStream::connect((host.as_str(), port)).await {
            Ok(target) => target,
            Err(source) => {
                let err = Error::Connect {
                    target: request.address.to_string(),
                    source,
                };
                return Err(self.fail(err).await);
            }
        };

        HandshakeReply::success(request.address.clone())
            .write_to(&mut *self.stream)
            .await?;

        self.state = HandshakeState::Established;
        tracing::debug!("handshake complete for {}", request.address);
        Ok(target)
    }

    /// Drive the whole negotiation.
    pub async fn run(mut self) -> Result<(TcpStream, Address)> {
        self.greet().await?;
        let request = self.request().await?;
        let target = self.establish(&request).await?;
        Ok((target, request.address))
    }

    async fn fail(&mut self, err: Error) -> Error {
        let replyable = matches!(
            err,
            Error::UnsupportedCommand(_)
                | Error::UnsupportedAddressType(_)
                | Error::Connect { .. }
        );
        if self.failure_replies && replyable {
            let reply = HandshakeReply::failure(err.reply_code());
            // Client may already be gone
            let _ = reply.write_to(&mut *self.stream).await;
        }
        err
    }
}

/// Run the full handshake on `stream`, returning the connected destination.
pub async fn negotiate<S>(stream: &mut S, failure_replies: bool) -> Result<(TcpStream, Address)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Handshake::new(stream, failure_replies).run().await
}
