//! SOCKS5 address codec.
//!
//! Handles the `ATYP | DST.ADDR | DST.PORT` triple shared by the CONNECT
//! request and its reply. Address bytes are kept exactly as received so the
//! reply can echo them back unchanged.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::proxy::consts;

/// Address type tag (`ATYP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    /// 4-byte IPv4 address
    Ipv4,
    /// Length-prefixed host name
    DomainName,
    /// 16-byte IPv6 address
    Ipv6,
}

impl AddressType {
    /// Parse a wire tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            consts::SOCKS5_ADDR_TYPE_IPV4 => Ok(AddressType::Ipv4),
            consts::SOCKS5_ADDR_TYPE_DOMAIN_NAME => Ok(AddressType::DomainName),
            consts::SOCKS5_ADDR_TYPE_IPV6 => Ok(AddressType::Ipv6),
            other => Err(Error::UnsupportedAddressType(other)),
        }
    }

    /// Wire tag.
    pub fn as_u8(self) -> u8 {
        match self {
            AddressType::Ipv4 => consts::SOCKS5_ADDR_TYPE_IPV4,
            AddressType::DomainName => consts::SOCKS5_ADDR_TYPE_DOMAIN_NAME,
            AddressType::Ipv6 => consts::SOCKS5_ADDR_TYPE_IPV6,
        }
    }

    /// Address length for fixed-size types, `None` for domain names.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            AddressType::Ipv4 => Some(4),
            AddressType::Ipv6 => Some(16),
            AddressType::DomainName => None,
        }
    }
}

/// Decode a big-endian port.
#[inline]
pub fn decode_port(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// A destination address as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    atyp: AddressType,
    addr: Vec<u8>,
    port: [u8; 2],
}

impl Address {
    /// Read the address body and port for an already-read `ATYP`.
    pub async fn read_from<R>(reader: &mut R, atyp: AddressType) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let len = match atyp.fixed_len() {
            Some(len) => len,
            None => reader.read_u8().await? as usize,
        };

        let mut addr = vec![0u8; len];
        reader.read_exact(&mut addr).await?;

        let mut port = [0u8; 2];
        reader.read_exact(&mut port).await?;

        Ok(Self { atyp, addr, port })
    }

    /// Decode `ATYP | ADDR | PORT` from a buffer.
    ///
    /// Returns the address and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (&tag, rest) = buf.split_first().ok_or(Error::IncompleteHandshake)?;
        let atyp = AddressType::from_u8(tag)?;

        let (prefix, len) = match atyp.fixed_len() {
            Some(len) => (0, len),
            None => (1, *rest.first().ok_or(Error::IncompleteHandshake)? as usize),
        };

        let consumed = 1 + prefix + len + 2;
        if buf.len() < consumed {
            return Err(Error::IncompleteHandshake);
        }

        let addr = buf[1 + prefix..1 + prefix + len].to_vec();
        let port = [buf[consumed - 2], buf[consumed - 1]];

        Ok((Self { atyp, addr, port }, consumed))
    }

    /// Address type tag.
    pub fn address_type(&self) -> AddressType {
        self.atyp
    }

    /// Raw address bytes, without the domain length prefix.
    pub fn addr_bytes(&self) -> &[u8] {
        &self.addr
    }

    /// Raw port bytes as received.
    pub fn port_bytes(&self) -> [u8; 2] {
        self.port
    }

    /// Destination port.
    pub fn port(&self) -> u16 {
        decode_port(self.port)
    }

    /// Host part in a form `TcpStream::connect` understands.
    pub fn host(&self) -> String {
        match self.atyp {
            AddressType::Ipv4 => {
                let octets: [u8; 4] = self.addr.as_slice().try_into().unwrap_or_default();
                Ipv4Addr::from(octets).to_string()
            }
            AddressType::Ipv6 => {
                let octets: [u8; 16] = self.addr.as_slice().try_into().unwrap_or_default();
                Ipv6Addr::from(octets).to_string()
            }
            AddressType::DomainName => String::from_utf8_lossy(&self.addr).into_owned(),
        }
    }

    /// Encoded size of `ATYP | ADDR | PORT`.
    pub fn serialized_len(&self) -> usize {
        let prefix = match self.atyp {
            AddressType::DomainName => 1,
            _ => 0,
        };
        1 + prefix + self.addr.len() + 2
    }

    /// Append `ATYP | ADDR | PORT` to `buf`, echoing the received bytes.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.serialized_len());
        buf.put_u8(self.atyp.as_u8());
        if self.atyp == AddressType::DomainName {
            buf.put_u8(self.addr.len() as u8);
        }
        buf.put_slice(&self.addr);
        buf.put_slice(&self.port);
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        let port = addr.port().to_be_bytes();
        match addr {
            SocketAddr::V4(v4) => Self {
                atyp: AddressType::Ipv4,
                addr: v4.ip().octets().to_vec(),
                port,
            },
            SocketAddr::V6(v6) => Self {
                atyp: AddressType::Ipv6,
                addr: v6.ip().octets().to_vec(),
                port,
            },
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.atyp {
            AddressType::Ipv6 => write!(f, "[{}]:{}", self.host(), self.port()),
            _ => write!(f, "{}:{}", self.host(), self.port()),
        }
    }
}
