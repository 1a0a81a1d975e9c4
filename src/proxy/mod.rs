//! SOCKS5 protocol handling.
//!
//! Address codec, the CONNECT handshake and the byte relay between a client
//! and the destination it asked for.

pub mod address;
pub mod handshake;
pub mod relay;

pub use address::{decode_port, Address, AddressType};
pub use handshake::{negotiate, ConnectRequest, Greeting, Handshake, HandshakeReply, HandshakeState};
pub use relay::{relay, Direction, PairGuard, RelayDirection, RelayEnd, RelayOutcome, RelayPair};

/// SOCKS5 wire constants (RFC 1928).
pub mod consts {
    pub const SOCKS5_VERSION: u8 = 0x05;

    pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;

    pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

    pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
    pub const SOCKS5_ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
    pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

    pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
    pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
    pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
    pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
    pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
    pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
    pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}
