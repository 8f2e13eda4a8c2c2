//! Transport layer: resolves a configured host/port pair to a live socket.
//!
//! The RFB display-number convention lets a user say "display 1" instead of
//! a raw port: values under 100 are offset by the conventional base port
//! (5900 for normal connect mode, 5500 for listen mode), anything 100 or
//! above is used as a literal port.

use crate::errors::RfbClientError;
use rfb_protocol::socket::TcpSocket;
use tokio::net::TcpStream;

/// Base port for connect-mode display numbers (server listens, client connects).
const CONNECT_BASE_PORT: u16 = 5900;

/// Resolve a configured `rfb_port` value to the real TCP port to dial.
///
/// Values below 100 are treated as a display number and offset by
/// [`CONNECT_BASE_PORT`]; values of 100 or more are used verbatim as a port.
#[must_use]
pub fn resolve_connect_port(rfb_port: u16) -> u16 {
    if rfb_port < 100 {
        CONNECT_BASE_PORT + rfb_port
    } else {
        rfb_port
    }
}

/// A connected transport, ready to be split into RFB input/output streams.
pub struct Transport {
    socket: TcpSocket,
}

impl Transport {
    /// Connect to `host` on the port implied by `rfb_port` (see
    /// [`resolve_connect_port`]), disabling Nagle's algorithm on the socket.
    pub async fn connect(host: &str, rfb_port: u16) -> Result<Self, RfbClientError> {
        let port = resolve_connect_port(rfb_port);
        let socket = TcpSocket::connect(host, port)
            .await
            .map_err(|e| RfbClientError::ConnectionFailed(e.to_string()))?;
        Ok(Self { socket })
    }

    /// Split into owned read/write halves of the underlying TCP stream.
    #[must_use]
    pub fn split(self) -> (tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf) {
        let stream: TcpStream = self.socket.into_inner();
        stream.into_split()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_connect_port_display_number() {
        assert_eq!(resolve_connect_port(0), 5900);
        assert_eq!(resolve_connect_port(1), 5901);
        assert_eq!(resolve_connect_port(42), 5942);
    }

    #[test]
    fn test_resolve_connect_port_literal_port() {
        assert_eq!(resolve_connect_port(100), 100);
        assert_eq!(resolve_connect_port(6000), 6000);
    }
}
