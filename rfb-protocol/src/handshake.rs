//! RFB protocol handshake implementation.
//!
//! This module implements the three-phase RFB (Remote Framebuffer) protocol handshake:
//!
//! 1. **Protocol Version Negotiation** - client and server exchange version banners
//! 2. **Security Handshake** - negotiate and execute a security/authentication type
//! 3. **Initialization** - exchange ClientInit/ServerInit messages
//!
//! # Protocol Version
//!
//! The client always advertises and uses **RFB 3.3**, regardless of what version
//! the server reports. Higher server versions are accepted but negotiated down:
//! the client's reply is always `"RFB 003.003\n"`. This keeps the security
//! handshake on the simpler 3.3 wire format (a single 32-bit security-type code,
//! rather than 3.8's count-prefixed list).
//!
//! # Security Types
//!
//! - `None` (1) - no authentication.
//! - `VncAuth` (2) - DES challenge/response (see [`crate::auth`]).
//! - Anything else is rejected as unsupported.
//!
//! # Wire Format
//!
//! All multi-byte integers use **big-endian** (network byte order) per RFB specification.
//!
//! # Error Handling
//!
//! This module follows the project's **fail-fast** policy:
//! - Invalid protocol versions are rejected immediately
//! - Unsupported security types cause connection failure
//! - Malformed messages result in clear error messages
//! - No defensive fallbacks or silent degradation
//!
//! # References
//!
//! - [RFB Protocol Specification](https://github.com/rfbproto/rfbproto/blob/master/rfbproto.rst)

use crate::auth;
use crate::io::{RfbInStream, RfbOutStream};
use crate::messages;
use tokio::io::{AsyncRead, AsyncWrite};

/// RFB protocol version string the client always sends and uses.
///
/// The core pins itself to RFB 3.3: simpler security handshake, sufficient
/// for every encoding and auth scheme this client supports.
const CLIENT_VERSION_BYTES: &[u8; 12] = b"RFB 003.003\n";

/// Security type constant for no authentication.
pub const SECURITY_TYPE_NONE: u32 = 1;

/// Security type constant for VNC (DES challenge/response) authentication.
pub const SECURITY_TYPE_VNC_AUTH: u32 = 2;

/// The server's protocol version, as reported in its banner.
///
/// Purely informational: the client always negotiates down to 3.3 regardless
/// of what the server advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

/// Outcome of a VNC-auth security negotiation that required a password.
///
/// Carries the server's final 32-bit result code so callers can report
/// `InfoAuthResult(ok, scheme, result)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VncAuthResult {
    pub ok: bool,
    pub result_code: u32,
}

/// A password source invoked when the server asks for VNC authentication.
///
/// Implementors typically enqueue a `GetPassword` action item and block on a
/// two-party barrier until the render thread posts a password (or cancels).
/// Returning `None` is treated as a cancellation, not an error: the auth
/// attempt fails cleanly with an empty password.
#[async_trait::async_trait]
pub trait PasswordProvider: Send + Sync {
    async fn get_password(&self) -> Option<Vec<u8>>;
}

/// Negotiate RFB protocol version with the server.
///
/// Reads the server's 12-byte version banner, then always replies with
/// `"RFB 003.003\n"` regardless of what the server advertised.
pub async fn negotiate_version<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
) -> std::io::Result<ServerVersion> {
    let mut version_buf = [0u8; 12];
    instream.read_bytes(&mut version_buf).await?;

    if &version_buf[0..4] != b"RFB " || version_buf[11] != b'\n' || version_buf[7] != b'.' {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "invalid RFB version string: expected 'RFB xxx.yyy\\n', got {:?}",
                String::from_utf8_lossy(&version_buf)
            ),
        ));
    }

    let major_str = std::str::from_utf8(&version_buf[4..7]).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid major version digits: {}", e),
        )
    })?;
    let minor_str = std::str::from_utf8(&version_buf[8..11]).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid minor version digits: {}", e),
        )
    })?;

    let major: u32 = major_str.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid major version number: {}", e),
        )
    })?;
    let minor: u32 = minor_str.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid minor version number: {}", e),
        )
    })?;

    if major < 3 || (major == 3 && minor < 3) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported RFB version {}.{} (< 003.003)", major, minor),
        ));
    }

    outstream.write_bytes(CLIENT_VERSION_BYTES);
    outstream.flush().await?;

    Ok(ServerVersion { major, minor })
}

/// Negotiate security with the server and, if required, perform VNC auth.
///
/// Because the client always pins itself to RFB 3.3, the security handshake
/// always uses the 3.3 wire format: a single 32-bit security-type code from
/// the server, rather than 3.8's count-prefixed list.
///
/// Returns `Ok(None)` when no password round-trip was required (scheme
/// `None`), or `Ok(Some(result))` after a VNC-auth attempt.
pub async fn negotiate_security<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    passwords: &dyn PasswordProvider,
) -> std::io::Result<Option<VncAuthResult>> {
    let security_type = instream.read_u32().await?;

    match security_type {
        0 => {
            let reason_len = instream.read_u32().await? as usize;
            let mut reason_buf = vec![0u8; reason_len];
            instream.read_bytes(&mut reason_buf).await?;
            let reason = String::from_utf8_lossy(&reason_buf);
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("server rejected connection: {}", reason),
            ))
        }
        t if t == SECURITY_TYPE_NONE => Ok(None),
        t if t == SECURITY_TYPE_VNC_AUTH => {
            let mut challenge = [0u8; auth::CHALLENGE_LEN];
            instream.read_bytes(&mut challenge).await?;

            let mut password = passwords.get_password().await.unwrap_or_default();
            let response = auth::encrypt_challenge(&challenge, &password);
            password.fill(0);

            outstream.write_bytes(&response);
            outstream.flush().await?;

            let result_code = instream.read_u32().await?;
            Ok(Some(VncAuthResult {
                ok: result_code == 0,
                result_code,
            }))
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported security type: {} (only None=1, VncAuth=2 supported)", other),
        )),
    }
}

/// Send ClientInit message to the server.
pub async fn send_client_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    shared: bool,
) -> std::io::Result<()> {
    let client_init = messages::ClientInit { shared };
    client_init.write_to(outstream);
    outstream.flush().await?;
    Ok(())
}

/// Receive ServerInit message from the server.
pub async fn recv_server_init<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> std::io::Result<messages::ServerInit> {
    messages::ServerInit::read_from(instream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::types::PixelFormat;

    struct NonePasswords;
    #[async_trait::async_trait]
    impl PasswordProvider for NonePasswords {
        async fn get_password(&self) -> Option<Vec<u8>> {
            None
        }
    }

    struct FixedPassword(&'static [u8]);
    #[async_trait::async_trait]
    impl PasswordProvider for FixedPassword {
        async fn get_password(&self) -> Option<Vec<u8>> {
            Some(self.0.to_vec())
        }
    }

    fn create_duplex_pair() -> (
        (RfbInStream<tokio::io::DuplexStream>, RfbOutStream<tokio::io::DuplexStream>),
        (RfbInStream<tokio::io::DuplexStream>, RfbOutStream<tokio::io::DuplexStream>),
    ) {
        let (client_read, server_write) = tokio::io::duplex(1024);
        let (server_read, client_write) = tokio::io::duplex(1024);
        (
            (RfbInStream::new(client_read), RfbOutStream::new(client_write)),
            (RfbInStream::new(server_read), RfbOutStream::new(server_write)),
        )
    }

    #[tokio::test]
    async fn test_version_negotiation_always_replies_3_3() {
        let ((mut client_in, mut client_out), (mut server_in, mut server_out)) = create_duplex_pair();

        server_out.write_bytes(b"RFB 003.008\n");
        server_out.flush().await.unwrap();

        let negotiated = negotiate_version(&mut client_in, &mut client_out).await.unwrap();
        assert_eq!(negotiated, ServerVersion { major: 3, minor: 8 });

        let mut buf = [0u8; 12];
        server_in.read_bytes(&mut buf).await.unwrap();
        assert_eq!(&buf, b"RFB 003.003\n");
    }

    #[tokio::test]
    async fn test_version_negotiation_3_3_server() {
        let ((mut client_in, mut client_out), (mut server_in, mut server_out)) = create_duplex_pair();

        server_out.write_bytes(b"RFB 003.003\n");
        server_out.flush().await.unwrap();

        let negotiated = negotiate_version(&mut client_in, &mut client_out).await.unwrap();
        assert_eq!(negotiated, ServerVersion { major: 3, minor: 3 });

        let mut buf = [0u8; 12];
        server_in.read_bytes(&mut buf).await.unwrap();
        assert_eq!(&buf, b"RFB 003.003\n");
    }

    #[tokio::test]
    async fn test_unsupported_version() {
        let ((mut client_in, mut client_out), (_, mut server_out)) = create_duplex_pair();

        server_out.write_bytes(b"RFB 002.002\n");
        server_out.flush().await.unwrap();

        let result = negotiate_version(&mut client_in, &mut client_out).await;
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("unsupported") && err_msg.contains("2.2"));
    }

    #[tokio::test]
    async fn test_security_none() {
        let ((mut client_in, mut client_out), (_, mut server_out)) = create_duplex_pair();

        server_out.write_u32(SECURITY_TYPE_NONE);
        server_out.flush().await.unwrap();

        let outcome = negotiate_security(&mut client_in, &mut client_out, &NonePasswords)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_security_connection_failed() {
        let ((mut client_in, mut client_out), (_, mut server_out)) = create_duplex_pair();

        server_out.write_u32(0);
        server_out.write_u32(b"nope".len() as u32);
        server_out.write_bytes(b"nope");
        server_out.flush().await.unwrap();

        let result = negotiate_security(&mut client_in, &mut client_out, &NonePasswords).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_security_vnc_auth_success() {
        let ((mut client_in, mut client_out), (mut server_in, mut server_out)) = create_duplex_pair();

        let challenge = {
            let mut c = [0u8; 16];
            for (i, b) in c.iter_mut().enumerate() {
                *b = i as u8;
            }
            c
        };
        let expected_response = crate::auth::encrypt_challenge(&challenge, b"password");

        server_out.write_u32(SECURITY_TYPE_VNC_AUTH);
        server_out.write_bytes(&challenge);
        server_out.flush().await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut response = [0u8; 16];
            server_in.read_bytes(&mut response).await.unwrap();
            server_out.write_u32(0);
            server_out.flush().await.unwrap();
            response
        });

        let outcome = negotiate_security(&mut client_in, &mut client_out, &FixedPassword(b"password"))
            .await
            .unwrap()
            .expect("vnc auth should report a result");
        assert!(outcome.ok);
        assert_eq!(outcome.result_code, 0);

        let observed_response = server_task.await.unwrap();
        assert_eq!(observed_response, expected_response);
    }

    #[tokio::test]
    async fn test_security_vnc_auth_failure_result() {
        let ((mut client_in, mut client_out), (mut server_in, mut server_out)) = create_duplex_pair();

        let challenge = [0u8; 16];
        server_out.write_u32(SECURITY_TYPE_VNC_AUTH);
        server_out.write_bytes(&challenge);
        server_out.flush().await.unwrap();

        tokio::spawn(async move {
            let mut response = [0u8; 16];
            server_in.read_bytes(&mut response).await.unwrap();
            server_out.write_u32(1);
            server_out.flush().await.unwrap();
        });

        let outcome = negotiate_security(&mut client_in, &mut client_out, &FixedPassword(b"wrong"))
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.result_code, 1);
    }

    #[tokio::test]
    async fn test_security_unsupported_scheme() {
        let ((mut client_in, mut client_out), (_, mut server_out)) = create_duplex_pair();

        server_out.write_u32(42);
        server_out.flush().await.unwrap();

        let result = negotiate_security(&mut client_in, &mut client_out, &NonePasswords).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unsupported"));
    }

    #[tokio::test]
    async fn test_client_init_sent_shared_true() {
        let ((_, mut client_out), (mut server_in, _)) = create_duplex_pair();

        send_client_init(&mut client_out, true).await.unwrap();

        let shared_byte = server_in.read_u8().await.unwrap();
        assert_eq!(shared_byte, 1);
    }

    #[tokio::test]
    async fn test_server_init_parsing() {
        let ((mut client_in, _), (_, mut server_out)) = create_duplex_pair();

        server_out.write_u16(1920);
        server_out.write_u16(1080);

        let pf = PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        };
        pf.write_to(&mut server_out).unwrap();

        let name = b"Test Desktop";
        server_out.write_u32(name.len() as u32);
        server_out.write_bytes(name);
        server_out.flush().await.unwrap();

        let server_init = recv_server_init(&mut client_in).await.unwrap();
        assert_eq!(server_init.framebuffer_width, 1920);
        assert_eq!(server_init.framebuffer_height, 1080);
        assert_eq!(server_init.pixel_format, pf);
        assert_eq!(server_init.name, "Test Desktop");
    }
}
