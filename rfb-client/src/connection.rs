//! High-level connection management and handshake.
//!
//! Establishes a TCP transport, performs the RFB version and security
//! handshakes, sends ClientInit, and reads ServerInit. Returns buffered RFB
//! input/output streams ready for normal operation.

use crate::{
    actions::{ActionItem, ActionQueue},
    config::Config,
    errors::RfbClientError,
    protocol,
    session::PasswordBarrier,
    transport::Transport,
};
use rfb_protocol::handshake::{
    negotiate_security, negotiate_version, PasswordProvider, ServerVersion, VncAuthResult,
};
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::ServerInit;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Connected RFB session components.
pub struct Connection {
    /// Buffered input stream for reading RFB data.
    pub input: RfbInStream<OwnedReadHalf>,
    /// Buffered output stream for writing RFB data.
    pub output: RfbOutStream<OwnedWriteHalf>,
    /// Negotiated protocol version.
    pub version: ServerVersion,
    /// Initial server parameters (framebuffer size, pixel format, name).
    pub server_init: ServerInit,
}

impl Connection {
    /// Returns the negotiated framebuffer width and height.
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        (
            self.server_init.framebuffer_width,
            self.server_init.framebuffer_height,
        )
    }
}

/// Bridges the handshake's password request to the action-item pipeline.
///
/// A `GetPassword` item is enqueued and the call blocks on a oneshot channel
/// until the render thread answers (or drops the sender, which is treated as
/// a cancelled auth attempt).
pub struct QueuePasswordProvider {
    queue: Arc<ActionQueue>,
    barrier: Arc<PasswordBarrier>,
    configured: Option<String>,
}

impl QueuePasswordProvider {
    pub fn new(
        queue: Arc<ActionQueue>,
        barrier: Arc<PasswordBarrier>,
        configured: Option<String>,
    ) -> Self {
        Self {
            queue,
            barrier,
            configured,
        }
    }
}

#[async_trait::async_trait]
impl PasswordProvider for QueuePasswordProvider {
    async fn get_password(&self) -> Option<Vec<u8>> {
        // A password supplied via configuration (e.g. a CLI flag) short-circuits
        // the round trip to the render thread entirely.
        if let Some(p) = &self.configured {
            return Some(p.as_bytes().to_vec());
        }
        self.queue.add(ActionItem::GetPassword);
        self.barrier.wait_for_answer().await
    }
}

/// Establish a new RFB connection using the given configuration.
///
/// Steps:
/// 1) Open a TCP transport at the configured host/display
/// 2) Wrap with RfbInStream/RfbOutStream
/// 3) Negotiate version (client always pins to RFB 3.3)
/// 4) Negotiate security (None or VNC auth, prompting via `passwords` if needed)
/// 5) Send ClientInit (shared session)
/// 6) Read ServerInit (framebuffer params)
///
/// Every step that a render thread or cluster slave would want to observe
/// also posts an [`ActionItem::Info*`](ActionItem) onto `queue`, so the full
/// handshake is visible on the action pipeline even though this function's
/// own return value only matters to the master's I/O task.
pub async fn establish(
    config: &Config,
    passwords: &dyn PasswordProvider,
    queue: &ActionQueue,
) -> Result<Connection, RfbClientError> {
    let host = &config.connection.host;
    let port = config.connection.port;

    let transport = Transport::connect(host, port).await?;
    let (read_half, write_half) = transport.split();
    let mut input = RfbInStream::new(read_half);
    let mut output = RfbOutStream::new(write_half);

    let version = negotiate_version(&mut input, &mut output)
        .await
        .map_err(|e| RfbClientError::Handshake(format!("version negotiation failed: {e}")))?;

    queue.add(ActionItem::InfoProtocolVersion {
        server_major: version.major,
        server_minor: version.minor,
        client_major: 3,
        client_minor: 3,
    });

    let auth_result: Option<VncAuthResult> =
        negotiate_security(&mut input, &mut output, passwords)
            .await
            .map_err(|e| RfbClientError::Security(format!("security negotiation failed: {e}")))?;

    if let Some(result) = &auth_result {
        queue.add(ActionItem::InfoAuthResult {
            ok: result.ok,
            scheme: 2,
            result: result.result_code,
        });
        if !result.ok {
            queue.add(ActionItem::InfoServerInitCompleted { ok: false });
            return Err(RfbClientError::AuthFailed(format!(
                "server rejected VNC authentication (code {})",
                result.result_code
            )));
        }
    }

    protocol::write_client_init(&mut output, true).await?;

    queue.add(ActionItem::InfoServerInitStarted);
    let server_init = ServerInit::read_from(&mut input).await.map_err(|e| {
        queue.add(ActionItem::InfoServerInitCompleted { ok: false });
        RfbClientError::Protocol(format!("failed to read ServerInit: {e}"))
    })?;

    queue.add(ActionItem::InfoServerInitCompleted { ok: true });
    queue.add(ActionItem::InitDisplay {
        width: server_init.framebuffer_width,
        height: server_init.framebuffer_height,
        name: server_init.name.clone(),
        pixel_format: server_init.pixel_format.clone(),
    });

    Ok(Connection {
        input,
        output,
        version,
        server_init,
    })
}
