//! The I/O task: owns the socket, runs the handshake, and drains server
//! messages into the action-item pipeline and the lightweight `ServerEvent`
//! channel.
//!
//! This is the "master" side of the concurrency model: one task per
//! connection does all network I/O and pixel decoding, posting `Write`/
//! `Copy`/`Fill` items to the shared [`ActionQueue`] for a render thread to
//! apply on its own schedule, while `ServerEvent`s carry the lighter
//! notifications (connection state, bell, clipboard) an application polls
//! directly.

use crate::{
    actions::{ActionItem, ActionQueue},
    config::Config,
    connection,
    errors::RfbClientError,
    framebuffer::Framebuffer,
    messages::{ClientCommand, ServerEvent},
    protocol,
};
use rfb_protocol::handshake::PasswordProvider;
use std::sync::Arc;
use tokio::select;
use tokio::task::JoinHandle;

/// Spawn the client's I/O task.
///
/// Establishes the connection (emitting `ActionItem::Info*`/`InitDisplay`
/// items onto `queue` along the way), then runs the read/write loop until
/// the connection closes or the application sends [`ClientCommand::Close`].
pub async fn spawn(
    config: Config,
    passwords: Arc<dyn PasswordProvider>,
    queue: Arc<ActionQueue>,
    commands: flume::Receiver<ClientCommand>,
    events: flume::Sender<ServerEvent>,
) -> Result<JoinHandle<()>, RfbClientError> {
    let conn = connection::establish(&config, passwords.as_ref(), &queue).await?;
    let width = conn.server_init.framebuffer_width;
    let height = conn.server_init.framebuffer_height;
    let name = conn.server_init.name.clone();
    let pixel_format = conn.server_init.pixel_format.clone();

    let mut framebuffer = Framebuffer::new(width, height, pixel_format.clone(), queue.clone());

    let _ = events.send(ServerEvent::Connected {
        width,
        height,
        name,
        pixel_format,
    });

    let mut input = conn.input;
    let mut output = conn.output;
    let encodings = config.effective_encodings();

    let handle = tokio::spawn(async move {
        let mut periodic = tokio::time::interval(std::time::Duration::from_millis(250));

        let desired_pf = rfb_protocol::messages::types::PixelFormat {
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
        if let Err(e) = protocol::write_set_pixel_format(&mut output, desired_pf).await {
            tracing::error!("failed to send SetPixelFormat: {e}");
            return;
        }

        tracing::info!("sending SetEncodings: {encodings:?}");
        if let Err(e) = protocol::write_set_encodings(&mut output, encodings).await {
            tracing::error!("failed to send SetEncodings: {e}");
            return;
        }

        tracing::info!("requesting initial framebuffer update: {width}x{height}");
        if let Err(e) =
            protocol::write_framebuffer_update_request(&mut output, false, 0, 0, width, height)
                .await
        {
            tracing::error!("failed to send FramebufferUpdateRequest: {e}");
            return;
        }

        loop {
            select! {
                // Prefer reading server messages to keep buffers flowing.
                res = protocol::read_message_type(&mut input) => {
                    match res {
                        Ok(msg_type) => {
                            if let Err(close) = handle_server_message(
                                msg_type,
                                &mut input,
                                &mut output,
                                &mut framebuffer,
                                &events,
                                &queue,
                                width,
                                height,
                            )
                            .await
                            {
                                let _ = events.send(ServerEvent::Error { message: close.to_string() });
                                let _ = events.send(ServerEvent::ConnectionClosed);
                                tracing::debug!("closing connection: {close}");
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = events.send(ServerEvent::Error { message: e.to_string() });
                            let _ = events.send(ServerEvent::ConnectionClosed);
                            break;
                        }
                    }
                }

                cmd = commands.recv_async() => {
                    match cmd {
                        Ok(command) => {
                            if let Err(e) = handle_command(&mut output, &events, command).await {
                                if !matches!(e, RfbClientError::ConnectionClosed) {
                                    let _ = events.send(ServerEvent::Error { message: e.to_string() });
                                }
                                let _ = events.send(ServerEvent::ConnectionClosed);
                                break;
                            }
                        }
                        Err(_) => {
                            // Application dropped its command sender: shut down quietly.
                            let _ = events.send(ServerEvent::ConnectionClosed);
                            break;
                        }
                    }
                }

                _ = periodic.tick() => {
                    let _ = protocol::write_framebuffer_update_request(&mut output, true, 0, 0, width, height).await;
                }
            }
        }

        queue.add(ActionItem::InfoCloseStarted);
        queue.add(ActionItem::InfoCloseCompleted);
    });

    Ok(handle)
}

/// Handle one server message, returning `Err` only when the connection
/// should close (fail-fast on protocol errors; unsupported message types are
/// logged and ignored so a single unexpected extension doesn't kill the
/// session).
#[allow(clippy::too_many_arguments)]
async fn handle_server_message<R, W>(
    msg_type: u8,
    input: &mut rfb_protocol::io::RfbInStream<R>,
    output: &mut rfb_protocol::io::RfbOutStream<W>,
    framebuffer: &mut Framebuffer,
    events: &flume::Sender<ServerEvent>,
    queue: &ActionQueue,
    fb_width: u16,
    fb_height: u16,
) -> Result<(), RfbClientError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    match msg_type {
        0 => {
            // Pipeline the next incremental request before decoding so the
            // server can start preparing the following update immediately.
            protocol::write_framebuffer_update_request(output, true, 0, 0, fb_width, fb_height)
                .await?;
            let damage = framebuffer.apply_update_stream(input).await?;
            if !damage.is_empty() {
                let _ = events.send(ServerEvent::FramebufferUpdated { damage });
            }
            let (new_width, new_height) = framebuffer.size();
            if new_width != fb_width || new_height != fb_height {
                let _ = events.send(ServerEvent::DesktopResized {
                    width: new_width,
                    height: new_height,
                });
            }
        }
        1 => {
            // The core has no colormap pipeline: a true-color-only client
            // cannot honor SetColourMapEntries, so this closes the session
            // rather than silently discarding indexed-color data.
            let _ = rfb_protocol::messages::server::SetColorMapEntries::read_from(input).await;
            queue.add(ActionItem::Error {
                where_: "SetColourMapEntries".to_string(),
                message: "server requested colour-mapped mode, which the core does not support"
                    .to_string(),
            });
            return Err(RfbClientError::Protocol(
                "server sent SetColourMapEntries; only true-color formats are supported"
                    .to_string(),
            ));
        }
        2 => {
            let _ = events.send(ServerEvent::Bell);
        }
        3 => {
            let cut = rfb_protocol::messages::server::ServerCutText::read_from(input)
                .await
                .map_err(|e| RfbClientError::Protocol(format!("bad ServerCutText: {e}")))?;
            let _ = events.send(ServerEvent::ServerCutText {
                text: bytes::Bytes::from(cut.text),
            });
        }
        other => {
            tracing::debug!("ignoring unsupported server message type: {other}");
        }
    }
    Ok(())
}

async fn handle_command<W: tokio::io::AsyncWrite + Unpin>(
    output: &mut rfb_protocol::io::RfbOutStream<W>,
    events: &flume::Sender<ServerEvent>,
    command: ClientCommand,
) -> Result<(), RfbClientError> {
    match command {
        ClientCommand::RequestUpdate { incremental, rect } => {
            let (x, y, w, h) = match rect {
                Some(r) => (r.x as u16, r.y as u16, r.width as u16, r.height as u16),
                None => (0, 0, u16::MAX, u16::MAX),
            };
            protocol::write_framebuffer_update_request(output, incremental, x, y, w, h).await?;
        }
        ClientCommand::Pointer { x, y, buttons } => {
            protocol::write_pointer_event(output, buttons, x, y).await?;
        }
        ClientCommand::Key { key, down } => {
            protocol::write_key_event(output, key, down).await?;
        }
        ClientCommand::ClientCutText { text } => {
            let s = String::from_utf8_lossy(&text).to_string();
            protocol::write_client_cut_text(output, &s).await?;
        }
        ClientCommand::Close => {
            let _ = events.send(ServerEvent::ConnectionClosed);
            return Err(RfbClientError::ConnectionClosed);
        }
    }
    Ok(())
}
