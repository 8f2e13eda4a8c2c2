//! Framebuffer state management and decoder registry.
//!
//! This module tracks the client's framebuffer dimensions and dispatches
//! server framebuffer update rectangles to the registered encoding decoders.
//! Decoders never touch pixel storage directly: they push [`ActionItem`]s
//! onto an [`ActionQueue`] shared with a render thread.

use crate::actions::ActionQueue;
use crate::errors::RfbClientError;
use anyhow::Result as AnyResult;
use rfb_common::Rect;
use rfb_encodings as enc;
use rfb_encodings::{Decoder, RfbInStream};
use rfb_protocol::messages::types::{PixelFormat as ServerPixelFormat, Rectangle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Registry of decoders keyed by encoding type.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<i32, DecoderEntry>,
}

impl DecoderRegistry {
    /// Create a registry with all standard encodings registered.
    pub fn with_standard() -> Self {
        let mut reg = Self::default();
        reg.register(DecoderEntry::Raw(enc::RawDecoder));
        reg.register(DecoderEntry::CopyRect(enc::CopyRectDecoder));
        reg.register(DecoderEntry::RRE(enc::RREDecoder));
        reg.register(DecoderEntry::CoRRE(enc::CoRREDecoder));
        reg.register(DecoderEntry::Hextile(enc::HextileDecoder));
        reg.register(DecoderEntry::ZRLE(enc::ZRLEDecoder::default()));
        reg
    }

    /// Register a decoder entry.
    pub(crate) fn register(&mut self, decoder: DecoderEntry) {
        self.decoders.insert(decoder.encoding_type(), decoder);
    }

    /// Get a decoder by encoding type.
    pub(crate) fn get(&self, encoding: i32) -> Option<&DecoderEntry> {
        self.decoders.get(&encoding)
    }
}

/// A concrete decoder entry wrapper for dynamic dispatch over non-object-safe Decoder.
pub(crate) enum DecoderEntry {
    Raw(enc::RawDecoder),
    CopyRect(enc::CopyRectDecoder),
    RRE(enc::RREDecoder),
    CoRRE(enc::CoRREDecoder),
    Hextile(enc::HextileDecoder),
    ZRLE(enc::ZRLEDecoder),
}

impl DecoderEntry {
    fn encoding_type(&self) -> i32 {
        match self {
            Self::Raw(d) => d.encoding_type(),
            Self::CopyRect(d) => d.encoding_type(),
            Self::RRE(d) => d.encoding_type(),
            Self::CoRRE(d) => d.encoding_type(),
            Self::Hextile(d) => d.encoding_type(),
            Self::ZRLE(d) => d.encoding_type(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "Raw",
            Self::CopyRect(_) => "CopyRect",
            Self::RRE(_) => "RRE",
            Self::CoRRE(_) => "CoRRE",
            Self::Hextile(_) => "Hextile",
            Self::ZRLE(_) => "ZRLE",
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &ServerPixelFormat,
        fb_height: u16,
        queue: &ActionQueue,
    ) -> AnyResult<()> {
        match self {
            Self::Raw(d) => d.decode(stream, rect, pixel_format, fb_height, queue).await,
            Self::CopyRect(d) => d.decode(stream, rect, pixel_format, fb_height, queue).await,
            Self::RRE(d) => d.decode(stream, rect, pixel_format, fb_height, queue).await,
            Self::CoRRE(d) => d.decode(stream, rect, pixel_format, fb_height, queue).await,
            Self::Hextile(d) => d.decode(stream, rect, pixel_format, fb_height, queue).await,
            Self::ZRLE(d) => d.decode(stream, rect, pixel_format, fb_height, queue).await,
        }
    }
}

/// Framebuffer dimensions and decoder dispatcher.
///
/// `Framebuffer` no longer owns pixel storage: it tracks the negotiated size
/// and hands every rectangle to a decoder, which converts it to RGB24 and
/// emits `ActionItem`s onto the shared `queue` for a render thread to apply.
pub struct Framebuffer {
    width: u16,
    height: u16,
    /// Server-advertised pixel format (input format for decoders).
    server_pixel_format: ServerPixelFormat,
    /// Decoder registry.
    registry: DecoderRegistry,
    /// Destination for decoded `ActionItem`s.
    queue: Arc<ActionQueue>,
}

impl Framebuffer {
    /// Create a new framebuffer with given server pixel format and dimensions.
    pub fn new(
        width: u16,
        height: u16,
        server_pixel_format: ServerPixelFormat,
        queue: Arc<ActionQueue>,
    ) -> Self {
        Self {
            width,
            height,
            server_pixel_format,
            registry: DecoderRegistry::with_standard(),
            queue,
        }
    }

    /// Returns the current dimensions.
    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Apply a single rectangle update from the server.
    pub async fn apply_rectangle<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
    ) -> Result<(), RfbClientError> {
        match rect.encoding {
            enc::ENCODING_LAST_RECT => {
                // Marker only
                Ok(())
            }
            enc::ENCODING_DESKTOP_SIZE => {
                self.width = rect.width;
                self.height = rect.height;
                Ok(())
            }
            other => {
                // Zero-area rectangles are permitted and carry no pixels.
                if rect.width == 0 || rect.height == 0 {
                    return Ok(());
                }
                if rect.x as u32 + rect.width as u32 > self.width as u32
                    || rect.y as u32 + rect.height as u32 > self.height as u32
                {
                    return Err(RfbClientError::Protocol(format!(
                        "rectangle [{},{} {}x{}] exceeds framebuffer bounds {}x{}",
                        rect.x, rect.y, rect.width, rect.height, self.width, self.height
                    )));
                }

                let decoder = self
                    .registry
                    .get(other)
                    .ok_or(RfbClientError::UnsupportedEncoding(other))?;

                tracing::debug!(
                    "Decoder selected: {} (encoding={}) for rect x={}, y={}, w={}, h={}",
                    decoder.name(),
                    other,
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height
                );

                decoder
                    .decode(
                        stream,
                        rect,
                        &self.server_pixel_format,
                        self.height,
                        &self.queue,
                    )
                    .await
                    .map_err(RfbClientError::Encoding)
            }
        }
    }

    /// Apply an update by streaming from the input (reads header + decodes rectangles).
    pub async fn apply_update_stream<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
    ) -> Result<Vec<Rect>, RfbClientError> {
        // FramebufferUpdate header: 1 byte padding + 2 bytes rect count
        stream.skip(1).await.map_err(|e| {
            RfbClientError::Protocol(format!("failed to read FramebufferUpdate padding: {}", e))
        })?;
        let num_raw = stream.read_u16().await.map_err(|e| {
            RfbClientError::Protocol(format!(
                "failed to read FramebufferUpdate rect count: {}",
                e
            ))
        })?;

        // Framing instrumentation: log FBU start with declared rect count
        tracing::debug!(
            target: "rfb_client::framing",
            "FBU start: declared_rects={}, available_buffer_bytes={}",
            num_raw,
            stream.available()
        );

        let mut damage: Vec<Rect> = Vec::new();
        let mut rects_decoded = 0;

        if num_raw == 0xFFFF {
            // Unknown number of rectangles; terminated by LastRect pseudo-encoding
            loop {
                let buffer_before = stream.available();
                let rect = Rectangle::read_from(stream).await.map_err(|e| {
                    RfbClientError::Protocol(format!("failed to read Rectangle header: {}", e))
                })?;
                tracing::info!(
                    "FramebufferUpdate rect: x={}, y={}, w={}, h={}, encoding={}",
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height,
                    rect.encoding
                );
                if rect.encoding == enc::ENCODING_LAST_RECT {
                    tracing::debug!(
                        target: "rfb_client::framing",
                        "FBU rect {}: LastRect marker (end of update)",
                        rects_decoded
                    );
                    // End of this update
                    break;
                }

                tracing::debug!(
                    target: "rfb_client::framing",
                    "FBU rect {}: enc={} rect=[{},{} {}x{}] buffer_before={}",
                    rects_decoded,
                    rect.encoding,
                    rect.x, rect.y, rect.width, rect.height,
                    buffer_before
                );

                self.apply_rectangle(stream, &rect).await?;

                let buffer_after = stream.available();
                tracing::debug!(
                    target: "rfb_client::framing",
                    "FBU rect {}: decoded, buffer_after={}",
                    rects_decoded,
                    buffer_after
                );

                rects_decoded += 1;

                if rect.encoding >= 0 {
                    damage.push(Rect::new(
                        rect.x as i32,
                        rect.y as i32,
                        rect.width as u32,
                        rect.height as u32,
                    ));
                }
            }
        } else {
            let num = num_raw as usize;
            damage.reserve(num);
            for i in 0..num {
                let buffer_before = stream.available();
                let rect = Rectangle::read_from(stream).await.map_err(|e| {
                    RfbClientError::Protocol(format!("failed to read Rectangle header: {}", e))
                })?;
                tracing::info!(
                    "FramebufferUpdate rect: x={}, y={}, w={}, h={}, encoding={}",
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height,
                    rect.encoding
                );

                tracing::debug!(
                    target: "rfb_client::framing",
                    "FBU rect {}/{}: enc={} rect=[{},{} {}x{}] buffer_before={}",
                    i,
                    num,
                    rect.encoding,
                    rect.x, rect.y, rect.width, rect.height,
                    buffer_before
                );

                self.apply_rectangle(stream, &rect).await?;

                let buffer_after = stream.available();
                tracing::debug!(
                    target: "rfb_client::framing",
                    "FBU rect {}/{}: decoded, buffer_after={}",
                    i,
                    num,
                    buffer_after
                );

                rects_decoded += 1;

                if rect.encoding >= 0 {
                    damage.push(Rect::new(
                        rect.x as i32,
                        rect.y as i32,
                        rect.width as u32,
                        rect.height as u32,
                    ));
                }
            }
        }

        // Framing instrumentation: verify rect count matches
        if num_raw != 0xFFFF && rects_decoded != num_raw as usize {
            tracing::warn!(
                target: "rfb_client::framing",
                "FBU end: MISMATCH! declared_rects={} decoded_rects={}",
                num_raw,
                rects_decoded
            );
        } else {
            tracing::debug!(
                target: "rfb_client::framing",
                "FBU end: rects_decoded={} (matches declared count)",
                rects_decoded
            );
        }

        Ok(damage)
    }

    /// Apply multiple rectangles, returning the list of damaged regions for repaint.
    pub async fn apply_update<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rects: &[Rectangle],
    ) -> Result<Vec<Rect>, RfbClientError> {
        let mut damage = Vec::with_capacity(rects.len());
        for rect in rects {
            tracing::info!(
                "FramebufferUpdate rect: x={}, y={}, w={}, h={}, encoding={}",
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                rect.encoding
            );
            self.apply_rectangle(stream, rect).await?;
            if rect.encoding >= 0 {
                damage.push(Rect::new(
                    rect.x as i32,
                    rect.y as i32,
                    rect.width as u32,
                    rect.height as u32,
                ));
            }
        }
        Ok(damage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server_format() -> ServerPixelFormat {
        ServerPixelFormat {
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
        }
    }

    fn test_framebuffer(width: u16, height: u16) -> Framebuffer {
        Framebuffer::new(width, height, test_server_format(), Arc::new(ActionQueue::new()))
    }

    #[test]
    fn test_framebuffer_initial_size() {
        let fb = test_framebuffer(640, 480);
        assert_eq!(fb.size(), (640, 480));
    }

    #[test]
    fn test_registry_has_corre() {
        let reg = DecoderRegistry::with_standard();
        assert!(reg.get(enc::ENCODING_CORRE).is_some());
        assert!(reg.get(enc::ENCODING_RRE).is_some());
        assert!(reg.get(enc::ENCODING_RAW).is_some());
        assert!(reg.get(enc::ENCODING_COPY_RECT).is_some());
        assert!(reg.get(enc::ENCODING_HEXTILE).is_some());
        assert!(reg.get(enc::ENCODING_ZRLE).is_some());
    }

    #[tokio::test]
    async fn test_apply_rectangle_unsupported_encoding() {
        use std::io::Cursor;
        let mut fb = test_framebuffer(100, 100);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            encoding: 9999,
        };
        let cursor = Cursor::new(Vec::new());
        let mut stream = RfbInStream::new(cursor);
        let result = fb.apply_rectangle(&mut stream, &rect).await;
        assert!(matches!(
            result,
            Err(RfbClientError::UnsupportedEncoding(9999))
        ));
    }

    #[tokio::test]
    async fn test_apply_rectangle_desktop_size_resizes_buffer() {
        use std::io::Cursor;
        let mut fb = test_framebuffer(100, 100);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 200,
            height: 150,
            encoding: enc::ENCODING_DESKTOP_SIZE,
        };
        let cursor = Cursor::new(Vec::new());
        let mut stream = RfbInStream::new(cursor);
        fb.apply_rectangle(&mut stream, &rect).await.unwrap();
        assert_eq!(fb.size(), (200, 150));
    }
}
