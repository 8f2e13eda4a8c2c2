//! Raw encoding decoder - uncompressed pixel data.
//!
//! Raw encoding (type 0) is the simplest VNC encoding. It transmits pixels as
//! uncompressed data in the server's pixel format. The decoder reads
//! `width * height * bytes_per_pixel` bytes from the stream, converts them to
//! RGB24, and pushes one or more `Write` action items.
//!
//! # Wire Format
//!
//! ```text
//! +-------------+
//! | Pixel data  |  width * height * bytes_per_pixel bytes
//! +-------------+
//! ```
//!
//! Each pixel is transmitted in the server's pixel format (as negotiated during
//! the ServerInit handshake). No compression or encoding is applied.
//!
//! # Performance
//!
//! Raw encoding is the least efficient in terms of bandwidth (since no compression
//! is used), but it's the simplest to decode and requires minimal CPU. It's typically
//! used as a fallback when other encodings aren't available or suitable.
//!
//! # Example
//!
//! ```no_run
//! use rfb_encodings::{Decoder, RawDecoder, ENCODING_RAW};
//!
//! let decoder = RawDecoder;
//! assert_eq!(decoder.encoding_type(), ENCODING_RAW);
//! ```

use crate::action::ActionQueue;
use crate::convert::{emit_write_rows, rows_to_rgb24};
use crate::{Decoder, PixelFormat, Rectangle, RfbInStream, ENCODING_RAW};
use anyhow::{Context, Result};
use tokio::io::AsyncRead;

/// Decoder for raw (uncompressed) pixel data.
///
/// This is the simplest VNC encoding - pixels are transmitted without any
/// compression or transformation. The decoder reads `width * height * bytes_per_pixel`
/// bytes from the stream and converts them to RGB24 for the render thread.
///
/// # Example
///
/// ```no_run
/// # use rfb_encodings::{Decoder, RawDecoder, ENCODING_RAW};
/// let decoder = RawDecoder;
/// assert_eq!(decoder.encoding_type(), ENCODING_RAW);
/// ```
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        fb_height: u16,
        queue: &ActionQueue,
    ) -> Result<()> {
        let buffer_before = stream.available();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode start: rect=[{},{} {}x{}] buffer_before={}",
            rect.x, rect.y, rect.width, rect.height,
            buffer_before
        );

        if rect.width == 0 || rect.height == 0 {
            tracing::debug!(
                target: "rfb_encodings::framing",
                "Raw decode end: empty rectangle, bytes_consumed=0, buffer_after={}",
                stream.available()
            );
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let total_bytes = rect.width as usize * rect.height as usize * bytes_per_pixel;

        let mut pixel_data = vec![0u8; total_bytes];
        stream
            .read_bytes(&mut pixel_data)
            .await
            .context("Failed to read raw pixel data from stream")?;

        let buffer_format: rfb_pixelbuffer::PixelFormat = pixel_format.clone().into();
        let rgb24 = rows_to_rgb24(
            &buffer_format,
            &pixel_data,
            rect.width,
            rect.height,
            bytes_per_pixel,
        );
        emit_write_rows(queue, fb_height, rect.x, rect.y, rect.width, rect.height, &rgb24);

        let buffer_after = stream.available();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode end: bytes_consumed={}, buffer_after={}",
            buffer_before.saturating_sub(buffer_after),
            buffer_after
        );

        Ok(())
    }
}
