//! RRE encoding decoder - Rise-and-Run-length Encoding.
//!
//! RRE (Rise-and-Run-length Encoding, type 2) is a simple VNC encoding that
//! represents rectangular regions as a background color plus a list of solid-color
//! sub-rectangles. This encoding is efficient for screens with large areas of
//! uniform color, such as desktop backgrounds or flat UI elements.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | num_subrects     |  4 bytes (u32, network byte order)
//! +------------------+
//! | background_pixel |  bytes_per_pixel bytes
//! +------------------+
//! | Subrectangle 1   |
//! |   pixel          |  bytes_per_pixel bytes
//! |   x              |  2 bytes (u16)
//! |   y              |  2 bytes (u16)
//! |   width          |  2 bytes (u16)
//! |   height         |  2 bytes (u16)
//! +------------------+
//! | Subrectangle 2   |
//! |   ...            |
//! +------------------+
//! | Subrectangle N   |
//! |   ...            |
//! +------------------+
//! ```
//!
//! The decoder first emits a `Fill` covering the entire rectangle with the
//! background color, then emits one `Fill` per sub-rectangle.
//!
//! # Performance
//!
//! RRE is more bandwidth-efficient than Raw encoding for scenes with large
//! solid-color regions. However, it's less efficient than more sophisticated
//! encodings like Hextile or ZRLE for complex images.
//!
//! # Example
//!
//! ```no_run
//! use rfb_encodings::{Decoder, RREDecoder, ENCODING_RRE};
//!
//! let decoder = RREDecoder;
//! assert_eq!(decoder.encoding_type(), ENCODING_RRE);
//! ```

use crate::action::ActionQueue;
use crate::convert::emit_fill;
use crate::{Decoder, PixelFormat, Rectangle, RfbInStream, ENCODING_RRE};
use anyhow::{anyhow, Context, Result};
use tokio::io::AsyncRead;

/// Decoder for RRE (Rise-and-Run-length Encoding).
///
/// This encoding transmits a background color followed by a list of solid-color
/// sub-rectangles. The decoder emits a `Fill` for the entire rectangle with the
/// background color, then one `Fill` per sub-rectangle.
///
/// # Example
///
/// ```no_run
/// # use rfb_encodings::{Decoder, RREDecoder, ENCODING_RRE};
/// let decoder = RREDecoder;
/// assert_eq!(decoder.encoding_type(), ENCODING_RRE);
/// ```
pub struct RREDecoder;

impl Decoder for RREDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RRE
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        fb_height: u16,
        queue: &ActionQueue,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bits_per_pixel / 8;
        if bytes_per_pixel == 0 || bytes_per_pixel > 4 {
            return Err(anyhow!(
                "Invalid bytes_per_pixel: {} (must be 1-4)",
                bytes_per_pixel
            ));
        }

        let num_subrects = stream
            .read_u32()
            .await
            .context("Failed to read RRE num_subrects")?;

        let mut bg_pixel = vec![0u8; bytes_per_pixel as usize];
        stream
            .read_bytes(&mut bg_pixel)
            .await
            .context("Failed to read RRE background pixel")?;

        let buffer_format: rfb_pixelbuffer::PixelFormat = pixel_format.clone().into();
        emit_fill(
            queue,
            fb_height,
            &buffer_format,
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            &bg_pixel,
        );

        for i in 0..num_subrects {
            let mut pixel = vec![0u8; bytes_per_pixel as usize];
            stream
                .read_bytes(&mut pixel)
                .await
                .with_context(|| format!("Failed to read pixel for RRE subrect {}", i))?;

            let x = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read x for RRE subrect {}", i))?;
            let y = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read y for RRE subrect {}", i))?;
            let width = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read width for RRE subrect {}", i))?;
            let height = stream
                .read_u16()
                .await
                .with_context(|| format!("Failed to read height for RRE subrect {}", i))?;

            let right = x
                .checked_add(width)
                .ok_or_else(|| anyhow!("RRE subrect {} x+width overflows: {} + {}", i, x, width))?;
            let bottom = y.checked_add(height).ok_or_else(|| {
                anyhow!("RRE subrect {} y+height overflows: {} + {}", i, y, height)
            })?;

            if right > rect.width {
                return Err(anyhow!(
                    "RRE subrect {} extends beyond rectangle width: x={}, width={}, rect.width={}",
                    i,
                    x,
                    width,
                    rect.width
                ));
            }
            if bottom > rect.height {
                return Err(anyhow!(
                    "RRE subrect {} extends beyond rectangle height: y={}, height={}, rect.height={}",
                    i,
                    y,
                    height,
                    rect.height
                ));
            }

            if width == 0 || height == 0 {
                continue;
            }

            let abs_x = rect
                .x
                .checked_add(x)
                .ok_or_else(|| anyhow!("RRE subrect {} absolute x overflows", i))?;
            let abs_y = rect
                .y
                .checked_add(y)
                .ok_or_else(|| anyhow!("RRE subrect {} absolute y overflows", i))?;

            emit_fill(
                queue,
                fb_height,
                &buffer_format,
                abs_x,
                abs_y,
                width,
                height,
                &pixel,
            );
        }

        Ok(())
    }
}
