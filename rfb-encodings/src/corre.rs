//! CoRRE encoding decoder - Compact RRE.
//!
//! CoRRE (type 4) is identical to RRE except that the enclosing rectangle is
//! limited to 255x255 pixels and the sub-rectangle coordinate/size fields are
//! single bytes instead of `u16`s. This saves 6 bytes per sub-rectangle
//! compared to RRE at the cost of a smaller maximum rectangle.
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
//! |   x              |  1 byte
//! |   y              |  1 byte
//! |   width          |  1 byte
//! |   height         |  1 byte
//! +------------------+
//! | Subrectangle N   |
//! |   ...            |
//! +------------------+
//! ```

use crate::action::ActionQueue;
use crate::convert::emit_fill;
use crate::{Decoder, PixelFormat, Rectangle, RfbInStream, ENCODING_CORRE};
use anyhow::{anyhow, Context, Result};
use tokio::io::AsyncRead;

/// Decoder for CoRRE (Compact Rise-and-Run-length Encoding).
///
/// Same scheme as RRE, but sub-rectangle fields are 8-bit, so the enclosing
/// rectangle must fit within 255x255 pixels.
pub struct CoRREDecoder;

impl Decoder for CoRREDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_CORRE
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

        if rect.width > 255 || rect.height > 255 {
            return Err(anyhow!(
                "CoRRE rectangle too large: {}x{} (max 255x255)",
                rect.width,
                rect.height
            ));
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
            .context("Failed to read CoRRE num_subrects")?;

        let mut bg_pixel = vec![0u8; bytes_per_pixel as usize];
        stream
            .read_bytes(&mut bg_pixel)
            .await
            .context("Failed to read CoRRE background pixel")?;

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
                .with_context(|| format!("Failed to read pixel for CoRRE subrect {}", i))?;

            let x = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read x for CoRRE subrect {}", i))? as u16;
            let y = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read y for CoRRE subrect {}", i))? as u16;
            let width = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read width for CoRRE subrect {}", i))?
                as u16;
            let height = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read height for CoRRE subrect {}", i))?
                as u16;

            let right = x
                .checked_add(width)
                .ok_or_else(|| anyhow!("CoRRE subrect {} x+width overflows", i))?;
            let bottom = y
                .checked_add(height)
                .ok_or_else(|| anyhow!("CoRRE subrect {} y+height overflows", i))?;

            if right > rect.width {
                return Err(anyhow!(
                    "CoRRE subrect {} extends beyond rectangle width: x={}, width={}, rect.width={}",
                    i,
                    x,
                    width,
                    rect.width
                ));
            }
            if bottom > rect.height {
                return Err(anyhow!(
                    "CoRRE subrect {} extends beyond rectangle height: y={}, height={}, rect.height={}",
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
                .ok_or_else(|| anyhow!("CoRRE subrect {} absolute x overflows", i))?;
            let abs_y = rect
                .y
                .checked_add(y)
                .ok_or_else(|| anyhow!("CoRRE subrect {} absolute y overflows", i))?;

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
