//! CopyRect encoding decoder - copy rectangle from another screen location.
//!
//! CopyRect encoding (type 1) is a pseudo-encoding that instructs the client to copy
//! a rectangle from one location on the screen to another. This is highly efficient
//! for operations like window dragging or scrolling, where the content doesn't change
//! but its position does.
//!
//! # Wire Format
//!
//! ```text
//! +----------+----------+
//! | src_x    | src_y    |  2 bytes each (u16, network byte order)
//! +----------+----------+
//! ```
//!
//! The rectangle's `x`, `y`, `width`, and `height` fields specify the **destination**
//! rectangle. The `src_x` and `src_y` fields (read from the stream) specify the
//! **source** location to copy from. Both are expressed in the server's top-down
//! coordinate space and are flipped identically before reaching the render target.
//!
//! # Performance
//!
//! CopyRect is extremely bandwidth-efficient - only 4 bytes are transmitted regardless
//! of the rectangle size. The copy operation is performed entirely on the render
//! thread's side using the existing display contents.
//!
//! # Example
//!
//! ```no_run
//! use rfb_encodings::{Decoder, CopyRectDecoder, ENCODING_COPY_RECT};
//!
//! let decoder = CopyRectDecoder;
//! assert_eq!(decoder.encoding_type(), ENCODING_COPY_RECT);
//! ```

use crate::action::ActionQueue;
use crate::convert::emit_copy;
use crate::{Decoder, PixelFormat, Rectangle, RfbInStream, ENCODING_COPY_RECT};
use anyhow::{Context, Result};
use tokio::io::AsyncRead;

/// Decoder for CopyRect encoding - copy pixels from another screen location.
///
/// This encoding transmits only the source coordinates (4 bytes) and instructs
/// the render target to copy a rectangle from the source position to the
/// destination position within its existing contents.
///
/// # Example
///
/// ```no_run
/// # use rfb_encodings::{Decoder, CopyRectDecoder, ENCODING_COPY_RECT};
/// let decoder = CopyRectDecoder;
/// assert_eq!(decoder.encoding_type(), ENCODING_COPY_RECT);
/// ```
pub struct CopyRectDecoder;

impl Decoder for CopyRectDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_COPY_RECT
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        _pixel_format: &PixelFormat,
        fb_height: u16,
        queue: &ActionQueue,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let src_x = stream
            .read_u16()
            .await
            .context("Failed to read CopyRect src_x")?;
        let src_y = stream
            .read_u16()
            .await
            .context("Failed to read CopyRect src_y")?;

        emit_copy(
            queue, fb_height, rect.x, rect.y, src_x, src_y, rect.width, rect.height,
        );

        Ok(())
    }
}
