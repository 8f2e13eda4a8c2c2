//! Shared helpers for converting server-format pixels into the RGB24 wire
//! format used by [`crate::ActionItem`], and for flipping server (top-down)
//! coordinates into the render target's bottom-up coordinate space.
//!
//! Every decoder parses pixels in the server's negotiated [`PixelFormat`] but
//! hands the render thread plain 8-bit-per-channel RGB so that a
//! `RenderTarget` implementation never needs to know about shift/mask pixel
//! layouts. The render target's y-axis increases upward, while the server
//! numbers rows top-to-bottom, so every coordinate crossing this boundary
//! goes through [`flip_y`].

use crate::action::ActionQueue;
use crate::ActionItem;
use rfb_pixelbuffer::PixelFormat as BufferPixelFormat;

/// Chunk size target for batched `Write` actions (see `emit_write_rows`).
const WRITE_CHUNK_BYTES: usize = 64 * 1024;

/// Converts a pixel in `fmt`'s native bytes into unscaled 8-bit RGB.
///
/// `fmt`'s max values are expected to be `<= 255` (true of every standard RFB
/// pixel format this core handles); values above that are truncated rather
/// than rescaled, since `ActionItem` pixels are always one byte per channel.
pub(crate) fn pixel_bytes_to_rgb24(fmt: &BufferPixelFormat, pixel: &[u8]) -> [u8; 3] {
    let (r, g, b) = fmt.bytes_to_rgb24(pixel);
    [r as u8, g as u8, b as u8]
}

/// Maps a server-space row range `[y, y+height)` (rows numbered top-to-bottom)
/// to the render target's y-up coordinate space, returning the new rect's
/// minimum y. The rectangle's width/height and x are unaffected.
pub(crate) fn flip_y(fb_height: u16, y: u16, height: u16) -> u16 {
    fb_height - y - height
}

/// Emits one or more `ActionItem::Write` actions covering a solid block of
/// RGB24 pixels, given in server row order (row 0 = topmost server row).
///
/// Internally reverses row order (since the render target's y increases
/// upward, the server's last row ends up at the lowest `dest_y`) and splits
/// the block into chunks around [`WRITE_CHUNK_BYTES`] so that a single large
/// rectangle does not produce one gigantic action.
pub(crate) fn emit_write_rows(
    queue: &ActionQueue,
    fb_height: u16,
    dest_x: u16,
    server_y: u16,
    width: u16,
    height: u16,
    rgb24_rows_top_down: &[u8],
) {
    if width == 0 || height == 0 {
        return;
    }
    let row_len = width as usize * 3;
    debug_assert_eq!(rgb24_rows_top_down.len(), row_len * height as usize);

    let dest_y_min = flip_y(fb_height, server_y, height);
    let rows_per_chunk = (WRITE_CHUNK_BYTES / row_len.max(1)).max(1);

    let mut chunk_start = 0usize; // row index counting from the bottom of the rect
    while chunk_start < height as usize {
        let chunk_len = rows_per_chunk.min(height as usize - chunk_start);
        let mut pixels = vec![0u8; chunk_len * row_len];
        for i in 0..chunk_len {
            // Output row `chunk_start + i` (ascending dest_y) corresponds to
            // server row `height - 1 - (chunk_start + i)` (descending from the
            // bottom of the rect, i.e. counting up from the server's last row).
            let server_row = height as usize - 1 - (chunk_start + i);
            let src = &rgb24_rows_top_down[server_row * row_len..(server_row + 1) * row_len];
            pixels[i * row_len..(i + 1) * row_len].copy_from_slice(src);
        }
        queue.add(ActionItem::Write {
            dest_x,
            dest_y: dest_y_min + chunk_start as u16,
            width,
            height: chunk_len as u16,
            pixels,
        });
        chunk_start += chunk_len;
    }
}

/// Converts a tightly-packed block of server-format pixels (row-major,
/// top-down, `stride` pixels per row) into RGB24 bytes in the same row order.
pub(crate) fn rows_to_rgb24(
    fmt: &BufferPixelFormat,
    pixel_data: &[u8],
    width: u16,
    height: u16,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let w = width as usize;
    let mut out = vec![0u8; w * height as usize * 3];
    for row in 0..height as usize {
        let src_row = &pixel_data[row * w * bytes_per_pixel..(row + 1) * w * bytes_per_pixel];
        let dest_row = &mut out[row * w * 3..(row + 1) * w * 3];
        for x in 0..w {
            let px = &src_row[x * bytes_per_pixel..(x + 1) * bytes_per_pixel];
            let rgb = pixel_bytes_to_rgb24(fmt, px);
            dest_row[x * 3..x * 3 + 3].copy_from_slice(&rgb);
        }
    }
    out
}

/// Emits a single `ActionItem::Fill` for a solid-color rectangle, converting
/// the pixel to RGB24 and flipping its y-coordinate.
pub(crate) fn emit_fill(
    queue: &ActionQueue,
    fb_height: u16,
    fmt: &BufferPixelFormat,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    pixel: &[u8],
) {
    if width == 0 || height == 0 {
        return;
    }
    let color = pixel_bytes_to_rgb24(fmt, pixel);
    queue.add(ActionItem::Fill {
        x,
        y: flip_y(fb_height, y, height),
        width,
        height,
        color,
    });
}

/// Emits a single `ActionItem::Copy`, flipping both the source and
/// destination y-coordinates identically.
pub(crate) fn emit_copy(
    queue: &ActionQueue,
    fb_height: u16,
    dest_x: u16,
    dest_y: u16,
    src_x: u16,
    src_y: u16,
    width: u16,
    height: u16,
) {
    if width == 0 || height == 0 {
        return;
    }
    queue.add(ActionItem::Copy {
        dest_x,
        dest_y: flip_y(fb_height, dest_y, height),
        src_x,
        src_y: flip_y(fb_height, src_y, height),
        width,
        height,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb888() -> BufferPixelFormat {
        BufferPixelFormat::rgb888()
    }

    #[test]
    fn test_flip_y_bottom_row_maps_to_zero() {
        assert_eq!(flip_y(100, 99, 1), 0);
    }

    #[test]
    fn test_flip_y_top_row_maps_to_max() {
        assert_eq!(flip_y(100, 0, 1), 99);
    }

    #[test]
    fn test_flip_y_whole_framebuffer_maps_to_zero() {
        assert_eq!(flip_y(100, 0, 100), 0);
    }

    #[test]
    fn test_emit_fill_converts_color_and_flips_y() {
        let queue = ActionQueue::new();
        let fmt = rgb888();
        // little-endian 32bpp RGB888: bytes are [B, G, R, pad]
        let pixel = [0x33, 0x22, 0x11, 0x00];
        emit_fill(&queue, 50, &fmt, 5, 10, 4, 6, &pixel);
        match queue.remove_next().unwrap() {
            ActionItem::Fill {
                x,
                y,
                width,
                height,
                color,
            } => {
                assert_eq!((x, y, width, height), (5, 34, 4, 6));
                assert_eq!(color, [0x11, 0x22, 0x33]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn test_emit_copy_flips_both_y_coordinates() {
        let queue = ActionQueue::new();
        emit_copy(&queue, 200, 10, 20, 30, 40, 5, 8);
        match queue.remove_next().unwrap() {
            ActionItem::Copy {
                dest_x,
                dest_y,
                src_x,
                src_y,
                width,
                height,
            } => {
                assert_eq!(dest_x, 10);
                assert_eq!(dest_y, flip_y(200, 20, 8));
                assert_eq!(src_x, 30);
                assert_eq!(src_y, flip_y(200, 40, 8));
                assert_eq!((width, height), (5, 8));
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn test_emit_write_rows_reverses_row_order() {
        let queue = ActionQueue::new();
        // 1x3 column: server rows top-to-bottom are red, green, blue.
        let mut rows = Vec::new();
        rows.extend_from_slice(&[255, 0, 0]);
        rows.extend_from_slice(&[0, 255, 0]);
        rows.extend_from_slice(&[0, 0, 255]);
        emit_write_rows(&queue, 10, 0, 0, 1, 3, &rows);
        let mut all = Vec::new();
        while let Some(item) = queue.remove_next() {
            all.push(item);
        }
        assert_eq!(all.len(), 1);
        match &all[0] {
            ActionItem::Write {
                dest_y,
                height,
                pixels,
                ..
            } => {
                assert_eq!(*dest_y, 7); // flip_y(10, 0, 3)
                assert_eq!(*height, 3);
                // Row 0 of output (lowest dest_y, bottom of rect) is the
                // server's *last* row (blue), row 2 is the server's first
                // (red).
                assert_eq!(&pixels[0..3], &[0, 0, 255]);
                assert_eq!(&pixels[6..9], &[255, 0, 0]);
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn test_emit_write_rows_chunks_large_blocks() {
        let queue = ActionQueue::new();
        let width = 4096u16;
        let height = 40u16; // 4096*3*40 bytes well above one 64KiB chunk
        let rows = vec![7u8; width as usize * 3 * height as usize];
        emit_write_rows(&queue, height, 0, 0, width, height, &rows);
        let mut total_rows = 0u16;
        let mut count = 0;
        while let Some(item) = queue.remove_next() {
            if let ActionItem::Write { height: h, .. } = item {
                total_rows += h;
                count += 1;
            }
        }
        assert!(count > 1, "expected the write to be split into multiple chunks");
        assert_eq!(total_rows, height);
    }
}
