//! Tile cache and render-target abstraction (spec component C5).
//!
//! [`RenderTarget`] is the small interface the host implements: create/delete
//! a tile-sized texture, upload a sub-rectangle into one, and draw a textured
//! quadrilateral. Everything else — probing the backend for the largest
//! supported power-of-two tile size, laying out the grid that covers the
//! server's framebuffer, and splitting a write that crosses tile boundaries
//! into per-tile uploads — lives in [`TileCache`], which is host-agnostic.
//!
//! The tiling algorithm (including the tie-breaking rule in
//! [`probe_tile_size`]) is ported from the `TextureManager` class this crate
//! is grounded on: tile dimensions must be a power of two because many GPU
//! backends historically required it for texture uploads, and probing lets
//! the cache discover the backend's real maximum rather than assuming one.

use anyhow::{anyhow, Result};

/// Host-provided hook for texture-backed rendering.
///
/// The tile cache never touches pixels or GPU state itself: it computes
/// *where* a tile lives and *what* to upload, then calls through this trait.
/// A `tile_id` is an opaque handle the host assigns in
/// [`create_tile`](Self::create_tile) and must accept back in every other
/// method for that tile.
pub trait RenderTarget {
    /// Opaque per-tile handle type (e.g. a GPU texture name).
    type TileId: Copy;

    /// Returns true if the backend can create a texture of exactly this size.
    ///
    /// Called repeatedly during tile-size probing with shrinking candidate
    /// sizes; must be side-effect-free (no texture is actually created).
    fn max_tile_probe(&mut self, width: u32, height: u32) -> bool;

    /// Create a tile-backing texture of the given power-of-two size, cleared
    /// to `fill_rgb`.
    fn create_tile(&mut self, width: u32, height: u32, fill_rgb: [u8; 3]) -> Result<Self::TileId>;

    /// Release a tile's backing resources.
    fn delete_tile(&mut self, tile: Self::TileId);

    /// Upload an RGB24 sub-rectangle into `tile` at local offset `(x, y)`.
    ///
    /// `pixels` is row-major, `width * height * 3` bytes, tightly packed.
    fn upload(
        &mut self,
        tile: Self::TileId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<()>;

    /// Draw `tile` as a textured quad.
    ///
    /// `tex_max` is the fraction of the tile texture that holds live pixels
    /// in each axis (1.0 unless the tile overhangs the framebuffer edge).
    /// `corners` are the four destination vertices in quad order
    /// (00, 10, 11, 01), each `(x, y, z)`, matching the bilinear
    /// interpolation [`TileCache::draw_in_quad`] performs across tiles.
    fn draw_quad(
        &mut self,
        tile: Self::TileId,
        tex_max: (f32, f32),
        corners: [[f32; 3]; 4],
    ) -> Result<()>;

    /// Read back an RGB24 sub-rectangle previously uploaded to `tile`.
    ///
    /// [`TileCache::copy`] uses this to move already-resident pixels (the
    /// server's CopyRect optimizes for exactly this case) without re-fetching
    /// them over the network; a GPU-backed host typically implements it with
    /// `glGetTexImage`/`glReadPixels` into a sub-region.
    fn download(&mut self, tile: Self::TileId, x: u32, y: u32, width: u32, height: u32)
        -> Result<Vec<u8>>;
}

/// Smallest power of two `>= n`, capped at `1 << (max_bits - 1)`.
///
/// Mirrors `TextureManager::findLeastPow2GE`: `max_bits` bounds the result
/// the way a backend's maximum texture dimension would.
fn least_pow2_ge(n: u32, max_bits: u32) -> u32 {
    if max_bits == 0 || n <= 1 {
        return 1;
    }
    let max_pow2 = 1u32 << (max_bits - 1);
    if n >= max_pow2 {
        return max_pow2;
    }
    let mut pow2 = 1u32;
    while pow2 < max_pow2 && pow2 < n {
        pow2 <<= 1;
    }
    pow2
}

/// Probe the backend for the largest tile size it can allocate for a
/// framebuffer of `(for_width, for_height)`, starting from the least
/// power-of-two at least that large (bounded by `max_bits`) and halving on
/// failure.
///
/// Ties (both dimensions equal) are broken by shrinking whichever dimension
/// is furthest from its originally requested size, matching the tie-break in
/// `TextureManager::getMaxTileSize`.
pub fn probe_tile_size<R: RenderTarget + ?Sized>(
    target: &mut R,
    for_width: u32,
    for_height: u32,
    max_bits: u32,
) -> Option<(u32, u32)> {
    let mut tile_w = least_pow2_ge(for_width, max_bits);
    let mut tile_h = least_pow2_ge(for_height, max_bits);

    while tile_w > 0 && tile_h > 0 {
        if target.max_tile_probe(tile_w, tile_h) {
            return Some((tile_w, tile_h));
        }
        if tile_w > tile_h {
            tile_w /= 2;
        } else if tile_h > tile_w {
            tile_h /= 2;
        } else if for_width.saturating_sub(tile_w) > for_height.saturating_sub(tile_h) {
            tile_w /= 2;
        } else {
            tile_h /= 2;
        }
    }
    None
}

/// One tile's backing texture plus its position in the grid.
struct Tile<Id> {
    id: Id,
    width: u32,
    height: u32,
}

/// Tiled cache of the server's framebuffer.
///
/// Owns the grid coordinate arrays and per-tile handles; `write`/`copy`/
/// `fill`/`draw_in_quad` translate framebuffer-space operations into
/// per-tile [`RenderTarget`] calls.
pub struct TileCache<R: RenderTarget> {
    width: u32,
    height: u32,
    /// Length `tile_x_count + 1`, strictly increasing, `x_coord[0] == 0`.
    x_coord: Vec<u32>,
    /// Length `tile_y_count + 1`, strictly increasing, `y_coord[0] == 0`.
    y_coord: Vec<u32>,
    tiles: Vec<Vec<Tile<R::TileId>>>, // indexed [col][row]
}

/// Backend texture-dimension probe ceiling, in bits (`1 << (31-1)` is far
/// beyond any real GPU limit; real hosts report a much smaller true maximum
/// via repeated `max_tile_probe` failures before this is ever reached).
const DEFAULT_MAX_BITS: u32 = 16;

impl<R: RenderTarget> TileCache<R> {
    /// Initialize the cache for a `(width, height)` framebuffer, probing
    /// `target` for the tile size and laying out + creating the grid.
    ///
    /// Fails if no tile size at all is supported (`probe_tile_size` returns
    /// `None`) or if any individual tile's texture creation fails.
    pub fn init(target: &mut R, width: u32, height: u32, fill_rgb: [u8; 3]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot initialize a tile cache with a zero dimension"));
        }

        let (tile_max_w, tile_max_h) = probe_tile_size(target, width, height, DEFAULT_MAX_BITS)
            .ok_or_else(|| anyhow!("backend does not support any tile texture size"))?;

        let tile_x_count = div_ceil(width, tile_max_w);
        let tile_y_count = div_ceil(height, tile_max_h);

        let mut x_coord = vec![0u32; tile_x_count as usize + 1];
        for xi in 1..tile_x_count {
            x_coord[xi as usize] = x_coord[xi as usize - 1] + tile_max_w;
        }
        let last_x = x_coord[tile_x_count as usize - 1];
        x_coord[tile_x_count as usize] =
            last_x + least_pow2_ge(width - last_x, DEFAULT_MAX_BITS);

        let mut y_coord = vec![0u32; tile_y_count as usize + 1];
        for yi in 1..tile_y_count {
            y_coord[yi as usize] = y_coord[yi as usize - 1] + tile_max_h;
        }
        let last_y = y_coord[tile_y_count as usize - 1];
        y_coord[tile_y_count as usize] =
            last_y + least_pow2_ge(height - last_y, DEFAULT_MAX_BITS);

        let mut tiles = Vec::with_capacity(tile_x_count as usize);
        for xi in 0..tile_x_count as usize {
            let tw = x_coord[xi + 1] - x_coord[xi];
            let mut col = Vec::with_capacity(tile_y_count as usize);
            for yi in 0..tile_y_count as usize {
                let th = y_coord[yi + 1] - y_coord[yi];
                let id = target.create_tile(tw, th, fill_rgb)?;
                col.push(Tile {
                    id,
                    width: tw,
                    height: th,
                });
            }
            tiles.push(col);
        }

        Ok(Self {
            width,
            height,
            x_coord,
            y_coord,
            tiles,
        })
    }

    /// Release every tile's backing resources.
    pub fn close(&mut self, target: &mut R) {
        for col in &self.tiles {
            for tile in col {
                target.delete_tile(tile.id);
            }
        }
        self.tiles.clear();
        self.x_coord.clear();
        self.y_coord.clear();
        self.width = 0;
        self.height = 0;
    }

    /// Framebuffer dimensions this cache was initialized for.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn tile_x_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile_y_count(&self) -> usize {
        self.tiles.first().map_or(0, Vec::len)
    }

    /// Tile-grid x coordinates, length `tile_x_count() + 1`.
    pub fn x_coords(&self) -> &[u32] {
        &self.x_coord
    }

    /// Tile-grid y coordinates, length `tile_y_count() + 1`.
    pub fn y_coords(&self) -> &[u32] {
        &self.y_coord
    }

    /// Write an RGB24 rectangle (`width * height * 3` bytes, tightly packed,
    /// row-major) at framebuffer position `(dest_x, dest_y)`.
    ///
    /// `dest_x`/`dest_y` may be negative (clipped against the framebuffer
    /// origin) and the rectangle may span multiple tile columns/rows; writes
    /// entirely outside the framebuffer are a no-op success.
    pub fn write(
        &mut self,
        target: &mut R,
        dest_x: i32,
        dest_y: i32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if (dest_x as i64) + (width as i64) <= 0
            || (dest_y as i64) + (height as i64) <= 0
            || dest_x >= self.width as i32
            || dest_y >= self.height as i32
        {
            return Ok(());
        }
        if pixels.len() < (width as usize) * (height as usize) * 3 {
            return Err(anyhow!(
                "write: pixel buffer too small: got {} bytes, need {}",
                pixels.len(),
                (width as usize) * (height as usize) * 3
            ));
        }

        let skip_rows = (-dest_y).max(0) as u32;
        let skip_cols = (-dest_x).max(0) as u32;

        let mut col_start = 0usize;
        while col_start < self.x_coord.len() - 1 && self.x_coord[col_start + 1] as i32 <= dest_x {
            col_start += 1;
        }
        let mut row_start = 0usize;
        while row_start < self.y_coord.len() - 1 && self.y_coord[row_start + 1] as i32 <= dest_y {
            row_start += 1;
        }

        let mut col = col_start;
        let mut x_offset = (dest_x + skip_cols as i32 - self.x_coord[col] as i32).max(0) as u32;
        let mut cols_done = skip_cols;

        while col < self.tile_x_count() && cols_done < width {
            let tile_w = self.tiles[col][0].width;
            let w = (width - cols_done).min(tile_w - x_offset);

            let mut row = row_start;
            let mut y_offset =
                (dest_y + skip_rows as i32 - self.y_coord[row] as i32).max(0) as u32;
            let mut rows_done = skip_rows;

            while row < self.tile_y_count() && rows_done < height {
                let tile_h = self.tiles[col][row].height;
                let h = (height - rows_done).min(tile_h - y_offset);

                let mut scratch;
                let buf: &[u8] = if w == width {
                    // Whole row width present: a contiguous slice of the
                    // caller's buffer serves directly as the upload source.
                    let start = (rows_done as usize) * (width as usize) * 3;
                    &pixels[start..start + (h as usize) * (width as usize) * 3]
                } else {
                    scratch = vec![0u8; (w as usize) * (h as usize) * 3];
                    for r in 0..h as usize {
                        let src_row = (rows_done as usize + r) * (width as usize)
                            + cols_done as usize;
                        let src_off = src_row * 3;
                        let dst_off = r * (w as usize) * 3;
                        scratch[dst_off..dst_off + (w as usize) * 3]
                            .copy_from_slice(&pixels[src_off..src_off + (w as usize) * 3]);
                    }
                    &scratch
                };

                let tile = &self.tiles[col][row];
                target.upload(tile.id, x_offset, y_offset, w, h, buf)?;

                row += 1;
                y_offset = 0;
                rows_done += h;
            }

            col += 1;
            x_offset = 0;
            cols_done += w;
        }

        Ok(())
    }

    /// Fill a framebuffer rectangle with a solid RGB24 color.
    pub fn fill(
        &mut self,
        target: &mut R,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        color: [u8; 3],
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 3];
        for chunk in pixels.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
        self.write(target, x, y, width, height, &pixels)
    }

    /// Read back an RGB24 rectangle (`width * height * 3` bytes, row-major)
    /// from framebuffer position `(x, y)`, the mirror image of
    /// [`write`](Self::write)'s tile-boundary splitting.
    ///
    /// Any part of the rectangle outside the framebuffer reads back as black
    /// (the tile cache has no notion of "never written"; a real server
    /// always paints every visible pixel before a client issues a CopyRect
    /// referencing it).
    pub fn read(&mut self, target: &mut R, x: i32, y: i32, width: u32, height: u32) -> Result<Vec<u8>> {
        let mut out = vec![0u8; (width as usize) * (height as usize) * 3];
        if width == 0 || height == 0 {
            return Ok(out);
        }
        if (x as i64) + (width as i64) <= 0
            || (y as i64) + (height as i64) <= 0
            || x >= self.width as i32
            || y >= self.height as i32
        {
            return Ok(out);
        }

        let skip_rows = (-y).max(0) as u32;
        let skip_cols = (-x).max(0) as u32;

        let mut col_start = 0usize;
        while col_start < self.x_coord.len() - 1 && self.x_coord[col_start + 1] as i32 <= x {
            col_start += 1;
        }
        let mut row_start = 0usize;
        while row_start < self.y_coord.len() - 1 && self.y_coord[row_start + 1] as i32 <= y {
            row_start += 1;
        }

        let mut col = col_start;
        let mut x_offset = (x + skip_cols as i32 - self.x_coord[col] as i32).max(0) as u32;
        let mut cols_done = skip_cols;

        while col < self.tile_x_count() && cols_done < width {
            let tile_w = self.tiles[col][0].width;
            let w = (width - cols_done).min(tile_w - x_offset);

            let mut row = row_start;
            let mut y_offset = (y + skip_rows as i32 - self.y_coord[row] as i32).max(0) as u32;
            let mut rows_done = skip_rows;

            while row < self.tile_y_count() && rows_done < height {
                let tile_h = self.tiles[col][row].height;
                let h = (height - rows_done).min(tile_h - y_offset);

                let tile = &self.tiles[col][row];
                let chunk = target.download(tile.id, x_offset, y_offset, w, h)?;
                for r in 0..h as usize {
                    let dst_row = (rows_done as usize + r) * (width as usize) + cols_done as usize;
                    let dst_off = dst_row * 3;
                    let src_off = r * (w as usize) * 3;
                    out[dst_off..dst_off + (w as usize) * 3]
                        .copy_from_slice(&chunk[src_off..src_off + (w as usize) * 3]);
                }

                row += 1;
                y_offset = 0;
                rows_done += h;
            }

            col += 1;
            x_offset = 0;
            cols_done += w;
        }

        Ok(out)
    }

    /// Copy a rectangle already resident in the cache from `(src_x, src_y)`
    /// to `(dest_x, dest_y)`.
    ///
    /// Implemented as a read-back of the source rectangle followed by a
    /// write at the destination; overlapping source/destination rectangles
    /// are safe since the full source is read into an owned buffer before
    /// anything is written.
    pub fn copy(
        &mut self,
        target: &mut R,
        dest_x: i32,
        dest_y: i32,
        src_x: i32,
        src_y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let pixels = self.read(target, src_x, src_y, width, height)?;
        self.write(target, dest_x, dest_y, width, height, &pixels)
    }

    /// Draw the whole cache as a textured quad across the parallelogram
    /// `(x00,y00,z00)`, `(x10,y10,z10)`, `(x11,y11,z11)` (the implicit fourth
    /// corner `(x01,y01,z01)` is bilinearly derived the same way the tile
    /// corners are).
    pub fn draw_in_quad(
        &mut self,
        target: &mut R,
        corner00: [f32; 3],
        corner10: [f32; 3],
        corner11: [f32; 3],
    ) -> Result<()> {
        let [x00, y00, z00] = corner00;
        let [x10, y10, z10] = corner10;
        let [x11, y11, z11] = corner11;

        let tile_x_count = self.tile_x_count();
        let tile_y_count = self.tile_y_count();

        for xi in 0..tile_x_count {
            for yi in 0..tile_y_count {
                let tile = &self.tiles[xi][yi];
                let tex_max_x = if xi < tile_x_count - 1 {
                    1.0
                } else {
                    (self.width - self.x_coord[xi]) as f32 / tile.width as f32
                };
                let tex_max_y = if yi < tile_y_count - 1 {
                    1.0
                } else {
                    (self.height - self.y_coord[yi]) as f32 / tile.height as f32
                };

                let u0 = self.x_coord[xi] as f32 / self.width as f32;
                let v0 = self.y_coord[yi] as f32 / self.height as f32;
                let u1 = if xi < tile_x_count - 1 {
                    self.x_coord[xi + 1] as f32 / self.width as f32
                } else {
                    1.0
                };
                let v1 = if yi < tile_y_count - 1 {
                    self.y_coord[yi + 1] as f32 / self.height as f32
                } else {
                    1.0
                };

                let lerp = |u: f32, v: f32| -> [f32; 3] {
                    [
                        x00 + u * (x10 - x00) + v * (x11 - x10),
                        y00 + u * (y10 - y00) + v * (y11 - y10),
                        z00 + u * (z10 - z00) + v * (z11 - z10),
                    ]
                };

                let corners = [lerp(u0, v0), lerp(u1, v0), lerp(u1, v1), lerp(u0, v1)];
                target.draw_quad(tile.id, (tex_max_x, tex_max_y), corners)?;
            }
        }
        Ok(())
    }
}

fn div_ceil(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A software `RenderTarget` backed by a single flat RGB24 buffer per
    /// tile, for exercising the tiling math without a real GPU.
    struct FakeTarget {
        max_dim: u32,
        next_id: AtomicU32,
        tiles: HashMap<u32, (u32, u32, Vec<u8>)>,
        quads_drawn: Vec<(u32, (f32, f32))>,
    }

    impl FakeTarget {
        fn new(max_dim: u32) -> Self {
            Self {
                max_dim,
                next_id: AtomicU32::new(1),
                tiles: HashMap::new(),
                quads_drawn: Vec::new(),
            }
        }
    }

    impl RenderTarget for FakeTarget {
        type TileId = u32;

        fn max_tile_probe(&mut self, width: u32, height: u32) -> bool {
            width <= self.max_dim && height <= self.max_dim
        }

        fn create_tile(&mut self, width: u32, height: u32, fill_rgb: [u8; 3]) -> Result<u32> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut buf = vec![0u8; (width as usize) * (height as usize) * 3];
            for chunk in buf.chunks_exact_mut(3) {
                chunk.copy_from_slice(&fill_rgb);
            }
            self.tiles.insert(id, (width, height, buf));
            Ok(id)
        }

        fn delete_tile(&mut self, tile: u32) {
            self.tiles.remove(&tile);
        }

        fn upload(
            &mut self,
            tile: u32,
            x: u32,
            y: u32,
            width: u32,
            height: u32,
            pixels: &[u8],
        ) -> Result<()> {
            let (tw, _th, buf) = self.tiles.get_mut(&tile).expect("unknown tile");
            for row in 0..height as usize {
                let dst_row_start = ((y as usize + row) * (*tw as usize) + x as usize) * 3;
                let src_row_start = row * (width as usize) * 3;
                buf[dst_row_start..dst_row_start + (width as usize) * 3]
                    .copy_from_slice(&pixels[src_row_start..src_row_start + (width as usize) * 3]);
            }
            Ok(())
        }

        fn draw_quad(
            &mut self,
            tile: u32,
            tex_max: (f32, f32),
            _corners: [[f32; 3]; 4],
        ) -> Result<()> {
            self.quads_drawn.push((tile, tex_max));
            Ok(())
        }

        fn download(&mut self, tile: u32, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>> {
            let (tw, _th, buf) = self.tiles.get(&tile).expect("unknown tile");
            let mut out = vec![0u8; (width as usize) * (height as usize) * 3];
            for row in 0..height as usize {
                let src_row_start = ((y as usize + row) * (*tw as usize) + x as usize) * 3;
                let dst_row_start = row * (width as usize) * 3;
                out[dst_row_start..dst_row_start + (width as usize) * 3]
                    .copy_from_slice(&buf[src_row_start..src_row_start + (width as usize) * 3]);
            }
            Ok(out)
        }
    }

    #[test]
    fn test_least_pow2_ge() {
        assert_eq!(least_pow2_ge(0, 16), 1);
        assert_eq!(least_pow2_ge(1, 16), 1);
        assert_eq!(least_pow2_ge(2, 16), 2);
        assert_eq!(least_pow2_ge(3, 16), 4);
        assert_eq!(least_pow2_ge(1000, 16), 1024);
        assert_eq!(least_pow2_ge(100000, 8), 128); // capped at 1<<7
    }

    #[test]
    fn test_probe_tile_size_shrinks_on_failure() {
        let mut target = FakeTarget::new(256);
        let size = probe_tile_size(&mut target, 1000, 1000, 16);
        assert_eq!(size, Some((256, 256)));
    }

    #[test]
    fn test_probe_tile_size_no_support_fails() {
        struct NeverTarget;
        impl RenderTarget for NeverTarget {
            type TileId = ();
            fn max_tile_probe(&mut self, _w: u32, _h: u32) -> bool {
                false
            }
            fn create_tile(&mut self, _w: u32, _h: u32, _c: [u8; 3]) -> Result<()> {
                Ok(())
            }
            fn delete_tile(&mut self, _t: ()) {}
            fn upload(&mut self, _t: (), _x: u32, _y: u32, _w: u32, _h: u32, _p: &[u8]) -> Result<()> {
                Ok(())
            }
            fn draw_quad(&mut self, _t: (), _tex: (f32, f32), _c: [[f32; 3]; 4]) -> Result<()> {
                Ok(())
            }
            fn download(&mut self, _t: (), _x: u32, _y: u32, _w: u32, _h: u32) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
        }
        let mut target = NeverTarget;
        assert_eq!(probe_tile_size(&mut target, 100, 100, 16), None);
    }

    #[test]
    fn test_init_lays_out_grid_invariants() {
        let mut target = FakeTarget::new(256);
        let cache = TileCache::init(&mut target, 1000, 600, [0, 0, 255]).unwrap();

        assert_eq!(cache.x_coords()[0], 0);
        assert_eq!(cache.y_coords()[0], 0);
        assert!(*cache.x_coords().last().unwrap() >= 1000);
        assert!(*cache.y_coords().last().unwrap() >= 600);

        for w in cache.x_coords().windows(2) {
            assert!(w[1] > w[0]);
        }
        for w in cache.y_coords().windows(2) {
            assert!(w[1] > w[0]);
        }

        // Interior tiles are exactly the probed power-of-two size.
        let xs = cache.x_coords();
        for i in 0..xs.len() - 2 {
            assert_eq!(xs[i + 1] - xs[i], 256);
        }
    }

    #[test]
    fn test_init_exact_power_of_two_single_tile() {
        let mut target = FakeTarget::new(2048);
        let cache = TileCache::init(&mut target, 512, 512, [0, 0, 0]).unwrap();
        assert_eq!(cache.tile_x_count(), 1);
        assert_eq!(cache.tile_y_count(), 1);
        assert_eq!(cache.x_coords(), &[0, 512]);
    }

    #[test]
    fn test_write_within_single_tile() {
        let mut target = FakeTarget::new(2048);
        let mut cache = TileCache::init(&mut target, 100, 100, [1, 2, 3]).unwrap();
        let pixels = vec![9u8, 8, 7, 9, 8, 7, 9, 8, 7, 9, 8, 7]; // 2x2 RGB
        cache.write(&mut target, 10, 10, 2, 2, &pixels).unwrap();

        let (_w, _h, buf) = target.tiles.get(&1).unwrap();
        let tile_w = cache.x_coords()[1] as usize;
        let off = (10 * tile_w + 10) * 3;
        assert_eq!(&buf[off..off + 3], &[9, 8, 7]);
    }

    #[test]
    fn test_write_crossing_tile_boundary() {
        let mut target = FakeTarget::new(64);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        assert!(cache.tile_x_count() > 1);

        // A rectangle straddling the boundary at x=64.
        let w = 10u32;
        let h = 4u32;
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        for (i, chunk) in pixels.chunks_exact_mut(3).enumerate() {
            chunk.copy_from_slice(&[i as u8, i as u8, i as u8]);
        }
        cache.write(&mut target, 60, 5, w, h, &pixels).unwrap();
        // No panic and both tiles touched: spot check corner pixels exist.
        assert!(target.tiles.len() >= 2);
    }

    #[test]
    fn test_write_fully_outside_is_noop() {
        let mut target = FakeTarget::new(2048);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        cache.write(&mut target, 1000, 1000, 5, 5, &vec![0u8; 75]).unwrap();
    }

    #[test]
    fn test_write_clips_negative_origin() {
        let mut target = FakeTarget::new(2048);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        let w = 10u32;
        let h = 10u32;
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        for chunk in pixels.chunks_exact_mut(3) {
            chunk.copy_from_slice(&[42, 42, 42]);
        }
        // Rectangle origin at (-5, -5): only the bottom-right 5x5 is visible.
        cache.write(&mut target, -5, -5, w, h, &pixels).unwrap();
        let (_w, _h, buf) = target.tiles.get(&1).unwrap();
        assert_eq!(&buf[0..3], &[42, 42, 42]);
    }

    #[test]
    fn test_fill_writes_solid_color() {
        let mut target = FakeTarget::new(2048);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        cache.fill(&mut target, 0, 0, 20, 20, [5, 6, 7]).unwrap();
        let (_w, _h, buf) = target.tiles.get(&1).unwrap();
        assert_eq!(&buf[0..3], &[5, 6, 7]);
    }

    #[test]
    fn test_copy_moves_previously_written_pixels() {
        let mut target = FakeTarget::new(2048);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        cache.fill(&mut target, 10, 10, 5, 5, [7, 8, 9]).unwrap();
        cache.copy(&mut target, 50, 50, 10, 10, 5, 5).unwrap();

        let read_back = cache.read(&mut target, 50, 50, 5, 5).unwrap();
        for chunk in read_back.chunks_exact(3) {
            assert_eq!(chunk, &[7, 8, 9]);
        }
    }

    #[test]
    fn test_copy_across_tile_boundary() {
        let mut target = FakeTarget::new(64);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        cache.fill(&mut target, 60, 5, 10, 4, [3, 4, 5]).unwrap();
        cache.copy(&mut target, 0, 0, 60, 5, 10, 4).unwrap();
        let read_back = cache.read(&mut target, 0, 0, 10, 4).unwrap();
        for chunk in read_back.chunks_exact(3) {
            assert_eq!(chunk, &[3, 4, 5]);
        }
    }

    #[test]
    fn test_draw_in_quad_visits_every_tile_with_edge_fractions() {
        let mut target = FakeTarget::new(64);
        let mut cache = TileCache::init(&mut target, 100, 50, [0, 0, 0]).unwrap();
        cache
            .draw_in_quad(
                &mut target,
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
            )
            .unwrap();
        assert_eq!(
            target.quads_drawn.len(),
            cache.tile_x_count() * cache.tile_y_count()
        );
        // Right-edge tile texture fraction should be < 1.0 (100 isn't a
        // multiple of 64, so the last column overhangs).
        let edge_tex_x = target.quads_drawn.last().unwrap().1 .0;
        assert!(edge_tex_x <= 1.0);
    }

    #[test]
    fn test_close_clears_tiles() {
        let mut target = FakeTarget::new(2048);
        let mut cache = TileCache::init(&mut target, 100, 100, [0, 0, 0]).unwrap();
        cache.close(&mut target);
        assert_eq!(cache.tile_x_count(), 0);
        assert!(target.tiles.is_empty());
    }
}
