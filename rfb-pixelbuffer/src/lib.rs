//! RFB pixel buffer types and utilities.
//!
//! This crate provides pixel format descriptions and buffer management for the
//! RFB/VNC protocol implementation.

pub mod buffer;
pub mod format;
pub mod managed;
pub mod render_target;

pub use buffer::{MutablePixelBuffer, PixelBuffer};
pub use format::PixelFormat;
pub use managed::ManagedPixelBuffer;
pub use render_target::{probe_tile_size, RenderTarget, TileCache};
