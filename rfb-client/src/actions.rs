//! Cross-thread action-item pipeline.
//!
//! The pipeline types live in `rfb-encodings` so decoders can emit
//! [`ActionItem`]s directly while parsing rectangles. This module just
//! re-exports them under the path the rest of the client already uses.

pub use rfb_encodings::action::{ActionItem, ActionQueue, ClusterBroadcaster};
