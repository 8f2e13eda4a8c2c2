//! Cross-thread action-item pipeline.
//!
//! Decoders never touch a rendering surface directly. Instead each one turns
//! the rectangle it just parsed into one or more [`ActionItem`]s and pushes
//! them onto an [`ActionQueue`]. A render thread drains that queue on its own
//! schedule via [`ActionQueue::perform_queued_actions`], which keeps socket
//! reads and framebuffer presentation on separate threads without exposing
//! raw network buffers across that boundary.
//!
//! When running as a cluster master, every item is also handed to a
//! [`ClusterBroadcaster`] so it can be relayed to slave replicas before the
//! local render thread ever sees it.

use std::collections::VecDeque;
use std::sync::Mutex;

use rfb_protocol::messages::types::PixelFormat;

/// A single unit of work destined for the render thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionItem {
    /// The security handshake requires a password; the render thread should
    /// prompt and post the answer back through the session's password barrier.
    GetPassword,

    /// The display should be (re)initialized to the given size and name.
    InitDisplay {
        width: u16,
        height: u16,
        name: String,
        pixel_format: PixelFormat,
    },

    /// Blit `pixels` (RGB24, row-major, bottom-to-top, increasing `dest_y`)
    /// into the destination rectangle.
    Write {
        dest_x: u16,
        dest_y: u16,
        width: u16,
        height: u16,
        pixels: Vec<u8>,
    },

    /// Copy a rectangle already present on the display from one place to another.
    Copy {
        dest_x: u16,
        dest_y: u16,
        src_x: u16,
        src_y: u16,
        width: u16,
        height: u16,
    },

    /// Fill a rectangle with a single RGB24 color.
    Fill {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        color: [u8; 3],
    },

    /// Something went wrong locally (decode failure, I/O failure, ...).
    InternalError { where_: String, message: String },

    /// A recoverable error the host may want to surface to the user.
    Error { where_: String, message: String },

    /// The server explicitly reported an error (e.g. security failure reason text).
    ErrorFromServer { where_: String, message: String },

    /// ServerInit negotiation has started.
    InfoServerInitStarted,

    /// Protocol versions exchanged during the handshake.
    InfoProtocolVersion {
        server_major: u32,
        server_minor: u32,
        client_major: u32,
        client_minor: u32,
    },

    /// Result of a VNC authentication attempt.
    InfoAuthResult {
        ok: bool,
        scheme: u32,
        result: u32,
    },

    /// ServerInit negotiation finished, successfully or not.
    InfoServerInitCompleted { ok: bool },

    /// Session teardown has started.
    InfoCloseStarted,

    /// Session teardown has finished.
    InfoCloseCompleted,
}

impl ActionItem {
    /// Type code used as the first byte of the cluster broadcast wire format.
    fn type_code(&self) -> u8 {
        match self {
            Self::GetPassword => 0,
            Self::InitDisplay { .. } => 1,
            Self::Write { .. } => 2,
            Self::Copy { .. } => 3,
            Self::Fill { .. } => 4,
            Self::InternalError { .. } => 5,
            Self::Error { .. } => 6,
            Self::ErrorFromServer { .. } => 7,
            Self::InfoServerInitStarted => 8,
            Self::InfoProtocolVersion { .. } => 9,
            Self::InfoAuthResult { .. } => 10,
            Self::InfoServerInitCompleted { .. } => 11,
            Self::InfoCloseStarted => 12,
            Self::InfoCloseCompleted => 13,
        }
    }

    /// Serialize this item as `[type_code][body]` for cluster broadcast to slave
    /// replicas. Strings are length-prefixed (u32 big-endian) UTF-8; integers are
    /// big-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.type_code()];
        match self {
            Self::GetPassword
            | Self::InfoServerInitStarted
            | Self::InfoCloseStarted
            | Self::InfoCloseCompleted => {}
            Self::InitDisplay {
                width,
                height,
                name,
                pixel_format,
            } => {
                out.extend_from_slice(&width.to_be_bytes());
                out.extend_from_slice(&height.to_be_bytes());
                push_string(&mut out, name);
                out.push(pixel_format.bits_per_pixel);
                out.push(pixel_format.depth);
                out.push(pixel_format.big_endian);
                out.push(pixel_format.true_color);
                out.extend_from_slice(&pixel_format.red_max.to_be_bytes());
                out.extend_from_slice(&pixel_format.green_max.to_be_bytes());
                out.extend_from_slice(&pixel_format.blue_max.to_be_bytes());
                out.push(pixel_format.red_shift);
                out.push(pixel_format.green_shift);
                out.push(pixel_format.blue_shift);
            }
            Self::Write {
                dest_x,
                dest_y,
                width,
                height,
                pixels,
            } => {
                out.extend_from_slice(&dest_x.to_be_bytes());
                out.extend_from_slice(&dest_y.to_be_bytes());
                out.extend_from_slice(&width.to_be_bytes());
                out.extend_from_slice(&height.to_be_bytes());
                out.extend_from_slice(&(pixels.len() as u32).to_be_bytes());
                out.extend_from_slice(pixels);
            }
            Self::Copy {
                dest_x,
                dest_y,
                src_x,
                src_y,
                width,
                height,
            } => {
                for v in [dest_x, dest_y, src_x, src_y, width, height] {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            Self::Fill {
                x,
                y,
                width,
                height,
                color,
            } => {
                for v in [x, y, width, height] {
                    out.extend_from_slice(&v.to_be_bytes());
                }
                out.extend_from_slice(color);
            }
            Self::InternalError { where_, message }
            | Self::Error { where_, message }
            | Self::ErrorFromServer { where_, message } => {
                push_string(&mut out, where_);
                push_string(&mut out, message);
            }
            Self::InfoProtocolVersion {
                server_major,
                server_minor,
                client_major,
                client_minor,
            } => {
                for v in [server_major, server_minor, client_major, client_minor] {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            Self::InfoAuthResult { ok, scheme, result } => {
                out.push(u8::from(*ok));
                out.extend_from_slice(&scheme.to_be_bytes());
                out.extend_from_slice(&result.to_be_bytes());
            }
            Self::InfoServerInitCompleted { ok } => {
                out.push(u8::from(*ok));
            }
        }
        out
    }
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Cursor over a byte slice with the same field layout `serialize` writes.
///
/// A slave replica reads these directly off its broadcast channel, so every
/// `read_*` call must consume exactly as many bytes as the matching
/// `serialize` branch wrote.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            anyhow::bail!("action item truncated: need {} more bytes, have {}", n, self.buf.len() - self.pos);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn string(&mut self) -> anyhow::Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

impl ActionItem {
    /// Reconstruct one `ActionItem` from the front of `bytes`.
    ///
    /// Returns the item and the number of bytes consumed, so callers reading
    /// a continuous broadcast stream can advance past exactly one item at a
    /// time. Mirrors the original implementation's per-type-code dispatch:
    /// the leading byte selects the variant, the rest is read with the same
    /// field layout `serialize` wrote.
    pub fn deserialize(bytes: &[u8]) -> anyhow::Result<(Self, usize)> {
        let mut r = Reader::new(bytes);
        let type_code = r.u8()?;
        let item = match type_code {
            0 => Self::GetPassword,
            1 => {
                let width = r.u16()?;
                let height = r.u16()?;
                let name = r.string()?;
                let pixel_format = PixelFormat {
                    bits_per_pixel: r.u8()?,
                    depth: r.u8()?,
                    big_endian: r.u8()?,
                    true_color: r.u8()?,
                    red_max: r.u16()?,
                    green_max: r.u16()?,
                    blue_max: r.u16()?,
                    red_shift: r.u8()?,
                    green_shift: r.u8()?,
                    blue_shift: r.u8()?,
                };
                Self::InitDisplay {
                    width,
                    height,
                    name,
                    pixel_format,
                }
            }
            2 => {
                let dest_x = r.u16()?;
                let dest_y = r.u16()?;
                let width = r.u16()?;
                let height = r.u16()?;
                let len = r.u32()? as usize;
                let pixels = r.take(len)?.to_vec();
                Self::Write {
                    dest_x,
                    dest_y,
                    width,
                    height,
                    pixels,
                }
            }
            3 => Self::Copy {
                dest_x: r.u16()?,
                dest_y: r.u16()?,
                src_x: r.u16()?,
                src_y: r.u16()?,
                width: r.u16()?,
                height: r.u16()?,
            },
            4 => {
                let x = r.u16()?;
                let y = r.u16()?;
                let width = r.u16()?;
                let height = r.u16()?;
                let color_bytes = r.take(3)?;
                Self::Fill {
                    x,
                    y,
                    width,
                    height,
                    color: [color_bytes[0], color_bytes[1], color_bytes[2]],
                }
            }
            5 => Self::InternalError {
                where_: r.string()?,
                message: r.string()?,
            },
            6 => Self::Error {
                where_: r.string()?,
                message: r.string()?,
            },
            7 => Self::ErrorFromServer {
                where_: r.string()?,
                message: r.string()?,
            },
            8 => Self::InfoServerInitStarted,
            9 => Self::InfoProtocolVersion {
                server_major: r.u32()?,
                server_minor: r.u32()?,
                client_major: r.u32()?,
                client_minor: r.u32()?,
            },
            10 => Self::InfoAuthResult {
                ok: r.bool()?,
                scheme: r.u32()?,
                result: r.u32()?,
            },
            11 => Self::InfoServerInitCompleted { ok: r.bool()? },
            12 => Self::InfoCloseStarted,
            13 => Self::InfoCloseCompleted,
            other => anyhow::bail!("unknown action item type code {other}"),
        };
        Ok((item, r.pos))
    }
}

/// Reconstructs `ActionItem`s from a cluster master's broadcast stream and
/// enqueues them locally, the slave-side counterpart to
/// [`ActionQueue::add`]'s broadcast-before-enqueue.
///
/// Returns once an [`ActionItem::InfoCloseCompleted`] has been enqueued,
/// mirroring the master's own shutdown sequence (engine closed, slaves given
/// one tick to observe the close, then the master's I/O task joins).
pub fn run_slave_loop<F>(queue: &ActionQueue, mut recv_one: F) -> anyhow::Result<()>
where
    F: FnMut() -> anyhow::Result<Option<Vec<u8>>>,
{
    loop {
        let Some(bytes) = recv_one()? else {
            return Ok(());
        };
        let (item, consumed) = ActionItem::deserialize(&bytes)?;
        if consumed != bytes.len() {
            anyhow::bail!(
                "trailing bytes after action item: consumed {consumed} of {}",
                bytes.len()
            );
        }
        let is_close = matches!(item, ActionItem::InfoCloseCompleted);
        queue.add(item);
        if is_close {
            return Ok(());
        }
    }
}

/// Receiver for action items broadcast to cluster slave replicas.
///
/// A master session calls [`broadcast`](Self::broadcast) for every item
/// *before* it is enqueued locally, so slaves never observe state the master
/// hasn't committed to yet.
pub trait ClusterBroadcaster: Send + Sync {
    fn broadcast(&self, item: &ActionItem);
}

/// A mutex-guarded FIFO of pending action items, with optional cluster broadcast.
///
/// `add` is non-blocking: it never waits on the render thread. `remove_next`
/// is also non-blocking and returns `None` when the queue is empty, so a
/// render thread can poll it once per frame rather than parking on a
/// condition variable.
pub struct ActionQueue {
    items: Mutex<VecDeque<ActionItem>>,
    broadcaster: Option<Box<dyn ClusterBroadcaster>>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    /// Create an action queue with no cluster broadcast.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            broadcaster: None,
        }
    }

    /// Create an action queue that broadcasts every item to `broadcaster`
    /// before enqueuing it locally.
    pub fn with_broadcaster(broadcaster: Box<dyn ClusterBroadcaster>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            broadcaster: Some(broadcaster),
        }
    }

    /// Push an item onto the back of the queue, broadcasting it first if a
    /// cluster broadcaster is configured.
    pub fn add(&self, item: ActionItem) {
        if let Some(b) = &self.broadcaster {
            b.broadcast(&item);
        }
        self.items
            .lock()
            .expect("ActionQueue mutex poisoned")
            .push_back(item);
    }

    /// Pop the next item off the front of the queue, if any.
    pub fn remove_next(&self) -> Option<ActionItem> {
        self.items
            .lock()
            .expect("ActionQueue mutex poisoned")
            .pop_front()
    }

    /// Returns true if no items are currently queued.
    pub fn is_empty(&self) -> bool {
        self.items
            .lock()
            .expect("ActionQueue mutex poisoned")
            .is_empty()
    }

    /// Drain every currently queued item, invoking `handler` for each in order.
    ///
    /// Items added by another thread while this call is draining may or may
    /// not be observed, depending on timing; callers that need a stable
    /// snapshot should call this repeatedly until it processes zero items.
    pub fn perform_queued_actions<F: FnMut(ActionItem)>(&self, mut handler: F) -> usize {
        let mut processed = 0;
        while let Some(item) = self.remove_next() {
            handler(item);
            processed += 1;
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_pixel_format() -> PixelFormat {
        PixelFormat {
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

    #[test]
    fn test_add_and_remove_fifo_order() {
        let queue = ActionQueue::new();
        queue.add(ActionItem::InfoServerInitStarted);
        queue.add(ActionItem::InfoCloseStarted);
        assert_eq!(queue.remove_next(), Some(ActionItem::InfoServerInitStarted));
        assert_eq!(queue.remove_next(), Some(ActionItem::InfoCloseStarted));
        assert_eq!(queue.remove_next(), None);
    }

    #[test]
    fn test_remove_next_on_empty_queue_is_none() {
        let queue = ActionQueue::new();
        assert_eq!(queue.remove_next(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_perform_queued_actions_drains_in_order() {
        let queue = ActionQueue::new();
        for i in 0..5u16 {
            queue.add(ActionItem::Fill {
                x: i,
                y: 0,
                width: 1,
                height: 1,
                color: [0, 0, 0],
            });
        }
        let mut seen = Vec::new();
        let processed = queue.perform_queued_actions(|item| {
            if let ActionItem::Fill { x, .. } = item {
                seen.push(x);
            }
        });
        assert_eq!(processed, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    struct RecordingBroadcaster {
        seen: Mutex<Vec<ActionItem>>,
    }

    impl ClusterBroadcaster for RecordingBroadcaster {
        fn broadcast(&self, item: &ActionItem) {
            self.seen.lock().unwrap().push(item.clone());
        }
    }

    #[test]
    fn test_broadcast_happens_before_local_enqueue_is_observable() {
        let recorder = Arc::new(RecordingBroadcaster {
            seen: Mutex::new(Vec::new()),
        });
        struct Forwarding(Arc<RecordingBroadcaster>);
        impl ClusterBroadcaster for Forwarding {
            fn broadcast(&self, item: &ActionItem) {
                self.0.broadcast(item);
            }
        }
        let queue = ActionQueue::with_broadcaster(Box::new(Forwarding(recorder.clone())));
        queue.add(ActionItem::InfoCloseCompleted);
        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[ActionItem::InfoCloseCompleted]
        );
        assert_eq!(queue.remove_next(), Some(ActionItem::InfoCloseCompleted));
    }

    #[test]
    fn test_serialize_write_round_trips_layout() {
        let item = ActionItem::Write {
            dest_x: 1,
            dest_y: 2,
            width: 3,
            height: 4,
            pixels: vec![1, 2, 3, 4, 5, 6],
        };
        let bytes = item.serialize();
        assert_eq!(bytes[0], 2); // type code for Write
        assert_eq!(&bytes[1..3], &1u16.to_be_bytes());
        assert_eq!(&bytes[3..5], &2u16.to_be_bytes());
    }

    #[test]
    fn test_deserialize_round_trips_every_variant() {
        let items = vec![
            ActionItem::GetPassword,
            ActionItem::InitDisplay {
                width: 640,
                height: 480,
                name: "test desktop".to_string(),
                pixel_format: test_pixel_format(),
            },
            ActionItem::Write {
                dest_x: 1,
                dest_y: 2,
                width: 3,
                height: 4,
                pixels: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
            },
            ActionItem::Copy {
                dest_x: 1,
                dest_y: 2,
                src_x: 3,
                src_y: 4,
                width: 5,
                height: 6,
            },
            ActionItem::Fill {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
                color: [9, 8, 7],
            },
            ActionItem::InternalError {
                where_: "decode".to_string(),
                message: "bad rect".to_string(),
            },
            ActionItem::Error {
                where_: "auth".to_string(),
                message: "denied".to_string(),
            },
            ActionItem::ErrorFromServer {
                where_: "server".to_string(),
                message: "too many connections".to_string(),
            },
            ActionItem::InfoServerInitStarted,
            ActionItem::InfoProtocolVersion {
                server_major: 3,
                server_minor: 3,
                client_major: 3,
                client_minor: 3,
            },
            ActionItem::InfoAuthResult {
                ok: true,
                scheme: 2,
                result: 0,
            },
            ActionItem::InfoServerInitCompleted { ok: true },
            ActionItem::InfoCloseStarted,
            ActionItem::InfoCloseCompleted,
        ];

        for item in items {
            let bytes = item.serialize();
            let (decoded, consumed) = ActionItem::deserialize(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(decoded, item);
        }
    }

    #[test]
    fn test_deserialize_rejects_unknown_type_code() {
        assert!(ActionItem::deserialize(&[255]).is_err());
    }

    #[test]
    fn test_deserialize_rejects_truncated_buffer() {
        let bytes = ActionItem::Fill {
            x: 1,
            y: 2,
            width: 3,
            height: 4,
            color: [1, 2, 3],
        }
        .serialize();
        assert!(ActionItem::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_run_slave_loop_enqueues_until_close_completed() {
        let queue = ActionQueue::new();
        let stream = vec![
            ActionItem::InfoServerInitStarted.serialize(),
            ActionItem::Fill {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
                color: [1, 1, 1],
            }
            .serialize(),
            ActionItem::InfoCloseCompleted.serialize(),
        ];
        let mut iter = stream.into_iter();
        run_slave_loop(&queue, || Ok(iter.next())).unwrap();

        assert_eq!(queue.remove_next(), Some(ActionItem::InfoServerInitStarted));
        assert!(matches!(queue.remove_next(), Some(ActionItem::Fill { .. })));
        assert_eq!(queue.remove_next(), Some(ActionItem::InfoCloseCompleted));
        assert_eq!(queue.remove_next(), None);
    }

    #[test]
    fn test_run_slave_loop_stops_when_source_runs_dry_without_close() {
        let queue = ActionQueue::new();
        let mut sent = false;
        run_slave_loop(&queue, || {
            if sent {
                Ok(None)
            } else {
                sent = true;
                Ok(Some(ActionItem::InfoServerInitStarted.serialize()))
            }
        })
        .unwrap();
        assert_eq!(queue.remove_next(), Some(ActionItem::InfoServerInitStarted));
        assert_eq!(queue.remove_next(), None);
    }

    #[test]
    fn test_serialize_init_display_contains_name() {
        let item = ActionItem::InitDisplay {
            width: 640,
            height: 480,
            name: "test desktop".to_string(),
            pixel_format: test_pixel_format(),
        };
        let bytes = item.serialize();
        assert_eq!(bytes[0], 1);
        let name_bytes = b"test desktop";
        let haystack = &bytes[..];
        assert!(haystack
            .windows(name_bytes.len())
            .any(|w| w == name_bytes));
    }
}
