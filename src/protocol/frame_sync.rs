//! # Frame Synchronizer
//!
//! Recovers frame boundaries from the continuous vehicle → host byte stream.
//!
//! Frames are not length-prefixed; the first byte of each frame is its type
//! tag and the tag implies the length (Fast = 20, Debug = 14). The
//! synchronizer keeps a buffer of unframed bytes and, each time a frame is
//! requested:
//!
//! 1. Discards the head byte if it is not a known tag (resynchronization)
//! 2. Drops the oldest whole frame while at least two frames of the head
//!    type are buffered (only the newest telemetry matters)
//! 3. Emits one frame once enough bytes for the head type are buffered
//!
//! The backlog check counts every buffered byte against the head frame's
//! length, whatever follows it. A Debug frame (14 bytes) read together with
//! a Fast frame (20 bytes) makes 34 >= 28, so the Debug frame is dropped and
//! only the Fast frame is emitted. In the other order (34 < 40) both are
//! emitted.
//!
//! A short trailing frame simply waits for more bytes; there is no partial
//! frame timeout. Frames are emitted by length only; the checksum is checked
//! by the decoder.
//!
//! ## Usage
//!
//! ```
//! use quad_ground::protocol::frame_sync::FrameSync;
//!
//! let mut sync = FrameSync::new();
//! // Noise followed by the first half of a Debug frame
//! let frames: Vec<_> = sync.feed(&[0x00, 0x11, 0xA3, 0x00, 0x01]).collect();
//! assert!(frames.is_empty());
//! assert_eq!(sync.buffered(), 3);
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use super::packets::FrameType;

/// Initial buffer capacity (a few frames of headroom)
const INITIAL_CAPACITY: usize = 256;

/// Incremental frame synchronizer with an anti-backlog policy
#[derive(Debug)]
pub struct FrameSync {
    buf: BytesMut,
    dropped_frames: u64,
    discarded_bytes: u64,
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            dropped_frames: 0,
            discarded_bytes: 0,
        }
    }

    /// Append received bytes and iterate over the frames now available
    ///
    /// The iterator is lazy: frames are cut from the buffer only as it is
    /// advanced. Frames left unpulled stay buffered and count towards the
    /// backlog on the next call.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(data);
        Frames { sync: self }
    }

    /// Cut the next frame from the buffer, if one is complete
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let tag = *self.buf.first()?;

            let Some(frame_type) = FrameType::from_tag(tag) else {
                trace!("Discarding unknown leading byte 0x{:02X}", tag);
                self.buf.advance(1);
                self.discarded_bytes += 1;
                continue;
            };

            let frame_len = frame_type.frame_len();

            if self.buf.len() >= 2 * frame_len {
                debug!(
                    "Telemetry backlog ({} bytes buffered), dropping oldest {:?} frame",
                    self.buf.len(),
                    frame_type
                );
                self.buf.advance(frame_len);
                self.dropped_frames += 1;
                continue;
            }

            if self.buf.len() >= frame_len {
                return Some(self.buf.split_to(frame_len).freeze());
            }

            return None;
        }
    }

    /// Bytes currently waiting to be framed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whole frames dropped by the backlog policy since creation or reset
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Single bytes discarded while resynchronizing since creation or reset
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Forget buffered bytes and counters (new connection)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.dropped_frames = 0;
        self.discarded_bytes = 0;
    }
}

/// Lazy iterator over the frames available after a [`FrameSync::feed`]
#[derive(Debug)]
pub struct Frames<'a> {
    sync: &'a mut FrameSync,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.sync.next_frame()
    }
}
