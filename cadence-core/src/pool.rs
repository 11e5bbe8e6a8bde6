//! # Buffer Pool - Host-Side Buffer Exchange
//!
//! The engine never allocates output buffers itself. It asks the host for
//! one, fills it, and enqueues it back:
//!
//! ```text
//! ┌──────────┐ request  ┌────────────┐  pop    ┌──────────┐
//! │  Engine  │◄─────────│ BufferHost │────────►│ Consumer │
//! │ (decode) │─────────►│  (pool)    │◄────────│ (render) │
//! └──────────┘ enqueue  └────────────┘ recycle └──────────┘
//! ```
//!
//! [`BufferPool`] is the reference host: lazy allocation, per-lane free
//! lists and ready queues, and counters for leak checks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufferKind, DecodeBuffer};

/// Buffer exchange capability supplied by the embedding host.
///
/// Requests hand a buffer to the engine; enqueues hand it back. The engine
/// keeps no reference to a buffer once it has been enqueued.
pub trait BufferHost: Send + Sync {
    fn request_video_buffer(&self) -> DecodeBuffer;
    fn request_audio_buffer(&self) -> DecodeBuffer;
    fn enqueue_video_buffer(&self, buffer: DecodeBuffer);
    fn enqueue_audio_buffer(&self, buffer: DecodeBuffer);

    /// Hand back a requested buffer that ended up with nothing to deliver.
    /// Dropped unless the host keeps free lists.
    fn return_buffer(&self, buffer: DecodeBuffer) {
        drop(buffer);
    }
}

// ============================================================================
// Buffer Pool
// ============================================================================

struct Lane {
    free: Mutex<Vec<DecodeBuffer>>,
    ready: Mutex<VecDeque<DecodeBuffer>>,
}

impl Lane {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            ready: Mutex::new(VecDeque::new()),
        }
    }
}

pub struct BufferPool {
    video: Lane,
    audio: Lane,
    allocated: AtomicU64,
    recycled: AtomicU64,
    enqueued: AtomicU64,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            video: Lane::new(),
            audio: Lane::new(),
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
        }
    }

    fn lane(&self, kind: BufferKind) -> &Lane {
        match kind {
            BufferKind::Video => &self.video,
            BufferKind::Audio => &self.audio,
        }
    }

    fn acquire(&self, kind: BufferKind) -> DecodeBuffer {
        let mut free = self.lane(kind).free.lock();
        if let Some(mut buffer) = free.pop() {
            buffer.reset();
            self.recycled.fetch_add(1, Ordering::Relaxed);
            buffer
        } else {
            drop(free);
            self.allocated.fetch_add(1, Ordering::Relaxed);
            match kind {
                BufferKind::Video => DecodeBuffer::video(),
                BufferKind::Audio => DecodeBuffer::audio(),
            }
        }
    }

    fn push_ready(&self, buffer: DecodeBuffer) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.lane(buffer.kind).ready.lock().push_back(buffer);
    }

    /// Next filled video buffer, in enqueue order.
    pub fn pop_video(&self) -> Option<DecodeBuffer> {
        self.video.ready.lock().pop_front()
    }

    /// Next filled audio buffer, in enqueue order.
    pub fn pop_audio(&self) -> Option<DecodeBuffer> {
        self.audio.ready.lock().pop_front()
    }

    /// Return a consumed buffer to its lane's free list.
    pub fn recycle(&self, buffer: DecodeBuffer) {
        self.lane(buffer.kind).free.lock().push(buffer);
    }

    /// Drop every free buffer, e.g. after the host switched to another file
    /// with a different geometry.
    pub fn invalidate(&self) {
        let video = std::mem::take(&mut *self.video.free.lock()).len();
        let audio = std::mem::take(&mut *self.audio.free.lock()).len();
        debug!("Invalidated {} video / {} audio free buffers", video, audio);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            video_free: self.video.free.lock().len(),
            audio_free: self.audio.free.lock().len(),
            video_ready: self.video.ready.lock().len(),
            audio_ready: self.audio.ready.lock().len(),
            total_allocated: self.allocated.load(Ordering::Relaxed),
            total_recycled: self.recycled.load(Ordering::Relaxed),
            total_enqueued: self.enqueued.load(Ordering::Relaxed),
        }
    }
}

impl BufferHost for BufferPool {
    fn request_video_buffer(&self) -> DecodeBuffer {
        self.acquire(BufferKind::Video)
    }

    fn request_audio_buffer(&self) -> DecodeBuffer {
        self.acquire(BufferKind::Audio)
    }

    fn enqueue_video_buffer(&self, buffer: DecodeBuffer) {
        self.push_ready(buffer);
    }

    fn enqueue_audio_buffer(&self, buffer: DecodeBuffer) {
        self.push_ready(buffer);
    }

    fn return_buffer(&self, buffer: DecodeBuffer) {
        self.recycle(buffer);
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub video_free: usize,
    pub audio_free: usize,
    pub video_ready: usize,
    pub audio_ready: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
    pub total_enqueued: u64,
}
