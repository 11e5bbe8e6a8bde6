//! Compressed packet scratch state.

/// A chunk of compressed data belonging to one stream.
///
/// The engine owns exactly one of these and refills it for every read, so
/// `data` keeps its capacity across packets.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream_index: u32,
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
    /// Decode timestamp in stream ticks.
    pub dts: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the payload and timing but keep the allocation.
    pub fn unref(&mut self) {
        self.stream_index = 0;
        self.pts = None;
        self.dts = None;
        self.duration = 0;
        self.keyframe = false;
        self.data.clear();
    }

    /// Best timestamp for ordering: pts, falling back to dts.
    pub fn timestamp(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
