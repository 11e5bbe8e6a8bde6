//! Software H.264 decoding through OpenH264.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use ::openh264::decoder::Decoder;
use ::openh264::formats::YUVSource;
use tracing::{debug, warn};

use super::h264::{avcc_to_annexb, is_avcc, parse_avcc_extradata, AvcConfig};
use crate::backend::VideoDecoder;
use crate::error::DecodeError;
use crate::frame::VideoFrame;
use crate::media::StreamInfo;
use crate::packet::Packet;
use crate::pixel::PixelFormat;

pub struct OpenH264Decoder {
    decoder: Decoder,
    config: Option<AvcConfig>,
    annexb: Vec<u8>,
    // OpenH264 reorders internally; outputs take the smallest pending pts
    pending_pts: BinaryHeap<Reverse<i64>>,
    ready: VecDeque<VideoFrame>,
    spare: Vec<VideoFrame>,
}

impl OpenH264Decoder {
    pub fn new(stream: &StreamInfo) -> Result<Self, DecodeError> {
        let decoder = Decoder::new()
            .map_err(|e| DecodeError::Failed(format!("OpenH264 init failed: {:?}", e)))?;

        let config = if stream.extra_data.is_empty() {
            None
        } else {
            let parsed = parse_avcc_extradata(&stream.extra_data);
            if parsed.is_none() {
                warn!("Stream {}: unreadable avcC, assuming Annex B input", stream.index);
            }
            parsed
        };

        let mut this = Self {
            decoder,
            config,
            annexb: Vec::new(),
            pending_pts: BinaryHeap::new(),
            ready: VecDeque::new(),
            spare: Vec::new(),
        };
        this.feed_parameter_sets();
        Ok(this)
    }

    fn feed_parameter_sets(&mut self) {
        let Some(config) = &self.config else {
            return;
        };
        if config.parameter_sets.is_empty() {
            return;
        }
        if let Err(e) = self.decoder.decode(&config.parameter_sets) {
            warn!("OpenH264 rejected parameter sets: {:?}", e);
        }
    }
}

impl VideoDecoder for OpenH264Decoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        match &self.config {
            Some(config) if is_avcc(&packet.data, config.nal_length_size) => {
                avcc_to_annexb(&packet.data, config.nal_length_size, &mut self.annexb)
            }
            _ => {
                self.annexb.clear();
                self.annexb.extend_from_slice(&packet.data);
            }
        }
        let decoded = self
            .decoder
            .decode(&self.annexb)
            .map_err(|e| DecodeError::Failed(format!("OpenH264 decode error: {:?}", e)))?;

        // Only accepted packets may lend their pts to a later picture
        if let Some(pts) = packet.timestamp() {
            self.pending_pts.push(Reverse(pts));
        }

        let Some(yuv) = decoded else {
            return Ok(());
        };

        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let (chroma_w, chroma_h) = ((width + 1) / 2, (height + 1) / 2);

        let mut frame = self.spare.pop().unwrap_or_default();
        frame.unref();
        frame.width = width as u32;
        frame.height = height as u32;
        frame.format = PixelFormat::Yuv420p;
        frame.fill_plane(0, yuv.y(), y_stride, width, height);
        frame.fill_plane(1, yuv.u(), u_stride, chroma_w, chroma_h);
        frame.fill_plane(2, yuv.v(), v_stride, chroma_w, chroma_h);
        frame.pts = self.pending_pts.pop().map(|Reverse(pts)| pts);
        frame.keyframe = packet.keyframe;
        self.ready.push_back(frame);
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut VideoFrame) -> Result<(), DecodeError> {
        let mut staged = self.ready.pop_front().ok_or(DecodeError::NeedMoreData)?;
        std::mem::swap(frame, &mut staged);
        self.spare.push(staged);
        Ok(())
    }

    fn flush(&mut self) {
        debug!("OpenH264 flush: dropping {} queued frame(s)", self.ready.len());
        while let Some(frame) = self.ready.pop_front() {
            self.spare.push(frame);
        }
        self.pending_pts.clear();
        // Decoder has no reset entry point; recreate it
        match Decoder::new() {
            Ok(decoder) => {
                self.decoder = decoder;
                self.feed_parameter_sets();
            }
            Err(e) => warn!("OpenH264 re-init failed, keeping old decoder: {:?}", e),
        }
    }

    fn name(&self) -> &str {
        "OpenH264"
    }
}
