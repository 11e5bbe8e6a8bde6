//! MP4 sample tables.
//!
//! The `stbl` boxes describe samples in compressed run-length form. They are
//! expanded once at open time into a flat [`Sample`] list so reading and
//! seeking are plain index operations.

use bytes::Buf;

use super::boxes::{ensure, full_box_header};
use crate::error::DemuxError;

#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
    pub sample_to_chunk: Vec<(u32, u32, u32)>, // first_chunk, samples_per_chunk, sample_desc_index
    pub time_to_sample: Vec<(u32, u32)>,       // sample_count, sample_delta
    pub keyframes: Vec<u32>,                   // 1-based sample numbers that are keyframes
    pub composition_offsets: Vec<(u32, i32)>,  // sample_count, offset
}

/// One fully resolved sample. Times are in the track's timescale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub offset: u64,
    pub size: u32,
    pub dts: i64,
    pub pts: i64,
    pub duration: u32,
    pub keyframe: bool,
}

fn entry_count(buf: &mut &[u8], entry_size: usize, what: &str) -> Result<usize, DemuxError> {
    ensure(buf, 4, what)?;
    let count = buf.get_u32() as usize;
    ensure(buf, count.saturating_mul(entry_size), what)?;
    Ok(count)
}

impl SampleTable {
    /// Absorb one `stbl` child. Returns false for boxes that are not tables.
    ///
    /// `file_size` bounds tables whose length is not backed by box bytes: a
    /// constant-size `stsz` cannot describe more sample data than the file holds.
    pub fn parse_box(&mut self, box_type: &[u8; 4], body: &[u8], file_size: u64) -> Result<bool, DemuxError> {
        let mut buf = body;
        match box_type {
            b"stts" => {
                full_box_header(&mut buf, "stts")?;
                let count = entry_count(&mut buf, 8, "stts")?;
                self.time_to_sample = (0..count).map(|_| (buf.get_u32(), buf.get_u32())).collect();
            }
            b"ctts" => {
                full_box_header(&mut buf, "ctts")?;
                let count = entry_count(&mut buf, 8, "ctts")?;
                // version 0 is unsigned on paper, signed in practice
                self.composition_offsets = (0..count)
                    .map(|_| (buf.get_u32(), buf.get_u32() as i32))
                    .collect();
            }
            b"stsc" => {
                full_box_header(&mut buf, "stsc")?;
                let count = entry_count(&mut buf, 12, "stsc")?;
                self.sample_to_chunk = (0..count)
                    .map(|_| (buf.get_u32(), buf.get_u32(), buf.get_u32()))
                    .collect();
            }
            b"stsz" => {
                full_box_header(&mut buf, "stsz")?;
                ensure(buf, 8, "stsz")?;
                let sample_size = buf.get_u32();
                let sample_count = buf.get_u32() as usize;
                if sample_size == 0 {
                    ensure(buf, sample_count.saturating_mul(4), "stsz")?;
                    self.sample_sizes = (0..sample_count).map(|_| buf.get_u32()).collect();
                } else {
                    let total = sample_count as u64 * sample_size as u64;
                    if total > file_size {
                        return Err(DemuxError::malformed(format!(
                            "stsz describes {} samples of {} bytes in a {} byte file",
                            sample_count, sample_size, file_size
                        )));
                    }
                    self.sample_sizes = vec![sample_size; sample_count];
                }
            }
            b"stco" => {
                full_box_header(&mut buf, "stco")?;
                let count = entry_count(&mut buf, 4, "stco")?;
                self.chunk_offsets = (0..count).map(|_| buf.get_u32() as u64).collect();
            }
            b"co64" => {
                full_box_header(&mut buf, "co64")?;
                let count = entry_count(&mut buf, 8, "co64")?;
                self.chunk_offsets = (0..count).map(|_| buf.get_u64()).collect();
            }
            b"stss" => {
                full_box_header(&mut buf, "stss")?;
                let count = entry_count(&mut buf, 4, "stss")?;
                self.keyframes = (0..count).map(|_| buf.get_u32()).collect();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Most frequent `stts` delta, i.e. the nominal frame duration.
    pub fn most_common_delta(&self) -> Option<u32> {
        let mut best: Option<(u32, u64)> = None;
        let mut totals: Vec<(u32, u64)> = Vec::new();
        for &(count, delta) in &self.time_to_sample {
            if delta == 0 {
                continue;
            }
            match totals.iter_mut().find(|(d, _)| *d == delta) {
                Some((_, total)) => *total += count as u64,
                None => totals.push((delta, count as u64)),
            }
        }
        for &(delta, total) in &totals {
            if best.map_or(true, |(_, t)| total > t) {
                best = Some((delta, total));
            }
        }
        best.map(|(delta, _)| delta)
    }

    /// Sum of all sample durations.
    pub fn total_duration(&self) -> i64 {
        self.time_to_sample
            .iter()
            .map(|&(count, delta)| count as i64 * delta as i64)
            .sum()
    }

    /// Expand the run-length tables into one entry per sample.
    pub fn build(&self) -> Result<Vec<Sample>, DemuxError> {
        let n = self.sample_sizes.len();
        let mut samples = Vec::with_capacity(n);

        // Decode times
        let mut dts = 0i64;
        let mut deltas = self
            .time_to_sample
            .iter()
            .flat_map(|&(count, delta)| std::iter::repeat(delta).take(count as usize));
        let mut last_delta = 0u32;
        for &size in &self.sample_sizes {
            let delta = deltas.next().unwrap_or(last_delta);
            last_delta = delta;
            samples.push(Sample {
                offset: 0,
                size,
                dts,
                pts: dts,
                duration: delta,
                keyframe: self.keyframes.is_empty(),
            });
            dts += delta as i64;
        }

        // Composition offsets
        let offsets = self
            .composition_offsets
            .iter()
            .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize));
        for (sample, offset) in samples.iter_mut().zip(offsets) {
            sample.pts = sample.dts + offset as i64;
        }

        // Sync samples
        for &number in &self.keyframes {
            if let Some(sample) = (number as usize).checked_sub(1).and_then(|i| samples.get_mut(i)) {
                sample.keyframe = true;
            }
        }

        // File offsets
        let mut index = 0usize;
        for (i, &(first_chunk, per_chunk, _)) in self.sample_to_chunk.iter().enumerate() {
            if first_chunk == 0 {
                return Err(DemuxError::malformed("stsc chunk numbers are 1-based"));
            }
            let next_first = self
                .sample_to_chunk
                .get(i + 1)
                .map(|e| e.0 as usize)
                .unwrap_or(self.chunk_offsets.len() + 1);

            for chunk in first_chunk as usize..next_first {
                let mut offset = *self.chunk_offsets.get(chunk - 1).ok_or_else(|| {
                    DemuxError::malformed(format!("stsc references missing chunk {}", chunk))
                })?;
                for _ in 0..per_chunk {
                    let Some(sample) = samples.get_mut(index) else {
                        break;
                    };
                    sample.offset = offset;
                    offset += sample.size as u64;
                    index += 1;
                }
            }
        }

        if index < n {
            return Err(DemuxError::malformed(format!(
                "chunk map covers {} of {} samples",
                index, n
            )));
        }
        Ok(samples)
    }
}
