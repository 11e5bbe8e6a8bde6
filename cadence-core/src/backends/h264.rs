//! H.264 NAL unit utilities
//!
//! MP4 stores H.264 as AVCC (length-prefixed NAL units, parameter sets in
//! `avcC`). OpenH264 wants an Annex B byte stream.

/// Annex B start code (4-byte version)
const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Parameter sets and NAL length size recovered from an `avcC` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// SPS and PPS units, each behind a start code
    pub parameter_sets: Vec<u8>,
    pub nal_length_size: usize,
}

/// Rewrite AVCC NAL units into `out` as Annex B.
///
/// AVCC: [N-byte length][NAL][N-byte length][NAL]...
/// Annex B: [0x00 0x00 0x00 0x01][NAL][0x00 0x00 0x00 0x01][NAL]...
pub fn avcc_to_annexb(data: &[u8], nal_length_size: usize, out: &mut Vec<u8>) {
    out.clear();
    if data.is_empty() || nal_length_size == 0 || nal_length_size > 4 {
        out.extend_from_slice(data);
        return;
    }
    out.reserve(data.len() + 64);

    let mut offset = 0;
    while offset + nal_length_size <= data.len() {
        let nal_len = read_be_uint(&data[offset..], nal_length_size);
        offset += nal_length_size;

        if nal_len == 0 || offset + nal_len > data.len() {
            break;
        }

        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
    }
}

/// Parse `avcC` extradata.
pub fn parse_avcc_extradata(extradata: &[u8]) -> Option<AvcConfig> {
    // [0]: version (always 1)
    // [4]: 0xFC | (nal_length_size - 1)
    // [5]: 0xE0 | num_sps
    // SPS entries, then num_pps and PPS entries
    if extradata.len() < 7 || extradata[0] != 1 {
        return None;
    }

    let nal_length_size = ((extradata[4] & 0x03) + 1) as usize;
    let num_sps = (extradata[5] & 0x1F) as usize;

    let mut parameter_sets = Vec::with_capacity(extradata.len() + 32);
    let mut offset = 6;

    for _ in 0..num_sps {
        let (unit, next) = length_prefixed(extradata, offset)?;
        parameter_sets.extend_from_slice(&ANNEX_B_START_CODE);
        parameter_sets.extend_from_slice(unit);
        offset = next;
    }

    if offset < extradata.len() {
        let num_pps = extradata[offset] as usize;
        offset += 1;
        for _ in 0..num_pps {
            let Some((unit, next)) = length_prefixed(extradata, offset) else {
                break;
            };
            parameter_sets.extend_from_slice(&ANNEX_B_START_CODE);
            parameter_sets.extend_from_slice(unit);
            offset = next;
        }
    }

    Some(AvcConfig {
        parameter_sets,
        nal_length_size,
    })
}

/// Check if data already has Annex B start codes
pub fn is_annexb(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 0, 1]) || data.starts_with(&[0, 0, 1])
}

/// Whether `data` is a well-formed run of length-prefixed NAL units.
///
/// A 4-byte length of 256..=511 starts with `00 00 01`, so a start code
/// prefix alone does not rule AVCC out.
pub fn is_avcc(data: &[u8], nal_length_size: usize) -> bool {
    if data.is_empty() || nal_length_size == 0 || nal_length_size > 4 {
        return false;
    }
    let mut offset = 0;
    while offset < data.len() {
        if offset + nal_length_size > data.len() {
            return false;
        }
        let nal_len = read_be_uint(&data[offset..], nal_length_size);
        offset += nal_length_size;
        if nal_len == 0 || offset + nal_len > data.len() {
            return false;
        }
        offset += nal_len;
    }
    true
}

fn length_prefixed(data: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let header = data.get(offset..offset + 2)?;
    let len = u16::from_be_bytes([header[0], header[1]]) as usize;
    let start = offset + 2;
    let unit = data.get(start..start + len)?;
    Some((unit, start + len))
}

/// Read big-endian unsigned integer of variable size (1-4 bytes)
fn read_be_uint(data: &[u8], size: usize) -> usize {
    data[..size].iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}
