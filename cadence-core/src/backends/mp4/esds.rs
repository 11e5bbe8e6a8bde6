//! MPEG-4 elementary stream descriptors (`esds`).
//!
//! Only what the audio decoders need is pulled out: the object type (to tell
//! AAC from MP3) and the DecoderSpecificInfo blob, which for AAC is the
//! AudioSpecificConfig.

use bytes::Buf;

use super::boxes::{ensure, full_box_header, skip};
use crate::error::DemuxError;

const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsdsInfo {
    pub object_type: u8,
    pub decoder_specific: Vec<u8>,
}

/// Tag and payload length of the next descriptor.
fn descriptor_header(buf: &mut &[u8]) -> Result<(u8, usize), DemuxError> {
    ensure(buf, 1, "esds descriptor")?;
    let tag = buf.get_u8();
    let mut len = 0usize;
    // up to four 7-bit groups
    for _ in 0..4 {
        ensure(buf, 1, "esds descriptor length")?;
        let byte = buf.get_u8();
        len = (len << 7) | (byte & 0x7F) as usize;
        if byte & 0x80 == 0 {
            break;
        }
    }
    ensure(buf, len, "esds descriptor body")?;
    Ok((tag, len))
}

pub fn parse_esds(body: &[u8]) -> Result<EsdsInfo, DemuxError> {
    let mut buf = body;
    full_box_header(&mut buf, "esds")?;

    let (tag, len) = descriptor_header(&mut buf)?;
    if tag != ES_DESCRIPTOR {
        return Err(DemuxError::malformed(format!("esds starts with tag {:#04x}", tag)));
    }
    let mut es = &buf[..len];
    ensure(es, 3, "ES_Descriptor")?;
    es.advance(2); // ES_ID
    let flags = es.get_u8();
    if flags & 0x80 != 0 {
        skip(&mut es, 2, "dependsOn_ES_ID")?;
    }
    if flags & 0x40 != 0 {
        ensure(es, 1, "URL")?;
        let url_len = es.get_u8() as usize;
        skip(&mut es, url_len, "URL")?;
    }
    if flags & 0x20 != 0 {
        skip(&mut es, 2, "OCR_ES_ID")?;
    }

    let mut info = EsdsInfo::default();
    while es.has_remaining() {
        let (tag, len) = descriptor_header(&mut es)?;
        let mut payload = &es[..len];
        es.advance(len);
        if tag != DECODER_CONFIG {
            continue;
        }

        ensure(payload, 13, "DecoderConfigDescriptor")?;
        info.object_type = payload.get_u8();
        payload.advance(12); // streamType, bufferSize, maxBitrate, avgBitrate

        while payload.has_remaining() {
            let (tag, len) = descriptor_header(&mut payload)?;
            if tag == DECODER_SPECIFIC_INFO {
                info.decoder_specific = payload[..len].to_vec();
            }
            payload.advance(len);
        }
    }
    Ok(info)
}

/// Sample rate and channel count advertised by an AudioSpecificConfig.
pub fn aac_config(asc: &[u8]) -> Option<(u32, u16)> {
    const RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    if asc.len() < 2 {
        return None;
    }
    let bits = u64::from_be_bytes({
        let mut word = [0u8; 8];
        let n = asc.len().min(8);
        word[..n].copy_from_slice(&asc[..n]);
        word
    });
    let mut pos = 0u32;
    let mut take = |count: u32| {
        let value = (bits << pos) >> (64 - count);
        pos += count;
        value as u32
    };

    // audioObjectType, with its escape
    if take(5) == 31 {
        take(6);
    }
    let freq_index = take(4);
    let rate = if freq_index == 15 {
        if asc.len() < 5 {
            return None;
        }
        take(24)
    } else {
        *RATES.get(freq_index as usize)?
    };
    let channels = take(4) as u16;
    Some((rate, channels))
}
