//! iTunes-style `moov/udta/meta/ilst` tags.

use bytes::Buf;
use tracing::debug;

use super::boxes::{children, ensure, find_child, fourcc};
use crate::error::DemuxError;

/// `data` type indicator for UTF-8 text.
const WELL_KNOWN_UTF8: u32 = 1;

fn item_name(kind: &[u8; 4]) -> Option<&'static str> {
    Some(match kind {
        b"\xa9nam" => "title",
        b"\xa9ART" => "artist",
        b"aART" => "album_artist",
        b"\xa9alb" => "album",
        b"\xa9day" => "date",
        b"\xa9gen" => "genre",
        b"\xa9cmt" => "comment",
        b"\xa9too" => "encoder",
        b"\xa9wrt" => "composer",
        b"desc" => "description",
        b"cprt" => "copyright",
        _ => return None,
    })
}

/// Text tags of a `udta` box body, in file order.
pub fn parse_udta(body: &[u8]) -> Result<Vec<(String, String)>, DemuxError> {
    let Some(meta) = find_child(body, b"meta")? else {
        return Ok(Vec::new());
    };
    // ISO `meta` is a full box; QuickTime writes it without version/flags
    let meta = if meta.len() >= 8 && &meta[4..8] == b"hdlr" {
        meta
    } else {
        ensure(meta, 4, "meta")?;
        &meta[4..]
    };
    let Some(ilst) = find_child(meta, b"ilst")? else {
        return Ok(Vec::new());
    };

    let mut tags = Vec::new();
    for item in children(ilst) {
        let (kind, item) = item?;
        let Some(name) = item_name(&kind) else {
            debug!("Skipping ilst item '{}'", fourcc(&kind));
            continue;
        };
        if let Some(value) = text_value(item)? {
            tags.push((name.to_string(), value));
        }
    }
    Ok(tags)
}

fn text_value(item: &[u8]) -> Result<Option<String>, DemuxError> {
    let Some(mut data) = find_child(item, b"data")? else {
        return Ok(None);
    };
    ensure(data, 8, "data")?;
    let type_indicator = data.get_u32() & 0x00FF_FFFF;
    data.advance(4); // locale
    if type_indicator != WELL_KNOWN_UTF8 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(data).trim_end_matches('\0').to_string();
    Ok((!text.is_empty()).then_some(text))
}
