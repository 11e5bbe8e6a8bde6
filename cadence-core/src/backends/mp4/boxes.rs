//! MP4 box parsing helpers.
//!
//! Top-level boxes are read straight from the file; everything inside `moov`
//! is parsed from memory with [`bytes::Buf`]. `Buf` getters panic on
//! underflow, so every read goes through [`ensure`] first.

use bytes::Buf;
use std::io::Read;

use crate::error::DemuxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub size: u64,
    pub box_type: [u8; 4],
    pub header_size: u64,
}

pub fn read_box_header<R: Read>(reader: &mut R) -> Result<BoxHeader, DemuxError> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let mut cursor = &header[..];
    let size = cursor.get_u32() as u64;
    let mut box_type = [0u8; 4];
    cursor.copy_to_slice(&mut box_type);

    let (size, header_size) = if size == 1 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext)?;
        let ext_size = (&ext[..]).get_u64();
        if ext_size < 16 {
            return Err(DemuxError::malformed("invalid extended box size"));
        }
        (ext_size, 16)
    } else if size == 0 {
        (0, 8)
    } else {
        if size < 8 {
            return Err(DemuxError::malformed("invalid box size"));
        }
        (size, 8)
    };

    Ok(BoxHeader {
        size,
        box_type,
        header_size,
    })
}

pub fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<(), DemuxError> {
    if buf.remaining() < needed {
        return Err(DemuxError::malformed(format!(
            "{} truncated: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Version and flags of a full box.
pub fn full_box_header(buf: &mut &[u8], what: &str) -> Result<(u8, u32), DemuxError> {
    ensure(buf, 4, what)?;
    let word = buf.get_u32();
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
}

pub fn skip(buf: &mut &[u8], n: usize, what: &str) -> Result<(), DemuxError> {
    ensure(buf, n, what)?;
    buf.advance(n);
    Ok(())
}

pub fn fourcc(box_type: &[u8; 4]) -> String {
    box_type.iter().map(|&b| b as char).collect()
}

/// Iterator over the child boxes packed in `data`.
pub struct Children<'a> {
    data: &'a [u8],
}

pub fn children(data: &[u8]) -> Children<'_> {
    Children { data }
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<([u8; 4], &'a [u8]), DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 8 {
            // Trailing padding shorter than a header is tolerated
            return None;
        }
        let mut cursor = self.data;
        let size = cursor.get_u32() as u64;
        let mut box_type = [0u8; 4];
        cursor.copy_to_slice(&mut box_type);

        let (size, header_size) = match size {
            0 => (self.data.len() as u64, 8u64),
            1 => {
                if cursor.remaining() < 8 {
                    self.data = &[];
                    return Some(Err(DemuxError::malformed("truncated extended box size")));
                }
                (cursor.get_u64(), 16)
            }
            n => (n, 8),
        };

        if size < header_size || size > self.data.len() as u64 {
            let err = DemuxError::malformed(format!(
                "box '{}' claims {} bytes, {} available",
                fourcc(&box_type),
                size,
                self.data.len()
            ));
            self.data = &[];
            return Some(Err(err));
        }

        let body = &self.data[header_size as usize..size as usize];
        self.data = &self.data[size as usize..];
        Some(Ok((box_type, body)))
    }
}

/// Body of the first child of type `box_type`, if any.
pub fn find_child<'a>(data: &'a [u8], box_type: &[u8; 4]) -> Result<Option<&'a [u8]>, DemuxError> {
    for child in children(data) {
        let (kind, body) = child?;
        if &kind == box_type {
            return Ok(Some(body));
        }
    }
    Ok(None)
}
