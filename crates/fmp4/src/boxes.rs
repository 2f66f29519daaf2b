//! Owned ISO-BMFF box tree.
//!
//! Boxes we need to rewrite are parsed into a tree of tagged variants with
//! owned child vectors; everything else stays an opaque leaf payload. Sizes
//! are recomputed on encode, so callers can drop or rewrite children freely.

use std::fmt;
use std::io::{Read, Write};

use crate::error::FmpError;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

impl PartialEq<[u8; 4]> for FourCc {
    fn eq(&self, other: &[u8; 4]) -> bool {
        &self.0 == other
    }
}

/// Container FourCCs we descend into; every other box stays a leaf.
const CONTAINER_BOXES: &[[u8; 4]] = &[
    *b"moov", *b"trak", *b"mdia", *b"minf", *b"stbl", *b"mvex", *b"edts", *b"udta", *b"moof",
    *b"traf", *b"sinf", *b"schi",
];

/// PIFF sample-encryption uuid box usertype (equivalent to `senc`).
pub(crate) const PIFF_SENC_USERTYPE: [u8; 16] = [
    0xa2, 0x39, 0x4f, 0x52, 0x5a, 0x9b, 0x4f, 0x14, 0xa2, 0x44, 0x6c, 0x42, 0x7c, 0x64, 0x8d,
    0xf4,
];

#[derive(Debug, Clone)]
pub enum BoxData {
    /// Parsed child boxes of a container.
    Container(Vec<Mp4Box>),
    /// Opaque payload of a leaf box. For `uuid` boxes this includes the
    /// 16-byte usertype prefix.
    Leaf(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Mp4Box {
    pub fourcc: FourCc,
    pub data: BoxData,
}

impl Mp4Box {
    pub fn leaf(fourcc: [u8; 4], payload: Vec<u8>) -> Self {
        Self {
            fourcc: FourCc(fourcc),
            data: BoxData::Leaf(payload),
        }
    }

    pub fn container(fourcc: [u8; 4], children: Vec<Mp4Box>) -> Self {
        Self {
            fourcc: FourCc(fourcc),
            data: BoxData::Container(children),
        }
    }

    pub fn is(&self, fourcc: &[u8; 4]) -> bool {
        &self.fourcc.0 == fourcc
    }

    /// True for `uuid` boxes carrying the PIFF sample-encryption usertype.
    pub fn is_piff_senc(&self) -> bool {
        self.is(b"uuid")
            && matches!(&self.data, BoxData::Leaf(p) if p.len() >= 16 && p[..16] == PIFF_SENC_USERTYPE)
    }

    /// Encoded size including the 8-byte header.
    pub fn size(&self) -> u64 {
        let content = match &self.data {
            BoxData::Leaf(payload) => payload.len() as u64,
            BoxData::Container(children) => children.iter().map(Mp4Box::size).sum(),
        };
        8 + content
    }

    pub fn children(&self) -> &[Mp4Box] {
        match &self.data {
            BoxData::Container(children) => children,
            BoxData::Leaf(_) => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Mp4Box>> {
        match &mut self.data {
            BoxData::Container(children) => Some(children),
            BoxData::Leaf(_) => None,
        }
    }

    pub fn child(&self, fourcc: &[u8; 4]) -> Option<&Mp4Box> {
        self.children().iter().find(|b| b.is(fourcc))
    }

    pub fn child_mut(&mut self, fourcc: &[u8; 4]) -> Option<&mut Mp4Box> {
        self.children_mut()?.iter_mut().find(|b| b.is(fourcc))
    }

    /// Walk a path of container FourCCs, e.g. `[b"mdia", b"minf", b"stbl"]`.
    pub fn descend(&self, path: &[&[u8; 4]]) -> Option<&Mp4Box> {
        let mut cur = self;
        for fourcc in path {
            cur = cur.child(fourcc)?;
        }
        Some(cur)
    }

    pub fn descend_mut(&mut self, path: &[&[u8; 4]]) -> Option<&mut Mp4Box> {
        let mut cur = self;
        for fourcc in path {
            cur = cur.child_mut(fourcc)?;
        }
        Some(cur)
    }

    /// Opaque payload of a leaf box.
    pub fn payload(&self) -> &[u8] {
        match &self.data {
            BoxData::Leaf(payload) => payload,
            BoxData::Container(_) => &[],
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.data {
            BoxData::Leaf(payload) => Some(payload),
            BoxData::Container(_) => None,
        }
    }

    /// Serialize the box, recomputing every size field.
    pub fn encode_into<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let size = self.size();
        if size > u64::from(u32::MAX) {
            // 64-bit largesize form: size field 1, fourcc, largesize.
            out.write_all(&1u32.to_be_bytes())?;
            out.write_all(&self.fourcc.0)?;
            out.write_all(&(size + 8).to_be_bytes())?;
        } else {
            out.write_all(&(size as u32).to_be_bytes())?;
            out.write_all(&self.fourcc.0)?;
        }
        match &self.data {
            BoxData::Leaf(payload) => out.write_all(payload)?,
            BoxData::Container(children) => {
                for child in children {
                    child.encode_into(out)?;
                }
            }
        }
        Ok(())
    }
}

fn is_container(fourcc: &[u8; 4]) -> bool {
    CONTAINER_BOXES.contains(fourcc)
}

/// Read one box from a byte stream.
///
/// Returns the parsed box plus the number of bytes consumed from the wire,
/// or `None` on clean end-of-stream at a box boundary.
pub(crate) fn read_box<R: Read>(r: &mut R) -> Result<Option<(Mp4Box, u64)>, FmpError> {
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        let n = r.read(&mut header[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FmpError::truncated(format!(
                "end of stream inside a box header ({filled} of 8 bytes)"
            )));
        }
        filled += n;
    }

    let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let fourcc: [u8; 4] = [header[4], header[5], header[6], header[7]];

    let (content_len, consumed_header) = match size32 {
        1 => {
            let mut ext = [0u8; 8];
            r.read_exact(&mut ext)
                .map_err(|_| FmpError::truncated("end of stream inside a largesize header"))?;
            let size = u64::from_be_bytes(ext);
            if size < 16 {
                return Err(FmpError::malformed(fourcc, format!("largesize {size} < 16")));
            }
            (size - 16, 16u64)
        }
        0 => {
            // Box extends to end of stream.
            let mut payload = Vec::new();
            r.read_to_end(&mut payload)?;
            let consumed = 8 + payload.len() as u64;
            let parsed = finish_box(fourcc, payload)?;
            return Ok(Some((parsed, consumed)));
        }
        s if (s as u64) < 8 => {
            return Err(FmpError::malformed(fourcc, format!("size {s} < 8")));
        }
        s => (u64::from(s) - 8, 8u64),
    };

    let mut payload = vec![0u8; content_len as usize];
    r.read_exact(&mut payload).map_err(|_| {
        FmpError::truncated(format!(
            "end of stream inside `{}` payload ({content_len} bytes expected)",
            FourCc(fourcc)
        ))
    })?;

    let parsed = finish_box(fourcc, payload)?;
    Ok(Some((parsed, consumed_header + content_len)))
}

fn finish_box(fourcc: [u8; 4], payload: Vec<u8>) -> Result<Mp4Box, FmpError> {
    if is_container(&fourcc) {
        let children = parse_boxes(&payload)?;
        Ok(Mp4Box::container(fourcc, children))
    } else {
        Ok(Mp4Box::leaf(fourcc, payload))
    }
}

/// Parse a flat byte slice into a sequence of boxes.
pub fn parse_boxes(data: &[u8]) -> Result<Vec<Mp4Box>, FmpError> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let remaining = &data[offset..];
        if remaining.len() < 8 {
            return Err(FmpError::truncated(format!(
                "{} trailing bytes after last child box",
                remaining.len()
            )));
        }
        let size32 =
            u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]);
        let fourcc: [u8; 4] = [remaining[4], remaining[5], remaining[6], remaining[7]];

        let (body_start, size) = match size32 {
            1 => {
                if remaining.len() < 16 {
                    return Err(FmpError::truncated("largesize header past end of parent"));
                }
                let size = u64::from_be_bytes([
                    remaining[8],
                    remaining[9],
                    remaining[10],
                    remaining[11],
                    remaining[12],
                    remaining[13],
                    remaining[14],
                    remaining[15],
                ]) as usize;
                (16, size)
            }
            0 => (8, remaining.len()),
            s if s < 8 => {
                return Err(FmpError::malformed(fourcc, format!("size {s} < 8")));
            }
            s => (8, s as usize),
        };

        if size < body_start || size > remaining.len() {
            return Err(FmpError::malformed(
                fourcc,
                format!("size {size} exceeds parent ({} bytes left)", remaining.len()),
            ));
        }

        out.push(finish_box(fourcc, remaining[body_start..size].to_vec())?);
        offset += size;
    }
    Ok(out)
}
