//! Streaming reader for fragmented MP4 files.
//!
//! Operates on any `std::io::Read`: no seeking, no random access. The stream
//! is consumed as `ftyp` + `moov` (the init segment) followed by fragments,
//! each closed by an `mdat`. A running byte offset of the *input* stream is
//! maintained so callers can account progress as fragments arrive, even
//! though surgery later changes encoded sizes.

use std::io::{Read, Write};

use tracing::trace;

use crate::boxes::{Mp4Box, read_box};
use crate::error::FmpError;

/// The leading `ftyp` + `moov` pair of a fragmented MP4 file.
#[derive(Debug)]
pub struct InitSegment {
    pub ftyp: Mp4Box,
    pub moov: Mp4Box,
}

impl InitSegment {
    pub fn encode_into<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        self.ftyp.encode_into(out)?;
        self.moov.encode_into(out)
    }
}

/// One `moof`/`mdat` pair, optionally preceded by `emsg`/`prft` boxes.
///
/// Boxes are kept in stream order; the `mdat` is always last.
#[derive(Debug)]
pub struct Fragment {
    pub boxes: Vec<Mp4Box>,
}

impl Fragment {
    pub fn moof(&self) -> &Mp4Box {
        self.boxes
            .iter()
            .find(|b| b.is(b"moof"))
            .expect("fragment always holds a moof")
    }

    pub fn moof_mut(&mut self) -> &mut Mp4Box {
        self.boxes
            .iter_mut()
            .find(|b| b.is(b"moof"))
            .expect("fragment always holds a moof")
    }

    pub fn mdat(&self) -> &Mp4Box {
        self.boxes.last().expect("fragment always ends with mdat")
    }

    pub fn mdat_mut(&mut self) -> &mut Mp4Box {
        self.boxes
            .last_mut()
            .expect("fragment always ends with mdat")
    }

    /// Byte offset of the `moof` box within the fragment's own encoding.
    pub fn moof_offset(&self) -> u64 {
        self.boxes
            .iter()
            .take_while(|b| !b.is(b"moof"))
            .map(Mp4Box::size)
            .sum()
    }

    /// Byte offset of the `mdat` payload within the fragment's own encoding.
    pub fn mdat_payload_offset(&self) -> u64 {
        let before: u64 = self.boxes[..self.boxes.len() - 1]
            .iter()
            .map(Mp4Box::size)
            .sum();
        before + 8
    }

    pub fn encode_into<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for b in &self.boxes {
            b.encode_into(out)?;
        }
        Ok(())
    }
}

/// Read the init segment, returning it plus the bytes consumed.
pub fn read_init<R: Read>(r: &mut R) -> Result<(InitSegment, u64), FmpError> {
    let mut offset = 0u64;
    let mut ftyp = None;
    let mut moov = None;

    for expected in [*b"ftyp", *b"moov"] {
        let Some((parsed, consumed)) = read_box(r)? else {
            return Err(FmpError::truncated("stream ended before ftyp/moov"));
        };
        if !parsed.is(&expected) {
            return Err(FmpError::BadInit {
                found: parsed.fourcc,
            });
        }
        offset += consumed;
        if expected == *b"ftyp" {
            ftyp = Some(parsed);
        } else {
            moov = Some(parsed);
        }
    }

    Ok((
        InitSegment {
            ftyp: ftyp.expect("ftyp read above"),
            moov: moov.expect("moov read above"),
        },
        offset,
    ))
}

/// Read the next fragment, advancing `offset` by the input bytes consumed.
///
/// Returns `Ok(None)` on clean end-of-stream before any fragment box.
/// `moof`, `emsg` and `prft` accumulate into the fragment; `mdat` closes it.
/// Other top-level boxes (`styp`, `sidx`, ...) are skipped but still counted
/// into the offset. An `mdat` with no preceding `moof` is an error.
pub fn read_fragment<R: Read>(
    r: &mut R,
    mut offset: u64,
) -> Result<Option<(Fragment, u64)>, FmpError> {
    let mut boxes: Vec<Mp4Box> = Vec::new();

    loop {
        let Some((parsed, consumed)) = read_box(r)? else {
            if boxes.is_empty() {
                return Ok(None);
            }
            return Err(FmpError::truncated(
                "stream ended inside a fragment before its mdat",
            ));
        };
        offset += consumed;

        if parsed.is(b"moof") || parsed.is(b"emsg") || parsed.is(b"prft") {
            boxes.push(parsed);
        } else if parsed.is(b"mdat") {
            if !boxes.iter().any(|b| b.is(b"moof")) {
                return Err(FmpError::OrphanMdat);
            }
            boxes.push(parsed);
            return Ok(Some((Fragment { boxes }, offset)));
        } else {
            trace!(fourcc = %parsed.fourcc, "skipping top-level box");
        }
    }
}
