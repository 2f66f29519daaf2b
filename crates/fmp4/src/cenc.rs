//! Common-encryption metadata: `tenc`, `trex`, `saiz`, `senc`, `tfhd`,
//! `trun` parsing and the per-track decryption table.
//!
//! Parsers operate on leaf-box payloads (FullBox version/flags included) and
//! never allocate beyond the parsed values. The table is built once from the
//! init segment and read-only afterwards.

use std::collections::HashMap;

use crate::boxes::{FourCc, Mp4Box};
use crate::error::FmpError;
use crate::reader::Fragment;

fn full_box_header(fourcc: [u8; 4], payload: &[u8]) -> Result<(u8, u32), FmpError> {
    if payload.len() < 4 {
        return Err(FmpError::malformed(fourcc, "payload shorter than FullBox header"));
    }
    let version = payload[0];
    let flags = ((payload[1] as u32) << 16) | ((payload[2] as u32) << 8) | payload[3] as u32;
    Ok((version, flags))
}

fn be_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Track-encryption defaults from the `tenc` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenc {
    pub default_crypt_byte_block: u8,
    pub default_skip_byte_block: u8,
    pub default_is_protected: bool,
    pub default_per_sample_iv_size: u8,
    pub default_kid: [u8; 16],
    pub default_constant_iv: Option<Vec<u8>>,
}

impl Tenc {
    pub fn parse(payload: &[u8]) -> Result<Self, FmpError> {
        let (version, _flags) = full_box_header(*b"tenc", payload)?;
        if payload.len() < 24 {
            return Err(FmpError::malformed(*b"tenc", "payload too short"));
        }

        // byte 4 reserved; byte 5 is reserved in v0, crypt/skip nibbles in v1+.
        let (crypt, skip) = if version == 0 {
            (0, 0)
        } else {
            (payload[5] >> 4, payload[5] & 0x0F)
        };
        let is_protected = payload[6] != 0;
        let per_sample_iv_size = payload[7];
        let mut default_kid = [0u8; 16];
        default_kid.copy_from_slice(&payload[8..24]);

        let default_constant_iv = if is_protected && per_sample_iv_size == 0 {
            let iv_size = *payload
                .get(24)
                .ok_or_else(|| FmpError::malformed(*b"tenc", "missing constant IV size"))?
                as usize;
            let iv = payload
                .get(25..25 + iv_size)
                .ok_or_else(|| FmpError::malformed(*b"tenc", "constant IV past end of box"))?;
            Some(iv.to_vec())
        } else {
            None
        };

        Ok(Self {
            default_crypt_byte_block: crypt,
            default_skip_byte_block: skip,
            default_is_protected: is_protected,
            default_per_sample_iv_size: per_sample_iv_size,
            default_kid,
            default_constant_iv,
        })
    }
}

/// Track-extends defaults from the `trex` box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trex {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Trex {
    pub fn parse(payload: &[u8]) -> Result<Self, FmpError> {
        full_box_header(*b"trex", payload)?;
        if payload.len() < 24 {
            return Err(FmpError::malformed(*b"trex", "payload too short"));
        }
        Ok(Self {
            track_id: be_u32(&payload[4..]),
            default_sample_description_index: be_u32(&payload[8..]),
            default_sample_duration: be_u32(&payload[12..]),
            default_sample_size: be_u32(&payload[16..]),
            default_sample_flags: be_u32(&payload[20..]),
        })
    }
}

/// Sample auxiliary-information sizes from the `saiz` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saiz {
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    pub sample_info_sizes: Vec<u8>,
}

impl Saiz {
    pub fn parse(payload: &[u8]) -> Result<Self, FmpError> {
        let (_, flags) = full_box_header(*b"saiz", payload)?;
        let mut idx = 4;
        if flags & 1 != 0 {
            idx += 8; // aux_info_type + aux_info_type_parameter
        }
        if payload.len() < idx + 5 {
            return Err(FmpError::malformed(*b"saiz", "payload too short"));
        }
        let default_sample_info_size = payload[idx];
        let sample_count = be_u32(&payload[idx + 1..]);
        idx += 5;

        let sample_info_sizes = if default_sample_info_size == 0 {
            payload
                .get(idx..idx + sample_count as usize)
                .ok_or_else(|| FmpError::malformed(*b"saiz", "per-sample sizes past end"))?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            default_sample_info_size,
            sample_count,
            sample_info_sizes,
        })
    }
}

/// One clear/protected run of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsamplePattern {
    pub clear_bytes: u16,
    pub protected_bytes: u32,
}

/// Parsed `senc` contents: per-sample IVs and subsample patterns.
#[derive(Debug, Clone, Default)]
pub struct SencSamples {
    pub ivs: Vec<Vec<u8>>,
    pub subsamples: Vec<Vec<SubsamplePattern>>,
}

impl SencSamples {
    pub fn sample_count(&self) -> usize {
        self.subsamples.len().max(self.ivs.len())
    }

    pub fn patterns_for(&self, sample_index: usize) -> &[SubsamplePattern] {
        self.subsamples
            .get(sample_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Parse a `senc` payload.
///
/// The box does not encode its own IV size, so the caller supplies the
/// `tenc` default. When that interpretation does not consume the payload
/// exactly (some encoders disagree with their own `tenc`), the standard IV
/// widths are tried, guided by `saiz` when present.
pub fn parse_senc(
    payload: &[u8],
    per_sample_iv_size: u8,
    saiz: Option<&Saiz>,
) -> Result<SencSamples, FmpError> {
    let mut candidates = vec![per_sample_iv_size];
    // A fixed aux-info size of 8 or 16 is the IV alone.
    if let Some(saiz) = saiz
        && (saiz.default_sample_info_size == 8 || saiz.default_sample_info_size == 16)
        && !candidates.contains(&saiz.default_sample_info_size)
    {
        candidates.push(saiz.default_sample_info_size);
    }
    for fallback in [0u8, 8, 16] {
        if !candidates.contains(&fallback) {
            candidates.push(fallback);
        }
    }

    let mut last_err = None;
    for iv_size in candidates {
        match try_parse_senc(payload, iv_size) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| FmpError::malformed(*b"senc", "empty payload")))
}

fn try_parse_senc(payload: &[u8], iv_size: u8) -> Result<SencSamples, FmpError> {
    let (_, flags) = full_box_header(*b"senc", payload)?;
    if payload.len() < 8 {
        return Err(FmpError::malformed(*b"senc", "payload too short"));
    }
    let sample_count = be_u32(&payload[4..]) as usize;
    let has_subsamples = flags & 0x2 != 0;

    let mut ivs = Vec::with_capacity(sample_count);
    let mut subsamples = Vec::with_capacity(sample_count);
    let mut idx = 8usize;

    for _ in 0..sample_count {
        let iv = payload
            .get(idx..idx + iv_size as usize)
            .ok_or_else(|| FmpError::malformed(*b"senc", "IV past end of box"))?;
        ivs.push(iv.to_vec());
        idx += iv_size as usize;

        if has_subsamples {
            let count_bytes = payload
                .get(idx..idx + 2)
                .ok_or_else(|| FmpError::malformed(*b"senc", "subsample count past end"))?;
            let count = be_u16(count_bytes) as usize;
            idx += 2;

            let mut patterns = Vec::with_capacity(count);
            for _ in 0..count {
                let entry = payload
                    .get(idx..idx + 6)
                    .ok_or_else(|| FmpError::malformed(*b"senc", "subsample entry past end"))?;
                patterns.push(SubsamplePattern {
                    clear_bytes: be_u16(entry),
                    protected_bytes: be_u32(&entry[2..]),
                });
                idx += 6;
            }
            subsamples.push(patterns);
        } else {
            subsamples.push(Vec::new());
        }
    }

    if idx != payload.len() {
        return Err(FmpError::malformed(
            *b"senc",
            format!("{} unconsumed bytes with IV size {iv_size}", payload.len() - idx),
        ));
    }

    Ok(SencSamples { ivs, subsamples })
}

/// Track-fragment header fields we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfhdInfo {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub default_sample_size: Option<u32>,
    pub default_base_is_moof: bool,
}

pub fn parse_tfhd(payload: &[u8]) -> Result<TfhdInfo, FmpError> {
    let (_, flags) = full_box_header(*b"tfhd", payload)?;
    if payload.len() < 8 {
        return Err(FmpError::malformed(*b"tfhd", "payload too short"));
    }
    let track_id = be_u32(&payload[4..]);

    let mut idx = 8usize;
    let mut base_data_offset = None;
    let mut default_sample_size = None;

    if flags & 0x000001 != 0 {
        let bytes = payload
            .get(idx..idx + 8)
            .ok_or_else(|| FmpError::malformed(*b"tfhd", "missing base_data_offset"))?;
        base_data_offset = Some(u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]));
        idx += 8;
    }
    if flags & 0x000002 != 0 {
        idx += 4; // sample_description_index
    }
    if flags & 0x000008 != 0 {
        idx += 4; // default_sample_duration
    }
    if flags & 0x000010 != 0 {
        let bytes = payload
            .get(idx..idx + 4)
            .ok_or_else(|| FmpError::malformed(*b"tfhd", "missing default_sample_size"))?;
        default_sample_size = Some(be_u32(bytes));
        idx += 4;
    }
    if flags & 0x000020 != 0 {
        idx += 4; // default_sample_flags
    }
    if idx > payload.len() {
        return Err(FmpError::malformed(*b"tfhd", "fields exceed box size"));
    }

    Ok(TfhdInfo {
        track_id,
        base_data_offset,
        default_sample_size,
        default_base_is_moof: flags & 0x020000 != 0,
    })
}

/// Track-run fields needed for sample slicing and offset repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrunInfo {
    pub sample_count: u32,
    pub data_offset: Option<i32>,
    /// Per-sample sizes, resolved against the tfhd/trex default.
    pub sample_sizes: Vec<u32>,
}

pub fn parse_trun(payload: &[u8], default_sample_size: Option<u32>) -> Result<TrunInfo, FmpError> {
    let (_, flags) = full_box_header(*b"trun", payload)?;
    if payload.len() < 8 {
        return Err(FmpError::malformed(*b"trun", "payload too short"));
    }
    let sample_count = be_u32(&payload[4..]);

    let mut idx = 8usize;
    let data_offset = if flags & 0x000001 != 0 {
        let bytes = payload
            .get(idx..idx + 4)
            .ok_or_else(|| FmpError::malformed(*b"trun", "missing data_offset"))?;
        idx += 4;
        Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    } else {
        None
    };
    if flags & 0x000004 != 0 {
        idx += 4; // first_sample_flags
    }

    let has_duration = flags & 0x000100 != 0;
    let has_size = flags & 0x000200 != 0;
    let has_flags = flags & 0x000400 != 0;
    let has_cto = flags & 0x000800 != 0;

    let mut sample_sizes = Vec::with_capacity(sample_count as usize);
    for _ in 0..sample_count {
        if has_duration {
            idx += 4;
        }
        if has_size {
            let bytes = payload
                .get(idx..idx + 4)
                .ok_or_else(|| FmpError::malformed(*b"trun", "sample size past end"))?;
            sample_sizes.push(be_u32(bytes));
            idx += 4;
        } else {
            sample_sizes.push(default_sample_size.ok_or_else(|| {
                FmpError::malformed(*b"trun", "no sample size and no tfhd/trex default")
            })?);
        }
        if has_flags {
            idx += 4;
        }
        if has_cto {
            idx += 4;
        }
    }
    if idx > payload.len() {
        return Err(FmpError::malformed(*b"trun", "sample table exceeds box size"));
    }

    Ok(TrunInfo {
        sample_count,
        data_offset,
        sample_sizes,
    })
}

/// Subtract `delta` from a `trun`'s `data_offset` field in place.
///
/// No-op when the trun carries no data offset.
pub fn adjust_trun_data_offset(payload: &mut [u8], delta: i32) -> Result<(), FmpError> {
    let (_, flags) = full_box_header(*b"trun", payload)?;
    if flags & 0x000001 == 0 {
        return Ok(());
    }
    let bytes = payload
        .get_mut(8..12)
        .ok_or_else(|| FmpError::malformed(*b"trun", "missing data_offset"))?;
    let current = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    bytes.copy_from_slice(&(current - delta).to_be_bytes());
    Ok(())
}

/// Byte range of one sample within the fragment's `mdat` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub start: usize,
    pub len: usize,
}

impl SampleRange {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Resolve the sample byte ranges of one `traf` into its fragment's `mdat`.
///
/// Offsets are fragment-local: `trun.data_offset` is taken relative to the
/// `moof` start (the default-base-is-moof convention; an explicit
/// `base_data_offset` is treated as fragment-relative, which coincides for
/// self-contained fragments). Runs without a data offset continue after the
/// previous run's last sample.
pub fn sample_ranges(frag: &Fragment, traf: &Mp4Box) -> Result<Vec<SampleRange>, FmpError> {
    let tfhd = traf
        .child(b"tfhd")
        .ok_or_else(|| FmpError::malformed(*b"traf", "missing tfhd"))?;
    let tfhd = parse_tfhd(tfhd.payload())?;

    let moof_start = frag.moof_offset();
    let mdat_payload_start = frag.mdat_payload_offset();
    let mdat_len = frag.mdat().payload().len();

    let base = tfhd.base_data_offset.unwrap_or(moof_start);
    let mut next_offset: Option<u64> = None;
    let mut ranges = Vec::new();

    for child in traf.children() {
        if !child.is(b"trun") {
            continue;
        }
        let trun = parse_trun(child.payload(), tfhd.default_sample_size)?;
        let mut pos = match trun.data_offset {
            Some(off) => {
                let absolute = base as i64 + i64::from(off);
                if absolute < 0 {
                    return Err(FmpError::malformed(*b"trun", "negative sample offset"));
                }
                absolute as u64
            }
            None => next_offset
                .ok_or_else(|| FmpError::malformed(*b"trun", "no data_offset and no prior run"))?,
        };

        for size in &trun.sample_sizes {
            let start = pos
                .checked_sub(mdat_payload_start)
                .ok_or_else(|| FmpError::malformed(*b"trun", "sample before mdat payload"))?
                as usize;
            let len = *size as usize;
            if start + len > mdat_len {
                return Err(FmpError::malformed(
                    *b"trun",
                    format!("sample [{start}..{}) outside mdat of {mdat_len}", start + len),
                ));
            }
            ranges.push(SampleRange { start, len });
            pos += u64::from(*size);
        }
        next_offset = Some(pos);
    }

    Ok(ranges)
}

/// Per-track decryption info extracted from the init segment.
#[derive(Debug, Clone)]
pub struct DecryptTrackInfo {
    pub track_id: u32,
    /// `None` for unencrypted tracks.
    pub tenc: Option<Tenc>,
    pub scheme_type: Option<FourCc>,
    pub trex: Option<Trex>,
}

impl DecryptTrackInfo {
    pub fn is_encrypted(&self) -> bool {
        self.tenc.is_some()
    }
}

/// Mapping from track id to decryption defaults; built once from `moov`.
#[derive(Debug, Clone, Default)]
pub struct DecryptTrackTable {
    tracks: HashMap<u32, DecryptTrackInfo>,
}

impl DecryptTrackTable {
    pub fn insert(&mut self, info: DecryptTrackInfo) {
        self.tracks.insert(info.track_id, info);
    }

    pub fn get(&self, track_id: u32) -> Option<&DecryptTrackInfo> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_full_box_payload, make_media_fragment, make_tenc_payload};

    #[test]
    fn test_tenc_v1_crypt_skip_blocks() {
        let payload = make_tenc_payload(1, 1, 9, 0, &[0x11; 16], Some(&[0xAB; 16]));
        let tenc = Tenc::parse(&payload).unwrap();
        assert_eq!(tenc.default_crypt_byte_block, 1);
        assert_eq!(tenc.default_skip_byte_block, 9);
        assert_eq!(tenc.default_per_sample_iv_size, 0);
        assert!(tenc.default_is_protected);
        assert_eq!(tenc.default_constant_iv.as_deref(), Some(&[0xAB; 16][..]));
        assert_eq!(tenc.default_kid, [0x11; 16]);
    }

    #[test]
    fn test_tenc_v0_has_no_pattern() {
        let payload = make_tenc_payload(0, 1, 9, 8, &[0; 16], None);
        let tenc = Tenc::parse(&payload).unwrap();
        assert_eq!(tenc.default_crypt_byte_block, 0);
        assert_eq!(tenc.default_skip_byte_block, 0);
        assert_eq!(tenc.default_per_sample_iv_size, 8);
        assert!(tenc.default_constant_iv.is_none());
    }

    #[test]
    fn test_trex_parse() {
        let mut content = Vec::new();
        content.extend_from_slice(&2u32.to_be_bytes()); // track_id
        content.extend_from_slice(&1u32.to_be_bytes());
        content.extend_from_slice(&1024u32.to_be_bytes());
        content.extend_from_slice(&512u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        let payload = make_full_box_payload(0, 0, &content);
        let trex = Trex::parse(&payload).unwrap();
        assert_eq!(trex.track_id, 2);
        assert_eq!(trex.default_sample_duration, 1024);
        assert_eq!(trex.default_sample_size, 512);
    }

    #[test]
    fn test_senc_without_subsamples_constant_iv() {
        // Two samples, IV size 0, no subsample flag.
        let mut content = Vec::new();
        content.extend_from_slice(&2u32.to_be_bytes());
        let payload = make_full_box_payload(0, 0, &content);
        let senc = parse_senc(&payload, 0, None).unwrap();
        assert_eq!(senc.sample_count(), 2);
        assert!(senc.patterns_for(0).is_empty());
        assert!(senc.patterns_for(1).is_empty());
    }

    #[test]
    fn test_senc_with_subsample_patterns() {
        let mut content = Vec::new();
        content.extend_from_slice(&1u32.to_be_bytes()); // sample_count
        content.extend_from_slice(&2u16.to_be_bytes()); // subsample_count
        content.extend_from_slice(&10u16.to_be_bytes());
        content.extend_from_slice(&320u32.to_be_bytes());
        content.extend_from_slice(&4u16.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        let payload = make_full_box_payload(0, 0x2, &content);
        let senc = parse_senc(&payload, 0, None).unwrap();
        let patterns = senc.patterns_for(0);
        assert_eq!(
            patterns,
            &[
                SubsamplePattern { clear_bytes: 10, protected_bytes: 320 },
                SubsamplePattern { clear_bytes: 4, protected_bytes: 0 },
            ]
        );
    }

    #[test]
    fn test_senc_falls_back_to_other_iv_sizes() {
        // One sample with an 8-byte IV, but the caller claims IV size 0.
        let mut content = Vec::new();
        content.extend_from_slice(&1u32.to_be_bytes());
        content.extend_from_slice(&[0xEE; 8]);
        let payload = make_full_box_payload(0, 0, &content);
        let senc = parse_senc(&payload, 0, None).unwrap();
        assert_eq!(senc.ivs[0], vec![0xEE; 8]);
    }

    #[test]
    fn test_tfhd_track_id_and_defaults() {
        let mut content = Vec::new();
        content.extend_from_slice(&7u32.to_be_bytes()); // track_id
        content.extend_from_slice(&999u32.to_be_bytes()); // default_sample_size
        let payload = make_full_box_payload(0, 0x020010, &content);
        let tfhd = parse_tfhd(&payload).unwrap();
        assert_eq!(tfhd.track_id, 7);
        assert_eq!(tfhd.default_sample_size, Some(999));
        assert!(tfhd.default_base_is_moof);
        assert!(tfhd.base_data_offset.is_none());
    }

    #[test]
    fn test_trun_sizes_with_default() {
        let mut content = Vec::new();
        content.extend_from_slice(&3u32.to_be_bytes()); // sample_count
        content.extend_from_slice(&100i32.to_be_bytes()); // data_offset
        let payload = make_full_box_payload(0, 0x000001, &content);
        let trun = parse_trun(&payload, Some(256)).unwrap();
        assert_eq!(trun.data_offset, Some(100));
        assert_eq!(trun.sample_sizes, vec![256, 256, 256]);
    }

    #[test]
    fn test_adjust_trun_data_offset() {
        let mut content = Vec::new();
        content.extend_from_slice(&1u32.to_be_bytes());
        content.extend_from_slice(&500i32.to_be_bytes());
        content.extend_from_slice(&64u32.to_be_bytes());
        let mut payload = make_full_box_payload(0, 0x000201, &content);
        adjust_trun_data_offset(&mut payload, 120).unwrap();
        let trun = parse_trun(&payload, None).unwrap();
        assert_eq!(trun.data_offset, Some(380));
    }

    #[test]
    fn test_sample_ranges_resolve_into_mdat() {
        let sizes = [16usize, 24, 8];
        let payload: Vec<u8> = (0..48u8).collect();
        let frag = make_media_fragment(1, &payload, &sizes);
        let traf = frag.moof().child(b"traf").unwrap();
        let ranges = sample_ranges(&frag, traf).unwrap();
        assert_eq!(
            ranges,
            vec![
                SampleRange { start: 0, len: 16 },
                SampleRange { start: 16, len: 24 },
                SampleRange { start: 40, len: 8 },
            ]
        );
    }

    #[test]
    fn test_sample_ranges_reject_overflow() {
        let payload = vec![0u8; 16];
        let frag = make_media_fragment(1, &payload, &[32]);
        let traf = frag.moof().child(b"traf").unwrap();
        assert!(sample_ranges(&frag, traf).is_err());
    }
}
