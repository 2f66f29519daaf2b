//! Shared fMP4 fixture builders.
//!
//! Available to local tests and, behind the `test-utils` feature, to
//! downstream crate tests that need synthetic encrypted fragments.

use crate::boxes::parse_boxes;
use crate::reader::Fragment;

/// Bytes between an audio sample entry's box header and its child boxes.
pub const AUDIO_SAMPLE_ENTRY_PRELUDE: usize = 20;

/// Bytes between a visual sample entry's box header and its child boxes.
pub const VISUAL_SAMPLE_ENTRY_PRELUDE: usize = 70;

pub fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

/// FullBox payload: `[version][flags:3][content...]`.
pub fn make_full_box_payload(version: u8, flags: u32, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + content.len());
    out.push(version);
    out.push(((flags >> 16) & 0xFF) as u8);
    out.push(((flags >> 8) & 0xFF) as u8);
    out.push((flags & 0xFF) as u8);
    out.extend_from_slice(content);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, content: &[u8]) -> Vec<u8> {
    make_box(fourcc, &make_full_box_payload(version, flags, content))
}

pub fn make_ftyp() -> Vec<u8> {
    make_box(b"ftyp", b"M4A \x00\x00\x00\x00M4A mp42")
}

/// `tenc` payload with the given pattern, IV size and KID.
pub fn make_tenc_payload(
    version: u8,
    crypt_blocks: u8,
    skip_blocks: u8,
    per_sample_iv_size: u8,
    kid: &[u8; 16],
    constant_iv: Option<&[u8]>,
) -> Vec<u8> {
    let mut content = Vec::new();
    content.push(0); // reserved
    if version == 0 {
        content.push(0);
    } else {
        content.push((crypt_blocks << 4) | (skip_blocks & 0x0F));
    }
    content.push(1); // default_isProtected
    content.push(per_sample_iv_size);
    content.extend_from_slice(kid);
    if let Some(iv) = constant_iv {
        content.push(iv.len() as u8);
        content.extend_from_slice(iv);
    }
    make_full_box_payload(version, 0, &content)
}

/// Audio sample entry box: header + zeroed prelude + child boxes.
pub fn make_audio_sample_entry(fourcc: &[u8; 4], children: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; AUDIO_SAMPLE_ENTRY_PRELUDE];
    body.extend_from_slice(children);
    make_box(fourcc, &body)
}

/// `sinf` protection chain: `frma` + `schm` + `schi(tenc)`.
pub fn make_sinf(original_format: &[u8; 4], scheme: &[u8; 4], tenc_payload: &[u8]) -> Vec<u8> {
    let frma = make_box(b"frma", original_format);
    let mut schm_content = Vec::new();
    schm_content.extend_from_slice(scheme);
    schm_content.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    let schm = make_full_box(b"schm", 0, 0, &schm_content);
    let schi = make_box(b"schi", &make_box(b"tenc", tenc_payload));

    let mut sinf_body = Vec::new();
    sinf_body.extend_from_slice(&frma);
    sinf_body.extend_from_slice(&schm);
    sinf_body.extend_from_slice(&schi);
    make_box(b"sinf", &sinf_body)
}

pub fn make_tkhd(track_id: u32) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    content.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    content.extend_from_slice(&track_id.to_be_bytes());
    content.extend_from_slice(&0u32.to_be_bytes()); // reserved
    make_full_box(b"tkhd", 0, 0, &content)
}

pub fn make_trex(track_id: u32, default_sample_size: u32) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&track_id.to_be_bytes());
    content.extend_from_slice(&1u32.to_be_bytes());
    content.extend_from_slice(&0u32.to_be_bytes());
    content.extend_from_slice(&default_sample_size.to_be_bytes());
    content.extend_from_slice(&0u32.to_be_bytes());
    make_full_box(b"trex", 0, 0, &content)
}

/// `moov` bytes holding the given stsd entry boxes plus an mvex/trex.
pub fn make_moov_bytes(track_id: u32, stsd_entries: &[Vec<u8>]) -> Vec<u8> {
    let mut stsd_content = Vec::new();
    stsd_content.extend_from_slice(&(stsd_entries.len() as u32).to_be_bytes());
    for entry in stsd_entries {
        stsd_content.extend_from_slice(entry);
    }
    let stsd = make_full_box(b"stsd", 0, 0, &stsd_content);
    let stbl = make_box(b"stbl", &stsd);
    let minf = make_box(b"minf", &stbl);
    let mdia = make_box(b"mdia", &minf);

    let mut trak_body = make_tkhd(track_id);
    trak_body.extend_from_slice(&mdia);
    let trak = make_box(b"trak", &trak_body);

    let mvex = make_box(b"mvex", &make_trex(track_id, 0));

    let mut moov_body = trak;
    moov_body.extend_from_slice(&mvex);
    make_box(b"moov", &moov_body)
}

/// Encrypted-audio init bytes: `ftyp` + `moov` with an `enca` entry whose
/// `sinf` declares the given scheme and `tenc`.
pub fn make_encrypted_init_bytes(
    track_id: u32,
    original_format: &[u8; 4],
    scheme: &[u8; 4],
    tenc_payload: &[u8],
) -> Vec<u8> {
    let sinf = make_sinf(original_format, scheme, tenc_payload);
    let entry = make_audio_sample_entry(b"enca", &sinf);
    let mut out = make_ftyp();
    out.extend_from_slice(&make_moov_bytes(track_id, &[entry]));
    out
}

/// Fragment bytes with explicit per-sample sizes and extra boxes.
///
/// `extra_traf_boxes` land between `tfhd` and `trun`; `extra_moof_boxes`
/// after the `traf`. The trun `data_offset` points at the mdat payload
/// relative to the moof start, accounting for everything built here.
pub fn make_fragment_bytes_with(
    track_id: u32,
    mdat_payload: &[u8],
    sample_sizes: &[usize],
    extra_traf_boxes: &[Vec<u8>],
    extra_moof_boxes: &[Vec<u8>],
) -> Vec<u8> {
    let tfhd = {
        let content = track_id.to_be_bytes().to_vec();
        // default-base-is-moof
        make_full_box(b"tfhd", 0, 0x020000, &content)
    };

    let trun_len = 8 + 4 + 4 + 4 + 4 * sample_sizes.len();
    let extra_traf_len: usize = extra_traf_boxes.iter().map(Vec::len).sum();
    let extra_moof_len: usize = extra_moof_boxes.iter().map(Vec::len).sum();
    let traf_len = 8 + tfhd.len() + extra_traf_len + trun_len;
    let moof_len = 8 + traf_len + extra_moof_len;
    let data_offset = (moof_len + 8) as i32;

    let trun = {
        let mut content = Vec::new();
        content.extend_from_slice(&(sample_sizes.len() as u32).to_be_bytes());
        content.extend_from_slice(&data_offset.to_be_bytes());
        for size in sample_sizes {
            content.extend_from_slice(&(*size as u32).to_be_bytes());
        }
        // data_offset_present | sample_size_present
        make_full_box(b"trun", 0, 0x000201, &content)
    };
    debug_assert_eq!(trun.len(), trun_len);

    let mut traf_body = tfhd;
    for extra in extra_traf_boxes {
        traf_body.extend_from_slice(extra);
    }
    traf_body.extend_from_slice(&trun);
    let traf = make_box(b"traf", &traf_body);

    let mut moof_body = traf;
    for extra in extra_moof_boxes {
        moof_body.extend_from_slice(extra);
    }
    let moof = make_box(b"moof", &moof_body);
    debug_assert_eq!(moof.len(), moof_len);

    let mut out = moof;
    out.extend_from_slice(&make_box(b"mdat", mdat_payload));
    out
}

/// Fragment bytes with a single sample spanning the whole mdat payload.
pub fn make_media_fragment_bytes(track_id: u32, mdat_payload: &[u8]) -> Vec<u8> {
    make_fragment_bytes_with(track_id, mdat_payload, &[mdat_payload.len()], &[], &[])
}

/// Parsed fragment with explicit per-sample sizes.
pub fn make_media_fragment(track_id: u32, mdat_payload: &[u8], sample_sizes: &[usize]) -> Fragment {
    let bytes = make_fragment_bytes_with(track_id, mdat_payload, sample_sizes, &[], &[]);
    Fragment {
        boxes: parse_boxes(&bytes).expect("fixture fragment parses"),
    }
}

/// `senc` box bytes with subsample patterns for each sample (constant IV).
pub fn make_senc_box(subsamples: &[&[(u16, u32)]]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(&(subsamples.len() as u32).to_be_bytes());
    for patterns in subsamples {
        content.extend_from_slice(&(patterns.len() as u16).to_be_bytes());
        for (clear, protected) in *patterns {
            content.extend_from_slice(&clear.to_be_bytes());
            content.extend_from_slice(&protected.to_be_bytes());
        }
    }
    make_full_box(b"senc", 0, 0x2, &content)
}
