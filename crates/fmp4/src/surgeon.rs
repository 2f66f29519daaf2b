//! DRM-box surgery on init segments and fragments.
//!
//! The init transform builds the decrypt-track table while rewriting the
//! `moov` into its clear-content shape; the fragment pass strips encryption
//! boxes and repairs every `trun.data_offset` by the bytes removed.

use tracing::trace;

use crate::boxes::{BoxData, FourCc, Mp4Box, parse_boxes};
use crate::cenc::{DecryptTrackInfo, DecryptTrackTable, Tenc, Trex, adjust_trun_data_offset};
use crate::error::FmpError;
use crate::reader::{Fragment, InitSegment};

/// Sample-entry FourCCs that wrap an encrypted stream.
const ENCRYPTED_ENTRIES: &[[u8; 4]] = &[*b"enca", *b"encv"];

/// Grouping types dropped from `sbgp`/`sgpd` tables.
const DROPPED_GROUPING_TYPES: &[[u8; 4]] = &[*b"seam", *b"seig"];

fn tkhd_track_id(trak: &Mp4Box) -> Result<u32, FmpError> {
    let tkhd = trak
        .child(b"tkhd")
        .ok_or_else(|| FmpError::malformed(*b"trak", "missing tkhd"))?;
    let payload = tkhd.payload();
    if payload.len() < 4 {
        return Err(FmpError::malformed(*b"tkhd", "payload too short"));
    }
    let offset = match payload[0] {
        0 => 12,
        1 => 20,
        v => {
            return Err(FmpError::malformed(*b"tkhd", format!("unknown version {v}")));
        }
    };
    let bytes = payload
        .get(offset..offset + 4)
        .ok_or_else(|| FmpError::malformed(*b"tkhd", "track id past end"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// `stsd` payload split into its FullBox head and sample-entry boxes.
struct Stsd {
    head: [u8; 4],
    entries: Vec<Mp4Box>,
}

impl Stsd {
    fn parse(payload: &[u8]) -> Result<Self, FmpError> {
        if payload.len() < 8 {
            return Err(FmpError::malformed(*b"stsd", "payload too short"));
        }
        let head = [payload[0], payload[1], payload[2], payload[3]];
        let declared = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let entries = parse_boxes(&payload[8..])?;
        if entries.len() != declared as usize {
            return Err(FmpError::malformed(
                *b"stsd",
                format!("{} entries declared, {} present", declared, entries.len()),
            ));
        }
        Ok(Self { head, entries })
    }

    fn rebuild(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.head);
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            entry
                .encode_into(&mut out)
                .expect("writing to a Vec never fails");
        }
        out
    }
}

fn sample_entry_prelude(fourcc: &FourCc) -> usize {
    match fourcc.as_bytes() {
        b"encv" | b"avc1" | b"avc3" | b"hvc1" | b"hev1" | b"av01" => 70,
        _ => 20,
    }
}

/// Strip the `sinf` chain from an encrypted sample entry.
///
/// Returns the original format, scheme type and `tenc`, restoring the
/// entry's FourCC to the clear format named by `frma`.
fn decrypt_sample_entry(
    entry: &mut Mp4Box,
) -> Result<Option<(FourCc, FourCc, Tenc)>, FmpError> {
    if !ENCRYPTED_ENTRIES.contains(&entry.fourcc.0) {
        return Ok(None);
    }
    let prelude_len = sample_entry_prelude(&entry.fourcc);
    let payload = entry.payload();
    if payload.len() < prelude_len {
        return Err(FmpError::malformed(entry.fourcc.0, "sample entry too short"));
    }
    let prelude = payload[..prelude_len].to_vec();
    let mut children = parse_boxes(&payload[prelude_len..])?;

    let sinf_index = children
        .iter()
        .position(|b| b.is(b"sinf"))
        .ok_or_else(|| FmpError::malformed(entry.fourcc.0, "encrypted entry without sinf"))?;
    let sinf = children.remove(sinf_index);

    let frma = sinf
        .child(b"frma")
        .ok_or_else(|| FmpError::malformed(*b"sinf", "missing frma"))?;
    let format = frma
        .payload()
        .get(..4)
        .ok_or_else(|| FmpError::malformed(*b"frma", "payload too short"))?;
    let original_format = FourCc([format[0], format[1], format[2], format[3]]);

    let schm = sinf
        .child(b"schm")
        .ok_or_else(|| FmpError::malformed(*b"sinf", "missing schm"))?;
    let scheme_bytes = schm
        .payload()
        .get(4..8)
        .ok_or_else(|| FmpError::malformed(*b"schm", "payload too short"))?;
    let scheme = FourCc([
        scheme_bytes[0],
        scheme_bytes[1],
        scheme_bytes[2],
        scheme_bytes[3],
    ]);

    let tenc = sinf
        .descend(&[b"schi"])
        .and_then(|schi| schi.child(b"tenc"))
        .ok_or_else(|| FmpError::malformed(*b"sinf", "missing schi/tenc"))?;
    let tenc = Tenc::parse(tenc.payload())?;

    let mut rebuilt = prelude;
    for child in &children {
        child
            .encode_into(&mut rebuilt)
            .expect("writing to a Vec never fails");
    }
    entry.fourcc = original_format;
    entry.data = BoxData::Leaf(rebuilt);

    Ok(Some((original_format, scheme, tenc)))
}

fn grouping_type(b: &Mp4Box) -> Option<[u8; 4]> {
    if !(b.is(b"sbgp") || b.is(b"sgpd")) {
        return None;
    }
    let payload = b.payload();
    let bytes = payload.get(4..8)?;
    Some([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Drop `sbgp`/`sgpd` children with `seam`/`seig` grouping types.
///
/// Returns the bytes removed.
fn filter_sample_groups(container: &mut Mp4Box) -> u64 {
    let Some(children) = container.children_mut() else {
        return 0;
    };
    let mut removed = 0u64;
    children.retain(|child| {
        if let Some(gt) = grouping_type(child)
            && DROPPED_GROUPING_TYPES.contains(&gt)
        {
            removed += child.size();
            false
        } else {
            true
        }
    });
    removed
}

/// Normalize the single trak's `stsd`: collapse a duplicated entry pair to
/// one entry, reject anything else unexpected.
fn sanitize_stsd(stsd_payload: &[u8]) -> Result<Stsd, FmpError> {
    let mut stsd = Stsd::parse(stsd_payload)?;
    match stsd.entries.len() {
        0 => Err(FmpError::UnexpectedStsd {
            reason: "no sample entries".into(),
        }),
        1 => Ok(stsd),
        2 => {
            if stsd.entries[0].fourcc != stsd.entries[1].fourcc {
                return Err(FmpError::UnexpectedStsd {
                    reason: format!(
                        "two entries of different types `{}` and `{}`",
                        stsd.entries[0].fourcc, stsd.entries[1].fourcc
                    ),
                });
            }
            stsd.entries.truncate(1);
            Ok(stsd)
        }
        n => Err(FmpError::UnexpectedStsd {
            reason: format!("expected 1 or 2 entries, got {n}"),
        }),
    }
}

/// Build the decrypt-track table from the init segment, rewriting the
/// `moov` into its clear-content form.
///
/// Enforces a single `trak`, collapses duplicated `stsd` entries, strips the
/// `sinf` chain (restoring the clear sample-entry format) and drops
/// `seam`/`seig` sample-group tables from the `stbl`.
pub fn transform_init(init: &mut InitSegment) -> Result<DecryptTrackTable, FmpError> {
    let moov = &mut init.moov;

    let trak_count = moov.children().iter().filter(|b| b.is(b"trak")).count();
    if trak_count > 1 {
        return Err(FmpError::MultipleTracks);
    }

    // Collect trex defaults first; the mvex stays in place.
    let mut trexes: Vec<Trex> = Vec::new();
    if let Some(mvex) = moov.child(b"mvex") {
        for child in mvex.children() {
            if child.is(b"trex") {
                trexes.push(Trex::parse(child.payload())?);
            }
        }
    }

    let mut table = DecryptTrackTable::default();
    let Some(trak) = moov.child_mut(b"trak") else {
        return Err(FmpError::malformed(*b"moov", "missing trak"));
    };

    let track_id = tkhd_track_id(trak)?;
    let stbl = trak
        .descend_mut(&[b"mdia", b"minf", b"stbl"])
        .ok_or_else(|| FmpError::malformed(*b"trak", "missing mdia/minf/stbl"))?;

    let stsd = stbl
        .child_mut(b"stsd")
        .ok_or_else(|| FmpError::malformed(*b"stbl", "missing stsd"))?;
    let mut sanitized = sanitize_stsd(stsd.payload())?;

    let mut tenc = None;
    let mut scheme_type = None;
    if let Some((format, scheme, parsed_tenc)) = decrypt_sample_entry(&mut sanitized.entries[0])? {
        trace!(%format, %scheme, track_id, "stripped sinf from sample entry");
        tenc = Some(parsed_tenc);
        scheme_type = Some(scheme);
    }
    *stsd.payload_mut().expect("stsd is a leaf") = sanitized.rebuild();

    let removed = filter_sample_groups(stbl);
    if removed > 0 {
        trace!(removed, "dropped sample-group tables from stbl");
    }

    table.insert(DecryptTrackInfo {
        track_id,
        tenc,
        scheme_type,
        trex: trexes.iter().find(|t| t.track_id == track_id).copied(),
    });

    Ok(table)
}

/// Strip encryption boxes from a fragment and repair its `trun` offsets.
///
/// Removes `senc` (plain and PIFF uuid form), `saiz`, `saio` and
/// `seam`/`seig` sample groups from every `traf`, plus every `pssh` under
/// the `moof`; then subtracts the total bytes removed from each
/// `trun.data_offset`. Returns the bytes removed.
pub fn strip_fragment(frag: &mut Fragment) -> Result<u64, FmpError> {
    let moof = frag.moof_mut();
    let mut bytes_removed = 0u64;

    for child in moof.children_mut().expect("moof is a container") {
        if !child.is(b"traf") {
            continue;
        }
        let traf_children = child.children_mut().expect("traf is a container");
        traf_children.retain(|b| {
            let drop = b.is(b"senc") || b.is(b"saiz") || b.is(b"saio") || b.is_piff_senc();
            if drop {
                bytes_removed += b.size();
            }
            !drop
        });
        bytes_removed += filter_sample_groups(child);
    }

    let moof_children = moof.children_mut().expect("moof is a container");
    moof_children.retain(|b| {
        if b.is(b"pssh") {
            bytes_removed += b.size();
            false
        } else {
            true
        }
    });

    if bytes_removed > 0 {
        let delta = i32::try_from(bytes_removed)
            .map_err(|_| FmpError::malformed(*b"moof", "removed more bytes than fit an i32"))?;
        for traf in moof_children.iter_mut().filter(|b| b.is(b"traf")) {
            for trun in traf
                .children_mut()
                .expect("traf is a container")
                .iter_mut()
                .filter(|b| b.is(b"trun"))
            {
                adjust_trun_data_offset(trun.payload_mut().expect("trun is a leaf"), delta)?;
            }
        }
    }

    Ok(bytes_removed)
}
