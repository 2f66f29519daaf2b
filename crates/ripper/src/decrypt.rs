//! CBCS fragment decryption through the key helper.
//!
//! Samples decrypt in order; within a sample, each subsample's protected
//! run goes over the wire as either one full-block frame (no skip pattern)
//! or a stripe frame of `crypt`/`skip` byte blocks. After decryption the
//! DRM boxes are stripped and every `trun.data_offset` repaired.

use fmp4::{
    DecryptTrackTable, Fragment, Saiz, SampleRange, SencSamples, SubsamplePattern, parse_senc,
    parse_tfhd, sample_ranges, strip_fragment,
};
use tracing::trace;

use crate::error::RipError;
use crate::keyhelper::KeyHelperSession;

struct TrafDecrypt {
    ranges: Vec<SampleRange>,
    senc: SencSamples,
    crypt_len: usize,
    skip_len: usize,
}

fn plan_traf(
    frag: &Fragment,
    traf: &fmp4::Mp4Box,
    tracks: &DecryptTrackTable,
) -> Result<Option<TrafDecrypt>, RipError> {
    let tfhd = traf
        .child(b"tfhd")
        .ok_or_else(|| RipError::decrypt("traf without tfhd"))?;
    let track_id = parse_tfhd(tfhd.payload())?.track_id;

    let info = tracks
        .get(track_id)
        .ok_or(fmp4::FmpError::UnknownTrack { track_id })?;
    let Some(tenc) = &info.tenc else {
        // Unencrypted track: nothing to decrypt.
        return Ok(None);
    };
    match info.scheme_type {
        Some(scheme) if scheme == *b"cbcs" => {}
        Some(scheme) => return Err(fmp4::FmpError::UnsupportedScheme { scheme }.into()),
        None => return Err(RipError::decrypt("encrypted track without scheme type")),
    }

    let senc_payload = traf
        .children()
        .iter()
        .find(|b| b.is(b"senc"))
        .map(|b| b.payload())
        .or_else(|| {
            traf.children()
                .iter()
                .find(|b| b.is_piff_senc())
                // uuid payload carries the 16-byte usertype first.
                .map(|b| &b.payload()[16..])
        })
        .ok_or(fmp4::FmpError::MissingSenc)?;

    let saiz = traf
        .children()
        .iter()
        .find(|b| b.is(b"saiz"))
        .map(|b| Saiz::parse(b.payload()))
        .transpose()?;

    let senc = parse_senc(senc_payload, tenc.default_per_sample_iv_size, saiz.as_ref())?;
    let ranges = sample_ranges(frag, traf)?;

    Ok(Some(TrafDecrypt {
        ranges,
        senc,
        crypt_len: tenc.default_crypt_byte_block as usize * 16,
        skip_len: tenc.default_skip_byte_block as usize * 16,
    }))
}

fn decrypt_protected(
    session: &mut KeyHelperSession,
    data: &mut [u8],
    crypt_len: usize,
    skip_len: usize,
) -> Result<(), RipError> {
    let result = if skip_len == 0 {
        session.decrypt_full_block(data)
    } else {
        session.decrypt_stripe(data, crypt_len, skip_len)
    };
    result.map_err(|e| RipError::decrypt(format!("key helper I/O: {e}")))
}

fn decrypt_sample(
    session: &mut KeyHelperSession,
    data: &mut [u8],
    patterns: &[SubsamplePattern],
    crypt_len: usize,
    skip_len: usize,
) -> Result<(), RipError> {
    if patterns.is_empty() {
        return decrypt_protected(session, data, crypt_len, skip_len);
    }
    let mut pos = 0usize;
    for pattern in patterns {
        pos += pattern.clear_bytes as usize;
        let protected = pattern.protected_bytes as usize;
        if protected > 0 {
            let end = pos + protected;
            if end > data.len() {
                return Err(RipError::decrypt(format!(
                    "subsample run [{pos}..{end}) outside sample of {} bytes",
                    data.len()
                )));
            }
            decrypt_protected(session, &mut data[pos..end], crypt_len, skip_len)?;
            pos = end;
        }
    }
    Ok(())
}

/// Decrypt every encrypted traf of `frag` in place, then strip the DRM
/// boxes and fix up the `trun` offsets. Returns the bytes removed by the
/// strip for offset bookkeeping.
pub fn decrypt_fragment(
    frag: &mut Fragment,
    tracks: &DecryptTrackTable,
    session: &mut KeyHelperSession,
) -> Result<u64, RipError> {
    let mut plans = Vec::new();
    for traf in frag.moof().children().iter().filter(|b| b.is(b"traf")) {
        if let Some(plan) = plan_traf(frag, traf, tracks)? {
            plans.push(plan);
        }
    }

    for plan in &plans {
        let mdat = frag
            .mdat_mut()
            .payload_mut()
            .expect("mdat is a leaf box");
        for (index, range) in plan.ranges.iter().enumerate() {
            decrypt_sample(
                session,
                &mut mdat[range.start..range.end()],
                plan.senc.patterns_for(index),
                plan.crypt_len,
                plan.skip_len,
            )?;
        }
        trace!(samples = plan.ranges.len(), "decrypted traf samples");
    }

    Ok(strip_fragment(frag)?)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::TcpListener;

    use fmp4::test_support::{
        make_encrypted_init_bytes, make_fragment_bytes_with, make_senc_box, make_tenc_payload,
    };
    use fmp4::{read_fragment, read_init, transform_init};

    use super::*;

    /// Identity key helper: echoes ciphertext back unchanged.
    fn echo_session() -> KeyHelperSession {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut writer = std::io::BufWriter::new(stream);
            loop {
                let mut len_bytes = [0u8; 4];
                if std::io::Read::read_exact(&mut reader, &mut len_bytes).is_err() {
                    break;
                }
                let len = u32::from_le_bytes(len_bytes) as usize;
                if len == 0 {
                    break;
                }
                let mut buf = vec![0u8; len];
                std::io::Read::read_exact(&mut reader, &mut buf).unwrap();
                std::io::Write::write_all(&mut writer, &buf).unwrap();
                std::io::Write::flush(&mut writer).unwrap();
            }
        });
        KeyHelperSession::connect(&addr.to_string()).unwrap()
    }

    fn table_for(scheme: &[u8; 4], skip_blocks: u8) -> DecryptTrackTable {
        let tenc = make_tenc_payload(1, 1, skip_blocks, 0, &[0x10; 16], Some(&[0x20; 16]));
        let init_bytes = make_encrypted_init_bytes(1, b"alac", scheme, &tenc);
        let (mut init, _) = read_init(&mut Cursor::new(init_bytes)).unwrap();
        transform_init(&mut init).unwrap()
    }

    fn fragment_with_senc(senc: Vec<u8>, payload: &[u8]) -> Fragment {
        let bytes = make_fragment_bytes_with(1, payload, &[payload.len()], &[senc], &[]);
        read_fragment(&mut Cursor::new(bytes), 0).unwrap().unwrap().0
    }

    #[test]
    fn test_missing_senc_is_rejected() {
        let tracks = table_for(b"cbcs", 9);
        let payload = vec![0u8; 32];
        let bytes = make_fragment_bytes_with(1, &payload, &[32], &[], &[]);
        let mut frag = read_fragment(&mut Cursor::new(bytes), 0).unwrap().unwrap().0;
        let mut session = echo_session();

        let err = decrypt_fragment(&mut frag, &tracks, &mut session).unwrap_err();
        assert!(matches!(err, RipError::Box(fmp4::FmpError::MissingSenc)));
    }

    #[test]
    fn test_non_cbcs_scheme_is_rejected() {
        let tracks = table_for(b"cenc", 9);
        let senc = make_senc_box(&[&[(0, 32)]]);
        let mut frag = fragment_with_senc(senc, &vec![0u8; 32]);
        let mut session = echo_session();

        let err = decrypt_fragment(&mut frag, &tracks, &mut session).unwrap_err();
        assert!(matches!(
            err,
            RipError::Box(fmp4::FmpError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_unknown_track_is_rejected() {
        let tracks = table_for(b"cbcs", 9);
        let senc = make_senc_box(&[&[(0, 32)]]);
        let payload = vec![0u8; 32];
        let bytes = make_fragment_bytes_with(7, &payload, &[32], &[senc], &[]);
        let mut frag = read_fragment(&mut Cursor::new(bytes), 0).unwrap().unwrap().0;
        let mut session = echo_session();

        let err = decrypt_fragment(&mut frag, &tracks, &mut session).unwrap_err();
        assert!(matches!(
            err,
            RipError::Box(fmp4::FmpError::UnknownTrack { track_id: 7 })
        ));
    }

    #[test]
    fn test_decrypt_strips_and_returns_removed_bytes() {
        let tracks = table_for(b"cbcs", 9);
        let senc = make_senc_box(&[&[(16, 320)]]);
        let senc_len = senc.len() as u64;
        // 16 clear bytes then 320 protected.
        let payload = vec![0x5A_u8; 336];
        let mut frag = fragment_with_senc(senc, &payload);
        let mut session = echo_session();

        let removed = decrypt_fragment(&mut frag, &tracks, &mut session).unwrap();
        assert_eq!(removed, senc_len);
        assert!(frag.moof().child(b"traf").unwrap().child(b"senc").is_none());
        // Echo helper: payload identical after the round trip.
        assert_eq!(frag.mdat().payload(), &payload[..]);
    }
}
