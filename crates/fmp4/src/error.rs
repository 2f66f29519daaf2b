use crate::boxes::FourCc;

#[derive(Debug, thiserror::Error)]
pub enum FmpError {
    #[error("init segment must start with ftyp and moov, found `{found}`")]
    BadInit { found: FourCc },

    #[error("mdat box found without a preceding moof box")]
    OrphanMdat,

    #[error("box stream truncated: {reason}")]
    Truncated { reason: String },

    #[error("malformed `{fourcc}` box: {reason}")]
    Malformed { fourcc: FourCc, reason: String },

    #[error("unexpected stsd layout: {reason}")]
    UnexpectedStsd { reason: String },

    #[error("more than one trak in init segment")]
    MultipleTracks,

    #[error("no decryption info for track {track_id}")]
    UnknownTrack { track_id: u32 },

    #[error("scheme type `{scheme}` not supported")]
    UnsupportedScheme { scheme: FourCc },

    #[error("no senc box in traf")]
    MissingSenc,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl FmpError {
    pub(crate) fn malformed(fourcc: [u8; 4], reason: impl Into<String>) -> Self {
        Self::Malformed {
            fourcc: FourCc(fourcc),
            reason: reason.into(),
        }
    }

    pub(crate) fn truncated(reason: impl Into<String>) -> Self {
        Self::Truncated {
            reason: reason.into(),
        }
    }
}
