//! HLS master-playlist variant selection.
//!
//! Apple serves one master playlist per song with variants across codec
//! families (ALAC at several sample rates, Dolby Atmos, AAC flavors) and,
//! for music videos, separate video/audio masters. This crate picks the
//! variant a codec policy asks for, answers bandwidth lookups for size
//! estimation, and enumerates per-codec qualities for probing.

mod error;
mod fetch;
mod mv;
mod probe;
mod select;

pub use m3u8_rs::MasterPlaylist;

pub use error::SelectError;
pub use fetch::{fetch_master, fetch_playlist_text};
pub use mv::{MvAudioType, select_mv_audio, select_mv_video};
pub use probe::{ProbeOutcome, QualityInfo, probe_qualities};
pub use select::{
    AacSubtype, CodecLabel, SelectionPolicy, StreamSelection, bandwidth_for_group, parse_master,
    quality_for, select_audio, selection_quality,
};
