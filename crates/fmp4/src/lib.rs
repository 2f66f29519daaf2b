//! Fragmented-MP4 primitives for encrypted HLS audio streams.
//!
//! This crate parses ISO-BMFF box streams just deeply enough to drive
//! sample-level decryption: a streaming reader that splits an fMP4 file into
//! an init segment plus `moof`/`mdat` fragments, common-encryption metadata
//! (`tenc`, `senc`, `trex`, `saiz`), and the surgery pass that strips DRM
//! boxes and repairs `trun` data offsets afterwards.

mod boxes;
mod cenc;
mod error;
mod reader;
mod surgeon;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use boxes::{BoxData, FourCc, Mp4Box, parse_boxes};
pub use cenc::{
    DecryptTrackInfo, DecryptTrackTable, Saiz, SampleRange, SencSamples, SubsamplePattern, Tenc,
    TfhdInfo, Trex, TrunInfo, adjust_trun_data_offset, parse_senc, parse_tfhd, parse_trun,
    sample_ranges,
};
pub use error::FmpError;
pub use reader::{Fragment, InitSegment, read_fragment, read_init};
pub use surgeon::{strip_fragment, transform_init};
