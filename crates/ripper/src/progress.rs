//! Line-oriented stdout progress protocol.
//!
//! Each record is the literal prefix `AMDL_PROGRESS::` followed by one
//! compact JSON object and a newline — one record per line, never split,
//! so a host GUI can tail stdout. Flushes are throttled inside tight loops
//! and forced at phase boundaries. Bulk results are bracketed by the
//! `AMDL_JSON_START` / `AMDL_JSON_END` sentinel lines.

use std::io::Write;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

pub const PROGRESS_PREFIX: &str = "AMDL_PROGRESS::";
pub const JSON_START: &str = "AMDL_JSON_START";
pub const JSON_END: &str = "AMDL_JSON_END";

/// Which download path a track takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Runner {
    #[serde(rename = "decrypt-socket")]
    DecryptSocket,
    #[serde(rename = "cdm")]
    Cdm,
}

/// Typed progress records; field names are wire-exact.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProgressRecord {
    #[serde(rename = "probe_start")]
    ProbeStart { total: usize },

    #[serde(rename = "probe_progress")]
    ProbeProgress { current: usize, total: usize },

    /// Pre-download stream announcement; note the compact field spelling.
    #[serde(rename = "trackstream")]
    TrackStream {
        tracknum: u32,
        totaltracks: u32,
        name: String,
        streamgroup: String,
    },

    #[serde(rename = "track_start")]
    TrackStart {
        track_num: u32,
        total_tracks: u32,
        name: String,
        codec: String,
        runner: Runner,
        total_bytes: i64,
        #[serde(rename = "isUserPlaylist", skip_serializing_if = "Option::is_none")]
        is_user_playlist: Option<bool>,
    },

    /// Music-video stream announcement.
    #[serde(rename = "track_stream")]
    TrackStreamMv {
        track_num: u32,
        total_tracks: u32,
        name: String,
        stream_group: String,
    },

    #[serde(rename = "size")]
    Size { total_bytes: i64 },

    #[serde(rename = "bytes")]
    Bytes {
        downloaded_bytes: i64,
        total_bytes: i64,
    },

    #[serde(rename = "track_progress")]
    TrackProgress {
        track_num: u32,
        total_tracks: u32,
        name: String,
        percent: u32,
    },

    #[serde(rename = "track_complete")]
    TrackComplete {
        track_num: u32,
        total_tracks: u32,
        name: String,
    },

    #[serde(rename = "track_skip")]
    TrackSkip { name: String, reason: String },
}

/// Serializing writer for the progress protocol.
pub struct ProgressEmitter {
    out: Box<dyn Write + Send>,
    last_flush: Instant,
}

impl ProgressEmitter {
    const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            last_flush: Instant::now() - Self::FLUSH_INTERVAL,
        }
    }

    fn write_record(&mut self, record: &ProgressRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize progress record");
                return;
            }
        };
        if let Err(e) = writeln!(self.out, "{PROGRESS_PREFIX}{json}") {
            warn!(error = %e, "failed to write progress record");
        }
    }

    /// Emit with a forced flush; use at phase boundaries.
    pub fn emit(&mut self, record: &ProgressRecord) {
        self.write_record(record);
        self.flush();
    }

    /// Emit with at most one flush per second; use inside download loops.
    pub fn emit_throttled(&mut self, record: &ProgressRecord) {
        self.write_record(record);
        if self.last_flush.elapsed() >= Self::FLUSH_INTERVAL {
            self.flush();
        }
    }

    /// Print one JSON document bracketed by the sentinel lines.
    pub fn emit_json_document(&mut self, document: &serde_json::Value) {
        let _ = writeln!(self.out, "{JSON_START}");
        let _ = writeln!(self.out, "{document}");
        let _ = writeln!(self.out, "{JSON_END}");
        self.flush();
    }

    pub fn flush(&mut self) {
        if self.out.flush().is_ok() {
            self.last_flush = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(records: &[ProgressRecord]) -> String {
        let buf = SharedBuf::default();
        let mut emitter = ProgressEmitter::new(Box::new(buf.clone()));
        for record in records {
            emitter.emit(record);
        }
        String::from_utf8(buf.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_trackstream_uses_compact_field_names() {
        let out = capture(&[ProgressRecord::TrackStream {
            tracknum: 2,
            totaltracks: 9,
            name: "Song".into(),
            streamgroup: "audio-alac-stereo-48000-24".into(),
        }]);
        assert_eq!(
            out,
            "AMDL_PROGRESS::{\"type\":\"trackstream\",\"tracknum\":2,\"totaltracks\":9,\
             \"name\":\"Song\",\"streamgroup\":\"audio-alac-stereo-48000-24\"}\n"
        );
    }

    #[test]
    fn test_track_start_omits_absent_playlist_flag() {
        let out = capture(&[ProgressRecord::TrackStart {
            track_num: 1,
            total_tracks: 1,
            name: "Song".into(),
            codec: "ALAC".into(),
            runner: Runner::DecryptSocket,
            total_bytes: 1024,
            is_user_playlist: None,
        }]);
        assert!(out.contains("\"runner\":\"decrypt-socket\""));
        assert!(!out.contains("isUserPlaylist"));
    }

    #[test]
    fn test_track_start_carries_playlist_flag() {
        let out = capture(&[ProgressRecord::TrackStart {
            track_num: 1,
            total_tracks: 3,
            name: "Song".into(),
            codec: "AAC".into(),
            runner: Runner::Cdm,
            total_bytes: 0,
            is_user_playlist: Some(true),
        }]);
        assert!(out.contains("\"isUserPlaylist\":true"));
        assert!(out.contains("\"runner\":\"cdm\""));
    }

    #[test]
    fn test_one_record_per_line() {
        let out = capture(&[
            ProgressRecord::ProbeStart { total: 4 },
            ProgressRecord::ProbeProgress { current: 1, total: 4 },
            ProgressRecord::TrackSkip {
                name: "Song".into(),
                reason: "Not available in ALAC".into(),
            },
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.starts_with(PROGRESS_PREFIX)));
        assert!(lines[2].contains("\"type\":\"track_skip\""));
    }

    #[test]
    fn test_json_document_sentinels() {
        let buf = SharedBuf::default();
        let mut emitter = ProgressEmitter::new(Box::new(buf.clone()));
        emitter.emit_json_document(&serde_json::json!({"ok": true}));
        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "AMDL_JSON_START\n{\"ok\":true}\nAMDL_JSON_END\n");
    }
}
