//! Track acquisition runners.
//!
//! Two download paths share this crate: the key-helper socket runner for
//! ALAC/Atmos audio (streaming fragmented-MP4 decryption over the framed
//! TCP protocol) and the content-key runner for lossy audio and music
//! videos (webPlayback assets decrypted by an external block-mode tool).
//! The stdout progress protocol and the external tool drivers live here
//! too, since both runners report through them.

pub mod audio;
pub mod cdm;
pub mod decrypt;
mod error;
pub mod keyhelper;
pub mod mv;
pub mod progress;
pub mod tools;
pub mod webplayback;

pub use audio::{SocketRunnerConfig, run_socket_track};
pub use cdm::{CdmHelperCommand, ContentKey, ContentKeySource, run_cdm_track};
pub use error::RipError;
pub use keyhelper::{KeyHelperSession, PREFETCH_KEY_URI};
pub use progress::{JSON_END, JSON_START, PROGRESS_PREFIX, ProgressEmitter, ProgressRecord, Runner};
pub use tools::ExternalTools;
