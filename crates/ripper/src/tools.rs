//! External tool drivers.
//!
//! The remuxer (`MP4Box`) stamps tag boxes and muxes the final music-video
//! file; the block-mode decryptor (`mp4decrypt`) handles Widevine-keyed
//! assets. Non-zero exits surface as `ExternalTool` errors carrying the
//! tool's stderr.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::RipError;

#[derive(Debug, Clone)]
pub struct ExternalTools {
    pub mp4box: String,
    pub mp4decrypt: String,
}

impl Default for ExternalTools {
    fn default() -> Self {
        Self {
            mp4box: "MP4Box".to_string(),
            mp4decrypt: "mp4decrypt".to_string(),
        }
    }
}

/// True when `name` resolves to an executable on `PATH`.
pub fn tool_on_path(name: &str) -> bool {
    if name.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(name).is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(name);
        #[cfg(windows)]
        let candidate = candidate.with_extension("exe");
        candidate.is_file()
    })
}

async fn run_checked(tool: &str, command: &mut Command) -> Result<(), RipError> {
    let output = command.output().await.map_err(|e| RipError::ExternalTool {
        tool: tool.to_string(),
        reason: e.to_string(),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RipError::ExternalTool {
            tool: tool.to_string(),
            reason: format!("exit {}: {}", output.status, stderr.trim()),
        });
    }
    Ok(())
}

impl ExternalTools {
    /// Stamp iTunes-style tag boxes onto an existing file in place.
    pub async fn stamp_tags(&self, target: &Path, itags: &str) -> Result<(), RipError> {
        debug!(target = %target.display(), "stamping tags");
        run_checked(
            &self.mp4box,
            Command::new(&self.mp4box).arg("-itags").arg(itags).arg(target),
        )
        .await
    }

    /// Decrypt a Widevine-keyed file with `--key <keyid:key>`.
    pub async fn decrypt_file(
        &self,
        key: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), RipError> {
        debug!(output = %output.display(), "running block-mode decryptor");
        run_checked(
            &self.mp4decrypt,
            Command::new(&self.mp4decrypt)
                .arg("--key")
                .arg(key)
                .arg(input)
                .arg(output),
        )
        .await
    }

    /// Remux video + audio into the final MV file, ticking `on_percent`
    /// once per second with a 90→99 clamped progress value until the
    /// remuxer exits.
    pub async fn remux_mv(
        &self,
        itags: &str,
        video: &Path,
        audio: &Path,
        output: &Path,
        mut on_percent: impl FnMut(u32),
    ) -> Result<(), RipError> {
        let mut child = Command::new(&self.mp4box)
            .arg("-itags")
            .arg(itags)
            .arg("-quiet")
            .arg("-add")
            .arg(video)
            .arg("-add")
            .arg(audio)
            .arg("-keep-utc")
            .arg("-new")
            .arg(output)
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RipError::ExternalTool {
                tool: self.mp4box.clone(),
                reason: e.to_string(),
            })?;

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await; // first tick is immediate
        let mut percent = 90u32;
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| RipError::ExternalTool {
                        tool: self.mp4box.clone(),
                        reason: e.to_string(),
                    })?;
                }
                _ = ticker.tick() => {
                    percent = (percent + 1).min(99);
                    on_percent(percent);
                }
            }
        };

        if !status.success() {
            return Err(RipError::ExternalTool {
                tool: self.mp4box.clone(),
                reason: format!("exit {status}"),
            });
        }
        info!(output = %output.display(), "remux complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_is_external_tool_error() {
        let tools = ExternalTools {
            mp4box: "/nonexistent/MP4Box".to_string(),
            mp4decrypt: "/nonexistent/mp4decrypt".to_string(),
        };
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.m4a");
        std::fs::write(&file, b"x").unwrap();

        let err = tools.stamp_tags(&file, "tool=").await.unwrap_err();
        assert!(matches!(err, RipError::ExternalTool { .. }));

        let err = tools
            .decrypt_file("0:0", &file, &dir.path().join("b.m4a"))
            .await
            .unwrap_err();
        assert!(matches!(err, RipError::ExternalTool { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remux_surfaces_exit_status() {
        // Stand-in remuxers that ignore their arguments.
        let ok = ExternalTools {
            mp4box: "true".to_string(),
            mp4decrypt: "mp4decrypt".to_string(),
        };
        let mut ticks = Vec::new();
        ok.remux_mv("tool=", Path::new("v"), Path::new("a"), Path::new("o"), |p| {
            ticks.push(p);
        })
        .await
        .unwrap();
        assert!(ticks.iter().all(|&p| (90..=99).contains(&p)));

        let failing = ExternalTools {
            mp4box: "false".to_string(),
            mp4decrypt: "mp4decrypt".to_string(),
        };
        let err = failing
            .remux_mv("tool=", Path::new("v"), Path::new("a"), Path::new("o"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RipError::ExternalTool { .. }));
    }

    #[test]
    fn test_tool_on_path() {
        assert!(!tool_on_path("definitely-not-a-real-tool-name"));
    }
}
