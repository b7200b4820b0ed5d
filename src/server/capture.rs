use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captures a fixed-length clip from the camera
#[async_trait]
pub trait ClipRecorder: Send + Sync {
    /// Write `duration` of camera footage to `output`
    async fn record(&self, output: &Path, duration: Duration) -> Result<()>;
}

/// Records the camera's MJPEG stream with an `ffmpeg` child process
pub struct FfmpegRecorder {
    ffmpeg_path: String,
    stream_url: String,
}

impl FfmpegRecorder {
    pub fn new(ffmpeg_path: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            stream_url: stream_url.into(),
        }
    }
}

#[async_trait]
impl ClipRecorder for FfmpegRecorder {
    async fn record(&self, output: &Path, duration: Duration) -> Result<()> {
        tracing::info!(
            "Recording {}s of {} to {:?}",
            duration.as_secs(),
            self.stream_url,
            output
        );

        let child = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(&self.stream_url)
            .arg("-t")
            .arg(duration.as_secs().to_string())
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.ffmpeg_path))?;

        let result = child
            .wait_with_output()
            .await
            .context("Failed to wait on ffmpeg")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.trim().lines().last().unwrap_or_default();
            anyhow::bail!("ffmpeg exited with {}: {}", result.status, last_line);
        }

        Ok(())
    }
}

/// Record `<name>.mp4` into `dir`, keeping it only if the capture succeeds
///
/// A recorder still running `grace` after the clip should have ended is
/// abandoned and the capture fails.
pub async fn capture_clip(
    recorder: &dyn ClipRecorder,
    dir: &Path,
    name: &str,
    duration: Duration,
    grace: Duration,
) -> Result<PathBuf> {
    let temp_file = tempfile::Builder::new()
        .prefix("fireguard-")
        .suffix(".mp4")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;

    let limit = duration + grace;
    tokio::time::timeout(limit, recorder.record(temp_file.path(), duration))
        .await
        .map_err(|_| anyhow::anyhow!("Capture did not finish within {}s", limit.as_secs()))??;

    let clip = dir.join(format!("{}.mp4", name));
    temp_file
        .persist(&clip)
        .with_context(|| format!("Failed to keep clip at {:?}", clip))?;

    Ok(clip)
}
