//! Frame and audio extraction via ffmpeg.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::error::{MediaError, Result};

/// Hard cap on extracted frames regardless of duration.
pub const MAX_FRAMES: u32 = 20;
/// JPEG quality passed to `-q:v` (2 best, 31 worst).
const JPEG_QUALITY: &str = "5";
/// Output frame width; height follows the aspect ratio.
const FRAME_WIDTH: &str = "480";

/// Duration-adaptive sampling rate: short clips are sampled sparsely, longer
/// ones slightly denser, capped by `MAX_FRAMES` downstream.
pub fn sample_fps(duration_secs: f64) -> f64 {
    if duration_secs < 15.0 {
        1.0 / 3.0
    } else if duration_secs < 30.0 {
        0.5
    } else {
        0.4
    }
}

/// Frames that the chosen rate would produce, capped.
pub fn planned_frame_count(duration_secs: f64) -> u32 {
    let raw = (duration_secs * sample_fps(duration_secs)).ceil() as u32;
    raw.clamp(1, MAX_FRAMES)
}

pub struct Extractor {
    ffmpeg_path: String,
    timeout: Duration,
}

impl Extractor {
    pub fn new(ffmpeg_path: &str) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<()> {
        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.ffmpeg_path)
                .args(&args)
                .output(),
        )
        .await;

        let out = match result {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(MediaError::ToolFailed(format!("failed to launch ffmpeg: {e}"))),
            Err(_) => return Err(MediaError::Timeout(self.timeout.as_secs())),
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(MediaError::ToolFailed(
                stderr.lines().last().unwrap_or("ffmpeg failed").to_string(),
            ));
        }
        Ok(())
    }

    /// Extract JPEG frames at the duration-adaptive rate into `out_dir`.
    /// Returns paths in playback order.
    pub async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        duration_secs: f64,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let fps = sample_fps(duration_secs);
        let pattern = out_dir.join("frame_%03d.jpg");

        self.run_ffmpeg(vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!("fps={fps},scale={FRAME_WIDTH}:-1"),
            "-q:v".to_string(),
            JPEG_QUALITY.to_string(),
            "-frames:v".to_string(),
            MAX_FRAMES.to_string(),
            pattern.to_string_lossy().into_owned(),
        ])
        .await?;

        let mut frames: Vec<PathBuf> = std::fs::read_dir(out_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
            .collect();
        frames.sort();
        frames.truncate(MAX_FRAMES as usize);

        info!(video = %video.display(), frames = frames.len(), fps, "Frames extracted");
        Ok(frames)
    }

    /// Extract 16 kHz mono audio for the speech pass.
    pub async fn extract_audio(&self, video: &Path, out_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(out_dir)?;
        let audio = out_dir.join("audio.wav");

        self.run_ffmpeg(vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            audio.to_string_lossy().into_owned(),
        ])
        .await?;

        info!(video = %video.display(), audio = %audio.display(), "Audio extracted");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_rate_follows_duration_tiers() {
        assert_eq!(sample_fps(10.0), 1.0 / 3.0);
        assert_eq!(sample_fps(14.9), 1.0 / 3.0);
        assert_eq!(sample_fps(15.0), 0.5);
        assert_eq!(sample_fps(29.9), 0.5);
        assert_eq!(sample_fps(30.0), 0.4);
        assert_eq!(sample_fps(300.0), 0.4);
    }

    #[test]
    fn frame_count_is_capped_at_twenty() {
        assert_eq!(planned_frame_count(9.0), 3);
        assert_eq!(planned_frame_count(20.0), 10);
        assert_eq!(planned_frame_count(120.0), MAX_FRAMES);
        assert_eq!(planned_frame_count(300.0), MAX_FRAMES);
    }

    #[test]
    fn short_clips_still_get_a_frame() {
        assert_eq!(planned_frame_count(1.0), 1);
    }
}
