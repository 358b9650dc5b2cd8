//! Video fetch via the downloader CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{classify_downloader_stderr, MediaError, Result};

/// Strip everything outside `[A-Za-z0-9_-]` from a filesystem name derived
/// from request input.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub struct Downloader {
    ytdlp_path: String,
    cookies_path: Option<String>,
    max_bytes: u64,
    max_seconds: u32,
    timeout: Duration,
}

impl Downloader {
    pub fn new(ytdlp_path: &str, cookies_path: Option<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.to_string(),
            cookies_path,
            max_bytes: 50 * 1024 * 1024,
            max_seconds: 300,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_limits(mut self, max_bytes: u64, max_seconds: u32) -> Self {
        self.max_bytes = max_bytes;
        self.max_seconds = max_seconds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command-line arguments for one fetch. Split out for testability.
    pub fn build_args(&self, url: &str, output: &Path) -> Vec<String> {
        let mut args = vec![
            "--output".to_string(),
            output.to_string_lossy().into_owned(),
            "--format".to_string(),
            "worst[ext=mp4]".to_string(),
            "--max-filesize".to_string(),
            format!("{}M", self.max_bytes / (1024 * 1024)),
            "--match-filter".to_string(),
            format!("duration <= {}", self.max_seconds),
            "--no-playlist".to_string(),
        ];
        if let Some(cookies) = &self.cookies_path {
            args.push("--cookies".to_string());
            args.push(cookies.clone());
        }
        args.push(url.to_string());
        args
    }

    /// Fetch a video into `dir` using a sanitized request-derived name.
    pub async fn download(&self, url: &str, dir: &Path, name: &str) -> Result<PathBuf> {
        let safe = sanitize_name(name);
        let output = dir.join(format!("{safe}.mp4"));
        let args = self.build_args(url, &output);

        info!(url, output = %output.display(), "Downloading video");

        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.ytdlp_path)
                .args(&args)
                .output(),
        )
        .await;

        let out = match result {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(MediaError::ToolFailed(format!("failed to launch: {e}"))),
            Err(_) => return Err(MediaError::Timeout(self.timeout.as_secs())),
        };

        let stderr = String::from_utf8_lossy(&out.stderr);
        if !out.status.success() {
            if let Some(classified) = classify_downloader_stderr(&stderr) {
                return Err(classified);
            }
            warn!(url, stderr = %stderr, "Downloader exited with error");
            return Err(MediaError::ToolFailed(
                stderr.lines().next().unwrap_or("unknown").to_string(),
            ));
        }

        // A filtered-out video (too long) exits zero without writing output.
        if !output.exists() {
            if let Some(classified) = classify_downloader_stderr(&stderr) {
                return Err(classified);
            }
            let stdout = String::from_utf8_lossy(&out.stdout);
            if let Some(classified) = classify_downloader_stderr(&stdout) {
                return Err(classified);
            }
            return Err(MediaError::LimitExceeded(
                "no output produced; video likely rejected by duration filter".to_string(),
            ));
        }

        let size = std::fs::metadata(&output)?.len();
        if size > self.max_bytes {
            std::fs::remove_file(&output).ok();
            return Err(MediaError::LimitExceeded(format!(
                "downloaded file is {size} bytes, max {}",
                self.max_bytes
            )));
        }

        info!(url, bytes = size, "Video downloaded");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_everything_unsafe() {
        assert_eq!(sanitize_name("job-123_ok"), "job-123_ok");
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("a b;c|d&e"), "abcde");
        assert_eq!(sanitize_name("🔥"), "");
    }

    #[test]
    fn build_args_carry_limits_and_flags() {
        let downloader = Downloader::new("yt-dlp", None).with_limits(50 * 1024 * 1024, 300);
        let args = downloader.build_args("https://u/reel/A", Path::new("/tmp/x.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("--format worst[ext=mp4]"));
        assert!(joined.contains("--max-filesize 50M"));
        assert!(joined.contains("--match-filter duration <= 300"));
        assert!(joined.contains("--no-playlist"));
        assert!(!joined.contains("--cookies"));
        assert_eq!(args.last().unwrap(), "https://u/reel/A");
    }

    #[test]
    fn build_args_include_cookies_when_present() {
        let downloader = Downloader::new("yt-dlp", Some("/etc/cookies.txt".to_string()));
        let args = downloader.build_args("https://u/reel/A", Path::new("/tmp/x.mp4"));
        let idx = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[idx + 1], "/etc/cookies.txt");
    }
}
