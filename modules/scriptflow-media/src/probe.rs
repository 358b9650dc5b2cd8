//! Duration probing via ffprobe.

use std::path::Path;
use std::time::Duration;

use crate::error::{MediaError, Result};

pub struct Prober {
    ffprobe_path: String,
    timeout: Duration,
}

impl Prober {
    pub fn new(ffprobe_path: &str) -> Self {
        Self {
            ffprobe_path: ffprobe_path.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub async fn duration_secs(&self, video: &Path) -> Result<f64> {
        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.ffprobe_path)
                .args([
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ])
                .arg(video)
                .output(),
        )
        .await;

        let out = match result {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(MediaError::Probe(format!("failed to launch ffprobe: {e}"))),
            Err(_) => return Err(MediaError::Timeout(self.timeout.as_secs())),
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(MediaError::Probe(
                stderr.lines().next().unwrap_or("ffprobe failed").to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        parse_duration(&stdout)
    }
}

fn parse_duration(raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| MediaError::Probe(format!("unparseable duration {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_seconds() {
        assert_eq!(parse_duration("14.532000\n").unwrap(), 14.532);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("").is_err());
    }
}
