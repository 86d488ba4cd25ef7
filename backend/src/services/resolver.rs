//! Stream URL resolution for non-torrent sources
//!
//! Direct links stream as-is and take their title from the URL path. Hosted
//! video pages (YouTube and friends) go through yt-dlp, which reports the
//! title and a playable media URL.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use url::Url;

const YTDLP_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefer a single-file mp4 so browsers can play it without remuxing
const YTDLP_FORMAT: &str = "best[ext=mp4]/best";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub title: String,
    pub stream_url: String,
}

#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, page_url: &str) -> Result<ResolvedStream>;
}

pub struct YtDlpResolver {
    program: String,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    async fn resolve(&self, page_url: &str) -> Result<ResolvedStream> {
        let run = Command::new(&self.program)
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--get-title")
            .arg("--get-url")
            .arg("-f")
            .arg(YTDLP_FORMAT)
            .arg(page_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(YTDLP_TIMEOUT, run)
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", self.program, YTDLP_TIMEOUT))?
            .with_context(|| format!("Failed to run {}. Is yt-dlp installed?", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed: {}", self.program, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let resolved = parse_ytdlp_output(&stdout)?;
        debug!(page = %page_url, title = %resolved.title, "Resolved hosted video");
        Ok(resolved)
    }
}

/// yt-dlp prints the title line before the URL line(s)
fn parse_ytdlp_output(stdout: &str) -> Result<ResolvedStream> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next().context("yt-dlp returned no title")?;
    let stream_url = lines
        .find(|l| l.starts_with("http://") || l.starts_with("https://"))
        .context("yt-dlp returned no stream URL")?;

    Ok(ResolvedStream {
        title: title.to_string(),
        stream_url: stream_url.to_string(),
    })
}

/// Title for a direct link: the decoded last path segment, or the host when
/// the path is empty.
pub fn direct_title(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| {
            urlencoding::decode(s)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .filter(|s| !s.trim().is_empty());

    segment.unwrap_or_else(|| url.host_str().unwrap_or("Untitled").to_string())
}
