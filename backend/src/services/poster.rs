//! Poster lookup
//!
//! Every new record gets a poster URL. Lookups go to TMDB when a key is
//! configured; any failure falls back to the placeholder so ingestion never
//! fails on artwork.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::rate_limiter::{RateLimitedClient, RetryConfig, retry_async};

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v"];

#[async_trait]
pub trait PosterLookup: Send + Sync {
    /// Poster URL for `title`. Never fails; the placeholder stands in.
    async fn poster_for(&self, title: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    poster_path: Option<String>,
}

/// TMDB movie search, keeping only the first hit's poster
pub struct TmdbPosterClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: Option<String>,
    placeholder: String,
    retry_config: RetryConfig,
}

impl TmdbPosterClient {
    pub fn new(api_key: Option<String>, placeholder: impl Into<String>) -> Result<Self> {
        Self::with_base_url(TMDB_BASE_URL, api_key, placeholder)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
        placeholder: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RateLimitedClient::for_tmdb()?),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            placeholder: placeholder.into(),
            retry_config: RetryConfig {
                max_retries: 2,
                initial_interval: Duration::from_millis(250),
                ..Default::default()
            },
        })
    }

    async fn search_poster(&self, api_key: &str, title: &str) -> Result<Option<String>> {
        let query = SearchQuery::from_title(title);
        if query.text.is_empty() {
            return Ok(None);
        }

        let url = format!("{}/search/movie", self.base_url);
        let client = self.client.clone();

        let hits = retry_async(
            || {
                let url = url.clone();
                let client = client.clone();
                let mut params: Vec<(&str, String)> = vec![
                    ("api_key", api_key.to_string()),
                    ("query", query.text.clone()),
                    ("include_adult", "false".to_string()),
                ];
                if let Some(year) = query.year {
                    params.push(("year", year.to_string()));
                }
                async move {
                    let response = client.get_with_query(&url, &params).await?;

                    if response.status().as_u16() == 401 {
                        anyhow::bail!("TMDB API key is invalid");
                    }
                    if !response.status().is_success() {
                        anyhow::bail!("TMDB search failed with status: {}", response.status());
                    }

                    let body: SearchResponse = response
                        .json()
                        .await
                        .context("Failed to parse TMDB search results")?;
                    Ok(body.results)
                }
            },
            &self.retry_config,
            "tmdb_poster_search",
        )
        .await?;

        Ok(hits
            .into_iter()
            .next()
            .and_then(|hit| hit.poster_path)
            .map(|path| format!("{}{}", TMDB_IMAGE_BASE, path)))
    }
}

#[async_trait]
impl PosterLookup for TmdbPosterClient {
    async fn poster_for(&self, title: &str) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            return self.placeholder.clone();
        };

        match self.search_poster(api_key, title).await {
            Ok(Some(url)) => {
                debug!(title = %title, poster = %url, "Poster found");
                url
            }
            Ok(None) => {
                debug!(title = %title, "No poster found, using placeholder");
                self.placeholder.clone()
            }
            Err(e) => {
                warn!(title = %title, error = %e, "Poster lookup failed, using placeholder");
                self.placeholder.clone()
            }
        }
    }
}

/// Search terms derived from a record title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub year: Option<u16>,
}

impl SearchQuery {
    /// Turn a release-style name (`Big.Buck.Bunny.2008.1080p.mkv`) into search
    /// terms. Everything from the first year or quality token on is dropped.
    pub fn from_title(title: &str) -> Self {
        let stem = match title.rsplit_once('.') {
            Some((stem, ext)) if VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => {
                stem
            }
            _ => title,
        };

        let mut words = Vec::new();
        let mut year = None;
        for token in stem
            .split(|c: char| c == '.' || c == '_' || c == ' ' || c == '[' || c == ']' || c == '(' || c == ')')
            .filter(|t| !t.is_empty())
        {
            if let Some(y) = parse_year(token) {
                // A title that is only a year ("1917") keeps it as text
                if !words.is_empty() {
                    year = Some(y);
                    break;
                }
            }
            if is_quality_token(token) {
                break;
            }
            words.push(token);
        }

        Self {
            text: words.join(" "),
            year,
        }
    }
}

fn parse_year(token: &str) -> Option<u16> {
    if token.len() != 4 {
        return None;
    }
    token
        .parse::<u16>()
        .ok()
        .filter(|y| (1900..=2100).contains(y))
}

fn is_quality_token(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "480p" | "576p" | "720p" | "1080p" | "2160p" | "4k" | "bluray" | "brrip" | "bdrip"
            | "webrip" | "web-dl" | "webdl" | "hdtv" | "dvdrip" | "x264" | "x265" | "hevc"
    )
}
