//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (for generating URLs)
    pub host: Option<String>,

    /// Server port
    pub port: u16,

    /// Library root: torrent downloads land here and `/video/{key}` resolves under it
    pub library_path: PathBuf,

    /// JSON file holding the movie records
    pub library_file: PathBuf,

    /// Session/state directory path (for DHT, resume data)
    pub session_path: PathBuf,

    /// Directory served as the static fallback (index page, placeholder poster)
    pub static_dir: PathBuf,

    /// Poster URL used whenever a lookup is unavailable or fails
    pub poster_placeholder: String,

    /// TMDB API key
    pub tmdb_api_key: Option<String>,

    /// yt-dlp executable used for hosted-video links
    pub ytdlp_path: String,

    /// Seconds between progress monitor cycles
    pub monitor_interval: Duration,

    /// Download fraction after which a buffering torrent may be streamed
    pub buffer_threshold: f64,

    /// How long an add request waits for torrent metadata before answering
    pub metadata_timeout: Duration,

    /// How long a background resolution keeps waiting before the record fails
    pub metadata_give_up: Duration,

    /// Enable DHT for torrent discovery
    pub torrent_enable_dht: bool,

    /// Listen port for incoming torrent connections (0 = random)
    pub torrent_listen_port: u16,

    /// Emit JSON log lines (false = human readable)
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let library_path = lookup("LIBRARY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_library_path);

        let library_file = lookup("LIBRARY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| library_path.join("movies.json"));

        let session_path = lookup("SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| library_path.join(".session"));

        let buffer_threshold: f64 = lookup("BUFFER_THRESHOLD")
            .unwrap_or_else(|| "0.05".to_string())
            .parse()
            .context("Invalid BUFFER_THRESHOLD")?;
        if !(0.0..1.0).contains(&buffer_threshold) {
            anyhow::bail!("BUFFER_THRESHOLD must be in [0, 1), got {}", buffer_threshold);
        }

        // The engine takes a half-open port range, so 65535 cannot be expressed
        let torrent_listen_port: u16 = lookup("TORRENT_LISTEN_PORT")
            .unwrap_or_else(|| "6881".to_string())
            .parse()
            .context("Invalid TORRENT_LISTEN_PORT")?;
        if torrent_listen_port == u16::MAX {
            anyhow::bail!("TORRENT_LISTEN_PORT must be below {}", u16::MAX);
        }

        Ok(Self {
            host: lookup("HOST"),

            port: lookup("PORT")
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .context("Invalid PORT")?,

            library_path,
            library_file,
            session_path,

            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./static")),

            poster_placeholder: lookup("POSTER_PLACEHOLDER")
                .unwrap_or_else(|| "/static/placeholder.png".to_string()),

            tmdb_api_key: lookup("TMDB_API_KEY").filter(|k| !k.trim().is_empty()),

            ytdlp_path: lookup("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),

            monitor_interval: Duration::from_secs(
                lookup("MONITOR_INTERVAL_SECS")
                    .unwrap_or_else(|| "5".to_string())
                    .parse::<u64>()
                    .context("Invalid MONITOR_INTERVAL_SECS")?
                    .max(1),
            ),

            buffer_threshold,

            metadata_timeout: Duration::from_secs(
                lookup("METADATA_TIMEOUT_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("Invalid METADATA_TIMEOUT_SECS")?,
            ),

            metadata_give_up: Duration::from_secs(
                lookup("METADATA_GIVE_UP_SECS")
                    .unwrap_or_else(|| "1800".to_string())
                    .parse()
                    .context("Invalid METADATA_GIVE_UP_SECS")?,
            ),

            torrent_enable_dht: lookup("TORRENT_ENABLE_DHT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            torrent_listen_port,

            log_json: lookup("LOG_FORMAT")
                .map(|v| !v.eq_ignore_ascii_case("pretty"))
                .unwrap_or(true),
        })
    }
}

fn default_library_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ott_movies")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("LIBRARY_PATH", "/srv/movies")]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.library_file, PathBuf::from("/srv/movies/movies.json"));
        assert_eq!(config.session_path, PathBuf::from("/srv/movies/.session"));
        assert_eq!(config.monitor_interval, Duration::from_secs(5));
        assert_eq!(config.buffer_threshold, 0.05);
        assert_eq!(config.poster_placeholder, "/static/placeholder.png");
        assert!(config.tmdb_api_key.is_none());
        assert!(config.torrent_enable_dht);
        assert!(config.log_json);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("LIBRARY_FILE", "/tmp/lib.json"),
            ("TMDB_API_KEY", "abc"),
            ("TORRENT_ENABLE_DHT", "0"),
            ("LOG_FORMAT", "pretty"),
            ("MONITOR_INTERVAL_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.library_file, PathBuf::from("/tmp/lib.json"));
        assert_eq!(config.tmdb_api_key.as_deref(), Some("abc"));
        assert!(!config.torrent_enable_dht);
        assert!(!config.log_json);
        // Zero would spin the monitor
        assert_eq!(config.monitor_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "not-a-port")]).is_err());
        assert!(config_from(&[("BUFFER_THRESHOLD", "1.5")]).is_err());
        assert!(config_from(&[("BUFFER_THRESHOLD", "abc")]).is_err());
    }

    #[test]
    fn test_listen_port_is_validated() {
        for bad in ["torrent", "70000", "65535"] {
            let err = config_from(&[("TORRENT_LISTEN_PORT", bad)]).unwrap_err();
            assert!(err.to_string().contains("TORRENT_LISTEN_PORT"), "{}: {}", bad, err);
        }
        assert_eq!(config_from(&[("TORRENT_LISTEN_PORT", "0")]).unwrap().torrent_listen_port, 0);
        assert_eq!(config_from(&[("TORRENT_LISTEN_PORT", "65534")]).unwrap().torrent_listen_port, 65534);
    }

    #[test]
    fn test_blank_tmdb_key_is_ignored() {
        let config = config_from(&[("TMDB_API_KEY", "  ")]).unwrap();
        assert!(config.tmdb_api_key.is_none());
    }
}
