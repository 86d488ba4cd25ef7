//! `.torrent` descriptor parsing
//!
//! Descriptors fetched over HTTP are decoded before they reach the engine so
//! that an HTML error page or a truncated download is reported as a bad
//! descriptor instead of an opaque engine failure.

use anyhow::{Context, Result};
use serde::Deserialize;

/// The parts of a descriptor the library cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSummary {
    /// Torrent name: the file name (single-file) or directory name (multi-file)
    pub name: String,
    pub total_size: u64,
    pub file_count: usize,
}

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    length: u64,
}

#[derive(Debug, Deserialize)]
struct DescriptorInfo {
    name: String,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    files: Option<Vec<DescriptorFile>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    info: DescriptorInfo,
}

/// Decode a bencoded descriptor
pub fn parse_descriptor(bytes: &[u8]) -> Result<DescriptorSummary> {
    let descriptor: Descriptor =
        serde_bencode::from_bytes(bytes).context("Failed to parse torrent descriptor")?;
    let info = descriptor.info;

    let (total_size, file_count) = match (&info.files, info.length) {
        (Some(files), _) => (files.iter().map(|f| f.length).sum(), files.len()),
        (None, Some(length)) => (length, 1),
        (None, None) => anyhow::bail!("Torrent descriptor lists no files"),
    };

    if info.name.trim().is_empty() {
        anyhow::bail!("Torrent descriptor has an empty name");
    }

    Ok(DescriptorSummary {
        name: info.name,
        total_size,
        file_count,
    })
}
