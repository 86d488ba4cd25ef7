//! The persisted movie library: records, their status machine, and the JSON store

pub mod record;
pub mod status;
pub mod store;

pub use record::{Advance, MovieRecord};
pub use status::{DEFAULT_BUFFER_THRESHOLD, MovieStatus};
pub use store::{LibraryStore, StoreError};

/// A direct link is a duplicate when its URL is already being streamed
pub fn has_stream_url(records: &[MovieRecord], url: &str) -> bool {
    records.iter().any(|r| r.stream_url.as_deref() == Some(url))
}

pub fn has_title(records: &[MovieRecord], title: &str) -> bool {
    records.iter().any(|r| r.title == title)
}

pub fn has_source_url(records: &[MovieRecord], url: &str) -> bool {
    records.iter().any(|r| r.source_url.as_deref() == Some(url))
}

/// A torrent name is taken when any record uses it as title or filename
pub fn has_torrent_name(records: &[MovieRecord], name: &str) -> bool {
    records
        .iter()
        .any(|r| r.title == name || r.filename.as_deref() == Some(name))
}
