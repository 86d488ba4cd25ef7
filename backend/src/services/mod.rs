//! Services behind the HTTP API

pub mod ingest;
pub mod logging;
pub mod playback;
pub mod poster;
pub mod rate_limiter;
pub mod resolver;

pub use ingest::{IngestError, IngestOutcome, IngestService, IngestSettings, SourceKind};
pub use playback::{PlaybackError, PlaybackResolver};
pub use poster::{PosterLookup, TmdbPosterClient};
pub use resolver::{StreamResolver, YtDlpResolver};
