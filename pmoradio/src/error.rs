//! Error types for the radio engine

/// Result type alias for radio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scheduling or playing the radio
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration (empty catalog, bad epoch, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The time-to-track walk did not land on a track
    #[error(
        "Schedule miss: iteration {iteration}, {time_into_iteration}s into a {total_duration}s pass"
    )]
    ScheduleMiss {
        iteration: u64,
        time_into_iteration: f64,
        total_duration: f64,
    },

    /// Track cache failure (download, disk)
    #[error("Cache error: {0}")]
    Cache(#[from] pmocache::Error),

    /// Local I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or request failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Catalog document parsing failure
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Live relay process failure
    #[error("Relay error: {0}")]
    Relay(String),

    /// Track could not be made available for playback
    #[error("Track unavailable: {0}")]
    TrackUnavailable(String),
}

impl Error {
    /// Whether the error is expected to clear up on its own
    ///
    /// Configuration errors persist until the catalog or the settings change.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_errors_are_permanent() {
        assert!(!Error::Config("empty catalog".into()).is_retryable());
        assert!(Error::TrackUnavailable("abc".into()).is_retryable());
        assert!(Error::Relay("exited".into()).is_retryable());
        assert!(Error::ScheduleMiss {
            iteration: 3,
            time_into_iteration: 150.0,
            total_duration: 150.0,
        }
        .is_retryable());
    }
}
