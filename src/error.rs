//! Error types for the packaging pipeline.

/// Result type for packaging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building and publishing packages.
///
/// `Configuration` aborts a run before any unit starts. Every other
/// variant is scoped to the unit (or publish step) that raised it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input detected before any work starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A distribution profile cannot resolve an arch or OS-version tag.
    #[error("unsupported target for {distro}: {what}")]
    UnsupportedTarget { distro: String, what: String },

    /// Network or I/O failure while obtaining the release tarball.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Missing expected file, failed metadata checkout, or failed extraction.
    #[error("staging failed: {0}")]
    Staging(String),

    /// An external packaging tool exited non-zero.
    #[error("{tool} exited with status {status}:\n{stderr}")]
    BuildTool {
        tool: String,
        status: i32,
        stderr: String,
    },

    /// Repository index regeneration or signing failure.
    #[error("publish failed: {0}")]
    Publish(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn staging<S: Into<String>>(msg: S) -> Self {
        Self::Staging(msg.into())
    }

    pub fn publish<S: Into<String>>(msg: S) -> Self {
        Self::Publish(msg.into())
    }
}
