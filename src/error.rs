use thiserror::Error;

/// Pipeline-fatal errors. Per-asset and per-CSS-file failures are not part of
/// this taxonomy: they are recovered locally and tallied, never propagated.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("clone cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-asset download failure. Stays internal to the fetch/CSS stages; the
/// pipeline only counts these.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to write asset: {0}")]
    Io(#[from] std::io::Error),

    #[error("download cancelled")]
    Cancelled,
}
