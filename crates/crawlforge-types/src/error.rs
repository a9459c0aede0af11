//! Unified error type for the crawling engine.
//!
//! Component-local error enums (`FetchError`, `StoreError`, `ExtractError`)
//! live next to the code that produces them and convert into `CrawlError`
//! at the Scheduler boundary, the same layering the teacher uses between
//! its crate-level errors and `RiptideError`.

use thiserror::Error;

/// Result type alias using [`CrawlError`].
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Top-level error type surfaced by the Scheduler, Rotation Manager, and
/// Monitoring API.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// A single-URL fetch failed. Never aborts a batch on its own.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// HTML extraction failed in a way that still produces a storable Page.
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Robots.txt lookup failed outside the fail-open window.
    #[error("robots error: {0}")]
    Robots(String),

    /// All configured databases are at or above the rotation usage cap.
    #[error("no capacity: all databases at or above usage threshold")]
    NoCapacity,

    /// Startup configuration is invalid; the process must exit before any
    /// work is attempted.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Not a failure — drives the Drain path.
    #[error("shutdown requested")]
    ShutdownRequested,

    /// Catch-all for I/O and serialization errors that don't fit a more
    /// specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CrawlError {
    /// True when this error should abort the current batch and leave
    /// `current_page` unchanged, per §4.6/§7.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            CrawlError::NoCapacity | CrawlError::Store(StoreError::Permanent(_))
        )
    }
}

/// Per-URL fetch failure kinds (§4.4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("http error {0}")]
    HttpError(u16),
    #[error("too many redirects (> {0})")]
    TooManyRedirects(usize),
    #[error("denied by robots.txt")]
    RobotsDenied,
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this kind is eligible for retry under §4.4's policy
    /// (Timeout/DNS/5xx get `max_attempts` total, default 3; 408/429 retry
    /// once; other 4xx never retry).
    pub fn is_retryable(&self, attempts_so_far: u32, max_attempts: u32) -> bool {
        match self {
            FetchError::Timeout | FetchError::Dns(_) => attempts_so_far < max_attempts,
            FetchError::HttpError(status) if (500..600).contains(status) => attempts_so_far < max_attempts,
            FetchError::HttpError(408) | FetchError::HttpError(429) => attempts_so_far == 0,
            _ => false,
        }
    }
}

/// Extraction failures (§4.5, §7). Malformed HTML or oversize bodies are
/// still counted as a crawl success — the Page is stored with empty text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("malformed html: {0}")]
    Malformed(String),
    #[error("body exceeds maximum size ({0} bytes)")]
    Oversize(usize),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// Store failure kinds (§4.1, §7). `Transient` triggers retry+rotation;
/// `Permanent` aborts the batch with no progress increment.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("permanent store error: {0}")]
    Permanent(String),
}
