use thiserror::Error;

/// Upstream market source failures. Always recovered inside the source by
/// logging and yielding an empty result.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode upstream page: {0}")]
    Decode(String),
}

/// Errors surfaced to callers of the tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// A user-initiated refresh found no crypto markets upstream.
    #[error("failed to fetch data: upstream returned no crypto markets")]
    RefreshFailed,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid upstream base URL {url}: {source}")]
    InvalidUpstreamUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
