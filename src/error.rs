/// Error Module
///
/// Typed errors for everything that can go wrong while fetching one block's data.
/// The pipeline catches these per block; startup and file I/O use `anyhow`.
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network failure or unreadable body
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx status other than 429
    #[error("subgraph returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Still rate limited after all retries
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// The response carried GraphQL errors and no data
    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    /// `data` (or the requested collection inside it) was absent
    #[error("no data in response for `{collection}`")]
    MissingData { collection: String },

    /// Records did not match the expected shape
    #[error("failed to decode `{collection}` records: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no USD price available for token {0}")]
    PriceUnavailable(String),
}

impl FetchError {
    /// Malformed-but-successful responses, which some adapters downgrade to "no data"
    pub fn is_missing_data(&self) -> bool {
        matches!(self, Self::MissingData { .. })
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
