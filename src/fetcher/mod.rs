pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

/// Outcome of a conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// Fresh content plus the validators to send next time.
    Content {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// The server reported 304; nothing to do.
    NotModified,
}

/// Network access behind a trait so refresh logic can be driven by a
/// scripted double in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult>;
}
