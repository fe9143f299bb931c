pub mod document;
pub mod factory;
pub mod memory;
pub mod sqlite;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use url::Url;

use crate::app::Result;
use crate::collection::Predicate;
use crate::domain::{Article, Enclosure, Feed};

pub use document::DocumentService;
pub use factory::DataServiceFactory;
pub use memory::InMemoryService;
pub use sqlite::SqliteService;

/// Which of the two production backends (or the test double) a service
/// talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Relational,
    Document,
    Memory,
}

/// CRUD entry point for one storage backend. Everything is async;
/// callers never block on store I/O.
///
/// Two production implementations exist ([`SqliteService`] and
/// [`DocumentService`]), selected by [`DataServiceFactory`]. All call
/// sites depend only on this trait.
#[async_trait]
pub trait DataService: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Creates an empty feed row and returns the identified domain
    /// object with its lazy article collection attached.
    async fn create_feed(&self) -> Result<Feed>;

    /// Creates an empty article row. When `feed` is given, the article
    /// is handed to it via [`Feed::add_article`], which binds the
    /// back-reference in the store.
    async fn create_article(&self, feed: Option<&mut Feed>) -> Result<Article>;

    /// Creates an enclosure row, optionally attaching it to `article`.
    async fn create_enclosure(
        &self,
        article: Option<&mut Article>,
        url: Url,
        kind: &str,
    ) -> Result<Enclosure>;

    async fn all_feeds(&self) -> Result<Vec<Feed>>;
    async fn feeds_matching(&self, predicate: Predicate) -> Result<Vec<Feed>>;
    async fn articles_matching(&self, predicate: Predicate) -> Result<Vec<Article>>;

    /// Persists the feed. A clean dirty flag on an already-identified
    /// object makes this a no-op.
    async fn save_feed(&self, feed: &mut Feed) -> Result<()>;
    async fn save_article(&self, article: &mut Article) -> Result<()>;
    async fn save_enclosure(&self, enclosure: &mut Enclosure) -> Result<()>;

    async fn batch_save(&self, feeds: &mut [Feed], articles: &mut [Article]) -> Result<()> {
        for feed in feeds.iter_mut() {
            self.save_feed(feed).await?;
        }
        for article in articles.iter_mut() {
            self.save_article(article).await?;
        }
        Ok(())
    }

    async fn delete_feed(&self, feed: &Feed) -> Result<()>;
    async fn delete_article(&self, article: &Article) -> Result<()>;
    async fn delete_enclosure(&self, enclosure: &Enclosure) -> Result<()>;
}

/// An entry handed to the search index after an article save.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchItem {
    pub identifier: String,
    pub title: String,
    pub summary: String,
    pub content: String,
}

impl SearchItem {
    pub fn from_article(article: &Article) -> Self {
        Self {
            identifier: article.identifier().to_string(),
            title: article.title().to_string(),
            summary: article.summary().to_string(),
            content: article.content().to_string(),
        }
    }
}

/// Consumed full-text index capability. Invoked best-effort after
/// article saves and deletes; failures are logged and swallowed.
pub trait SearchIndex: Send + Sync {
    fn add_items(&self, items: &[SearchItem]) -> Result<()>;
    fn delete_identifiers(&self, identifiers: &[String]) -> Result<()>;
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique backend session id. Fetch controllers
/// from different sessions never compare equal, even over the same
/// file.
pub(crate) fn next_session_id() -> u64 {
    NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
}
