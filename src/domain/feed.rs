use url::Url;

use crate::collection::{Matches, Predicate, StoreBackedArray, TextField};
use crate::domain::{Article, StoreId};

/// A subscribed feed, or a query feed synthesizing its articles from a
/// stored expression.
///
/// Every value-changing setter flips the `updated` dirty flag; the save
/// path skips objects whose flag is clear. Identity (`feed_id`) is
/// assigned once by a backend and is then the sole basis of equality.
#[derive(Debug, Clone)]
pub struct Feed {
    feed_id: Option<StoreId>,
    title: String,
    url: Option<Url>,
    summary: String,
    query: Option<String>,
    tags: Vec<String>,
    wait_period: u32,
    remaining_wait: u32,
    image: Option<Vec<u8>>,
    etag: Option<String>,
    last_modified: Option<String>,
    articles: StoreBackedArray<Article>,
    updated: bool,
}

impl Feed {
    /// A synthesized, identity-less feed.
    pub fn new() -> Self {
        Self {
            feed_id: None,
            title: String::new(),
            url: None,
            summary: String::new(),
            query: None,
            tags: Vec::new(),
            wait_period: 0,
            remaining_wait: 0,
            image: None,
            etag: None,
            last_modified: None,
            articles: StoreBackedArray::new(),
            updated: false,
        }
    }

    pub fn feed_id(&self) -> Option<&StoreId> {
        self.feed_id.as_ref()
    }

    pub(crate) fn assign_id(&mut self, id: StoreId) {
        debug_assert!(self.feed_id.is_none(), "feed identity is immutable");
        self.feed_id = Some(id);
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        if title != self.title {
            self.title = title;
            self.updated = true;
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            self.url.as_ref().map(|u| u.as_str()).unwrap_or("")
        } else {
            &self.title
        }
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn set_url(&mut self, url: Option<Url>) {
        if url != self.url {
            self.url = url;
            self.updated = true;
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        if summary != self.summary {
            self.summary = summary;
            self.updated = true;
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn set_query(&mut self, query: Option<String>) {
        if query != self.query {
            self.query = query;
            self.updated = true;
        }
    }

    /// A query feed stores a boolean expression instead of a URL; its
    /// articles are computed at read time, never persisted.
    pub fn is_query_feed(&self) -> bool {
        self.query.is_some()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.updated = true;
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        if let Some(idx) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(idx);
            self.updated = true;
        }
    }

    /// Consecutive-failure counter driving the refresh backoff.
    pub fn wait_period(&self) -> u32 {
        self.wait_period
    }

    pub fn set_wait_period(&mut self, wait_period: u32) {
        if wait_period != self.wait_period {
            self.wait_period = wait_period;
            self.updated = true;
        }
    }

    /// Refresh cycles to skip before this feed is retried.
    pub fn remaining_wait(&self) -> u32 {
        self.remaining_wait
    }

    pub fn set_remaining_wait(&mut self, remaining_wait: u32) {
        if remaining_wait != self.remaining_wait {
            self.remaining_wait = remaining_wait;
            self.updated = true;
        }
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    pub fn set_image(&mut self, image: Option<Vec<u8>>) {
        if image != self.image {
            self.image = image;
            self.updated = true;
        }
    }

    /// HTTP validator from the last successful fetch.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        if etag != self.etag {
            self.etag = etag;
            self.updated = true;
        }
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    pub fn set_last_modified(&mut self, last_modified: Option<String>) {
        if last_modified != self.last_modified {
            self.last_modified = last_modified;
            self.updated = true;
        }
    }

    pub fn articles(&self) -> StoreBackedArray<Article> {
        self.articles.clone()
    }

    pub(crate) fn set_articles(&mut self, articles: StoreBackedArray<Article>) {
        self.articles = articles;
    }

    /// Takes ownership of `article`, removing it from any previous
    /// owner's collection via the back-reference maintained here. Query
    /// feeds list the article but never take ownership.
    pub fn add_article(&mut self, article: &mut Article) {
        if self.articles.contains(article) {
            return;
        }
        if !self.is_query_feed() {
            // Reassignment evicts the article from its previous owner's
            // collection; the handle shares state with that feed's
            // array clones.
            if let Some(previous) = article.take_owner() {
                previous.remove(article);
            }
            article.set_feed_id(self.feed_id.clone());
            article.set_owner(self.articles.clone());
            self.updated = true;
        }
        // The listed copy must not point back at the collection that
        // holds it.
        let mut listed = article.clone();
        listed.clear_owner();
        self.articles.append(listed);
    }

    pub fn remove_article(&mut self, article: &mut Article) {
        if self.articles.remove(article) {
            if !self.is_query_feed() {
                article.set_feed_id(None);
                article.clear_owner();
            }
            self.updated = true;
        }
    }

    pub fn unread_articles(&self) -> StoreBackedArray<Article> {
        self.articles.filter_with_predicate(Predicate::Read(false))
    }

    pub fn unread_count(&self) -> usize {
        self.unread_articles().count()
    }

    pub fn updated(&self) -> bool {
        self.updated
    }

    pub(crate) fn mark_clean(&mut self) {
        self.updated = false;
    }
}

impl Default for Feed {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Feed {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.feed_id, &other.feed_id) {
            return a == b;
        }
        self.title == other.title
            && self.url == other.url
            && self.summary == other.summary
            && self.query == other.query
            && self.tags == other.tags
    }
}

impl Matches for Feed {
    fn matches(&self, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::All => true,
            Predicate::FeedId(id) => self.feed_id.as_ref() == Some(id),
            Predicate::HasTags => !self.tags.is_empty(),
            Predicate::UrlEquals(url) => {
                self.url.as_ref().map(|u| u.as_str()) == Some(url.as_str())
            }
            Predicate::TextContains { fields, needle } => {
                let needle = needle.to_lowercase();
                fields.iter().any(|field| match field {
                    TextField::Title => self.title.to_lowercase().contains(&needle),
                    TextField::Summary => self.summary.to_lowercase().contains(&needle),
                    TextField::Content => false,
                })
            }
            Predicate::And(a, b) => self.matches(a) && self.matches(b),
            Predicate::Or(a, b) => self.matches(a) || self.matches(b),
            Predicate::ArticleId(_) | Predicate::Identifier(_) | Predicate::Read(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_flip_dirty_flag() {
        let mut feed = Feed::new();
        assert!(!feed.updated());

        feed.set_title("Rust Blog");
        assert!(feed.updated());

        feed.mark_clean();
        feed.set_title("Rust Blog");
        assert!(!feed.updated(), "no-op write must not dirty the feed");
    }

    #[test]
    fn test_tag_tracking() {
        let mut feed = Feed::new();
        feed.add_tag("rust");
        assert!(feed.updated());
        assert_eq!(feed.tags(), ["rust"]);

        feed.mark_clean();
        feed.add_tag("rust");
        assert!(!feed.updated());

        feed.remove_tag("rust");
        assert!(feed.updated());
        assert!(feed.tags().is_empty());
    }

    #[test]
    fn test_identity_equality_wins() {
        let mut a = Feed::new();
        a.set_title("one");
        a.assign_id(StoreId::Relational(1));

        let mut b = Feed::new();
        b.set_title("completely different");
        b.assign_id(StoreId::Relational(1));

        assert_eq!(a, b);

        let mut c = Feed::new();
        c.set_title("one");
        c.assign_id(StoreId::Relational(2));
        assert_ne!(a, c);
    }

    #[test]
    fn test_structural_equality_without_identity() {
        let mut a = Feed::new();
        a.set_title("one");
        let mut b = Feed::new();
        b.set_title("one");
        assert_eq!(a, b);

        b.set_title("two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_article_sets_back_reference() {
        let mut feed = Feed::new();
        feed.assign_id(StoreId::Relational(4));

        let mut article = Article::new();
        feed.add_article(&mut article);

        assert_eq!(article.feed_id(), Some(&StoreId::Relational(4)));
        assert_eq!(feed.articles().count(), 1);
    }

    #[test]
    fn test_reassignment_moves_article_between_feeds() {
        let mut first = Feed::new();
        first.assign_id(StoreId::Relational(1));
        let mut second = Feed::new();
        second.assign_id(StoreId::Relational(2));

        let mut article = Article::new();
        article.assign_id(StoreId::Relational(10));
        first.add_article(&mut article);
        assert_eq!(first.articles().count(), 1);

        second.add_article(&mut article);
        assert_eq!(article.feed_id(), Some(&StoreId::Relational(2)));
        assert_eq!(
            first.articles().count(),
            0,
            "previous owner must no longer list the article"
        );
        assert_eq!(second.articles().count(), 1);
    }

    #[test]
    fn test_query_feed_never_takes_ownership() {
        let mut owner = Feed::new();
        owner.assign_id(StoreId::Relational(1));
        let mut article = Article::new();
        owner.add_article(&mut article);

        let mut query_feed = Feed::new();
        query_feed.set_query(Some("read == false".into()));
        query_feed.mark_clean();
        query_feed.add_article(&mut article);

        assert_eq!(article.feed_id(), Some(&StoreId::Relational(1)));
        assert!(!query_feed.updated());
        assert_eq!(query_feed.articles().count(), 1);
    }

    #[test]
    fn test_remove_article_clears_back_reference() {
        let mut feed = Feed::new();
        feed.assign_id(StoreId::Relational(4));
        let mut article = Article::new();
        feed.add_article(&mut article);

        feed.remove_article(&mut article);
        assert_eq!(article.feed_id(), None);
        assert!(feed.articles().is_empty());
    }

    #[test]
    fn test_display_title_falls_back_to_url() {
        let mut feed = Feed::new();
        feed.set_url(Some(Url::parse("https://example.com/feed.xml").unwrap()));
        assert_eq!(feed.display_title(), "https://example.com/feed.xml");

        feed.set_title("Example");
        assert_eq!(feed.display_title(), "Example");
    }

    #[test]
    fn test_unread_count() {
        let mut feed = Feed::new();
        let mut read = Article::new();
        read.set_read(true);
        let unread = Article::new();
        feed.add_article(&mut read.clone());
        feed.add_article(&mut unread.clone());
        assert_eq!(feed.unread_count(), 1);
    }
}
