use chrono::{DateTime, Utc};
use url::Url;

use crate::collection::{Matches, Predicate, StoreBackedArray, TextField};
use crate::domain::{Author, Enclosure, StoreId};

/// A single feed entry.
///
/// Owned by exactly one feed at a time; `feed_id` is a non-owning key
/// back into the owning collection, maintained by
/// [`Feed::add_article`](crate::domain::Feed::add_article) and
/// [`Feed::remove_article`](crate::domain::Feed::remove_article).
#[derive(Debug, Clone)]
pub struct Article {
    article_id: Option<StoreId>,
    title: String,
    link: Option<Url>,
    summary: String,
    authors: Vec<Author>,
    published: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    /// Stable external identifier from the source feed, used for upsert
    /// deduplication.
    identifier: String,
    content: String,
    read: bool,
    estimated_reading_time: u32,
    feed_id: Option<StoreId>,
    flags: Vec<String>,
    enclosures: StoreBackedArray<Enclosure>,
    /// Handle on the owning feed's article collection, kept so a
    /// reassignment can evict the article from its previous owner.
    /// Excluded from equality.
    owner: Option<StoreBackedArray<Article>>,
    updated: bool,
}

impl Article {
    pub fn new() -> Self {
        Self {
            article_id: None,
            title: String::new(),
            link: None,
            summary: String::new(),
            authors: Vec::new(),
            published: Utc::now(),
            updated_at: None,
            identifier: String::new(),
            content: String::new(),
            read: false,
            estimated_reading_time: 0,
            feed_id: None,
            flags: Vec::new(),
            enclosures: StoreBackedArray::new(),
            owner: None,
            updated: false,
        }
    }

    pub fn article_id(&self) -> Option<&StoreId> {
        self.article_id.as_ref()
    }

    pub(crate) fn assign_id(&mut self, id: StoreId) {
        debug_assert!(self.article_id.is_none(), "article identity is immutable");
        self.article_id = Some(id);
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

    pub fn link(&self) -> Option<&Url> {
        self.link.as_ref()
    }

    pub fn set_link(&mut self, link: Option<Url>) {
        if link != self.link {
            self.link = link;
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

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub fn set_authors(&mut self, authors: Vec<Author>) {
        if authors != self.authors {
            self.authors = authors;
            self.updated = true;
        }
    }

    /// All authors joined for display, `"A <a@b>, C"`.
    pub fn display_authors(&self) -> String {
        self.authors
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn published(&self) -> DateTime<Utc> {
        self.published
    }

    pub fn set_published(&mut self, published: DateTime<Utc>) {
        if published != self.published {
            self.published = published;
            self.updated = true;
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn set_updated_at(&mut self, updated_at: Option<DateTime<Utc>>) {
        if updated_at != self.updated_at {
            self.updated_at = updated_at;
            self.updated = true;
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        let identifier = identifier.into();
        if identifier != self.identifier {
            self.identifier = identifier;
            self.updated = true;
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        let content = content.into();
        if content != self.content {
            self.content = content;
            self.updated = true;
        }
    }

    pub fn read(&self) -> bool {
        self.read
    }

    pub fn set_read(&mut self, read: bool) {
        if read != self.read {
            self.read = read;
            self.updated = true;
        }
    }

    /// Derived from content, cached on the object and in the store.
    pub fn estimated_reading_time(&self) -> u32 {
        self.estimated_reading_time
    }

    pub fn set_estimated_reading_time(&mut self, minutes: u32) {
        if minutes != self.estimated_reading_time {
            self.estimated_reading_time = minutes;
            self.updated = true;
        }
    }

    /// Key of the owning feed, if any. Non-owning.
    pub fn feed_id(&self) -> Option<&StoreId> {
        self.feed_id.as_ref()
    }

    pub(crate) fn set_feed_id(&mut self, feed_id: Option<StoreId>) {
        if feed_id != self.feed_id {
            self.feed_id = feed_id;
            self.updated = true;
        }
    }

    pub(crate) fn take_owner(&mut self) -> Option<StoreBackedArray<Article>> {
        self.owner.take()
    }

    pub(crate) fn set_owner(&mut self, owner: StoreBackedArray<Article>) {
        self.owner = Some(owner);
    }

    pub(crate) fn clear_owner(&mut self) {
        self.owner = None;
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn add_flag(&mut self, flag: impl Into<String>) {
        let flag = flag.into();
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
            self.updated = true;
        }
    }

    pub fn remove_flag(&mut self, flag: &str) {
        if let Some(idx) = self.flags.iter().position(|f| f == flag) {
            self.flags.remove(idx);
            self.updated = true;
        }
    }

    pub fn enclosures(&self) -> StoreBackedArray<Enclosure> {
        self.enclosures.clone()
    }

    pub(crate) fn set_enclosures(&mut self, enclosures: StoreBackedArray<Enclosure>) {
        self.enclosures = enclosures;
    }

    pub fn add_enclosure(&mut self, enclosure: &mut Enclosure) {
        if self.enclosures.contains(enclosure) {
            return;
        }
        enclosure.set_article_id(self.article_id.clone());
        self.enclosures.append(enclosure.clone());
        self.updated = true;
    }

    pub fn remove_enclosure(&mut self, enclosure: &mut Enclosure) {
        if self.enclosures.remove(enclosure) {
            enclosure.set_article_id(None);
            self.updated = true;
        }
    }

    pub fn updated(&self) -> bool {
        self.updated
    }

    pub(crate) fn mark_clean(&mut self) {
        self.updated = false;
    }
}

impl Default for Article {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Article {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.article_id, &other.article_id) {
            return a == b;
        }
        self.title == other.title
            && self.link == other.link
            && self.summary == other.summary
            && self.authors == other.authors
            && self.published == other.published
            && self.updated_at == other.updated_at
            && self.identifier == other.identifier
            && self.content == other.content
            && self.read == other.read
            && self.flags == other.flags
            && self.estimated_reading_time == other.estimated_reading_time
    }
}

impl Matches for Article {
    fn matches(&self, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::All => true,
            Predicate::FeedId(id) => self.feed_id.as_ref() == Some(id),
            Predicate::ArticleId(id) => self.article_id.as_ref() == Some(id),
            Predicate::Identifier(identifier) => self.identifier == *identifier,
            Predicate::Read(read) => self.read == *read,
            Predicate::UrlEquals(url) => {
                self.link.as_ref().map(|u| u.as_str()) == Some(url.as_str())
            }
            Predicate::TextContains { fields, needle } => {
                let needle = needle.to_lowercase();
                fields.iter().any(|field| {
                    let haystack = match field {
                        TextField::Title => &self.title,
                        TextField::Summary => &self.summary,
                        TextField::Content => &self.content,
                    };
                    haystack.to_lowercase().contains(&needle)
                })
            }
            Predicate::And(a, b) => self.matches(a) && self.matches(b),
            Predicate::Or(a, b) => self.matches(a) || self.matches(b),
            Predicate::HasTags => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_flag_on_mutation() {
        let mut article = Article::new();
        assert!(!article.updated());

        article.set_read(true);
        assert!(article.updated());

        article.mark_clean();
        article.set_read(true);
        assert!(!article.updated());
    }

    #[test]
    fn test_identity_equality() {
        let mut a = Article::new();
        a.set_title("a");
        a.assign_id(StoreId::Document("abc".into()));

        let mut b = Article::new();
        b.set_title("b");
        b.assign_id(StoreId::Document("abc".into()));

        assert_eq!(a, b);
    }

    #[test]
    fn test_flags() {
        let mut article = Article::new();
        article.add_flag("starred");
        article.add_flag("starred");
        assert_eq!(article.flags(), ["starred"]);

        article.remove_flag("starred");
        assert!(article.flags().is_empty());
    }

    #[test]
    fn test_matches_predicates() {
        let mut article = Article::new();
        article.set_title("Rust 1.80 released");
        article.set_identifier("guid-1");
        article.set_read(true);

        assert!(article.matches(&Predicate::Read(true)));
        assert!(!article.matches(&Predicate::Read(false)));
        assert!(article.matches(&Predicate::Identifier("guid-1".into())));
        assert!(article.matches(&Predicate::TextContains {
            fields: vec![TextField::Title],
            needle: "rust".into(),
        }));
        assert!(article.matches(
            &Predicate::Read(true).and(Predicate::Identifier("guid-1".into()))
        ));
    }

    #[test]
    fn test_enclosure_back_reference() {
        let mut article = Article::new();
        article.assign_id(StoreId::Relational(8));

        let mut enclosure = Enclosure::new(Url::parse("https://example.com/a.mp3").unwrap(), "audio/mpeg");
        article.add_enclosure(&mut enclosure);
        assert_eq!(enclosure.article_id(), Some(&StoreId::Relational(8)));

        article.remove_enclosure(&mut enclosure);
        assert_eq!(enclosure.article_id(), None);
    }

    #[test]
    fn test_display_authors() {
        let mut article = Article::new();
        article.set_authors(vec![
            Author::new("A", Some("a@example.com".into())),
            Author::new("B", None),
        ]);
        assert_eq!(article.display_authors(), "A <a@example.com>, B");
    }
}
