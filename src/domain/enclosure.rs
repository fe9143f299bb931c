use url::Url;

use crate::collection::{Matches, Predicate};
use crate::domain::StoreId;

/// A media attachment on an article. Single-owned, like Article↔Feed.
#[derive(Debug, Clone)]
pub struct Enclosure {
    enclosure_id: Option<StoreId>,
    url: Url,
    kind: String,
    article_id: Option<StoreId>,
    updated: bool,
}

impl Enclosure {
    pub fn new(url: Url, kind: impl Into<String>) -> Self {
        Self {
            enclosure_id: None,
            url,
            kind: kind.into(),
            article_id: None,
            updated: false,
        }
    }

    pub fn enclosure_id(&self) -> Option<&StoreId> {
        self.enclosure_id.as_ref()
    }

    pub(crate) fn assign_id(&mut self, id: StoreId) {
        debug_assert!(self.enclosure_id.is_none(), "enclosure identity is immutable");
        self.enclosure_id = Some(id);
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        if url != self.url {
            self.url = url;
            self.updated = true;
        }
    }

    /// MIME type of the attachment.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn set_kind(&mut self, kind: impl Into<String>) {
        let kind = kind.into();
        if kind != self.kind {
            self.kind = kind;
            self.updated = true;
        }
    }

    pub fn article_id(&self) -> Option<&StoreId> {
        self.article_id.as_ref()
    }

    pub(crate) fn set_article_id(&mut self, article_id: Option<StoreId>) {
        if article_id != self.article_id {
            self.article_id = article_id;
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

impl PartialEq for Enclosure {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.enclosure_id, &other.enclosure_id) {
            return a == b;
        }
        self.url == other.url && self.kind == other.kind
    }
}

impl Matches for Enclosure {
    fn matches(&self, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::All => true,
            Predicate::ArticleId(id) => self.article_id.as_ref() == Some(id),
            Predicate::UrlEquals(url) => self.url.as_str() == url,
            Predicate::And(a, b) => self.matches(a) && self.matches(b),
            Predicate::Or(a, b) => self.matches(a) || self.matches(b),
            _ => false,
        }
    }
}
