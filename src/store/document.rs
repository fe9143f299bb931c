use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{FreshetError, Result};
use crate::collection::{
    ControllerDescriptor, Entity, FetchController, Matches, Predicate, SortSpec, StoreBackedArray,
};
use crate::domain::{Article, Author, Enclosure, Feed, StoreId};
use crate::store::{next_session_id, BackendKind, DataService, SearchIndex, SearchItem};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FeedRecord {
    id: String,
    title: String,
    url: Option<String>,
    summary: String,
    query: Option<String>,
    tags: Vec<String>,
    wait_period: u32,
    remaining_wait: u32,
    image: Option<Vec<u8>>,
    etag: Option<String>,
    last_modified: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArticleRecord {
    id: String,
    feed_id: Option<String>,
    title: String,
    link: Option<String>,
    summary: String,
    authors: Vec<Author>,
    published: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    identifier: String,
    content: String,
    read: bool,
    estimated_reading_time: u32,
    flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnclosureRecord {
    id: String,
    article_id: Option<String>,
    url: String,
    kind: String,
}

/// On-disk shape of the whole document store: one JSON file, rewritten
/// after every mutation. Record order is insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DocumentData {
    next_id: u64,
    feeds: Vec<FeedRecord>,
    articles: Vec<ArticleRecord>,
    enclosures: Vec<EnclosureRecord>,
}

struct DocumentStore {
    data: Mutex<DocumentData>,
    path: Option<PathBuf>,
}

impl DocumentStore {
    fn lock(&self) -> MutexGuard<'_, DocumentData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read<R>(&self, f: impl FnOnce(&DocumentData) -> R) -> R {
        f(&self.lock())
    }

    /// Applies `f` and writes the whole store back out.
    fn mutate<R>(&self, f: impl FnOnce(&mut DocumentData) -> R) -> Result<R> {
        let mut data = self.lock();
        let result = f(&mut data);
        self.persist(&data)?;
        Ok(result)
    }

    fn persist(&self, data: &DocumentData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(data)?)?;
        Ok(())
    }
}

fn allocate_id(data: &mut DocumentData, prefix: &str) -> String {
    data.next_id += 1;
    format!("{prefix}-{:08x}", data.next_id)
}

fn document_key(id: Option<&StoreId>) -> Option<&str> {
    match id {
        Some(StoreId::Document(key)) => Some(key),
        _ => None,
    }
}

/// Owner key bound by an insert through a scoped controller.
fn owner_key(predicate: &Predicate) -> Option<String> {
    match predicate {
        Predicate::FeedId(StoreId::Document(key))
        | Predicate::ArticleId(StoreId::Document(key)) => Some(key.clone()),
        Predicate::And(a, b) => owner_key(a).or_else(|| owner_key(b)),
        _ => None,
    }
}

/// The document backend: every record lives in one JSON file, loaded at
/// open and rewritten on each mutation. Queries evaluate the shared
/// [`Predicate`] structurally, so a migrated dataset answers the same
/// questions it did on SQLite.
pub struct DocumentService {
    store: Arc<DocumentStore>,
    session: u64,
    search_index: Option<Arc<dyn SearchIndex>>,
}

impl DocumentService {
    pub fn open(path: &Path, search_index: Option<Arc<dyn SearchIndex>>) -> Result<Self> {
        let data = if path.exists() {
            serde_json::from_slice(&std::fs::read(path)?)?
        } else {
            DocumentData::default()
        };
        let store = Arc::new(DocumentStore {
            data: Mutex::new(data),
            path: Some(path.to_path_buf()),
        });
        // Make the store visible on disk immediately so the next launch
        // selects this backend.
        store.read(|data| store.persist(data))?;
        Ok(Self {
            store,
            session: next_session_id(),
            search_index,
        })
    }

    pub fn in_memory(search_index: Option<Arc<dyn SearchIndex>>) -> Self {
        Self {
            store: Arc::new(DocumentStore {
                data: Mutex::new(DocumentData::default()),
                path: None,
            }),
            session: next_session_id(),
            search_index,
        }
    }

    fn article_array(&self, predicate: Predicate) -> StoreBackedArray<Article> {
        StoreBackedArray::from_controller(Box::new(DocumentArticleController {
            store: self.store.clone(),
            descriptor: ControllerDescriptor {
                entity: Entity::Articles,
                predicate,
                sort: SortSpec::ArticlesByPublishedDesc,
                session: self.session,
            },
        }))
    }

    fn attach_feed(&self, feed: &mut Feed) {
        let articles = if feed.is_query_feed() {
            StoreBackedArray::new()
        } else {
            match feed.feed_id() {
                Some(id) => self.article_array(Predicate::FeedId(id.clone())),
                None => StoreBackedArray::new(),
            }
        };
        feed.set_articles(articles);
        feed.mark_clean();
    }

    fn index_article(&self, article: &Article) {
        if let Some(index) = &self.search_index {
            if let Err(e) = index.add_items(&[SearchItem::from_article(article)]) {
                tracing::warn!("search index update failed: {}", e);
            }
        }
    }

    fn unindex_identifiers(&self, identifiers: &[String]) {
        if identifiers.is_empty() {
            return;
        }
        if let Some(index) = &self.search_index {
            if let Err(e) = index.delete_identifiers(identifiers) {
                tracing::warn!("search index removal failed: {}", e);
            }
        }
    }
}

fn feed_from_record(record: &FeedRecord) -> Feed {
    let mut feed = Feed::new();
    feed.assign_id(StoreId::Document(record.id.clone()));
    feed.set_title(record.title.clone());
    feed.set_url(record.url.as_deref().and_then(|u| Url::parse(u).ok()));
    feed.set_summary(record.summary.clone());
    feed.set_query(record.query.clone());
    for tag in &record.tags {
        feed.add_tag(tag.clone());
    }
    feed.set_wait_period(record.wait_period);
    feed.set_remaining_wait(record.remaining_wait);
    feed.set_image(record.image.clone());
    feed.set_etag(record.etag.clone());
    feed.set_last_modified(record.last_modified.clone());
    feed
}

fn record_from_feed(feed: &Feed, id: String) -> FeedRecord {
    FeedRecord {
        id,
        title: feed.title().to_string(),
        url: feed.url().map(|u| u.to_string()),
        summary: feed.summary().to_string(),
        query: feed.query().map(str::to_string),
        tags: feed.tags().to_vec(),
        wait_period: feed.wait_period(),
        remaining_wait: feed.remaining_wait(),
        image: feed.image().map(<[u8]>::to_vec),
        etag: feed.etag().map(str::to_string),
        last_modified: feed.last_modified().map(str::to_string),
    }
}

fn article_from_record(record: &ArticleRecord) -> Article {
    let mut article = Article::new();
    article.assign_id(StoreId::Document(record.id.clone()));
    if let Some(feed_id) = &record.feed_id {
        article.set_feed_id(Some(StoreId::Document(feed_id.clone())));
    }
    article.set_title(record.title.clone());
    article.set_link(record.link.as_deref().and_then(|u| Url::parse(u).ok()));
    article.set_summary(record.summary.clone());
    article.set_authors(record.authors.clone());
    article.set_published(record.published);
    article.set_updated_at(record.updated_at);
    article.set_identifier(record.identifier.clone());
    article.set_content(record.content.clone());
    article.set_read(record.read);
    article.set_estimated_reading_time(record.estimated_reading_time);
    for flag in &record.flags {
        article.add_flag(flag.clone());
    }
    article
}

fn record_from_article(article: &Article, id: String) -> ArticleRecord {
    ArticleRecord {
        id,
        feed_id: document_key(article.feed_id()).map(str::to_string),
        title: article.title().to_string(),
        link: article.link().map(|u| u.to_string()),
        summary: article.summary().to_string(),
        authors: article.authors().to_vec(),
        published: article.published(),
        updated_at: article.updated_at(),
        identifier: article.identifier().to_string(),
        content: article.content().to_string(),
        read: article.read(),
        estimated_reading_time: article.estimated_reading_time(),
        flags: article.flags().to_vec(),
    }
}

fn enclosure_from_record(record: &EnclosureRecord) -> Option<Enclosure> {
    let url = match Url::parse(&record.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("skipping enclosure {} with bad url: {}", record.id, e);
            return None;
        }
    };
    let mut enclosure = Enclosure::new(url, record.kind.clone());
    enclosure.assign_id(StoreId::Document(record.id.clone()));
    if let Some(article_id) = &record.article_id {
        enclosure.set_article_id(Some(StoreId::Document(article_id.clone())));
    }
    enclosure.mark_clean();
    Some(enclosure)
}

fn record_from_enclosure(enclosure: &Enclosure, id: String) -> EnclosureRecord {
    EnclosureRecord {
        id,
        article_id: document_key(enclosure.article_id()).map(str::to_string),
        url: enclosure.url().to_string(),
        kind: enclosure.kind().to_string(),
    }
}

fn sort_articles(articles: &mut [Article], sort: SortSpec) {
    match sort {
        // Stable sort; insertion order breaks ties.
        SortSpec::ArticlesByPublishedDesc => {
            articles.sort_by(|a, b| b.published().cmp(&a.published()));
        }
        _ => {}
    }
}

fn attach_enclosures(store: &Arc<DocumentStore>, session: u64, article: &mut Article) {
    if let Some(id) = article.article_id() {
        article.set_enclosures(StoreBackedArray::from_controller(Box::new(
            DocumentEnclosureController {
                store: store.clone(),
                descriptor: ControllerDescriptor {
                    entity: Entity::Enclosures,
                    predicate: Predicate::ArticleId(id.clone()),
                    sort: SortSpec::EnclosuresByUrl,
                    session,
                },
            },
        )));
    }
    article.mark_clean();
}

/// Matching, sorted articles as domain objects with their enclosure
/// collections attached.
fn visible_articles(
    store: &Arc<DocumentStore>,
    session: u64,
    descriptor: &ControllerDescriptor,
) -> Vec<Article> {
    let mut articles: Vec<Article> = store.read(|data| {
        data.articles
            .iter()
            .map(article_from_record)
            .filter(|article| article.matches(&descriptor.predicate))
            .collect()
    });
    sort_articles(&mut articles, descriptor.sort);
    for article in &mut articles {
        attach_enclosures(store, session, article);
    }
    articles
}

struct DocumentArticleController {
    store: Arc<DocumentStore>,
    descriptor: ControllerDescriptor,
}

impl FetchController<Article> for DocumentArticleController {
    fn count(&self) -> Result<usize> {
        Ok(self.store.read(|data| {
            data.articles
                .iter()
                .map(article_from_record)
                .filter(|article| article.matches(&self.descriptor.predicate))
                .count()
        }))
    }

    fn batch(&self, offset: usize, limit: usize) -> Result<Vec<Article>> {
        let articles = visible_articles(&self.store, self.descriptor.session, &self.descriptor);
        Ok(articles.into_iter().skip(offset).take(limit).collect())
    }

    fn insert(&self, article: &Article) -> Result<()> {
        let owner = owner_key(&self.descriptor.predicate);
        match article.article_id() {
            Some(StoreId::Document(id)) => {
                let id = id.clone();
                self.store.mutate(|data| {
                    if let Some(record) = data.articles.iter_mut().find(|r| r.id == id) {
                        record.feed_id = owner;
                    }
                })
            }
            Some(_) => Err(FreshetError::Store(
                "article belongs to a different backend".into(),
            )),
            None => self.store.mutate(|data| {
                let id = allocate_id(data, "article");
                let mut record = record_from_article(article, id);
                if record.feed_id.is_none() {
                    record.feed_id = owner;
                }
                data.articles.push(record);
            }),
        }
    }

    fn delete(&self, index: usize) -> Result<()> {
        let articles = visible_articles(&self.store, self.descriptor.session, &self.descriptor);
        let target = articles.get(index).ok_or(FreshetError::OutOfRange(index))?;
        let Some(StoreId::Document(id)) = target.article_id().cloned() else {
            return Err(FreshetError::OutOfRange(index));
        };
        self.store.mutate(|data| {
            data.articles.retain(|r| r.id != id);
            data.enclosures.retain(|r| r.article_id.as_deref() != Some(&id));
        })
    }

    fn filter(&self, predicate: Predicate) -> Box<dyn FetchController<Article>> {
        Box::new(Self {
            store: self.store.clone(),
            descriptor: ControllerDescriptor {
                predicate: self.descriptor.predicate.clone().and(predicate),
                ..self.descriptor.clone()
            },
        })
    }

    fn combine(
        &self,
        other: &dyn FetchController<Article>,
    ) -> Option<Box<dyn FetchController<Article>>> {
        let theirs = other.descriptor();
        if theirs.entity != self.descriptor.entity
            || theirs.sort != self.descriptor.sort
            || theirs.session != self.descriptor.session
        {
            return None;
        }
        Some(Box::new(Self {
            store: self.store.clone(),
            descriptor: ControllerDescriptor {
                predicate: self
                    .descriptor
                    .predicate
                    .clone()
                    .or(theirs.predicate.clone()),
                ..self.descriptor.clone()
            },
        }))
    }

    fn descriptor(&self) -> &ControllerDescriptor {
        &self.descriptor
    }

    fn boxed_clone(&self) -> Box<dyn FetchController<Article>> {
        Box::new(Self {
            store: self.store.clone(),
            descriptor: self.descriptor.clone(),
        })
    }
}

struct DocumentEnclosureController {
    store: Arc<DocumentStore>,
    descriptor: ControllerDescriptor,
}

impl DocumentEnclosureController {
    fn visible(&self) -> Vec<Enclosure> {
        let mut enclosures: Vec<Enclosure> = self.store.read(|data| {
            data.enclosures
                .iter()
                .filter_map(enclosure_from_record)
                .filter(|enclosure| enclosure.matches(&self.descriptor.predicate))
                .collect()
        });
        if self.descriptor.sort == SortSpec::EnclosuresByUrl {
            enclosures.sort_by(|a, b| a.url().as_str().cmp(b.url().as_str()));
        }
        enclosures
    }
}

impl FetchController<Enclosure> for DocumentEnclosureController {
    fn count(&self) -> Result<usize> {
        Ok(self.visible().len())
    }

    fn batch(&self, offset: usize, limit: usize) -> Result<Vec<Enclosure>> {
        Ok(self.visible().into_iter().skip(offset).take(limit).collect())
    }

    fn insert(&self, enclosure: &Enclosure) -> Result<()> {
        let owner = owner_key(&self.descriptor.predicate);
        match enclosure.enclosure_id() {
            Some(StoreId::Document(id)) => {
                let id = id.clone();
                self.store.mutate(|data| {
                    if let Some(record) = data.enclosures.iter_mut().find(|r| r.id == id) {
                        record.article_id = owner;
                    }
                })
            }
            Some(_) => Err(FreshetError::Store(
                "enclosure belongs to a different backend".into(),
            )),
            None => self.store.mutate(|data| {
                let id = allocate_id(data, "enclosure");
                let mut record = record_from_enclosure(enclosure, id);
                if record.article_id.is_none() {
                    record.article_id = owner;
                }
                data.enclosures.push(record);
            }),
        }
    }

    fn delete(&self, index: usize) -> Result<()> {
        let enclosures = self.visible();
        let target = enclosures.get(index).ok_or(FreshetError::OutOfRange(index))?;
        let Some(StoreId::Document(id)) = target.enclosure_id().cloned() else {
            return Err(FreshetError::OutOfRange(index));
        };
        self.store.mutate(|data| {
            data.enclosures.retain(|r| r.id != id);
        })
    }

    fn filter(&self, predicate: Predicate) -> Box<dyn FetchController<Enclosure>> {
        Box::new(Self {
            store: self.store.clone(),
            descriptor: ControllerDescriptor {
                predicate: self.descriptor.predicate.clone().and(predicate),
                ..self.descriptor.clone()
            },
        })
    }

    fn combine(
        &self,
        other: &dyn FetchController<Enclosure>,
    ) -> Option<Box<dyn FetchController<Enclosure>>> {
        let theirs = other.descriptor();
        if theirs.entity != self.descriptor.entity
            || theirs.sort != self.descriptor.sort
            || theirs.session != self.descriptor.session
        {
            return None;
        }
        Some(Box::new(Self {
            store: self.store.clone(),
            descriptor: ControllerDescriptor {
                predicate: self
                    .descriptor
                    .predicate
                    .clone()
                    .or(theirs.predicate.clone()),
                ..self.descriptor.clone()
            },
        }))
    }

    fn descriptor(&self) -> &ControllerDescriptor {
        &self.descriptor
    }

    fn boxed_clone(&self) -> Box<dyn FetchController<Enclosure>> {
        Box::new(Self {
            store: self.store.clone(),
            descriptor: self.descriptor.clone(),
        })
    }
}

#[async_trait]
impl DataService for DocumentService {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn create_feed(&self) -> Result<Feed> {
        let id = self.store.mutate(|data| {
            let id = allocate_id(data, "feed");
            data.feeds.push(FeedRecord {
                id: id.clone(),
                ..FeedRecord::default()
            });
            id
        })?;
        let mut feed = Feed::new();
        feed.assign_id(StoreId::Document(id));
        self.attach_feed(&mut feed);
        Ok(feed)
    }

    async fn create_article(&self, feed: Option<&mut Feed>) -> Result<Article> {
        let mut article = Article::new();
        let id = self.store.mutate(|data| {
            let id = allocate_id(data, "article");
            data.articles.push(record_from_article(&article, id.clone()));
            id
        })?;
        article.assign_id(StoreId::Document(id));
        attach_enclosures(&self.store, self.session, &mut article);
        if let Some(feed) = feed {
            feed.add_article(&mut article);
        }
        Ok(article)
    }

    async fn create_enclosure(
        &self,
        article: Option<&mut Article>,
        url: Url,
        kind: &str,
    ) -> Result<Enclosure> {
        let mut enclosure = Enclosure::new(url, kind);
        let id = self.store.mutate(|data| {
            let id = allocate_id(data, "enclosure");
            data.enclosures
                .push(record_from_enclosure(&enclosure, id.clone()));
            id
        })?;
        enclosure.assign_id(StoreId::Document(id));
        enclosure.mark_clean();
        if let Some(article) = article {
            article.add_enclosure(&mut enclosure);
        }
        Ok(enclosure)
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>> {
        self.feeds_matching(Predicate::All).await
    }

    async fn feeds_matching(&self, predicate: Predicate) -> Result<Vec<Feed>> {
        let mut feeds: Vec<Feed> = self.store.read(|data| {
            data.feeds
                .iter()
                .map(feed_from_record)
                .filter(|feed| feed.matches(&predicate))
                .collect()
        });
        feeds.sort_by(|a, b| {
            a.title()
                .cmp(b.title())
                .then_with(|| a.url().map(Url::as_str).cmp(&b.url().map(Url::as_str)))
        });
        for feed in &mut feeds {
            self.attach_feed(feed);
        }
        Ok(feeds)
    }

    async fn articles_matching(&self, predicate: Predicate) -> Result<Vec<Article>> {
        let descriptor = ControllerDescriptor {
            entity: Entity::Articles,
            predicate,
            sort: SortSpec::ArticlesByPublishedDesc,
            session: self.session,
        };
        Ok(visible_articles(&self.store, self.session, &descriptor))
    }

    async fn save_feed(&self, feed: &mut Feed) -> Result<()> {
        match feed.feed_id().cloned() {
            Some(StoreId::Document(id)) => {
                if !feed.updated() {
                    return Ok(());
                }
                let record = record_from_feed(feed, id.clone());
                self.store.mutate(|data| {
                    match data.feeds.iter_mut().find(|r| r.id == id) {
                        Some(existing) => *existing = record,
                        None => data.feeds.push(record),
                    }
                })?;
                feed.mark_clean();
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "feed belongs to a different backend".into(),
            )),
            None => {
                let id = self.store.mutate(|data| {
                    let id = allocate_id(data, "feed");
                    data.feeds.push(record_from_feed(feed, id.clone()));
                    id
                })?;
                feed.assign_id(StoreId::Document(id));
                self.attach_feed(feed);
                Ok(())
            }
        }
    }

    async fn save_article(&self, article: &mut Article) -> Result<()> {
        match article.article_id().cloned() {
            Some(StoreId::Document(id)) => {
                if !article.updated() {
                    return Ok(());
                }
                let record = record_from_article(article, id.clone());
                self.store.mutate(|data| {
                    match data.articles.iter_mut().find(|r| r.id == id) {
                        Some(existing) => *existing = record,
                        None => data.articles.push(record),
                    }
                })?;
                article.mark_clean();
                self.index_article(article);
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "article belongs to a different backend".into(),
            )),
            None => {
                let id = self.store.mutate(|data| {
                    let id = allocate_id(data, "article");
                    data.articles.push(record_from_article(article, id.clone()));
                    id
                })?;
                article.assign_id(StoreId::Document(id));
                attach_enclosures(&self.store, self.session, article);
                self.index_article(article);
                Ok(())
            }
        }
    }

    async fn save_enclosure(&self, enclosure: &mut Enclosure) -> Result<()> {
        match enclosure.enclosure_id().cloned() {
            Some(StoreId::Document(id)) => {
                if !enclosure.updated() {
                    return Ok(());
                }
                let record = record_from_enclosure(enclosure, id.clone());
                self.store.mutate(|data| {
                    match data.enclosures.iter_mut().find(|r| r.id == id) {
                        Some(existing) => *existing = record,
                        None => data.enclosures.push(record),
                    }
                })?;
                enclosure.mark_clean();
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "enclosure belongs to a different backend".into(),
            )),
            None => {
                let id = self.store.mutate(|data| {
                    let id = allocate_id(data, "enclosure");
                    data.enclosures
                        .push(record_from_enclosure(enclosure, id.clone()));
                    id
                })?;
                enclosure.assign_id(StoreId::Document(id));
                enclosure.mark_clean();
                Ok(())
            }
        }
    }

    async fn delete_feed(&self, feed: &Feed) -> Result<()> {
        let Some(StoreId::Document(id)) = feed.feed_id() else {
            return Ok(());
        };
        let id = id.clone();
        let identifiers = self.store.mutate(|data| {
            let article_ids: Vec<String> = data
                .articles
                .iter()
                .filter(|r| r.feed_id.as_deref() == Some(&id))
                .map(|r| r.id.clone())
                .collect();
            let identifiers: Vec<String> = data
                .articles
                .iter()
                .filter(|r| r.feed_id.as_deref() == Some(&id))
                .map(|r| r.identifier.clone())
                .collect();
            data.feeds.retain(|r| r.id != id);
            data.articles.retain(|r| r.feed_id.as_deref() != Some(&id));
            data.enclosures.retain(|r| {
                r.article_id
                    .as_ref()
                    .map(|a| !article_ids.contains(a))
                    .unwrap_or(true)
            });
            identifiers
        })?;
        self.unindex_identifiers(&identifiers);
        Ok(())
    }

    async fn delete_article(&self, article: &Article) -> Result<()> {
        let Some(StoreId::Document(id)) = article.article_id() else {
            return Ok(());
        };
        let id = id.clone();
        self.store.mutate(|data| {
            data.articles.retain(|r| r.id != id);
            data.enclosures.retain(|r| r.article_id.as_deref() != Some(&id));
        })?;
        self.unindex_identifiers(&[article.identifier().to_string()]);
        Ok(())
    }

    async fn delete_enclosure(&self, enclosure: &Enclosure) -> Result<()> {
        let Some(StoreId::Document(id)) = enclosure.enclosure_id() else {
            return Ok(());
        };
        let id = id.clone();
        self.store.mutate(|data| {
            data.enclosures.retain(|r| r.id != id);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_round_trip() {
        let service = DocumentService::in_memory(None);
        let mut feed = service.create_feed().await.unwrap();
        feed.set_title("Rust Blog");
        feed.add_tag("rust");
        service.save_feed(&mut feed).await.unwrap();

        let feeds = service.all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title(), "Rust Blog");
        assert_eq!(feeds[0], feed);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let service = DocumentService::open(&path, None).unwrap();
            let mut feed = service.create_feed().await.unwrap();
            feed.set_title("persisted");
            service.save_feed(&mut feed).await.unwrap();
        }
        assert!(path.exists());

        let reopened = DocumentService::open(&path, None).unwrap();
        let feeds = reopened.all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title(), "persisted");
    }

    #[tokio::test]
    async fn test_articles_sorted_newest_first() {
        let service = DocumentService::in_memory(None);
        let mut feed = service.create_feed().await.unwrap();
        for day in [3, 1, 2] {
            let mut article = service.create_article(Some(&mut feed)).await.unwrap();
            article.set_title(format!("day {day}"));
            article.set_published(
                DateTime::parse_from_rfc3339(&format!("2026-02-{day:02}T00:00:00Z"))
                    .unwrap()
                    .with_timezone(&Utc),
            );
            service.save_article(&mut article).await.unwrap();
        }

        let feeds = service.all_feeds().await.unwrap();
        let articles = feeds[0].articles();
        assert_eq!(articles.count(), 3);
        assert_eq!(articles.get(0).unwrap().title(), "day 3");
        assert_eq!(articles.get(2).unwrap().title(), "day 1");
    }

    #[tokio::test]
    async fn test_delete_feed_cascades() {
        let service = DocumentService::in_memory(None);
        let mut feed = service.create_feed().await.unwrap();
        let mut article = service.create_article(Some(&mut feed)).await.unwrap();
        service
            .create_enclosure(
                Some(&mut article),
                Url::parse("https://example.com/a.mp3").unwrap(),
                "audio/mpeg",
            )
            .await
            .unwrap();
        service.save_article(&mut article).await.unwrap();

        service.delete_feed(&feed).await.unwrap();
        assert!(service.all_feeds().await.unwrap().is_empty());
        assert!(service
            .articles_matching(Predicate::All)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(service.store.read(|data| data.enclosures.len()), 0);
    }

    #[tokio::test]
    async fn test_query_feed_articles_stay_empty() {
        let service = DocumentService::in_memory(None);
        let mut feed = service.create_feed().await.unwrap();
        feed.set_query(Some("read == false".into()));
        service.save_feed(&mut feed).await.unwrap();

        let feeds = service.all_feeds().await.unwrap();
        assert!(feeds[0].is_query_feed());
        assert!(!feeds[0].articles().is_store_backed());
        assert!(feeds[0].articles().is_empty());
    }

    #[tokio::test]
    async fn test_predicate_parity_with_matches() {
        let service = DocumentService::in_memory(None);
        let mut feed = service.create_feed().await.unwrap();
        let mut read = service.create_article(Some(&mut feed)).await.unwrap();
        read.set_read(true);
        service.save_article(&mut read).await.unwrap();
        let mut unread = service.create_article(Some(&mut feed)).await.unwrap();
        unread.set_title("still new");
        service.save_article(&mut unread).await.unwrap();

        let matched = service
            .articles_matching(Predicate::Read(false))
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].title(), "still new");
    }
}
