use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;

use crate::app::{FreshetError, Result};
use crate::collection::{Matches, Predicate, StoreBackedArray};
use crate::domain::{Article, Enclosure, Feed, StoreId};
use crate::store::{BackendKind, DataService};

#[derive(Default)]
struct MemoryState {
    feeds: Vec<Feed>,
    articles: Vec<Article>,
    enclosures: Vec<Enclosure>,
}

/// Backend kept entirely in process memory. Used by tests and by
/// synthesized data that must flow through [`DataService`] call sites
/// without touching disk.
#[derive(Default)]
pub struct InMemoryService {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> StoreId {
        StoreId::Memory(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn attach_feed(state: &MemoryState, feed: &mut Feed) {
        let articles = if feed.is_query_feed() {
            Vec::new()
        } else {
            match feed.feed_id() {
                Some(id) => {
                    let mut owned: Vec<Article> = state
                        .articles
                        .iter()
                        .filter(|a| a.feed_id() == Some(id))
                        .cloned()
                        .collect();
                    owned.sort_by(|a, b| b.published().cmp(&a.published()));
                    for article in &mut owned {
                        Self::attach_article(state, article);
                    }
                    owned
                }
                None => Vec::new(),
            }
        };
        feed.set_articles(StoreBackedArray::from_vec(articles));
        feed.mark_clean();
    }

    fn attach_article(state: &MemoryState, article: &mut Article) {
        if let Some(id) = article.article_id() {
            let mut owned: Vec<Enclosure> = state
                .enclosures
                .iter()
                .filter(|e| e.article_id() == Some(id))
                .cloned()
                .collect();
            owned.sort_by(|a, b| a.url().as_str().cmp(b.url().as_str()));
            article.set_enclosures(StoreBackedArray::from_vec(owned));
        }
        article.mark_clean();
    }
}

#[async_trait]
impl DataService for InMemoryService {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn create_feed(&self) -> Result<Feed> {
        let mut feed = Feed::new();
        feed.assign_id(self.next_id());
        feed.mark_clean();
        self.lock().feeds.push(feed.clone());
        Ok(feed)
    }

    async fn create_article(&self, feed: Option<&mut Feed>) -> Result<Article> {
        let mut article = Article::new();
        article.assign_id(self.next_id());
        article.mark_clean();
        if let Some(feed) = feed {
            feed.add_article(&mut article);
        }
        self.lock().articles.push(article.clone());
        Ok(article)
    }

    async fn create_enclosure(
        &self,
        article: Option<&mut Article>,
        url: Url,
        kind: &str,
    ) -> Result<Enclosure> {
        let mut enclosure = Enclosure::new(url, kind);
        enclosure.assign_id(self.next_id());
        enclosure.mark_clean();
        if let Some(article) = article {
            article.add_enclosure(&mut enclosure);
        }
        self.lock().enclosures.push(enclosure.clone());
        Ok(enclosure)
    }

    async fn all_feeds(&self) -> Result<Vec<Feed>> {
        self.feeds_matching(Predicate::All).await
    }

    async fn feeds_matching(&self, predicate: Predicate) -> Result<Vec<Feed>> {
        let state = self.lock();
        let mut feeds: Vec<Feed> = state
            .feeds
            .iter()
            .filter(|f| f.matches(&predicate))
            .cloned()
            .collect();
        feeds.sort_by(|a, b| a.title().cmp(b.title()));
        for feed in &mut feeds {
            Self::attach_feed(&state, feed);
        }
        Ok(feeds)
    }

    async fn articles_matching(&self, predicate: Predicate) -> Result<Vec<Article>> {
        let state = self.lock();
        let mut articles: Vec<Article> = state
            .articles
            .iter()
            .filter(|a| a.matches(&predicate))
            .cloned()
            .collect();
        articles.sort_by(|a, b| b.published().cmp(&a.published()));
        for article in &mut articles {
            Self::attach_article(&state, article);
        }
        Ok(articles)
    }

    async fn save_feed(&self, feed: &mut Feed) -> Result<()> {
        if feed.feed_id().is_none() {
            feed.assign_id(self.next_id());
        } else if !feed.updated() {
            return Ok(());
        }
        match feed.feed_id() {
            Some(StoreId::Memory(_)) => {}
            _ => {
                return Err(FreshetError::Store(
                    "feed belongs to a different backend".into(),
                ))
            }
        }
        feed.mark_clean();
        let mut state = self.lock();
        match state.feeds.iter_mut().find(|f| **f == *feed) {
            Some(existing) => *existing = feed.clone(),
            None => state.feeds.push(feed.clone()),
        }
        Ok(())
    }

    async fn save_article(&self, article: &mut Article) -> Result<()> {
        if article.article_id().is_none() {
            article.assign_id(self.next_id());
        } else if !article.updated() {
            return Ok(());
        }
        match article.article_id() {
            Some(StoreId::Memory(_)) => {}
            _ => {
                return Err(FreshetError::Store(
                    "article belongs to a different backend".into(),
                ))
            }
        }
        article.mark_clean();
        let mut state = self.lock();
        match state.articles.iter_mut().find(|a| **a == *article) {
            Some(existing) => *existing = article.clone(),
            None => state.articles.push(article.clone()),
        }
        Ok(())
    }

    async fn save_enclosure(&self, enclosure: &mut Enclosure) -> Result<()> {
        if enclosure.enclosure_id().is_none() {
            enclosure.assign_id(self.next_id());
        } else if !enclosure.updated() {
            return Ok(());
        }
        enclosure.mark_clean();
        let mut state = self.lock();
        match state.enclosures.iter_mut().find(|e| **e == *enclosure) {
            Some(existing) => *existing = enclosure.clone(),
            None => state.enclosures.push(enclosure.clone()),
        }
        Ok(())
    }

    async fn delete_feed(&self, feed: &Feed) -> Result<()> {
        let mut state = self.lock();
        let feed_id = feed.feed_id().cloned();
        let article_ids: Vec<StoreId> = state
            .articles
            .iter()
            .filter(|a| a.feed_id() == feed_id.as_ref() && feed_id.is_some())
            .filter_map(|a| a.article_id().cloned())
            .collect();
        state.feeds.retain(|f| f != feed);
        state
            .articles
            .retain(|a| !(feed_id.is_some() && a.feed_id() == feed_id.as_ref()));
        state.enclosures.retain(|e| {
            e.article_id()
                .map(|id| !article_ids.contains(id))
                .unwrap_or(true)
        });
        Ok(())
    }

    async fn delete_article(&self, article: &Article) -> Result<()> {
        let mut state = self.lock();
        let article_id = article.article_id().cloned();
        state.articles.retain(|a| a != article);
        state
            .enclosures
            .retain(|e| !(article_id.is_some() && e.article_id() == article_id.as_ref()));
        Ok(())
    }

    async fn delete_enclosure(&self, enclosure: &Enclosure) -> Result<()> {
        self.lock().enclosures.retain(|e| e != enclosure);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        tokio_test::block_on(async {
            let service = InMemoryService::new();
            let mut feed = service.create_feed().await.unwrap();
            feed.set_title("memory");
            service.save_feed(&mut feed).await.unwrap();

            let feeds = service.all_feeds().await.unwrap();
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].title(), "memory");
        });
    }

    #[tokio::test]
    async fn test_articles_attach_to_feed() {
        let service = InMemoryService::new();
        let mut feed = service.create_feed().await.unwrap();
        let mut article = service.create_article(Some(&mut feed)).await.unwrap();
        article.set_title("first");
        service.save_article(&mut article).await.unwrap();

        let feeds = service.all_feeds().await.unwrap();
        assert_eq!(feeds[0].articles().count(), 1);
        assert_eq!(feeds[0].articles().first().unwrap().title(), "first");
    }

    #[tokio::test]
    async fn test_delete_feed_cascades() {
        let service = InMemoryService::new();
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
    }
}
