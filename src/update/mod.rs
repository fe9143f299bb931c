use std::sync::Arc;

use crate::app::{FreshetError, Result};
use crate::collection::Predicate;
use crate::domain::{estimate_reading_time, Enclosure, Feed};
use crate::fetcher::{FetchResult, Fetcher};
use crate::normalizer::{Normalizer, ParsedFeed};
use crate::store::{DataService, DataServiceFactory};

/// Refreshes one feed: conditional fetch, parse, then reconcile the
/// parsed entries against the stored articles.
///
/// Entries are matched to articles by identifier first and link second;
/// a matched article is updated in place (its read state untouched), an
/// unmatched entry becomes a new article. Reading time is recomputed
/// from content on every pass.
pub struct UpdateService {
    factory: Arc<DataServiceFactory>,
    fetcher: Arc<dyn Fetcher>,
    normalizer: Normalizer,
}

impl UpdateService {
    pub fn new(factory: Arc<DataServiceFactory>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            factory,
            fetcher,
            normalizer: Normalizer::new(),
        }
    }

    /// Refreshes `feed` and returns it with the error, if any, that
    /// interrupted the refresh. Query feeds and feeds without a URL are
    /// a no-op.
    pub async fn update_feed(&self, mut feed: Feed) -> (Feed, Option<FreshetError>) {
        if feed.is_query_feed() {
            return (feed, None);
        }
        let Some(url) = feed.url().cloned() else {
            return (feed, None);
        };
        let service = match self.factory.current_service() {
            Ok(service) => service,
            Err(e) => return (feed, Some(e)),
        };
        if feed.feed_id().is_none() {
            if let Err(e) = service.save_feed(&mut feed).await {
                return (feed, Some(e));
            }
        }

        let fetched = self
            .fetcher
            .fetch(url.as_str(), feed.etag(), feed.last_modified())
            .await;
        match fetched {
            Ok(FetchResult::NotModified) => {
                tracing::debug!(url = %url, "feed not modified");
                (feed, None)
            }
            Ok(FetchResult::Content {
                body,
                etag,
                last_modified,
            }) => {
                let parsed = match self.normalizer.normalize(url.as_str(), &body) {
                    Ok(parsed) => parsed,
                    Err(e) => return (feed, Some(e)),
                };
                match self
                    .apply(&service, &mut feed, parsed, etag, last_modified)
                    .await
                {
                    Ok(inserted) => {
                        tracing::info!(url = %url, inserted, "feed refreshed");
                        (feed, None)
                    }
                    Err(e) => (feed, Some(e)),
                }
            }
            Err(e) => (feed, Some(e)),
        }
    }

    async fn apply(
        &self,
        service: &Arc<dyn DataService>,
        feed: &mut Feed,
        parsed: ParsedFeed,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<usize> {
        if let Some(title) = parsed.title {
            if !title.is_empty() {
                feed.set_title(title);
            }
        }
        if let Some(summary) = parsed.summary {
            feed.set_summary(summary);
        }
        feed.set_etag(etag);
        feed.set_last_modified(last_modified);

        if feed.image().is_none() {
            if let Some(image_url) = &parsed.image_url {
                self.fetch_image(feed, image_url.as_str()).await;
            }
        }

        let existing = match feed.feed_id() {
            Some(id) => {
                service
                    .articles_matching(Predicate::FeedId(id.clone()))
                    .await?
            }
            None => Vec::new(),
        };

        let mut inserted = 0;
        for item in parsed.items {
            let matched = existing
                .iter()
                .find(|a| a.identifier() == item.identifier)
                .or_else(|| {
                    item.link
                        .as_ref()
                        .and_then(|link| existing.iter().find(|a| a.link() == Some(link)))
                });
            let mut article = match matched {
                Some(article) => article.clone(),
                None => {
                    inserted += 1;
                    service.create_article(Some(feed)).await?
                }
            };

            article.set_identifier(item.identifier);
            article.set_title(item.title);
            article.set_link(item.link);
            article.set_summary(item.summary);
            article.set_authors(item.authors);
            if let Some(published) = item.published {
                article.set_published(published);
            }
            article.set_updated_at(item.updated_at);
            article.set_content(item.content);
            let text = if article.content().is_empty() {
                article.summary()
            } else {
                article.content()
            };
            let minutes = estimate_reading_time(text);
            article.set_estimated_reading_time(minutes);
            service.save_article(&mut article).await?;

            let current: Vec<Enclosure> = article.enclosures().to_vec();
            for enclosure in item.enclosures {
                if current.iter().any(|e| e.url() == &enclosure.url) {
                    continue;
                }
                service
                    .create_enclosure(Some(&mut article), enclosure.url, &enclosure.kind)
                    .await?;
            }
            if article.updated() {
                service.save_article(&mut article).await?;
            }
        }

        service.save_feed(feed).await?;
        Ok(inserted)
    }

    /// Feed icons are nice to have; a failed download never fails the
    /// refresh.
    async fn fetch_image(&self, feed: &mut Feed, image_url: &str) {
        match self.fetcher.fetch(image_url, None, None).await {
            Ok(FetchResult::Content { body, .. }) => feed.set_image(Some(body)),
            Ok(FetchResult::NotModified) => {}
            Err(e) => tracing::warn!(url = %image_url, "feed image fetch failed: {}", e),
        }
    }
}
