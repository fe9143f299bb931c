use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::app::Result;
use crate::collection::Predicate;
use crate::domain::{estimate_reading_time, Article, Feed, StoreId};
use crate::store::DataService;

/// Copies every object from one backend into another.
///
/// The copy is an upsert on both ends. Duplicate rows in the source
/// (the scars of old sync bugs) are collapsed by natural key — feeds by
/// title, query, tags, and URL; articles by identifier with link as
/// fallback; enclosures by URL — keeping whichever duplicate carries
/// the most data. Objects the destination already holds under the same
/// key are updated in place instead of recreated, so running the
/// migration twice changes nothing. Reading time is recomputed from
/// content for every article rather than trusting the stored value.
/// Rows that fail to copy are logged and skipped; the migration keeps
/// going.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseMigrator;

impl DatabaseMigrator {
    pub fn new() -> Self {
        Self
    }

    pub async fn migrate(
        &self,
        source: &Arc<dyn DataService>,
        destination: &Arc<dyn DataService>,
        progress: impl Fn(f64),
    ) -> Result<()> {
        let feeds = source.all_feeds().await?;
        let articles = source.articles_matching(Predicate::All).await?;
        let total = (feeds.len() + articles.len()).max(1) as f64;
        let mut processed = 0usize;

        let mut existing_feeds: HashMap<String, Feed> = destination
            .all_feeds()
            .await?
            .into_iter()
            .map(|feed| (feed_key(&feed), feed))
            .collect();
        let mut existing_articles: HashMap<String, Article> = destination
            .articles_matching(Predicate::All)
            .await?
            .into_iter()
            .map(|article| (article_key(&article), article))
            .collect();

        let mut migrated_feeds: HashMap<StoreId, Feed> = HashMap::new();
        let mut key_to_id: HashMap<String, StoreId> = HashMap::new();

        for feed in &feeds {
            processed += 1;
            let key = feed_key(feed);
            if let Some(canonical) = key_to_id.get(&key) {
                // Duplicate row; remember which canonical feed its
                // articles belong to.
                if let Some(id) = feed.feed_id() {
                    if let Some(canonical_feed) = migrated_feeds.get(canonical).cloned() {
                        migrated_feeds.insert(id.clone(), canonical_feed);
                    }
                }
                progress(processed as f64 / total);
                continue;
            }

            match upsert_feed(destination, feed, existing_feeds.remove(&key)).await {
                Ok(copied) => {
                    if let Some(id) = feed.feed_id() {
                        key_to_id.insert(key, id.clone());
                        migrated_feeds.insert(id.clone(), copied);
                    }
                }
                Err(e) => {
                    tracing::warn!("skipping feed '{}': {}", feed.display_title(), e);
                }
            }
            progress(processed as f64 / total);
        }

        // Of the source-side duplicates under one key, migrate the row
        // carrying the most data.
        let mut chosen: HashMap<String, &Article> = HashMap::new();
        for article in &articles {
            let key = article_key(article);
            match chosen.get(&key) {
                Some(&kept) if richness(kept) >= richness(article) => {}
                _ => {
                    chosen.insert(key, article);
                }
            }
        }

        for article in &articles {
            processed += 1;
            let key = article_key(article);
            let selected = chosen
                .get(&key)
                .map(|kept| std::ptr::eq(*kept, article))
                .unwrap_or(false);
            if !selected {
                progress(processed as f64 / total);
                continue;
            }
            let owner = article
                .feed_id()
                .and_then(|id| migrated_feeds.get_mut(id));
            if let Err(e) =
                upsert_article(destination, article, existing_articles.remove(&key), owner).await
            {
                tracing::warn!("skipping article '{}': {}", article.title(), e);
            }
            progress(processed as f64 / total);
        }

        progress(1.0);
        Ok(())
    }

    /// Deletes every object in `service`. Run against the legacy store
    /// after a successful migration, as its own sequenced step.
    pub async fn delete_everything(
        &self,
        service: &Arc<dyn DataService>,
        progress: impl Fn(f64),
    ) -> Result<()> {
        let feeds = service.all_feeds().await?;
        let total = feeds.len().max(1) as f64;
        for (i, feed) in feeds.iter().enumerate() {
            service.delete_feed(feed).await?;
            progress((i + 1) as f64 / total);
        }
        // Articles that never belonged to a feed are not covered by the
        // cascade.
        for article in service.articles_matching(Predicate::All).await? {
            service.delete_article(&article).await?;
        }
        progress(1.0);
        Ok(())
    }
}

fn feed_key(feed: &Feed) -> String {
    format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}",
        feed.title(),
        feed.query().unwrap_or(""),
        feed.tags().join(","),
        feed.url().map(|u| u.as_str()).unwrap_or(""),
    )
}

fn article_key(article: &Article) -> String {
    if !article.identifier().is_empty() {
        return format!("id:{}", article.identifier());
    }
    if let Some(link) = article.link() {
        return format!("link:{link}");
    }
    format!(
        "fallback:{}\u{1f}{}",
        article.title(),
        article.published().to_rfc3339()
    )
}

/// Rough measure of how much data a duplicate row carries.
fn richness(article: &Article) -> (usize, usize, usize) {
    (
        article.content().len(),
        article.enclosures().count(),
        article.summary().len(),
    )
}

async fn upsert_feed(
    destination: &Arc<dyn DataService>,
    feed: &Feed,
    existing: Option<Feed>,
) -> Result<Feed> {
    let mut copied = match existing {
        Some(existing) => existing,
        None => destination.create_feed().await?,
    };
    copied.set_title(feed.title());
    copied.set_url(feed.url().cloned());
    copied.set_summary(feed.summary());
    copied.set_query(feed.query().map(str::to_string));
    for tag in feed.tags() {
        copied.add_tag(tag.clone());
    }
    copied.set_wait_period(feed.wait_period());
    copied.set_remaining_wait(feed.remaining_wait());
    copied.set_image(feed.image().map(<[u8]>::to_vec));
    copied.set_etag(feed.etag().map(str::to_string));
    copied.set_last_modified(feed.last_modified().map(str::to_string));
    destination.save_feed(&mut copied).await?;
    Ok(copied)
}

async fn upsert_article(
    destination: &Arc<dyn DataService>,
    article: &Article,
    existing: Option<Article>,
    owner: Option<&mut Feed>,
) -> Result<()> {
    let mut copied = match existing {
        Some(existing) => existing,
        None => destination.create_article(owner).await?,
    };
    copied.set_title(article.title());
    copied.set_link(article.link().cloned());
    copied.set_summary(article.summary());
    copied.set_authors(article.authors().to_vec());
    copied.set_published(article.published());
    copied.set_updated_at(article.updated_at());
    copied.set_identifier(article.identifier());
    copied.set_content(article.content());
    copied.set_read(article.read());
    for flag in article.flags() {
        copied.add_flag(flag.clone());
    }
    let text = if article.content().is_empty() {
        article.summary()
    } else {
        article.content()
    };
    copied.set_estimated_reading_time(estimate_reading_time(text));
    destination.save_article(&mut copied).await?;

    // Enclosures the destination article already carries count against
    // the per-article URL dedup.
    let mut seen_urls: HashSet<String> = copied
        .enclosures()
        .iter()
        .map(|e| e.url().to_string())
        .collect();
    for enclosure in article.enclosures().iter() {
        if !seen_urls.insert(enclosure.url().to_string()) {
            continue;
        }
        destination
            .create_enclosure(
                Some(&mut copied),
                enclosure.url().clone(),
                enclosure.kind(),
            )
            .await?;
    }
    if copied.updated() {
        destination.save_article(&mut copied).await?;
    }
    Ok(())
}
