use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{oneshot, Semaphore};

use crate::app::FreshetError;
use crate::app::Result;
use crate::collection::{Predicate, StoreBackedArray, TextField};
use crate::domain::{Article, Feed};
use crate::migrator::DatabaseMigrator;
use crate::query::{QueryEvaluator, SimpleEvaluator};
use crate::store::{DataService, DataServiceFactory};
use crate::update::UpdateService;
use url::Url;

pub const DEFAULT_WORKERS: usize = 10;

/// Change notifications pushed to interested parties. Subscribers are
/// held weakly; a dropped subscriber is pruned on the next broadcast.
pub trait DataSubscriber: Send + Sync {
    fn will_update_feeds(&self) {}
    fn did_update_feeds_progress(&self, _finished: usize, _total: usize) {}
    fn did_update_feeds(&self, _feeds: &[Feed], _errors: &[Arc<FreshetError>]) {}
    fn marked_articles(&self, _articles: &[Article], _read: bool) {}
    fn deleted_article(&self, _article: &Article) {}
    fn deleted_feed(&self, _feed: &Feed, _remaining: usize) {}
}

/// Network reachability probe consulted before a refresh cycle.
pub trait Reachable: Send + Sync {
    fn is_reachable(&self) -> bool;
}

struct AlwaysReachable;

impl Reachable for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// What a refresh cycle produced: the feeds that were touched and the
/// errors encountered along the way. Every concurrent caller of
/// [`DataRepository::update_feeds`] receives the same outcome.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    pub feeds: Vec<Feed>,
    pub errors: Vec<Arc<FreshetError>>,
}

/// The facade over storage, refresh, and migration.
///
/// All reads and writes go through the factory's current service, so a
/// backend swap mid-flight is picked up by the next operation.
pub struct DataRepository {
    factory: Arc<DataServiceFactory>,
    update_service: Arc<UpdateService>,
    migrator: DatabaseMigrator,
    evaluator: Box<dyn QueryEvaluator>,
    reachability: Arc<dyn Reachable>,
    subscribers: StdMutex<Vec<Weak<dyn DataSubscriber>>>,
    /// `Some` while a refresh cycle is in flight; holds the senders of
    /// every caller waiting on that cycle.
    refresh_waiters: StdMutex<Option<Vec<oneshot::Sender<RefreshOutcome>>>>,
    semaphore: Arc<Semaphore>,
}

impl DataRepository {
    pub fn new(factory: Arc<DataServiceFactory>, update_service: Arc<UpdateService>) -> Self {
        Self::with_workers(factory, update_service, DEFAULT_WORKERS)
    }

    pub fn with_workers(
        factory: Arc<DataServiceFactory>,
        update_service: Arc<UpdateService>,
        workers: usize,
    ) -> Self {
        Self::with_parts(
            factory,
            update_service,
            Box::new(SimpleEvaluator::new()),
            Arc::new(AlwaysReachable),
            workers,
        )
    }

    pub fn with_parts(
        factory: Arc<DataServiceFactory>,
        update_service: Arc<UpdateService>,
        evaluator: Box<dyn QueryEvaluator>,
        reachability: Arc<dyn Reachable>,
        workers: usize,
    ) -> Self {
        Self {
            factory,
            update_service,
            migrator: DatabaseMigrator::new(),
            evaluator,
            reachability,
            subscribers: StdMutex::new(Vec::new()),
            refresh_waiters: StdMutex::new(None),
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn add_subscriber(&self, subscriber: &Arc<dyn DataSubscriber>) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(subscriber));
    }

    fn each_subscriber(&self, f: impl Fn(&dyn DataSubscriber)) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|weak| match weak.upgrade() {
            Some(subscriber) => {
                f(subscriber.as_ref());
                true
            }
            None => false,
        });
    }

    fn service(&self) -> Result<Arc<dyn DataService>> {
        self.factory.current_service()
    }

    // ---- feeds ----------------------------------------------------

    /// Creates (or returns the existing) feed subscribed to `url`.
    pub async fn new_feed(&self, url: Url) -> Result<Feed> {
        let service = self.service()?;
        let existing = service
            .feeds_matching(Predicate::UrlEquals(url.to_string()))
            .await?;
        if let Some(feed) = existing.into_iter().next() {
            return Ok(feed);
        }
        let mut feed = service.create_feed().await?;
        feed.set_url(Some(url));
        service.save_feed(&mut feed).await?;
        Ok(feed)
    }

    pub async fn new_query_feed(&self, title: &str, query: &str) -> Result<Feed> {
        let service = self.service()?;
        let mut feed = service.create_feed().await?;
        feed.set_title(title);
        feed.set_query(Some(query.to_string()));
        service.save_feed(&mut feed).await?;
        Ok(feed)
    }

    /// All feeds, with query feeds' article collections synthesized by
    /// evaluating their expressions over the whole article set.
    pub async fn feeds(&self) -> Result<Vec<Feed>> {
        let service = self.service()?;
        let mut feeds = service.all_feeds().await?;
        for feed in &mut feeds {
            if let Some(query) = feed.query().map(str::to_string) {
                let articles = self.articles_matching_query(&query).await?;
                feed.set_articles(StoreBackedArray::from_vec(articles));
            }
        }
        Ok(feeds)
    }

    pub async fn save_feed(&self, feed: &mut Feed) -> Result<()> {
        self.service()?.save_feed(feed).await
    }

    pub async fn delete_feed(&self, feed: &Feed) -> Result<usize> {
        let service = self.service()?;
        service.delete_feed(feed).await?;
        let remaining = service.all_feeds().await?.len();
        self.each_subscriber(|s| s.deleted_feed(feed, remaining));
        Ok(remaining)
    }

    pub async fn all_tags(&self) -> Result<Vec<String>> {
        let feeds = self.service()?.feeds_matching(Predicate::HasTags).await?;
        let mut tags: Vec<String> = feeds
            .iter()
            .flat_map(|feed| feed.tags().iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    /// Feeds whose tag list contains `tag` as a substring of any tag.
    /// An empty tag matches everything.
    pub async fn feeds_matching_tag(&self, tag: Option<&str>) -> Result<Vec<Feed>> {
        let feeds = self.feeds().await?;
        let Some(tag) = tag.filter(|t| !t.is_empty()) else {
            return Ok(feeds);
        };
        Ok(feeds
            .into_iter()
            .filter(|feed| feed.tags().iter().any(|t| t.contains(tag)))
            .collect())
    }

    // ---- articles -------------------------------------------------

    /// Union of the given feeds' articles as one lazy collection,
    /// optionally narrowed by a text search over title, summary, and
    /// content. Stays a single backend query when the feeds share a
    /// backend session.
    pub fn articles_of_feeds(&self, feeds: &[Feed], search: Option<&str>) -> StoreBackedArray<Article> {
        let mut iter = feeds.iter().map(|feed| feed.articles());
        let mut combined = match iter.next() {
            Some(first) => first,
            None => StoreBackedArray::new(),
        };
        for array in iter {
            combined = combined.combine(&array);
        }
        match search.filter(|s| !s.is_empty()) {
            Some(needle) => combined.filter_with_predicate(Predicate::TextContains {
                fields: vec![TextField::Title, TextField::Summary, TextField::Content],
                needle: needle.to_string(),
            }),
            None => combined,
        }
    }

    pub async fn articles_matching_query(&self, query: &str) -> Result<Vec<Article>> {
        let articles = self.service()?.articles_matching(Predicate::All).await?;
        Ok(articles
            .into_iter()
            .filter(|article| self.evaluator.evaluate(query, article))
            .collect())
    }

    pub async fn save_article(&self, article: &mut Article) -> Result<()> {
        self.service()?.save_article(article).await
    }

    pub async fn mark_article(&self, article: &mut Article, read: bool) -> Result<()> {
        article.set_read(read);
        self.service()?.save_article(article).await?;
        self.each_subscriber(|s| s.marked_articles(std::slice::from_ref(article), read));
        Ok(())
    }

    /// Marks every unread article of `feed` as read; returns how many
    /// were touched.
    pub async fn mark_feed_as_read(&self, feed: &Feed) -> Result<usize> {
        let service = self.service()?;
        let mut unread = feed.unread_articles().to_vec();
        for article in &mut unread {
            article.set_read(true);
        }
        let mut no_feeds: [Feed; 0] = [];
        service.batch_save(&mut no_feeds, &mut unread).await?;
        if !unread.is_empty() {
            self.each_subscriber(|s| s.marked_articles(&unread, true));
        }
        Ok(unread.len())
    }

    pub async fn delete_article(&self, article: &Article) -> Result<()> {
        self.service()?.delete_article(article).await?;
        self.each_subscriber(|s| s.deleted_article(article));
        Ok(())
    }

    // ---- refresh --------------------------------------------------

    /// Refreshes every eligible feed. At most one cycle runs at a time:
    /// callers arriving while one is in flight wait for that cycle and
    /// receive its outcome instead of starting another.
    pub async fn update_feeds(&self) -> RefreshOutcome {
        let receiver = {
            let mut waiters = self
                .refresh_waiters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match waiters.as_mut() {
                Some(pending) => {
                    let (tx, rx) = oneshot::channel();
                    pending.push(tx);
                    Some(rx)
                }
                None => {
                    *waiters = Some(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = receiver {
            return rx.await.unwrap_or_default();
        }

        let outcome = self.run_refresh_cycle().await;

        let pending = self
            .refresh_waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        for waiter in pending {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    async fn run_refresh_cycle(&self) -> RefreshOutcome {
        // Offline is a silent no-op: empty outcome, zero errors, and
        // subscribers hear nothing.
        if !self.reachability.is_reachable() {
            tracing::info!("offline, skipping refresh cycle");
            return RefreshOutcome::default();
        }

        let service = match self.service() {
            Ok(service) => service,
            Err(e) => return Self::failed_outcome(e),
        };
        let feeds = match service.all_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => return Self::failed_outcome(e),
        };

        let mut outcome = RefreshOutcome::default();
        let mut eligible = Vec::new();
        for mut feed in feeds {
            if feed.is_query_feed() || feed.url().is_none() {
                continue;
            }
            if feed.remaining_wait() > 0 {
                // Resting: pay down one cycle, stay off the network.
                feed.set_remaining_wait(feed.remaining_wait() - 1);
                if let Err(e) = service.save_feed(&mut feed).await {
                    outcome.errors.push(Arc::new(e));
                }
                outcome.feeds.push(feed);
                continue;
            }
            eligible.push(feed);
        }

        // First announcement happens after triage, right before the
        // first network call.
        self.each_subscriber(|s| s.will_update_feeds());

        let total = eligible.len();
        let mut handles = Vec::with_capacity(total);
        for feed in eligible {
            let update_service = self.update_service.clone();
            let semaphore = self.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                update_service.update_feed(feed).await
            }));
        }

        let mut finished = 0usize;
        for handle in handles {
            let (mut feed, error) = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("refresh task panicked: {}", e);
                    continue;
                }
            };
            finished += 1;
            self.each_subscriber(|s| s.did_update_feeds_progress(finished, total));

            match &error {
                Some(e) if e.is_transient() => {
                    let wait_period = feed.wait_period() + 1;
                    feed.set_wait_period(wait_period);
                    feed.set_remaining_wait(wait_period.saturating_sub(2));
                }
                Some(_) => {}
                None => {
                    feed.set_wait_period(0);
                    feed.set_remaining_wait(0);
                }
            }
            if let Err(e) = service.save_feed(&mut feed).await {
                outcome.errors.push(Arc::new(e));
            }
            if let Some(e) = error {
                tracing::warn!(feed = feed.display_title(), "refresh failed: {}", e);
                outcome.errors.push(Arc::new(e));
            }
            outcome.feeds.push(feed);
        }

        self.each_subscriber(|s| s.did_update_feeds(&outcome.feeds, &outcome.errors));
        outcome
    }

    fn failed_outcome(e: FreshetError) -> RefreshOutcome {
        tracing::error!("refresh cycle aborted: {}", e);
        RefreshOutcome {
            feeds: Vec::new(),
            errors: vec![Arc::new(e)],
        }
    }

    /// Refreshes a single feed, bypassing the cycle queue but keeping
    /// the same backoff bookkeeping.
    pub async fn update_feed(&self, feed: Feed) -> (Feed, Option<Arc<FreshetError>>) {
        let (mut feed, error) = self.update_service.update_feed(feed).await;
        match &error {
            Some(e) if e.is_transient() => {
                let wait_period = feed.wait_period() + 1;
                feed.set_wait_period(wait_period);
                feed.set_remaining_wait(wait_period.saturating_sub(2));
            }
            Some(_) => {}
            None => {
                feed.set_wait_period(0);
                feed.set_remaining_wait(0);
            }
        }
        if let Ok(service) = self.service() {
            if let Err(e) = service.save_feed(&mut feed).await {
                tracing::error!("failed to save feed after refresh: {}", e);
            }
        }
        let error = error.map(Arc::new);
        self.each_subscriber(|s| {
            s.did_update_feeds(
                std::slice::from_ref(&feed),
                error.as_ref().map(std::slice::from_ref).unwrap_or(&[]),
            )
        });
        (feed, error)
    }

    // ---- migration ------------------------------------------------

    /// True when the data still lives on the legacy relational backend.
    pub fn database_update_available(&self) -> Result<bool> {
        self.factory.legacy_backend_in_use()
    }

    /// Migrates the legacy store into a fresh document store, swaps the
    /// live service, then wipes the legacy data. The swap happens only
    /// after the copy fully succeeds; a failed copy leaves the legacy
    /// backend current and untouched.
    pub async fn perform_database_update(&self, progress: impl Fn(f64)) -> Result<()> {
        if !self.database_update_available()? {
            progress(1.0);
            return Ok(());
        }
        let legacy = self.factory.current_service()?;
        let replacement = self.factory.new_document_service()?;

        self.migrator
            .migrate(&legacy, &replacement, |p| progress(p * 0.5))
            .await?;
        self.factory.set_current(replacement);
        self.migrator
            .delete_everything(&legacy, |p| progress(0.5 + p * 0.5))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::fetcher::{FetchResult, Fetcher};
    use crate::store::{DataServiceFactory, InMemoryService, SqliteService};

    const BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <item><guid>g-1</guid><title>one</title><link>https://example.com/1</link></item>
  </channel>
</rss>"#;

    /// Fetcher that can fail transiently a fixed number of times, delay
    /// responses, and count calls.
    struct TestFetcher {
        calls: AtomicUsize,
        fail_transient: AtomicUsize,
        delay: Duration,
    }

    impl TestFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_transient: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn failing(times: usize) -> Self {
            let fetcher = Self::new();
            fetcher.fail_transient.store(times, Ordering::SeqCst);
            fetcher
        }

        fn slow(delay: Duration) -> Self {
            let mut fetcher = Self::new();
            fetcher.delay = delay;
            fetcher
        }
    }

    #[async_trait]
    impl Fetcher for TestFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _etag: Option<&str>,
            _last_modified: Option<&str>,
        ) -> crate::app::Result<FetchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let remaining = self.fail_transient.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_transient.store(remaining - 1, Ordering::SeqCst);
                return Err(FreshetError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Ok(FetchResult::Content {
                body: BODY.as_bytes().to_vec(),
                etag: None,
                last_modified: None,
            })
        }
    }

    fn repository(fetcher: Arc<TestFetcher>) -> (DataRepository, Arc<DataServiceFactory>) {
        let factory = Arc::new(DataServiceFactory::with_service(Arc::new(
            InMemoryService::new(),
        )));
        let update_service = Arc::new(UpdateService::new(factory.clone(), fetcher));
        (
            DataRepository::new(factory.clone(), update_service),
            factory,
        )
    }

    async fn url_feed(factory: &Arc<DataServiceFactory>, url: &str) -> Feed {
        let service = factory.current_service().unwrap();
        let mut feed = service.create_feed().await.unwrap();
        feed.set_url(Some(Url::parse(url).unwrap()));
        service.save_feed(&mut feed).await.unwrap();
        feed
    }

    #[tokio::test]
    async fn test_resting_feeds_skip_the_network() {
        let fetcher = Arc::new(TestFetcher::new());
        let (repo, factory) = repository(fetcher.clone());
        let service = factory.current_service().unwrap();

        url_feed(&factory, "https://a.example.com/feed.xml").await;
        let mut resting_one = url_feed(&factory, "https://b.example.com/feed.xml").await;
        resting_one.set_remaining_wait(1);
        service.save_feed(&mut resting_one).await.unwrap();
        let mut resting_two = url_feed(&factory, "https://c.example.com/feed.xml").await;
        resting_two.set_remaining_wait(2);
        service.save_feed(&mut resting_two).await.unwrap();

        let outcome = repo.update_feeds().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.feeds.len(), 3);
        assert!(outcome.errors.is_empty());

        let mut waits: Vec<u32> = service
            .all_feeds()
            .await
            .unwrap()
            .iter()
            .map(Feed::remaining_wait)
            .collect();
        waits.sort_unstable();
        assert_eq!(waits, [0, 0, 1]);
    }

    #[tokio::test]
    async fn test_transient_errors_grow_the_backoff() {
        let fetcher = Arc::new(TestFetcher::failing(3));
        let (repo, factory) = repository(fetcher.clone());
        let service = factory.current_service().unwrap();
        url_feed(&factory, "https://a.example.com/feed.xml").await;

        // Failures one and two leave no residual wait (wait_period 1
        // and 2 both map to zero remaining cycles).
        repo.update_feeds().await;
        repo.update_feeds().await;
        let feed = &service.all_feeds().await.unwrap()[0];
        assert_eq!(feed.wait_period(), 2);
        assert_eq!(feed.remaining_wait(), 0);

        // Third failure starts skipping cycles.
        repo.update_feeds().await;
        let feed = &service.all_feeds().await.unwrap()[0];
        assert_eq!(feed.wait_period(), 3);
        assert_eq!(feed.remaining_wait(), 1);

        // Resting cycle: no fetch, the wait is paid down.
        repo.update_feeds().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        let feed = &service.all_feeds().await.unwrap()[0];
        assert_eq!(feed.remaining_wait(), 0);

        // Success resets the whole backoff.
        repo.update_feeds().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
        let feed = &service.all_feeds().await.unwrap()[0];
        assert_eq!(feed.wait_period(), 0);
        assert_eq!(feed.remaining_wait(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_cycle() {
        let fetcher = Arc::new(TestFetcher::slow(Duration::from_millis(50)));
        let (repo, factory) = repository(fetcher.clone());
        url_feed(&factory, "https://a.example.com/feed.xml").await;

        let (first, second) = tokio::join!(repo.update_feeds(), repo.update_feeds());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.feeds.len(), 1);
        assert_eq!(second.feeds.len(), 1);

        // The cycle finished; the next call starts a fresh one.
        repo.update_feeds().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Default)]
    struct RecordingSubscriber {
        will: AtomicUsize,
        did: AtomicUsize,
        progress: AtomicUsize,
        marked: AtomicUsize,
    }

    impl DataSubscriber for RecordingSubscriber {
        fn will_update_feeds(&self) {
            self.will.fetch_add(1, Ordering::SeqCst);
        }
        fn did_update_feeds_progress(&self, _finished: usize, _total: usize) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
        fn did_update_feeds(&self, _feeds: &[Feed], _errors: &[Arc<FreshetError>]) {
            self.did.fetch_add(1, Ordering::SeqCst);
        }
        fn marked_articles(&self, articles: &[Article], _read: bool) {
            self.marked.fetch_add(articles.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_subscribers_observe_the_cycle() {
        let fetcher = Arc::new(TestFetcher::new());
        let (repo, factory) = repository(fetcher);
        url_feed(&factory, "https://a.example.com/feed.xml").await;
        url_feed(&factory, "https://b.example.com/feed.xml").await;

        let subscriber = Arc::new(RecordingSubscriber::default());
        let as_dyn: Arc<dyn DataSubscriber> = subscriber.clone();
        repo.add_subscriber(&as_dyn);

        repo.update_feeds().await;
        assert_eq!(subscriber.will.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber.progress.load(Ordering::SeqCst), 2);
        assert_eq!(subscriber.did.load(Ordering::SeqCst), 1);
    }

    struct NeverReachable;

    impl Reachable for NeverReachable {
        fn is_reachable(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_offline_cycle_is_silent() {
        let fetcher = Arc::new(TestFetcher::new());
        let factory = Arc::new(DataServiceFactory::with_service(Arc::new(
            InMemoryService::new(),
        )));
        let update_service = Arc::new(UpdateService::new(factory.clone(), fetcher.clone()));
        let repo = DataRepository::with_parts(
            factory.clone(),
            update_service,
            Box::new(SimpleEvaluator::new()),
            Arc::new(NeverReachable),
            DEFAULT_WORKERS,
        );
        url_feed(&factory, "https://a.example.com/feed.xml").await;

        let subscriber = Arc::new(RecordingSubscriber::default());
        let as_dyn: Arc<dyn DataSubscriber> = subscriber.clone();
        repo.add_subscriber(&as_dyn);

        let outcome = repo.update_feeds().await;
        assert!(outcome.feeds.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(subscriber.will.load(Ordering::SeqCst), 0);
        assert_eq!(subscriber.progress.load(Ordering::SeqCst), 0);
        assert_eq!(subscriber.did.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mark_feed_as_read() {
        let fetcher = Arc::new(TestFetcher::new());
        let (repo, factory) = repository(fetcher);
        let service = factory.current_service().unwrap();

        let mut feed = service.create_feed().await.unwrap();
        for _ in 0..2 {
            let mut article = service.create_article(Some(&mut feed)).await.unwrap();
            service.save_article(&mut article).await.unwrap();
        }

        let subscriber = Arc::new(RecordingSubscriber::default());
        let as_dyn: Arc<dyn DataSubscriber> = subscriber.clone();
        repo.add_subscriber(&as_dyn);

        let feed = service.all_feeds().await.unwrap().remove(0);
        let marked = repo.mark_feed_as_read(&feed).await.unwrap();
        assert_eq!(marked, 2);
        assert_eq!(subscriber.marked.load(Ordering::SeqCst), 2);

        let articles = service
            .articles_matching(Predicate::Read(false))
            .await
            .unwrap();
        assert!(articles.is_empty());
    }

    #[tokio::test]
    async fn test_query_feed_articles_are_synthesized() {
        let fetcher = Arc::new(TestFetcher::new());
        let (repo, factory) = repository(fetcher);
        let service = factory.current_service().unwrap();

        let mut feed = service.create_feed().await.unwrap();
        let mut read = service.create_article(Some(&mut feed)).await.unwrap();
        read.set_read(true);
        service.save_article(&mut read).await.unwrap();
        let mut unread = service.create_article(Some(&mut feed)).await.unwrap();
        service.save_article(&mut unread).await.unwrap();

        repo.new_query_feed("Unread", "read == false").await.unwrap();

        let feeds = repo.feeds().await.unwrap();
        let query_feed = feeds.iter().find(|f| f.is_query_feed()).unwrap();
        assert_eq!(query_feed.articles().count(), 1);
        assert!(!query_feed.articles().first().unwrap().read());
    }

    #[tokio::test]
    async fn test_new_feed_is_idempotent_per_url() {
        let fetcher = Arc::new(TestFetcher::new());
        let (repo, factory) = repository(fetcher);

        let url = Url::parse("https://a.example.com/feed.xml").unwrap();
        let first = repo.new_feed(url.clone()).await.unwrap();
        let second = repo.new_feed(url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            factory.current_service().unwrap().all_feeds().await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_database_update_migrates_swaps_and_wipes() {
        let dir = tempfile::tempdir().unwrap();
        let relational_path = dir.path().join("store.db");
        let factory = Arc::new(DataServiceFactory::new(
            relational_path.clone(),
            dir.path().join("store.json"),
            None,
        ));
        let fetcher = Arc::new(TestFetcher::new());
        let update_service = Arc::new(UpdateService::new(factory.clone(), fetcher));
        let repo = DataRepository::new(factory.clone(), update_service);

        let service = factory.current_service().unwrap();
        let mut feed = service.create_feed().await.unwrap();
        feed.set_title("Legacy");
        service.save_feed(&mut feed).await.unwrap();
        let mut article = service.create_article(Some(&mut feed)).await.unwrap();
        article.set_identifier("guid-1");
        service.save_article(&mut article).await.unwrap();

        assert!(repo.database_update_available().unwrap());
        let last_progress = StdMutex::new(0.0f64);
        repo.perform_database_update(|p| *last_progress.lock().unwrap() = p)
            .await
            .unwrap();
        assert_eq!(*last_progress.lock().unwrap(), 1.0);
        assert!(!repo.database_update_available().unwrap());

        let feeds = repo.feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title(), "Legacy");
        assert_eq!(feeds[0].articles().count(), 1);

        // The legacy store is empty afterwards.
        let legacy = SqliteService::open(&relational_path, None).unwrap();
        let legacy: Arc<dyn DataService> = Arc::new(legacy);
        assert!(legacy.all_feeds().await.unwrap().is_empty());
        assert!(legacy
            .articles_matching(Predicate::All)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_articles_of_feeds_with_search() {
        let service: Arc<dyn DataService> = Arc::new(SqliteService::in_memory(None).unwrap());
        let factory = Arc::new(DataServiceFactory::with_service(service.clone()));
        let fetcher = Arc::new(TestFetcher::new());
        let update_service = Arc::new(UpdateService::new(factory.clone(), fetcher));
        let repo = DataRepository::new(factory, update_service);

        let mut a = service.create_feed().await.unwrap();
        let mut rust = service.create_article(Some(&mut a)).await.unwrap();
        rust.set_title("Rust release");
        service.save_article(&mut rust).await.unwrap();
        let mut b = service.create_feed().await.unwrap();
        let mut other = service.create_article(Some(&mut b)).await.unwrap();
        other.set_title("Something else");
        service.save_article(&mut other).await.unwrap();

        let feeds = service.all_feeds().await.unwrap();
        let all = repo.articles_of_feeds(&feeds, None);
        assert_eq!(all.count(), 2);
        assert!(all.is_store_backed(), "same-session union stays lazy");

        let searched = repo.articles_of_feeds(&feeds, Some("rust"));
        assert_eq!(searched.count(), 1);
        assert_eq!(searched.first().unwrap().title(), "Rust release");
    }
}
