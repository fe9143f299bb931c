use url::Url;

use crate::app::{AppContext, FreshetError, Result};
use crate::domain::Feed;
use crate::store::BackendKind;

pub async fn add_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let url = Url::parse(url)?;
    let feed = ctx.repository.new_feed(url.clone()).await?;
    println!("Added feed: {}", url);

    // First fetch, so the subscription is immediately populated.
    let (feed, error) = ctx.repository.update_feed(feed).await;
    match error {
        Some(e) => eprintln!("  Error fetching {}: {}", feed.display_title(), e),
        None => {
            if !feed.title().is_empty() {
                println!("Feed title: {}", feed.title());
            }
            println!("Fetched {} articles", feed.articles().count());
        }
    }
    Ok(())
}

pub async fn add_query_feed(ctx: &AppContext, title: &str, query: &str) -> Result<()> {
    let feed = ctx.repository.new_query_feed(title, query).await?;
    println!("Added query feed: {}", feed.display_title());
    Ok(())
}

pub async fn remove_feed(ctx: &AppContext, target: &str) -> Result<()> {
    let feed = find_feed(ctx, target).await?;
    let remaining = ctx.repository.delete_feed(&feed).await?;
    println!(
        "Removed feed: {} ({} remaining)",
        feed.display_title(),
        remaining
    );
    Ok(())
}

pub async fn update_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.repository.feeds().await?;
    if feeds.is_empty() {
        println!("No feeds to update");
        return Ok(());
    }

    println!("Updating {} feeds...", feeds.len());
    let outcome = ctx.repository.update_feeds().await;
    for error in &outcome.errors {
        eprintln!("  Error: {}", error);
    }
    println!(
        "Update complete: {} feeds, {} errors",
        outcome.feeds.len(),
        outcome.errors.len()
    );
    Ok(())
}

pub async fn list_feeds(ctx: &AppContext, tag: Option<&str>) -> Result<()> {
    let feeds = ctx.repository.feeds_matching_tag(tag).await?;
    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for feed in feeds {
        let source = match (feed.url(), feed.query()) {
            (Some(url), _) => url.to_string(),
            (None, Some(query)) => format!("query: {}", query),
            (None, None) => String::new(),
        };
        println!(
            "{} ({} unread)\n  {}",
            feed.display_title(),
            feed.unread_count(),
            source
        );
    }
    Ok(())
}

pub async fn list_articles(
    ctx: &AppContext,
    tag: Option<&str>,
    search: Option<&str>,
) -> Result<()> {
    let feeds = ctx.repository.feeds_matching_tag(tag).await?;
    let articles = ctx.repository.articles_of_feeds(&feeds, search);
    if articles.is_empty() {
        println!("No articles");
        return Ok(());
    }

    for article in articles.to_vec() {
        let marker = if article.read() { " " } else { "*" };
        let link = article
            .link()
            .map(|l| l.to_string())
            .unwrap_or_default();
        println!("{} {}\n  {}", marker, article.title(), link);
    }
    Ok(())
}

pub async fn mark_feed_as_read(ctx: &AppContext, url: &str) -> Result<()> {
    let feed = find_feed(ctx, url).await?;
    let marked = ctx.repository.mark_feed_as_read(&feed).await?;
    println!("Marked {} articles as read", marked);
    Ok(())
}

pub async fn list_tags(ctx: &AppContext) -> Result<()> {
    let tags = ctx.repository.all_tags().await?;
    if tags.is_empty() {
        println!("No tags");
        return Ok(());
    }
    for tag in tags {
        println!("{}", tag);
    }
    Ok(())
}

pub async fn migrate(ctx: &AppContext) -> Result<()> {
    if !ctx.repository.database_update_available()? {
        println!("Already on the document backend");
        return Ok(());
    }
    println!("Migrating to the document backend...");
    ctx.repository
        .perform_database_update(|progress| {
            print!("\r{:3.0}%", progress * 100.0);
        })
        .await?;
    println!("\rMigration complete");
    Ok(())
}

pub async fn status(ctx: &AppContext) -> Result<()> {
    let service = ctx.factory.current_service()?;
    let backend = match service.kind() {
        BackendKind::Relational => "sqlite",
        BackendKind::Document => "document",
        BackendKind::Memory => "memory",
    };
    let feeds = ctx.repository.feeds().await?;
    let unread: usize = feeds.iter().map(Feed::unread_count).sum();
    let articles: usize = feeds
        .iter()
        .filter(|f| !f.is_query_feed())
        .map(|f| f.articles().count())
        .sum();

    println!("Backend: {}", backend);
    println!("Feeds: {}", feeds.len());
    println!("Articles: {} ({} unread)", articles, unread);
    if ctx.repository.database_update_available()? {
        println!("A migration to the document backend is available (run `freshet migrate`)");
    }
    Ok(())
}

async fn find_feed(ctx: &AppContext, target: &str) -> Result<Feed> {
    let feeds = ctx.repository.feeds().await?;
    feeds
        .into_iter()
        .find(|feed| {
            feed.url().map(|u| u.as_str()) == Some(target) || feed.display_title() == target
        })
        .ok_or_else(|| FreshetError::Other(format!("feed not found: {}", target)))
}
