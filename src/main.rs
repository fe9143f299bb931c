use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use freshet::app::AppContext;
use freshet::cli::{commands, Cli, Commands};
use freshet::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(workers) = cli.workers {
        config.fetch.workers = workers;
    }
    let ctx = AppContext::new(&config)?;

    match cli.command {
        Commands::Add { url } => {
            commands::add_feed(&ctx, &url).await?;
        }
        Commands::AddQuery { title, query } => {
            commands::add_query_feed(&ctx, &title, &query).await?;
        }
        Commands::Remove { feed } => {
            commands::remove_feed(&ctx, &feed).await?;
        }
        Commands::Update => {
            commands::update_feeds(&ctx).await?;
        }
        Commands::List {
            articles,
            tag,
            search,
        } => {
            if articles {
                commands::list_articles(&ctx, tag.as_deref(), search.as_deref()).await?;
            } else {
                commands::list_feeds(&ctx, tag.as_deref()).await?;
            }
        }
        Commands::MarkRead { url } => {
            commands::mark_feed_as_read(&ctx, &url).await?;
        }
        Commands::Tags => {
            commands::list_tags(&ctx).await?;
        }
        Commands::Migrate => {
            commands::migrate(&ctx).await?;
        }
        Commands::Status => {
            commands::status(&ctx).await?;
        }
    }

    Ok(())
}
