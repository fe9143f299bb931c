pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "freshet")]
#[command(about = "A feed reader's persistence and refresh core", long_about = None)]
pub struct Cli {
    /// Number of parallel workers for refreshing feeds
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a feed
    Add {
        /// URL of the feed to add
        url: String,
    },
    /// Create a query feed from a boolean expression
    AddQuery {
        /// Display title for the query feed
        title: String,
        /// Expression, e.g. 'read == false && title contains "rust"'
        query: String,
    },
    /// Remove a feed
    Remove {
        /// URL (or title, for query feeds) of the feed to remove
        feed: String,
    },
    /// Refresh all feeds
    Update,
    /// List feeds or articles
    List {
        /// Show articles instead of feeds
        #[arg(long)]
        articles: bool,
        /// Only feeds carrying this tag
        #[arg(long)]
        tag: Option<String>,
        /// Narrow articles by a text search
        #[arg(long)]
        search: Option<String>,
    },
    /// Mark every article of a feed as read
    MarkRead {
        /// URL of the feed
        url: String,
    },
    /// List every tag in use
    Tags,
    /// Migrate the legacy store to the document backend
    Migrate,
    /// Show backend and subscription counts
    Status,
}
