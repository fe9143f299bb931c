//! # Freshet
//!
//! The persistence and synchronization core of a personal feed reader.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher → Normalizer → UpdateService → DataService (SQLite | JSON)
//!                                             ↑
//!                        DataRepository ──────┘── DatabaseMigrator
//! ```
//!
//! - [`fetcher`]: HTTP client with ETag/conditional request support
//! - [`normalizer`]: Converts RSS/Atom feeds to unified domain models
//! - [`store`]: The [`DataService`](store::DataService) trait with its
//!   relational, document, and in-memory backends
//! - [`collection`]: Lazily materialized, store-backed object arrays
//! - [`repository`]: The facade tying storage, refresh, and migration
//!   together
//!
//! ## Quick Start
//!
//! ```bash
//! # Subscribe to a feed
//! freshet add https://blog.rust-lang.org/feed.xml
//!
//! # Refresh everything
//! freshet update
//!
//! # List feeds with unread counts
//! freshet list
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all
/// components: backend factory, fetcher, repository.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Store-backed collections.
///
/// - [`StoreBackedArray`](collection::StoreBackedArray): lazily
///   materialized pages over a backend query
/// - [`Predicate`](collection::Predicate): backend-independent filters
pub mod collection;

/// Configuration management.
///
/// Loads from `~/.config/freshet/config.toml`; storage paths and fetch
/// tuning.
pub mod config;

/// Core domain models.
///
/// - [`Feed`](domain::Feed): a subscription or a query feed
/// - [`Article`](domain::Article): one entry with read state and flags
/// - [`Enclosure`](domain::Enclosure): attached media
pub mod domain;

/// HTTP fetching with conditional request support.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for feed fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based
///   implementation
pub mod fetcher;

/// Cross-backend migration.
///
/// [`DatabaseMigrator`](migrator::DatabaseMigrator) copies one backend
/// into another, collapsing duplicate rows along the way.
pub mod migrator;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0 and Atom 0.3/1.0 into unified
/// [`ParsedFeed`](normalizer::ParsedFeed) structs.
pub mod normalizer;

/// Query feed expression evaluation.
pub mod query;

/// The storage facade.
///
/// [`DataRepository`](repository::DataRepository) is what applications
/// talk to: feeds, articles, refresh cycles, backend migration.
pub mod repository;

/// Storage backends.
///
/// - [`DataService`](store::DataService): trait defining storage
///   operations
/// - [`SqliteService`](store::SqliteService): relational backend
/// - [`DocumentService`](store::DocumentService): JSON document backend
pub mod store;

/// Feed refresh against the store.
///
/// [`UpdateService`](update::UpdateService) fetches, parses, and
/// reconciles one feed at a time.
pub mod update;
