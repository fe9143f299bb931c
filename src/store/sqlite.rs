use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use rusqlite_migration::{Migrations, M};
use url::Url;

use crate::app::{FreshetError, Result};
use crate::collection::{
    ControllerDescriptor, Entity, FetchController, Predicate, SortSpec, StoreBackedArray,
    TextField,
};
use crate::domain::{Article, Author, Enclosure, Feed, StoreId};
use crate::store::{next_session_id, BackendKind, DataService, SearchIndex, SearchItem};

const FEED_COLUMNS: &str = "id, title, url, summary, query, tags, wait_period, remaining_wait, \
     image, etag, last_modified";
const ARTICLE_COLUMNS: &str = "id, feed_id, title, link, summary, authors, published, updated_at, \
     identifier, content, read, estimated_reading_time, flags";
const ENCLOSURE_COLUMNS: &str = "id, article_id, url, kind";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!(
        "../../migrations/001-initial/up.sql"
    ))])
}

/// The relational backend: SQLite through `rusqlite`, one connection
/// behind a mutex, schema managed by `rusqlite_migration`.
pub struct SqliteService {
    conn: Arc<Mutex<Connection>>,
    session: u64,
    search_index: Option<Arc<dyn SearchIndex>>,
}

impl SqliteService {
    pub fn open(path: &Path, search_index: Option<Arc<dyn SearchIndex>>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?, search_index)
    }

    pub fn in_memory(search_index: Option<Arc<dyn SearchIndex>>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, search_index)
    }

    fn from_connection(
        mut conn: Connection,
        search_index: Option<Arc<dyn SearchIndex>>,
    ) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations()
            .to_latest(&mut conn)
            .map_err(|e| FreshetError::Store(format!("migration failed: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            session: next_session_id(),
            search_index,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn article_array(&self, predicate: Predicate) -> StoreBackedArray<Article> {
        StoreBackedArray::from_controller(Box::new(SqliteArticleController {
            conn: self.conn.clone(),
            descriptor: ControllerDescriptor {
                entity: Entity::Articles,
                predicate,
                sort: SortSpec::ArticlesByPublishedDesc,
                session: self.session,
            },
        }))
    }

    fn enclosure_array(&self, predicate: Predicate) -> StoreBackedArray<Enclosure> {
        enclosure_array(&self.conn, self.session, predicate)
    }

    fn attach_feed(&self, feed: &mut Feed) {
        let articles = if feed.is_query_feed() {
            // Query feed articles are synthesized by the repository.
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

    fn attach_article(&self, article: &mut Article) {
        if let Some(id) = article.article_id() {
            let enclosures = self.enclosure_array(Predicate::ArticleId(id.clone()));
            article.set_enclosures(enclosures);
        }
        article.mark_clean();
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

#[async_trait]
impl DataService for SqliteService {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn create_feed(&self) -> Result<Feed> {
        let id = {
            let conn = self.conn();
            conn.execute("INSERT INTO feeds (title) VALUES ('')", [])?;
            conn.last_insert_rowid()
        };
        let mut feed = Feed::new();
        feed.assign_id(StoreId::Relational(id));
        self.attach_feed(&mut feed);
        Ok(feed)
    }

    async fn create_article(&self, feed: Option<&mut Feed>) -> Result<Article> {
        let mut article = Article::new();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO articles (published) VALUES (?1)",
                [article.published().to_rfc3339()],
            )?;
            conn.last_insert_rowid()
        };
        article.assign_id(StoreId::Relational(id));
        self.attach_article(&mut article);
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
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO enclosures (url, kind) VALUES (?1, ?2)",
                [url.as_str(), kind],
            )?;
            conn.last_insert_rowid()
        };
        let mut enclosure = Enclosure::new(url, kind);
        enclosure.assign_id(StoreId::Relational(id));
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
        let mut feeds = {
            let conn = self.conn();
            let mut params = Vec::new();
            let clause = where_clause(Entity::Feeds, &predicate, &mut params);
            let sql = format!(
                "SELECT {FEED_COLUMNS} FROM feeds WHERE {clause} {}",
                order_clause(SortSpec::FeedsByTitle)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), feed_from_row)?;
            rows.collect::<rusqlite::Result<Vec<Feed>>>()?
        };
        for feed in &mut feeds {
            self.attach_feed(feed);
        }
        Ok(feeds)
    }

    async fn articles_matching(&self, predicate: Predicate) -> Result<Vec<Article>> {
        let mut articles = {
            let conn = self.conn();
            let mut params = Vec::new();
            let clause = where_clause(Entity::Articles, &predicate, &mut params);
            let sql = format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles WHERE {clause} {}",
                order_clause(SortSpec::ArticlesByPublishedDesc)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), article_from_row)?;
            rows.collect::<rusqlite::Result<Vec<Article>>>()?
        };
        for article in &mut articles {
            self.attach_article(article);
        }
        Ok(articles)
    }

    async fn save_feed(&self, feed: &mut Feed) -> Result<()> {
        match feed.feed_id().cloned() {
            Some(StoreId::Relational(id)) => {
                if !feed.updated() {
                    return Ok(());
                }
                self.conn().execute(
                    "UPDATE feeds SET title = ?1, url = ?2, summary = ?3, query = ?4, \
                     tags = ?5, wait_period = ?6, remaining_wait = ?7, image = ?8, \
                     etag = ?9, last_modified = ?10 WHERE id = ?11",
                    rusqlite::params![
                        feed.title(),
                        feed.url().map(Url::as_str),
                        feed.summary(),
                        feed.query(),
                        serde_json::to_string(feed.tags())?,
                        feed.wait_period(),
                        feed.remaining_wait(),
                        feed.image(),
                        feed.etag(),
                        feed.last_modified(),
                        id,
                    ],
                )?;
                feed.mark_clean();
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "feed belongs to a different backend".into(),
            )),
            None => {
                let id = {
                    let conn = self.conn();
                    conn.execute(
                        "INSERT INTO feeds (title, url, summary, query, tags, wait_period, \
                         remaining_wait, image, etag, last_modified) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        rusqlite::params![
                            feed.title(),
                            feed.url().map(Url::as_str),
                            feed.summary(),
                            feed.query(),
                            serde_json::to_string(feed.tags())?,
                            feed.wait_period(),
                            feed.remaining_wait(),
                            feed.image(),
                            feed.etag(),
                            feed.last_modified(),
                        ],
                    )?;
                    conn.last_insert_rowid()
                };
                feed.assign_id(StoreId::Relational(id));
                self.attach_feed(feed);
                Ok(())
            }
        }
    }

    async fn save_article(&self, article: &mut Article) -> Result<()> {
        match article.article_id().cloned() {
            Some(StoreId::Relational(id)) => {
                if !article.updated() {
                    return Ok(());
                }
                self.conn().execute(
                    "UPDATE articles SET feed_id = ?1, title = ?2, link = ?3, summary = ?4, \
                     authors = ?5, published = ?6, updated_at = ?7, identifier = ?8, \
                     content = ?9, read = ?10, estimated_reading_time = ?11, flags = ?12 \
                     WHERE id = ?13",
                    rusqlite::params![
                        relational_id(article.feed_id()),
                        article.title(),
                        article.link().map(Url::as_str),
                        article.summary(),
                        serde_json::to_string(article.authors())?,
                        article.published().to_rfc3339(),
                        article.updated_at().map(|d| d.to_rfc3339()),
                        article.identifier(),
                        article.content(),
                        article.read(),
                        article.estimated_reading_time(),
                        serde_json::to_string(article.flags())?,
                        id,
                    ],
                )?;
                article.mark_clean();
                self.index_article(article);
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "article belongs to a different backend".into(),
            )),
            None => {
                let id = {
                    let conn = self.conn();
                    conn.execute(
                        "INSERT INTO articles (feed_id, title, link, summary, authors, \
                         published, updated_at, identifier, content, read, \
                         estimated_reading_time, flags) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        rusqlite::params![
                            relational_id(article.feed_id()),
                            article.title(),
                            article.link().map(Url::as_str),
                            article.summary(),
                            serde_json::to_string(article.authors())?,
                            article.published().to_rfc3339(),
                            article.updated_at().map(|d| d.to_rfc3339()),
                            article.identifier(),
                            article.content(),
                            article.read(),
                            article.estimated_reading_time(),
                            serde_json::to_string(article.flags())?,
                        ],
                    )?;
                    conn.last_insert_rowid()
                };
                article.assign_id(StoreId::Relational(id));
                self.attach_article(article);
                self.index_article(article);
                Ok(())
            }
        }
    }

    async fn save_enclosure(&self, enclosure: &mut Enclosure) -> Result<()> {
        match enclosure.enclosure_id().cloned() {
            Some(StoreId::Relational(id)) => {
                if !enclosure.updated() {
                    return Ok(());
                }
                self.conn().execute(
                    "UPDATE enclosures SET article_id = ?1, url = ?2, kind = ?3 WHERE id = ?4",
                    rusqlite::params![
                        relational_id(enclosure.article_id()),
                        enclosure.url().as_str(),
                        enclosure.kind(),
                        id,
                    ],
                )?;
                enclosure.mark_clean();
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "enclosure belongs to a different backend".into(),
            )),
            None => {
                let id = {
                    let conn = self.conn();
                    conn.execute(
                        "INSERT INTO enclosures (article_id, url, kind) VALUES (?1, ?2, ?3)",
                        rusqlite::params![
                            relational_id(enclosure.article_id()),
                            enclosure.url().as_str(),
                            enclosure.kind(),
                        ],
                    )?;
                    conn.last_insert_rowid()
                };
                enclosure.assign_id(StoreId::Relational(id));
                enclosure.mark_clean();
                Ok(())
            }
        }
    }

    async fn delete_feed(&self, feed: &Feed) -> Result<()> {
        let Some(StoreId::Relational(id)) = feed.feed_id() else {
            return Ok(());
        };
        let identifiers = {
            let conn = self.conn();
            let identifiers = {
                let mut stmt =
                    conn.prepare("SELECT identifier FROM articles WHERE feed_id = ?1")?;
                let rows = stmt.query_map([id], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()?
            };
            conn.execute("DELETE FROM feeds WHERE id = ?1", [id])?;
            identifiers
        };
        self.unindex_identifiers(&identifiers);
        Ok(())
    }

    async fn delete_article(&self, article: &Article) -> Result<()> {
        let Some(StoreId::Relational(id)) = article.article_id() else {
            return Ok(());
        };
        self.conn()
            .execute("DELETE FROM articles WHERE id = ?1", [id])?;
        self.unindex_identifiers(&[article.identifier().to_string()]);
        Ok(())
    }

    async fn delete_enclosure(&self, enclosure: &Enclosure) -> Result<()> {
        let Some(StoreId::Relational(id)) = enclosure.enclosure_id() else {
            return Ok(());
        };
        self.conn()
            .execute("DELETE FROM enclosures WHERE id = ?1", [id])?;
        Ok(())
    }
}

fn enclosure_array(
    conn: &Arc<Mutex<Connection>>,
    session: u64,
    predicate: Predicate,
) -> StoreBackedArray<Enclosure> {
    StoreBackedArray::from_controller(Box::new(SqliteEnclosureController {
        conn: conn.clone(),
        descriptor: ControllerDescriptor {
            entity: Entity::Enclosures,
            predicate,
            sort: SortSpec::EnclosuresByUrl,
            session,
        },
    }))
}

fn relational_id(id: Option<&StoreId>) -> Option<i64> {
    match id {
        Some(StoreId::Relational(id)) => Some(*id),
        _ => None,
    }
}

/// Owner rowid bound by an insert through a scoped controller.
fn owner_rowid(predicate: &Predicate) -> Option<i64> {
    match predicate {
        Predicate::FeedId(StoreId::Relational(id))
        | Predicate::ArticleId(StoreId::Relational(id)) => Some(*id),
        Predicate::And(a, b) => owner_rowid(a).or_else(|| owner_rowid(b)),
        _ => None,
    }
}

fn order_clause(sort: SortSpec) -> &'static str {
    match sort {
        SortSpec::FeedsByTitle => "ORDER BY title, url",
        SortSpec::ArticlesByPublishedDesc => "ORDER BY published DESC, id",
        SortSpec::EnclosuresByUrl => "ORDER BY url, id",
        SortSpec::Unsorted => "ORDER BY id",
    }
}

fn text_column(entity: Entity, field: TextField) -> Option<&'static str> {
    match (entity, field) {
        (Entity::Feeds, TextField::Title) | (Entity::Articles, TextField::Title) => Some("title"),
        (Entity::Feeds, TextField::Summary) | (Entity::Articles, TextField::Summary) => {
            Some("summary")
        }
        (Entity::Articles, TextField::Content) => Some("content"),
        _ => None,
    }
}

/// Compiles a predicate to a SQL condition over `entity`'s table,
/// appending bind values to `params`. Predicates that cannot apply to
/// the entity compile to a constant-false condition, matching the
/// structural [`Matches`](crate::collection::Matches) evaluation.
fn where_clause(entity: Entity, predicate: &Predicate, params: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::All => "1 = 1".into(),
        Predicate::FeedId(id) => {
            let Some(id) = relational_id(Some(id)) else {
                return "0 = 1".into();
            };
            params.push(Value::Integer(id));
            let n = params.len();
            match entity {
                Entity::Feeds => format!("id = ?{n}"),
                Entity::Articles => format!("feed_id = ?{n}"),
                Entity::Enclosures => "0 = 1".into(),
            }
        }
        Predicate::ArticleId(id) => {
            let Some(id) = relational_id(Some(id)) else {
                return "0 = 1".into();
            };
            params.push(Value::Integer(id));
            let n = params.len();
            match entity {
                Entity::Articles => format!("id = ?{n}"),
                Entity::Enclosures => format!("article_id = ?{n}"),
                Entity::Feeds => "0 = 1".into(),
            }
        }
        Predicate::Identifier(identifier) => {
            if entity != Entity::Articles {
                return "0 = 1".into();
            }
            params.push(Value::Text(identifier.clone()));
            format!("identifier = ?{}", params.len())
        }
        Predicate::Read(read) => {
            if entity != Entity::Articles {
                return "0 = 1".into();
            }
            params.push(Value::Integer(*read as i64));
            format!("read = ?{}", params.len())
        }
        Predicate::HasTags => match entity {
            Entity::Feeds => "tags <> '[]'".into(),
            _ => "0 = 1".into(),
        },
        Predicate::UrlEquals(url) => {
            let column = match entity {
                Entity::Feeds => "url",
                Entity::Articles => "link",
                Entity::Enclosures => "url",
            };
            params.push(Value::Text(url.clone()));
            format!("{column} = ?{}", params.len())
        }
        Predicate::TextContains { fields, needle } => {
            let mut conditions = Vec::new();
            for field in fields {
                if let Some(column) = text_column(entity, *field) {
                    params.push(Value::Text(needle.to_lowercase()));
                    conditions.push(format!("instr(lower({column}), ?{}) > 0", params.len()));
                }
            }
            if conditions.is_empty() {
                "0 = 1".into()
            } else {
                format!("({})", conditions.join(" OR "))
            }
        }
        Predicate::And(a, b) => {
            let left = where_clause(entity, a, params);
            let right = where_clause(entity, b, params);
            format!("({left} AND {right})")
        }
        Predicate::Or(a, b) => {
            let left = where_clause(entity, a, params);
            let right = where_clause(entity, b, params);
            format!("({left} OR {right})")
        }
    }
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    let mut feed = Feed::new();
    feed.assign_id(StoreId::Relational(row.get(0)?));
    feed.set_title(row.get::<_, String>(1)?);
    feed.set_url(parse_url_column(row, 2)?);
    feed.set_summary(row.get::<_, String>(3)?);
    feed.set_query(row.get(4)?);
    for tag in json_column::<Vec<String>>(row, 5)? {
        feed.add_tag(tag);
    }
    feed.set_wait_period(row.get(6)?);
    feed.set_remaining_wait(row.get(7)?);
    feed.set_image(row.get(8)?);
    feed.set_etag(row.get(9)?);
    feed.set_last_modified(row.get(10)?);
    Ok(feed)
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    let mut article = Article::new();
    article.assign_id(StoreId::Relational(row.get(0)?));
    if let Some(feed_id) = row.get::<_, Option<i64>>(1)? {
        article.set_feed_id(Some(StoreId::Relational(feed_id)));
    }
    article.set_title(row.get::<_, String>(2)?);
    article.set_link(parse_url_column(row, 3)?);
    article.set_summary(row.get::<_, String>(4)?);
    article.set_authors(json_column::<Vec<Author>>(row, 5)?);
    article.set_published(datetime_column(row, 6)?);
    article.set_updated_at(optional_datetime_column(row, 7)?);
    article.set_identifier(row.get::<_, String>(8)?);
    article.set_content(row.get::<_, String>(9)?);
    article.set_read(row.get(10)?);
    article.set_estimated_reading_time(row.get(11)?);
    for flag in json_column::<Vec<String>>(row, 12)? {
        article.add_flag(flag);
    }
    Ok(article)
}

fn enclosure_from_row(row: &Row<'_>) -> rusqlite::Result<Enclosure> {
    let url = parse_url_column(row, 2)?.ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            "enclosure url missing".into(),
        )
    })?;
    let mut enclosure = Enclosure::new(url, row.get::<_, String>(3)?);
    enclosure.assign_id(StoreId::Relational(row.get(0)?));
    if let Some(article_id) = row.get::<_, Option<i64>>(1)? {
        enclosure.set_article_id(Some(StoreId::Relational(article_id)));
    }
    enclosure.mark_clean();
    Ok(enclosure)
}

fn parse_url_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Url>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Url::parse(&raw)
            .map(Some)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
        None => Ok(None),
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn optional_datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
        None => Ok(None),
    }
}

/// Paginated article queries compiled from a predicate. One prepared
/// statement per call; the connection is shared with the owning service.
struct SqliteArticleController {
    conn: Arc<Mutex<Connection>>,
    descriptor: ControllerDescriptor,
}

impl SqliteArticleController {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FetchController<Article> for SqliteArticleController {
    fn count(&self) -> Result<usize> {
        let conn = self.conn();
        let mut params = Vec::new();
        let clause = where_clause(Entity::Articles, &self.descriptor.predicate, &mut params);
        let sql = format!("SELECT COUNT(*) FROM articles WHERE {clause}");
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn batch(&self, offset: usize, limit: usize) -> Result<Vec<Article>> {
        let mut articles = {
            let conn = self.conn();
            let mut params = Vec::new();
            let clause = where_clause(Entity::Articles, &self.descriptor.predicate, &mut params);
            params.push(Value::Integer(limit as i64));
            let limit_param = params.len();
            params.push(Value::Integer(offset as i64));
            let offset_param = params.len();
            let sql = format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles WHERE {clause} {} \
                 LIMIT ?{limit_param} OFFSET ?{offset_param}",
                order_clause(self.descriptor.sort)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), article_from_row)?;
            rows.collect::<rusqlite::Result<Vec<Article>>>()?
        };
        for article in &mut articles {
            if let Some(id) = article.article_id() {
                article.set_enclosures(enclosure_array(
                    &self.conn,
                    self.descriptor.session,
                    Predicate::ArticleId(id.clone()),
                ));
            }
            article.mark_clean();
        }
        Ok(articles)
    }

    fn insert(&self, article: &Article) -> Result<()> {
        let owner = owner_rowid(&self.descriptor.predicate);
        match article.article_id() {
            Some(StoreId::Relational(id)) => {
                // Already stored: re-bind ownership to this query's feed.
                self.conn().execute(
                    "UPDATE articles SET feed_id = ?1 WHERE id = ?2",
                    rusqlite::params![owner, id],
                )?;
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "article belongs to a different backend".into(),
            )),
            None => {
                self.conn().execute(
                    "INSERT INTO articles (feed_id, title, link, summary, authors, published, \
                     updated_at, identifier, content, read, estimated_reading_time, flags) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    rusqlite::params![
                        owner.or_else(|| relational_id(article.feed_id())),
                        article.title(),
                        article.link().map(Url::as_str),
                        article.summary(),
                        serde_json::to_string(article.authors())?,
                        article.published().to_rfc3339(),
                        article.updated_at().map(|d| d.to_rfc3339()),
                        article.identifier(),
                        article.content(),
                        article.read(),
                        article.estimated_reading_time(),
                        serde_json::to_string(article.flags())?,
                    ],
                )?;
                Ok(())
            }
        }
    }

    fn delete(&self, index: usize) -> Result<()> {
        let conn = self.conn();
        let mut params = Vec::new();
        let clause = where_clause(Entity::Articles, &self.descriptor.predicate, &mut params);
        params.push(Value::Integer(index as i64));
        let sql = format!(
            "SELECT id FROM articles WHERE {clause} {} LIMIT 1 OFFSET ?{}",
            order_clause(self.descriptor.sort),
            params.len()
        );
        let id: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(|_| FreshetError::OutOfRange(index))?;
        conn.execute("DELETE FROM articles WHERE id = ?1", [id])?;
        Ok(())
    }

    fn filter(&self, predicate: Predicate) -> Box<dyn FetchController<Article>> {
        Box::new(Self {
            conn: self.conn.clone(),
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
            conn: self.conn.clone(),
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
            conn: self.conn.clone(),
            descriptor: self.descriptor.clone(),
        })
    }
}

struct SqliteEnclosureController {
    conn: Arc<Mutex<Connection>>,
    descriptor: ControllerDescriptor,
}

impl SqliteEnclosureController {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FetchController<Enclosure> for SqliteEnclosureController {
    fn count(&self) -> Result<usize> {
        let conn = self.conn();
        let mut params = Vec::new();
        let clause = where_clause(Entity::Enclosures, &self.descriptor.predicate, &mut params);
        let sql = format!("SELECT COUNT(*) FROM enclosures WHERE {clause}");
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn batch(&self, offset: usize, limit: usize) -> Result<Vec<Enclosure>> {
        let conn = self.conn();
        let mut params = Vec::new();
        let clause = where_clause(Entity::Enclosures, &self.descriptor.predicate, &mut params);
        params.push(Value::Integer(limit as i64));
        let limit_param = params.len();
        params.push(Value::Integer(offset as i64));
        let offset_param = params.len();
        let sql = format!(
            "SELECT {ENCLOSURE_COLUMNS} FROM enclosures WHERE {clause} {} \
             LIMIT ?{limit_param} OFFSET ?{offset_param}",
            order_clause(self.descriptor.sort)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), enclosure_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<Enclosure>>>()?)
    }

    fn insert(&self, enclosure: &Enclosure) -> Result<()> {
        let owner = owner_rowid(&self.descriptor.predicate);
        match enclosure.enclosure_id() {
            Some(StoreId::Relational(id)) => {
                self.conn().execute(
                    "UPDATE enclosures SET article_id = ?1 WHERE id = ?2",
                    rusqlite::params![owner, id],
                )?;
                Ok(())
            }
            Some(_) => Err(FreshetError::Store(
                "enclosure belongs to a different backend".into(),
            )),
            None => {
                self.conn().execute(
                    "INSERT INTO enclosures (article_id, url, kind) VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        owner.or_else(|| relational_id(enclosure.article_id())),
                        enclosure.url().as_str(),
                        enclosure.kind(),
                    ],
                )?;
                Ok(())
            }
        }
    }

    fn delete(&self, index: usize) -> Result<()> {
        let conn = self.conn();
        let mut params = Vec::new();
        let clause = where_clause(Entity::Enclosures, &self.descriptor.predicate, &mut params);
        params.push(Value::Integer(index as i64));
        let sql = format!(
            "SELECT id FROM enclosures WHERE {clause} {} LIMIT 1 OFFSET ?{}",
            order_clause(self.descriptor.sort),
            params.len()
        );
        let id: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(|_| FreshetError::OutOfRange(index))?;
        conn.execute("DELETE FROM enclosures WHERE id = ?1", [id])?;
        Ok(())
    }

    fn filter(&self, predicate: Predicate) -> Box<dyn FetchController<Enclosure>> {
        Box::new(Self {
            conn: self.conn.clone(),
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
            conn: self.conn.clone(),
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
            conn: self.conn.clone(),
            descriptor: self.descriptor.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    fn service() -> SqliteService {
        SqliteService::in_memory(None).unwrap()
    }

    #[tokio::test]
    async fn test_feed_round_trip() {
        let service = service();
        let mut feed = service.create_feed().await.unwrap();
        feed.set_title("Rust Blog");
        feed.set_url(Some(Url::parse("https://blog.rust-lang.org/feed.xml").unwrap()));
        feed.add_tag("rust");
        service.save_feed(&mut feed).await.unwrap();

        let feeds = service.all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title(), "Rust Blog");
        assert_eq!(feeds[0].tags(), ["rust"]);
        assert_eq!(feeds[0], feed);
    }

    #[tokio::test]
    async fn test_clean_save_skips_write() {
        let service = service();
        let mut feed = service.create_feed().await.unwrap();
        feed.set_title("original");
        service.save_feed(&mut feed).await.unwrap();

        // Change the row behind the object's back; a clean save must not
        // clobber it.
        service
            .conn()
            .execute("UPDATE feeds SET title = 'changed'", [])
            .unwrap();
        service.save_feed(&mut feed).await.unwrap();

        let feeds = service.all_feeds().await.unwrap();
        assert_eq!(feeds[0].title(), "changed");
    }

    #[tokio::test]
    async fn test_article_attachment_and_query() {
        let service = service();
        let mut feed = service.create_feed().await.unwrap();
        let mut article = service.create_article(Some(&mut feed)).await.unwrap();
        article.set_title("hello");
        article.set_identifier("guid-1");
        service.save_article(&mut article).await.unwrap();

        let matched = service
            .articles_matching(Predicate::Identifier("guid-1".into()))
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].feed_id(), feed.feed_id());

        let unread = service
            .articles_matching(Predicate::Read(false))
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
    }

    #[tokio::test]
    async fn test_feed_articles_are_lazy_and_ordered() {
        let service = service();
        let mut feed = service.create_feed().await.unwrap();
        for i in 0..30 {
            let mut article = service.create_article(Some(&mut feed)).await.unwrap();
            article.set_title(format!("article {i}"));
            article.set_published(
                DateTime::parse_from_rfc3339(&format!("2026-01-{:02}T00:00:00Z", i + 1))
                    .unwrap()
                    .with_timezone(&Utc),
            );
            service.save_article(&mut article).await.unwrap();
        }

        // Fresh fetch so the appended buffer is empty.
        let feeds = service.all_feeds().await.unwrap();
        let articles = feeds[0].articles();
        assert_eq!(articles.count(), 30);
        // Newest first.
        assert_eq!(articles.get(0).unwrap().title(), "article 29");
        assert_eq!(articles.get(29).unwrap().title(), "article 0");
    }

    #[tokio::test]
    async fn test_delete_feed_cascades() {
        let service = service();
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
        let count: i64 = service
            .conn()
            .query_row("SELECT COUNT(*) FROM enclosures", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_enclosures_follow_article() {
        let service = service();
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

        let fetched = service
            .articles_matching(Predicate::All)
            .await
            .unwrap()
            .remove(0);
        let enclosures = fetched.enclosures();
        assert_eq!(enclosures.count(), 1);
        assert_eq!(
            enclosures.get(0).unwrap().url().as_str(),
            "https://example.com/a.mp3"
        );
    }

    #[tokio::test]
    async fn test_text_search_predicate() {
        let service = service();
        let mut feed = service.create_feed().await.unwrap();
        let mut a = service.create_article(Some(&mut feed)).await.unwrap();
        a.set_title("Announcing Rust 1.80");
        service.save_article(&mut a).await.unwrap();
        let mut b = service.create_article(Some(&mut feed)).await.unwrap();
        b.set_title("Python news");
        service.save_article(&mut b).await.unwrap();

        let matched = service
            .articles_matching(Predicate::TextContains {
                fields: vec![TextField::Title],
                needle: "rust".into(),
            })
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].title(), "Announcing Rust 1.80");
    }

    #[derive(Default)]
    struct RecordingIndex {
        added: StdMutex<Vec<String>>,
        removed: StdMutex<Vec<String>>,
    }

    impl SearchIndex for RecordingIndex {
        fn add_items(&self, items: &[SearchItem]) -> Result<()> {
            self.added
                .lock()
                .unwrap()
                .extend(items.iter().map(|i| i.identifier.clone()));
            Ok(())
        }

        fn delete_identifiers(&self, identifiers: &[String]) -> Result<()> {
            self.removed.lock().unwrap().extend_from_slice(identifiers);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_search_index_tracks_saves_and_deletes() {
        let index = Arc::new(RecordingIndex::default());
        let service = SqliteService::in_memory(Some(index.clone())).unwrap();

        let mut feed = service.create_feed().await.unwrap();
        let mut article = service.create_article(Some(&mut feed)).await.unwrap();
        article.set_identifier("guid-9");
        service.save_article(&mut article).await.unwrap();
        assert_eq!(*index.added.lock().unwrap(), ["guid-9"]);

        service.delete_article(&article).await.unwrap();
        assert_eq!(*index.removed.lock().unwrap(), ["guid-9"]);
    }
}
