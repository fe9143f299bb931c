use chrono::{DateTime, Utc};
use feed_rs::parser;
use html_escape::decode_html_entities;
use sha2::{Digest, Sha256};
use url::Url;

use crate::app::{FreshetError, Result};
use crate::domain::Author;

/// A feed document reduced to the fields the store cares about, with
/// entities decoded and per-entry identifiers guaranteed non-empty.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<Url>,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone)]
pub struct ParsedItem {
    /// Stable identifier: the entry's own id, falling back to its link,
    /// falling back to a digest of feed URL and title.
    pub identifier: String,
    pub title: String,
    pub link: Option<Url>,
    pub summary: String,
    pub content: String,
    pub authors: Vec<Author>,
    pub published: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub enclosures: Vec<ParsedEnclosure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEnclosure {
    pub url: Url,
    pub kind: String,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, feed_url: &str, body: &[u8]) -> Result<ParsedFeed> {
        let feed = parser::parse(body).map_err(|e| FreshetError::FeedParse(e.to_string()))?;

        let image_url = feed
            .logo
            .or(feed.icon)
            .and_then(|image| Url::parse(&image.uri).ok());

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let title = entry
                    .title
                    .map(|t| decode_html_entities(&t.content).to_string())
                    .unwrap_or_default();
                let link = entry
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref() != Some("enclosure"))
                    .and_then(|l| Url::parse(&l.href).ok());

                let identifier = if !entry.id.is_empty() {
                    entry.id.clone()
                } else if let Some(link) = &link {
                    link.to_string()
                } else {
                    synthesized_identifier(feed_url, &title)
                };

                let mut enclosures: Vec<ParsedEnclosure> = Vec::new();
                for l in entry.links.iter().filter(|l| l.rel.as_deref() == Some("enclosure")) {
                    if let Ok(url) = Url::parse(&l.href) {
                        enclosures.push(ParsedEnclosure {
                            url,
                            kind: l.media_type.clone().unwrap_or_default(),
                        });
                    }
                }
                for media in &entry.media {
                    for content in &media.content {
                        if let Some(url) = &content.url {
                            let enclosure = ParsedEnclosure {
                                url: url.clone(),
                                kind: content
                                    .content_type
                                    .as_ref()
                                    .map(|m| m.to_string())
                                    .unwrap_or_default(),
                            };
                            if !enclosures.contains(&enclosure) {
                                enclosures.push(enclosure);
                            }
                        }
                    }
                }

                ParsedItem {
                    identifier,
                    title,
                    link,
                    summary: entry
                        .summary
                        .map(|s| decode_html_entities(&s.content).to_string())
                        .unwrap_or_default(),
                    content: entry.content.and_then(|c| c.body).unwrap_or_default(),
                    authors: entry
                        .authors
                        .into_iter()
                        .map(|person| Author::new(person.name, person.email))
                        .collect(),
                    published: entry.published.map(|dt| dt.with_timezone(&Utc)),
                    updated_at: entry.updated.map(|dt| dt.with_timezone(&Utc)),
                    enclosures,
                }
            })
            .collect();

        Ok(ParsedFeed {
            title: feed
                .title
                .map(|t| decode_html_entities(&t.content).to_string()),
            summary: feed
                .description
                .map(|d| decode_html_entities(&d.content).to_string()),
            image_url,
            items,
        })
    }
}

/// Deterministic fallback identifier for entries carrying neither a
/// guid nor a link.
fn synthesized_identifier(feed_url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_url.as_bytes());
    hasher.update(title.as_bytes());
    hex::encode(hasher.finalize())
}
