pub mod article;
pub mod enclosure;
pub mod feed;
pub mod reading_time;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use article::Article;
pub use enclosure::Enclosure;
pub use feed::Feed;
pub use reading_time::estimate_reading_time;

/// Opaque backend identity. Once assigned by a store it never changes
/// and is the sole basis of equality for the owning object; identities
/// are never reused across backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreId {
    Relational(i64),
    Document(String),
    Memory(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            name: name.into(),
            email,
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{} <{}>", self.name, email),
            None => write!(f, "{}", self.name),
        }
    }
}
