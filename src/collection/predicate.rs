use crate::domain::StoreId;

/// Which text columns a [`Predicate::TextContains`] searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Summary,
    Content,
}

/// Backend-agnostic query predicate.
///
/// The relational controller compiles this to SQL; the document and
/// in-memory sides evaluate it structurally through [`Matches`]. Both
/// interpretations must agree so that a migrated dataset answers the
/// same queries on either backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    FeedId(StoreId),
    ArticleId(StoreId),
    Identifier(String),
    Read(bool),
    HasTags,
    UrlEquals(String),
    TextContains {
        fields: Vec<TextField>,
        needle: String,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (a, b) => Predicate::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }
}

/// Structural predicate evaluation, used by the in-memory array variant
/// and the document backend.
pub trait Matches {
    fn matches(&self, predicate: &Predicate) -> bool;
}

/// Fixed per-entity ordering carried by every fetch controller. Part of
/// array equality: two store-backed arrays are only equal if they sort
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortSpec {
    FeedsByTitle,
    ArticlesByPublishedDesc,
    EnclosuresByUrl,
    Unsorted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_collapses_all() {
        let p = Predicate::Read(true).and(Predicate::All);
        assert_eq!(p, Predicate::Read(true));

        let p = Predicate::All.and(Predicate::Read(false));
        assert_eq!(p, Predicate::Read(false));
    }

    #[test]
    fn test_or_preserves_both_sides() {
        let p = Predicate::Read(true).or(Predicate::Identifier("a".into()));
        assert_eq!(
            p,
            Predicate::Or(
                Box::new(Predicate::Read(true)),
                Box::new(Predicate::Identifier("a".into()))
            )
        );
    }
}
