use crate::app::{FreshetError, Result};
use crate::collection::{Predicate, SortSpec};

/// Entity a fetch controller queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Feeds,
    Articles,
    Enclosures,
}

/// Identity of a store-backed query: entity, predicate, ordering, and
/// the backend session that issued it. Two store-backed arrays compare
/// equal iff their descriptors do — element-wise comparison would force
/// a full scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerDescriptor {
    pub entity: Entity,
    pub predicate: Predicate,
    pub sort: SortSpec,
    pub session: u64,
}

/// Backend-specific paginated query execution plus insert/delete.
///
/// Implementations wrap the native query mechanism of their backend (a
/// compiled predicate against SQLite, or a live query over the document
/// map) and must evaluate lazily: no implementation may load all rows at
/// construction time.
pub trait FetchController<T>: Send + Sync {
    /// Total row count. Issues a count query, never a fetch.
    fn count(&self) -> Result<usize>;

    /// Rows `[offset, offset + limit)` in store order. One backend
    /// round-trip per call.
    fn batch(&self, offset: usize, limit: usize) -> Result<Vec<T>>;

    fn insert(&self, item: &T) -> Result<()>;

    /// Deletes the row at `index` in store order.
    fn delete(&self, index: usize) -> Result<()>;

    /// New controller whose predicate is the conjunction of the current
    /// one and `predicate`. No rows are fetched.
    fn filter(&self, predicate: Predicate) -> Box<dyn FetchController<T>>;

    /// Disjunctive union with `other`, when both controllers share an
    /// entity, ordering, and backend session. `None` means the union
    /// cannot be expressed as a single backend query.
    fn combine(&self, other: &dyn FetchController<T>) -> Option<Box<dyn FetchController<T>>>;

    fn descriptor(&self) -> &ControllerDescriptor;

    fn boxed_clone(&self) -> Box<dyn FetchController<T>>;

    /// Single row at `index` in store order.
    fn get(&self, index: usize) -> Result<T> {
        self.batch(index, 1)?
            .into_iter()
            .next()
            .ok_or(FreshetError::OutOfRange(index))
    }
}
