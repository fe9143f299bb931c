use std::sync::{Arc, Mutex, MutexGuard};

use crate::collection::{FetchController, Matches, Predicate};

/// Rows fetched per backend round-trip.
pub const BATCH_SIZE: usize = 20;

/// A lazily-materialized, order-preserving sequence of domain objects.
///
/// Two construction variants: a plain in-memory list (identity-less,
/// used for query feeds and tests), or a [`FetchController`] against a
/// storage backend. The store-backed variant fetches rows in fixed-size
/// batches as they are indexed, so iterating the first few elements of
/// a ten-thousand-article feed touches only the first page.
///
/// Clones share state, mirroring the reference semantics the rest of
/// the crate relies on: a `Feed` and the repository looking at its
/// articles observe the same loaded pages and appended buffer.
pub struct StoreBackedArray<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

struct Inner<T> {
    controller: Option<Box<dyn FetchController<T>>>,
    /// In-memory storage, or the materialized prefix of the store rows.
    items: Vec<T>,
    /// Locally appended objects not yet visible through the store query.
    appended: Vec<T>,
    /// Cached store row count; `None` until the first count query.
    store_count: Option<usize>,
}

impl<T> Clone for StoreBackedArray<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Matches> Default for StoreBackedArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + Matches> StoreBackedArray<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                controller: None,
                items,
                appended: Vec::new(),
                store_count: None,
            })),
        }
    }

    pub fn from_controller(controller: Box<dyn FetchController<T>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                controller: Some(controller),
                items: Vec::new(),
                appended: Vec::new(),
                store_count: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_store_backed(&self) -> bool {
        self.lock().controller.is_some()
    }

    /// Total element count. For the store-backed variant this issues a
    /// count query on first use; it never fetches rows.
    pub fn count(&self) -> usize {
        let mut inner = self.lock();
        Self::count_locked(&mut inner)
    }

    fn count_locked(inner: &mut Inner<T>) -> usize {
        let base = match (&inner.controller, inner.store_count) {
            (Some(_), Some(cached)) => cached,
            (Some(controller), None) => {
                let counted = match controller.count() {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!("count query failed: {}", e);
                        0
                    }
                };
                inner.store_count = Some(counted);
                counted
            }
            (None, _) => inner.items.len(),
        };
        base + inner.appended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    /// Element at `index`, or `None` when out of `[0, count)`.
    ///
    /// Loads every not-yet-resident batch from the front of the store
    /// order up to the one containing `index`; batches already resident
    /// are never re-fetched.
    pub fn get(&self, index: usize) -> Option<T> {
        let mut inner = self.lock();
        let total = Self::count_locked(&mut inner);
        if index >= total {
            return None;
        }
        if inner.controller.is_some() {
            let base = inner.store_count.unwrap_or(0);
            if index >= base {
                return inner.appended.get(index - base).cloned();
            }
            Self::materialize_to(&mut inner, index);
        }
        inner.items.get(index).cloned()
    }

    /// Extends the materialized prefix until it covers `index`, one
    /// batch per backend round-trip.
    fn materialize_to(inner: &mut Inner<T>, index: usize) {
        let store_count = inner.store_count.unwrap_or(0);
        let target = (index + 1).min(store_count);
        while inner.items.len() < target {
            let offset = inner.items.len();
            let controller = match &inner.controller {
                Some(c) => c,
                None => return,
            };
            match controller.batch(offset, BATCH_SIZE) {
                Ok(rows) => {
                    if rows.is_empty() {
                        break;
                    }
                    inner.items.extend(rows);
                }
                Err(e) => {
                    tracing::error!("batch fetch at offset {} failed: {}", offset, e);
                    break;
                }
            }
        }
    }

    fn materialize_all(inner: &mut Inner<T>) {
        let total = Self::count_locked(inner);
        let store_count = inner.store_count.unwrap_or(0);
        if inner.controller.is_some() && store_count > 0 && total > 0 {
            Self::materialize_to(inner, store_count - 1);
        }
    }

    /// Lazy, restartable iteration in store order. Running to the end
    /// materializes every batch.
    pub fn iter(&self) -> Iter<T> {
        Iter {
            array: self.clone(),
            position: 0,
        }
    }

    /// All elements as a plain list. Forces full materialization.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// In-memory convenience filter over materialized elements. Forces
    /// a full load; prefer [`filter_with_predicate`] when the condition
    /// can be expressed as a backend predicate.
    ///
    /// [`filter_with_predicate`]: StoreBackedArray::filter_with_predicate
    pub fn filter<F: Fn(&T) -> bool>(&self, f: F) -> Vec<T> {
        self.iter().filter(|item| f(item)).collect()
    }

    /// New array whose controller is this one's narrowed by `predicate`.
    /// No rows are fetched for the store-backed variant.
    pub fn filter_with_predicate(&self, predicate: Predicate) -> StoreBackedArray<T> {
        let inner = self.lock();
        match &inner.controller {
            Some(controller) => Self::from_controller(controller.filter(predicate)),
            None => {
                let items = inner
                    .items
                    .iter()
                    .filter(|item| item.matches(&predicate))
                    .cloned()
                    .collect();
                Self::from_vec(items)
            }
        }
    }

    /// Union of both arrays. When both are store-backed over the same
    /// entity, ordering, and session the union stays a single lazy
    /// backend query; otherwise both sides are materialized and
    /// concatenated with deduplication by equality.
    pub fn combine(&self, other: &StoreBackedArray<T>) -> StoreBackedArray<T> {
        {
            let ours = self.lock();
            let theirs = other.lock();
            if let (Some(a), Some(b)) = (&ours.controller, &theirs.controller) {
                if let Some(combined) = a.combine(b.as_ref()) {
                    return Self::from_controller(combined);
                }
            }
        }
        let mut merged = self.to_vec();
        for item in other.iter() {
            if !merged.contains(&item) {
                merged.push(item);
            }
        }
        Self::from_vec(merged)
    }

    /// Appends an element. The in-memory variant appends directly; the
    /// store-backed variant inserts into the underlying store and keeps
    /// the object in a local overflow buffer that participates in
    /// count/indexing until a refresh.
    pub fn append(&self, item: T) {
        let mut inner = self.lock();
        match &inner.controller {
            Some(controller) => {
                if let Err(e) = controller.insert(&item) {
                    tracing::error!("insert failed: {}", e);
                }
                inner.appended.push(item);
            }
            None => inner.items.push(item),
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.iter().any(|other| &other == item)
    }

    /// Removes an element, deleting it from the underlying store for the
    /// store-backed variant. Returns `false` when the element is absent
    /// or the backend delete fails.
    pub fn remove(&self, item: &T) -> bool {
        let mut inner = self.lock();
        if let Some(idx) = inner.appended.iter().position(|other| other == item) {
            inner.appended.remove(idx);
            return true;
        }
        Self::materialize_all(&mut inner);
        let idx = match inner.items.iter().position(|other| other == item) {
            Some(idx) => idx,
            None => return false,
        };
        if let Some(controller) = &inner.controller {
            if let Err(e) = controller.delete(idx) {
                tracing::error!("delete at index {} failed: {}", idx, e);
                return false;
            }
            if let Some(count) = inner.store_count.as_mut() {
                *count = count.saturating_sub(1);
            }
        }
        inner.items.remove(idx);
        true
    }
}

impl<T: Clone + PartialEq + Matches> PartialEq for StoreBackedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        {
            let ours = self.lock();
            let theirs = other.lock();
            if let (Some(a), Some(b)) = (&ours.controller, &theirs.controller) {
                return a.descriptor() == b.descriptor() && ours.appended == theirs.appended;
            }
        }
        // Mixed or in-memory comparison falls back to element-wise
        // equality, materializing both sides.
        self.to_vec() == other.to_vec()
    }
}

impl<T: Clone + PartialEq + Matches + std::fmt::Debug> std::fmt::Debug for StoreBackedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StoreBackedArray")
            .field("store_backed", &inner.controller.is_some())
            .field("resident", &inner.items.len())
            .field("appended", &inner.appended.len())
            .finish()
    }
}

pub struct Iter<T> {
    array: StoreBackedArray<T>,
    position: usize,
}

impl<T: Clone + PartialEq + Matches> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.array.get(self.position)?;
        self.position += 1;
        Some(item)
    }
}

impl<T: Clone + PartialEq + Matches> IntoIterator for &StoreBackedArray<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::app::{FreshetError, Result};
    use crate::collection::{ControllerDescriptor, Entity, SortSpec};

    impl Matches for i32 {
        fn matches(&self, predicate: &Predicate) -> bool {
            match predicate {
                Predicate::All => true,
                Predicate::Read(even) => (*self % 2 == 0) == *even,
                Predicate::And(a, b) => self.matches(a) && self.matches(b),
                Predicate::Or(a, b) => self.matches(a) || self.matches(b),
                _ => false,
            }
        }
    }

    /// Fetch controller over a shared vector, counting backend calls.
    struct StubController {
        rows: Arc<StdMutex<Vec<i32>>>,
        descriptor: ControllerDescriptor,
        count_queries: Arc<AtomicUsize>,
        batch_queries: Arc<AtomicUsize>,
    }

    impl StubController {
        fn new(rows: Vec<i32>) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let counts = Arc::new(AtomicUsize::new(0));
            let batches = Arc::new(AtomicUsize::new(0));
            let controller = Self {
                rows: Arc::new(StdMutex::new(rows)),
                descriptor: ControllerDescriptor {
                    entity: Entity::Articles,
                    predicate: Predicate::All,
                    sort: SortSpec::Unsorted,
                    session: 1,
                },
                count_queries: counts.clone(),
                batch_queries: batches.clone(),
            };
            (controller, counts, batches)
        }

        fn visible(&self) -> Vec<i32> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.matches(&self.descriptor.predicate))
                .cloned()
                .collect()
        }
    }

    impl FetchController<i32> for StubController {
        fn count(&self) -> Result<usize> {
            self.count_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.visible().len())
        }

        fn batch(&self, offset: usize, limit: usize) -> Result<Vec<i32>> {
            self.batch_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .visible()
                .into_iter()
                .skip(offset)
                .take(limit)
                .collect())
        }

        fn insert(&self, item: &i32) -> Result<()> {
            self.rows.lock().unwrap().push(*item);
            Ok(())
        }

        fn delete(&self, index: usize) -> Result<()> {
            let visible = self.visible();
            let target = *visible.get(index).ok_or(FreshetError::OutOfRange(index))?;
            let mut rows = self.rows.lock().unwrap();
            if let Some(pos) = rows.iter().position(|row| *row == target) {
                rows.remove(pos);
            }
            Ok(())
        }

        fn filter(&self, predicate: Predicate) -> Box<dyn FetchController<i32>> {
            Box::new(Self {
                rows: self.rows.clone(),
                descriptor: ControllerDescriptor {
                    predicate: self.descriptor.predicate.clone().and(predicate),
                    ..self.descriptor.clone()
                },
                count_queries: self.count_queries.clone(),
                batch_queries: self.batch_queries.clone(),
            })
        }

        fn combine(&self, other: &dyn FetchController<i32>) -> Option<Box<dyn FetchController<i32>>> {
            let theirs = other.descriptor();
            if theirs.entity != self.descriptor.entity
                || theirs.sort != self.descriptor.sort
                || theirs.session != self.descriptor.session
            {
                return None;
            }
            Some(Box::new(Self {
                rows: self.rows.clone(),
                descriptor: ControllerDescriptor {
                    predicate: self
                        .descriptor
                        .predicate
                        .clone()
                        .or(theirs.predicate.clone()),
                    ..self.descriptor.clone()
                },
                count_queries: self.count_queries.clone(),
                batch_queries: self.batch_queries.clone(),
            }))
        }

        fn descriptor(&self) -> &ControllerDescriptor {
            &self.descriptor
        }

        fn boxed_clone(&self) -> Box<dyn FetchController<i32>> {
            Box::new(Self {
                rows: self.rows.clone(),
                descriptor: self.descriptor.clone(),
                count_queries: self.count_queries.clone(),
                batch_queries: self.batch_queries.clone(),
            })
        }
    }

    fn store_backed(rows: Vec<i32>) -> (StoreBackedArray<i32>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (controller, counts, batches) = StubController::new(rows);
        (
            StoreBackedArray::from_controller(Box::new(controller)),
            counts,
            batches,
        )
    }

    #[test]
    fn test_count_never_fetches_rows() {
        let (array, counts, batches) = store_backed((0..100).collect());
        assert_eq!(array.count(), 100);
        assert_eq!(counts.load(Ordering::SeqCst), 1);
        assert_eq!(batches.load(Ordering::SeqCst), 0);

        // Count is cached.
        assert_eq!(array.count(), 100);
        assert_eq!(counts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_indexing_loads_only_needed_batches() {
        let (array, _, batches) = store_backed((0..100).collect());
        assert_eq!(array.get(3), Some(3));
        assert_eq!(batches.load(Ordering::SeqCst), 1);

        // Same page again: no new round-trip.
        assert_eq!(array.get(19), Some(19));
        assert_eq!(batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_index_26_of_35_rows_loads_two_batches() {
        let (array, _, batches) = store_backed((0..35).collect());
        assert_eq!(array.get(26), Some(26));
        assert_eq!(batches.load(Ordering::SeqCst), 2);

        // 35 resident rows: pages 0-19 and 20-34.
        assert_eq!(array.inner.lock().unwrap().items.len(), 35);

        // Re-reading an early index costs nothing.
        assert_eq!(array.get(5), Some(5));
        assert_eq!(batches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_out_of_range() {
        let (array, _, _) = store_backed(vec![1, 2, 3]);
        assert_eq!(array.get(3), None);
        assert!(StoreBackedArray::<i32>::from_vec(vec![]).get(0).is_none());
    }

    #[test]
    fn test_iteration_is_restartable() {
        let (array, _, _) = store_backed((0..45).collect());
        let collected: Vec<i32> = array.iter().collect();
        assert_eq!(collected, (0..45).collect::<Vec<_>>());

        let again: Vec<i32> = array.iter().collect();
        assert_eq!(again, collected);
    }

    #[test]
    fn test_append_and_remove_round_trip() {
        let (array, _, _) = store_backed(vec![1, 2, 3]);
        let before: Vec<i32> = array.to_vec();

        array.append(9);
        assert_eq!(array.count(), 4);
        assert!(array.contains(&9));

        assert!(array.remove(&9));
        assert_eq!(array.to_vec(), before);
        assert!(!array.contains(&9));
    }

    #[test]
    fn test_appended_objects_participate_in_indexing() {
        let (array, _, _) = store_backed(vec![1, 2, 3]);
        array.append(7);
        assert_eq!(array.get(3), Some(7));
    }

    #[test]
    fn test_remove_store_row() {
        let (array, _, _) = store_backed(vec![1, 2, 3]);
        assert!(array.remove(&2));
        assert_eq!(array.to_vec(), vec![1, 3]);
        assert_eq!(array.count(), 2);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let array = StoreBackedArray::from_vec(vec![1, 2, 3]);
        assert!(!array.remove(&9));
        assert_eq!(array.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_in_memory_append() {
        let array = StoreBackedArray::from_vec(vec![1]);
        array.append(2);
        assert_eq!(array.to_vec(), vec![1, 2]);
        assert_eq!(array.count(), 2);
    }

    #[test]
    fn test_filter_with_predicate_stays_lazy() {
        let (array, _, batches) = store_backed((0..40).collect());
        let evens = array.filter_with_predicate(Predicate::Read(true));
        assert_eq!(batches.load(Ordering::SeqCst), 0);
        assert_eq!(evens.count(), 20);
        assert_eq!(evens.get(1), Some(2));
    }

    #[test]
    fn test_filter_with_predicate_in_memory() {
        let array = StoreBackedArray::from_vec(vec![1, 2, 3, 4]);
        let evens = array.filter_with_predicate(Predicate::Read(true));
        assert_eq!(evens.to_vec(), vec![2, 4]);
    }

    #[test]
    fn test_combine_compatible_controllers() {
        let (controller, _, _) = StubController::new((0..10).collect());
        let evens = StoreBackedArray::from_controller(controller.filter(Predicate::Read(true)));
        let odds = StoreBackedArray::from_controller(controller.filter(Predicate::Read(false)));

        let union = evens.combine(&odds);
        assert!(union.is_store_backed());
        assert_eq!(union.count(), 10);
    }

    #[test]
    fn test_combine_in_memory_dedups() {
        let a = StoreBackedArray::from_vec(vec![1, 2, 3]);
        let b = StoreBackedArray::from_vec(vec![3, 4]);
        assert_eq!(a.combine(&b).to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_equality_in_memory() {
        let a = StoreBackedArray::from_vec(vec![1, 2]);
        let b = StoreBackedArray::from_vec(vec![1, 2]);
        let c = StoreBackedArray::from_vec(vec![2, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_equality_store_backed_compares_descriptors() {
        let (controller, _, batches) = StubController::new((0..1000).collect());
        let a = StoreBackedArray::from_controller(controller.boxed_clone());
        let b = StoreBackedArray::from_controller(controller.boxed_clone());
        assert_eq!(a, b);
        // Descriptor comparison must not scan.
        assert_eq!(batches.load(Ordering::SeqCst), 0);

        let filtered = StoreBackedArray::from_controller(controller.filter(Predicate::Read(true)));
        assert_ne!(a, filtered);
    }

    #[test]
    fn test_mixed_equality_materializes() {
        let (store, _, _) = store_backed(vec![1, 2, 3]);
        let memory = StoreBackedArray::from_vec(vec![1, 2, 3]);
        assert_eq!(store, memory);
    }

    #[test]
    fn test_first_and_is_empty() {
        let (array, _, _) = store_backed(vec![5, 6]);
        assert_eq!(array.first(), Some(5));
        assert!(!array.is_empty());
        assert!(StoreBackedArray::<i32>::new().is_empty());
    }
}
