pub mod array;
pub mod controller;
pub mod predicate;

pub use array::{Iter, StoreBackedArray, BATCH_SIZE};
pub use controller::{ControllerDescriptor, Entity, FetchController};
pub use predicate::{Matches, Predicate, SortSpec, TextField};
