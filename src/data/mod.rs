//! Index sets and distributed vectors: the data the matrix layer consumes.

pub mod index_set;
pub mod vector;

pub use index_set::IndexSet;
pub use vector::DistributedVector;
