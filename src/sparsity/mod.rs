//! Sparsity patterns: which `(row, column)` slots of a matrix may be nonzero.
//!
//! The construction protocol is written once against [`SparsityPatternLike`],
//! a read-only capability trait implemented by both the fixed, CSR-backed
//! [`SparsityPattern`] and the incrementally built [`DynamicSparsityPattern`].

pub mod distribute;
pub mod dynamic;
pub mod fixed;
pub mod window;

pub use distribute::distribute_sparsity_pattern;
pub use dynamic::DynamicSparsityPattern;
pub use fixed::SparsityPattern;
pub use window::LocalSparsityWindow;

/// Read-only view of a sparsity pattern.
pub trait SparsityPatternLike {
    /// Iterator over the column indices of one row, in the pattern's native order.
    type RowIter<'a>: Iterator<Item = usize>
    where
        Self: 'a;

    /// Number of global rows.
    fn n_rows(&self) -> usize;
    /// Number of global columns.
    fn n_cols(&self) -> usize;
    /// Number of entries stored in `row`.
    fn row_length(&self, row: usize) -> usize;
    /// Column indices of `row`.
    fn row(&self, row: usize) -> Self::RowIter<'_>;

    /// Whether this pattern holds data for `row`. Distributed patterns only
    /// store a subset of the rows.
    fn stores_row(&self, row: usize) -> bool {
        row < self.n_rows()
    }

    /// Total number of stored entries.
    fn n_nonzero_elements(&self) -> usize {
        (0..self.n_rows())
            .filter(|&r| self.stores_row(r))
            .map(|r| self.row_length(r))
            .sum()
    }
}
