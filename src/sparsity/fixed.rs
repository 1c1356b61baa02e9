//! Fixed (compressed) sparsity pattern.
//!
//! Immutable CSR structure built once from row lists or from another
//! pattern. For square patterns every row stores its diagonal entry, and
//! stores it *first*; the remaining columns follow in ascending order. This
//! is the pattern's native order and is preserved by everything that reads
//! it.

use std::collections::BTreeSet;

use super::SparsityPatternLike;
use crate::debug_invariants::DebugInvariants;
use crate::matrix_error::MatrixError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparsityPattern {
    n_rows: usize,
    n_cols: usize,
    row_offsets: Vec<usize>,
    columns: Vec<usize>,
}

impl Default for SparsityPattern {
    fn default() -> Self {
        Self {
            n_rows: 0,
            n_cols: 0,
            row_offsets: vec![0],
            columns: Vec::new(),
        }
    }
}

impl SparsityPattern {
    /// Build from one column list per row. Duplicate columns are merged.
    pub fn from_row_lists<I, R>(n_rows: usize, n_cols: usize, rows: I) -> Result<Self, MatrixError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = usize>,
    {
        let mut sets: Vec<BTreeSet<usize>> = Vec::with_capacity(n_rows);
        for cols in rows {
            let row = sets.len();
            if row >= n_rows {
                return Err(MatrixError::DimensionMismatch {
                    left: row + 1,
                    right: n_rows,
                });
            }
            let mut set = BTreeSet::new();
            for c in cols {
                if c >= n_cols {
                    return Err(MatrixError::ColumnOutOfRange { col: c, n_cols });
                }
                set.insert(c);
            }
            sets.push(set);
        }
        if sets.len() != n_rows {
            return Err(MatrixError::DimensionMismatch {
                left: sets.len(),
                right: n_rows,
            });
        }
        Ok(Self::from_sorted_rows(n_rows, n_cols, |r| sets[r].iter().copied()))
    }

    /// Compress any pattern into a fixed one.
    ///
    /// Rows a distributed source does not store become empty rows.
    pub fn copy_from<P>(source: &P) -> Self
    where
        P: SparsityPatternLike + ?Sized,
    {
        let (n_rows, n_cols) = (source.n_rows(), source.n_cols());
        let rows: Vec<BTreeSet<usize>> = (0..n_rows)
            .map(|r| {
                if source.stores_row(r) {
                    source.row(r).collect()
                } else {
                    BTreeSet::new()
                }
            })
            .collect();
        Self::from_sorted_rows(n_rows, n_cols, |r| rows[r].iter().copied())
    }

    fn from_sorted_rows<F, It>(n_rows: usize, n_cols: usize, row: F) -> Self
    where
        F: Fn(usize) -> It,
        It: Iterator<Item = usize>,
    {
        let square = n_rows == n_cols;

        // 1) row lengths, including the implicit diagonal of square patterns
        let mut row_offsets = vec![0usize; n_rows + 1];
        for r in 0..n_rows {
            let mut len = 0;
            let mut has_diag = false;
            for c in row(r) {
                len += 1;
                has_diag |= c == r;
            }
            if square && !has_diag {
                len += 1;
            }
            row_offsets[r + 1] = row_offsets[r] + len;
        }

        // 2) fill, diagonal first
        let mut columns = Vec::with_capacity(row_offsets[n_rows]);
        for r in 0..n_rows {
            if square {
                columns.push(r);
            }
            columns.extend(row(r).filter(|&c| !(square && c == r)));
        }
        debug_assert_eq!(columns.len(), row_offsets[n_rows]);

        Self {
            n_rows,
            n_cols,
            row_offsets,
            columns,
        }
    }

    #[inline]
    pub fn is_square(&self) -> bool {
        self.n_rows == self.n_cols
    }

    /// Whether `(row, col)` is a stored slot.
    pub fn exists(&self, row: usize, col: usize) -> bool {
        row < self.n_rows && self.row_slice(row).contains(&col)
    }

    /// Column indices of `row` as a slice, in native order.
    pub fn row_slice(&self, row: usize) -> &[usize] {
        &self.columns[self.row_offsets[row]..self.row_offsets[row + 1]]
    }

    /// Longest row.
    pub fn max_entries_per_row(&self) -> usize {
        (0..self.n_rows).map(|r| self.row_length(r)).max().unwrap_or(0)
    }
}

impl SparsityPatternLike for SparsityPattern {
    type RowIter<'a> = std::iter::Copied<std::slice::Iter<'a, usize>>;

    fn n_rows(&self) -> usize {
        self.n_rows
    }
    fn n_cols(&self) -> usize {
        self.n_cols
    }
    fn row_length(&self, row: usize) -> usize {
        self.row_offsets[row + 1] - self.row_offsets[row]
    }
    fn row(&self, row: usize) -> Self::RowIter<'_> {
        self.row_slice(row).iter().copied()
    }
    fn n_nonzero_elements(&self) -> usize {
        self.columns.len()
    }
}

impl DebugInvariants for SparsityPattern {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "SparsityPattern");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        if self.row_offsets.len() != self.n_rows + 1 {
            return Err(MatrixError::DimensionMismatch {
                left: self.row_offsets.len(),
                right: self.n_rows + 1,
            });
        }
        if self.row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(MatrixError::RowRangeOutOfBounds {
                range: 0..self.n_rows,
                n_rows: self.n_rows,
            });
        }
        if let Some(&col) = self.columns.iter().find(|&&c| c >= self.n_cols) {
            return Err(MatrixError::ColumnOutOfRange {
                col,
                n_cols: self.n_cols,
            });
        }
        Ok(())
    }
}
