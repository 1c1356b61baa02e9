//! Dynamically built sparsity pattern.
//!
//! Rows are ordered sets that grow as entries are added. A pattern may be
//! restricted to a subset of rows (its row index set); such a *distributed*
//! pattern only stores, and only accepts entries for, those rows.

use std::collections::BTreeSet;

use super::SparsityPatternLike;
use crate::data::index_set::IndexSet;
use crate::matrix_error::MatrixError;

static EMPTY_ROW: BTreeSet<usize> = BTreeSet::new();

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicSparsityPattern {
    n_rows: usize,
    n_cols: usize,
    rowset: Option<IndexSet>,
    lines: Vec<BTreeSet<usize>>,
}

impl DynamicSparsityPattern {
    /// Empty pattern storing every row.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rowset: None,
            lines: vec![BTreeSet::new(); n_rows],
        }
    }

    /// Empty pattern storing only the rows in `rowset`.
    pub fn with_row_set(n_rows: usize, n_cols: usize, rowset: IndexSet) -> Result<Self, MatrixError> {
        if rowset.size() != n_rows {
            return Err(MatrixError::IndexSetSizeMismatch {
                what: "rows",
                pattern: n_rows,
                index_set: rowset.size(),
            });
        }
        let rowset = rowset.compressed();
        let n_stored = rowset.n_elements();
        Ok(Self {
            n_rows,
            n_cols,
            rowset: Some(rowset),
            lines: vec![BTreeSet::new(); n_stored],
        })
    }

    /// The rows this pattern stores.
    pub fn row_index_set(&self) -> IndexSet {
        match &self.rowset {
            Some(set) => set.clone(),
            None => IndexSet::complete(self.n_rows),
        }
    }

    fn line_of(&self, row: usize) -> Option<usize> {
        if row >= self.n_rows {
            return None;
        }
        match &self.rowset {
            None => Some(row),
            Some(set) => set.index_within_set(row),
        }
    }

    fn line_mut(&mut self, row: usize) -> Result<&mut BTreeSet<usize>, MatrixError> {
        if row >= self.n_rows {
            return Err(MatrixError::RowOutOfRange {
                row,
                n_rows: self.n_rows,
            });
        }
        let k = self.line_of(row).ok_or(MatrixError::RowNotStored(row))?;
        Ok(&mut self.lines[k])
    }

    /// Add the slot `(row, col)`.
    pub fn add(&mut self, row: usize, col: usize) -> Result<(), MatrixError> {
        let n_cols = self.n_cols;
        if col >= n_cols {
            return Err(MatrixError::ColumnOutOfRange { col, n_cols });
        }
        self.line_mut(row)?.insert(col);
        Ok(())
    }

    /// Add several slots of one row.
    pub fn add_entries<I>(&mut self, row: usize, cols: I) -> Result<(), MatrixError>
    where
        I: IntoIterator<Item = usize>,
    {
        let n_cols = self.n_cols;
        let line = self.line_mut(row)?;
        for col in cols {
            if col >= n_cols {
                return Err(MatrixError::ColumnOutOfRange { col, n_cols });
            }
            line.insert(col);
        }
        Ok(())
    }

    /// Whether `(row, col)` is stored.
    pub fn exists(&self, row: usize, col: usize) -> bool {
        self.line_of(row)
            .is_some_and(|k| self.lines[k].contains(&col))
    }

    /// Stored rows and their column sets, in ascending row order.
    pub fn stored_rows(&self) -> impl Iterator<Item = (usize, &BTreeSet<usize>)> + '_ {
        let rows: Vec<usize> = match &self.rowset {
            None => (0..self.n_rows).collect(),
            Some(set) => set.iter().collect(),
        };
        rows.into_iter().zip(self.lines.iter())
    }
}

impl SparsityPatternLike for DynamicSparsityPattern {
    type RowIter<'a> = std::iter::Copied<std::collections::btree_set::Iter<'a, usize>>;

    fn n_rows(&self) -> usize {
        self.n_rows
    }
    fn n_cols(&self) -> usize {
        self.n_cols
    }
    fn row_length(&self, row: usize) -> usize {
        self.line_of(row).map_or(0, |k| self.lines[k].len())
    }
    fn row(&self, row: usize) -> Self::RowIter<'_> {
        match self.line_of(row) {
            Some(k) => self.lines[k].iter().copied(),
            None => EMPTY_ROW.iter().copied(),
        }
    }
    fn stores_row(&self, row: usize) -> bool {
        self.line_of(row).is_some()
    }
    fn n_nonzero_elements(&self) -> usize {
        self.lines.iter().map(BTreeSet::len).sum()
    }
}
