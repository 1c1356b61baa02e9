//! The CSR slice of a sparsity pattern covering one process's rows.
//!
//! A [`LocalSparsityWindow`] is built fresh for every construction and handed
//! straight to the engine's preallocation call. Its column buffer carries one
//! trailing sentinel so that the engine never reads past the end, and a
//! process that owns no rows still gets a valid (degenerate) window: it must
//! take part in the collective preallocation all the same.

use std::ops::Range;

use super::SparsityPatternLike;
use crate::debug_invariants::DebugInvariants;
use crate::engine::{EngineIndex, SENTINEL};
use crate::matrix_error::MatrixError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalSparsityWindow {
    rows: Range<usize>,
    n_cols: usize,
    row_offsets: Vec<EngineIndex>,
    column_buffer: Vec<EngineIndex>,
}

impl LocalSparsityWindow {
    /// Extract the rows `rows` of `pattern`.
    ///
    /// Columns are copied in the pattern's native order; nothing is sorted
    /// and the pattern is not modified.
    pub fn extract<P>(rows: Range<usize>, pattern: &P) -> Result<Self, MatrixError>
    where
        P: SparsityPatternLike + ?Sized,
    {
        let n_rows = pattern.n_rows();
        let n_cols = pattern.n_cols();
        if rows.start > rows.end || rows.end > n_rows {
            return Err(MatrixError::RowRangeOutOfBounds { range: rows, n_rows });
        }

        // 1) offsets
        let mut row_offsets = Vec::with_capacity(rows.len() + 1);
        row_offsets.push(0);
        let mut nnz = 0usize;
        for row in rows.clone() {
            if !pattern.stores_row(row) {
                return Err(MatrixError::RowNotStored(row));
            }
            nnz += pattern.row_length(row);
            row_offsets.push(nnz as EngineIndex);
        }

        // 2) columns, plus one dummy entry at the end
        let mut column_buffer = Vec::with_capacity(nnz + 1);
        for row in rows.clone() {
            let before = column_buffer.len();
            for col in pattern.row(row) {
                if col >= n_cols {
                    return Err(MatrixError::ColumnOutOfRange { col, n_cols });
                }
                column_buffer.push(col as EngineIndex);
            }
            let written = column_buffer.len() - before;
            if written != pattern.row_length(row) {
                return Err(MatrixError::DimensionMismatch {
                    left: written,
                    right: pattern.row_length(row),
                });
            }
        }
        column_buffer.push(SENTINEL);

        let window = Self {
            rows,
            n_cols,
            row_offsets,
            column_buffer,
        };
        window.debug_assert_invariants();
        Ok(window)
    }

    /// The degenerate window of a process that owns no rows.
    pub fn empty() -> Self {
        Self {
            rows: 0..0,
            n_cols: 0,
            row_offsets: vec![0],
            column_buffer: vec![SENTINEL],
        }
    }

    /// Global rows covered by the window.
    #[inline]
    pub fn row_range(&self) -> Range<usize> {
        self.rows.clone()
    }

    #[inline]
    pub fn n_local_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_local_rows() == 0
    }

    /// Number of entries in the window.
    #[inline]
    pub fn n_nonzeros(&self) -> usize {
        self.column_buffer.len() - 1
    }

    /// Row offsets, `n_local_rows() + 1` entries starting at zero.
    #[inline]
    pub fn row_offsets(&self) -> &[EngineIndex] {
        &self.row_offsets
    }

    /// Column indices without the trailing sentinel.
    #[inline]
    pub fn column_indices(&self) -> &[EngineIndex] {
        &self.column_buffer[..self.n_nonzeros()]
    }

    /// Column indices followed by the sentinel, as handed to the engine.
    #[inline]
    pub fn column_buffer(&self) -> &[EngineIndex] {
        &self.column_buffer
    }

    /// Columns of local row `i` (0-based within the window).
    pub fn row(&self, i: usize) -> &[EngineIndex] {
        let a = self.row_offsets[i] as usize;
        let b = self.row_offsets[i + 1] as usize;
        &self.column_buffer[a..b]
    }
}

impl DebugInvariants for LocalSparsityWindow {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "LocalSparsityWindow");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        if self.row_offsets.first() != Some(&0) || self.row_offsets.len() != self.rows.len() + 1 {
            return Err(MatrixError::DimensionMismatch {
                left: self.row_offsets.len(),
                right: self.rows.len() + 1,
            });
        }
        if self.row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(MatrixError::RowRangeOutOfBounds {
                range: self.rows.clone(),
                n_rows: self.rows.end,
            });
        }
        let nnz = *self.row_offsets.last().unwrap_or(&0) as usize;
        if self.column_buffer.len() != nnz + 1 || self.column_buffer[nnz] != SENTINEL {
            return Err(MatrixError::DimensionMismatch {
                left: self.column_buffer.len(),
                right: nnz + 1,
            });
        }
        if let Some(&col) = self.column_indices().iter().find(|&&c| c < 0 || c as usize >= self.n_cols) {
            return Err(MatrixError::ColumnOutOfRange {
                col: col.max(0) as usize,
                n_cols: self.n_cols,
            });
        }
        Ok(())
    }
}
