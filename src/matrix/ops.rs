//! Queries, value access and arithmetic on a constructed matrix.

use std::ops::Range;

use super::{SparseMatrix, VectorOperation};
use crate::algs::communicator::Communicator;
use crate::data::index_set::IndexSet;
use crate::data::vector::DistributedVector;
use crate::engine::{Engine, EngineStatus, InsertMode};
use crate::matrix_error::MatrixError;

fn failed(op: &'static str) -> impl Fn(EngineStatus) -> MatrixError {
    move |status| MatrixError::engine(op, status)
}

impl<E: Engine> SparseMatrix<E> {
    /// Number of global rows.
    pub fn m(&self) -> Result<usize, MatrixError> {
        Ok(self.global_size()?.0)
    }

    /// Number of global columns.
    pub fn n(&self) -> Result<usize, MatrixError> {
        Ok(self.global_size()?.1)
    }

    fn global_size(&self) -> Result<(usize, usize), MatrixError> {
        self.engine
            .get_size(self.handle()?.mat())
            .map_err(failed("get_size"))
    }

    /// Number of rows owned by this process.
    pub fn local_size(&self) -> Result<usize, MatrixError> {
        let (rows, _) = self
            .engine
            .get_local_size(self.handle()?.mat())
            .map_err(failed("get_local_size"))?;
        Ok(rows)
    }

    /// Rows owned by this process, as a subset of `[0, m())`.
    pub fn locally_owned_range_indices(&self) -> Result<IndexSet, MatrixError> {
        let mat = self.handle()?.mat();
        let (n_rows, _) = self.global_size()?;
        let (local, _) = self
            .engine
            .get_local_size(mat)
            .map_err(failed("get_local_size"))?;
        let range = self
            .engine
            .ownership_range(mat)
            .map_err(failed("ownership_range"))?;
        owned_indices("row", n_rows, local, range)
    }

    /// Columns owned by this process, as a subset of `[0, n())`.
    pub fn locally_owned_domain_indices(&self) -> Result<IndexSet, MatrixError> {
        let mat = self.handle()?.mat();
        let (_, n_cols) = self.global_size()?;
        let (_, local) = self
            .engine
            .get_local_size(mat)
            .map_err(failed("get_local_size"))?;
        let range = self
            .engine
            .ownership_range_column(mat)
            .map_err(failed("ownership_range_column"))?;
        owned_indices("column", n_cols, local, range)
    }

    fn prepare_action(&mut self, requested: VectorOperation) -> Result<(), MatrixError> {
        match self.last_action {
            VectorOperation::Unknown => {
                self.last_action = requested;
                Ok(())
            }
            last if last == requested => Ok(()),
            last => Err(MatrixError::WrongMode { last, requested }),
        }
    }

    fn write_block(
        &mut self,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
        action: VectorOperation,
    ) -> Result<(), MatrixError> {
        self.prepare_action(action)?;
        let (mode, op) = match action {
            VectorOperation::Add => (InsertMode::Add, "add_values"),
            _ => (InsertMode::Insert, "set_values"),
        };
        let engine = self.engine.clone();
        engine
            .set_values(self.handle_mut()?.mat_mut(), rows, cols, values, mode)
            .map_err(failed(op))
    }

    /// Overwrite entry `(i, j)`. Entries in rows owned elsewhere reach their
    /// owner at the next [`compress`](Self::compress).
    pub fn set(&mut self, i: usize, j: usize, value: f64) -> Result<(), MatrixError> {
        self.write_block(&[i], &[j], &[value], VectorOperation::Insert)
    }

    /// Add `value` to entry `(i, j)`.
    pub fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), MatrixError> {
        self.write_block(&[i], &[j], &[value], VectorOperation::Add)
    }

    /// Overwrite several entries of row `row`.
    pub fn set_row_values(&mut self, row: usize, cols: &[usize], values: &[f64]) -> Result<(), MatrixError> {
        check_row_lengths(cols, values)?;
        self.write_block(&[row], cols, values, VectorOperation::Insert)
    }

    /// Add to several entries of row `row`.
    pub fn add_row_values(&mut self, row: usize, cols: &[usize], values: &[f64]) -> Result<(), MatrixError> {
        check_row_lengths(cols, values)?;
        self.write_block(&[row], cols, values, VectorOperation::Add)
    }

    /// Finish a phase of writing: values destined for other processes are
    /// delivered and combined with the owner's. Collective.
    pub fn compress(&mut self, operation: VectorOperation) -> Result<(), MatrixError> {
        log::trace!(
            "rank {}: compress after {:?} (requested {:?})",
            self.comm.rank(),
            self.last_action,
            operation
        );
        let engine = self.engine.clone();
        engine
            .assemble(self.handle_mut()?.mat_mut())
            .map_err(failed("assemble"))?;
        self.last_action = VectorOperation::Unknown;
        Ok(())
    }

    /// Value of entry `(i, j)` for a locally owned row `i`; zero if the entry
    /// is not stored.
    pub fn el(&self, i: usize, j: usize) -> Result<f64, MatrixError> {
        let owned = self.local_range()?;
        if !owned.contains(&i) {
            return Err(MatrixError::RowNotOwned { row: i, owned });
        }
        let n = self.n()?;
        if j >= n {
            return Err(MatrixError::ColumnOutOfRange { col: j, n_cols: n });
        }
        self.engine
            .get_value(self.handle()?.mat(), i, j)
            .map_err(failed("get_value"))
    }

    /// `dst = A src`. Collective.
    pub fn vmult(
        &self,
        dst: &mut DistributedVector<E::Comm>,
        src: &DistributedVector<E::Comm>,
    ) -> Result<(), MatrixError> {
        let (m, n) = self.global_size()?;
        if src.size() != n || dst.size() != m {
            return Err(MatrixError::VectorLayout(format!(
                "{m}x{n} matrix applied to a vector of size {} into one of size {}",
                src.size(),
                dst.size()
            )));
        }
        self.engine
            .mult(self.handle()?.mat(), src, dst)
            .map_err(failed("mult"))
    }

    /// `v · (A v)`. Collective.
    pub fn matrix_norm_square(&self, v: &DistributedVector<E::Comm>) -> Result<f64, MatrixError> {
        self.matrix_scalar_product(v, v)
    }

    /// `u · (A v)`. Collective.
    pub fn matrix_scalar_product(
        &self,
        u: &DistributedVector<E::Comm>,
        v: &DistributedVector<E::Comm>,
    ) -> Result<f64, MatrixError> {
        let mut tmp = v.clone();
        self.vmult(&mut tmp, v)?;
        u.dot(&tmp, self.config.comm_tag)
    }

    /// Set every stored value to `d`, which must be zero. The structure is
    /// kept.
    pub fn assign_scalar(&mut self, d: f64) -> Result<(), MatrixError> {
        if d != 0.0 {
            return Err(MatrixError::NonzeroScalarAssign(d));
        }
        let engine = self.engine.clone();
        engine
            .zero_entries(self.handle_mut()?.mat_mut())
            .map_err(failed("zero_entries"))
    }

    /// Zero the given global rows and put `diagonal` on their diagonal
    /// entries. Rows may be owned by any process; zeroed rows keep their
    /// slots in a closed matrix. Collective.
    pub fn clear_rows(&mut self, rows: &[usize], diagonal: f64) -> Result<(), MatrixError> {
        let engine = self.engine.clone();
        engine
            .zero_rows(self.handle_mut()?.mat_mut(), rows, diagonal)
            .map_err(failed("zero_rows"))
    }

    /// Frobenius norm. Collective.
    pub fn frobenius_norm(&self) -> Result<f64, MatrixError> {
        self.engine
            .norm_frobenius(self.handle()?.mat())
            .map_err(failed("norm_frobenius"))
    }

    /// Number of stored entries on all processes together. Collective.
    pub fn n_nonzero_elements(&self) -> Result<usize, MatrixError> {
        self.engine
            .nonzero_count(self.handle()?.mat())
            .map_err(failed("nonzero_count"))
    }
}

fn check_row_lengths(cols: &[usize], values: &[f64]) -> Result<(), MatrixError> {
    if cols.len() != values.len() {
        return Err(MatrixError::DimensionMismatch {
            left: cols.len(),
            right: values.len(),
        });
    }
    Ok(())
}

fn owned_indices(
    what: &'static str,
    size: usize,
    local: usize,
    range: Range<usize>,
) -> Result<IndexSet, MatrixError> {
    if local != range.len() {
        return Err(MatrixError::NonContiguousOwnership {
            what,
            local,
            start: range.start,
            end: range.end,
        });
    }
    let mut indices = IndexSet::new(size);
    indices.add_range(range);
    Ok(indices.compressed())
}
