//! Distributed sparse matrix: ownership, preallocation, and lifecycle.
//!
//! A [`SparseMatrix`] owns exactly one engine matrix through a [`MatHandle`]
//! and shares (a clone of) its communicator. Every constructor and `reinit_*`
//! runs the [`ConstructionProtocol`]: release the previous matrix, create a
//! new one, size it, preallocate the locally owned rows of a sparsity pattern
//! and close the structure. All of these are collective; every process of the
//! communicator must call them in the same order.
//!
//! If any step fails the matrix is left without a handle and every further
//! use returns [`MatrixError::Unusable`] until it is reinitialised.

mod base;
mod ops;
pub mod protocol;

use std::fmt;
use std::ops::Range;

use crate::algs::collective::agree;
use crate::algs::communicator::Communicator;
use crate::config::ConstructionConfig;
use crate::data::index_set::IndexSet;
use crate::engine::{DuplicateOption, Engine, StructureFlag, codes};
use crate::matrix_error::MatrixError;
use crate::ownership::OwnershipDescriptor;
use crate::sparsity::{LocalSparsityWindow, SparsityPatternLike};

pub use base::ProductKind;
pub use protocol::{ConstructionProtocol, Step, Structure};

/// What the values of a matrix were last changed by. `compress` must be
/// called before switching between insertion and addition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum VectorOperation {
    /// Nothing pending.
    #[default]
    Unknown,
    Insert,
    Add,
}

/// Exclusive owner of one engine matrix. Dropping the handle destroys the
/// matrix.
pub struct MatHandle<E: Engine> {
    engine: E,
    mat: Option<E::Mat>,
}

impl<E: Engine> MatHandle<E> {
    pub(crate) fn new(engine: E, mat: E::Mat) -> Self {
        Self {
            engine,
            mat: Some(mat),
        }
    }

    pub fn mat(&self) -> &E::Mat {
        match &self.mat {
            Some(m) => m,
            None => unreachable!("matrix handle used after release"),
        }
    }

    pub fn mat_mut(&mut self) -> &mut E::Mat {
        match &mut self.mat {
            Some(m) => m,
            None => unreachable!("matrix handle used after release"),
        }
    }

    /// Destroy the matrix now, reporting the engine's status.
    pub fn release(mut self) -> Result<(), MatrixError> {
        match self.mat.take() {
            Some(m) => self
                .engine
                .destroy(m)
                .map_err(|s| MatrixError::engine(Step::DestroyPrior.op(), s)),
            None => Ok(()),
        }
    }
}

impl<E: Engine> Drop for MatHandle<E> {
    fn drop(&mut self) {
        if let Some(m) = self.mat.take() {
            if let Err(status) = self.engine.destroy(m) {
                log::error!("failed to destroy matrix on drop: {status}");
            }
        }
    }
}

impl<E: Engine> fmt::Debug for MatHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatHandle")
            .field("live", &self.mat.is_some())
            .finish()
    }
}

/// Row-partitioned sparse matrix on a communicator.
pub struct SparseMatrix<E: Engine> {
    engine: E,
    comm: E::Comm,
    handle: Option<MatHandle<E>>,
    config: ConstructionConfig,
    last_action: VectorOperation,
}

impl<E: Engine> fmt::Debug for SparseMatrix<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseMatrix")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("handle", &self.handle)
            .field("last_action", &self.last_action)
            .finish()
    }
}

impl<E: Engine> SparseMatrix<E> {
    /// Empty `0 × 0` matrix on a single-process communicator.
    pub fn new(engine: E) -> Result<Self, MatrixError> {
        let mat = engine
            .create_seq(0, 0)
            .map_err(|s| MatrixError::engine(Step::Create.op(), s))?;
        Ok(Self {
            handle: Some(MatHandle::new(engine.clone(), mat)),
            engine,
            comm: E::Comm::comm_self(),
            config: ConstructionConfig::default(),
            last_action: VectorOperation::Unknown,
        })
    }

    /// Use `config` for every later construction.
    pub fn with_config(mut self, config: ConstructionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_config(&mut self, config: ConstructionConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &ConstructionConfig {
        &self.config
    }

    pub fn communicator(&self) -> &E::Comm {
        &self.comm
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// False after a failed construction, until the next successful reinit.
    pub fn is_usable(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<&MatHandle<E>, MatrixError> {
        self.handle.as_ref().ok_or(MatrixError::Unusable)
    }

    pub(crate) fn handle_mut(&mut self) -> Result<&mut MatHandle<E>, MatrixError> {
        self.handle.as_mut().ok_or(MatrixError::Unusable)
    }

    /// Matrix whose process `this_process` owns `rows_per_process[this_process]`
    /// rows and `cols_per_process[this_process]` columns, following those of
    /// all lower ranks. See [`reinit_with_counts`](Self::reinit_with_counts).
    #[allow(clippy::too_many_arguments)]
    pub fn with_counts<P>(
        engine: E,
        comm: &E::Comm,
        pattern: &P,
        rows_per_process: &[usize],
        cols_per_process: &[usize],
        this_process: usize,
        preset_nonzero_locations: bool,
    ) -> Result<Self, MatrixError>
    where
        P: SparsityPatternLike + ?Sized,
    {
        let mut m = Self::new(engine)?;
        m.reinit_with_counts(
            comm,
            pattern,
            rows_per_process,
            cols_per_process,
            this_process,
            preset_nonzero_locations,
        )?;
        Ok(m)
    }

    /// Rebuild the matrix with a layout given by per-process counts.
    ///
    /// With `preset_nonzero_locations` the locally owned rows of `pattern`
    /// are preallocated and the structure is closed: writing outside it
    /// later is an error. Without it the matrix is only laid out and entries
    /// are allocated as they are written.
    ///
    /// Collective. The counts and the owned rows of `pattern` are checked
    /// before the old matrix is released; if the check fails on any process,
    /// every process returns an error and the old matrix is kept.
    pub fn reinit_with_counts<P>(
        &mut self,
        comm: &E::Comm,
        pattern: &P,
        rows_per_process: &[usize],
        cols_per_process: &[usize],
        this_process: usize,
        preset_nonzero_locations: bool,
    ) -> Result<(), MatrixError>
    where
        P: SparsityPatternLike + ?Sized,
    {
        let prepared = counts_layout(
            comm,
            pattern,
            rows_per_process,
            cols_per_process,
            this_process,
            preset_nonzero_locations,
        );
        let (ownership, structure) = agree(comm, self.config.comm_tag, prepared)?;
        self.construct(comm, &ownership, structure)
    }

    /// Matrix owning the rows in `rows` and the columns in `cols`. See
    /// [`reinit_with_index_sets`](Self::reinit_with_index_sets).
    pub fn with_index_sets<P>(
        engine: E,
        rows: &IndexSet,
        cols: &IndexSet,
        pattern: &P,
        comm: &E::Comm,
    ) -> Result<Self, MatrixError>
    where
        P: SparsityPatternLike + ?Sized,
    {
        let mut m = Self::new(engine)?;
        m.reinit_with_index_sets(rows, cols, pattern, comm)?;
        Ok(m)
    }

    /// Rebuild the matrix owning the contiguous sets `rows` and `cols`, and
    /// always preallocate and close the owned rows of `pattern`.
    ///
    /// Collective. The sets of all processes must form an ascending
    /// one-to-one partition of the rows; if that, or a local precondition,
    /// fails anywhere, every process returns an error and the old matrix is
    /// kept.
    pub fn reinit_with_index_sets<P>(
        &mut self,
        rows: &IndexSet,
        cols: &IndexSet,
        pattern: &P,
        comm: &E::Comm,
    ) -> Result<(), MatrixError>
    where
        P: SparsityPatternLike + ?Sized,
    {
        let ownership = OwnershipDescriptor::from_index_sets(rows, cols, pattern, comm, &self.config)?;
        let window = agree(comm, self.config.comm_tag, local_window(&ownership, pattern))?;
        self.construct(comm, &ownership, Structure::Preallocate(window))
    }

    fn construct(
        &mut self,
        comm: &E::Comm,
        ownership: &OwnershipDescriptor,
        structure: Structure,
    ) -> Result<(), MatrixError> {
        let prior = self.handle.take();
        self.comm = comm.clone();
        self.last_action = VectorOperation::Unknown;
        let handle = ConstructionProtocol::new(&self.engine, comm, ownership, structure).run(prior)?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Take over the communicator and the nonzero structure of `other`,
    /// with all values zero. `other` must be compressed.
    ///
    /// A matrix cannot be reinitialised like itself: the borrow rules
    /// already forbid `m.reinit_like(&m)`.
    pub fn reinit_like(&mut self, other: &Self) -> Result<(), MatrixError> {
        let prior = self.handle.take();
        self.comm = other.comm.clone();
        self.last_action = VectorOperation::Unknown;
        if let Some(prior) = prior {
            prior.release()?;
        }
        let mat = self
            .engine
            .duplicate(other.handle()?.mat(), DuplicateOption::DoNotCopyValues)
            .map_err(|s| MatrixError::engine("duplicate", s))?;
        self.handle = Some(MatHandle::new(self.engine.clone(), mat));
        Ok(())
    }

    /// Copy the values of `other`, whose nonzero structure must equal this
    /// matrix's. Takes over `other`'s communicator.
    pub fn copy_from(&mut self, other: &Self) -> Result<(), MatrixError> {
        let src = other.handle()?;
        let engine = self.engine.clone();
        let dst = self.handle_mut()?;
        engine
            .copy(src.mat(), dst.mat_mut(), StructureFlag::SameNonzeroPattern)
            .map_err(|s| match s.code {
                codes::ERR_ARG_INCOMPATIBLE | codes::ERR_ARG_SIZE => MatrixError::StructureMismatch,
                _ => MatrixError::engine("copy", s),
            })?;
        self.comm = other.comm.clone();
        self.last_action = VectorOperation::Unknown;
        Ok(())
    }

    /// Independent matrix with the same structure and values.
    pub fn try_clone(&self) -> Result<Self, MatrixError> {
        let mat = self
            .engine
            .duplicate(self.handle()?.mat(), DuplicateOption::CopyValues)
            .map_err(|s| MatrixError::engine("duplicate", s))?;
        Ok(Self {
            engine: self.engine.clone(),
            comm: self.comm.clone(),
            handle: Some(MatHandle::new(self.engine.clone(), mat)),
            config: self.config.clone(),
            last_action: VectorOperation::Unknown,
        })
    }

    /// Row range owned by this process.
    pub fn local_range(&self) -> Result<Range<usize>, MatrixError> {
        self.engine
            .ownership_range(self.handle()?.mat())
            .map_err(|s| MatrixError::engine("ownership_range", s))
    }
}

/// Ownership and structure from per-process counts. Purely local; the
/// caller agrees on the outcome before anything collective happens.
fn counts_layout<C, P>(
    comm: &C,
    pattern: &P,
    rows_per_process: &[usize],
    cols_per_process: &[usize],
    this_process: usize,
    preset_nonzero_locations: bool,
) -> Result<(OwnershipDescriptor, Structure), MatrixError>
where
    C: Communicator,
    P: SparsityPatternLike + ?Sized,
{
    let ownership = OwnershipDescriptor::from_counts(
        rows_per_process,
        cols_per_process,
        this_process,
        pattern.n_rows(),
        pattern.n_cols(),
    )?;
    if ownership.n_ranks() != comm.size() {
        return Err(MatrixError::DimensionMismatch {
            left: ownership.n_ranks(),
            right: comm.size(),
        });
    }
    let structure = if preset_nonzero_locations {
        Structure::Preallocate(local_window(&ownership, pattern)?)
    } else {
        Structure::Deferred
    };
    Ok((ownership, structure))
}

/// Rows of `pattern` owned by this process, as handed to preallocation.
fn local_window<P>(ownership: &OwnershipDescriptor, pattern: &P) -> Result<LocalSparsityWindow, MatrixError>
where
    P: SparsityPatternLike + ?Sized,
{
    if ownership.n_local_rows() == 0 {
        return Ok(LocalSparsityWindow::empty());
    }
    LocalSparsityWindow::extract(ownership.row_range(), pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::engine::AijEngine;
    use crate::sparsity::SparsityPattern;

    fn pattern() -> SparsityPattern {
        SparsityPattern::from_row_lists(3, 3, [vec![0, 1], vec![1], vec![0, 2]]).unwrap()
    }

    #[test]
    fn default_matrix_is_empty_and_serial() {
        let engine = AijEngine::<NoComm>::new();
        let m = SparseMatrix::new(engine.clone()).unwrap();
        assert_eq!((m.m().unwrap(), m.n().unwrap()), (0, 0));
        assert_eq!(m.communicator().size(), 1);
        assert_eq!(engine.live_handles(), 1);
        drop(m);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn bad_counts_keep_the_old_matrix() {
        let engine = AijEngine::<NoComm>::new();
        let sp = pattern();
        let mut m = SparseMatrix::with_counts(engine.clone(), &NoComm, &sp, &[3], &[3], 0, true).unwrap();
        let err = m.reinit_with_counts(&NoComm, &sp, &[2], &[3], 0, true).unwrap_err();
        assert!(matches!(err, MatrixError::CountSumMismatch { what: "row", .. }));
        assert!(m.is_usable());
        assert_eq!(m.m().unwrap(), 3);
        assert_eq!(engine.live_handles(), 1);
    }

    #[test]
    fn copy_requires_identical_structure() {
        let engine = AijEngine::<NoComm>::new();
        let sp = pattern();
        let mut a = SparseMatrix::with_counts(engine.clone(), &NoComm, &sp, &[3], &[3], 0, true).unwrap();
        a.set(0, 1, 2.0).unwrap();
        a.compress(VectorOperation::Insert).unwrap();

        let mut b = SparseMatrix::new(engine.clone()).unwrap();
        b.reinit_like(&a).unwrap();
        assert_eq!(b.el(0, 1).unwrap(), 0.0);
        b.copy_from(&a).unwrap();
        assert_eq!(b.el(0, 1).unwrap(), 2.0);

        let other = SparsityPattern::from_row_lists(3, 3, [vec![2], vec![], vec![]]).unwrap();
        let mut c = SparseMatrix::with_counts(engine.clone(), &NoComm, &other, &[3], &[3], 0, true).unwrap();
        assert_eq!(c.copy_from(&a), Err(MatrixError::StructureMismatch));

        let d = a.try_clone().unwrap();
        assert_eq!(d.el(0, 1).unwrap(), 2.0);
        drop((a, b, c, d));
        assert_eq!(engine.live_handles(), 0);
    }
}
