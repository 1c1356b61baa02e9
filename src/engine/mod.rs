//! The parallel linear-algebra engine the assembly layer drives.
//!
//! The engine owns matrix storage, its compressed-row preallocation, the
//! communication needed to finish assembly, and the arithmetic kernels. The
//! layer only talks to it through [`Engine`]: every call returns an
//! [`EngineStatus`] on failure, mirroring the status-code discipline of
//! engines written in C. [`AijEngine`] is an in-crate engine with
//! row-partitioned compressed storage, used when no external engine is
//! linked and by the test-suite.

pub mod aij;

use std::ops::Range;

use thiserror::Error;

use crate::algs::communicator::Communicator;
use crate::data::vector::DistributedVector;

pub use aij::{AijEngine, AijMat};

/// Integer type of the engine's index buffers.
pub type EngineIndex = i64;

/// Trailing dummy entry of column buffers handed to the engine.
pub const SENTINEL: EngineIndex = -1;

/// Numeric status codes reported by engines.
pub mod codes {
    /// Wrong argument.
    pub const ERR_ARG_WRONG: i32 = 62;
    /// Argument out of range, including insertion of a new nonzero into a
    /// closed structure.
    pub const ERR_ARG_OUT_OF_RANGE: i32 = 63;
    /// Sizes are inconsistent.
    pub const ERR_ARG_SIZE: i32 = 60;
    /// Object is in the wrong state for the call.
    pub const ERR_WRONG_STATE: i32 = 73;
    /// Two arguments are incompatible (e.g. differing nonzero structure).
    pub const ERR_ARG_INCOMPATIBLE: i32 = 75;
    /// A collective exchange failed.
    pub const ERR_COMM: i32 = 98;
}

/// Nonzero status returned by an engine call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("status {code}: {message}")]
pub struct EngineStatus {
    pub code: i32,
    pub message: String,
}

impl EngineStatus {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineStatus>;

/// Storage layout of a matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatType {
    /// Sequential compressed rows on a single process.
    SeqAij,
    /// Row-partitioned compressed rows across the communicator.
    MpiAij,
}

/// How new values combine with stored ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Add,
}

/// Behavioural switches of a matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatOption {
    /// Inserting into a slot that does not exist is an error.
    NewNonzeroLocationErr,
    /// Zeroing rows keeps their slots instead of compacting them away.
    KeepNonzeroPattern,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DuplicateOption {
    DoNotCopyValues,
    CopyValues,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StructureFlag {
    /// Source and destination have identical nonzero structure.
    SameNonzeroPattern,
    /// The destination adopts the source's structure.
    DifferentNonzeroPattern,
}

/// A parallel sparse-matrix engine.
///
/// Calls marked *collective* must be issued by every process of the
/// matrix's communicator, in the same order.
pub trait Engine: Clone + Send + Sync + 'static {
    type Comm: Communicator + Clone;
    type Mat: Send;

    /// New, unsized matrix on `comm`.
    fn create(&self, comm: &Self::Comm) -> EngineResult<Self::Mat>;
    /// Assembled sequential matrix on a single-process communicator.
    fn create_seq(&self, n_rows: usize, n_cols: usize) -> EngineResult<Self::Mat>;
    /// Release a matrix.
    fn destroy(&self, mat: Self::Mat) -> EngineResult<()>;

    fn set_sizes(
        &self,
        mat: &mut Self::Mat,
        local_rows: usize,
        local_cols: usize,
        global_rows: usize,
        global_cols: usize,
    ) -> EngineResult<()>;
    fn set_type(&self, mat: &mut Self::Mat, ty: MatType) -> EngineResult<()>;
    /// Lay out the matrix without declaring any structure. Collective.
    fn set_up(&self, mat: &mut Self::Mat) -> EngineResult<()>;
    /// Lay out the matrix and allocate exactly the given local rows.
    /// Collective.
    fn preallocate_csr(
        &self,
        mat: &mut Self::Mat,
        row_offsets: &[EngineIndex],
        columns: &[EngineIndex],
    ) -> EngineResult<()>;
    /// Finish assembly: deliver off-process values to their owners.
    /// Collective.
    fn assemble(&self, mat: &mut Self::Mat) -> EngineResult<()>;
    fn set_option(&self, mat: &mut Self::Mat, option: MatOption, flag: bool) -> EngineResult<()>;

    fn duplicate(&self, mat: &Self::Mat, op: DuplicateOption) -> EngineResult<Self::Mat>;
    fn copy(&self, src: &Self::Mat, dst: &mut Self::Mat, structure: StructureFlag) -> EngineResult<()>;

    fn get_size(&self, mat: &Self::Mat) -> EngineResult<(usize, usize)>;
    fn get_local_size(&self, mat: &Self::Mat) -> EngineResult<(usize, usize)>;
    fn ownership_range(&self, mat: &Self::Mat) -> EngineResult<Range<usize>>;
    fn ownership_range_column(&self, mat: &Self::Mat) -> EngineResult<Range<usize>>;

    /// Write the dense `rows × cols` block `values` (row-major).
    fn set_values(
        &self,
        mat: &mut Self::Mat,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
        mode: InsertMode,
    ) -> EngineResult<()>;
    /// Value of a locally owned entry; zero for structural zeros.
    fn get_value(&self, mat: &Self::Mat, row: usize, col: usize) -> EngineResult<f64>;

    /// `y = A x`. Collective.
    fn mult(
        &self,
        mat: &Self::Mat,
        x: &DistributedVector<Self::Comm>,
        y: &mut DistributedVector<Self::Comm>,
    ) -> EngineResult<()>;
    /// `A = diag(left) A diag(right)`. Collective when `right` is given.
    fn diagonal_scale(
        &self,
        mat: &mut Self::Mat,
        left: Option<&DistributedVector<Self::Comm>>,
        right: Option<&DistributedVector<Self::Comm>>,
    ) -> EngineResult<()>;
    /// `A B`. Collective.
    fn mat_mat_mult(&self, a: &Self::Mat, b: &Self::Mat) -> EngineResult<Self::Mat>;
    /// `Aᵀ B`. Collective.
    fn transpose_mat_mult(&self, a: &Self::Mat, b: &Self::Mat) -> EngineResult<Self::Mat>;

    /// Set every stored value to zero, keeping the structure.
    fn zero_entries(&self, mat: &mut Self::Mat) -> EngineResult<()>;
    /// Zero the given global rows and put `diag` on their diagonal.
    /// Collective.
    fn zero_rows(&self, mat: &mut Self::Mat, rows: &[usize], diag: f64) -> EngineResult<()>;
    /// Frobenius norm. Collective.
    fn norm_frobenius(&self, mat: &Self::Mat) -> EngineResult<f64>;
    /// Number of stored entries over all processes. Collective.
    fn nonzero_count(&self, mat: &Self::Mat) -> EngineResult<usize>;
}
