//! MatrixError: unified error type for the assembly layer's public APIs.
//!
//! Every construction, reinit and derived operation returns
//! `Result<_, MatrixError>`. Precondition violations are reported before any
//! collective call is issued; engine failures carry the operation that failed
//! together with the engine's status.

use std::ops::Range;

use thiserror::Error;

use crate::engine::EngineStatus;
use crate::matrix::VectorOperation;

/// Unified error type for matrix construction and assembly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatrixError {
    /// Two sequences that must have the same length do not.
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    /// The rank given for this process does not index the per-process counts.
    #[error("Rank {rank} out of range for {n_ranks} processes")]
    RankOutOfRange { rank: usize, n_ranks: usize },
    /// Per-process counts do not add up to the global extent.
    #[error("Per-process {what} counts sum to {sum}, but the pattern has {expected}")]
    CountSumMismatch {
        what: &'static str,
        sum: usize,
        expected: usize,
    },
    /// An index set's universe does not match the sparsity pattern.
    #[error("SparsityPattern and IndexSet have different number of {what} ({pattern} vs {index_set})")]
    IndexSetSizeMismatch {
        what: &'static str,
        pattern: usize,
        index_set: usize,
    },
    /// Only contiguous row/column ranges can be owned by a process.
    #[error("Only contiguous {what} ranges are supported")]
    NonContiguousIndexSet { what: &'static str },
    /// The owned sets do not form an ascending, one-to-one partition.
    #[error("Each {what} has to be owned by exactly one owner (expected {expected}, found {found})")]
    NotOnePartition {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// Another process in the communicator failed a precondition check.
    #[error("Precondition failed on rank {rank}")]
    RemotePrecondition { rank: usize },
    /// A requested row range lies outside the pattern.
    #[error("Row range {start}..{end} outside pattern with {n_rows} rows", start = .range.start, end = .range.end)]
    RowRangeOutOfBounds { range: Range<usize>, n_rows: usize },
    /// A distributed pattern does not store the requested row.
    #[error("Row {0} is not stored by this sparsity pattern")]
    RowNotStored(usize),
    /// A column index is not smaller than the number of columns.
    #[error("Column index {col} out of range (n_cols = {n_cols})")]
    ColumnOutOfRange { col: usize, n_cols: usize },
    /// A row index is not smaller than the number of rows.
    #[error("Row index {row} out of range (n_rows = {n_rows})")]
    RowOutOfRange { row: usize, n_rows: usize },
    /// The engine reported a nonzero status.
    #[error("Engine call `{op}` failed: {status}")]
    Engine {
        op: &'static str,
        status: EngineStatus,
    },
    /// Value copy between matrices whose nonzero structure differs.
    #[error("Nonzero structures differ; values cannot be copied entry-for-entry")]
    StructureMismatch,
    /// The engine reports a local size that is not a contiguous range.
    #[error("Engine requires non contiguous {what} ownership (local size {local}, range {start}..{end})")]
    NonContiguousOwnership {
        what: &'static str,
        local: usize,
        start: usize,
        end: usize,
    },
    /// Only zero can be assigned to all entries of a matrix.
    #[error("Only zero may be assigned to a sparse matrix, got {0}")]
    NonzeroScalarAssign(f64),
    /// A vector's layout does not match the matrix it is combined with.
    #[error("Vector layout mismatch: {0}")]
    VectorLayout(String),
    /// A value was requested for a row owned by another process.
    #[error("Row {row} is not locally owned (owned rows {start}..{end})", start = .owned.start, end = .owned.end)]
    RowNotOwned { row: usize, owned: Range<usize> },
    /// A previous construction failed; the matrix must be reinitialised.
    #[error("Matrix holds no usable structure; reinitialise it first")]
    Unusable,
    /// Values were inserted and added without a `compress` in between.
    #[error("Cannot {requested:?} values after {last:?} without calling compress()")]
    WrongMode {
        last: VectorOperation,
        requested: VectorOperation,
    },
    /// Communication with a peer failed.
    #[error("Communication error with rank {neighbor}: {message}")]
    Comm { neighbor: usize, message: String },
}

impl MatrixError {
    /// Wrap an engine status with the name of the failing call.
    #[inline]
    pub fn engine(op: &'static str, status: EngineStatus) -> Self {
        MatrixError::Engine { op, status }
    }
}
