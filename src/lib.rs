#![cfg_attr(docsrs, feature(doc_cfg))]
//! # aij-assembly
//!
//! Construction and ownership partitioning of distributed sparse matrices
//! for PDE solvers, on top of a pluggable parallel linear-algebra engine.
//!
//! The rows of a global `n_rows × n_cols` matrix are split into contiguous
//! blocks, one per process of a communicator. Given a sparsity pattern and an
//! ownership description (per-process counts or per-process index sets), a
//! [`SparseMatrix`](matrix::SparseMatrix) derives which rows and columns the
//! calling process owns, extracts the slice of the pattern covering its rows,
//! and drives the engine through a fixed construction sequence that
//! preallocates exactly that structure and closes it. No process ever
//! materialises rows it does not own.
//!
//! ## Features
//! - Ownership derivation from counts (local) or index sets (one collective
//!   exchange, with every process agreeing on failure)
//! - Fixed and dynamic sparsity patterns behind one capability trait, plus
//!   shipping of off-process pattern entries to their owners
//! - RAII engine handles: every matrix is destroyed exactly once
//! - Value access, compress, mat-vec, norms and matrix-matrix products
//! - Pluggable communication backends (serial, threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! aij-assembly = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```
//! use aij_assembly::prelude::*;
//!
//! let sp = SparsityPattern::from_row_lists(2, 2, [vec![0, 1], vec![1]])?;
//! let mut a = SparseMatrix::with_counts(AijEngine::new(), &NoComm, &sp, &[2], &[2], 0, true)?;
//! a.set(0, 1, 4.0)?;
//! a.compress(VectorOperation::Insert)?;
//! assert_eq!(a.el(0, 1)?, 4.0);
//! # Ok::<(), aij_assembly::matrix_error::MatrixError>(())
//! ```
//!
//! Every construction, `reinit_*`, `compress` and product is *collective*:
//! all processes of the matrix's communicator call it in the same order.

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod engine;
pub mod matrix;
pub mod matrix_error;
pub mod ownership;
pub mod sparsity;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::ConstructionConfig;
    pub use crate::data::index_set::IndexSet;
    pub use crate::data::vector::DistributedVector;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::engine::{AijEngine, Engine};
    pub use crate::matrix::{SparseMatrix, VectorOperation};
    pub use crate::matrix_error::MatrixError;
    pub use crate::ownership::OwnershipDescriptor;
    pub use crate::sparsity::{
        DynamicSparsityPattern, LocalSparsityWindow, SparsityPattern, SparsityPatternLike,
        distribute_sparsity_pattern,
    };
}
