//! Matrix-matrix products shared by `mmult` and `tmmult`.

use super::{MatHandle, SparseMatrix, VectorOperation};
use crate::data::vector::DistributedVector;
use crate::engine::{DuplicateOption, Engine};
use crate::matrix_error::MatrixError;

/// Which factor of the product is transposed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProductKind {
    /// `C = A · diag(V) · B`
    Plain,
    /// `C = Aᵀ · diag(V) · B`
    Transposed,
}

/// Form the product of `a` and `b` (optionally scaled by `v`) and make it
/// the new content of `c`, whose previous matrix is destroyed.
///
/// Collective over `a`'s communicator, which `c` adopts.
pub(crate) fn mat_mat_product<E: Engine>(
    kind: ProductKind,
    a: &SparseMatrix<E>,
    c: &mut SparseMatrix<E>,
    b: &SparseMatrix<E>,
    v: Option<&DistributedVector<E::Comm>>,
) -> Result<(), MatrixError> {
    let (a_m, a_n) = (a.m()?, a.n()?);
    let b_m = b.m()?;
    let inner = match kind {
        ProductKind::Plain => a_n,
        ProductKind::Transposed => a_m,
    };
    if inner != b_m {
        return Err(MatrixError::DimensionMismatch {
            left: inner,
            right: b_m,
        });
    }
    if let Some(v) = v {
        if v.size() != b_m {
            return Err(MatrixError::DimensionMismatch {
                left: v.size(),
                right: b_m,
            });
        }
    }

    let engine = c.engine.clone();
    let a_mat = a.handle()?.mat();
    let scaled = match v {
        Some(v) => {
            let tmp = engine
                .duplicate(b.handle()?.mat(), DuplicateOption::CopyValues)
                .map_err(|s| MatrixError::engine("duplicate", s))?;
            let mut tmp = MatHandle::new(engine.clone(), tmp);
            engine
                .diagonal_scale(tmp.mat_mut(), Some(v), None)
                .map_err(|s| MatrixError::engine("diagonal_scale", s))?;
            Some(tmp)
        }
        None => None,
    };
    let b_mat = match &scaled {
        Some(tmp) => tmp.mat(),
        None => b.handle()?.mat(),
    };

    let product = match kind {
        ProductKind::Plain => engine
            .mat_mat_mult(a_mat, b_mat)
            .map_err(|s| MatrixError::engine("mat_mat_mult", s))?,
        ProductKind::Transposed => engine
            .transpose_mat_mult(a_mat, b_mat)
            .map_err(|s| MatrixError::engine("transpose_mat_mult", s))?,
    };
    let product = MatHandle::new(engine.clone(), product);

    if let Some(prior) = c.handle.take() {
        prior.release()?;
    }
    c.handle = Some(product);
    c.comm = a.comm.clone();
    c.last_action = VectorOperation::Unknown;
    Ok(())
}

impl<E: Engine> SparseMatrix<E> {
    /// `C = A · diag(V) · B`, or `C = A · B` without `v`. Collective.
    ///
    /// `c`'s previous content is replaced; its structure is whatever the
    /// product produces.
    pub fn mmult(
        &self,
        c: &mut Self,
        b: &Self,
        v: Option<&DistributedVector<E::Comm>>,
    ) -> Result<(), MatrixError> {
        mat_mat_product(ProductKind::Plain, self, c, b, v)
    }

    /// `C = Aᵀ · diag(V) · B`, or `C = Aᵀ · B` without `v`. Collective.
    pub fn tmmult(
        &self,
        c: &mut Self,
        b: &Self,
        v: Option<&DistributedVector<E::Comm>>,
    ) -> Result<(), MatrixError> {
        mat_mat_product(ProductKind::Transposed, self, c, b, v)
    }
}
