//! Distributed vector with contiguous row ownership.
//!
//! Each rank stores the values of its owned range `[start, end)` of a global
//! vector. Cloning a vector copies the local part and shares the
//! communicator, which is all the matrix layer needs for temporaries.

use std::ops::Range;

use crate::algs::collective::all_reduce_sum_f64;
use crate::algs::communicator::{CommTag, Communicator};
use crate::data::index_set::IndexSet;
use crate::matrix_error::MatrixError;

#[derive(Clone, Debug)]
pub struct DistributedVector<C: Communicator + Clone> {
    comm: C,
    global_size: usize,
    owned: Range<usize>,
    values: Vec<f64>,
}

impl<C: Communicator + Clone> DistributedVector<C> {
    /// Zero vector owning the indices in `owned`, which must be contiguous.
    pub fn new(comm: &C, owned: &IndexSet) -> Result<Self, MatrixError> {
        let range = owned.as_range().ok_or(MatrixError::NonContiguousIndexSet {
            what: "vector",
        })?;
        Ok(Self {
            comm: comm.clone(),
            global_size: owned.size(),
            values: vec![0.0; range.len()],
            owned: range,
        })
    }

    /// Vector owning `owned` whose entries are `f(global_index)`.
    pub fn from_fn(
        comm: &C,
        owned: &IndexSet,
        f: impl Fn(usize) -> f64,
    ) -> Result<Self, MatrixError> {
        let mut v = Self::new(comm, owned)?;
        for (value, i) in v.values.iter_mut().zip(v.owned.clone()) {
            *value = f(i);
        }
        Ok(v)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Length of the global vector.
    #[inline]
    pub fn size(&self) -> usize {
        self.global_size
    }

    /// Globally indexed range owned by this rank.
    #[inline]
    pub fn local_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    /// Owned range as an index set.
    pub fn locally_owned_elements(&self) -> IndexSet {
        IndexSet::from_range(self.global_size, self.owned.clone())
    }

    #[inline]
    pub fn local_values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn local_values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Value at a locally owned global index.
    pub fn get(&self, index: usize) -> Result<f64, MatrixError> {
        self.local_offset(index).map(|k| self.values[k])
    }

    /// Overwrite the value at a locally owned global index.
    pub fn set(&mut self, index: usize, value: f64) -> Result<(), MatrixError> {
        let k = self.local_offset(index)?;
        self.values[k] = value;
        Ok(())
    }

    fn local_offset(&self, index: usize) -> Result<usize, MatrixError> {
        if self.owned.contains(&index) {
            Ok(index - self.owned.start)
        } else {
            Err(MatrixError::RowNotOwned {
                row: index,
                owned: self.owned.clone(),
            })
        }
    }

    /// True if `other` is distributed exactly like `self`.
    pub fn same_layout(&self, other: &Self) -> bool {
        self.global_size == other.global_size && self.owned == other.owned
    }

    /// Distributed inner product `Σ self_i * other_i`.
    ///
    /// Collective over the vector's communicator.
    pub fn dot(&self, other: &Self, tag: CommTag) -> Result<f64, MatrixError> {
        if !self.same_layout(other) {
            return Err(MatrixError::VectorLayout(format!(
                "dot of {:?}/{} with {:?}/{}",
                self.owned, self.global_size, other.owned, other.global_size
            )));
        }
        let local: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .sum();
        all_reduce_sum_f64(&self.comm, tag, local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn serial_vector_dot() {
        let owned = IndexSet::complete(4);
        let v = DistributedVector::from_fn(&NoComm, &owned, |i| i as f64).unwrap();
        let w = v.clone();
        assert_eq!(v.dot(&w, CommTag::default()).unwrap(), 14.0);
    }

    #[test]
    fn access_outside_owned_range_fails() {
        let owned = IndexSet::from_range(10, 2..5);
        let mut v = DistributedVector::new(&NoComm, &owned).unwrap();
        v.set(3, 1.5).unwrap();
        assert_eq!(v.get(3).unwrap(), 1.5);
        assert!(matches!(v.get(7), Err(MatrixError::RowNotOwned { row: 7, .. })));
    }

    #[test]
    fn non_contiguous_layout_is_rejected() {
        let mut owned = IndexSet::new(10);
        owned.add_range(0..2);
        owned.add_range(4..6);
        assert!(DistributedVector::new(&NoComm, &owned).is_err());
    }

    #[test]
    fn dot_rejects_mismatched_layouts() {
        let a = DistributedVector::new(&NoComm, &IndexSet::complete(3)).unwrap();
        let b = DistributedVector::new(&NoComm, &IndexSet::complete(4)).unwrap();
        assert!(matches!(
            a.dot(&b, CommTag::default()),
            Err(MatrixError::VectorLayout(_))
        ));
    }
}
