//! Fixed, little-endian wire records for the layer's collective exchanges.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::matrix_error::MatrixError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a byte buffer into an owned vector of records.
///
/// Copies through a zeroed, properly aligned vector, so `bytes` may come
/// from any allocation.
pub fn decode_records<T: Pod>(bytes: &[u8], from: usize) -> Result<Vec<T>, MatrixError> {
    let width = size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(MatrixError::Comm {
            neighbor: from,
            message: format!(
                "payload of {} bytes is not a whole number of {}-byte records",
                bytes.len(),
                width
            ),
        });
    }
    let mut out = vec![T::zeroed(); bytes.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// Byte length of a following payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}
impl WireLen {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A single unsigned integer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireU64 {
    pub v_le: u64,
}
impl WireU64 {
    pub fn of(v: u64) -> Self {
        Self { v_le: v.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.v_le)
    }
}

/// A single float, carried by its bit pattern.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireF64 {
    pub bits_le: u64,
}
impl WireF64 {
    pub fn of(v: f64) -> Self {
        Self {
            bits_le: v.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// One process's view of a proposed partition: local validity plus the
/// first owned row and the element counts of its row and column sets.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePartition {
    pub ok_le: u64,
    pub row_first_le: u64,
    pub n_rows_le: u64,
    pub col_first_le: u64,
    pub n_cols_le: u64,
}
impl WirePartition {
    pub fn new(ok: bool, row_first: usize, n_rows: usize, col_first: usize, n_cols: usize) -> Self {
        Self {
            ok_le: (ok as u64).to_le(),
            row_first_le: (row_first as u64).to_le(),
            n_rows_le: (n_rows as u64).to_le(),
            col_first_le: (col_first as u64).to_le(),
            n_cols_le: (n_cols as u64).to_le(),
        }
    }
    pub fn ok(&self) -> bool {
        u64::from_le(self.ok_le) != 0
    }
    pub fn row_first(&self) -> usize {
        u64::from_le(self.row_first_le) as usize
    }
    pub fn n_rows(&self) -> usize {
        u64::from_le(self.n_rows_le) as usize
    }
    pub fn col_first(&self) -> usize {
        u64::from_le(self.col_first_le) as usize
    }
    pub fn n_cols(&self) -> usize {
        u64::from_le(self.n_cols_le) as usize
    }
}

/// A matrix entry `(row, col, value)` in global indices.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
    pub val_bits_le: u64,
}
impl WireEntry {
    pub fn new(row: usize, col: usize, val: f64) -> Self {
        Self {
            row_le: (row as u64).to_le(),
            col_le: (col as u64).to_le(),
            val_bits_le: val.to_bits().to_le(),
        }
    }
    pub fn decode(&self) -> (usize, usize, f64) {
        (
            u64::from_le(self.row_le) as usize,
            u64::from_le(self.col_le) as usize,
            f64::from_bits(u64::from_le(self.val_bits_le)),
        )
    }
}

const_assert_eq!(size_of::<WireLen>(), 8);
const_assert_eq!(size_of::<WirePartition>(), 40);
const_assert_eq!(size_of::<WireEntry>(), 24);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_ragged_payload() {
        let err = decode_records::<WireU64>(&[0u8; 12], 3).unwrap_err();
        assert!(matches!(err, MatrixError::Comm { neighbor: 3, .. }));
    }

    #[test]
    fn entry_preserves_negative_zero_and_nan_bits() {
        let e = WireEntry::new(4, 7, -0.0);
        let (r, c, v) = e.decode();
        assert_eq!((r, c), (4, 7));
        assert!(v == 0.0 && v.is_sign_negative());
        assert!(WireF64::of(f64::NAN).get().is_nan());
    }
}
