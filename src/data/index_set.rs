//! Sets of global indices, stored as sorted, disjoint half-open ranges.
//!
//! An [`IndexSet`] describes which rows or columns of a global index space
//! `[0, size)` a process owns. The assembly layer only accepts sets that are a
//! single contiguous range, but the type itself can hold any subset.

use std::ops::Range;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::algs::collective::all_gather_pod;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WirePartition;
use crate::debug_invariants::DebugInvariants;
use crate::matrix_error::MatrixError;
use crate::ownership::check_tiling;

/// Subset of `[0, size)` as sorted, disjoint, non-adjacent ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSet {
    size: usize,
    ranges: Vec<Range<usize>>,
    compressed: bool,
}

impl IndexSet {
    /// Empty set over the universe `[0, size)`.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ranges: Vec::new(),
            compressed: true,
        }
    }

    /// Set containing every index of `[0, size)`.
    pub fn complete(size: usize) -> Self {
        let mut set = Self::new(size);
        set.add_range(0..size);
        set
    }

    /// Set over `[0, size)` holding exactly `range`.
    pub fn from_range(size: usize, range: Range<usize>) -> Self {
        let mut set = Self::new(size);
        set.add_range(range);
        set
    }

    /// Size of the universe.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow or shrink the universe. Existing elements must stay inside it.
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(
            self.ranges.iter().all(|r| r.end <= size),
            "set_size({size}) would drop elements"
        );
        self.size = size;
    }

    /// Add the half-open range `range`. Empty ranges are ignored.
    pub fn add_range(&mut self, range: Range<usize>) {
        debug_assert!(
            range.end <= self.size,
            "range {range:?} exceeds universe {}",
            self.size
        );
        if range.is_empty() {
            return;
        }
        self.ranges.push(range);
        self.compressed = false;
    }

    /// Add a single index.
    #[inline]
    pub fn add_index(&mut self, index: usize) {
        self.add_range(index..index + 1);
    }

    /// Sort and merge overlapping or adjacent ranges.
    pub fn compress(&mut self) {
        if self.compressed {
            return;
        }
        self.ranges.sort_unstable_by_key(|r| (r.start, r.end));
        let merged = std::mem::take(&mut self.ranges)
            .into_iter()
            .coalesce(|a, b| {
                if b.start <= a.end {
                    Ok(a.start..a.end.max(b.end))
                } else {
                    Err((a, b))
                }
            })
            .collect();
        self.ranges = merged;
        self.compressed = true;
    }

    /// Return a compressed copy.
    pub fn compressed(mut self) -> Self {
        self.compress();
        self
    }

    fn normalized(&self) -> std::borrow::Cow<'_, [Range<usize>]> {
        if self.compressed {
            std::borrow::Cow::Borrowed(&self.ranges)
        } else {
            std::borrow::Cow::Owned(self.clone().compressed().ranges)
        }
    }

    /// Number of indices in the set.
    pub fn n_elements(&self) -> usize {
        self.normalized().iter().map(|r| r.len()).sum()
    }

    /// True if the set holds no index.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True if the set is a single range (the empty set counts as contiguous).
    pub fn is_contiguous(&self) -> bool {
        self.normalized().len() <= 1
    }

    /// The set as one range, if it is contiguous.
    pub fn as_range(&self) -> Option<Range<usize>> {
        let ranges = self.normalized();
        match ranges.as_ref() {
            [] => Some(0..0),
            [r] => Some(r.clone()),
            _ => None,
        }
    }

    /// Membership test.
    pub fn is_element(&self, index: usize) -> bool {
        let ranges = self.normalized();
        let pos = ranges.partition_point(|r| r.end <= index);
        ranges.get(pos).is_some_and(|r| r.start <= index)
    }

    /// The `n`-th smallest index of the set.
    pub fn nth_index_in_set(&self, n: usize) -> Option<usize> {
        let mut remaining = n;
        for r in self.normalized().iter() {
            if remaining < r.len() {
                return Some(r.start + remaining);
            }
            remaining -= r.len();
        }
        None
    }

    /// Position of `index` within the set (inverse of `nth_index_in_set`).
    pub fn index_within_set(&self, index: usize) -> Option<usize> {
        let mut before = 0;
        for r in self.normalized().iter() {
            if r.contains(&index) {
                return Some(before + (index - r.start));
            }
            if r.start > index {
                return None;
            }
            before += r.len();
        }
        None
    }

    /// Iterate over the contained indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.normalized()
            .into_owned()
            .into_iter()
            .flat_map(|r| r)
    }

    /// Iterate over the contained ranges in ascending order.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        self.normalized().into_owned()
    }

    /// Whether the sets of all ranks, taken in rank order, enumerate the
    /// universe exactly once in ascending order.
    ///
    /// Collective over `comm`. Every rank returns the same answer.
    pub fn is_ascending_and_one_to_one<C>(&self, comm: &C, tag: CommTag) -> Result<bool, MatrixError>
    where
        C: Communicator + ?Sized,
    {
        let first = self.nth_index_in_set(0).unwrap_or(0);
        let record = WirePartition::new(self.is_contiguous(), first, self.n_elements(), 0, 0);
        let all = all_gather_pod(comm, tag, &[record])?;

        let mut parts = Vec::with_capacity(all.len());
        for (rank, recs) in all.iter().enumerate() {
            match recs.as_slice() {
                [rec] if rec.ok() => parts.push((rec.row_first(), rec.n_rows())),
                [_] => return Ok(false),
                _ => {
                    return Err(MatrixError::Comm {
                        neighbor: rank,
                        message: "malformed partition record".into(),
                    });
                }
            }
        }
        Ok(check_tiling("index", parts, self.size).is_ok())
    }
}

impl DebugInvariants for IndexSet {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "IndexSet");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        for r in &self.ranges {
            if r.end > self.size {
                return Err(MatrixError::RowRangeOutOfBounds {
                    range: r.clone(),
                    n_rows: self.size,
                });
            }
        }
        if self.compressed {
            for (a, b) in self.ranges.iter().tuple_windows() {
                if a.end >= b.start {
                    return Err(MatrixError::NotOnePartition {
                        what: "index",
                        expected: a.end,
                        found: b.start,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    #[test]
    fn compress_merges_adjacent_and_overlapping() {
        let mut s = IndexSet::new(20);
        s.add_range(5..8);
        s.add_range(0..2);
        s.add_range(8..10);
        s.add_range(6..9);
        s.compress();
        assert_eq!(s.ranges(), vec![0..2, 5..10]);
        assert_eq!(s.n_elements(), 7);
        assert!(!s.is_contiguous());
        s.validate_invariants().unwrap();
    }

    #[test]
    fn nth_and_within_are_inverse() {
        let mut s = IndexSet::new(30);
        s.add_range(3..6);
        s.add_range(10..12);
        for n in 0..s.n_elements() {
            let idx = s.nth_index_in_set(n).unwrap();
            assert!(s.is_element(idx));
            assert_eq!(s.index_within_set(idx), Some(n));
        }
        assert_eq!(s.nth_index_in_set(5), None);
        assert_eq!(s.index_within_set(7), None);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![3, 4, 5, 10, 11]);
    }

    #[test]
    fn empty_set_is_contiguous() {
        let s = IndexSet::new(4);
        assert!(s.is_contiguous());
        assert_eq!(s.as_range(), Some(0..0));
        assert_eq!(s.nth_index_in_set(0), None);
    }

    #[test]
    fn uncompressed_queries_see_merged_view() {
        let mut s = IndexSet::new(10);
        s.add_index(4);
        s.add_index(3);
        assert!(s.is_contiguous());
        assert_eq!(s.as_range(), Some(3..5));
    }

    #[test]
    fn one_to_one_on_a_single_process() {
        let tag = CommTag::default();
        assert!(IndexSet::complete(5).is_ascending_and_one_to_one(&NoComm, tag).unwrap());
        assert!(!IndexSet::from_range(5, 0..4).is_ascending_and_one_to_one(&NoComm, tag).unwrap());
        let mut gappy = IndexSet::new(5);
        gappy.add_range(0..2);
        gappy.add_range(3..5);
        assert!(!gappy.is_ascending_and_one_to_one(&NoComm, tag).unwrap());
    }

    #[test]
    fn one_to_one_across_ranks() {
        let blocks = |c: &ThreadComm, parts: &[Range<usize>]| {
            IndexSet::from_range(6, parts[c.rank()].clone())
                .is_ascending_and_one_to_one(c, CommTag::new(0x300))
                .unwrap()
        };
        let out: Vec<(bool, bool, bool)> = std::thread::scope(|s| {
            let hs: Vec<_> = ThreadComm::world(2)
                .into_iter()
                .map(|c| {
                    s.spawn(move || {
                        (
                            blocks(&c, &[0..4, 4..6]),
                            // descending order of the blocks
                            blocks(&c, &[3..6, 0..3]),
                            blocks(&c, &[0..4, 3..6]),
                        )
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for r in out {
            assert_eq!(r, (true, false, false));
        }
    }
}
