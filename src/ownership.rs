//! Which rows and columns of a distributed matrix this process owns.
//!
//! An [`OwnershipDescriptor`] is derived anew for every construction, either
//! from per-process counts (purely local) or from per-process index sets
//! (one collective exchange). Across all processes the owned row ranges tile
//! `[0, n_rows)` and the owned column ranges tile `[0, n_cols)`.

use std::ops::Range;

use crate::algs::collective::all_gather_pod;
use crate::algs::communicator::Communicator;
use crate::algs::wire::WirePartition;
use crate::config::ConstructionConfig;
use crate::data::index_set::IndexSet;
use crate::debug_invariants::DebugInvariants;
use crate::matrix_error::MatrixError;
use crate::sparsity::SparsityPatternLike;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipDescriptor {
    n_rows: usize,
    n_cols: usize,
    rows: Range<usize>,
    cols: Range<usize>,
    rank: usize,
    n_ranks: usize,
}

/// Consecutive ranges of the given lengths, starting at zero.
pub fn tile(counts: &[usize]) -> Vec<Range<usize>> {
    counts
        .iter()
        .scan(0usize, |start, &n| {
            let r = *start..*start + n;
            *start += n;
            Some(r)
        })
        .collect()
}

/// Check that the blocks `(first, len)`, taken in rank order, cover
/// `[0, total)` exactly once and in ascending order. Empty blocks are
/// ignored wherever they claim to start.
pub(crate) fn check_tiling(
    what: &'static str,
    parts: impl IntoIterator<Item = (usize, usize)>,
    total: usize,
) -> Result<(), MatrixError> {
    let mut next = 0usize;
    for (first, len) in parts {
        if len == 0 {
            continue;
        }
        if first != next {
            return Err(MatrixError::NotOnePartition {
                what,
                expected: next,
                found: first,
            });
        }
        next += len;
    }
    if next != total {
        return Err(MatrixError::NotOnePartition {
            what,
            expected: total,
            found: next,
        });
    }
    Ok(())
}

impl OwnershipDescriptor {
    /// Ranges from per-process counts: process `p` owns the `counts[p]`
    /// indices after those of all lower ranks.
    pub fn from_counts(
        rows_per_process: &[usize],
        cols_per_process: &[usize],
        this_process: usize,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<Self, MatrixError> {
        if rows_per_process.len() != cols_per_process.len() {
            return Err(MatrixError::DimensionMismatch {
                left: rows_per_process.len(),
                right: cols_per_process.len(),
            });
        }
        let n_ranks = rows_per_process.len();
        if this_process >= n_ranks {
            return Err(MatrixError::RankOutOfRange {
                rank: this_process,
                n_ranks,
            });
        }
        for (what, counts, expected) in [
            ("row", rows_per_process, n_rows),
            ("column", cols_per_process, n_cols),
        ] {
            let sum: usize = counts.iter().sum();
            if sum != expected {
                return Err(MatrixError::CountSumMismatch { what, sum, expected });
            }
        }

        let row_start: usize = rows_per_process[..this_process].iter().sum();
        let col_start: usize = cols_per_process[..this_process].iter().sum();
        let d = Self {
            n_rows,
            n_cols,
            rows: row_start..row_start + rows_per_process[this_process],
            cols: col_start..col_start + cols_per_process[this_process],
            rank: this_process,
            n_ranks,
        };
        d.debug_assert_invariants();
        Ok(d)
    }

    /// Ranges from this process's owned index sets.
    ///
    /// Collective over `comm`. Local preconditions are checked first, then
    /// every process learns every other's validity and ranges in a single
    /// exchange, so either all processes succeed or all return an error.
    pub fn from_index_sets<C, P>(
        rows: &IndexSet,
        cols: &IndexSet,
        pattern: &P,
        comm: &C,
        config: &ConstructionConfig,
    ) -> Result<Self, MatrixError>
    where
        C: Communicator + ?Sized,
        P: SparsityPatternLike + ?Sized,
    {
        let n_rows = pattern.n_rows();
        let n_cols = pattern.n_cols();
        let local = Self::check_local_sets(rows, cols, n_rows, n_cols);

        let (row_range, col_range) = match &local {
            Ok(ranges) => ranges.clone(),
            Err(_) => (0..0, 0..0),
        };
        let record = WirePartition::new(
            local.is_ok(),
            row_range.start,
            row_range.len(),
            col_range.start,
            col_range.len(),
        );
        let all = all_gather_pod(comm, config.comm_tag, &[record])?;
        let parts = all
            .iter()
            .enumerate()
            .map(|(rank, recs)| match recs.as_slice() {
                [rec] => Ok(*rec),
                _ => Err(MatrixError::Comm {
                    neighbor: rank,
                    message: "malformed partition record".into(),
                }),
            })
            .collect::<Result<Vec<WirePartition>, _>>()?;

        local?;
        if let Some(rank) = parts.iter().position(|p| !p.ok()) {
            return Err(MatrixError::RemotePrecondition { rank });
        }

        check_tiling("row", parts.iter().map(|p| (p.row_first(), p.n_rows())), n_rows)?;
        if config.verify_partition {
            check_tiling("column", parts.iter().map(|p| (p.col_first(), p.n_cols())), n_cols)?;
        }
        log::trace!(
            "rank {}: owns rows {:?} and columns {:?}",
            comm.rank(),
            row_range,
            col_range
        );

        let d = Self {
            n_rows,
            n_cols,
            rows: row_range,
            cols: col_range,
            rank: comm.rank(),
            n_ranks: comm.size(),
        };
        d.debug_assert_invariants();
        Ok(d)
    }

    fn check_local_sets(
        rows: &IndexSet,
        cols: &IndexSet,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<(Range<usize>, Range<usize>), MatrixError> {
        if rows.size() != n_rows {
            return Err(MatrixError::IndexSetSizeMismatch {
                what: "rows",
                pattern: n_rows,
                index_set: rows.size(),
            });
        }
        if cols.size() != n_cols {
            return Err(MatrixError::IndexSetSizeMismatch {
                what: "columns",
                pattern: n_cols,
                index_set: cols.size(),
            });
        }
        let r = rows
            .as_range()
            .ok_or(MatrixError::NonContiguousIndexSet { what: "row" })?;
        let c = cols
            .as_range()
            .ok_or(MatrixError::NonContiguousIndexSet { what: "column" })?;
        Ok((r, c))
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }
    #[inline]
    pub fn row_range(&self) -> Range<usize> {
        self.rows.clone()
    }
    #[inline]
    pub fn col_range(&self) -> Range<usize> {
        self.cols.clone()
    }
    #[inline]
    pub fn n_local_rows(&self) -> usize {
        self.rows.len()
    }
    #[inline]
    pub fn n_local_cols(&self) -> usize {
        self.cols.len()
    }
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }
    #[inline]
    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn owned_row_set(&self) -> IndexSet {
        IndexSet::from_range(self.n_rows, self.rows.clone())
    }

    pub fn owned_col_set(&self) -> IndexSet {
        IndexSet::from_range(self.n_cols, self.cols.clone())
    }
}

impl DebugInvariants for OwnershipDescriptor {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "OwnershipDescriptor");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        if self.rank >= self.n_ranks {
            return Err(MatrixError::RankOutOfRange {
                rank: self.rank,
                n_ranks: self.n_ranks,
            });
        }
        if self.rows.start > self.rows.end || self.rows.end > self.n_rows {
            return Err(MatrixError::RowRangeOutOfBounds {
                range: self.rows.clone(),
                n_rows: self.n_rows,
            });
        }
        if self.cols.start > self.cols.end || self.cols.end > self.n_cols {
            return Err(MatrixError::ColumnOutOfRange {
                col: self.cols.end,
                n_cols: self.n_cols,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::sparsity::SparsityPattern;
    use proptest::prelude::*;

    #[test]
    fn ranges_follow_prefix_sums() {
        let d = OwnershipDescriptor::from_counts(&[3, 0, 4], &[2, 2, 3], 2, 7, 7).unwrap();
        assert_eq!(d.row_range(), 3..7);
        assert_eq!(d.col_range(), 4..7);
        assert_eq!(d.n_ranks(), 3);
        let mid = OwnershipDescriptor::from_counts(&[3, 0, 4], &[2, 2, 3], 1, 7, 7).unwrap();
        assert_eq!(mid.row_range(), 3..3);
        assert_eq!(mid.n_local_rows(), 0);
    }

    #[test]
    fn count_preconditions() {
        assert_eq!(
            OwnershipDescriptor::from_counts(&[1, 1], &[2], 0, 2, 2),
            Err(MatrixError::DimensionMismatch { left: 2, right: 1 })
        );
        assert_eq!(
            OwnershipDescriptor::from_counts(&[1, 1], &[1, 1], 2, 2, 2),
            Err(MatrixError::RankOutOfRange { rank: 2, n_ranks: 2 })
        );
        assert_eq!(
            OwnershipDescriptor::from_counts(&[1, 2], &[1, 1], 0, 2, 2),
            Err(MatrixError::CountSumMismatch {
                what: "row",
                sum: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn tiling_check_names_the_gap() {
        assert!(check_tiling("row", [(0, 2), (5, 0), (2, 3)], 5).is_ok());
        assert_eq!(
            check_tiling("row", [(0, 2), (3, 2)], 5),
            Err(MatrixError::NotOnePartition {
                what: "row",
                expected: 2,
                found: 3
            })
        );
        assert!(check_tiling("column", [(0, 2)], 3).is_err());
    }

    #[test]
    fn single_process_index_sets() {
        let sp = SparsityPattern::from_row_lists(3, 4, [vec![0], vec![1], vec![3]]).unwrap();
        let cfg = ConstructionConfig {
            verify_partition: true,
            ..Default::default()
        };
        let d = OwnershipDescriptor::from_index_sets(
            &IndexSet::complete(3),
            &IndexSet::complete(4),
            &sp,
            &NoComm,
            &cfg,
        )
        .unwrap();
        assert_eq!((d.row_range(), d.col_range()), (0..3, 0..4));
        assert_eq!(d.owned_col_set().n_elements(), 4);
        assert_eq!(d.owned_row_set().as_range(), Some(0..3));

        let mut gappy = IndexSet::new(3);
        gappy.add_index(0);
        gappy.add_index(2);
        assert_eq!(
            OwnershipDescriptor::from_index_sets(&gappy, &IndexSet::complete(4), &sp, &NoComm, &cfg),
            Err(MatrixError::NonContiguousIndexSet { what: "row" })
        );
        assert!(matches!(
            OwnershipDescriptor::from_index_sets(
                &IndexSet::from_range(3, 0..2),
                &IndexSet::complete(4),
                &sp,
                &NoComm,
                &cfg
            ),
            Err(MatrixError::NotOnePartition { what: "row", .. })
        ));
    }

    proptest! {
        #[test]
        fn count_ranges_tile_the_extent(
            rows in prop::collection::vec(0usize..6, 1..8),
            cols_seed in prop::collection::vec(0usize..6, 8),
        ) {
            let cols = &cols_seed[..rows.len()];
            let (n_rows, n_cols) = (rows.iter().sum::<usize>(), cols.iter().sum::<usize>());
            let ds: Vec<_> = (0..rows.len())
                .map(|p| OwnershipDescriptor::from_counts(&rows, cols, p, n_rows, n_cols).unwrap())
                .collect();
            let row_ranges: Vec<_> = ds.iter().map(|d| d.row_range()).collect();
            let col_ranges: Vec<_> = ds.iter().map(|d| d.col_range()).collect();
            prop_assert_eq!(&row_ranges, &tile(&rows));
            prop_assert_eq!(&col_ranges, &tile(cols));
            prop_assert!(check_tiling("row", row_ranges.iter().map(|r| (r.start, r.len())), n_rows).is_ok());
            for (d, r) in ds.iter().zip(&rows) {
                prop_assert_eq!(d.n_local_rows(), *r);
            }
        }
    }
}
