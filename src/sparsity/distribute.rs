//! Ship sparsity entries to the process that owns their row.
//!
//! During assembly a process typically adds entries for rows it does not own
//! (cells on a partition boundary couple to ghost rows). Before the pattern
//! can describe the owned rows completely, those entries must reach the
//! owner.

use std::ops::Range;

use hashbrown::HashMap;

use super::{DynamicSparsityPattern, SparsityPatternLike};
use crate::algs::collective::all_to_all_pod;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireEntry;
use crate::matrix_error::MatrixError;

/// Send every stored entry in a row owned by another rank to that rank, and
/// add the entries received for the rows this rank owns.
///
/// `owned_rows_per_process[p]` is the contiguous row range of rank `p`.
/// Entries in foreign rows are kept locally as well. Collective over `comm`.
pub fn distribute_sparsity_pattern<C>(
    dsp: &mut DynamicSparsityPattern,
    owned_rows_per_process: &[Range<usize>],
    comm: &C,
    tag: CommTag,
) -> Result<(), MatrixError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    if owned_rows_per_process.len() != comm.size() {
        return Err(MatrixError::DimensionMismatch {
            left: owned_rows_per_process.len(),
            right: comm.size(),
        });
    }
    let mine = owned_rows_per_process[me].clone();

    let owner_of = |row: usize| owned_rows_per_process.iter().position(|r| r.contains(&row));

    // group the foreign entries by the rank owning their row
    let mut by_owner: HashMap<usize, Vec<WireEntry>> = HashMap::new();
    for (row, cols) in dsp.stored_rows() {
        if mine.contains(&row) || cols.is_empty() {
            continue;
        }
        match owner_of(row) {
            Some(owner) => by_owner
                .entry(owner)
                .or_default()
                .extend(cols.iter().map(|&c| WireEntry::new(row, c, 0.0))),
            None => log::warn!("rank {me}: row {row} has no owner; its entries stay local"),
        }
    }
    log::trace!(
        "rank {me}: shipping {} entries to {} ranks",
        by_owner.values().map(Vec::len).sum::<usize>(),
        by_owner.len()
    );
    let outgoing: Vec<Vec<WireEntry>> = (0..comm.size())
        .map(|p| by_owner.remove(&p).unwrap_or_default())
        .collect();

    let received = all_to_all_pod(comm, tag, &outgoing)?;
    for (from, entries) in received.iter().enumerate() {
        if from == me {
            continue;
        }
        for e in entries {
            let (row, col, _) = e.decode();
            if !mine.contains(&row) {
                return Err(MatrixError::RowNotOwned {
                    row,
                    owned: mine.clone(),
                });
            }
            dsp.add(row, col)?;
        }
    }
    debug_assert!(mine.clone().all(|r| r >= dsp.n_rows() || dsp.stores_row(r)));
    Ok(())
}
