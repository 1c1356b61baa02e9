#![allow(dead_code)]
use aij_assembly::prelude::*;

/// Run `f` once per rank of a fresh `n`-rank thread group; results come back
/// in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    let comms = ThreadComm::world(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(move || f(c))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Pattern of the 1D three-point stencil on `n` unknowns.
pub fn tridiagonal(n: usize) -> SparsityPattern {
    SparsityPattern::from_row_lists(
        n,
        n,
        (0..n).map(|i| (i.saturating_sub(1)..(i + 2).min(n)).collect::<Vec<_>>()),
    )
    .unwrap()
}

/// Write `[-1, 2, -1]` into the locally owned rows and compress.
pub fn fill_laplacian<E: Engine>(a: &mut SparseMatrix<E>) {
    let n = a.n().unwrap();
    for i in a.local_range().unwrap() {
        a.set(i, i, 2.0).unwrap();
        if i > 0 {
            a.set(i, i - 1, -1.0).unwrap();
        }
        if i + 1 < n {
            a.set(i, i + 1, -1.0).unwrap();
        }
    }
    a.compress(VectorOperation::Insert).unwrap();
}

/// Laplacian on `n` unknowns with `counts[p]` rows and columns on rank `p`.
pub fn laplacian(
    engine: &AijEngine<ThreadComm>,
    comm: &ThreadComm,
    n: usize,
    counts: &[usize],
) -> SparseMatrix<AijEngine<ThreadComm>> {
    let sp = tridiagonal(n);
    let mut a =
        SparseMatrix::with_counts(engine.clone(), comm, &sp, counts, counts, comm.rank(), true).unwrap();
    fill_laplacian(&mut a);
    a
}

/// Owned entries `(row, col, value)` of the rows this rank owns.
pub fn owned_entries<E: Engine>(a: &SparseMatrix<E>) -> Vec<(usize, usize, f64)> {
    let n = a.n().unwrap();
    a.local_range()
        .unwrap()
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, a.el(i, j).unwrap()))
        .collect()
}

/// Like [`run_ranks`], but panics instead of hanging when some rank has not
/// returned within `limit`.
pub fn run_ranks_within<T, F>(n: usize, limit: std::time::Duration, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(ThreadComm) -> T + Send + Sync + 'static,
{
    use std::sync::{Arc, mpsc};
    use std::time::Instant;

    let f = Arc::new(f);
    let (tx, rx) = mpsc::channel();
    for c in ThreadComm::world(n) {
        let (f, tx) = (f.clone(), tx.clone());
        std::thread::spawn(move || {
            let rank = c.rank();
            let _ = tx.send((rank, f(c)));
        });
    }
    drop(tx);

    let deadline = Instant::now() + limit;
    let mut out: Vec<Option<T>> = (0..n).map(|_| None).collect();
    for _ in 0..n {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok((rank, v)) => out[rank] = Some(v),
            Err(e) => {
                let waiting: Vec<usize> = (0..n).filter(|&r| out[r].is_none()).collect();
                panic!("ranks {waiting:?} did not return within {limit:?} ({e})");
            }
        }
    }
    out.into_iter().map(|v| v.expect("every rank reported")).collect()
}
