mod util;

use aij_assembly::prelude::*;
use util::{laplacian, owned_entries, run_ranks, tridiagonal};

#[test]
fn off_process_additions_reach_the_owner() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(3, |comm| {
        let mut a = laplacian(&engine, &comm, 6, &[2, 2, 2]);
        a.add(0, 0, 1.0).unwrap();
        a.add(5, 4, 0.5).unwrap();
        a.compress(VectorOperation::Add).unwrap();
        (a.el(0, 0).ok(), a.el(5, 4).ok())
    });
    assert_eq!(out[0].0, Some(2.0 + 3.0));
    assert_eq!(out[2].1, Some(-1.0 + 1.5));
    assert_eq!(out[1], (None, None));
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn closed_structure_rejects_remote_new_entries_at_the_owner() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let mut a = laplacian(&engine, &comm, 4, &[2, 2]);
        if comm.rank() == 1 {
            // (0, 3) is outside the tridiagonal structure of rank 0's rows
            a.set(0, 3, 1.0).unwrap();
        }
        a.compress(VectorOperation::Insert)
    });
    assert!(matches!(out[0], Err(MatrixError::Engine { op: "assemble", .. })));
    assert!(out[1].is_ok());
}

#[test]
fn duplicate_then_copy_reproduces_the_values() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let a = laplacian(&engine, &comm, 5, &[3, 2]);
        let mut b = SparseMatrix::new(engine.clone()).unwrap();
        b.reinit_like(&a).unwrap();
        let zeros = owned_entries(&b).iter().all(|&(_, _, v)| v == 0.0);
        let same_structure = b.n_nonzero_elements().unwrap() == a.n_nonzero_elements().unwrap();
        b.copy_from(&a).unwrap();
        let equal = owned_entries(&a) == owned_entries(&b);
        (zeros, same_structure, equal, b.communicator().size())
    });
    for r in out {
        assert_eq!(r, (true, true, true, 2));
    }
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn norm_square_and_scalar_product() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let a = laplacian(&engine, &comm, 4, &[2, 2]);
        let cols = a.locally_owned_domain_indices().unwrap();
        let ones = DistributedVector::from_fn(&comm, &cols, |_| 1.0).unwrap();
        let ramp = DistributedVector::from_fn(&comm, &cols, |i| i as f64).unwrap();
        (
            a.matrix_norm_square(&ones).unwrap(),
            a.matrix_scalar_product(&ramp, &ones).unwrap(),
            a.matrix_norm_square(&ramp).unwrap(),
        )
    });
    // A 1 = (1, 0, 0, 1), A (0, 1, 2, 3) = (-1, 0, 0, 4)
    for r in out {
        assert_eq!(r, (2.0, 3.0, 12.0));
    }
}

#[test]
fn vmult_uses_remote_source_entries() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let a = laplacian(&engine, &comm, 4, &[1, 3]);
        let src =
            DistributedVector::from_fn(&comm, &a.locally_owned_domain_indices().unwrap(), |i| (i * i) as f64)
                .unwrap();
        let mut dst = DistributedVector::new(&comm, &a.locally_owned_range_indices().unwrap()).unwrap();
        a.vmult(&mut dst, &src).unwrap();
        dst.local_values().to_vec()
    });
    // src = (0, 1, 4, 9)
    assert_eq!(out[0], vec![-1.0]);
    assert_eq!(out[1], vec![-2.0, -2.0, 14.0]);
}

#[test]
fn matrix_products_across_processes() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let a = laplacian(&engine, &comm, 4, &[2, 2]);
        let mut c = SparseMatrix::new(engine.clone()).unwrap();
        a.mmult(&mut c, &a, None).unwrap();
        let plain = owned_entries(&c);

        let cols = a.locally_owned_domain_indices().unwrap();
        let ones = DistributedVector::from_fn(&comm, &cols, |_| 1.0).unwrap();
        a.tmmult(&mut c, &a, Some(&ones)).unwrap();
        let transposed = owned_entries(&c);
        (plain, transposed)
    });
    let square = [
        [5.0, -4.0, 1.0, 0.0],
        [-4.0, 6.0, -4.0, 1.0],
        [1.0, -4.0, 6.0, -4.0],
        [0.0, 1.0, -4.0, 5.0],
    ];
    for (plain, transposed) in out {
        assert_eq!(plain, transposed);
        for (i, j, v) in plain {
            assert_eq!(v, square[i][j], "entry ({i}, {j})");
        }
    }
    assert_eq!(engine.live_handles(), 0);
}

/// Dense 2x2 matrix with one row per rank.
fn dense_2x2(
    engine: &AijEngine<ThreadComm>,
    comm: &ThreadComm,
    rows: [[f64; 2]; 2],
) -> SparseMatrix<AijEngine<ThreadComm>> {
    let sp = SparsityPattern::from_row_lists(2, 2, [vec![0, 1], vec![0, 1]]).unwrap();
    let mut m = SparseMatrix::with_counts(engine.clone(), comm, &sp, &[1, 1], &[1, 1], comm.rank(), true).unwrap();
    for i in m.local_range().unwrap() {
        m.set_row_values(i, &[0, 1], &rows[i]).unwrap();
    }
    m.compress(VectorOperation::Insert).unwrap();
    m
}

#[test]
fn scaled_products_of_non_symmetric_factors() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let a = dense_2x2(&engine, &comm, [[1.0, 2.0], [0.0, 3.0]]);
        let b = dense_2x2(&engine, &comm, [[4.0, 0.0], [1.0, 5.0]]);
        let v = DistributedVector::from_fn(&comm, &b.locally_owned_range_indices().unwrap(), |i| {
            [2.0, 10.0][i]
        })
        .unwrap();
        let row = |c: &SparseMatrix<AijEngine<ThreadComm>>| {
            let i = comm.rank();
            [c.el(i, 0).unwrap(), c.el(i, 1).unwrap()]
        };

        let mut c = SparseMatrix::new(engine.clone()).unwrap();
        a.mmult(&mut c, &b, Some(&v)).unwrap();
        let plain = row(&c);
        a.tmmult(&mut c, &b, Some(&v)).unwrap();
        let transposed = row(&c);
        (plain, transposed)
    });
    // A diag(2, 10) B and A^T diag(2, 10) B
    assert_eq!(out[0], ([28.0, 100.0], [8.0, 0.0]));
    assert_eq!(out[1], ([30.0, 150.0], [46.0, 150.0]));
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn clearing_rows_owned_elsewhere() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let mut a = laplacian(&engine, &comm, 4, &[2, 2]);
        let before = a.n_nonzero_elements().unwrap();
        // rank 0 asks for row 3, rank 1 for row 0
        let row = if comm.rank() == 0 { 3 } else { 0 };
        a.clear_rows(&[row], 1.0).unwrap();
        let after = a.n_nonzero_elements().unwrap();
        (before, after, owned_entries(&a))
    });
    assert_eq!(out[0].0, out[0].1);
    let row0: Vec<f64> = out[0].2.iter().filter(|e| e.0 == 0).map(|e| e.2).collect();
    let row3: Vec<f64> = out[1].2.iter().filter(|e| e.0 == 3).map(|e| e.2).collect();
    assert_eq!(row0, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(row3, vec![0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn deferred_structure_grows_on_insertion() {
    let engine = AijEngine::<ThreadComm>::new();
    let out = run_ranks(2, |comm| {
        let sp = tridiagonal(4);
        let mut a =
            SparseMatrix::with_counts(engine.clone(), &comm, &sp, &[2, 2], &[2, 2], comm.rank(), false).unwrap();
        let empty = a.n_nonzero_elements().unwrap();
        for i in a.local_range().unwrap() {
            a.set(i, 3 - i, 1.0).unwrap();
        }
        if comm.rank() == 0 {
            a.set(3, 1, 7.0).unwrap();
        }
        a.compress(VectorOperation::Insert).unwrap();
        (empty, a.n_nonzero_elements().unwrap(), a.el(3, 1).ok())
    });
    assert_eq!(out[0].0, 0);
    assert_eq!(out[0].1, 5);
    assert_eq!(out[1].2, Some(7.0));
}

#[test]
fn every_handle_is_destroyed_exactly_once() {
    let engine = AijEngine::<ThreadComm>::new();
    run_ranks(2, |comm| {
        let sp = tridiagonal(6);
        let mut a = SparseMatrix::new(engine.clone()).unwrap();
        for _ in 0..3 {
            a.reinit_with_counts(&comm, &sp, &[3, 3], &[3, 3], comm.rank(), true)
                .unwrap();
        }
        let b = a.try_clone().unwrap();
        let mut c = SparseMatrix::new(engine.clone()).unwrap();
        c.reinit_like(&b).unwrap();
        c.reinit_like(&a).unwrap();
    });
    assert_eq!(engine.live_handles(), 0);
}
