//! In-crate engine with row-partitioned compressed-row (AIJ) storage.
//!
//! Each process stores its contiguous block of rows; every row keeps its
//! columns sorted. Values written into rows owned by another process are
//! stashed locally and delivered to the owner by the next (collective)
//! assembly. Kernels that need remote data (mat-vec, mat-mat products,
//! right scaling) gather it with the communicator's all-gather: simple and
//! adequate for the matrices this engine is meant for. The engine counts
//! live matrices so leaks and double releases are observable.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::{
    DuplicateOption, Engine, EngineIndex, EngineResult, EngineStatus, InsertMode, MatOption,
    MatType, StructureFlag, codes,
};
use crate::algs::collective::{all_gather_pod, all_gather_u64, all_reduce_sum_f64, all_reduce_sum_u64};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireEntry, WireF64, WireU64};
use crate::data::vector::DistributedVector;
use crate::matrix_error::MatrixError;

fn comm_status(e: MatrixError) -> EngineStatus {
    EngineStatus::new(codes::ERR_COMM, e.to_string())
}

fn wrong_state(message: impl Into<String>) -> EngineStatus {
    EngineStatus::new(codes::ERR_WRONG_STATE, message)
}

fn size_error(message: impl Into<String>) -> EngineStatus {
    EngineStatus::new(codes::ERR_ARG_SIZE, message)
}

fn out_of_range(message: impl Into<String>) -> EngineStatus {
    EngineStatus::new(codes::ERR_ARG_OUT_OF_RANGE, message)
}

/// One stored row: sorted columns and their values.
#[derive(Clone, Debug, Default, PartialEq)]
struct AijRow {
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl AijRow {
    fn from_columns(cols: impl IntoIterator<Item = usize>) -> Self {
        let mut cols: Vec<usize> = cols.into_iter().collect();
        cols.sort_unstable();
        cols.dedup();
        let vals = vec![0.0; cols.len()];
        Self { cols, vals }
    }

    fn from_map(acc: BTreeMap<usize, f64>) -> Self {
        let (cols, vals) = acc.into_iter().unzip();
        Self { cols, vals }
    }

    /// Slot for `col`, created when `allow_new` is set.
    fn entry_mut(&mut self, col: usize, allow_new: bool) -> Option<&mut f64> {
        match self.cols.binary_search(&col) {
            Ok(k) => Some(&mut self.vals[k]),
            Err(k) if allow_new => {
                self.cols.insert(k, col);
                self.vals.insert(k, 0.0);
                Some(&mut self.vals[k])
            }
            Err(_) => None,
        }
    }

    fn get(&self, col: usize) -> f64 {
        self.cols
            .binary_search(&col)
            .map_or(0.0, |k| self.vals[k])
    }

    fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cols.iter().copied().zip(self.vals.iter().copied())
    }

    fn len(&self) -> usize {
        self.cols.len()
    }
}

/// Row and column ownership of every rank: rank `p` owns
/// `row_starts[p]..row_starts[p + 1]`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Layout {
    row_starts: Vec<usize>,
    col_starts: Vec<usize>,
}

impl Layout {
    fn rows_of(&self, rank: usize) -> Range<usize> {
        self.row_starts[rank]..self.row_starts[rank + 1]
    }
    fn cols_of(&self, rank: usize) -> Range<usize> {
        self.col_starts[rank]..self.col_starts[rank + 1]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Sizes {
    local_rows: usize,
    local_cols: usize,
    global_rows: usize,
    global_cols: usize,
}

/// Matrix storage of [`AijEngine`].
pub struct AijMat<C> {
    comm: C,
    ty: Option<MatType>,
    sizes: Option<Sizes>,
    layout: Option<Layout>,
    rows: Vec<AijRow>,
    stash: Vec<WireEntry>,
    mode: Option<InsertMode>,
    new_nonzero_err: bool,
    keep_pattern: bool,
}

impl<C: Communicator + Clone> AijMat<C> {
    fn new(comm: C) -> Self {
        Self {
            comm,
            ty: None,
            sizes: None,
            layout: None,
            rows: Vec::new(),
            stash: Vec::new(),
            mode: None,
            new_nonzero_err: false,
            keep_pattern: false,
        }
    }

    fn sizes(&self) -> EngineResult<Sizes> {
        self.sizes.ok_or_else(|| wrong_state("sizes have not been set"))
    }

    fn layout(&self) -> EngineResult<&Layout> {
        self.layout
            .as_ref()
            .ok_or_else(|| wrong_state("matrix has not been set up"))
    }

    fn my_rows(&self) -> EngineResult<Range<usize>> {
        Ok(self.layout()?.rows_of(self.comm.rank()))
    }

    fn my_cols(&self) -> EngineResult<Range<usize>> {
        Ok(self.layout()?.cols_of(self.comm.rank()))
    }

    fn ensure_assembled(&self) -> EngineResult<()> {
        self.layout()?;
        if self.mode.is_some() || !self.stash.is_empty() {
            return Err(wrong_state("not for unassembled matrix"));
        }
        Ok(())
    }

    fn apply(&mut self, row: usize, col: usize, value: f64, mode: InsertMode) -> EngineResult<()> {
        let start = self.my_rows()?.start;
        let allow_new = !self.new_nonzero_err;
        let slot = self.rows[row - start]
            .entry_mut(col, allow_new)
            .ok_or_else(|| out_of_range(format!("inserting a new nonzero at ({row}, {col})")))?;
        match mode {
            InsertMode::Insert => *slot = value,
            InsertMode::Add => *slot += value,
        }
        Ok(())
    }

    fn structural_clone(&self, copy_values: bool) -> Self {
        let mut rows = self.rows.clone();
        if !copy_values {
            for row in &mut rows {
                row.vals.fill(0.0);
            }
        }
        Self {
            comm: self.comm.clone(),
            ty: self.ty,
            sizes: self.sizes,
            layout: self.layout.clone(),
            rows,
            stash: Vec::new(),
            mode: None,
            new_nonzero_err: self.new_nonzero_err,
            keep_pattern: self.keep_pattern,
        }
    }
}

/// Reference [`Engine`] over any [`Communicator`].
pub struct AijEngine<C> {
    live: Arc<AtomicUsize>,
    tag: CommTag,
    _comm: PhantomData<fn() -> C>,
}

impl<C> Clone for AijEngine<C> {
    fn clone(&self) -> Self {
        Self {
            live: self.live.clone(),
            tag: self.tag,
            _comm: PhantomData,
        }
    }
}

impl<C> Default for AijEngine<C> {
    fn default() -> Self {
        Self::with_tag(CommTag::new(0xE000))
    }
}

impl<C> std::fmt::Debug for AijEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AijEngine")
            .field("live", &self.live_handles())
            .field("tag", &self.tag)
            .finish()
    }
}

impl<C> AijEngine<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose collective exchanges use `tag` and `tag + 1`.
    pub fn with_tag(tag: CommTag) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            tag,
            _comm: PhantomData,
        }
    }

    /// Matrices created by this engine (or its clones) and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn track<T>(&self, mat: T) -> T {
        self.live.fetch_add(1, Ordering::SeqCst);
        mat
    }
}

impl<C: Communicator + Clone> AijEngine<C> {
    /// Agree on every rank's row and column block. Collective.
    fn setup_layout(&self, mat: &mut AijMat<C>) -> EngineResult<()> {
        if mat.layout.is_some() {
            return Ok(());
        }
        let sizes = mat.sizes()?;
        if mat.ty.is_none() {
            return Err(wrong_state("matrix type has not been set"));
        }
        let local = [
            WireU64::of(sizes.local_rows as u64),
            WireU64::of(sizes.local_cols as u64),
        ];
        let gathered = all_gather_pod(&mat.comm, self.tag, &local).map_err(comm_status)?;

        let mut row_starts = Vec::with_capacity(gathered.len() + 1);
        let mut col_starts = Vec::with_capacity(gathered.len() + 1);
        row_starts.push(0);
        col_starts.push(0);
        for (rank, rec) in gathered.iter().enumerate() {
            let [r, c] = rec.as_slice() else {
                return Err(comm_status(MatrixError::Comm {
                    neighbor: rank,
                    message: "malformed local-size record".into(),
                }));
            };
            row_starts.push(row_starts[rank] + r.get() as usize);
            col_starts.push(col_starts[rank] + c.get() as usize);
        }
        let (rows_total, cols_total) = (row_starts[gathered.len()], col_starts[gathered.len()]);
        if rows_total != sizes.global_rows || cols_total != sizes.global_cols {
            return Err(size_error(format!(
                "sum of local sizes {rows_total}x{cols_total} does not match global size {}x{}",
                sizes.global_rows, sizes.global_cols
            )));
        }
        log::trace!(
            "rank {}: layout rows {:?} cols {:?}",
            mat.comm.rank(),
            row_starts,
            col_starts
        );
        mat.layout = Some(Layout {
            row_starts,
            col_starts,
        });
        Ok(())
    }

    /// Full copy of a distributed vector on every rank. Collective.
    fn gather_vector(&self, v: &DistributedVector<C>) -> EngineResult<Vec<f64>> {
        let local: Vec<WireF64> = v.local_values().iter().map(|&x| WireF64::of(x)).collect();
        let all = all_gather_pod(v.comm(), self.tag, &local).map_err(comm_status)?;
        let full: Vec<f64> = all.iter().flatten().map(WireF64::get).collect();
        if full.len() != v.size() {
            return Err(size_error(format!(
                "vector parts add up to {} entries, global size is {}",
                full.len(),
                v.size()
            )));
        }
        Ok(full)
    }

    /// Every row of `mat`, indexed by global row, on every rank. Collective.
    fn gather_rows(&self, mat: &AijMat<C>) -> EngineResult<Vec<AijRow>> {
        let start = mat.my_rows()?.start;
        let global_rows = mat.sizes()?.global_rows;
        let local: Vec<WireEntry> = mat
            .rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().map(move |(c, v)| WireEntry::new(start + i, c, v)))
            .collect();
        let all = all_gather_pod(&mat.comm, self.tag, &local).map_err(comm_status)?;

        // ranks own ascending row blocks and send rows in order, so every
        // rebuilt row stays sorted
        let mut full = vec![AijRow::default(); global_rows];
        for e in all.iter().flatten() {
            let (r, c, v) = e.decode();
            if r < global_rows {
                full[r].cols.push(c);
                full[r].vals.push(v);
            }
        }
        Ok(full)
    }

    fn product(&self, a: &AijMat<C>, sizes: Sizes, layout: Layout, rows: Vec<AijRow>) -> AijMat<C> {
        self.track(AijMat {
            comm: a.comm.clone(),
            ty: a.ty,
            sizes: Some(sizes),
            layout: Some(layout),
            rows,
            stash: Vec::new(),
            mode: None,
            new_nonzero_err: false,
            keep_pattern: false,
        })
    }
}

/// Row `i` of `A B` from row `i` of `A` and all rows of `B`.
fn product_row(a_row: &AijRow, b_full: &[AijRow]) -> AijRow {
    let mut acc = BTreeMap::new();
    for (k, a_ik) in a_row.iter() {
        for (j, b_kj) in b_full[k].iter() {
            *acc.entry(j).or_insert(0.0) += a_ik * b_kj;
        }
    }
    AijRow::from_map(acc)
}

impl<C: Communicator + Clone> Engine for AijEngine<C> {
    type Comm = C;
    type Mat = AijMat<C>;

    fn create(&self, comm: &C) -> EngineResult<AijMat<C>> {
        Ok(self.track(AijMat::new(comm.clone())))
    }

    fn create_seq(&self, n_rows: usize, n_cols: usize) -> EngineResult<AijMat<C>> {
        let mut mat = AijMat::new(C::comm_self());
        mat.ty = Some(MatType::SeqAij);
        mat.sizes = Some(Sizes {
            local_rows: n_rows,
            local_cols: n_cols,
            global_rows: n_rows,
            global_cols: n_cols,
        });
        mat.layout = Some(Layout {
            row_starts: vec![0, n_rows],
            col_starts: vec![0, n_cols],
        });
        mat.rows = vec![AijRow::default(); n_rows];
        Ok(self.track(mat))
    }

    fn destroy(&self, mat: AijMat<C>) -> EngineResult<()> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| wrong_state("destroying a matrix this engine does not track"))?;
        drop(mat);
        Ok(())
    }

    fn set_sizes(
        &self,
        mat: &mut AijMat<C>,
        local_rows: usize,
        local_cols: usize,
        global_rows: usize,
        global_cols: usize,
    ) -> EngineResult<()> {
        if mat.layout.is_some() {
            return Err(wrong_state("cannot change sizes after setup"));
        }
        if local_rows > global_rows || local_cols > global_cols {
            return Err(size_error(format!(
                "local size {local_rows}x{local_cols} exceeds global size {global_rows}x{global_cols}"
            )));
        }
        mat.sizes = Some(Sizes {
            local_rows,
            local_cols,
            global_rows,
            global_cols,
        });
        Ok(())
    }

    fn set_type(&self, mat: &mut AijMat<C>, ty: MatType) -> EngineResult<()> {
        if ty == MatType::SeqAij && mat.comm.size() > 1 {
            return Err(EngineStatus::new(
                codes::ERR_ARG_WRONG,
                format!("sequential type on a {}-process communicator", mat.comm.size()),
            ));
        }
        mat.ty = Some(ty);
        Ok(())
    }

    fn set_up(&self, mat: &mut AijMat<C>) -> EngineResult<()> {
        self.setup_layout(mat)?;
        let local_rows = mat.sizes()?.local_rows;
        if mat.rows.len() != local_rows {
            mat.rows = vec![AijRow::default(); local_rows];
        }
        Ok(())
    }

    fn preallocate_csr(
        &self,
        mat: &mut AijMat<C>,
        row_offsets: &[EngineIndex],
        columns: &[EngineIndex],
    ) -> EngineResult<()> {
        self.setup_layout(mat)?;
        let sizes = mat.sizes()?;
        if row_offsets.len() != sizes.local_rows + 1 {
            return Err(size_error(format!(
                "{} row offsets for {} local rows",
                row_offsets.len(),
                sizes.local_rows
            )));
        }
        if row_offsets[0] != 0 || row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(out_of_range("row offsets must start at 0 and be non-decreasing"));
        }
        let nnz = row_offsets[sizes.local_rows] as usize;
        if columns.len() < nnz {
            return Err(size_error(format!(
                "column buffer holds {} entries, offsets need {nnz}",
                columns.len()
            )));
        }

        let mut rows = Vec::with_capacity(sizes.local_rows);
        for w in row_offsets.windows(2) {
            let slice = &columns[w[0] as usize..w[1] as usize];
            if let Some(&bad) = slice
                .iter()
                .find(|&&c| c < 0 || c as usize >= sizes.global_cols)
            {
                return Err(out_of_range(format!(
                    "column {bad} outside 0..{}",
                    sizes.global_cols
                )));
            }
            rows.push(AijRow::from_columns(slice.iter().map(|&c| c as usize)));
        }
        mat.rows = rows;
        mat.stash.clear();
        mat.mode = None;
        Ok(())
    }

    fn assemble(&self, mat: &mut AijMat<C>) -> EngineResult<()> {
        let me = mat.comm.rank();
        let mine = mat.my_rows()?;
        let my_mode = match mat.mode {
            None => 0,
            Some(InsertMode::Insert) => 1,
            Some(InsertMode::Add) => 2,
        };
        let modes = all_gather_u64(&mat.comm, self.tag, my_mode).map_err(comm_status)?;
        let inserting = modes.contains(&1);
        let adding = modes.contains(&2);
        if inserting && adding {
            return Err(wrong_state("some processes inserted and others added values"));
        }
        let mode = if adding {
            InsertMode::Add
        } else {
            InsertMode::Insert
        };

        let outgoing = std::mem::take(&mut mat.stash);
        let incoming = all_gather_pod(&mat.comm, self.tag, &outgoing).map_err(comm_status)?;
        mat.mode = None;
        for (from, entries) in incoming.iter().enumerate() {
            if from == me {
                continue;
            }
            for e in entries {
                let (row, col, value) = e.decode();
                if mine.contains(&row) {
                    mat.apply(row, col, value, mode)?;
                }
            }
        }
        Ok(())
    }

    fn set_option(&self, mat: &mut AijMat<C>, option: MatOption, flag: bool) -> EngineResult<()> {
        match option {
            MatOption::NewNonzeroLocationErr => mat.new_nonzero_err = flag,
            MatOption::KeepNonzeroPattern => mat.keep_pattern = flag,
        }
        Ok(())
    }

    fn duplicate(&self, mat: &AijMat<C>, op: DuplicateOption) -> EngineResult<AijMat<C>> {
        mat.ensure_assembled()?;
        let copy = mat.structural_clone(op == DuplicateOption::CopyValues);
        Ok(self.track(copy))
    }

    fn copy(&self, src: &AijMat<C>, dst: &mut AijMat<C>, structure: StructureFlag) -> EngineResult<()> {
        src.ensure_assembled()?;
        dst.ensure_assembled()?;
        if src.sizes != dst.sizes || src.layout != dst.layout {
            return Err(size_error("source and destination are laid out differently"));
        }
        match structure {
            StructureFlag::SameNonzeroPattern => {
                if src.rows.iter().zip(&dst.rows).any(|(s, d)| s.cols != d.cols) {
                    return Err(EngineStatus::new(
                        codes::ERR_ARG_INCOMPATIBLE,
                        "nonzero patterns differ",
                    ));
                }
                for (s, d) in src.rows.iter().zip(dst.rows.iter_mut()) {
                    d.vals.copy_from_slice(&s.vals);
                }
            }
            StructureFlag::DifferentNonzeroPattern => dst.rows = src.rows.clone(),
        }
        Ok(())
    }

    fn get_size(&self, mat: &AijMat<C>) -> EngineResult<(usize, usize)> {
        let s = mat.sizes()?;
        Ok((s.global_rows, s.global_cols))
    }

    fn get_local_size(&self, mat: &AijMat<C>) -> EngineResult<(usize, usize)> {
        let s = mat.sizes()?;
        Ok((s.local_rows, s.local_cols))
    }

    fn ownership_range(&self, mat: &AijMat<C>) -> EngineResult<Range<usize>> {
        mat.my_rows()
    }

    fn ownership_range_column(&self, mat: &AijMat<C>) -> EngineResult<Range<usize>> {
        mat.my_cols()
    }

    fn set_values(
        &self,
        mat: &mut AijMat<C>,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
        mode: InsertMode,
    ) -> EngineResult<()> {
        let mine = mat.my_rows()?;
        let sizes = mat.sizes()?;
        if values.len() != rows.len() * cols.len() {
            return Err(size_error(format!(
                "{} values for a {}x{} block",
                values.len(),
                rows.len(),
                cols.len()
            )));
        }
        match mat.mode {
            Some(current) if current != mode => {
                return Err(wrong_state("cannot mix add values and insert values"));
            }
            _ => mat.mode = Some(mode),
        }
        for (a, &row) in rows.iter().enumerate() {
            if row >= sizes.global_rows {
                return Err(out_of_range(format!("row {row} outside 0..{}", sizes.global_rows)));
            }
            for (b, &col) in cols.iter().enumerate() {
                if col >= sizes.global_cols {
                    return Err(out_of_range(format!("column {col} outside 0..{}", sizes.global_cols)));
                }
                let value = values[a * cols.len() + b];
                if mine.contains(&row) {
                    mat.apply(row, col, value, mode)?;
                } else {
                    mat.stash.push(WireEntry::new(row, col, value));
                }
            }
        }
        Ok(())
    }

    fn get_value(&self, mat: &AijMat<C>, row: usize, col: usize) -> EngineResult<f64> {
        let mine = mat.my_rows()?;
        if !mine.contains(&row) {
            return Err(out_of_range(format!(
                "only local values can be read: row {row} outside {mine:?}"
            )));
        }
        Ok(mat.rows[row - mine.start].get(col))
    }

    fn mult(
        &self,
        mat: &AijMat<C>,
        x: &DistributedVector<C>,
        y: &mut DistributedVector<C>,
    ) -> EngineResult<()> {
        let x_full = self.gather_vector(x)?;
        mat.ensure_assembled()?;
        let sizes = mat.sizes()?;
        if x.size() != sizes.global_cols || x.local_range() != mat.my_cols()? {
            return Err(size_error("source vector is not laid out like the matrix columns"));
        }
        if y.size() != sizes.global_rows || y.local_range() != mat.my_rows()? {
            return Err(size_error("destination vector is not laid out like the matrix rows"));
        }
        for (out, row) in y.local_values_mut().iter_mut().zip(&mat.rows) {
            *out = row.iter().map(|(c, v)| v * x_full[c]).sum();
        }
        Ok(())
    }

    fn diagonal_scale(
        &self,
        mat: &mut AijMat<C>,
        left: Option<&DistributedVector<C>>,
        right: Option<&DistributedVector<C>>,
    ) -> EngineResult<()> {
        let right_full = right.map(|r| self.gather_vector(r)).transpose()?;
        mat.ensure_assembled()?;
        let sizes = mat.sizes()?;
        if let Some(l) = left {
            if l.size() != sizes.global_rows || l.local_range() != mat.my_rows()? {
                return Err(size_error("left scaling vector is not laid out like the matrix rows"));
            }
            for (row, &s) in mat.rows.iter_mut().zip(l.local_values()) {
                row.vals.iter_mut().for_each(|v| *v *= s);
            }
        }
        if let Some(r) = right_full {
            if r.len() != sizes.global_cols {
                return Err(size_error("right scaling vector has the wrong length"));
            }
            for row in &mut mat.rows {
                for (c, v) in row.cols.iter().zip(row.vals.iter_mut()) {
                    *v *= r[*c];
                }
            }
        }
        Ok(())
    }

    fn mat_mat_mult(&self, a: &AijMat<C>, b: &AijMat<C>) -> EngineResult<AijMat<C>> {
        let (sa, sb) = (a.sizes()?, b.sizes()?);
        let (la, lb) = (a.layout()?, b.layout()?);
        if sa.global_cols != sb.global_rows || la.col_starts != lb.row_starts {
            return Err(size_error(format!(
                "cannot multiply {}x{} by {}x{} with different inner layouts",
                sa.global_rows, sa.global_cols, sb.global_rows, sb.global_cols
            )));
        }
        a.ensure_assembled()?;
        b.ensure_assembled()?;
        let b_full = self.gather_rows(b)?;

        #[cfg(feature = "rayon")]
        let rows: Vec<AijRow> = a.rows.par_iter().map(|r| product_row(r, &b_full)).collect();
        #[cfg(not(feature = "rayon"))]
        let rows: Vec<AijRow> = a.rows.iter().map(|r| product_row(r, &b_full)).collect();

        let sizes = Sizes {
            local_rows: sa.local_rows,
            local_cols: sb.local_cols,
            global_rows: sa.global_rows,
            global_cols: sb.global_cols,
        };
        let layout = Layout {
            row_starts: la.row_starts.clone(),
            col_starts: lb.col_starts.clone(),
        };
        Ok(self.product(a, sizes, layout, rows))
    }

    fn transpose_mat_mult(&self, a: &AijMat<C>, b: &AijMat<C>) -> EngineResult<AijMat<C>> {
        let (sa, sb) = (a.sizes()?, b.sizes()?);
        let (la, lb) = (a.layout()?, b.layout()?);
        if sa.global_rows != sb.global_rows || la.row_starts != lb.row_starts {
            return Err(size_error(format!(
                "cannot form transpose({}x{}) times {}x{} with different row layouts",
                sa.global_rows, sa.global_cols, sb.global_rows, sb.global_cols
            )));
        }
        a.ensure_assembled()?;
        b.ensure_assembled()?;

        // local contributions: C[i, j] += A[k, i] * B[k, j] over owned k
        let mut acc: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (a_row, b_row) in a.rows.iter().zip(&b.rows) {
            for (i, a_ki) in a_row.iter() {
                for (j, b_kj) in b_row.iter() {
                    *acc.entry((i, j)).or_insert(0.0) += a_ki * b_kj;
                }
            }
        }
        let local: Vec<WireEntry> = acc
            .into_iter()
            .map(|((i, j), v)| WireEntry::new(i, j, v))
            .collect();
        let all = all_gather_pod(&a.comm, self.tag, &local).map_err(comm_status)?;

        let mine = la.cols_of(a.comm.rank());
        let mut rows: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); mine.len()];
        for e in all.iter().flatten() {
            let (i, j, v) = e.decode();
            if mine.contains(&i) {
                *rows[i - mine.start].entry(j).or_insert(0.0) += v;
            }
        }

        let sizes = Sizes {
            local_rows: sa.local_cols,
            local_cols: sb.local_cols,
            global_rows: sa.global_cols,
            global_cols: sb.global_cols,
        };
        let layout = Layout {
            row_starts: la.col_starts.clone(),
            col_starts: lb.col_starts.clone(),
        };
        let rows = rows.into_iter().map(AijRow::from_map).collect();
        Ok(self.product(a, sizes, layout, rows))
    }

    fn zero_entries(&self, mat: &mut AijMat<C>) -> EngineResult<()> {
        mat.layout()?;
        for row in &mut mat.rows {
            row.vals.fill(0.0);
        }
        Ok(())
    }

    fn zero_rows(&self, mat: &mut AijMat<C>, rows: &[usize], diag: f64) -> EngineResult<()> {
        let requested: Vec<WireU64> = rows.iter().map(|&r| WireU64::of(r as u64)).collect();
        let all = all_gather_pod(&mat.comm, self.tag, &requested).map_err(comm_status)?;
        mat.ensure_assembled()?;
        let mine = mat.my_rows()?;
        let global_cols = mat.sizes()?.global_cols;
        let (keep, new_err) = (mat.keep_pattern, mat.new_nonzero_err);

        for r in all.iter().flatten().map(|w| w.get() as usize) {
            if !mine.contains(&r) {
                continue;
            }
            let row = &mut mat.rows[r - mine.start];
            if keep {
                row.vals.fill(0.0);
            } else {
                *row = AijRow::default();
            }
            if diag != 0.0 && r < global_cols {
                let slot = row
                    .entry_mut(r, !keep || !new_err)
                    .ok_or_else(|| out_of_range(format!("row {r} has no diagonal slot")))?;
                *slot = diag;
            }
        }
        Ok(())
    }

    fn norm_frobenius(&self, mat: &AijMat<C>) -> EngineResult<f64> {
        let local: f64 = mat
            .rows
            .iter()
            .flat_map(|r| r.vals.iter())
            .map(|v| v * v)
            .sum();
        let total = all_reduce_sum_f64(&mat.comm, self.tag, local).map_err(comm_status)?;
        Ok(total.sqrt())
    }

    fn nonzero_count(&self, mat: &AijMat<C>) -> EngineResult<usize> {
        let local: usize = mat.rows.iter().map(AijRow::len).sum();
        let total = all_reduce_sum_u64(&mat.comm, self.tag, local as u64).map_err(comm_status)?;
        Ok(total as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn serial_matrix(engine: &AijEngine<NoComm>, rows: &[&[i64]], n_cols: usize) -> AijMat<NoComm> {
        let mut mat = engine.create(&NoComm).unwrap();
        engine.set_sizes(&mut mat, rows.len(), n_cols, rows.len(), n_cols).unwrap();
        engine.set_type(&mut mat, MatType::MpiAij).unwrap();
        let mut offsets = vec![0];
        let mut cols = Vec::new();
        for r in rows {
            cols.extend_from_slice(r);
            offsets.push(cols.len() as i64);
        }
        cols.push(-1);
        engine.preallocate_csr(&mut mat, &offsets, &cols).unwrap();
        engine.assemble(&mut mat).unwrap();
        mat
    }

    #[test]
    fn preallocated_slots_accept_values_and_reject_new_ones() {
        let engine = AijEngine::<NoComm>::new();
        let mut mat = serial_matrix(&engine, &[&[0, 1], &[1]], 2);
        engine
            .set_option(&mut mat, MatOption::NewNonzeroLocationErr, true)
            .unwrap();
        engine
            .set_values(&mut mat, &[0], &[1], &[2.5], InsertMode::Insert)
            .unwrap();
        let err = engine
            .set_values(&mut mat, &[1], &[0], &[1.0], InsertMode::Insert)
            .unwrap_err();
        assert_eq!(err.code, codes::ERR_ARG_OUT_OF_RANGE);
        assert_eq!(engine.get_value(&mat, 0, 1).unwrap(), 2.5);
        engine.destroy(mat).unwrap();
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn mixing_insert_and_add_requires_assembly() {
        let engine = AijEngine::<NoComm>::new();
        let mut mat = serial_matrix(&engine, &[&[0]], 1);
        engine.set_values(&mut mat, &[0], &[0], &[1.0], InsertMode::Add).unwrap();
        let err = engine
            .set_values(&mut mat, &[0], &[0], &[1.0], InsertMode::Insert)
            .unwrap_err();
        assert_eq!(err.code, codes::ERR_WRONG_STATE);
        engine.assemble(&mut mat).unwrap();
        engine.set_values(&mut mat, &[0], &[0], &[4.0], InsertMode::Insert).unwrap();
        assert_eq!(engine.get_value(&mat, 0, 0).unwrap(), 4.0);
        engine.destroy(mat).unwrap();
    }

    #[test]
    fn preallocation_checks_offsets_against_local_rows() {
        let engine = AijEngine::<NoComm>::new();
        let mut mat = engine.create(&NoComm).unwrap();
        engine.set_sizes(&mut mat, 2, 2, 2, 2).unwrap();
        engine.set_type(&mut mat, MatType::MpiAij).unwrap();
        let err = engine.preallocate_csr(&mut mat, &[0, 1], &[0, -1]).unwrap_err();
        assert_eq!(err.code, codes::ERR_ARG_SIZE);
        let err = engine
            .preallocate_csr(&mut mat, &[0, 1, 2], &[0, 5, -1])
            .unwrap_err();
        assert_eq!(err.code, codes::ERR_ARG_OUT_OF_RANGE);
        engine.destroy(mat).unwrap();
    }

    #[test]
    fn zero_rows_respects_keep_pattern() {
        let engine = AijEngine::<NoComm>::new();
        let mut mat = serial_matrix(&engine, &[&[0, 1], &[0, 1]], 2);
        engine.set_values(&mut mat, &[0, 1], &[0, 1], &[1.0, 2.0, 3.0, 4.0], InsertMode::Insert).unwrap();
        engine.assemble(&mut mat).unwrap();

        let mut kept = engine.duplicate(&mat, DuplicateOption::CopyValues).unwrap();
        engine.set_option(&mut kept, MatOption::KeepNonzeroPattern, true).unwrap();
        engine.zero_rows(&mut kept, &[0], 0.0).unwrap();
        assert_eq!(engine.nonzero_count(&kept).unwrap(), 4);

        engine.zero_rows(&mut mat, &[0], 0.0).unwrap();
        assert_eq!(engine.nonzero_count(&mat).unwrap(), 2);
        assert_eq!(engine.get_value(&mat, 1, 1).unwrap(), 4.0);

        engine.destroy(kept).unwrap();
        engine.destroy(mat).unwrap();
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn destroying_untracked_matrix_is_reported() {
        let a = AijEngine::<NoComm>::new();
        let b = AijEngine::<NoComm>::new();
        let mat = a.create_seq(0, 0).unwrap();
        assert_eq!(b.destroy(mat).unwrap_err().code, codes::ERR_WRONG_STATE);
    }
}
