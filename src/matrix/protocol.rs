//! The fixed sequence of engine calls that builds a distributed matrix.
//!
//! Every process runs the same steps in the same order; the engine calls
//! from `Preallocate`/`SetUp` on are collective. A failing step aborts the
//! run, and the partially built matrix is destroyed when its handle drops.

use crate::engine::{Engine, EngineStatus, MatOption, MatType};
use crate::matrix::MatHandle;
use crate::matrix_error::MatrixError;
use crate::ownership::OwnershipDescriptor;
use crate::sparsity::LocalSparsityWindow;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Release the matrix being replaced.
    DestroyPrior,
    Create,
    SetSizes,
    SetType,
    /// Allocate exactly the locally owned rows of the pattern.
    Preallocate,
    /// Lay out the matrix without a structure.
    SetUp,
    /// Final assembly of the freshly allocated structure.
    Flush,
    /// Forbid new nonzero locations and keep zeroed rows in the structure.
    Close,
}

impl Step {
    /// Name of the engine operation behind the step, as used in errors.
    pub fn op(self) -> &'static str {
        match self {
            Step::DestroyPrior => "destroy",
            Step::Create => "create",
            Step::SetSizes => "set_sizes",
            Step::SetType => "set_type",
            Step::Preallocate => "preallocate_csr",
            Step::SetUp => "set_up",
            Step::Flush => "assemble",
            Step::Close => "set_option",
        }
    }
}

/// How the nonzero structure is established.
#[derive(Clone, Debug)]
pub enum Structure {
    /// Preallocate the window's rows and close the structure.
    Preallocate(LocalSparsityWindow),
    /// Leave the structure open; entries are allocated when written.
    Deferred,
}

/// One construction of a distributed matrix.
pub struct ConstructionProtocol<'a, E: Engine> {
    engine: &'a E,
    comm: &'a E::Comm,
    ownership: &'a OwnershipDescriptor,
    structure: Structure,
}

impl<'a, E: Engine> ConstructionProtocol<'a, E> {
    pub fn new(
        engine: &'a E,
        comm: &'a E::Comm,
        ownership: &'a OwnershipDescriptor,
        structure: Structure,
    ) -> Self {
        Self {
            engine,
            comm,
            ownership,
            structure,
        }
    }

    /// Steps `run` will take, given whether there is a matrix to replace.
    pub fn steps(&self, has_prior: bool) -> Vec<Step> {
        let mut steps = Vec::with_capacity(8);
        if has_prior {
            steps.push(Step::DestroyPrior);
        }
        steps.extend([Step::Create, Step::SetSizes, Step::SetType]);
        match self.structure {
            Structure::Preallocate(_) => steps.extend([Step::Preallocate, Step::Flush, Step::Close]),
            Structure::Deferred => steps.push(Step::SetUp),
        }
        steps
    }

    /// Release `prior` and build the new matrix.
    pub fn run(self, prior: Option<MatHandle<E>>) -> Result<MatHandle<E>, MatrixError> {
        let engine = self.engine;
        let own = self.ownership;
        let fail = |step: Step| move |status: EngineStatus| MatrixError::engine(step.op(), status);
        log::debug!(
            "rank {}: constructing {}x{} matrix, local rows {:?}, local columns {:?}",
            own.rank(),
            own.n_rows(),
            own.n_cols(),
            own.row_range(),
            own.col_range()
        );

        if let Some(prior) = prior {
            log::debug!("{:?}", Step::DestroyPrior);
            prior.release()?;
        }

        log::debug!("{:?}", Step::Create);
        let mat = engine.create(self.comm).map_err(fail(Step::Create))?;
        let mut handle = MatHandle::new(engine.clone(), mat);

        log::debug!("{:?}", Step::SetSizes);
        engine
            .set_sizes(
                handle.mat_mut(),
                own.n_local_rows(),
                own.n_local_cols(),
                own.n_rows(),
                own.n_cols(),
            )
            .map_err(fail(Step::SetSizes))?;

        log::debug!("{:?}", Step::SetType);
        engine
            .set_type(handle.mat_mut(), MatType::MpiAij)
            .map_err(fail(Step::SetType))?;

        match &self.structure {
            Structure::Preallocate(window) => {
                log::debug!("{:?}: {} local entries", Step::Preallocate, window.n_nonzeros());
                engine
                    .preallocate_csr(handle.mat_mut(), window.row_offsets(), window.column_buffer())
                    .map_err(fail(Step::Preallocate))?;

                log::debug!("{:?}", Step::Flush);
                engine.assemble(handle.mat_mut()).map_err(fail(Step::Flush))?;

                log::debug!("{:?}", Step::Close);
                engine
                    .set_option(handle.mat_mut(), MatOption::NewNonzeroLocationErr, true)
                    .map_err(fail(Step::Close))?;
                engine
                    .set_option(handle.mat_mut(), MatOption::KeepNonzeroPattern, true)
                    .map_err(fail(Step::Close))?;
            }
            Structure::Deferred => {
                log::warn!(
                    "rank {}: matrix constructed without preallocation; entries are allocated on insertion",
                    own.rank()
                );
                engine.set_up(handle.mat_mut()).map_err(fail(Step::SetUp))?;
            }
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::engine::AijEngine;
    use crate::sparsity::SparsityPattern;

    #[test]
    fn step_sequences() {
        let engine = AijEngine::<NoComm>::new();
        let own = OwnershipDescriptor::from_counts(&[2], &[2], 0, 2, 2).unwrap();
        let sp = SparsityPattern::from_row_lists(2, 2, [vec![1], vec![]]).unwrap();
        let window = LocalSparsityWindow::extract(0..2, &sp).unwrap();

        let p = ConstructionProtocol::new(&engine, &NoComm, &own, Structure::Preallocate(window));
        assert_eq!(
            p.steps(true),
            vec![
                Step::DestroyPrior,
                Step::Create,
                Step::SetSizes,
                Step::SetType,
                Step::Preallocate,
                Step::Flush,
                Step::Close
            ]
        );
        let handle = p.run(None).unwrap();
        assert_eq!(engine.nonzero_count(handle.mat()).unwrap(), 3);

        let p = ConstructionProtocol::new(&engine, &NoComm, &own, Structure::Deferred);
        assert_eq!(p.steps(false).last(), Some(&Step::SetUp));
        let replaced = p.run(Some(handle)).unwrap();
        assert_eq!(engine.nonzero_count(replaced.mat()).unwrap(), 0);
        assert_eq!(engine.live_handles(), 1);
        replaced.release().unwrap();
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn failing_step_names_the_operation_and_frees_the_matrix() {
        let engine = AijEngine::<NoComm>::new();
        // window covering none of the two owned rows
        let own = OwnershipDescriptor::from_counts(&[2], &[2], 0, 2, 2).unwrap();
        let bogus = LocalSparsityWindow::empty();
        let err = ConstructionProtocol::new(&engine, &NoComm, &own, Structure::Preallocate(bogus))
            .run(None)
            .unwrap_err();
        assert!(matches!(err, MatrixError::Engine { op: "preallocate_csr", .. }));
        assert_eq!(engine.live_handles(), 0);
    }
}
