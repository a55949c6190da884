//! Steady-state solves across an ordered collection of magnetic fields at a
//! single atomic velocity.

use log::debug;
use ndarray as nd;
use serde::{ Deserialize, Serialize };
use crate::{
    atom::{ AtomicSystemConfig, Axis, CollapseOperators, MagneticField, TimeGrid },
    error::{ SolverError, SolverResult },
    lindblad::{ CancelToken, LindbladIntegrator, Rk4Integrator },
    steady_state::{ SteadyStateResult, solve_single_with },
};

/// One [`SteadyStateResult`] per sweep entry, in sweep order.
pub type SweepResult = Vec<SteadyStateResult>;

/// Magnetic fields to sweep over, in units of `gamma`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldSweep {
    /// Scalars applied to one axis of an otherwise zero field.
    ScalarAlongAxis { axis: Axis, values: Vec<f64> },
    /// Full three-component field vectors.
    VectorList(Vec<[f64; 3]>),
}

impl FieldSweep {
    pub fn along(axis: Axis, values: Vec<f64>) -> Self {
        Self::ScalarAlongAxis { axis, values }
    }

    pub fn vectors(values: Vec<[f64; 3]>) -> Self { Self::VectorList(values) }

    /// Interpret an array of any dimensionality: 1D arrays are scalars along
    /// `axis`, 2D arrays with three columns are field vectors, and anything
    /// else is an [`SolverError::InvalidFieldArrayShape`].
    pub fn from_array<S>(array: &nd::ArrayBase<S, nd::IxDyn>, axis: Axis)
        -> SolverResult<Self>
    where S: nd::Data<Elem = f64>
    {
        match array.shape() {
            [_] => Ok(Self::along(axis, array.iter().copied().collect())),
            [_, 3] => {
                let rows
                    = array.view().into_dimensionality::<nd::Ix2>()
                    .map_err(|_| {
                        SolverError::InvalidFieldArrayShape(array.shape().to_vec())
                    })?;
                let values
                    = rows.outer_iter()
                    .map(|row| [row[0], row[1], row[2]])
                    .collect();
                Ok(Self::VectorList(values))
            },
            shape => Err(SolverError::InvalidFieldArrayShape(shape.to_vec())),
        }
    }

    /// Like [`Self::from_array`], for row-major nested data.
    ///
    /// Rows of length 1 are scalars along `axis`; rows of length 3 are field
    /// vectors. Mixed or other row lengths are rejected.
    pub fn from_rows<R>(rows: &[R], axis: Axis) -> SolverResult<Self>
    where R: AsRef<[f64]>
    {
        let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(1);
        if rows.iter().any(|r| r.as_ref().len() != width) {
            let lens: Vec<usize> = rows.iter().map(|r| r.as_ref().len()).collect();
            return Err(SolverError::InvalidFieldArrayShape(lens));
        }
        match width {
            1 => Ok(Self::along(axis, rows.iter().map(|r| r.as_ref()[0]).collect())),
            3 => {
                let values
                    = rows.iter()
                    .map(|r| { let r = r.as_ref(); [r[0], r[1], r[2]] })
                    .collect();
                Ok(Self::VectorList(values))
            },
            w => Err(SolverError::InvalidFieldArrayShape(vec![rows.len(), w])),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::ScalarAlongAxis { values, .. } => values.len(),
            Self::VectorList(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Iterate over the swept fields, in order.
    pub fn fields(&self) -> Box<dyn Iterator<Item = MagneticField> + '_> {
        match self {
            Self::ScalarAlongAxis { axis, values }
                => Box::new(values.iter().map(|v| MagneticField::along(*axis, *v))),
            Self::VectorList(values)
                => Box::new(values.iter().map(|b| MagneticField::from(*b))),
        }
    }
}

/// Check that a sweep was supplied and is non-empty.
pub(crate) fn require_sweep(field_sweep: Option<&FieldSweep>)
    -> SolverResult<&FieldSweep>
{
    match field_sweep {
        None => Err(SolverError::MisconfiguredSweep(
            "no field sweep supplied".into())),
        Some(sweep) if sweep.is_empty() => Err(SolverError::MisconfiguredSweep(
            "field sweep is empty".into())),
        Some(sweep) => Ok(sweep),
    }
}

/// Solve for the steady state at every field of a sweep for one velocity,
/// using a particular integrator.
///
/// The `i`-th result corresponds to the `i`-th field. The first failure aborts
/// the sweep.
pub fn solve_field_sweep_with<I>(
    integrator: &I,
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    field_sweep: Option<&FieldSweep>,
    vx: f64,
    cancel: &CancelToken,
) -> SolverResult<SweepResult>
where I: LindbladIntegrator
{
    let sweep = require_sweep(field_sweep)?;
    debug!("sweeping {} fields at vx = {}", sweep.len(), vx);
    sweep.fields()
        .map(|b| {
            solve_single_with(
                integrator, config, collapse_ops, time_grid, &b, vx, cancel)
        })
        .collect()
}

/// Solve for the steady state at every field of a sweep for one velocity with
/// the default [`Rk4Integrator`].
pub fn solve_field_sweep(
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    field_sweep: Option<&FieldSweep>,
    vx: f64,
) -> SolverResult<SweepResult>
{
    solve_field_sweep_with(
        &Rk4Integrator::default(),
        config,
        collapse_ops,
        time_grid,
        field_sweep,
        vx,
        &CancelToken::new(),
    )
}

/// Pack a sweep into an `N × 4` array of
/// `[rho11, rho22, rho33, rho13_re]` rows.
pub fn sweep_to_array(results: &[SteadyStateResult]) -> nd::Array2<f64> {
    let mut out: nd::Array2<f64> = nd::Array2::zeros((results.len(), 4));
    for (mut row, res) in out.outer_iter_mut().zip(results) {
        row.assign(&nd::aview1(&res.to_array()));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> AtomicSystemConfig {
        AtomicSystemConfig::new(1.0, 0.7, 1.0, 2.0, [(1.0, 0.5), (0.7, -0.5)])
            .unwrap()
    }

    fn grid() -> TimeGrid { TimeGrid::default_for(1.0).unwrap() }

    fn c_ops() -> CollapseOperators { CollapseOperators::spontaneous_decay(1.0).unwrap() }

    #[test]
    fn shape_dispatch() {
        let one = nd::array![0.0, 1.0, 2.0].into_dyn();
        assert_eq!(
            FieldSweep::from_array(&one, Axis::X).unwrap(),
            FieldSweep::along(Axis::X, vec![0.0, 1.0, 2.0]),
        );
        let two = nd::array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]].into_dyn();
        assert_eq!(
            FieldSweep::from_array(&two, Axis::Z).unwrap(),
            FieldSweep::vectors(vec![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]),
        );
        let bad = nd::Array2::<f64>::zeros((2, 4)).into_dyn();
        assert_eq!(
            FieldSweep::from_array(&bad, Axis::Z),
            Err(SolverError::InvalidFieldArrayShape(vec![2, 4])),
        );
        let bad3 = nd::Array3::<f64>::zeros((2, 3, 1)).into_dyn();
        assert!(FieldSweep::from_array(&bad3, Axis::Z).is_err());
    }

    #[test]
    fn row_dispatch() {
        assert_eq!(
            FieldSweep::from_rows(&[[1.0], [2.0]], Axis::Y).unwrap(),
            FieldSweep::along(Axis::Y, vec![1.0, 2.0]),
        );
        assert!(matches!(
            FieldSweep::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], Axis::Y),
            Err(SolverError::InvalidFieldArrayShape(_)),
        ));
        assert!(matches!(
            FieldSweep::from_rows(&[vec![1.0], vec![3.0, 4.0, 5.0]], Axis::Y),
            Err(SolverError::InvalidFieldArrayShape(_)),
        ));
    }

    #[test]
    fn missing_or_empty_sweep_is_misconfigured() {
        let res = solve_field_sweep(&config(), &c_ops(), &grid(), None, 0.0);
        assert!(matches!(res, Err(SolverError::MisconfiguredSweep(_))));
        let empty = FieldSweep::along(Axis::Z, vec![]);
        let res = solve_field_sweep(&config(), &c_ops(), &grid(), Some(&empty), 0.0);
        assert!(matches!(res, Err(SolverError::MisconfiguredSweep(_))));
    }

    #[test]
    fn scalar_and_vector_sweeps_agree() {
        let values = vec![0.0, 0.5, 1.5];
        let scalar = FieldSweep::along(Axis::Z, values.clone());
        let vector = FieldSweep::vectors(values.iter().map(|v| [0.0, 0.0, *v]).collect());
        let a = solve_field_sweep(&config(), &c_ops(), &grid(), Some(&scalar), 0.2)
            .unwrap();
        let b = solve_field_sweep(&config(), &c_ops(), &grid(), Some(&vector), 0.2)
            .unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
        assert_eq!(sweep_to_array(&a).dim(), (3, 4));
    }

    #[test]
    fn sweep_preserves_order() {
        let values = vec![2.0, 0.0, 1.0];
        let sweep = FieldSweep::along(Axis::X, values.clone());
        let res = solve_field_sweep(&config(), &c_ops(), &grid(), Some(&sweep), 0.0)
            .unwrap();
        for (v, r) in values.iter().zip(&res) {
            let single = crate::steady_state::solve_single(
                &config(), &c_ops(), &grid(), &MagneticField::along(Axis::X, *v), 0.0,
            ).unwrap();
            assert_eq!(*r, single);
        }
    }
}
