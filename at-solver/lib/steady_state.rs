//! Single-configuration master-equation solve and reduction of its trajectory
//! to steady-state observables.

use std::ops::Range;
use log::{ debug, warn };
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use serde::Serialize;
use crate::{
    atom::{
        AtomicSystemConfig,
        CollapseOperators,
        MagneticField,
        TimeGrid,
        GROUND,
        M_MINUS,
        M_PLUS,
        M_ZERO,
    },
    error::{ SolverError, SolverResult },
    hamiltonian::DrivenHamiltonian,
    lindblad::{ CancelToken, DensityMatrix, LindbladIntegrator, Rk4Integrator },
    linalg::{ self, DIM },
};

/// Samples with `t * gamma` strictly above this value are taken to be in
/// steady state.
pub const STEADY_STATE_THRESHOLD: f64 = 10.0;

/// Largest imaginary part tolerated in an averaged population.
pub const IMAG_TOLERANCE: f64 = 1e-8;

/// Drift between the halves of the steady-state window above which a warning
/// is logged.
pub const DRIFT_WARN: f64 = 1e-2;

/// Time-averaged steady-state observables.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct SteadyStateResult {
    /// Population of m = +1.
    pub rho11: f64,
    /// Population of m = 0.
    pub rho22: f64,
    /// Population of m = -1.
    pub rho33: f64,
    /// Real part of the m = +1 / m = -1 coherence.
    pub rho13_re: f64,
}

impl SteadyStateResult {
    /// `[rho11, rho22, rho33, rho13_re]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.rho11, self.rho22, self.rho33, self.rho13_re]
    }

    pub fn from_array(a: [f64; 4]) -> Self {
        Self { rho11: a[0], rho22: a[1], rho33: a[2], rho13_re: a[3] }
    }

    pub fn is_finite(&self) -> bool { self.to_array().iter().all(|x| x.is_finite()) }

    /// Total excited-state population.
    pub fn excited_population(&self) -> f64 { self.rho11 + self.rho22 + self.rho33 }

    /// Largest componentwise absolute difference.
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.to_array().iter().zip(other.to_array())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// The pure ground state `|g⟩⟨g|`.
pub fn ground_state() -> DensityMatrix {
    let mut rho: DensityMatrix = nd::Array2::zeros((DIM, DIM));
    rho[[GROUND, GROUND]] = C64::from(1.0);
    rho
}

/// Indices of the time grid with `t * gamma > STEADY_STATE_THRESHOLD`.
///
/// The grid is increasing, so these always form a contiguous tail.
pub fn steady_state_window(time: &TimeGrid, gamma: f64)
    -> SolverResult<Range<usize>>
{
    let start
        = time.iter()
        .position(|t| t * gamma > STEADY_STATE_THRESHOLD)
        .ok_or(SolverError::EmptySteadyStateWindow {
            threshold: STEADY_STATE_THRESHOLD,
            last: time.last() * gamma,
        })?;
    Ok(start..time.len())
}

// raw (complex) means of rho11, rho22, rho33, rho13 over a set of states
fn window_means(states: &[DensityMatrix]) -> [C64; 4] {
    let mut acc = [C64::zero(); 4];
    for rho in states.iter() {
        acc[0] += rho[[M_PLUS, M_PLUS]];
        acc[1] += rho[[M_ZERO, M_ZERO]];
        acc[2] += rho[[M_MINUS, M_MINUS]];
        acc[3] += rho[[M_PLUS, M_MINUS]];
    }
    let n = states.len() as f64;
    acc.map(|a| a / n)
}

/// Average the observables over `states[window]`.
///
/// Populations must come out real to within [`IMAG_TOLERANCE`]; only the real
/// part of the coherence is kept by definition.
pub fn reduce_steady_state(states: &[DensityMatrix], window: Range<usize>)
    -> SolverResult<SteadyStateResult>
{
    if window.is_empty() || window.end > states.len() {
        return Err(SolverError::DimensionMismatch {
            op: "reduce_steady_state",
            left: vec![states.len()],
            right: vec![window.start, window.end],
        });
    }
    if let Some(rho) = states[window.clone()].iter().find(|rho| rho.dim() != (DIM, DIM)) {
        return Err(SolverError::DimensionMismatch {
            op: "reduce_steady_state",
            left: vec![DIM, DIM],
            right: rho.shape().to_vec(),
        });
    }
    let means = window_means(&states[window]);
    for (k, m) in means.iter().take(3).enumerate() {
        if m.im.abs() > IMAG_TOLERANCE {
            return Err(SolverError::NonRealPopulation { index: k + 1, imag: m.im });
        }
    }
    let res = SteadyStateResult::from_array(means.map(|m| m.re));
    if !res.is_finite() {
        return Err(SolverError::IntegrationFailure {
            time: f64::NAN,
            reason: format!("non-finite steady-state observables {res:?}"),
        });
    }
    Ok(res)
}

/// Largest change in any observable between the first and second halves of
/// the steady-state window.
///
/// The averaging threshold is a fixed heuristic; this is a cheap check of
/// whether the window is actually stationary. Windows with fewer than two
/// samples report zero drift.
pub fn window_drift(states: &[DensityMatrix], window: Range<usize>) -> f64 {
    let window = &states[window];
    if window.len() < 2 { return 0.0; }
    let (first, second) = window.split_at(window.len() / 2);
    let a = window_means(first).map(|m| m.re);
    let b = window_means(second).map(|m| m.re);
    SteadyStateResult::from_array(a).max_abs_diff(&SteadyStateResult::from_array(b))
}

/// Integrate the master equation for one `(b, vx)` configuration from the
/// ground state and return the full trajectory.
///
/// `b` is in units of `gamma`.
pub fn solve_trajectory_with<I>(
    integrator: &I,
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    b: &MagneticField,
    vx: f64,
    cancel: &CancelToken,
) -> SolverResult<Vec<DensityMatrix>>
where I: LindbladIntegrator
{
    if !b.is_finite() || !vx.is_finite() {
        return Err(SolverError::InvalidConfig(
            format!("non-finite field {b:?} or velocity {vx}")));
    }
    let hamiltonian = DrivenHamiltonian::new(config, b, vx)?;
    let rho0 = ground_state();
    integrator.integrate(&hamiltonian, collapse_ops, &rho0, time_grid, cancel)
}

/// Integrate the master equation for one `(b, vx)` configuration with the
/// default [`Rk4Integrator`] and return the sample times alongside the
/// density matrix at each of them.
///
/// `b` is in units of `gamma`.
pub fn solve_trajectory(
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    b: &MagneticField,
    vx: f64,
) -> SolverResult<(nd::Array1<f64>, Vec<DensityMatrix>)>
{
    let states = solve_trajectory_with(
        &Rk4Integrator::default(),
        config,
        collapse_ops,
        time_grid,
        b,
        vx,
        &CancelToken::new(),
    )?;
    Ok((time_grid.samples().clone(), states))
}

/// Solve for the steady state of one `(b, vx)` configuration using a
/// particular integrator.
///
/// `b` is in units of `gamma`. Fails before integrating if the time grid has
/// no samples past the steady-state threshold.
pub fn solve_single_with<I>(
    integrator: &I,
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    b: &MagneticField,
    vx: f64,
    cancel: &CancelToken,
) -> SolverResult<SteadyStateResult>
where I: LindbladIntegrator
{
    let window = steady_state_window(time_grid, config.gamma())?;
    let states = solve_trajectory_with(
        integrator, config, collapse_ops, time_grid, b, vx, cancel)?;
    let drift = window_drift(&states, window.clone());
    if drift > DRIFT_WARN {
        warn!("steady-state window not stationary: drift {drift:.3e} at b = {b:?}, vx = {vx}");
    }
    let res = reduce_steady_state(&states, window)?;
    debug!("b = {:?}, vx = {}: {:?} (drift {:.2e})", b.as_array(), vx, res, drift);
    Ok(res)
}

/// Solve for the steady state of one `(b, vx)` configuration with the default
/// [`Rk4Integrator`].
///
/// `b` is in units of `gamma`.
pub fn solve_single(
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    b: &MagneticField,
    vx: f64,
) -> SolverResult<SteadyStateResult>
{
    solve_single_with(
        &Rk4Integrator::default(),
        config,
        collapse_ops,
        time_grid,
        b,
        vx,
        &CancelToken::new(),
    )
}

/// Check that a density matrix is Hermitian with unit trace.
pub fn is_physical(rho: &DensityMatrix, tol: f64) -> bool {
    linalg::is_hermitian(rho, tol)
        && linalg::trace(rho).is_ok_and(|tr| (tr - 1.0).norm() <= tol)
        && rho.diag().iter().all(|p| p.re >= -tol)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    // small-number units keep these fast: gamma = 1, modest drive frequencies
    fn config(rabi: f64) -> AtomicSystemConfig {
        AtomicSystemConfig::new(
            1.0,
            std::f64::consts::FRAC_PI_4,
            1.0,
            2.0,
            [(rabi, 0.5), (rabi, -0.5)],
        )
        .unwrap()
    }

    fn grid() -> TimeGrid { TimeGrid::default_for(1.0).unwrap() }

    fn c_ops() -> CollapseOperators { CollapseOperators::spontaneous_decay(1.0).unwrap() }

    #[test]
    fn window_is_the_tail_past_threshold() {
        let w = steady_state_window(&grid(), 1.0).unwrap();
        // linspace(0, 20, 100): first sample above 10 is index 50
        assert_eq!(w, 50..100);
        let short = TimeGrid::linspace(0.0, 10.0, 11).unwrap();
        assert!(matches!(
            steady_state_window(&short, 1.0),
            Err(SolverError::EmptySteadyStateWindow { .. }),
        ));
    }

    #[test]
    fn short_grid_fails_before_integrating() {
        let short = TimeGrid::linspace(0.0, 5.0, 20).unwrap();
        let res = solve_single(
            &config(1.0), &c_ops(), &short, &MagneticField::zero(), 0.0);
        assert!(matches!(res, Err(SolverError::EmptySteadyStateWindow { .. })));
    }

    #[test]
    fn driven_solve_is_finite_and_physical() {
        let cfg = config(1.0);
        let b = MagneticField::new(0.2, 0.1, 0.5);
        let states = solve_trajectory_with(
            &Rk4Integrator::default(), &cfg, &c_ops(), &grid(), &b, 0.3,
            &CancelToken::new(),
        ).unwrap();
        assert_eq!(states.len(), 100);
        assert!(states.iter().all(|rho| is_physical(rho, 1e-9)));
        let res = solve_single(&cfg, &c_ops(), &grid(), &b, 0.3).unwrap();
        assert!(res.is_finite());
        assert!(res.excited_population() > 0.0);
        assert!(res.excited_population() < 1.0);
        assert!(res.rho11 >= 0.0 && res.rho22 >= 0.0 && res.rho33 >= 0.0);
    }

    #[test]
    fn trajectory_pairs_times_with_states() {
        let cfg = config(1.0);
        let (t, states) = solve_trajectory(
            &cfg, &c_ops(), &grid(), &MagneticField::new(0.0, 0.0, 1.0), 0.0).unwrap();
        assert_eq!(t.len(), states.len());
        assert_eq!(&t, grid().samples());
        assert_eq!(states[0], ground_state());
        let window = steady_state_window(&grid(), cfg.gamma()).unwrap();
        let res = solve_single(
            &cfg, &c_ops(), &grid(), &MagneticField::new(0.0, 0.0, 1.0), 0.0).unwrap();
        assert_eq!(reduce_steady_state(&states, window).unwrap(), res);
    }

    #[test]
    fn zero_coupling_leaves_atom_in_ground_state() {
        let cfg = config(0.0);
        for (b, vx) in [
            (MagneticField::new(1.0, -2.0, 3.0), 0.0),
            (MagneticField::zero(), 5.0),
        ] {
            let res = solve_single(&cfg, &c_ops(), &grid(), &b, vx).unwrap();
            assert_eq!(res, SteadyStateResult::default());
        }
    }

    #[test]
    fn repeated_solves_are_identical() {
        let cfg = config(0.8);
        let b = MagneticField::new(0.0, 0.0, 1.0);
        let a = solve_single(&cfg, &c_ops(), &grid(), &b, 0.1).unwrap();
        let c = solve_single(&cfg, &c_ops(), &grid(), &b, 0.1).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn sigma_drive_with_longitudinal_field_is_symmetric() {
        // vertical polarization drives only m = ±1; with b along z and no
        // Doppler shift, the two sublevels see mirrored detunings
        let cfg = AtomicSystemConfig::new(
            1.0, std::f64::consts::FRAC_PI_2, 1.0, 2.0, [(1.0, 0.0)]).unwrap();
        let res = solve_single(
            &cfg, &c_ops(), &grid(), &MagneticField::zero(), 0.0).unwrap();
        assert_relative_eq!(res.rho22, 0.0, epsilon = 1e-12);
        assert_relative_eq!(res.rho11, res.rho33, epsilon = 1e-9);
    }

    #[test]
    fn reduction_rejects_complex_populations() {
        let mut rho = ground_state();
        rho[[M_PLUS, M_PLUS]] = C64::new(0.1, 1e-3);
        let states = vec![rho; 4];
        assert!(matches!(
            reduce_steady_state(&states, 2..4),
            Err(SolverError::NonRealPopulation { index: 1, .. }),
        ));
    }

    #[test]
    fn reduction_averages_the_window_only() {
        let mut early = ground_state();
        early[[M_ZERO, M_ZERO]] = C64::from(0.9);
        let mut late = ground_state();
        late[[M_ZERO, M_ZERO]] = C64::from(0.2);
        late[[M_PLUS, M_MINUS]] = C64::new(0.05, 0.3);
        let states = vec![early.clone(), early, late.clone(), late];
        let res = reduce_steady_state(&states, 2..4).unwrap();
        assert_relative_eq!(res.rho22, 0.2);
        assert_relative_eq!(res.rho13_re, 0.05);
        assert_eq!(window_drift(&states, 2..4), 0.0);
        assert!(reduce_steady_state(&states, 4..4).is_err());
    }
}
