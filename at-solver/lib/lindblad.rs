//! Numerical integration of the Lindblad master equation
//! ```text
//! dρ/dt = -i [H(t), ρ] + Σ_k (L_k ρ L_k† - ½ {L_k† L_k, ρ})
//! ```
//! over a fixed time grid.
//!
//! The solver only needs the [`LindbladIntegrator`] interface; [`Rk4Integrator`]
//! is the default implementation, a fixed-step fourth-order Runge-Kutta scheme
//! that sub-steps between grid points.

use std::{
    sync::{ Arc, atomic::{ AtomicBool, Ordering } },
    time::{ Duration, Instant },
};
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    atom::{ CollapseOperators, TimeGrid },
    error::{ SolverError, SolverResult },
    hamiltonian::HBuild,
    linalg,
};

/// Density matrix in the {ground, m = +1, m = 0, m = -1} basis.
pub type DensityMatrix = nd::Array2<C64>;

/// Cooperative cancellation flag with an optional deadline.
///
/// Clones share the same flag. A [child][Self::child] has its own flag but
/// also observes every flag of its ancestors, so cancelling a child never
/// affects its parent.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    /// Create a token that is cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.flag.clone());
        Self { flag: Arc::default(), ancestors, deadline: self.deadline }
    }

    /// Return a clone of `self` that additionally times out after `timeout`
    /// from now. An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let mut new = self.clone();
        new.deadline = Some(
            self.deadline.map_or(deadline, |existing| existing.min(deadline)));
        new
    }

    pub fn cancel(&self) { self.flag.store(true, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.ancestors.iter().any(|f| f.load(Ordering::SeqCst))
    }

    /// Fail with [`SolverError::Cancelled`] or [`SolverError::TimedOut`] if
    /// either condition has been reached.
    pub fn check(&self) -> SolverResult<()> {
        if self.is_cancelled() {
            Err(SolverError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Err(SolverError::TimedOut)
        } else {
            Ok(())
        }
    }
}

/// Anything that can integrate the master equation over a time grid.
///
/// Implementations return the density matrix at every sample of `time`, the
/// first being `rho0` itself, and must poll `cancel` regularly.
pub trait LindbladIntegrator {
    fn integrate<H>(
        &self,
        hamiltonian: &H,
        collapse_ops: &CollapseOperators,
        rho0: &DensityMatrix,
        time: &TimeGrid,
        cancel: &CancelToken,
    ) -> SolverResult<Vec<DensityMatrix>>
    where H: HBuild;
}

/// Right-hand side of the Lindblad equation.
pub fn lindblad_rhs(
    h: &nd::Array2<C64>,
    collapse_ops: &CollapseOperators,
    rho: &DensityMatrix,
) -> DensityMatrix
{
    -C64::i() * linalg::commutator(h, rho) + collapse_ops.dissipate(rho)
}

/// Number of sub-steps between polls of the cancellation token.
pub const CANCEL_POLL: usize = 256;

/// Fourth-order Runge-Kutta with uniform sub-steps between grid points.
///
/// The number of sub-steps in an interval `dt` is chosen so that
/// `dt_sub * rate <= max_phase_step`, where `rate` is the Hamiltonian's
/// [rate bound][HBuild::rate_bound] plus the total decay rate. If the
/// Hamiltonian has a [static form][HBuild::build_static], it is built once and
/// reused for every sub-step. The cancellation token is polled at every grid
/// point and every [`CANCEL_POLL`] sub-steps.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Rk4Integrator {
    /// Largest phase (radians) any dynamical frequency may advance per
    /// sub-step.
    pub max_phase_step: f64,
    /// Upper limit on sub-steps per grid interval.
    pub max_substeps: usize,
    /// Largest allowed deviation of the trace from 1 at any grid point.
    pub trace_tolerance: f64,
}

impl Default for Rk4Integrator {
    fn default() -> Self {
        Self {
            max_phase_step: 0.1,
            max_substeps: 100_000,
            trace_tolerance: 1e-6,
        }
    }
}

impl Rk4Integrator {
    fn substeps(&self, dt: f64, rate: f64, t: f64) -> SolverResult<usize> {
        let n = (dt * rate / self.max_phase_step).ceil().max(1.0);
        if !n.is_finite() || n > self.max_substeps as f64 {
            return Err(SolverError::IntegrationFailure {
                time: t,
                reason: format!(
                    "step size requires {n} sub-steps (limit {})",
                    self.max_substeps,
                ),
            });
        }
        Ok(n as usize)
    }

    // Hamiltonians at the start, midpoint, and end of the sub-step
    fn step(
        hk: &nd::Array2<C64>,
        hkp1h: &nd::Array2<C64>,
        hkp1: &nd::Array2<C64>,
        collapse_ops: &CollapseOperators,
        rho: &DensityMatrix,
        h: f64,
    ) -> DensityMatrix
    {
        let k1 = lindblad_rhs(hk, collapse_ops, rho);
        let k2 = lindblad_rhs(hkp1h, collapse_ops, &(rho + &k1 * (h / 2.0)));
        let k3 = lindblad_rhs(hkp1h, collapse_ops, &(rho + &k2 * (h / 2.0)));
        let k4 = lindblad_rhs(hkp1, collapse_ops, &(rho + &k3 * h));
        rho + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0)
    }

    // check finiteness and trace, then project back onto Hermitian, unit-trace
    // matrices to keep round-off from accumulating
    fn normalize(&self, rho: DensityMatrix, t: f64) -> SolverResult<DensityMatrix> {
        if rho.iter().any(|x| !x.re.is_finite() || !x.im.is_finite()) {
            return Err(SolverError::IntegrationFailure {
                time: t,
                reason: "non-finite density matrix element".into(),
            });
        }
        let tr = linalg::trace(&rho)?;
        if (tr - 1.0).norm() > self.trace_tolerance {
            return Err(SolverError::IntegrationFailure {
                time: t,
                reason: format!("trace drifted to {tr}"),
            });
        }
        let herm = (&rho + &linalg::dagger(&rho)) * 0.5;
        Ok(herm / tr.re)
    }
}

impl LindbladIntegrator for Rk4Integrator {
    fn integrate<H>(
        &self,
        hamiltonian: &H,
        collapse_ops: &CollapseOperators,
        rho0: &DensityMatrix,
        time: &TimeGrid,
        cancel: &CancelToken,
    ) -> SolverResult<Vec<DensityMatrix>>
    where H: HBuild
    {
        let n = collapse_ops.dim();
        if rho0.dim() != (n, n) {
            return Err(SolverError::DimensionMismatch {
                op: "Rk4Integrator::integrate",
                left: vec![n, n],
                right: rho0.shape().to_vec(),
            });
        }
        let decay_rate: f64
            = collapse_ops.ops().iter()
            .map(|L| L.iter().map(|x| x.norm_sqr()).sum::<f64>())
            .sum();
        let rate = hamiltonian.rate_bound() + decay_rate;
        let H_static = hamiltonian.build_static();
        let t = time.samples();
        let mut states: Vec<DensityMatrix> = Vec::with_capacity(t.len());
        let mut rho = self.normalize(rho0.clone(), t[0])?;
        states.push(rho.clone());
        for (&tk, &tkp1) in t.iter().zip(t.iter().skip(1)) {
            cancel.check()?;
            let dt = tkp1 - tk;
            let nsub = self.substeps(dt, rate, tk)?;
            let h = dt / nsub as f64;
            for j in 0..nsub {
                if j > 0 && j % CANCEL_POLL == 0 { cancel.check()?; }
                rho = match &H_static {
                    Some(H) => Self::step(H, H, H, collapse_ops, &rho, h),
                    None => {
                        let tj = tk + j as f64 * h;
                        Self::step(
                            &hamiltonian.build_at(tj),
                            &hamiltonian.build_at(tj + h / 2.0),
                            &hamiltonian.build_at(tj + h),
                            collapse_ops,
                            &rho,
                            h,
                        )
                    },
                };
            }
            rho = self.normalize(rho, tkp1)?;
            states.push(rho.clone());
        }
        Ok(states)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use crate::atom::{ GROUND, M_ZERO };

    // two-level-like check: undriven excited state decays as exp(-gamma t)
    struct Zero;

    impl HBuild for Zero {
        fn build_static(&self) -> Option<nd::Array2<C64>> {
            Some(nd::Array2::zeros((4, 4)))
        }
        fn build_at(&self, _t: f64) -> nd::Array2<C64> { nd::Array2::zeros((4, 4)) }
        fn rate_bound(&self) -> f64 { 0.0 }
    }

    #[test]
    fn free_decay_is_exponential() {
        let gamma = 2.0;
        let c_ops = CollapseOperators::spontaneous_decay(gamma).unwrap();
        let rho0 = linalg::ket_bra(4, M_ZERO, M_ZERO).unwrap();
        let time = TimeGrid::linspace(0.0, 3.0, 31).unwrap();
        let states = Rk4Integrator::default()
            .integrate(&Zero, &c_ops, &rho0, &time, &CancelToken::new())
            .unwrap();
        assert_eq!(states.len(), 31);
        for (t, rho) in time.iter().zip(&states) {
            assert_relative_eq!(
                rho[[M_ZERO, M_ZERO]].re, (-gamma * t).exp(), epsilon = 1e-6);
            assert_relative_eq!(
                rho[[GROUND, GROUND]].re, 1.0 - (-gamma * t).exp(), epsilon = 1e-6);
        }
    }

    #[test]
    fn cancelled_token_stops_integration() {
        let c_ops = CollapseOperators::spontaneous_decay(1.0).unwrap();
        let rho0 = linalg::ket_bra(4, GROUND, GROUND).unwrap();
        let time = TimeGrid::linspace(0.0, 1.0, 5).unwrap();
        let parent = CancelToken::new();
        let child = parent.child();
        parent.cancel();
        let res = Rk4Integrator::default()
            .integrate(&Zero, &c_ops, &rho0, &time, &child);
        assert_eq!(res, Err(SolverError::Cancelled));
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn expired_deadline_times_out() {
        let token = CancelToken::new().with_timeout(Duration::ZERO);
        assert_eq!(token.check(), Err(SolverError::TimedOut));
    }

    #[test]
    fn too_many_substeps_is_an_integration_failure() {
        struct Fast;
        impl HBuild for Fast {
            fn build_static(&self) -> Option<nd::Array2<C64>> { None }
            fn build_at(&self, _t: f64) -> nd::Array2<C64> { nd::Array2::zeros((4, 4)) }
            fn rate_bound(&self) -> f64 { 1e12 }
        }
        let c_ops = CollapseOperators::spontaneous_decay(1.0).unwrap();
        let rho0 = linalg::ket_bra(4, GROUND, GROUND).unwrap();
        let time = TimeGrid::linspace(0.0, 1.0, 3).unwrap();
        let res = Rk4Integrator::default()
            .integrate(&Fast, &c_ops, &rho0, &time, &CancelToken::new());
        assert!(matches!(res, Err(SolverError::IntegrationFailure { .. })));
    }

    #[test]
    fn static_hamiltonian_is_built_once() {
        struct StaticOnly;
        impl HBuild for StaticOnly {
            fn build_static(&self) -> Option<nd::Array2<C64>> {
                Some(nd::Array2::zeros((4, 4)))
            }
            fn build_at(&self, _t: f64) -> nd::Array2<C64> {
                panic!("time-dependent build requested for a static Hamiltonian")
            }
            fn rate_bound(&self) -> f64 { 0.0 }
        }
        let c_ops = CollapseOperators::spontaneous_decay(1.0).unwrap();
        let rho0 = linalg::ket_bra(4, M_ZERO, M_ZERO).unwrap();
        let time = TimeGrid::linspace(0.0, 2.0, 11).unwrap();
        let states = Rk4Integrator::default()
            .integrate(&StaticOnly, &c_ops, &rho0, &time, &CancelToken::new())
            .unwrap();
        assert_relative_eq!(states[10][[M_ZERO, M_ZERO]].re, (-2.0_f64).exp(), epsilon = 1e-6);
    }

    #[test]
    fn long_interval_times_out_between_grid_points() {
        // one grid interval needing ~10^7 sub-steps
        struct Slow;
        impl HBuild for Slow {
            fn build_static(&self) -> Option<nd::Array2<C64>> { None }
            fn build_at(&self, _t: f64) -> nd::Array2<C64> { nd::Array2::zeros((4, 4)) }
            fn rate_bound(&self) -> f64 { 1e6 }
        }
        let integrator = Rk4Integrator {
            max_substeps: 100_000_000,
            ..Rk4Integrator::default()
        };
        let c_ops = CollapseOperators::spontaneous_decay(1.0).unwrap();
        let rho0 = linalg::ket_bra(4, GROUND, GROUND).unwrap();
        let time = TimeGrid::linspace(0.0, 1.0, 2).unwrap();
        let cancel = CancelToken::new().with_timeout(Duration::from_millis(5));
        let start = Instant::now();
        let res = integrator.integrate(&Slow, &c_ops, &rho0, &time, &cancel);
        assert_eq!(res, Err(SolverError::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wrong_initial_state_shape() {
        let c_ops = CollapseOperators::spontaneous_decay(1.0).unwrap();
        let rho0: DensityMatrix = nd::Array2::eye(3);
        let time = TimeGrid::linspace(0.0, 1.0, 3).unwrap();
        let res = Rk4Integrator::default()
            .integrate(&Zero, &c_ops, &rho0, &time, &CancelToken::new());
        assert!(matches!(res, Err(SolverError::DimensionMismatch { .. })));
    }
}
