//! Doppler averaging: independent field sweeps for a set of atomic velocities,
//! run on a bounded worker pool.
//!
//! Every velocity is handled by its own [`DopplerTask`], which owns (shared,
//! read-only) handles to the configuration and nothing else, so workers never
//! touch each other's state. Results are collected in input order no matter
//! which worker finishes first.

use std::{
    sync::{ Arc, atomic::{ AtomicUsize, Ordering } },
    thread,
    time::{ Duration, Instant },
};
use log::{ debug, info };
use rayon::prelude::*;
use crate::{
    atom::{ AtomicSystemConfig, CollapseOperators, TimeGrid },
    error::{ SolverError, SolverResult },
    lindblad::{ CancelToken, LindbladIntegrator, Rk4Integrator },
    steady_state::SteadyStateResult,
    sweep::{ FieldSweep, SweepResult, require_sweep, solve_field_sweep_with },
};

/// Boltzmann constant (J/K).
pub const K_B: f64 = 1.380649e-23;

/// Everything needed to process one velocity sample.
#[derive(Clone, Debug)]
pub struct DopplerTask {
    pub config: Arc<AtomicSystemConfig>,
    pub collapse_ops: Arc<CollapseOperators>,
    pub time_grid: Arc<TimeGrid>,
    pub field_sweep: Arc<FieldSweep>,
    pub velocity: f64,
}

/// Run the field sweep of a single task.
pub fn process_one_velocity<I>(
    integrator: &I,
    task: &DopplerTask,
    cancel: &CancelToken,
) -> SolverResult<SweepResult>
where I: LindbladIntegrator
{
    solve_field_sweep_with(
        integrator,
        &task.config,
        &task.collapse_ops,
        &task.time_grid,
        Some(&task.field_sweep),
        task.velocity,
        cancel,
    )
}

/// Worker pool settings for [`solve_doppler_average_with`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DopplerOptions {
    /// Upper bound on the number of worker threads.
    pub max_workers: usize,
    /// Per-velocity time limit, if any.
    pub task_timeout: Option<Duration>,
}

impl Default for DopplerOptions {
    fn default() -> Self { Self { max_workers: 32, task_timeout: None } }
}

impl DopplerOptions {
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers, ..Self::default() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

/// `min(available parallelism, max_workers)`; fails if `max_workers` is zero.
pub fn worker_count(max_workers: usize) -> SolverResult<usize> {
    if max_workers == 0 {
        return Err(SolverError::MisconfiguredSweep(
            "max_workers must be at least 1".into()));
    }
    let available = thread::available_parallelism().map_or(1, |n| n.get());
    Ok(available.min(max_workers))
}

// prefer the first error that caused the batch to stop over the
// cancellations it triggered in the other workers
fn first_error(results: Vec<SolverResult<SweepResult>>)
    -> SolverResult<Vec<SweepResult>>
{
    let mut cancelled: Option<SolverError> = None;
    let mut out: Vec<SweepResult> = Vec::with_capacity(results.len());
    for res in results.into_iter() {
        match res {
            Ok(sweep) => { out.push(sweep); },
            Err(SolverError::Cancelled) => {
                cancelled.get_or_insert(SolverError::Cancelled);
            },
            Err(err) => { return Err(err); },
        }
    }
    match cancelled {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Run a field sweep for every velocity in parallel using a particular
/// integrator.
///
/// The `i`-th element of the output is the sweep at `velocities[i]`. A failure
/// at any velocity cancels the remaining work and fails the whole batch; no
/// partial results are returned. Cancelling `cancel` stops all workers.
pub fn solve_doppler_average_with<I>(
    integrator: &I,
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    field_sweep: Option<&FieldSweep>,
    velocities: &[f64],
    options: &DopplerOptions,
    cancel: &CancelToken,
) -> SolverResult<Vec<SweepResult>>
where I: LindbladIntegrator + Sync
{
    let sweep = require_sweep(field_sweep)?;
    if velocities.is_empty() {
        return Err(SolverError::MisconfiguredSweep("no velocities supplied".into()));
    }
    let n_workers = worker_count(options.max_workers)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_workers)
        .build()
        .map_err(|err| SolverError::WorkerPool(err.to_string()))?;

    let config = Arc::new(config.clone());
    let collapse_ops = Arc::new(collapse_ops.clone());
    let time_grid = Arc::new(time_grid.clone());
    let field_sweep = Arc::new(sweep.clone());
    let tasks: Vec<DopplerTask>
        = velocities.iter()
        .map(|&velocity| DopplerTask {
            config: config.clone(),
            collapse_ops: collapse_ops.clone(),
            time_grid: time_grid.clone(),
            field_sweep: field_sweep.clone(),
            velocity,
        })
        .collect();

    let batch = cancel.child();
    let len = tasks.len();
    let progress = AtomicUsize::new(0);
    info!(
        "solving {} fields x {} velocities on {} workers",
        sweep.len(), len, n_workers,
    );
    let start = Instant::now();
    let results: Vec<SolverResult<SweepResult>>
        = pool.install(|| {
            tasks.par_iter()
                .map(|task| {
                    let token = match options.task_timeout {
                        Some(timeout) => batch.with_timeout(timeout),
                        None => batch.clone(),
                    };
                    let res = process_one_velocity(integrator, task, &token);
                    if res.is_err() { batch.cancel(); }
                    let k = progress.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!("velocity {} done ({} / {})", task.velocity, k, len);
                    res
                })
                .collect()
        });
    info!("time elapsed: {:.2} sec", start.elapsed().as_secs_f64());
    first_error(results)
}

/// Run a field sweep for every velocity in parallel with the default
/// [`Rk4Integrator`] on at most `max_workers` threads.
pub fn solve_doppler_average(
    config: &AtomicSystemConfig,
    collapse_ops: &CollapseOperators,
    time_grid: &TimeGrid,
    field_sweep: Option<&FieldSweep>,
    velocities: &[f64],
    max_workers: usize,
) -> SolverResult<Vec<SweepResult>>
{
    solve_doppler_average_with(
        &Rk4Integrator::default(),
        config,
        collapse_ops,
        time_grid,
        field_sweep,
        velocities,
        &DopplerOptions::new(max_workers),
        &CancelToken::new(),
    )
}

/// One-dimensional thermal velocity spread `sqrt(k_B T / m)` (m/s) for a
/// temperature in K and a mass in kg.
pub fn thermal_sigma(temperature: f64, mass: f64) -> SolverResult<f64> {
    if !(temperature >= 0.0 && mass > 0.0) {
        return Err(SolverError::InvalidConfig(
            format!("need T >= 0 and m > 0, got T = {temperature}, m = {mass}")));
    }
    Ok((K_B * temperature / mass).sqrt())
}

/// `n` evenly spaced velocities over `[-span * sigma_v, span * sigma_v]`.
pub fn velocity_grid(sigma_v: f64, span: f64, n: usize) -> SolverResult<Vec<f64>> {
    if n == 0 || !(sigma_v >= 0.0) || !(span >= 0.0) {
        return Err(SolverError::InvalidConfig(format!(
            "bad velocity grid: sigma_v = {sigma_v}, span = {span}, n = {n}")));
    }
    if n == 1 { return Ok(vec![0.0]); }
    let vmax = span * sigma_v;
    Ok(
        (0..n)
        .map(|k| -vmax + 2.0 * vmax * k as f64 / (n - 1) as f64)
        .collect()
    )
}

/// Normalized Gaussian (one-dimensional Maxwell-Boltzmann) weights for a set
/// of velocity samples.
///
/// A zero `sigma_v` puts all weight on the samples closest to zero.
pub fn thermal_weights(velocities: &[f64], sigma_v: f64) -> SolverResult<Vec<f64>> {
    if velocities.is_empty() {
        return Err(SolverError::MisconfiguredSweep("no velocities supplied".into()));
    }
    let raw: Vec<f64>
        = if sigma_v > 0.0 {
            velocities.iter()
                .map(|v| (-0.5 * (v / sigma_v).powi(2)).exp())
                .collect()
        } else {
            let vmin = velocities.iter().map(|v| v.abs()).fold(f64::INFINITY, f64::min);
            velocities.iter()
                .map(|v| if v.abs() == vmin { 1.0 } else { 0.0 })
                .collect()
        };
    let total: f64 = raw.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(SolverError::InvalidConfig(
            format!("degenerate thermal weights for sigma_v = {sigma_v}")));
    }
    Ok(raw.into_iter().map(|w| w / total).collect())
}

/// Combine per-velocity sweeps into a single weighted-average sweep.
///
/// Weights are normalized by their sum, which must be positive; negative or
/// non-finite weights are rejected.
pub fn weighted_average(results: &[SweepResult], weights: &[f64])
    -> SolverResult<SweepResult>
{
    if results.len() != weights.len() || results.is_empty() {
        return Err(SolverError::DimensionMismatch {
            op: "weighted_average",
            left: vec![results.len()],
            right: vec![weights.len()],
        });
    }
    let n = results[0].len();
    if let Some(bad) = results.iter().find(|r| r.len() != n) {
        return Err(SolverError::DimensionMismatch {
            op: "weighted_average",
            left: vec![n],
            right: vec![bad.len()],
        });
    }
    if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
        return Err(SolverError::InvalidConfig(
            format!("weights must be finite and non-negative: {weights:?}")));
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(SolverError::InvalidConfig(
            format!("weights must have a positive, finite sum; got {total}")));
    }
    let mut acc = vec![[0.0_f64; 4]; n];
    for (sweep, w) in results.iter().zip(weights) {
        for (a, res) in acc.iter_mut().zip(sweep) {
            a.iter_mut().zip(res.to_array())
                .for_each(|(ak, rk)| { *ak += w * rk; });
        }
    }
    Ok(
        acc.into_iter()
        .map(|a| SteadyStateResult::from_array(a.map(|ak| ak / total)))
        .collect()
    )
}
