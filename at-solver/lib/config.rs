//! TOML run files.
//!
//! ```toml
//! [system]
//! theta_pol = 1.5707963267948966
//! delta_mod = 20.0
//! fields = [
//!     { rabi = 1.0, detuning = -0.5 },
//!     { rabi = 1.0, detuning = 0.5 },
//! ]
//!
//! [time]
//! t_max = 20.0   # units of 1 / gamma
//! points = 100
//!
//! [sweep]
//! axis = "z"
//! range = { start = 0.0, stop = 3.0, points = 31 }
//!
//! [doppler]
//! thermal = { sigma_v = 0.2, span = 3.0, points = 11 }
//! max_workers = 8
//! timeout_secs = 600.0
//! ```
//!
//! Every table except `system.fields` is optional; omitted values fall back
//! to the defaults in [`crate::atom`].

use std::time::Duration;
use serde::Deserialize;
use crate::{
    atom::{
        AtomicSystemConfig,
        Axis,
        LightField,
        TimeGrid,
        DELTA_MOD_DEFAULT,
        GAMMA_DEFAULT,
        K_DEFAULT,
        THETA_POL_DEFAULT,
    },
    doppler::{ DopplerOptions, thermal_weights, velocity_grid },
    error::{ SolverError, SolverResult },
    sweep::FieldSweep,
};

/// Top-level run configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub system: SystemConfig,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub sweep: Option<SweepConfig>,
    #[serde(default)]
    pub doppler: DopplerConfig,
}

/// Atomic and drive parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_theta_pol")]
    pub theta_pol: f64,
    #[serde(default = "default_k")]
    pub k: f64,
    #[serde(default = "default_delta_mod")]
    pub delta_mod: f64,
    pub fields: Vec<LightField>,
}

fn default_gamma() -> f64 { GAMMA_DEFAULT }
fn default_theta_pol() -> f64 { THETA_POL_DEFAULT }
fn default_k() -> f64 { K_DEFAULT }
fn default_delta_mod() -> f64 { DELTA_MOD_DEFAULT }

/// Time grid, in units of `1 / gamma`.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    #[serde(default = "default_t_max")]
    pub t_max: f64,
    #[serde(default = "default_points")]
    pub points: usize,
}

fn default_t_max() -> f64 { 20.0 }
fn default_points() -> usize { 100 }

impl Default for TimeConfig {
    fn default() -> Self { Self { t_max: default_t_max(), points: default_points() } }
}

/// An evenly spaced range of values.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSpec {
    pub start: f64,
    pub stop: f64,
    pub points: usize,
}

impl RangeSpec {
    fn values(&self) -> Vec<f64> {
        match self.points {
            0 => Vec::new(),
            1 => vec![self.start],
            n => {
                let step = (self.stop - self.start) / (n - 1) as f64;
                (0..n).map(|k| self.start + step * k as f64).collect()
            },
        }
    }
}

/// Magnetic field sweep, in units of `gamma`. Exactly one of `values`,
/// `range`, or `vectors` must be given.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub axis: Axis,
    pub values: Option<Vec<f64>>,
    pub range: Option<RangeSpec>,
    pub vectors: Option<Vec<[f64; 3]>>,
}

/// Thermal velocity sampling.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThermalSpec {
    /// Velocity spread (m/s).
    pub sigma_v: f64,
    /// Half-width of the sampled range, in units of `sigma_v`.
    #[serde(default = "default_span")]
    pub span: f64,
    pub points: usize,
}

fn default_span() -> f64 { 3.0 }

/// Velocity sampling and worker pool settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DopplerConfig {
    pub velocities: Option<Vec<f64>>,
    pub thermal: Option<ThermalSpec>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    pub timeout_secs: Option<f64>,
}

fn default_max_workers() -> usize { 32 }

impl Default for DopplerConfig {
    fn default() -> Self {
        Self {
            velocities: None,
            thermal: None,
            max_workers: default_max_workers(),
            timeout_secs: None,
        }
    }
}

impl RunConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> SolverResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Build the validated atomic system.
    pub fn system(&self) -> SolverResult<AtomicSystemConfig> {
        let SystemConfig { gamma, theta_pol, k, delta_mod, fields } = &self.system;
        AtomicSystemConfig::new(*gamma, *theta_pol, *k, *delta_mod, fields.iter().copied())
    }

    /// Build the time grid, converting from units of `1 / gamma`.
    pub fn time_grid(&self) -> SolverResult<TimeGrid> {
        TimeGrid::linspace(
            0.0, self.time.t_max / self.system.gamma, self.time.points)
    }

    /// Build the field sweep, if one was configured.
    pub fn field_sweep(&self) -> SolverResult<Option<FieldSweep>> {
        let Some(sweep) = &self.sweep else { return Ok(None); };
        match (&sweep.values, &sweep.range, &sweep.vectors) {
            (Some(values), None, None)
                => Ok(Some(FieldSweep::along(sweep.axis, values.clone()))),
            (None, Some(range), None)
                => Ok(Some(FieldSweep::along(sweep.axis, range.values()))),
            (None, None, Some(vectors))
                => Ok(Some(FieldSweep::vectors(vectors.clone()))),
            _ => Err(SolverError::MisconfiguredSweep(
                "exactly one of sweep.values, sweep.range, sweep.vectors \
                must be given".into())),
        }
    }

    /// Velocity samples and their normalized weights.
    ///
    /// Explicit velocities are weighted uniformly; with neither explicit nor
    /// thermal sampling, a single atom at rest is used.
    pub fn velocities(&self) -> SolverResult<(Vec<f64>, Vec<f64>)> {
        match (&self.doppler.velocities, &self.doppler.thermal) {
            (Some(_), Some(_)) => Err(SolverError::MisconfiguredSweep(
                "doppler.velocities and doppler.thermal are exclusive".into())),
            (Some(v), None) => {
                if v.is_empty() {
                    return Err(SolverError::MisconfiguredSweep(
                        "doppler.velocities is empty".into()));
                }
                let w = vec![1.0 / v.len() as f64; v.len()];
                Ok((v.clone(), w))
            },
            (None, Some(th)) => {
                let v = velocity_grid(th.sigma_v, th.span, th.points)?;
                let w = thermal_weights(&v, th.sigma_v)?;
                Ok((v, w))
            },
            (None, None) => Ok((vec![0.0], vec![1.0])),
        }
    }

    /// Worker pool settings.
    pub fn doppler_options(&self) -> SolverResult<DopplerOptions> {
        let mut options = DopplerOptions::new(self.doppler.max_workers);
        if let Some(secs) = self.doppler.timeout_secs {
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|err| SolverError::InvalidConfig(
                    format!("bad timeout {secs}: {err}")))?;
            options = options.with_timeout(timeout);
        }
        Ok(options)
    }
}
