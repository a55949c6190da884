//! Static description of the atom, its drive, and the shared read-only inputs
//! of every solve.
//!
//! The atomic basis is {ground, m = +1, m = 0, m = -1}, i.e. a J = 0 ground
//! state coupled to the three Zeeman sublevels of a J' = 1 excited state.

use std::f64::consts::{ PI, TAU };
use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use crate::{
    error::{ SolverError, SolverResult },
    linalg::{ self, DIM },
};

/// Index of the ground state.
pub const GROUND: usize = 0;
/// Index of the m = +1 excited sublevel.
pub const M_PLUS: usize = 1;
/// Index of the m = 0 excited sublevel.
pub const M_ZERO: usize = 2;
/// Index of the m = -1 excited sublevel.
pub const M_MINUS: usize = 3;

/// Natural linewidth of the 556 nm Yb intercombination line (angular, s⁻¹).
pub const GAMMA_DEFAULT: f64 = TAU * 182e3;
/// Wavenumber of the 556 nm line (m⁻¹).
pub const K_DEFAULT: f64 = TAU / 556e-9;
/// Laser modulation frequency, in units of `gamma`.
pub const DELTA_MOD_DEFAULT: f64 = 20.0;
/// Polarization angle: 0 is horizontal (z), π/2 is vertical (y).
pub const THETA_POL_DEFAULT: f64 = PI / 2.0;

/// A single tone of the optical drive.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightField {
    /// Rabi frequency, in units of `gamma`.
    pub rabi: f64,
    /// Detuning, in units of the modulation frequency.
    pub detuning: f64,
}

impl LightField {
    pub fn new(rabi: f64, detuning: f64) -> Self { Self { rabi, detuning } }
}

impl From<(f64, f64)> for LightField {
    fn from(pair: (f64, f64)) -> Self { Self::new(pair.0, pair.1) }
}

/// Immutable parameters of the driven atom.
///
/// Fields are private so that a config that made it through
/// [`Self::new`] stays valid for as long as it lives.
#[derive(Clone, Debug, PartialEq)]
pub struct AtomicSystemConfig {
    gamma: f64,
    theta_pol: f64,
    k: f64,
    delta_mod: f64,
    fields: Vec<LightField>,
}

impl AtomicSystemConfig {
    /// Create a new config, checking that `gamma` is positive, every
    /// parameter is finite, and at least one light field is present.
    pub fn new<I, F>(
        gamma: f64,
        theta_pol: f64,
        k: f64,
        delta_mod: f64,
        fields: I,
    ) -> SolverResult<Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<LightField>,
    {
        let fields: Vec<LightField>
            = fields.into_iter().map(|f| f.into()).collect();
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(SolverError::InvalidConfig(
                format!("gamma must be positive and finite, got {gamma}")));
        }
        for (name, x) in [("theta_pol", theta_pol), ("k", k), ("delta_mod", delta_mod)] {
            if !x.is_finite() {
                return Err(SolverError::InvalidConfig(
                    format!("{name} must be finite, got {x}")));
            }
        }
        if fields.is_empty() {
            return Err(SolverError::InvalidConfig(
                "at least one light field is required".into()));
        }
        if let Some(bad)
            = fields.iter()
            .find(|f| !(f.rabi.is_finite() && f.detuning.is_finite()))
        {
            return Err(SolverError::InvalidConfig(
                format!("non-finite light field {bad:?}")));
        }
        Ok(Self { gamma, theta_pol, k, delta_mod, fields })
    }

    /// Create a new config with the default 556 nm parameters and the given
    /// light fields.
    pub fn with_fields<I, F>(fields: I) -> SolverResult<Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<LightField>,
    {
        Self::new(
            GAMMA_DEFAULT,
            THETA_POL_DEFAULT,
            K_DEFAULT,
            DELTA_MOD_DEFAULT,
            fields,
        )
    }

    pub fn gamma(&self) -> f64 { self.gamma }

    pub fn theta_pol(&self) -> f64 { self.theta_pol }

    pub fn k(&self) -> f64 { self.k }

    pub fn delta_mod(&self) -> f64 { self.delta_mod }

    pub fn fields(&self) -> &[LightField] { &self.fields }
}

/// Cartesian axis of the magnetic field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    #[default]
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// Magnetic field vector (Zeeman shift g μ_B B), in units of `gamma` unless
/// stated otherwise.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MagneticField {
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
}

impl MagneticField {
    pub fn new(bx: f64, by: f64, bz: f64) -> Self { Self { bx, by, bz } }

    pub fn zero() -> Self { Self::default() }

    /// Field with a single non-zero component.
    pub fn along(axis: Axis, value: f64) -> Self {
        let mut b = Self::zero();
        match axis {
            Axis::X => { b.bx = value; },
            Axis::Y => { b.by = value; },
            Axis::Z => { b.bz = value; },
        }
        b
    }

    /// Multiply every component by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.bx * factor, self.by * factor, self.bz * factor)
    }

    pub fn as_array(self) -> [f64; 3] { [self.bx, self.by, self.bz] }

    pub fn is_finite(self) -> bool {
        self.bx.is_finite() && self.by.is_finite() && self.bz.is_finite()
    }
}

impl From<[f64; 3]> for MagneticField {
    fn from(b: [f64; 3]) -> Self { Self::new(b[0], b[1], b[2]) }
}

/// Ordered sequence of non-negative time samples.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeGrid(nd::Array1<f64>);

impl TimeGrid {
    /// Check that `samples` is non-empty, finite, non-negative, and strictly
    /// increasing.
    pub fn new(samples: nd::Array1<f64>) -> SolverResult<Self> {
        if samples.is_empty() {
            return Err(SolverError::InvalidConfig("empty time grid".into()));
        }
        if samples.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(SolverError::InvalidConfig(
                "time samples must be finite and non-negative".into()));
        }
        if samples.iter().zip(samples.iter().skip(1)).any(|(a, b)| b <= a) {
            return Err(SolverError::InvalidConfig(
                "time samples must be strictly increasing".into()));
        }
        Ok(Self(samples))
    }

    /// `n` evenly spaced samples over `[start, stop]`.
    pub fn linspace(start: f64, stop: f64, n: usize) -> SolverResult<Self> {
        Self::new(nd::Array1::linspace(start, stop, n))
    }

    /// The default grid: 100 points spanning `0` to `20 / gamma`.
    pub fn default_for(gamma: f64) -> SolverResult<Self> {
        Self::linspace(0.0, 20.0 / gamma, 100)
    }

    pub fn samples(&self) -> &nd::Array1<f64> { &self.0 }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn last(&self) -> f64 { self.0[self.0.len() - 1] }

    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ { self.0.iter() }
}

/// Spontaneous-decay channels `sqrt(gamma) |g⟩⟨e_m|`, one per excited
/// sublevel, together with the products needed by the dissipator.
#[derive(Clone, Debug)]
pub struct CollapseOperators {
    ops: Vec<nd::Array2<C64>>,
    ops_dag: Vec<nd::Array2<C64>>,
    // Σ_k L_k† L_k
    decay: nd::Array2<C64>,
}

impl CollapseOperators {
    /// Build from arbitrary square operators of equal size.
    pub fn new(ops: Vec<nd::Array2<C64>>) -> SolverResult<Self> {
        let shape = ops.first().map(|op| op.shape().to_vec())
            .unwrap_or_else(|| vec![DIM, DIM]);
        let mut decay: nd::Array2<C64> = nd::Array2::zeros((shape[0], shape[0]));
        for op in ops.iter() {
            if op.shape() != shape.as_slice() || !op.is_square() {
                return Err(SolverError::DimensionMismatch {
                    op: "CollapseOperators::new",
                    left: shape,
                    right: op.shape().to_vec(),
                });
            }
            decay += &linalg::dagger(op).dot(op);
        }
        let ops_dag = ops.iter().map(linalg::dagger).collect();
        Ok(Self { ops, ops_dag, decay })
    }

    /// The three decay channels `sqrt(gamma) |g⟩⟨e_m|`.
    pub fn spontaneous_decay(gamma: f64) -> SolverResult<Self> {
        let amp = C64::from(gamma.sqrt());
        let ops
            = [M_PLUS, M_ZERO, M_MINUS].into_iter()
            .map(|e| linalg::ket_bra(DIM, GROUND, e).map(|op| op * amp))
            .collect::<SolverResult<Vec<_>>>()?;
        Self::new(ops)
    }

    /// Shorthand for [`Self::spontaneous_decay`] at the config's linewidth.
    pub fn for_config(config: &AtomicSystemConfig) -> SolverResult<Self> {
        Self::spontaneous_decay(config.gamma())
    }

    pub fn ops(&self) -> &[nd::Array2<C64>] { &self.ops }

    pub fn len(&self) -> usize { self.ops.len() }

    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    /// Dimension of the space the operators act on.
    pub fn dim(&self) -> usize { self.decay.nrows() }

    /// Perform the dissipator action
    /// `D(rho) = Σ_k L_k rho L_k† - ½ {L_k† L_k, rho}` on a density matrix.
    pub fn dissipate(&self, rho: &nd::Array2<C64>) -> nd::Array2<C64> {
        let mut D: nd::Array2<C64>
            = linalg::anti_commutator(&self.decay, rho) * (-0.5);
        for (L, Ld) in self.ops.iter().zip(self.ops_dag.iter()) {
            D += &L.dot(rho).dot(Ld);
        }
        D
    }
}
