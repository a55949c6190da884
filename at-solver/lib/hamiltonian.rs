//! Construction of the time-dependent Hamiltonian
//! `H(t) = H0 + c_σ(t) V_σ + c_σ*(t) V_σ† + c_π(t) V_π + c_π*(t) V_π†`.
//!
//! `H0` carries the Zeeman splitting and the transverse mixing due to the
//! magnetic field; the σ and π terms decompose the linearly polarized,
//! multi-tone drive into couplings in the Zeeman basis. Everything a
//! Hamiltonian depends on (field, velocity) is passed in explicitly, so two
//! builders never share state.

use std::f64::consts::SQRT_2;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    atom::{ AtomicSystemConfig, MagneticField, GROUND, M_MINUS, M_PLUS, M_ZERO },
    error::SolverResult,
    linalg::{ self, DIM },
};

/// Basic requirements for any Hamiltonian builder consumed by a
/// [`LindbladIntegrator`][crate::lindblad::LindbladIntegrator].
pub trait HBuild {
    /// Build a time-independent Hamiltonian matrix, if possible.
    fn build_static(&self) -> Option<nd::Array2<C64>>;

    /// Build the Hamiltonian matrix at a given time.
    fn build_at(&self, t: f64) -> nd::Array2<C64>;

    /// Upper bound on the angular frequency at which the generated dynamics
    /// can vary, used to pick integration step sizes.
    fn rate_bound(&self) -> f64;
}

/// Static, field-dependent part of the Hamiltonian.
///
/// With `bcross = (bx + i by) / √2`, the rows are
/// ```text
/// (0,  0,      0,            0           )
/// (0,  bz,     conj(bcross), 0           )
/// (0,  bcross, 0,            conj(bcross))
/// (0,  0,      bcross,       -bz         )
/// ```
/// in the same units as `b`.
pub fn static_hamiltonian(b: &MagneticField) -> nd::Array2<C64> {
    let bcross = C64::new(b.bx, b.by) / SQRT_2;
    let mut H0: nd::Array2<C64> = nd::Array2::zeros((DIM, DIM));
    H0[[M_PLUS, M_PLUS]] = b.bz.into();
    H0[[M_PLUS, M_ZERO]] = bcross.conj();
    H0[[M_ZERO, M_PLUS]] = bcross;
    H0[[M_ZERO, M_MINUS]] = bcross.conj();
    H0[[M_MINUS, M_ZERO]] = bcross;
    H0[[M_MINUS, M_MINUS]] = (-b.bz).into();
    H0
}

/// Fixed coupling operators of the drive: `V_σ = |g⟩⟨+1| + |g⟩⟨-1|` and
/// `V_π = |g⟩⟨0|`, along with their conjugates.
#[derive(Clone, Debug, PartialEq)]
pub struct CouplingOperators {
    pub sigma: nd::Array2<C64>,
    pub sigma_dag: nd::Array2<C64>,
    pub pi: nd::Array2<C64>,
    pub pi_dag: nd::Array2<C64>,
}

impl CouplingOperators {
    pub fn new() -> SolverResult<Self> {
        let sigma = linalg::add(
            &linalg::ket_bra(DIM, GROUND, M_PLUS)?,
            &linalg::ket_bra(DIM, GROUND, M_MINUS)?,
        )?;
        let pi = linalg::ket_bra(DIM, GROUND, M_ZERO)?;
        Ok(Self {
            sigma_dag: linalg::dagger(&sigma),
            sigma,
            pi_dag: linalg::dagger(&pi),
            pi,
        })
    }
}

/// Time-dependent scalar coefficients of the four coupling operators.
///
/// Each tone contributes `rabi·gamma·exp(i t ω)` with
/// `ω = detuning·delta_mod·gamma − k·vx`; the σ and π coefficients share this
/// sum and differ only in their prefactors.
#[derive(Clone, Debug, PartialEq)]
pub struct DriveCoefficients {
    // (amplitude, angular frequency) per tone, in config order
    tones: Vec<(f64, f64)>,
    sigma_prefactor: C64,
    pi_prefactor: f64,
}

impl DriveCoefficients {
    pub fn new(config: &AtomicSystemConfig, vx: f64) -> Self {
        let gamma = config.gamma();
        let doppler = config.k() * vx;
        let tones
            = config.fields().iter()
            .map(|f| {
                (f.rabi * gamma, f.detuning * config.delta_mod() * gamma - doppler)
            })
            .collect();
        let theta = config.theta_pol();
        Self {
            tones,
            sigma_prefactor: -C64::i() * theta.sin() / (2.0 * 6.0_f64.sqrt()),
            pi_prefactor: theta.cos() / (2.0 * 3.0_f64.sqrt()),
        }
    }

    /// `Σ_fields rabi·gamma·exp(i t ω)`.
    pub fn tone_sum(&self, t: f64) -> C64 {
        self.tones.iter()
            .fold(C64::zero(), |acc, (amp, w)| {
                acc + *amp * C64::from_polar(1.0, *w * t)
            })
    }

    /// σ coefficient `c_σ(t)`.
    pub fn sigma(&self, t: f64) -> C64 { self.sigma_prefactor * self.tone_sum(t) }

    /// σ† coefficient `c_σ(t)*`.
    pub fn sigma_conj(&self, t: f64) -> C64 { self.sigma(t).conj() }

    /// π coefficient `c_π(t)`.
    pub fn pi(&self, t: f64) -> C64 { self.pi_prefactor * self.tone_sum(t) }

    /// π† coefficient `c_π(t)*`.
    pub fn pi_conj(&self, t: f64) -> C64 { self.pi(t).conj() }

    /// Largest tone frequency magnitude.
    pub fn max_frequency(&self) -> f64 {
        self.tones.iter().map(|(_, w)| w.abs()).fold(0.0, f64::max)
    }

    /// Upper bound on `|c_σ(t)| + |c_π(t)|` over all `t`.
    pub fn max_amplitude(&self) -> f64 {
        let total: f64 = self.tones.iter().map(|(amp, _)| amp.abs()).sum();
        total * (self.sigma_prefactor.norm() + self.pi_prefactor.abs())
    }
}

/// Full time-dependent Hamiltonian for one (field, velocity) configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DrivenHamiltonian {
    H0: nd::Array2<C64>,
    couplings: CouplingOperators,
    coeffs: DriveCoefficients,
}

impl DrivenHamiltonian {
    /// Build the Hamiltonian for a field `b` given in units of `gamma` and an
    /// atom moving at `vx` along the beam.
    pub fn new(config: &AtomicSystemConfig, b: &MagneticField, vx: f64)
        -> SolverResult<Self>
    {
        Ok(Self {
            H0: static_hamiltonian(&b.scaled(config.gamma())),
            couplings: CouplingOperators::new()?,
            coeffs: DriveCoefficients::new(config, vx),
        })
    }

    /// Static part `H0`, in angular frequency units.
    pub fn h0(&self) -> &nd::Array2<C64> { &self.H0 }

    pub fn coefficients(&self) -> &DriveCoefficients { &self.coeffs }

    /// `true` if every tone has zero amplitude.
    pub fn is_undriven(&self) -> bool { self.coeffs.max_amplitude() == 0.0 }
}

impl HBuild for DrivenHamiltonian {
    fn build_static(&self) -> Option<nd::Array2<C64>> {
        self.is_undriven().then(|| self.H0.clone())
    }

    fn build_at(&self, t: f64) -> nd::Array2<C64> {
        let cs = self.coeffs.sigma(t);
        let cp = self.coeffs.pi(t);
        let V = &self.couplings;
        let mut H = self.H0.clone();
        H.scaled_add(cs, &V.sigma);
        H.scaled_add(cs.conj(), &V.sigma_dag);
        H.scaled_add(cp, &V.pi);
        H.scaled_add(cp.conj(), &V.pi_dag);
        H
    }

    fn rate_bound(&self) -> f64 {
        // max row sum bounds the spectral radius of H0
        let h0_norm
            = self.H0.rows().into_iter()
            .map(|row| row.iter().map(|x| x.norm()).sum::<f64>())
            .fold(0.0, f64::max);
        h0_norm + 2.0 * self.coeffs.max_amplitude() + self.coeffs.max_frequency()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn config(theta_pol: f64) -> AtomicSystemConfig {
        AtomicSystemConfig::new(
            1.0, theta_pol, 2.0, 5.0, [(1.0, 0.5), (0.5, -1.0)]).unwrap()
    }

    proptest! {
        #[test]
        fn h0_is_hermitian_with_real_diagonal(
            bx in -100.0f64..100.0,
            by in -100.0f64..100.0,
            bz in -100.0f64..100.0,
        ) {
            let H0 = static_hamiltonian(&MagneticField::new(bx, by, bz));
            prop_assert!(linalg::is_hermitian(&H0, 0.0));
            prop_assert!(H0.diag().iter().all(|x| x.im == 0.0));
            prop_assert_eq!(H0[[M_PLUS, M_PLUS]].re, bz);
            prop_assert_eq!(H0[[M_MINUS, M_MINUS]].re, -bz);
            prop_assert!(H0.row(GROUND).iter().all(|x| x.is_zero()));
        }

        #[test]
        fn full_hamiltonian_is_hermitian(
            t in 0.0f64..50.0,
            vx in -10.0f64..10.0,
            theta in 0.0f64..3.2,
        ) {
            let b = MagneticField::new(0.3, -0.7, 1.1);
            let H = DrivenHamiltonian::new(&config(theta), &b, vx).unwrap();
            prop_assert!(linalg::is_hermitian(&H.build_at(t), 1e-12));
        }
    }

    #[test]
    fn h0_entries() {
        let H0 = static_hamiltonian(&MagneticField::new(SQRT_2, 0.0, 2.0));
        assert_eq!(H0[[M_ZERO, M_PLUS]], C64::new(1.0, 0.0));
        assert_eq!(H0[[M_MINUS, M_ZERO]], C64::new(1.0, 0.0));
        assert_eq!(H0[[M_PLUS, M_MINUS]], C64::zero());
        let H0 = static_hamiltonian(&MagneticField::new(0.0, SQRT_2, 0.0));
        assert_relative_eq!(H0[[M_ZERO, M_PLUS]].im, 1.0);
        assert_relative_eq!(H0[[M_PLUS, M_ZERO]].im, -1.0);
    }

    #[test]
    fn coefficients_at_zero_time() {
        // at t = 0 every tone contributes its bare amplitude
        let cfg = config(std::f64::consts::FRAC_PI_2);
        let c = DriveCoefficients::new(&cfg, 0.0);
        assert_relative_eq!(c.tone_sum(0.0).re, 1.5);
        let expected = -1.5 / (2.0 * 6.0_f64.sqrt());
        assert_relative_eq!(c.sigma(0.0).im, expected);
        assert_relative_eq!(c.sigma_conj(0.0).im, -expected);
        assert_relative_eq!(c.pi(0.0).norm(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn pi_only_for_horizontal_polarization() {
        let c = DriveCoefficients::new(&config(0.0), 0.0);
        assert_relative_eq!(c.sigma(0.3).norm(), 0.0);
        let tone = c.tone_sum(0.3);
        assert_relative_eq!(c.pi(0.3).re, tone.re / (2.0 * 3.0_f64.sqrt()));
        assert_relative_eq!(c.pi_conj(0.3).im, -tone.im / (2.0 * 3.0_f64.sqrt()));
    }

    #[test]
    fn doppler_shift_enters_frequencies() {
        let cfg = config(0.0);
        let c0 = DriveCoefficients::new(&cfg, 0.0);
        let c1 = DriveCoefficients::new(&cfg, 3.0);
        // tone frequencies: 0.5·5 = 2.5 and -5, shifted by -k·vx = -6
        assert_relative_eq!(c0.max_frequency(), 5.0);
        assert_relative_eq!(c1.max_frequency(), 11.0);
    }

    #[test]
    fn zero_rabi_is_static() {
        let cfg = AtomicSystemConfig::with_fields([(0.0, 1.0), (0.0, -1.0)]).unwrap();
        let H = DrivenHamiltonian::new(&cfg, &MagneticField::new(1.0, 0.0, 2.0), 5.0)
            .unwrap();
        assert!(H.is_undriven());
        assert_eq!(H.build_static().unwrap(), H.build_at(1e-6));
    }
}
