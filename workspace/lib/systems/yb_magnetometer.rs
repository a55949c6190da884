//! Yb 556 nm magnetometer: a J = 0 → J' = 1 transition driven by a
//! frequency-modulated laser whose sidebands form a comb of light fields.

use at_solver::{
    atom::{ LightField, DELTA_MOD_DEFAULT, GAMMA_DEFAULT, K_DEFAULT },
    doppler::thermal_sigma,
    AtomicSystemConfig,
    SolverResult,
};

pub const M: f64 = 2.8384644058191703e-25; // kg, 171Yb

/// Sideband positions of the four-tone drive, in units of the modulation
/// frequency.
pub const SIDEBANDS: [f64; 4] = [-1.5, -0.5, 0.5, 1.5];

/// Equal-strength comb of light fields at [`SIDEBANDS`].
pub fn four_tone(rabi: f64) -> Vec<LightField> {
    SIDEBANDS.iter().map(|d| LightField::new(rabi, *d)).collect()
}

/// Four-tone drive with polarization angle `theta_pol` (0 for horizontal, π/2
/// for vertical) and per-tone Rabi frequency `rabi` (units of gamma).
pub fn magnetometer(theta_pol: f64, rabi: f64) -> SolverResult<AtomicSystemConfig> {
    AtomicSystemConfig::new(
        GAMMA_DEFAULT,
        theta_pol,
        K_DEFAULT,
        DELTA_MOD_DEFAULT,
        four_tone(rabi),
    )
}

/// One-dimensional thermal velocity spread (m/s) of the atoms at temperature
/// `T` (K).
pub fn velocity_spread(T: f64) -> SolverResult<f64> { thermal_sigma(T, M) }

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn presets() {
        let cfg = magnetometer(std::f64::consts::FRAC_PI_2, 1.0).unwrap();
        assert_eq!(cfg.fields().len(), 4);
        assert_eq!(cfg.fields()[0].detuning, -1.5);
        // ~3 cm/s at 10 μK
        let s = velocity_spread(10e-6).unwrap();
        assert!(s > 0.02 && s < 0.03);
    }
}
