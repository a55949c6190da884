#![allow(non_snake_case)]

//! Steady-state solver for a four-level (J = 0 → J' = 1) atom driven by a
//! comb of modulated light fields in an arbitrary magnetic field, with
//! Doppler averaging over a set of atomic velocities.
//!
//! Data flows strictly upward through the modules:
//! [`linalg`] → [`hamiltonian`] → [`lindblad`] → [`steady_state`] →
//! [`sweep`] → [`doppler`].

pub mod error;
pub mod linalg;
pub mod atom;
pub mod hamiltonian;
pub mod lindblad;
pub mod steady_state;
pub mod sweep;
pub mod doppler;
pub mod config;

pub use error::{ SolverError, SolverResult };
pub use atom::{
    AtomicSystemConfig,
    Axis,
    CollapseOperators,
    LightField,
    MagneticField,
    TimeGrid,
};
pub use lindblad::{ CancelToken, LindbladIntegrator, Rk4Integrator };
pub use steady_state::{
    SteadyStateResult,
    solve_single,
    solve_single_with,
    solve_trajectory,
    solve_trajectory_with,
};
pub use sweep::{ FieldSweep, SweepResult, solve_field_sweep, solve_field_sweep_with };
pub use doppler::{
    DopplerOptions,
    DopplerTask,
    process_one_velocity,
    solve_doppler_average,
    solve_doppler_average_with,
};
pub use config::RunConfig;
