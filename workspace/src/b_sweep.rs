//! Steady-state observables across a magnetic field sweep for a single atomic
//! velocity, printed as a whitespace-separated table.

use std::{ f64::consts::PI, path::PathBuf };
use anyhow::Context;
use clap::Parser;
use at_solver::{
    atom::CollapseOperators,
    sweep::{ FieldSweep, solve_field_sweep },
    Axis,
    RunConfig,
    TimeGrid,
};
use lib::systems::yb_magnetometer::magnetometer;

#[derive(Debug, Parser)]
#[command(about = "Sweep the magnetic field at fixed atomic velocity")]
struct Args {
    /// TOML run file; the built-in four-tone preset is used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Atomic velocity along the beam (m/s).
    #[arg(long, default_value_t = 0.0)]
    vx: f64,

    /// Polarization angle in units of π (preset only).
    #[arg(long, default_value_t = 0.5)]
    theta: f64,

    /// Per-tone Rabi frequency in units of gamma (preset only).
    #[arg(long, default_value_t = 1.0)]
    rabi: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (system, time_grid, sweep) = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let run = RunConfig::from_toml_str(&text)?;
            (run.system()?, run.time_grid()?, run.field_sweep()?)
        },
        None => {
            let system = magnetometer(args.theta * PI, args.rabi)?;
            let time_grid = TimeGrid::default_for(system.gamma())?;
            let values: Vec<f64> = (0..=30).map(|k| k as f64 * 0.1).collect();
            (system, time_grid, Some(FieldSweep::along(Axis::Z, values)))
        },
    };
    let c_ops = CollapseOperators::for_config(&system)?;
    let results = solve_field_sweep(
        &system, &c_ops, &time_grid, sweep.as_ref(), args.vx)?;

    println!("# bx by bz rho11 rho22 rho33 rho13_re");
    let fields = sweep.iter().flat_map(|s| s.fields());
    for (b, res) in fields.zip(&results) {
        let [bx, by, bz] = b.as_array();
        let [r11, r22, r33, r13] = res.to_array();
        println!("{bx:.6} {by:.6} {bz:.6} {r11:.6e} {r22:.6e} {r33:.6e} {r13:.6e}");
    }
    Ok(())
}
