//! Doppler-averaged steady-state observables across a magnetic field sweep,
//! computed in parallel over a thermal velocity distribution.

use std::{ f64::consts::PI, path::PathBuf };
use anyhow::Context;
use clap::Parser;
use itertools::Itertools;
use log::info;
use at_solver::{
    atom::CollapseOperators,
    doppler::{
        DopplerOptions,
        solve_doppler_average_with,
        thermal_weights,
        velocity_grid,
        weighted_average,
    },
    sweep::FieldSweep,
    Axis,
    CancelToken,
    Rk4Integrator,
    RunConfig,
    TimeGrid,
};
use lib::systems::yb_magnetometer::{ magnetometer, velocity_spread };

#[derive(Debug, Parser)]
#[command(about = "Doppler-averaged magnetic field sweep")]
struct Args {
    /// TOML run file; the built-in four-tone preset is used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Atom temperature in K (preset only).
    #[arg(long, default_value_t = 20e-6)]
    temperature: f64,

    /// Number of velocity samples (preset only).
    #[arg(long, default_value_t = 21)]
    velocities: usize,

    /// Maximum number of worker threads (preset only).
    #[arg(long, default_value_t = 32)]
    workers: usize,

    /// Also print the sweep for every velocity.
    #[arg(long)]
    all: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (system, time_grid, sweep, (velocities, weights), options)
        = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let run = RunConfig::from_toml_str(&text)?;
                (
                    run.system()?,
                    run.time_grid()?,
                    run.field_sweep()?,
                    run.velocities()?,
                    run.doppler_options()?,
                )
            },
            None => {
                let system = magnetometer(PI / 2.0, 1.0)?;
                let time_grid = TimeGrid::default_for(system.gamma())?;
                let values: Vec<f64> = (0..=30).map(|k| k as f64 * 0.1).collect();
                let sigma_v = velocity_spread(args.temperature)?;
                let velocities = velocity_grid(sigma_v, 3.0, args.velocities)?;
                let weights = thermal_weights(&velocities, sigma_v)?;
                (
                    system,
                    time_grid,
                    Some(FieldSweep::along(Axis::Z, values)),
                    (velocities, weights),
                    DopplerOptions::new(args.workers),
                )
            },
        };
    let c_ops = CollapseOperators::for_config(&system)?;
    let results = solve_doppler_average_with(
        &Rk4Integrator::default(),
        &system,
        &c_ops,
        &time_grid,
        sweep.as_ref(),
        &velocities,
        &options,
        &CancelToken::new(),
    )?;
    let averaged = weighted_average(&results, &weights)?;
    info!("averaged {} velocity samples", velocities.len());

    let fields = sweep.iter().flat_map(|s| s.fields()).collect_vec();
    if args.all {
        println!("# vx weight bx by bz rho11 rho22 rho33 rho13_re");
        for ((vx, w), sweep_res) in velocities.iter().zip(&weights).zip(&results) {
            for (b, res) in fields.iter().zip(sweep_res) {
                let [bx, by, bz] = b.as_array();
                let [r11, r22, r33, r13] = res.to_array();
                println!(
                    "{vx:.6} {w:.6e} {bx:.6} {by:.6} {bz:.6} \
                    {r11:.6e} {r22:.6e} {r33:.6e} {r13:.6e}"
                );
            }
        }
        println!();
    }
    println!("# bx by bz <rho11> <rho22> <rho33> <rho13_re>");
    for (b, res) in fields.iter().zip(&averaged) {
        let [bx, by, bz] = b.as_array();
        let [r11, r22, r33, r13] = res.to_array();
        println!("{bx:.6} {by:.6} {bz:.6} {r11:.6e} {r22:.6e} {r33:.6e} {r13:.6e}");
    }
    Ok(())
}
