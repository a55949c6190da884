//! Collection of pre-defined systems.

pub mod yb_magnetometer;
