//! Background tasks for the beacon gateway.

pub mod expiration_sweep;

pub use expiration_sweep::{expiration_sweep_task, SweepConfig, SweepMetrics, SweepSnapshot};
