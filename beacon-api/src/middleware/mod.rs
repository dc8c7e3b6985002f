//! Axum middleware for the beacon gateway.

pub mod admission;

pub use admission::{
    admission_middleware, AdmissionConfig, AdmissionMetrics, AdmissionSnapshot, AdmissionState,
};
