//! Runtime adapters: telemetry, HTTP and their errors.

pub mod error;
pub mod http;
pub mod telemetry;
