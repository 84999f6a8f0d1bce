//! Traffic Filter Service
//!
//! Rule matching and traffic accounting core: filters classify traffic,
//! accumulate per-filter byte counters, reset them on schedule and raise
//! quota flags when thresholds are crossed.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
