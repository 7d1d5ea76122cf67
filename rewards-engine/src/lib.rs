//! Orchestrates CAL, BUM, and DSM into the single `reconstruct` entry
//! point, plus the worker pool it uses for the parallel contract-fetch
//! phase.

pub mod error;
pub mod pool;
mod reconstruct;

pub use error::{ReconstructError, Result};
pub use pool::run_pool;
pub use reconstruct::{reconstruct, ReconstructConfig};
