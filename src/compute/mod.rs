//! Compute module - Search, evaluation and analysis for daylight optimization.

pub mod analysis;
pub mod evolution;
pub mod pipeline;
