//! Post-run analysis of cached evaluations.

mod range;
mod results;

pub use range::*;
pub use results::*;
