//! Domain models for the medication-reminder core.

mod dose;
mod medication;

pub use dose::*;
pub use medication::*;
