//! Text exports consumed by external tools.
//!
//! - [`mif`]: memory initialization files
//! - [`sdc`]: clock constraints

pub mod mif;
pub mod sdc;

pub use mif::{memory_to_mif, write_mif, MifWriter};
pub use sdc::{clock_constraints, write_clock_constraints};
