//! Integration test infrastructure for the segment binding manager
//!
//! Provides:
//! - A recording device driver with injectable failures
//! - A recording messenger
//! - Topology and binding fixtures
//! - Assertions over device action streams and store contents

pub mod fixtures;
mod verification;

pub use fixtures::*;
pub use verification::*;
