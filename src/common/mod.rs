//! Common types, traits, and error definitions for value_iteration_planning
//!
//! This module provides the foundational building blocks shared by the
//! planner, the simulator and the visualization utilities.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
