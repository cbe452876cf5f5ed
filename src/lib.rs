//! value_iteration_planning - MDP planning for a rectangular wheeled robot
//!
//! This crate computes an optimal navigation policy for a robot moving on a
//! discretized 2D workspace with polygonal obstacles, then replays that
//! policy in a discrete or continuous simulation.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod path_planning;

// Re-export common types for convenience
pub use common::{Path2D, Point2D, Polygon2D, Transition};
pub use common::TransitionModel;
pub use common::{PlannerError, PlannerResult};
