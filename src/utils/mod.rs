//! Utility modules for value_iteration_planning

pub mod visualization;

pub use visualization::{colors, PathStyle, PointStyle, Visualizer};
