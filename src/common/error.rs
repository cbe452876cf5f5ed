//! Error types for value_iteration_planning

use thiserror::Error;

/// Main error type for planning, stepping and persistence
#[derive(Error, Debug)]
pub enum PlannerError {
    /// Action id outside {TURN_LEFT, TURN_RIGHT, MOVE_FORWARD}
    #[error("Invalid action: {0}")]
    InvalidAction(i64),
    /// Grid index outside [0, nx) x [0, ny) x [0, n_theta)
    #[error("Index out of bounds: ({x}, {y}, {theta})")]
    OutOfBounds { x: i64, y: i64, theta: i64 },
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The configured goal pose overlaps an obstacle or leaves the workspace
    #[error("Goal state ({x}, {y}, {theta}) is in collision")]
    GoalInCollision { x: usize, y: usize, theta: usize },
    /// Persisted grid is corrupt or does not match the expected shape
    #[error("Format error: {0}")]
    Format(String),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Visualization error
    #[error("Visualization error: {0}")]
    Visualization(String),
}

/// Result type alias for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;
