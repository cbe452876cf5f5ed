//! Parameter bundle for the value-iteration planner
//!
//! A `PlannerConfig` is built once per run and shared by reference between
//! the geometry model, the transition models and the solver. Nothing mutates
//! it after construction.

use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::common::{PlannerError, PlannerResult, Polygon2D};

use super::state::DiscreteState;

/// Reward constants of the decision process
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rewards {
    /// Reward for entering the goal state
    pub goal: f64,
    /// Reward for entering a colliding or out-of-grid state
    pub collision: f64,
    /// Base reward of MOVE_FORWARD
    pub step: f64,
    /// Reward of TURN_LEFT / TURN_RIGHT
    pub rotate: f64,
    /// Scale of the drift error added to MOVE_FORWARD (negative)
    pub drift_penalty: f64,
}

impl Default for Rewards {
    fn default() -> Self {
        Self {
            goal: 100.0,
            collision: -100.0,
            step: -0.1,
            rotate: -0.5,
            drift_penalty: -90.0,
        }
    }
}

/// Configuration for the value-iteration planner
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlannerConfig {
    /// Grid cells along x; the workspace is [0, nx]
    pub nx: usize,
    /// Grid cells along y; the workspace is [0, ny]
    pub ny: usize,
    /// Number of heading bins spanning 360 degrees
    pub n_theta: usize,
    /// Robot footprint length along its heading [cells]
    pub robot_length: f64,
    /// Robot footprint width across its heading [cells]
    pub robot_width: f64,
    /// Static obstacle polygons
    pub obstacles: Vec<Polygon2D>,
    /// The single goal cell
    pub goal: DiscreteState,
    pub rewards: Rewards,
    /// Discount factor
    pub gamma: f64,
    /// Sweeps stop once the Bellman residual drops below this value
    pub convergence_threshold: f64,
    /// Forward displacement of MOVE_FORWARD [cells]
    pub step_size: f64,
    /// Upper bound on the number of Bellman sweeps
    pub max_sweeps: usize,
    /// Tolerance of the footprint containment and intersection tests
    pub contain_epsilon: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let delta_theta_deg = 5.0;
        let n_theta = (360.0 / delta_theta_deg) as usize;
        Self {
            nx: 100,
            ny: 100,
            n_theta,
            robot_length: 3.0,
            robot_width: 2.0,
            obstacles: vec![
                // bottom wall
                Polygon2D::from_tuples(&[(0.0, 30.0), (70.0, 30.0), (70.0, 35.0), (0.0, 35.0)]),
                // top wall
                Polygon2D::from_tuples(&[(100.0, 60.0), (30.0, 60.0), (30.0, 65.0), (100.0, 65.0)]),
                // garage
                Polygon2D::from_tuples(&[(80.0, 0.0), (80.0, 40.0), (85.0, 40.0), (85.0, 0.0)]),
                Polygon2D::from_tuples(&[(80.0, 50.0), (80.0, 90.0), (85.0, 90.0), (85.0, 50.0)]),
                Polygon2D::from_tuples(&[(85.0, 0.0), (85.0, 100.0), (100.0, 100.0), (100.0, 0.0)]),
            ],
            goal: DiscreteState::new(82, 95, (270.0 / delta_theta_deg) as usize),
            rewards: Rewards::default(),
            gamma: 0.99,
            convergence_threshold: 1e-4,
            step_size: 1.0,
            max_sweeps: 10_000,
            contain_epsilon: 1e-9,
        }
    }
}

impl PlannerConfig {
    /// Heading bin width [rad]
    pub fn delta_theta(&self) -> f64 {
        2.0 * PI / self.n_theta as f64
    }

    /// Heading of bin `theta` [rad]
    pub fn heading(&self, theta: usize) -> f64 {
        theta as f64 * self.delta_theta()
    }

    /// Total number of discrete states
    pub fn num_states(&self) -> usize {
        self.nx * self.ny * self.n_theta
    }

    /// Grid shape as [nx, ny, n_theta]
    pub fn shape(&self) -> [usize; 3] {
        [self.nx, self.ny, self.n_theta]
    }

    /// Check the bundle for values the planner cannot work with
    pub fn validate(&self) -> PlannerResult<()> {
        if self.nx == 0 || self.ny == 0 {
            return Err(PlannerError::InvalidParameter(format!(
                "grid extents must be positive, got {}x{}",
                self.nx, self.ny
            )));
        }
        if self.n_theta == 0 {
            return Err(PlannerError::InvalidParameter("n_theta must be positive".to_string()));
        }
        if !(self.robot_length > 0.0 && self.robot_width > 0.0) {
            return Err(PlannerError::InvalidParameter(format!(
                "robot dimensions must be positive, got {}x{}",
                self.robot_length, self.robot_width
            )));
        }
        if !(0.0..1.0).contains(&self.gamma) {
            return Err(PlannerError::InvalidParameter(format!(
                "gamma must lie in [0, 1), got {}",
                self.gamma
            )));
        }
        if !(self.convergence_threshold > 0.0) {
            return Err(PlannerError::InvalidParameter(format!(
                "convergence threshold must be positive, got {}",
                self.convergence_threshold
            )));
        }
        if !(self.step_size > 0.0) {
            return Err(PlannerError::InvalidParameter(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if self.contain_epsilon < 0.0 {
            return Err(PlannerError::InvalidParameter("contain_epsilon must be non-negative".to_string()));
        }
        if self.max_sweeps == 0 {
            return Err(PlannerError::InvalidParameter("max_sweeps must be positive".to_string()));
        }
        if self.goal.x >= self.nx || self.goal.y >= self.ny || self.goal.theta >= self.n_theta {
            return Err(PlannerError::InvalidParameter(format!(
                "goal {} lies outside the {}x{}x{} grid",
                self.goal, self.nx, self.ny, self.n_theta
            )));
        }
        if let Some(i) = self.obstacles.iter().position(|o| o.len() < 3) {
            return Err(PlannerError::InvalidParameter(format!(
                "obstacle {} has fewer than 3 vertices",
                i
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlannerConfig::default();
        assert_eq!(config.n_theta, 72);
        assert_eq!(config.goal, DiscreteState::new(82, 95, 54));
        assert_eq!(config.obstacles.len(), 5);
        assert!((config.delta_theta() - 5.0_f64.to_radians()).abs() < 1e-12);
        assert!((config.heading(54) - 1.5 * PI).abs() < 1e-12);
        assert_eq!(config.num_states(), 720_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PlannerConfig { gamma: 1.0, ..Default::default() };
        assert!(matches!(config.validate(), Err(PlannerError::InvalidParameter(_))));

        let config = PlannerConfig { n_theta: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = PlannerConfig {
            goal: DiscreteState::new(100, 0, 0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PlannerConfig {
            obstacles: vec![Polygon2D::from_tuples(&[(0.0, 0.0), (1.0, 1.0)])],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
