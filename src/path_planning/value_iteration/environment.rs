//! Simulation-grade transition model
//!
//! Used to replay a policy. Forward motion may keep the exact displaced
//! position (continuous mode) or snap it to the nearest cell (discrete mode);
//! collision and goal tests go straight to the geometry.

use std::sync::Arc;

use crate::common::{PlannerResult, Polygon2D, Transition, TransitionModel};

use super::config::PlannerConfig;
use super::geometry::RobotGeometry;
use super::state::{Action, ContinuousPose};

/// How MOVE_FORWARD treats the displaced position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Round the target to the nearest grid cell
    Discrete,
    /// Keep the real-valued target
    Continuous,
}

impl std::fmt::Display for StepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepMode::Discrete => write!(f, "DISCRETE"),
            StepMode::Continuous => write!(f, "CONTINUOUS"),
        }
    }
}

/// Workspace with robot geometry and the simulation step
#[derive(Debug, Clone)]
pub struct Environment {
    geometry: RobotGeometry,
}

impl Environment {
    pub fn new(config: Arc<PlannerConfig>) -> PlannerResult<Self> {
        Ok(Self {
            geometry: RobotGeometry::new(config)?,
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        self.geometry.config()
    }

    pub fn geometry(&self) -> &RobotGeometry {
        &self.geometry
    }

    pub fn footprint(&self, pose: &ContinuousPose) -> Polygon2D {
        self.geometry.footprint(pose)
    }

    pub fn is_collision(&self, pose: &ContinuousPose) -> bool {
        self.geometry.is_collision(pose)
    }

    pub fn is_goal(&self, pose: &ContinuousPose) -> bool {
        self.geometry.is_goal(pose)
    }

    /// Apply `action` at `pose`; the goal is absorbing with zero reward
    pub fn env_step(
        &self,
        pose: &ContinuousPose,
        action: Action,
        mode: StepMode,
    ) -> PlannerResult<Transition<ContinuousPose>> {
        if self.is_goal(pose) {
            return Ok(Transition::new(*pose, 0.0, true));
        }

        let config = self.config();
        let n_theta = config.n_theta;
        let (next, reward) = match action {
            Action::TurnLeft => (
                ContinuousPose::new(pose.x, pose.y, (pose.theta + n_theta - 1) % n_theta),
                config.rewards.rotate,
            ),
            Action::TurnRight => (
                ContinuousPose::new(pose.x, pose.y, (pose.theta + 1) % n_theta),
                config.rewards.rotate,
            ),
            Action::MoveForward => {
                let heading = config.heading(pose.theta);
                let cont_x = pose.x + config.step_size * heading.cos();
                let cont_y = pose.y + config.step_size * heading.sin();
                let next = match mode {
                    StepMode::Continuous => ContinuousPose::new(cont_x, cont_y, pose.theta),
                    StepMode::Discrete => {
                        ContinuousPose::new(cont_x.round_ties_even(), cont_y.round_ties_even(), pose.theta)
                    }
                };
                (next, config.rewards.step)
            }
        };

        if self.is_collision(&next) {
            Ok(Transition::new(next, config.rewards.collision, true))
        } else if self.is_goal(&next) {
            Ok(Transition::new(next, config.rewards.goal, true))
        } else {
            Ok(Transition::new(next, reward, false))
        }
    }

    /// Bind a step mode so the environment can be driven through `TransitionModel`
    pub fn simulator(&self, mode: StepMode) -> Simulator<'_> {
        Simulator { env: self, mode }
    }
}

/// Environment with a fixed step mode
#[derive(Debug, Clone, Copy)]
pub struct Simulator<'a> {
    env: &'a Environment,
    mode: StepMode,
}

impl TransitionModel for Simulator<'_> {
    type State = ContinuousPose;
    type Action = Action;

    fn step(&self, state: &ContinuousPose, action: Action) -> PlannerResult<Transition<ContinuousPose>> {
        self.env.env_step(state, action, self.mode)
    }

    fn is_goal(&self, state: &ContinuousPose) -> bool {
        self.env.is_goal(state)
    }
}
