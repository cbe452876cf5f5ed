//! Planning-grade transition model
//!
//! The decision process the solver backs up over. Everything is grid exact:
//! forward motion always snaps to the nearest cell and collision/goal tests
//! read the precomputed maps. Snapping can bend the executed direction away
//! from the heading, so MOVE_FORWARD pays an extra `drift_penalty * drift_error`
//! where `drift_error = max(0, 1 - cos(angle between heading and executed move))`.

use nalgebra::Vector2;

use crate::common::{PlannerError, PlannerResult, Transition, TransitionModel};

use super::collision_map::CollisionMaps;
use super::config::PlannerConfig;
use super::state::{snap, Action, DiscreteState};

/// Table-driven transition function over `DiscreteState`
#[derive(Debug, Clone, Copy)]
pub struct PlanningModel<'a> {
    config: &'a PlannerConfig,
    maps: &'a CollisionMaps,
}

impl<'a> PlanningModel<'a> {
    pub fn new(config: &'a PlannerConfig, maps: &'a CollisionMaps) -> Self {
        Self { config, maps }
    }

    /// Apply `action` in `state`
    ///
    /// A move that leaves the grid terminates with the collision reward and
    /// reports the current cell as `next`, since the target has no cell.
    pub fn plan_step(&self, state: &DiscreteState, action: Action) -> PlannerResult<Transition<DiscreteState>> {
        if !self.maps.contains(state) {
            return Err(PlannerError::OutOfBounds {
                x: state.x as i64,
                y: state.y as i64,
                theta: state.theta as i64,
            });
        }
        if self.maps.is_goal(state) {
            return Ok(Transition::new(*state, 0.0, true));
        }

        let rewards = &self.config.rewards;
        let n_theta = self.config.n_theta;
        let (next_x, next_y, next_theta, base_reward) = match action {
            Action::TurnLeft => (
                state.x as i64,
                state.y as i64,
                (state.theta + n_theta - 1) % n_theta,
                rewards.rotate,
            ),
            Action::TurnRight => (
                state.x as i64,
                state.y as i64,
                (state.theta + 1) % n_theta,
                rewards.rotate,
            ),
            Action::MoveForward => {
                let (nx, ny) = self.forward_cell(state);
                let drift = rewards.drift_penalty * self.drift_error(state);
                (nx, ny, state.theta, rewards.step + drift)
            }
        };

        let in_grid = next_x >= 0
            && next_y >= 0
            && (next_x as usize) < self.config.nx
            && (next_y as usize) < self.config.ny;
        if !in_grid {
            return Ok(Transition::new(*state, rewards.collision, true));
        }

        let next = DiscreteState::new(next_x as usize, next_y as usize, next_theta);
        if self.maps.is_collision(&next) {
            Ok(Transition::new(next, rewards.collision, true))
        } else if self.maps.is_goal(&next) {
            Ok(Transition::new(next, rewards.goal, true))
        } else {
            Ok(Transition::new(next, base_reward, false))
        }
    }

    /// Cell reached by MOVE_FORWARD before any collision test (may lie off-grid)
    pub fn forward_cell(&self, state: &DiscreteState) -> (i64, i64) {
        let heading = self.config.heading(state.theta);
        let cont_x = state.x as f64 + self.config.step_size * heading.cos();
        let cont_y = state.y as f64 + self.config.step_size * heading.sin();
        (snap(cont_x), snap(cont_y))
    }

    /// Directional mismatch between the heading and the snapped forward move
    ///
    /// Zero when the move snaps back onto the current cell.
    pub fn drift_error(&self, state: &DiscreteState) -> f64 {
        let (next_x, next_y) = self.forward_cell(state);
        let moved = Vector2::new((next_x - state.x as i64) as f64, (next_y - state.y as i64) as f64);
        let norm = moved.norm();
        if norm == 0.0 {
            return 0.0;
        }
        let heading = self.config.heading(state.theta);
        let intended = Vector2::new(heading.cos(), heading.sin());
        (1.0 - intended.dot(&(moved / norm))).max(0.0)
    }
}

impl TransitionModel for PlanningModel<'_> {
    type State = DiscreteState;
    type Action = Action;

    fn step(&self, state: &DiscreteState, action: Action) -> PlannerResult<Transition<DiscreteState>> {
        self.plan_step(state, action)
    }

    fn is_goal(&self, state: &DiscreteState) -> bool {
        self.maps.is_goal(state)
    }
}
