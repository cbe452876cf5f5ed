//! Common traits defining interfaces for planning algorithms

use crate::common::error::PlannerResult;
use crate::common::types::Transition;

/// Deterministic transition function of a discrete-action decision process
pub trait TransitionModel {
    /// State type consumed and produced by this model
    type State;
    /// Action type accepted by this model
    type Action;

    /// Apply `action` in `state`
    fn step(&self, state: &Self::State, action: Self::Action) -> PlannerResult<Transition<Self::State>>;

    /// Whether `state` is the absorbing goal of the process
    fn is_goal(&self, state: &Self::State) -> bool;
}
