//! Value Iteration Planner Module
//!
//! Plans for a rectangular wheeled robot on a grid of positions and heading
//! bins by solving a deterministic MDP with synchronous value iteration.
//! The robot can turn one heading bin left or right, or move forward one
//! step along its heading; forward moves are snapped to the grid and pay a
//! drift penalty when snapping bends them away from the heading.
//!
//! # Components
//!
//! - `config`: grid, robot, obstacle and reward parameters
//! - `state`: discrete states, continuous poses, actions and dense grids
//! - `geometry`: footprint construction and collision/goal tests
//! - `environment`: simulation-grade step function (discrete or continuous)
//! - `collision_map`: precomputed collision and goal grids
//! - `transition`: planning-grade step function used by the solver
//! - `solver`: value iteration, policy extraction and model caching
//! - `persistence`: binary grid files for values and policy
//! - `simulation`: policy rollouts, policy checks and start sampling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use value_iteration_planning::path_planning::value_iteration::{
//!     simulate_policy, ContinuousPose, Environment, ModelPaths, PlannerConfig, StepMode,
//!     ValueIterationPlanner,
//! };
//!
//! let config = Arc::new(PlannerConfig::default());
//! let env = Environment::new(config.clone()).unwrap();
//! let mut planner = ValueIterationPlanner::new(config).unwrap();
//! planner.load_or_train(env.geometry(), &ModelPaths::default()).unwrap();
//!
//! let start = ContinuousPose::new(10.0, 10.0, 0);
//! let rollout = simulate_policy(&planner, &env, start, StepMode::Discrete, None).unwrap();
//! println!("{} after {} steps", rollout.outcome, rollout.steps);
//! ```
//!
//! # References
//!
//! - Bellman, R. (1957). "Dynamic Programming"
//! - Sutton, R. S. and Barto, A. G. "Reinforcement Learning: An Introduction", ch. 4

pub mod collision_map;
pub mod config;
pub mod environment;
pub mod geometry;
pub mod persistence;
pub mod simulation;
pub mod solver;
pub mod state;
pub mod transition;

pub use collision_map::CollisionMaps;
pub use config::{PlannerConfig, Rewards};
pub use environment::{Environment, Simulator, StepMode};
pub use geometry::RobotGeometry;
pub use persistence::{load_model, save_model, ModelPaths};
pub use simulation::{
    default_policy_checks, rollout, run_policy_checks, sample_free_starts, simulate_policy, CheckStatus,
    PolicyCheck, PolicyExpectation, PolicyReport, Rollout, RolloutOutcome,
};
pub use solver::{ModelSource, SolveOutcome, SweepStats, ValueIterationPlanner};
pub use state::{Action, ContinuousPose, DiscreteState, Grid3, NO_ACTION};
pub use transition::PlanningModel;
