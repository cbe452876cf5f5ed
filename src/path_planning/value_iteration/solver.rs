//! Value-iteration solver
//!
//! Synchronous (Jacobi) Bellman sweeps over every discrete pose, followed by
//! one greedy extraction pass. Each sweep reads only the snapshot taken at
//! its start, so the per-state updates run as a rayon parallel iterator and
//! the end of that iterator is the barrier between sweeps.
//!
//! Reference: Bellman, R. (1957). "Dynamic Programming"

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::common::{PlannerError, PlannerResult};

use super::collision_map::CollisionMaps;
use super::config::PlannerConfig;
use super::geometry::RobotGeometry;
use super::persistence::{self, ModelPaths};
use super::state::{Action, DiscreteState, Grid3, NO_ACTION};
use super::transition::PlanningModel;

/// Progress report handed to the sweep observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepStats {
    /// 1-based sweep number
    pub sweep: usize,
    /// Bellman residual max_s |V[s] - V_old[s]|
    pub residual: f64,
    /// Wall time of this sweep
    pub elapsed: Duration,
}

/// How a solve ended; the policy is extracted in every case
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveOutcome {
    /// Residual dropped below the convergence threshold
    Converged { sweeps: usize, residual: f64 },
    /// `max_sweeps` ran out first
    MaxSweepsReached { sweeps: usize, residual: f64 },
    /// The observer asked to stop between sweeps
    Cancelled { sweeps: usize, residual: f64 },
}

impl SolveOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolveOutcome::Converged { .. })
    }

    pub fn sweeps(&self) -> usize {
        match *self {
            SolveOutcome::Converged { sweeps, .. }
            | SolveOutcome::MaxSweepsReached { sweeps, .. }
            | SolveOutcome::Cancelled { sweeps, .. } => sweeps,
        }
    }

    pub fn residual(&self) -> f64 {
        match *self {
            SolveOutcome::Converged { residual, .. }
            | SolveOutcome::MaxSweepsReached { residual, .. }
            | SolveOutcome::Cancelled { residual, .. } => residual,
        }
    }
}

/// Where the planner's grids came from in `load_or_train`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelSource {
    Loaded,
    Trained(SolveOutcome),
}

/// Owner of the value grid V and the policy grid
pub struct ValueIterationPlanner {
    config: Arc<PlannerConfig>,
    values: Grid3<f64>,
    policy: Grid3<i8>,
}

impl ValueIterationPlanner {
    /// V starts at 0 everywhere, the policy at -1 (no action)
    pub fn new(config: Arc<PlannerConfig>) -> PlannerResult<Self> {
        config.validate()?;
        let shape = config.shape();
        Ok(Self {
            config,
            values: Grid3::new(shape, 0.0),
            policy: Grid3::new(shape, NO_ACTION),
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn values(&self) -> &Grid3<f64> {
        &self.values
    }

    pub fn policy(&self) -> &Grid3<i8> {
        &self.policy
    }

    /// V[x, y, theta]
    pub fn value_at(&self, x: i64, y: i64, theta: i64) -> PlannerResult<f64> {
        self.values.get_checked(x, y, theta).copied()
    }

    /// policy[x, y, theta] as stored (-1 or an action id)
    pub fn policy_at(&self, x: i64, y: i64, theta: i64) -> PlannerResult<i8> {
        self.policy.get_checked(x, y, theta).copied()
    }

    /// Decoded policy action of an in-grid state
    pub fn action_at(&self, state: &DiscreteState) -> PlannerResult<Option<Action>> {
        let value = self.policy_at(state.x as i64, state.y as i64, state.theta as i64)?;
        Action::from_policy_value(value)
    }

    /// Number of cells per policy value
    pub fn action_histogram(&self) -> BTreeMap<i8, usize> {
        let mut counts = BTreeMap::new();
        for &p in self.policy.as_slice() {
            *counts.entry(p).or_insert(0) += 1;
        }
        counts
    }

    /// Build the collision and goal maps for this planner's configuration
    pub fn precompute_collision_map(&self, geometry: &RobotGeometry) -> PlannerResult<CollisionMaps> {
        if geometry.config().shape() != self.config.shape() {
            return Err(PlannerError::InvalidParameter(
                "geometry was built for a different grid".to_string(),
            ));
        }
        CollisionMaps::compute(geometry)
    }

    /// Sweep to convergence (or `max_sweeps`), then extract the policy
    pub fn run_value_iteration(&mut self, maps: &CollisionMaps) -> PlannerResult<SolveOutcome> {
        self.solve_with(maps, |_| ControlFlow::Continue(()))
    }

    /// `run_value_iteration` with an observer called after every sweep
    ///
    /// Returning `ControlFlow::Break` from the observer stops before the next
    /// sweep; the current V is kept and the policy is still extracted.
    pub fn solve_with<F>(&mut self, maps: &CollisionMaps, mut observer: F) -> PlannerResult<SolveOutcome>
    where
        F: FnMut(&SweepStats) -> ControlFlow<()>,
    {
        self.check_maps(maps)?;
        info!(
            states = self.config.num_states(),
            gamma = self.config.gamma,
            threshold = self.config.convergence_threshold,
            "starting value iteration"
        );
        let start = Instant::now();
        let mut v_old = self.values.clone();
        let mut outcome = None;
        let mut residual = f64::INFINITY;

        for sweep in 1..=self.config.max_sweeps {
            let sweep_start = Instant::now();
            v_old.as_mut_slice().copy_from_slice(self.values.as_slice());
            residual = self.sweep(maps, &v_old)?;

            let stats = SweepStats {
                sweep,
                residual,
                elapsed: sweep_start.elapsed(),
            };
            debug!(sweep, residual, "sweep done");
            let flow = observer(&stats);

            if residual < self.config.convergence_threshold {
                outcome = Some(SolveOutcome::Converged { sweeps: sweep, residual });
                break;
            }
            if flow.is_break() {
                info!(sweep, residual, "value iteration cancelled");
                outcome = Some(SolveOutcome::Cancelled { sweeps: sweep, residual });
                break;
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            warn!(
                max_sweeps = self.config.max_sweeps,
                residual, "value iteration did not converge"
            );
            SolveOutcome::MaxSweepsReached {
                sweeps: self.config.max_sweeps,
                residual,
            }
        });
        info!(
            sweeps = outcome.sweeps(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "value iteration finished"
        );

        self.extract_policy(maps)?;
        Ok(outcome)
    }

    /// One synchronous Bellman sweep reading `v_old`; returns the residual
    fn sweep(&mut self, maps: &CollisionMaps, v_old: &Grid3<f64>) -> PlannerResult<f64> {
        let model = PlanningModel::new(&self.config, maps);
        let rewards = self.config.rewards;
        let gamma = self.config.gamma;

        self.values.par_try_fill_with(|s| -> PlannerResult<f64> {
            if maps.is_collision(&s) {
                return Ok(rewards.collision);
            }
            if maps.is_goal(&s) {
                return Ok(rewards.goal);
            }
            let q = q_values(&model, &s, v_old, gamma)?;
            Ok(q.into_iter().map(OrderedFloat).max().map_or(f64::NEG_INFINITY, |m| m.0))
        })?;

        Ok(self
            .values
            .as_slice()
            .par_iter()
            .zip(v_old.as_slice().par_iter())
            .map(|(new, old)| (new - old).abs())
            .reduce(|| 0.0, f64::max))
    }

    /// Greedy policy from the current V; ties go to the lowest action id
    pub fn extract_policy(&mut self, maps: &CollisionMaps) -> PlannerResult<()> {
        self.check_maps(maps)?;
        info!("extracting optimal policy");
        let model = PlanningModel::new(&self.config, maps);
        let gamma = self.config.gamma;
        let values = &self.values;

        self.policy.par_try_fill_with(|s| -> PlannerResult<i8> {
            if maps.is_terminal(&s) {
                return Ok(NO_ACTION);
            }
            let q = q_values(&model, &s, values, gamma)?;
            let best = Action::ALL
                .iter()
                .zip(q)
                .max_by_key(|&(a, q)| (OrderedFloat(q), Reverse(a.id())))
                .map_or(NO_ACTION, |(a, _)| a.id());
            Ok(best)
        })
    }

    pub fn save(&self, paths: &ModelPaths) -> PlannerResult<()> {
        persistence::save_model(&self.values, &self.policy, paths)
    }

    /// Replace V and the policy from disk; `Ok(false)` leaves both untouched
    pub fn load(&mut self, paths: &ModelPaths) -> PlannerResult<bool> {
        match persistence::load_model(paths, self.config.shape())? {
            Some((values, policy)) => {
                self.values = values;
                self.policy = policy;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load persisted grids if present, otherwise train and save
    ///
    /// The maps are rebuilt from the geometry either way, since they are not
    /// persisted.
    pub fn load_or_train(
        &mut self,
        geometry: &RobotGeometry,
        paths: &ModelPaths,
    ) -> PlannerResult<(CollisionMaps, ModelSource)> {
        if self.load(paths)? {
            let maps = self.precompute_collision_map(geometry)?;
            return Ok((maps, ModelSource::Loaded));
        }
        let maps = self.precompute_collision_map(geometry)?;
        let outcome = self.run_value_iteration(&maps)?;
        self.save(paths)?;
        Ok((maps, ModelSource::Trained(outcome)))
    }

    fn check_maps(&self, maps: &CollisionMaps) -> PlannerResult<()> {
        if maps.shape() != self.config.shape() {
            return Err(PlannerError::InvalidParameter(format!(
                "collision map shape {:?} does not match grid {:?}",
                maps.shape(),
                self.config.shape()
            )));
        }
        Ok(())
    }
}

/// Q(s, a) for every action: r if terminal, else r + gamma * V[next]
fn q_values(
    model: &PlanningModel<'_>,
    state: &DiscreteState,
    values: &Grid3<f64>,
    gamma: f64,
) -> PlannerResult<[f64; 3]> {
    let mut q = [f64::NEG_INFINITY; 3];
    for (slot, action) in q.iter_mut().zip(Action::ALL) {
        let t = model.plan_step(state, action)?;
        *slot = if t.terminated {
            t.reward
        } else {
            t.reward + gamma * values[t.next]
        };
    }
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Polygon2D;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn small_config(obstacles: Vec<Polygon2D>) -> Arc<PlannerConfig> {
        Arc::new(PlannerConfig {
            nx: 5,
            ny: 5,
            n_theta: 4,
            robot_length: 1.0,
            robot_width: 0.5,
            obstacles,
            goal: DiscreteState::new(3, 3, 1),
            ..Default::default()
        })
    }

    fn solved(config: Arc<PlannerConfig>) -> (ValueIterationPlanner, CollisionMaps, SolveOutcome) {
        let geometry = RobotGeometry::new(config.clone()).unwrap();
        let mut planner = ValueIterationPlanner::new(config).unwrap();
        let maps = planner.precompute_collision_map(&geometry).unwrap();
        let outcome = planner.run_value_iteration(&maps).unwrap();
        (planner, maps, outcome)
    }

    #[test]
    fn test_converges_on_open_grid() {
        let (planner, _, outcome) = solved(small_config(Vec::new()));
        assert!(outcome.is_converged());
        assert!(outcome.residual() < planner.config().convergence_threshold);
        assert!(outcome.sweeps() < 100, "took {} sweeps", outcome.sweeps());
    }

    #[test]
    fn test_terminal_states_are_pinned() {
        let config = small_config(vec![Polygon2D::rectangle(2.0, 0.0, 2.2, 2.0)]);
        let (planner, maps, _) = solved(config.clone());
        let rewards = config.rewards;

        let mut collisions = 0;
        for s in planner.values().states() {
            if maps.is_collision(&s) {
                collisions += 1;
                assert_eq!(planner.values()[s], rewards.collision);
                assert_eq!(planner.policy()[s], NO_ACTION);
            } else if maps.is_goal(&s) {
                assert_eq!(planner.values()[s], rewards.goal);
                assert_eq!(planner.policy()[s], NO_ACTION);
            } else {
                assert_ne!(planner.policy()[s], NO_ACTION, "free state {} has no action", s);
            }
        }
        assert!(collisions > 0);
    }

    #[test]
    fn test_greedy_policy_reaches_goal() {
        let config = small_config(Vec::new());
        let (planner, maps, _) = solved(config.clone());
        let model = PlanningModel::new(&config, &maps);

        for start in planner.values().states().filter(|s| !maps.is_terminal(s)) {
            let mut visited = HashSet::new();
            let mut state = start;
            let mut reached = false;
            for _ in 0..config.num_states() {
                assert!(visited.insert(state), "revisited {} starting from {}", state, start);
                let action = planner.action_at(&state).unwrap().unwrap();
                let t = model.plan_step(&state, action).unwrap();
                if t.terminated {
                    assert_eq!(t.next, config.goal, "collided starting from {}", start);
                    reached = true;
                    break;
                }
                state = t.next;
            }
            assert!(reached, "no goal from {}", start);
        }
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let (mut planner, maps, _) = solved(small_config(Vec::new()));
        let first = planner.policy().clone();
        planner.extract_policy(&maps).unwrap();
        assert_eq!(planner.policy(), &first);
    }

    #[test]
    fn test_ties_go_to_lowest_action() {
        // gamma = 0 makes both turns worth exactly R_ROTATE everywhere
        let config = Arc::new(PlannerConfig {
            gamma: 0.0,
            rewards: crate::path_planning::value_iteration::config::Rewards {
                step: -1.0,
                ..Default::default()
            },
            ..(*small_config(Vec::new())).clone()
        });
        let (planner, maps, _) = solved(config);
        let s = DiscreteState::new(1, 2, 0);
        assert!(!maps.is_terminal(&s));
        assert_eq!(planner.action_at(&s).unwrap(), Some(Action::TurnLeft));
    }

    #[test]
    fn test_sweep_cap_reports_non_convergence() {
        let config = Arc::new(PlannerConfig {
            max_sweeps: 2,
            convergence_threshold: 1e-12,
            ..(*small_config(Vec::new())).clone()
        });
        let (planner, _, outcome) = solved(config);
        assert!(matches!(outcome, SolveOutcome::MaxSweepsReached { sweeps: 2, .. }));
        assert!(!outcome.is_converged());
        assert!(planner.action_histogram().len() > 1);
    }

    #[test]
    fn test_first_sweep_reads_only_previous_values() {
        let config = small_config(Vec::new());
        let geometry = RobotGeometry::new(config.clone()).unwrap();
        let mut planner = ValueIterationPlanner::new(config.clone()).unwrap();
        let maps = planner.precompute_collision_map(&geometry).unwrap();

        let mut first = None;
        planner
            .solve_with(&maps, |stats| {
                first = Some(*stats);
                ControlFlow::Break(())
            })
            .unwrap();
        let first = first.unwrap();
        assert_eq!(first.sweep, 1);

        // From V = 0 every free state is worth its best immediate reward
        let model = PlanningModel::new(&config, &maps);
        let rewards = config.rewards;
        for s in planner.values().states() {
            let expected = if maps.is_collision(&s) {
                rewards.collision
            } else if maps.is_goal(&s) {
                rewards.goal
            } else {
                Action::ALL
                    .iter()
                    .map(|&a| model.plan_step(&s, a).unwrap().reward)
                    .fold(f64::NEG_INFINITY, f64::max)
            };
            assert_eq!(planner.values()[s], expected, "state {}", s);
        }

        // Heading 180 degrees; the forward cell (3, 3, 2) is one turn from the
        // goal and comes earlier in storage order
        let s = DiscreteState::new(4, 3, 2);
        assert!(!maps.is_terminal(&s));
        assert_eq!(planner.values()[s], rewards.step);

        let max_change = planner
            .values()
            .as_slice()
            .iter()
            .map(|v| v.abs())
            .fold(0.0, f64::max);
        assert_eq!(first.residual, max_change);
    }

    #[test]
    fn test_observer_can_cancel() {
        let config = small_config(Vec::new());
        let geometry = RobotGeometry::new(config.clone()).unwrap();
        let mut planner = ValueIterationPlanner::new(config).unwrap();
        let maps = planner.precompute_collision_map(&geometry).unwrap();

        let mut seen = Vec::new();
        let outcome = planner
            .solve_with(&maps, |stats| {
                seen.push(stats.sweep);
                if stats.sweep == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(matches!(outcome, SolveOutcome::Cancelled { sweeps: 3, .. }));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let config = small_config(Vec::new());
        let (planner, _, _) = solved(config.clone());
        planner.save(&paths).unwrap();

        let mut fresh = ValueIterationPlanner::new(config).unwrap();
        assert!(fresh.load(&paths).unwrap());
        for s in planner.values().states() {
            assert_eq!(fresh.values()[s].to_bits(), planner.values()[s].to_bits());
            assert_eq!(fresh.policy()[s], planner.policy()[s]);
        }
    }

    #[test]
    fn test_load_without_files_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let mut planner = ValueIterationPlanner::new(small_config(Vec::new())).unwrap();
        assert!(!planner.load(&paths).unwrap());
        assert!(planner.values().as_slice().iter().all(|&v| v == 0.0));
        assert!(planner.policy().as_slice().iter().all(|&p| p == NO_ACTION));
    }

    #[test]
    fn test_load_or_train() {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        let config = small_config(Vec::new());
        let geometry = RobotGeometry::new(config.clone()).unwrap();

        let mut planner = ValueIterationPlanner::new(config.clone()).unwrap();
        let (_, source) = planner.load_or_train(&geometry, &paths).unwrap();
        assert!(matches!(source, ModelSource::Trained(o) if o.is_converged()));
        assert!(paths.exist());

        let mut again = ValueIterationPlanner::new(config).unwrap();
        let (maps, source) = again.load_or_train(&geometry, &paths).unwrap();
        assert_eq!(source, ModelSource::Loaded);
        assert_eq!(again.policy(), planner.policy());
        assert!(maps.is_goal(&again.config().goal));
    }

    #[test]
    fn test_indexed_access() {
        let (planner, _, _) = solved(small_config(Vec::new()));
        let goal = planner.config().goal;
        assert_eq!(planner.policy_at(goal.x as i64, goal.y as i64, goal.theta as i64).unwrap(), NO_ACTION);
        assert_eq!(planner.value_at(goal.x as i64, goal.y as i64, goal.theta as i64).unwrap(), 100.0);
        assert!(matches!(planner.policy_at(5, 0, 0), Err(PlannerError::OutOfBounds { .. })));
        assert!(planner.value_at(0, 0, -1).is_err());
    }
}
