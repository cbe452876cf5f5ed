//! Policy replay and policy sanity checks
//!
//! A rollout repeatedly rounds the pose to a cell, reads the policy there and
//! applies the simulation-grade step until the goal, a collision, a stall
//! (policy -1 away from the goal) or the step limit. Rollouts only read the
//! finished policy, so independent rollouts can run concurrently.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::common::{Path2D, PlannerResult, TransitionModel};

use super::collision_map::CollisionMaps;
use super::config::PlannerConfig;
use super::environment::{Environment, StepMode};
use super::solver::ValueIterationPlanner;
use super::state::{snap, Action, ContinuousPose, DiscreteState, Grid3};

/// How a rollout ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOutcome {
    GoalReached,
    Collision,
    /// The policy had no action at a non-goal pose
    Stalled,
    Timeout,
}

impl fmt::Display for RolloutOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RolloutOutcome::GoalReached => "SUCCESS",
            RolloutOutcome::Collision => "COLLISION",
            RolloutOutcome::Stalled => "FAILURE",
            RolloutOutcome::Timeout => "TIMEOUT",
        };
        write!(f, "{}", name)
    }
}

/// Trajectory produced by following a policy
#[derive(Debug, Clone)]
pub struct Rollout {
    /// Visited poses, starting with the start pose
    pub path: Vec<ContinuousPose>,
    pub outcome: RolloutOutcome,
    /// Number of actions applied
    pub steps: usize,
    /// Undiscounted sum of rewards
    pub total_reward: f64,
}

impl Rollout {
    pub fn to_path2d(&self) -> Path2D {
        Path2D::from_points(self.path.iter().map(|p| p.position()).collect())
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RolloutOutcome::GoalReached
    }
}

/// Follow `policy` from `start` through any pose-based transition model
pub fn rollout<M>(policy: &Grid3<i8>, model: &M, start: ContinuousPose, max_steps: usize) -> PlannerResult<Rollout>
where
    M: TransitionModel<State = ContinuousPose, Action = Action>,
{
    let [nx, ny, n_theta] = policy.shape();
    let mut path = vec![start];
    let mut pose = start;
    let mut total_reward = 0.0;

    for step in 0..max_steps {
        let cell = pose.to_discrete(nx, ny, n_theta);
        let action = match Action::from_policy_value(policy[cell])? {
            Some(action) => action,
            None => {
                let outcome = if model.is_goal(&pose) {
                    RolloutOutcome::GoalReached
                } else {
                    RolloutOutcome::Stalled
                };
                return Ok(Rollout { path, outcome, steps: step, total_reward });
            }
        };

        let t = model.step(&pose, action)?;
        total_reward += t.reward;
        pose = t.next;
        path.push(pose);

        if t.terminated {
            let outcome = if model.is_goal(&pose) {
                RolloutOutcome::GoalReached
            } else {
                RolloutOutcome::Collision
            };
            return Ok(Rollout { path, outcome, steps: step + 1, total_reward });
        }
    }

    Ok(Rollout {
        path,
        outcome: RolloutOutcome::Timeout,
        steps: max_steps,
        total_reward,
    })
}

/// Replay the planner's policy in the simulation environment
///
/// `max_steps` defaults to nx * ny.
pub fn simulate_policy(
    planner: &ValueIterationPlanner,
    env: &Environment,
    start: ContinuousPose,
    mode: StepMode,
    max_steps: Option<usize>,
) -> PlannerResult<Rollout> {
    let config = planner.config();
    let max_steps = max_steps.unwrap_or(config.nx * config.ny);
    info!(%start, %mode, "starting simulation");

    let result = rollout(planner.policy(), &env.simulator(mode), start, max_steps)?;
    match result.outcome {
        RolloutOutcome::GoalReached => info!(steps = result.steps, "goal reached"),
        RolloutOutcome::Collision | RolloutOutcome::Stalled => {
            let last = result.path.last().copied().unwrap_or(start);
            warn!(outcome = %result.outcome, at = %last, steps = result.steps, "rollout failed")
        }
        RolloutOutcome::Timeout => warn!(max_steps, "rollout step limit reached"),
    }
    Ok(result)
}

/// Draw up to `count` distinct collision-free, non-goal states
///
/// Gives up after `100 * count` draws, so a nearly blocked grid may return
/// fewer states.
pub fn sample_free_starts(maps: &CollisionMaps, count: usize, seed: u64) -> Vec<DiscreteState> {
    let [nx, ny, n_theta] = maps.shape();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut starts = Vec::with_capacity(count);
    for _ in 0..count.saturating_mul(100) {
        if starts.len() == count {
            break;
        }
        let s = DiscreteState::new(rng.gen_range(0..nx), rng.gen_range(0..ny), rng.gen_range(0..n_theta));
        if !maps.is_terminal(&s) && !starts.contains(&s) {
            starts.push(s);
        }
    }
    starts
}

/// What a policy cell is expected to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyExpectation {
    NoAction,
    AnyAction,
    Exactly(Action),
}

impl PolicyExpectation {
    pub fn accepts(&self, value: Option<Action>) -> bool {
        match self {
            PolicyExpectation::NoAction => value.is_none(),
            PolicyExpectation::AnyAction => value.is_some(),
            PolicyExpectation::Exactly(a) => value == Some(*a),
        }
    }
}

/// Named expectation on one policy cell
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyCheck {
    pub name: String,
    pub cell: (i64, i64, i64),
    pub expect: PolicyExpectation,
}

impl PolicyCheck {
    pub fn new(name: &str, cell: (i64, i64, i64), expect: PolicyExpectation) -> Self {
        Self {
            name: name.to_string(),
            cell,
            expect,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    Passed(i8),
    Failed(i8),
    /// Cell could not be read (out of range or invalid id)
    Error(String),
}

#[derive(Debug, Clone)]
pub struct PolicyReport {
    pub results: Vec<(PolicyCheck, CheckStatus)>,
}

impl PolicyReport {
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, status)| matches!(status, CheckStatus::Passed(_)))
            .count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }
}

/// Sanity checks for the default scenario
///
/// A wall cell and the goal must hold no action, two open cells must hold
/// one, and the cell one forward step behind the goal (along the goal
/// heading) must drive straight into it.
pub fn default_policy_checks(config: &PlannerConfig) -> Vec<PolicyCheck> {
    let goal = config.goal;
    let (gx, gy, gt) = (goal.x as i64, goal.y as i64, goal.theta as i64);
    let heading = config.heading(goal.theta);
    let behind = (
        gx - snap(config.step_size * heading.cos()),
        gy - snap(config.step_size * heading.sin()),
        gt,
    );
    vec![
        PolicyCheck::new("collision (30, 30, 0)", (30, 30, 0), PolicyExpectation::NoAction),
        PolicyCheck::new("goal", (gx, gy, gt), PolicyExpectation::NoAction),
        PolicyCheck::new("free (10, 10, 0)", (10, 10, 0), PolicyExpectation::AnyAction),
        PolicyCheck::new("free (50, 50, 18)", (50, 50, 18), PolicyExpectation::AnyAction),
        PolicyCheck::new("pre-goal forward", behind, PolicyExpectation::Exactly(Action::MoveForward)),
    ]
}

/// Evaluate every check against the planner's policy
pub fn run_policy_checks(planner: &ValueIterationPlanner, checks: &[PolicyCheck]) -> PolicyReport {
    let results = checks
        .iter()
        .map(|check| {
            let (x, y, theta) = check.cell;
            let status = match planner
                .policy_at(x, y, theta)
                .and_then(|v| Action::from_policy_value(v).map(|a| (v, a)))
            {
                Ok((v, action)) if check.expect.accepts(action) => CheckStatus::Passed(v),
                Ok((v, _)) => CheckStatus::Failed(v),
                Err(e) => CheckStatus::Error(e.to_string()),
            };
            match &status {
                CheckStatus::Passed(v) => info!(check = %check.name, action = v, "policy check passed"),
                CheckStatus::Failed(v) => warn!(check = %check.name, action = v, "policy check failed"),
                CheckStatus::Error(e) => warn!(check = %check.name, error = %e, "policy check error"),
            }
            (check.clone(), status)
        })
        .collect();
    PolicyReport { results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Polygon2D;
    use crate::path_planning::value_iteration::state::NO_ACTION;
    use std::sync::Arc;

    fn trained() -> (ValueIterationPlanner, Environment, CollisionMaps) {
        let config = Arc::new(PlannerConfig {
            nx: 12,
            ny: 12,
            n_theta: 8,
            robot_length: 1.0,
            robot_width: 0.5,
            obstacles: vec![Polygon2D::rectangle(5.0, 0.0, 6.0, 7.0)],
            goal: DiscreteState::new(9, 3, 6),
            ..Default::default()
        });
        let env = Environment::new(config.clone()).unwrap();
        let mut planner = ValueIterationPlanner::new(config).unwrap();
        let maps = planner.precompute_collision_map(env.geometry()).unwrap();
        planner.run_value_iteration(&maps).unwrap();
        (planner, env, maps)
    }

    #[test]
    fn test_discrete_rollout_reaches_goal() {
        let (planner, env, _) = trained();
        let start = ContinuousPose::new(2.0, 2.0, 0);
        let rollout = simulate_policy(&planner, &env, start, StepMode::Discrete, None).unwrap();

        assert!(rollout.is_success());
        assert_eq!(rollout.path.len(), rollout.steps + 1);
        assert_eq!(rollout.path[0], start);
        assert!(env.is_goal(rollout.path.last().unwrap()));
        // Wall sits between start and goal
        assert!(rollout.path.iter().any(|p| p.y > 7.0));
    }

    #[test]
    fn test_rollout_from_goal_and_collision_cells() {
        let (planner, env, _) = trained();
        let goal = ContinuousPose::from(env.config().goal);
        let at_goal = simulate_policy(&planner, &env, goal, StepMode::Continuous, None).unwrap();
        assert_eq!(at_goal.outcome, RolloutOutcome::GoalReached);
        assert_eq!(at_goal.steps, 0);

        let blocked = ContinuousPose::new(5.0, 3.0, 0);
        let stalled = simulate_policy(&planner, &env, blocked, StepMode::Discrete, None).unwrap();
        assert_eq!(stalled.outcome, RolloutOutcome::Stalled);
        assert_eq!(stalled.path.len(), 1);
    }

    #[test]
    fn test_rollout_step_limit() {
        let (planner, env, _) = trained();
        let start = ContinuousPose::new(2.0, 2.0, 0);
        let rollout = simulate_policy(&planner, &env, start, StepMode::Discrete, Some(1)).unwrap();
        assert_eq!(rollout.outcome, RolloutOutcome::Timeout);
        assert_eq!(rollout.steps, 1);
        assert_eq!(rollout.path.len(), 2);
    }

    #[test]
    fn test_continuous_rollout_terminates() {
        let (planner, env, _) = trained();
        let start = ContinuousPose::new(2.0, 2.0, 0);
        let rollout = simulate_policy(&planner, &env, start, StepMode::Continuous, None).unwrap();
        assert!(rollout.steps <= 144);
        assert_eq!(rollout.to_path2d().len(), rollout.path.len());
    }

    #[test]
    fn test_sample_free_starts() {
        let (planner, _, maps) = trained();
        let starts = sample_free_starts(&maps, 10, 7);
        assert_eq!(starts.len(), 10);
        for s in &starts {
            assert!(!maps.is_terminal(s));
            assert_ne!(planner.policy()[*s], NO_ACTION);
        }
        assert_eq!(starts, sample_free_starts(&maps, 10, 7));
    }

    #[test]
    fn test_default_checks_target_default_goal() {
        let checks = default_policy_checks(&PlannerConfig::default());
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[1].cell, (82, 95, 54));
        // Goal heading is 270 degrees, so the approach cell sits above the goal
        assert_eq!(checks[4].cell, (82, 96, 54));
        assert_eq!(checks[4].expect, PolicyExpectation::Exactly(Action::MoveForward));
    }

    #[test]
    fn test_default_pre_goal_check_passes_on_trained_policy() {
        let (planner, _, _) = trained();
        let checks = default_policy_checks(planner.config());
        assert_eq!(checks[4].cell, (9, 4, 6));
        let report = run_policy_checks(&planner, &checks[4..]);
        assert!(report.all_passed());
    }

    #[test]
    fn test_policy_checks() {
        let (planner, _, _) = trained();
        let goal = planner.config().goal;
        let checks = vec![
            PolicyCheck::new("collision", (5, 3, 0), PolicyExpectation::NoAction),
            PolicyCheck::new("goal", (goal.x as i64, goal.y as i64, goal.theta as i64), PolicyExpectation::NoAction),
            PolicyCheck::new("free", (2, 2, 0), PolicyExpectation::AnyAction),
            PolicyCheck::new("pre-goal", (9, 4, 6), PolicyExpectation::Exactly(Action::MoveForward)),
            PolicyCheck::new("wrong", (2, 2, 0), PolicyExpectation::NoAction),
            PolicyCheck::new("outside", (12, 0, 0), PolicyExpectation::AnyAction),
        ];
        let report = run_policy_checks(&planner, &checks);
        assert_eq!(report.total(), 6);
        assert_eq!(report.passed(), 4);
        assert!(!report.all_passed());
        assert!(matches!(report.results[4].1, CheckStatus::Failed(_)));
        assert!(matches!(report.results[5].1, CheckStatus::Error(_)));
    }
}
