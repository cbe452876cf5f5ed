// Value iteration planning for a rectangular wheeled robot
//
// Loads the cached value/policy grids (or trains and caches them), runs the
// policy sanity checks, then replays the policy from a few start poses in
// both discrete and continuous mode. Pass `--plot` to write one PNG per
// rollout.

use std::sync::Arc;

use itertools::iproduct;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use value_iteration_planning::path_planning::value_iteration::{
    default_policy_checks, run_policy_checks, simulate_policy, ContinuousPose, DiscreteState, Environment,
    ModelPaths, ModelSource, PlannerConfig, Rollout, StepMode, ValueIterationPlanner, NO_ACTION,
};
use value_iteration_planning::utils::{colors, PathStyle, Visualizer};
use value_iteration_planning::PlannerResult;

fn plot_rollout(env: &Environment, rollout: &Rollout, title: &str) -> PlannerResult<()> {
    let config = env.config();
    let mut vis = Visualizer::new();
    vis.set_title(title);
    vis.plot_workspace(config.nx, config.ny);
    vis.plot_obstacles(&config.obstacles);
    vis.plot_footprint(&env.footprint(&ContinuousPose::from(config.goal)), colors::GOAL, "Goal");

    if let Some(start) = rollout.path.first() {
        vis.plot_start(start.position());
        vis.plot_footprint(&env.footprint(start), colors::START, "Start footprint");
    }
    if let Some(last) = rollout.path.last() {
        vis.plot_footprint(&env.footprint(last), colors::ROBOT, "Final footprint");
    }
    vis.plot_goal(ContinuousPose::from(config.goal).position());
    vis.plot_path(&rollout.to_path2d(), &PathStyle::new(colors::PATH, "Trajectory"));

    let file = format!("{}.png", title.to_lowercase().replace(' ', "_"));
    vis.save_png(&file, 800, 800)?;
    info!(file = %file, "plot saved");
    Ok(())
}

fn main() -> PlannerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let plot = std::env::args().any(|a| a == "--plot");

    let config = Arc::new(PlannerConfig::default());
    let env = Environment::new(config.clone())?;
    let mut planner = ValueIterationPlanner::new(config.clone())?;

    let (_maps, source) = planner.load_or_train(env.geometry(), &ModelPaths::default())?;
    match source {
        ModelSource::Loaded => info!("using cached model"),
        ModelSource::Trained(outcome) => info!(
            sweeps = outcome.sweeps(),
            residual = outcome.residual(),
            converged = outcome.is_converged(),
            "trained new model"
        ),
    }

    let report = run_policy_checks(&planner, &default_policy_checks(&config));
    info!(passed = report.passed(), total = report.total(), "policy checks completed");
    for (action, count) in planner.action_histogram() {
        info!(action, states = count, "policy action summary");
    }

    let starts = [
        DiscreteState::new(10, 10, 0),
        DiscreteState::new(50, 50, 18),
        DiscreteState::new(70, 72, 0),
    ];
    let mut runs = 0;
    let mut successes = 0;
    for ((i, start), mode) in iproduct!(starts.iter().enumerate(), [StepMode::Discrete, StepMode::Continuous]) {
        if planner.policy()[*start] == NO_ACTION {
            warn!(start = %start, "skipping simulation, start has no action");
            continue;
        }
        let rollout = simulate_policy(&planner, &env, ContinuousPose::from(*start), mode, None)?;
        info!(
            run = i + 1,
            %mode,
            outcome = %rollout.outcome,
            steps = rollout.steps,
            total_reward = rollout.total_reward,
            length = rollout.to_path2d().total_length(),
            "simulation finished"
        );
        runs += 1;
        if rollout.is_success() {
            successes += 1;
        }
        if plot {
            plot_rollout(&env, &rollout, &format!("sim {} {}", i + 1, mode))?;
        }
    }
    info!(runs, successes, "simulations completed");
    Ok(())
}
