//! Precomputed collision and goal maps over the whole state space
//!
//! Every discrete pose is tested against the geometry exactly once. The
//! cells are independent, so the pass runs as a rayon parallel iterator with
//! each worker writing only its own slots.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, info};

use crate::common::{PlannerError, PlannerResult};

use super::geometry::RobotGeometry;
use super::state::{ContinuousPose, DiscreteState, Grid3};

/// Log precomputation progress every this many x-rows
const PROGRESS_EVERY_ROWS: usize = 10;

/// Rows finished when the `cells`-th cell completes, if that lands on a report boundary
fn completed_rows(cells: usize, row_len: usize, every: usize) -> Option<usize> {
    let block = row_len.checked_mul(every)?;
    (block > 0 && cells % block == 0).then(|| cells / row_len)
}

/// Boolean collision and goal grids, immutable once computed
#[derive(Debug, Clone)]
pub struct CollisionMaps {
    collision: Grid3<bool>,
    goal: Grid3<bool>,
}

impl CollisionMaps {
    /// Evaluate the geometry at every state and mark the goal cell
    ///
    /// Fails with `GoalInCollision` if the configured goal pose is itself in
    /// collision.
    pub fn compute(geometry: &RobotGeometry) -> PlannerResult<Self> {
        let config = geometry.config();
        let shape = config.shape();
        info!(nx = shape[0], ny = shape[1], n_theta = shape[2], "pre-calculating collision map");
        let start = Instant::now();

        let row_len = shape[1] * shape[2];
        let done = AtomicUsize::new(0);
        let mut collision = Grid3::new(shape, false);
        collision.par_fill_with(|s| {
            let hit = geometry.is_collision(&ContinuousPose::from(s));
            let cells = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(rows) = completed_rows(cells, row_len, PROGRESS_EVERY_ROWS) {
                debug!(rows, total = shape[0], "collision map progress");
            }
            hit
        });

        let goal_state = config.goal;
        if collision.get(&goal_state).copied().unwrap_or(true) {
            return Err(PlannerError::GoalInCollision {
                x: goal_state.x,
                y: goal_state.y,
                theta: goal_state.theta,
            });
        }
        let mut goal = Grid3::new(shape, false);
        goal[goal_state] = true;

        let maps = Self { collision, goal };
        info!(
            elapsed_s = start.elapsed().as_secs_f64(),
            collisions = maps.count_collisions(),
            "collision map done"
        );
        Ok(maps)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.collision.shape()
    }

    pub fn contains(&self, state: &DiscreteState) -> bool {
        self.collision.contains(state)
    }

    /// Out-of-grid states count as colliding
    pub fn is_collision(&self, state: &DiscreteState) -> bool {
        self.collision.get(state).copied().unwrap_or(true)
    }

    pub fn is_goal(&self, state: &DiscreteState) -> bool {
        self.goal.get(state).copied().unwrap_or(false)
    }

    /// Collision or goal: the states the solver pins instead of updating
    pub fn is_terminal(&self, state: &DiscreteState) -> bool {
        self.is_collision(state) || self.is_goal(state)
    }

    pub fn collision_grid(&self) -> &Grid3<bool> {
        &self.collision
    }

    pub fn goal_grid(&self) -> &Grid3<bool> {
        &self.goal
    }

    pub fn count_collisions(&self) -> usize {
        self.collision.as_slice().iter().filter(|&&c| c).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Polygon2D;
    use crate::path_planning::value_iteration::config::PlannerConfig;
    use std::sync::Arc;

    fn small_config() -> PlannerConfig {
        PlannerConfig {
            nx: 8,
            ny: 6,
            n_theta: 8,
            robot_length: 1.0,
            robot_width: 0.5,
            obstacles: vec![Polygon2D::rectangle(4.0, 0.0, 4.5, 3.0)],
            goal: DiscreteState::new(6, 4, 2),
            ..Default::default()
        }
    }

    #[test]
    fn test_maps_match_geometry() {
        let config = Arc::new(small_config());
        let geometry = RobotGeometry::new(config.clone()).unwrap();
        let maps = CollisionMaps::compute(&geometry).unwrap();

        assert_eq!(maps.shape(), [8, 6, 8]);
        for s in maps.collision_grid().states() {
            assert_eq!(
                maps.is_collision(&s),
                geometry.is_collision(&ContinuousPose::from(s)),
                "mismatch at {}",
                s
            );
        }
        assert_eq!(maps.goal_grid().as_slice().iter().filter(|&&g| g).count(), 1);
        assert!(maps.is_goal(&config.goal));
        assert!(!maps.is_collision(&config.goal));
        // Edge cells never fit a footprint
        assert!(maps.is_collision(&DiscreteState::new(0, 3, 0)));
        assert!(maps.is_collision(&DiscreteState::new(4, 1, 0)));
        assert!(maps.count_collisions() > 0);
    }

    #[test]
    fn test_progress_boundaries() {
        assert_eq!(completed_rows(48, 48, 1), Some(1));
        assert_eq!(completed_rows(47, 48, 1), None);
        assert_eq!(completed_rows(480, 48, 10), Some(10));
        assert_eq!(completed_rows(96, 48, 10), None);
        assert_eq!(completed_rows(0, 0, 10), None);
    }

    #[test]
    fn test_out_of_grid_is_collision() {
        let geometry = RobotGeometry::new(Arc::new(small_config())).unwrap();
        let maps = CollisionMaps::compute(&geometry).unwrap();
        assert!(maps.is_collision(&DiscreteState::new(8, 0, 0)));
        assert!(!maps.is_goal(&DiscreteState::new(8, 0, 0)));
    }

    #[test]
    fn test_goal_in_collision_is_rejected() {
        let config = PlannerConfig {
            goal: DiscreteState::new(4, 1, 0),
            ..small_config()
        };
        let geometry = RobotGeometry::new(Arc::new(config)).unwrap();
        assert!(matches!(
            CollisionMaps::compute(&geometry),
            Err(PlannerError::GoalInCollision { x: 4, y: 1, theta: 0 })
        ));
    }
}
