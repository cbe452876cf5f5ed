//! Robot footprint and collision geometry
//!
//! The robot is a rectangle of `robot_length` x `robot_width` centered on the
//! pose position and rotated by the heading of its bin. A pose collides when
//! its center leaves [0, nx) x [0, ny), when the footprint is not contained in
//! the workspace rectangle [0, nx] x [0, ny], or when the footprint touches
//! or overlaps any obstacle polygon.

use std::sync::Arc;

use nalgebra::{Rotation2, Vector2};

use crate::common::{PlannerResult, Point2D, Polygon2D};

use super::config::PlannerConfig;
use super::state::{snap, ContinuousPose};

/// Corners of a footprint, counter-clockwise
pub type Corners = [Point2D; 4];

/// Collision and goal tests for a fixed robot and obstacle set
#[derive(Debug, Clone)]
pub struct RobotGeometry {
    config: Arc<PlannerConfig>,
    base_footprint: [Vector2<f64>; 4],
}

impl RobotGeometry {
    /// Fails with `InvalidParameter` if the configuration does not validate
    pub fn new(config: Arc<PlannerConfig>) -> PlannerResult<Self> {
        config.validate()?;
        let hl = config.robot_length / 2.0;
        let hw = config.robot_width / 2.0;
        let base_footprint = [
            Vector2::new(-hl, -hw),
            Vector2::new(hl, -hw),
            Vector2::new(hl, hw),
            Vector2::new(-hl, hw),
        ];
        Ok(Self { config, base_footprint })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Footprint corners: rotate about the robot center, then translate
    pub fn footprint_corners(&self, pose: &ContinuousPose) -> Corners {
        let rotation = Rotation2::new(self.config.heading(pose.theta));
        let center = Vector2::new(pose.x, pose.y);
        self.base_footprint.map(|c| Point2D::from(rotation * c + center))
    }

    /// Footprint as a polygon (for rendering)
    pub fn footprint(&self, pose: &ContinuousPose) -> Polygon2D {
        Polygon2D::new(self.footprint_corners(pose).to_vec())
    }

    pub fn is_collision(&self, pose: &ContinuousPose) -> bool {
        let nx = self.config.nx as f64;
        let ny = self.config.ny as f64;
        // Cheap reject before any polygon work
        if pose.x < 0.0 || pose.x >= nx || pose.y < 0.0 || pose.y >= ny || pose.x.is_nan() || pose.y.is_nan() {
            return true;
        }

        let eps = self.config.contain_epsilon;
        let corners = self.footprint_corners(pose);
        let contained = corners
            .iter()
            .all(|c| c.x >= -eps && c.x <= nx + eps && c.y >= -eps && c.y <= ny + eps);
        if !contained {
            return true;
        }

        self.config
            .obstacles
            .iter()
            .any(|obstacle| convex_intersects_polygon(&corners, obstacle, eps))
    }

    /// Position rounded to the nearest cell must match the goal cell, heading exactly
    pub fn is_goal(&self, pose: &ContinuousPose) -> bool {
        let goal = &self.config.goal;
        snap(pose.x) == goal.x as i64 && snap(pose.y) == goal.y as i64 && pose.theta == goal.theta
    }
}

/// Signed area of the triangle (a, b, p), doubled
fn orient(a: Point2D, b: Point2D, p: Point2D) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn within_box(a: Point2D, b: Point2D, p: Point2D, eps: f64) -> bool {
    p.x >= a.x.min(b.x) - eps
        && p.x <= a.x.max(b.x) + eps
        && p.y >= a.y.min(b.y) - eps
        && p.y <= a.y.max(b.y) + eps
}

/// True if the closed segments [p1, p2] and [q1, q2] share at least one point
pub fn segments_intersect(p1: Point2D, p2: Point2D, q1: Point2D, q2: Point2D, eps: f64) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);

    let straddles = |a: f64, b: f64| (a > eps && b < -eps) || (a < -eps && b > eps);
    if straddles(d1, d2) && straddles(d3, d4) {
        return true;
    }

    (d1.abs() <= eps && within_box(q1, q2, p1, eps))
        || (d2.abs() <= eps && within_box(q1, q2, p2, eps))
        || (d3.abs() <= eps && within_box(p1, p2, q1, eps))
        || (d4.abs() <= eps && within_box(p1, p2, q2, eps))
}

/// Crossing-number point-in-polygon test (boundary points are left to the edge tests)
pub fn point_in_polygon(p: Point2D, vertices: &[Point2D]) -> bool {
    let n = vertices.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (vertices[i], vertices[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// True if a convex footprint and a simple polygon overlap or touch
pub fn convex_intersects_polygon(corners: &Corners, polygon: &Polygon2D, eps: f64) -> bool {
    let footprint_edges = (0..4).map(|i| (corners[i], corners[(i + 1) % 4]));
    for (a, b) in footprint_edges {
        if polygon.edges().any(|(c, d)| segments_intersect(a, b, c, d, eps)) {
            return true;
        }
    }

    // No edge contact: either disjoint or one lies fully inside the other
    point_in_polygon(corners[0], &polygon.vertices)
        || polygon
            .vertices
            .first()
            .map_or(false, |&v| point_in_polygon(v, corners))
}
