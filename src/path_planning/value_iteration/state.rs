//! States, actions and dense grids over the discretized pose space

use std::fmt;
use std::ops::{Index, IndexMut};

use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::common::{PlannerError, PlannerResult, Point2D};

/// Policy value of cells without an action (collision or goal)
pub const NO_ACTION: i8 = -1;

/// Grid cell and heading bin; the unit of the decision process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiscreteState {
    pub x: usize,
    pub y: usize,
    pub theta: usize,
}

impl DiscreteState {
    pub fn new(x: usize, y: usize, theta: usize) -> Self {
        Self { x, y, theta }
    }
}

impl fmt::Display for DiscreteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.theta)
    }
}

/// Real-valued position with a heading bin, used by continuous rollouts
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContinuousPose {
    pub x: f64,
    pub y: f64,
    pub theta: usize,
}

impl ContinuousPose {
    pub fn new(x: f64, y: f64, theta: usize) -> Self {
        Self { x, y, theta }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Round to the nearest cell, then clamp into [0, nx) x [0, ny) x [0, n_theta)
    pub fn to_discrete(&self, nx: usize, ny: usize, n_theta: usize) -> DiscreteState {
        DiscreteState::new(
            round_clamp(self.x, nx),
            round_clamp(self.y, ny),
            self.theta.min(n_theta.saturating_sub(1)),
        )
    }
}

impl From<DiscreteState> for ContinuousPose {
    fn from(s: DiscreteState) -> Self {
        Self::new(s.x as f64, s.y as f64, s.theta)
    }
}

impl fmt::Display for ContinuousPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {})", self.x, self.y, self.theta)
    }
}

/// Nearest grid coordinate; exact halves go to the even neighbour
#[inline]
pub fn snap(v: f64) -> i64 {
    v.round_ties_even() as i64
}

fn round_clamp(v: f64, n: usize) -> usize {
    let upper = n.saturating_sub(1) as f64;
    // NaN falls through both comparisons and lands on 0
    let r = v.round_ties_even();
    if r >= upper {
        upper as usize
    } else if r > 0.0 {
        r as usize
    } else {
        0
    }
}

/// Discrete robot action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Action {
    TurnLeft = 0,
    TurnRight = 1,
    MoveForward = 2,
}

impl Action {
    /// All actions, in id order (the extraction tie-break order)
    pub const ALL: [Action; 3] = [Action::TurnLeft, Action::TurnRight, Action::MoveForward];

    pub fn id(self) -> i8 {
        self as i8
    }

    /// Decode a policy cell: `NO_ACTION` maps to `None`
    pub fn from_policy_value(value: i8) -> PlannerResult<Option<Action>> {
        if value == NO_ACTION {
            Ok(None)
        } else {
            Action::try_from(value as i64).map(Some)
        }
    }
}

impl TryFrom<i64> for Action {
    type Error = PlannerError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Action::TurnLeft),
            1 => Ok(Action::TurnRight),
            2 => Ok(Action::MoveForward),
            _ => Err(PlannerError::InvalidAction(id)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::TurnLeft => "TURN_LEFT",
            Action::TurnRight => "TURN_RIGHT",
            Action::MoveForward => "MOVE_FORWARD",
        };
        write!(f, "{}", name)
    }
}

/// Dense row-major grid shaped [nx, ny, n_theta]
#[derive(Debug, Clone, PartialEq)]
pub struct Grid3<T> {
    shape: [usize; 3],
    data: Vec<T>,
}

impl<T: Clone> Grid3<T> {
    pub fn new(shape: [usize; 3], fill: T) -> Self {
        Self {
            shape,
            data: vec![fill; shape[0] * shape[1] * shape[2]],
        }
    }
}

impl<T> Grid3<T> {
    /// Wrap flat row-major data; fails if the length does not match the shape
    pub fn from_vec(shape: [usize; 3], data: Vec<T>) -> PlannerResult<Self> {
        let expected = shape[0] * shape[1] * shape[2];
        if data.len() != expected {
            return Err(PlannerError::Format(format!(
                "grid of shape {:?} needs {} cells, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, state: &DiscreteState) -> bool {
        state.x < self.shape[0] && state.y < self.shape[1] && state.theta < self.shape[2]
    }

    /// Flat offset of an in-range state
    #[inline]
    pub fn flat_index(&self, state: &DiscreteState) -> usize {
        (state.x * self.shape[1] + state.y) * self.shape[2] + state.theta
    }

    /// State stored at flat offset `index`
    #[inline]
    pub fn state_at(&self, index: usize) -> DiscreteState {
        state_from_index(self.shape, index)
    }

    pub fn get(&self, state: &DiscreteState) -> Option<&T> {
        if self.contains(state) {
            Some(&self.data[self.flat_index(state)])
        } else {
            None
        }
    }

    /// Signed lookup for callers holding raw indices
    pub fn get_checked(&self, x: i64, y: i64, theta: i64) -> PlannerResult<&T> {
        let in_range = |v: i64, n: usize| v >= 0 && (v as u64) < n as u64;
        if in_range(x, self.shape[0]) && in_range(y, self.shape[1]) && in_range(theta, self.shape[2]) {
            let state = DiscreteState::new(x as usize, y as usize, theta as usize);
            Ok(&self.data[self.flat_index(&state)])
        } else {
            Err(PlannerError::OutOfBounds { x, y, theta })
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Iterate over every state in storage order
    pub fn states(&self) -> impl Iterator<Item = DiscreteState> + '_ {
        (0..self.data.len()).map(move |i| self.state_at(i))
    }
}

impl<T: Send> Grid3<T> {
    /// Overwrite every cell with `f(state)`, in parallel; each worker writes only its own cells
    pub fn par_fill_with<F>(&mut self, f: F)
    where
        F: Fn(DiscreteState) -> T + Sync + Send,
    {
        let shape = self.shape;
        self.data
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, cell)| *cell = f(state_from_index(shape, i)));
    }

    /// Fallible `par_fill_with`; stops at the first error (cells written so far keep their new value)
    pub fn par_try_fill_with<F, E>(&mut self, f: F) -> Result<(), E>
    where
        F: Fn(DiscreteState) -> Result<T, E> + Sync + Send,
        E: Send,
    {
        let shape = self.shape;
        self.data
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(i, cell)| {
                *cell = f(state_from_index(shape, i))?;
                Ok(())
            })
    }
}

#[inline]
fn state_from_index(shape: [usize; 3], index: usize) -> DiscreteState {
    let theta = index % shape[2];
    let rest = index / shape[2];
    DiscreteState::new(rest / shape[1], rest % shape[1], theta)
}

impl<T> Index<DiscreteState> for Grid3<T> {
    type Output = T;

    fn index(&self, state: DiscreteState) -> &T {
        assert!(self.contains(&state), "state {} outside grid {:?}", state, self.shape);
        &self.data[self.flat_index(&state)]
    }
}

impl<T> IndexMut<DiscreteState> for Grid3<T> {
    fn index_mut(&mut self, state: DiscreteState) -> &mut T {
        assert!(self.contains(&state), "state {} outside grid {:?}", state, self.shape);
        let i = self.flat_index(&state);
        &mut self.data[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_then_clamp() {
        let pose = ContinuousPose::new(3.6, -0.7, 2);
        assert_eq!(pose.to_discrete(10, 10, 4), DiscreteState::new(4, 0, 2));

        let pose = ContinuousPose::new(12.2, 9.4, 3);
        assert_eq!(pose.to_discrete(10, 10, 4), DiscreteState::new(9, 9, 3));

        let pose = ContinuousPose::new(f64::NAN, 2.5, 0);
        assert_eq!(pose.to_discrete(10, 10, 4), DiscreteState::new(0, 2, 0));
        assert_eq!(snap(3.5), 4);
        assert_eq!(snap(-0.4), 0);
    }

    #[test]
    fn test_action_ids() {
        for action in Action::ALL {
            assert_eq!(Action::try_from(action.id() as i64).unwrap(), action);
        }
        assert!(matches!(Action::try_from(3), Err(PlannerError::InvalidAction(3))));
        assert_eq!(Action::from_policy_value(NO_ACTION).unwrap(), None);
        assert_eq!(Action::from_policy_value(2).unwrap(), Some(Action::MoveForward));
        assert!(Action::from_policy_value(-2).is_err());
    }

    #[test]
    fn test_grid_indexing() {
        let mut grid = Grid3::new([3, 4, 5], 0i32);
        let s = DiscreteState::new(2, 1, 3);
        grid[s] = 7;
        assert_eq!(grid.state_at(grid.flat_index(&s)), s);
        assert_eq!(*grid.get_checked(2, 1, 3).unwrap(), 7);
        assert!(matches!(
            grid.get_checked(-1, 0, 0),
            Err(PlannerError::OutOfBounds { x: -1, y: 0, theta: 0 })
        ));
        assert!(grid.get(&DiscreteState::new(3, 0, 0)).is_none());
        assert_eq!(grid.states().count(), 60);
    }

    #[test]
    fn test_par_fill_with_visits_each_state() {
        let mut grid = Grid3::new([4, 3, 2], DiscreteState::new(0, 0, 0));
        grid.par_fill_with(|s| s);
        for (i, s) in grid.as_slice().iter().enumerate() {
            assert_eq!(grid.state_at(i), *s);
        }
    }

    #[test]
    fn test_grid_from_vec_checks_length() {
        assert!(Grid3::from_vec([2, 2, 2], vec![0.0; 8]).is_ok());
        assert!(matches!(
            Grid3::from_vec([2, 2, 2], vec![0.0; 7]),
            Err(PlannerError::Format(_))
        ));
    }
}
