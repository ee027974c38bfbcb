use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod environment;
pub mod map;
pub mod q_table;
pub mod training;

/// Number of discrete actions available to an agent.
pub const ACTION_COUNT: usize = 4;

/// Represents a cell coordinate as (row, column).
///
/// Serialized as a two-element array `[row, col]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Position { row, col }
    }

    /// Returns manhattan distance between two positions
    pub fn manhattan_distance(&self, other: &Position) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl From<[usize; 2]> for Position {
    fn from([row, col]: [usize; 2]) -> Self {
        Position { row, col }
    }
}

impl From<Position> for [usize; 2] {
    fn from(position: Position) -> Self {
        [position.row, position.col]
    }
}

/// Represents the moves an agent can decide to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
}

impl Action {
    /// All actions, in table order.
    pub const ALL: [Action; ACTION_COUNT] = [Action::Up, Action::Down, Action::Left, Action::Right];

    /// Index of this action in the action-value table.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Action::Up => 0,
            Action::Down => 1,
            Action::Left => 2,
            Action::Right => 3,
        }
    }
}

/// Maps each action to its (row-delta, column-delta).
///
/// One instance is handed to both the environment and the agent so that
/// movement and tie-breaking agree on what an action means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDeltas {
    deltas: [(isize, isize); ACTION_COUNT],
}

impl ActionDeltas {
    /// Up moves towards row 0, left moves towards column 0.
    pub const STANDARD: ActionDeltas = ActionDeltas {
        deltas: [(-1, 0), (1, 0), (0, -1), (0, 1)],
    };

    #[inline]
    pub fn delta(&self, action: Action) -> (isize, isize) {
        self.deltas[action.index()]
    }

    /// Applies `action` to `from`.
    ///
    /// Returns `None` when the move would leave the non-negative quadrant.
    /// Upper bounds are not checked here; that is the grid's job.
    pub fn target(&self, from: Position, action: Action) -> Option<Position> {
        let (dr, dc) = self.delta(action);
        Some(Position {
            row: from.row.checked_add_signed(dr)?,
            col: from.col.checked_add_signed(dc)?,
        })
    }

    /// Manhattan distance from the cell `action` leads to (bounds ignored) to `goal`.
    pub fn distance_after(&self, from: Position, action: Action, goal: Position) -> usize {
        let (dr, dc) = self.delta(action);
        let row = from.row as isize + dr;
        let col = from.col as isize + dc;
        row.abs_diff(goal.row as isize) + col.abs_diff(goal.col as isize)
    }
}

impl Default for ActionDeltas {
    fn default() -> Self {
        ActionDeltas::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_indices_follow_table_order() {
        for (i, action) in Action::ALL.iter().enumerate() {
            assert_eq!(action.index(), i);
        }
    }

    #[test]
    fn target_rejects_negative_coordinates() {
        let deltas = ActionDeltas::STANDARD;
        let origin = Position::new(0, 0);
        assert_eq!(deltas.target(origin, Action::Up), None);
        assert_eq!(deltas.target(origin, Action::Left), None);
        assert_eq!(deltas.target(origin, Action::Down), Some(Position::new(1, 0)));
        assert_eq!(deltas.target(origin, Action::Right), Some(Position::new(0, 1)));
    }

    #[test]
    fn distance_after_handles_off_grid_moves() {
        let deltas = ActionDeltas::STANDARD;
        let goal = Position::new(2, 2);
        assert_eq!(deltas.distance_after(Position::new(0, 0), Action::Up, goal), 5);
        assert_eq!(deltas.distance_after(Position::new(0, 0), Action::Down, goal), 3);
    }

    #[test]
    fn position_serializes_as_pair() {
        let json = serde_json::to_string(&Position::new(3, 1)).unwrap();
        assert_eq!(json, "[3,1]");
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Position::new(3, 1));
    }

    #[test]
    fn manhattan_distance_is_symmetric() {
        let a = Position::new(1, 4);
        let b = Position::new(3, 0);
        assert_eq!(a.manhattan_distance(&b), 6);
        assert_eq!(b.manhattan_distance(&a), 6);
    }
}
