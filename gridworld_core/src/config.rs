use std::{fs, io, path::Path};

use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::Position;

/// Errors raised while building or reading a grid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid size ({rows}, {cols}) must be positive in both dimensions")]
    EmptyGrid { rows: usize, cols: usize },
    #[error("Grid size ({rows}, {cols}) exceeds the {MAX_CELLS}-cell limit")]
    GridTooLarge { rows: usize, cols: usize },
    #[error("{what} position ({}, {}) is outside grid size ({rows}, {cols})", .position.row, .position.col)]
    OutOfBounds {
        what: &'static str,
        position: Position,
        rows: usize,
        cols: usize,
    },
    #[error("Start and goal share position ({}, {})", .0.row, .0.col)]
    StartIsGoal(Position),
    #[error("Obstacle at ({}, {}) collides with the {what} cell", .position.row, .position.col)]
    ObstacleCollision {
        what: &'static str,
        position: Position,
    },
    #[error("Slip probability {0} is outside [0, 1]")]
    SlipProbability(f64),
    #[error("Episodes need at least one step")]
    ZeroStepLimit,
    #[error("Failed to access configuration file: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Largest number of cells a grid may hold.
pub const MAX_CELLS: usize = 1 << 24;

/// Static layout of a grid world.
///
/// Stored on disk as JSON:
/// `{"grid_size": [5, 5], "start": [0, 0], "goal": [4, 4], "obstacles": [[1, 1]]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// `[rows, cols]`
    pub grid_size: [usize; 2],
    pub start: Position,
    pub goal: Position,
    #[serde(default)]
    pub obstacles: Vec<Position>,
}

impl GridConfig {
    pub fn new(rows: usize, cols: usize, start: Position, goal: Position) -> Self {
        GridConfig {
            grid_size: [rows, cols],
            start,
            goal,
            obstacles: Vec::new(),
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.grid_size[0]
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.grid_size[1]
    }

    pub fn with_obstacles(mut self, obstacles: impl IntoIterator<Item = Position>) -> Self {
        self.obstacles = obstacles.into_iter().collect();
        self
    }

    fn contains(&self, position: Position) -> bool {
        position.row < self.rows() && position.col < self.cols()
    }

    /// Checks the geometry invariants: non-empty grid of at most
    /// [`MAX_CELLS`] cells, start and goal in bounds and distinct, obstacles
    /// in bounds and off start/goal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (rows, cols) = (self.rows(), self.cols());
        if rows == 0 || cols == 0 {
            return Err(ConfigError::EmptyGrid { rows, cols });
        }
        if rows.checked_mul(cols).is_none_or(|cells| cells > MAX_CELLS) {
            return Err(ConfigError::GridTooLarge { rows, cols });
        }
        for (what, position) in [("Start", self.start), ("Goal", self.goal)] {
            if !self.contains(position) {
                return Err(ConfigError::OutOfBounds {
                    what,
                    position,
                    rows,
                    cols,
                });
            }
        }
        if self.start == self.goal {
            return Err(ConfigError::StartIsGoal(self.start));
        }
        for &position in &self.obstacles {
            if !self.contains(position) {
                return Err(ConfigError::OutOfBounds {
                    what: "Obstacle",
                    position,
                    rows,
                    cols,
                });
            }
            if position == self.start {
                return Err(ConfigError::ObstacleCollision {
                    what: "start",
                    position,
                });
            }
            if position == self.goal {
                return Err(ConfigError::ObstacleCollision {
                    what: "goal",
                    position,
                });
            }
        }
        Ok(())
    }

    /// Replaces the obstacle set with up to `count` cells drawn uniformly
    /// from every cell except start and goal.
    pub fn with_random_obstacles(mut self, count: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let candidates: Vec<Position> = (0..self.rows())
            .flat_map(|row| (0..self.cols()).map(move |col| Position { row, col }))
            .filter(|p| *p != self.start && *p != self.goal)
            .collect();
        self.obstacles = candidates
            .choose_multiple(&mut rng, count.min(candidates.len()))
            .copied()
            .collect();
        self
    }

    /// Reads a configuration from a JSON file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: GridConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded grid configuration");
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), text)?;
        tracing::debug!(path = %path.as_ref().display(), "saved grid configuration");
        Ok(())
    }
}

impl Default for GridConfig {
    /// The 5x5 diagonal-obstacle layout used by the bundled training run.
    fn default() -> Self {
        GridConfig::new(5, 5, Position::new(0, 0), Position::new(4, 4)).with_obstacles([
            Position::new(1, 1),
            Position::new(2, 2),
            Position::new(3, 3),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        assert!(GridConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_geometry() {
        let base = GridConfig::new(3, 3, Position::new(0, 0), Position::new(2, 2));

        let empty = GridConfig::new(0, 3, Position::new(0, 0), Position::new(0, 1));
        assert!(matches!(empty.validate(), Err(ConfigError::EmptyGrid { .. })));

        let mut off_grid = base.clone();
        off_grid.goal = Position::new(3, 0);
        assert!(matches!(
            off_grid.validate(),
            Err(ConfigError::OutOfBounds { what: "Goal", .. })
        ));

        let mut same = base.clone();
        same.goal = same.start;
        assert!(matches!(same.validate(), Err(ConfigError::StartIsGoal(_))));

        let blocked_start = base.clone().with_obstacles([Position::new(0, 0)]);
        assert!(matches!(
            blocked_start.validate(),
            Err(ConfigError::ObstacleCollision { what: "start", .. })
        ));

        let blocked_goal = base.clone().with_obstacles([Position::new(2, 2)]);
        assert!(matches!(
            blocked_goal.validate(),
            Err(ConfigError::ObstacleCollision { what: "goal", .. })
        ));

        let stray = base.with_obstacles([Position::new(1, 5)]);
        assert!(matches!(
            stray.validate(),
            Err(ConfigError::OutOfBounds { what: "Obstacle", .. })
        ));
    }

    #[test]
    fn rejects_oversized_grid() {
        let overflowing = GridConfig::new(usize::MAX, 2, Position::new(0, 0), Position::new(0, 1));
        assert!(matches!(
            overflowing.validate(),
            Err(ConfigError::GridTooLarge { .. })
        ));

        let huge = GridConfig::new(1 << 20, 1 << 20, Position::new(0, 0), Position::new(0, 1));
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn oversized_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.json");
        fs::write(
            &path,
            r#"{"grid_size": [18446744073709551615, 2], "start": [0, 0], "goal": [0, 1]}"#,
        )
        .unwrap();
        assert!(matches!(
            GridConfig::load(&path),
            Err(ConfigError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn random_obstacles_avoid_start_and_goal() {
        let config = GridConfig::new(4, 4, Position::new(0, 0), Position::new(3, 3))
            .with_random_obstacles(5, Some(7));
        assert_eq!(config.obstacles.len(), 5);
        assert!(config.validate().is_ok());

        let again = GridConfig::new(4, 4, Position::new(0, 0), Position::new(3, 3))
            .with_random_obstacles(5, Some(7));
        assert_eq!(config.obstacles, again.obstacles);
    }

    #[test]
    fn random_obstacles_are_capped_by_free_cells() {
        let config = GridConfig::new(2, 2, Position::new(0, 0), Position::new(1, 1))
            .with_random_obstacles(10, Some(1));
        assert_eq!(config.obstacles.len(), 2);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid_config.json");
        let config = GridConfig::default();
        config.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"grid_size\""));
        assert!(text.contains("\"obstacles\""));

        assert_eq!(GridConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn load_rejects_invalid_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"grid_size": [2, 2], "start": [0, 0], "goal": [0, 0], "obstacles": []}"#,
        )
        .unwrap();
        assert!(matches!(
            GridConfig::load(&path),
            Err(ConfigError::StartIsGoal(_))
        ));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(GridConfig::load(&path), Err(ConfigError::Json(_))));
    }
}
