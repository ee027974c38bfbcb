use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{ACTION_COUNT, Action, Position, map::Grid};

/// Errors raised while saving or restoring an action-value table.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Failed to access table file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode or decode table: {0}")]
    Codec(#[from] bincode::Error),
    #[error(
        "Stored table has shape ({}, {}, {}) but ({}, {}, {}) was expected",
        .found.0, .found.1, .found.2, .expected.0, .expected.1, .expected.2
    )]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

/// On-disk form: the shape followed by the row-major values.
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    rows: usize,
    cols: usize,
    actions: usize,
    values: Vec<f64>,
}

/// Dense action-value table indexed by (row, column, action).
///
/// Every entry starts at zero. Lookups outside the grid panic rather than
/// touching another cell's entries.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    values: Grid<[f64; ACTION_COUNT]>,
}

impl QTable {
    pub fn new(rows: usize, cols: usize) -> Self {
        QTable {
            values: Grid::new(rows, cols),
        }
    }

    /// Returns `(rows, cols, actions)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.values.rows(), self.values.cols(), ACTION_COUNT)
    }

    #[inline]
    pub fn get(&self, state: Position, action: Action) -> f64 {
        self.values[state][action.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, state: Position, action: Action) -> &mut f64 {
        &mut self.values[state][action.index()]
    }

    pub fn set(&mut self, state: Position, action: Action, value: f64) {
        *self.get_mut(state, action) = value;
    }

    /// All action values at `state`, in [`Action::ALL`] order.
    pub fn action_values(&self, state: Position) -> &[f64; ACTION_COUNT] {
        &self.values[state]
    }

    /// Highest value among `actions` at `state`; `None` if `actions` is empty.
    pub fn best_value(&self, state: Position, actions: &[Action]) -> Option<f64> {
        let values = self.action_values(state);
        actions
            .iter()
            .map(|action| values[action.index()])
            .reduce(f64::max)
    }

    /// Row-major flat view, with the action index varying fastest.
    pub fn as_flat(&self) -> &[f64] {
        self.values.as_slice().as_flattened()
    }

    fn from_snapshot(snapshot: TableSnapshot) -> Option<Self> {
        if snapshot.actions != ACTION_COUNT {
            return None;
        }
        let cells: Vec<[f64; ACTION_COUNT]> = snapshot
            .values
            .chunks_exact(ACTION_COUNT)
            .map(|chunk| [chunk[0], chunk[1], chunk[2], chunk[3]])
            .collect();
        if cells.len() * ACTION_COUNT != snapshot.values.len() {
            return None;
        }
        Grid::from_cells(snapshot.rows, snapshot.cols, cells).map(|values| QTable { values })
    }

    /// Writes the table, shape included, to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let (rows, cols, actions) = self.shape();
        let snapshot = TableSnapshot {
            rows,
            cols,
            actions,
            values: self.as_flat().to_vec(),
        };
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(&mut writer, &snapshot)?;
        writer.flush()?;
        tracing::info!(path = %path.as_ref().display(), rows, cols, "saved action-value table");
        Ok(())
    }

    /// Reads a table from `path` and checks it against the expected shape.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load(
        path: impl AsRef<Path>,
        rows: usize,
        cols: usize,
    ) -> Result<Option<Self>, TableError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: TableSnapshot = bincode::deserialize_from(BufReader::new(file))?;
        let found = (snapshot.rows, snapshot.cols, snapshot.actions);
        let expected = (rows, cols, ACTION_COUNT);
        if found != expected {
            return Err(TableError::ShapeMismatch { expected, found });
        }
        let table = Self::from_snapshot(snapshot)
            .ok_or(TableError::ShapeMismatch { expected, found })?;
        tracing::info!(path = %path.display(), rows, cols, "loaded action-value table");
        Ok(Some(table))
    }
}
