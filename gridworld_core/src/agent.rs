use std::path::Path;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    Action, ActionDeltas, Position,
    environment::GridWorld,
    q_table::{QTable, TableError},
};

/// Trait defining the behavior of a learning agent.
///
/// The driver asks for an action with [`policy`](Agent::policy), feeds the
/// resulting transition back through [`learn`](Agent::learn) and calls
/// [`end_episode`](Agent::end_episode) once per finished episode.
pub trait Agent {
    /// Picks one of `valid_actions` for `state`.
    ///
    /// # Panics
    ///
    /// Panics if `valid_actions` is empty.
    fn policy(&mut self, state: Position, valid_actions: &[Action], goal: Option<Position>)
    -> Action;

    /// Incorporates one transition. `next_state` is `None` when the episode
    /// ended on this step.
    fn learn(
        &mut self,
        state: Position,
        action: Action,
        reward: f64,
        next_state: Option<Position>,
        next_valid_actions: &[Action],
    );

    /// Called once after each completed episode.
    fn end_episode(&mut self) {}

    /// Current exploration rate, if the agent has one.
    fn epsilon(&self) -> Option<f64> {
        None
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn random_choice(rng: &mut StdRng, actions: &[Action]) -> Action {
    assert!(
        !actions.is_empty(),
        "policy requires at least one valid action"
    );
    actions[rng.random_range(0..actions.len())]
}

/// A baseline agent that moves randomly and never learns.
#[derive(Debug)]
pub struct RandomAgent {
    rng: StdRng,
}

impl RandomAgent {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded_rng(seed),
        }
    }
}

impl Agent for RandomAgent {
    fn policy(&mut self, _state: Position, valid_actions: &[Action], _goal: Option<Position>) -> Action {
        random_choice(&mut self.rng, valid_actions)
    }

    fn learn(&mut self, _: Position, _: Action, _: f64, _: Option<Position>, _: &[Action]) {}
}

/// Errors raised for out-of-range learning parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("{name} = {value} is outside {range}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },
}

/// Learning parameters for [`QLearningAgent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub initial_epsilon: f64,
    /// Multiplier applied to epsilon after every episode.
    pub epsilon_decay: f64,
    /// Floor for epsilon decay.
    pub min_epsilon: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            learning_rate: 0.1,
            discount_factor: 0.9,
            initial_epsilon: 1.0,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), AgentError> {
        let open_unit = |name, value: f64| {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(AgentError::OutOfRange {
                    name,
                    value,
                    range: "(0, 1]",
                })
            }
        };
        let closed_unit = |name, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(AgentError::OutOfRange {
                    name,
                    value,
                    range: "[0, 1]",
                })
            }
        };
        open_unit("learning_rate", self.learning_rate)?;
        closed_unit("discount_factor", self.discount_factor)?;
        closed_unit("initial_epsilon", self.initial_epsilon)?;
        open_unit("epsilon_decay", self.epsilon_decay)?;
        closed_unit("min_epsilon", self.min_epsilon)?;
        Ok(())
    }
}

/// Tabular Q-learning agent with an epsilon-greedy policy.
#[derive(Debug)]
pub struct QLearningAgent {
    table: QTable,
    params: Hyperparameters,
    epsilon: f64,
    deltas: ActionDeltas,
    rng: StdRng,
}

impl QLearningAgent {
    /// Creates an agent with a zeroed table of `rows x cols` cells.
    pub fn new(
        rows: usize,
        cols: usize,
        params: Hyperparameters,
        deltas: ActionDeltas,
        seed: Option<u64>,
    ) -> Result<Self, AgentError> {
        params.validate()?;
        Ok(QLearningAgent {
            table: QTable::new(rows, cols),
            epsilon: params.initial_epsilon,
            params,
            deltas,
            rng: seeded_rng(seed),
        })
    }

    /// Creates an agent sized for `world`, sharing its action deltas.
    pub fn for_world(
        world: &GridWorld,
        params: Hyperparameters,
        seed: Option<u64>,
    ) -> Result<Self, AgentError> {
        Self::new(world.rows(), world.cols(), params, world.deltas(), seed)
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut QTable {
        &mut self.table
    }

    pub fn params(&self) -> &Hyperparameters {
        &self.params
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Overrides the exploration rate, e.g. `0.0` for a purely greedy rollout.
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    /// Best-valued action among `valid_actions`, never exploring.
    ///
    /// Ties go to the action landing closest to `goal` (first such action on
    /// equal distance), or to the first tied action when no goal is given.
    ///
    /// # Panics
    ///
    /// Panics if `valid_actions` is empty or `state` lies outside the table.
    pub fn greedy_action(
        &self,
        state: Position,
        valid_actions: &[Action],
        goal: Option<Position>,
    ) -> Action {
        assert!(
            !valid_actions.is_empty(),
            "policy requires at least one valid action"
        );
        let values = self.table.action_values(state);
        let best = valid_actions
            .iter()
            .map(|action| values[action.index()])
            .fold(f64::NEG_INFINITY, f64::max);
        let mut tied = valid_actions
            .iter()
            .copied()
            .filter(|action| values[action.index()] == best);

        let choice = match goal {
            Some(goal) => tied.min_by_key(|action| self.deltas.distance_after(state, *action, goal)),
            None => tied.next(),
        };
        choice.unwrap_or(valid_actions[0])
    }

    /// Multiplies epsilon by the decay factor, never dropping below the floor.
    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.params.epsilon_decay).max(self.params.min_epsilon);
    }

    /// Restores the table from `path`.
    ///
    /// Returns `Ok(false)` if no file exists, leaving the current table as is.
    /// A table saved for another grid size is rejected without touching the
    /// current one.
    pub fn load_table(&mut self, path: impl AsRef<Path>) -> Result<bool, TableError> {
        let path = path.as_ref();
        let (rows, cols, _) = self.table.shape();
        match QTable::load(path, rows, cols) {
            Ok(Some(table)) => {
                self.table = table;
                Ok(true)
            }
            Ok(None) => {
                tracing::warn!(path = %path.display(), "no saved table, starting fresh");
                Ok(false)
            }
            Err(err @ TableError::ShapeMismatch { .. }) => {
                tracing::warn!(path = %path.display(), %err, "saved table does not fit this grid");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn save_table(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        self.table.save(path)
    }
}

impl Agent for QLearningAgent {
    fn policy(&mut self, state: Position, valid_actions: &[Action], goal: Option<Position>) -> Action {
        if self.rng.random::<f64>() < self.epsilon {
            random_choice(&mut self.rng, valid_actions)
        } else {
            self.greedy_action(state, valid_actions, goal)
        }
    }

    fn learn(
        &mut self,
        state: Position,
        action: Action,
        reward: f64,
        next_state: Option<Position>,
        next_valid_actions: &[Action],
    ) {
        let target = match next_state {
            None => reward,
            Some(next) => {
                let future = self
                    .table
                    .best_value(next, next_valid_actions)
                    .unwrap_or(0.0);
                reward + self.params.discount_factor * future
            }
        };
        let q = self.table.get_mut(state, action);
        *q += self.params.learning_rate * (target - *q);
    }

    fn end_episode(&mut self) {
        self.decay_epsilon();
    }

    fn epsilon(&self) -> Option<f64> {
        Some(self.epsilon)
    }
}
