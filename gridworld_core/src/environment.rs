use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::{
    Action, ActionDeltas, Position,
    config::{ConfigError, GridConfig},
    map::Grid,
};

/// Represents the static type of a cell in the environment grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellKind {
    #[default]
    Empty,
    Obstacle,
    Start,
    Goal,
}

/// Reward paid for each kind of step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rewards {
    pub goal: f64,
    pub obstacle: f64,
    /// Per-move cost for an ordinary move.
    pub step: f64,
    pub out_of_bounds: f64,
}

impl Default for Rewards {
    fn default() -> Self {
        Rewards {
            goal: 100.0,
            obstacle: -100.0,
            step: -1.0,
            out_of_bounds: -50.0,
        }
    }
}

/// Dynamic parameters of an environment, independent of its layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    pub max_steps_per_episode: usize,
    pub rewards: Rewards,
    /// Chance that a random valid action replaces the commanded one.
    pub slip_prob: f64,
    /// Seed for slip noise. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        EnvSettings {
            max_steps_per_episode: 100,
            rewards: Rewards::default(),
            slip_prob: 0.0,
            seed: None,
        }
    }
}

/// Errors from driving an episode out of order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("No episode in progress; call reset() before step()")]
    EpisodeNotStarted,
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    GoalReached,
    Timeout,
}

/// Diagnostics attached to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    /// Action actually attempted after slip noise.
    pub applied_action: Action,
    pub slipped: bool,
    pub termination: Option<Termination>,
}

/// Represents the outcome of a single call to [`GridWorld::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub position: Position,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Snapshot of the agent within the current episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub position: Position,
    pub steps: usize,
}

/// A grid world with obstacles, a single goal, slip noise and a step limit.
#[derive(Debug)]
pub struct GridWorld {
    config: GridConfig,
    settings: EnvSettings,
    grid: Grid<CellKind>,
    deltas: ActionDeltas,
    position: Position,
    steps: usize,
    in_episode: bool,
    rng: StdRng,
}

impl GridWorld {
    /// Builds a world using the standard action deltas.
    pub fn new(config: GridConfig, settings: EnvSettings) -> Result<Self, ConfigError> {
        Self::with_deltas(config, settings, ActionDeltas::STANDARD)
    }

    /// Builds a world using the supplied action deltas.
    ///
    /// Fails if the layout is invalid, the slip probability is outside
    /// [0, 1] or the step limit is zero.
    pub fn with_deltas(
        config: GridConfig,
        settings: EnvSettings,
        deltas: ActionDeltas,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if !(0.0..=1.0).contains(&settings.slip_prob) {
            return Err(ConfigError::SlipProbability(settings.slip_prob));
        }
        if settings.max_steps_per_episode == 0 {
            return Err(ConfigError::ZeroStepLimit);
        }

        let grid = Grid::from_generator(config.rows(), config.cols(), |p| {
            if p == config.start {
                CellKind::Start
            } else if p == config.goal {
                CellKind::Goal
            } else if config.obstacles.contains(&p) {
                CellKind::Obstacle
            } else {
                CellKind::Empty
            }
        });
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(GridWorld {
            position: config.start,
            config,
            settings,
            grid,
            deltas,
            steps: 0,
            in_episode: false,
            rng,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    pub fn grid(&self) -> &Grid<CellKind> {
        &self.grid
    }

    pub fn deltas(&self) -> ActionDeltas {
        self.deltas
    }

    pub fn rows(&self) -> usize {
        self.grid.rows()
    }

    pub fn cols(&self) -> usize {
        self.grid.cols()
    }

    pub fn start(&self) -> Position {
        self.config.start
    }

    pub fn goal(&self) -> Position {
        self.config.goal
    }

    /// Returns the cell kind at `position`, or `None` outside the grid.
    pub fn cell(&self, position: Position) -> Option<CellKind> {
        self.grid.get(position).copied()
    }

    pub fn agent_state(&self) -> AgentState {
        AgentState {
            position: self.position,
            steps: self.steps,
        }
    }

    /// True while an episode started by [`reset`](Self::reset) has not ended.
    pub fn in_episode(&self) -> bool {
        self.in_episode
    }

    /// Starts a new episode at the start cell.
    pub fn reset(&mut self) -> Position {
        self.position = self.config.start;
        self.steps = 0;
        self.in_episode = true;
        self.position
    }

    fn is_open(&self, position: Position) -> bool {
        matches!(self.grid.get(position), Some(kind) if *kind != CellKind::Obstacle)
    }

    /// Actions that keep the agent on the grid and off obstacles.
    ///
    /// A cell with no such action yields every action, so the caller always
    /// gets something to choose from.
    pub fn valid_actions(&self, position: Position) -> Vec<Action> {
        let valid: Vec<Action> = Action::ALL
            .into_iter()
            .filter(|action| {
                self.deltas
                    .target(position, *action)
                    .is_some_and(|target| self.is_open(target))
            })
            .collect();
        if valid.is_empty() {
            Action::ALL.to_vec()
        } else {
            valid
        }
    }

    /// Advances the current episode by one move.
    pub fn step(&mut self, action: Action) -> Result<StepOutcome, StepError> {
        if !self.in_episode {
            return Err(StepError::EpisodeNotStarted);
        }

        // Slip picks the attempted action; it never alters the move itself.
        let mut applied_action = action;
        let mut slipped = false;
        if self.settings.slip_prob > 0.0 && self.rng.random::<f64>() < self.settings.slip_prob {
            let valid = self.valid_actions(self.position);
            if let Some(&choice) = valid.choose(&mut self.rng) {
                applied_action = choice;
                slipped = true;
            }
        }

        let rewards = self.settings.rewards;
        let target = self
            .deltas
            .target(self.position, applied_action)
            .filter(|p| self.grid.contains(*p));
        let mut termination = None;
        let reward = match target {
            Some(p) if p == self.config.goal => {
                self.position = p;
                termination = Some(Termination::GoalReached);
                rewards.goal
            }
            None => rewards.out_of_bounds,
            Some(p) if self.grid[p] == CellKind::Obstacle => rewards.obstacle,
            Some(p) => {
                self.position = p;
                rewards.step
            }
        };

        self.steps += 1;
        if termination.is_none() && self.steps >= self.settings.max_steps_per_episode {
            termination = Some(Termination::Timeout);
        }
        let done = termination.is_some();
        if done {
            self.in_episode = false;
        }

        Ok(StepOutcome {
            position: self.position,
            reward,
            done,
            info: StepInfo {
                applied_action,
                slipped,
                termination,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_world(slip_prob: f64) -> GridWorld {
        let config = GridConfig::new(5, 5, Position::new(0, 0), Position::new(4, 4));
        let settings = EnvSettings {
            slip_prob,
            seed: Some(11),
            ..EnvSettings::default()
        };
        GridWorld::new(config, settings).unwrap()
    }

    #[test]
    fn grid_marks_cell_kinds() {
        let world = GridWorld::new(GridConfig::default(), EnvSettings::default()).unwrap();
        assert_eq!(world.cell(Position::new(0, 0)), Some(CellKind::Start));
        assert_eq!(world.cell(Position::new(4, 4)), Some(CellKind::Goal));
        assert_eq!(world.cell(Position::new(2, 2)), Some(CellKind::Obstacle));
        assert_eq!(world.cell(Position::new(0, 1)), Some(CellKind::Empty));
        assert_eq!(world.cell(Position::new(5, 0)), None);
        let kinds = world.grid().as_slice();
        assert_eq!(kinds.iter().filter(|k| **k == CellKind::Obstacle).count(), 3);
    }

    #[test]
    fn rejects_invalid_settings() {
        let config = GridConfig::default();
        let slip = EnvSettings {
            slip_prob: 1.5,
            ..EnvSettings::default()
        };
        assert!(matches!(
            GridWorld::new(config.clone(), slip),
            Err(ConfigError::SlipProbability(_))
        ));
        let no_steps = EnvSettings {
            max_steps_per_episode: 0,
            ..EnvSettings::default()
        };
        assert!(matches!(
            GridWorld::new(config, no_steps),
            Err(ConfigError::ZeroStepLimit)
        ));
    }

    #[test]
    fn oversized_grid_is_rejected_before_allocation() {
        let config = GridConfig::new(usize::MAX, 2, Position::new(0, 0), Position::new(0, 1));
        assert!(matches!(
            GridWorld::new(config, EnvSettings::default()),
            Err(ConfigError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn valid_actions_never_leave_grid_or_enter_obstacles() {
        let world = GridWorld::new(GridConfig::default(), EnvSettings::default()).unwrap();
        let positions = (0..world.rows())
            .flat_map(|row| (0..world.cols()).map(move |col| Position::new(row, col)));
        for position in positions {
            if world.cell(position) == Some(CellKind::Obstacle) {
                continue;
            }
            for action in world.valid_actions(position) {
                let target = world.deltas().target(position, action).unwrap();
                assert_ne!(world.cell(target), None, "{position:?} {action:?}");
                assert_ne!(world.cell(target), Some(CellKind::Obstacle));
            }
        }
        assert_eq!(
            world.valid_actions(Position::new(0, 0)),
            vec![Action::Down, Action::Right]
        );
        assert_eq!(
            world.valid_actions(Position::new(1, 2)),
            vec![Action::Up, Action::Right]
        );
    }

    #[test]
    fn boxed_in_cell_offers_every_action() {
        let config = GridConfig::new(3, 3, Position::new(0, 0), Position::new(2, 2)).with_obstacles([
            Position::new(0, 1),
            Position::new(1, 0),
        ]);
        let world = GridWorld::new(config, EnvSettings::default()).unwrap();
        assert_eq!(world.valid_actions(Position::new(0, 0)), Action::ALL.to_vec());
    }

    #[test]
    fn step_requires_reset() {
        let mut world = open_world(0.0);
        assert_eq!(world.step(Action::Down), Err(StepError::EpisodeNotStarted));
        world.reset();
        assert!(world.step(Action::Down).is_ok());
    }

    #[test]
    fn moving_onto_goal_terminates_with_goal_reward() {
        let config = GridConfig::new(2, 2, Position::new(0, 1), Position::new(1, 1));
        let settings = EnvSettings {
            seed: Some(3),
            ..EnvSettings::default()
        };
        let mut world = GridWorld::new(config, settings).unwrap();
        world.reset();
        let outcome = world.step(Action::Down).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.reward, 100.0);
        assert_eq!(outcome.position, Position::new(1, 1));
        assert_eq!(outcome.info.termination, Some(Termination::GoalReached));
        assert!(!world.in_episode());
        assert_eq!(world.step(Action::Up), Err(StepError::EpisodeNotStarted));
    }

    #[test]
    fn off_grid_move_keeps_position() {
        let mut world = open_world(0.0);
        world.reset();
        let outcome = world.step(Action::Up).unwrap();
        assert_eq!(outcome.position, Position::new(0, 0));
        assert_eq!(outcome.reward, -50.0);
        assert!(!outcome.done);

        let outcome = world.step(Action::Left).unwrap();
        assert_eq!(outcome.position, Position::new(0, 0));
        assert_eq!(outcome.reward, -50.0);
    }

    #[test]
    fn obstacle_move_keeps_position() {
        let mut world = GridWorld::new(GridConfig::default(), EnvSettings::default()).unwrap();
        world.reset();
        world.step(Action::Right).unwrap();
        let outcome = world.step(Action::Down).unwrap();
        assert_eq!(outcome.position, Position::new(0, 1));
        assert_eq!(outcome.reward, -100.0);
        assert_eq!(world.agent_state().steps, 2);
    }

    #[test]
    fn ordinary_move_costs_one_step() {
        let mut world = open_world(0.0);
        world.reset();
        let outcome = world.step(Action::Right).unwrap();
        assert_eq!(outcome.position, Position::new(0, 1));
        assert_eq!(outcome.reward, -1.0);
        assert_eq!(outcome.info.applied_action, Action::Right);
        assert!(!outcome.info.slipped);
    }

    #[test]
    fn times_out_after_step_limit() {
        let config = GridConfig::new(3, 3, Position::new(0, 0), Position::new(2, 2));
        let settings = EnvSettings {
            max_steps_per_episode: 6,
            seed: Some(5),
            ..EnvSettings::default()
        };
        let mut world = GridWorld::new(config, settings).unwrap();
        world.reset();
        let moves = [Action::Right, Action::Left];
        for i in 0..5 {
            let outcome = world.step(moves[i % 2]).unwrap();
            assert!(!outcome.done);
            assert_eq!(outcome.reward, -1.0);
        }
        let last = world.step(Action::Right).unwrap();
        assert!(last.done);
        assert_eq!(last.reward, -1.0);
        assert_eq!(last.info.termination, Some(Termination::Timeout));
        assert_ne!(last.position, world.goal());
    }

    #[test]
    fn reset_restores_start() {
        let mut world = open_world(0.0);
        world.reset();
        world.step(Action::Down).unwrap();
        world.step(Action::Right).unwrap();
        assert_eq!(world.reset(), Position::new(0, 0));
        assert_eq!(
            world.agent_state(),
            AgentState {
                position: Position::new(0, 0),
                steps: 0
            }
        );
    }

    #[test]
    fn certain_slip_substitutes_a_valid_action() {
        let mut world = open_world(1.0);
        world.reset();
        for _ in 0..20 {
            let before = world.agent_state().position;
            let outcome = world.step(Action::Up).unwrap();
            assert!(outcome.info.slipped);
            assert!(world.valid_actions(before).contains(&outcome.info.applied_action));
            // Slipped moves come from the valid set, so they never bounce.
            assert!(outcome.reward == -1.0 || outcome.reward == 100.0);
            if outcome.done {
                break;
            }
        }
    }

    #[test]
    fn same_seed_replays_the_same_slips() {
        let run = || {
            let mut world = open_world(0.5);
            world.reset();
            (0..30)
                .map(|_| world.step(Action::Right).map(|o| o.info.applied_action))
                .take_while(|r| r.is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
