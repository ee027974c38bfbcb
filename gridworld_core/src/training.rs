//! Episode driver: training loop, greedy rollout and the render hook.

use crate::{
    Position,
    agent::{Agent, QLearningAgent},
    environment::{GridWorld, StepError, Termination},
};

/// Episodes between progress lines in [`train`].
pub const PROGRESS_INTERVAL: usize = 100;

/// Side-effecting hook invoked after every step.
///
/// Nothing in the driver depends on what a renderer does.
pub trait Renderer {
    fn render(&mut self, world: &GridWorld);
}

/// Renderer that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render(&mut self, _world: &GridWorld) {}
}

impl<F: FnMut(&GridWorld)> Renderer for F {
    fn render(&mut self, world: &GridWorld) {
        self(world)
    }
}

/// Result of one training episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub total_reward: f64,
    pub steps: usize,
    pub termination: Termination,
    /// Exploration rate after the end-of-episode decay.
    pub epsilon: Option<f64>,
}

impl EpisodeSummary {
    pub fn reached_goal(&self) -> bool {
        self.termination == Termination::GoalReached
    }
}

/// Runs one learning episode from reset until the world reports done.
///
/// Does not call [`Agent::end_episode`]; [`train`] does that.
pub fn run_episode<A, R>(
    world: &mut GridWorld,
    agent: &mut A,
    renderer: &mut R,
) -> Result<(f64, usize, Termination), StepError>
where
    A: Agent + ?Sized,
    R: Renderer + ?Sized,
{
    let goal = world.goal();
    let mut state = world.reset();
    let mut total_reward = 0.0;
    let mut steps = 0;

    loop {
        let valid_actions = world.valid_actions(state);
        let action = agent.policy(state, &valid_actions, Some(goal));
        let outcome = world.step(action)?;
        steps += 1;
        total_reward += outcome.reward;

        match outcome.info.termination {
            Some(termination) => {
                agent.learn(state, action, outcome.reward, None, &[]);
                renderer.render(world);
                return Ok((total_reward, steps, termination));
            }
            None => {
                let next_valid = world.valid_actions(outcome.position);
                agent.learn(
                    state,
                    action,
                    outcome.reward,
                    Some(outcome.position),
                    &next_valid,
                );
                renderer.render(world);
                state = outcome.position;
            }
        }
    }
}

/// Trains `agent` for `episodes` episodes, decaying exploration after each.
pub fn train<A, R>(
    world: &mut GridWorld,
    agent: &mut A,
    episodes: usize,
    renderer: &mut R,
) -> Result<Vec<EpisodeSummary>, StepError>
where
    A: Agent + ?Sized,
    R: Renderer + ?Sized,
{
    let mut summaries = Vec::with_capacity(episodes);
    let mut goals_in_window = 0;

    for episode in 0..episodes {
        let (total_reward, steps, termination) = run_episode(world, agent, renderer)?;
        agent.end_episode();

        let summary = EpisodeSummary {
            episode,
            total_reward,
            steps,
            termination,
            epsilon: agent.epsilon(),
        };
        tracing::debug!(
            episode,
            reward = total_reward,
            steps,
            ?termination,
            epsilon = ?summary.epsilon,
            "episode finished"
        );
        if summary.reached_goal() {
            goals_in_window += 1;
        }
        if (episode + 1) % PROGRESS_INTERVAL == 0 || episode + 1 == episodes {
            tracing::info!(
                episode = episode + 1,
                reward = total_reward,
                steps,
                goals = goals_in_window,
                epsilon = ?summary.epsilon,
                "training progress"
            );
            goals_in_window = 0;
        }
        summaries.push(summary);
    }

    Ok(summaries)
}

/// A single greedy episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    /// Visited positions, starting with the start cell.
    pub path: Vec<Position>,
    /// Reward of each step; one shorter than `path`.
    pub rewards: Vec<f64>,
    pub total_reward: f64,
    pub termination: Option<Termination>,
}

impl Rollout {
    pub fn steps(&self) -> usize {
        self.rewards.len()
    }

    pub fn reached_goal(&self) -> bool {
        self.termination == Some(Termination::GoalReached)
    }
}

/// Follows the agent's greedy policy without learning or exploring.
///
/// Stops when the world reports done or after `max_steps` steps, whichever
/// comes first. `termination` is `None` if the cap was hit first.
pub fn greedy_rollout<R>(
    world: &mut GridWorld,
    agent: &QLearningAgent,
    max_steps: usize,
    renderer: &mut R,
) -> Result<Rollout, StepError>
where
    R: Renderer + ?Sized,
{
    let goal = world.goal();
    let mut state = world.reset();
    let mut rollout = Rollout {
        path: vec![state],
        rewards: Vec::new(),
        total_reward: 0.0,
        termination: None,
    };
    renderer.render(world);

    while rollout.steps() < max_steps {
        let valid_actions = world.valid_actions(state);
        let action = agent.greedy_action(state, &valid_actions, Some(goal));
        let outcome = world.step(action)?;
        tracing::trace!(
            step = rollout.steps(),
            ?action,
            position = ?outcome.position,
            reward = outcome.reward,
            "greedy step"
        );
        rollout.path.push(outcome.position);
        rollout.rewards.push(outcome.reward);
        rollout.total_reward += outcome.reward;
        renderer.render(world);
        state = outcome.position;
        if outcome.done {
            rollout.termination = outcome.info.termination;
            break;
        }
    }

    Ok(rollout)
}
