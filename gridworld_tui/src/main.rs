use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gridworld_core::{
    Position,
    agent::{Hyperparameters, QLearningAgent},
    config::GridConfig,
    environment::{CellKind, EnvSettings, GridWorld, Termination},
    training::{NoopRenderer, Rollout, greedy_rollout, train},
};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    fs::File,
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Tabular Q-learning on a grid world", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train an agent without a display and save its action-value table
    Train(TrainArgs),
    /// Animate the greedy path of a trained agent
    Play(PlayArgs),
    /// Write a grid configuration file
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Grid configuration to train on; the built-in 5x5 layout if omitted
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,
    /// Number of training episodes
    #[arg(short, long, default_value_t = 1000)]
    episodes: usize,
    /// Where to save the trained table
    #[arg(short, long, value_name = "TABLE_FILE", default_value = "q_table.bin")]
    table: PathBuf,
    /// Continue from the table at --table if one exists
    #[arg(long)]
    resume: bool,
    #[arg(long, default_value_t = 0.1)]
    slip: f64,
    #[arg(long, default_value_t = 100)]
    max_steps: usize,
    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,
    #[arg(long, default_value_t = 0.9)]
    discount: f64,
    /// Starting exploration rate; defaults to 1.0 for a fresh table and to
    /// --min-epsilon when --resume found a saved one
    #[arg(long)]
    epsilon: Option<f64>,
    #[arg(long, default_value_t = 0.995)]
    epsilon_decay: f64,
    #[arg(long, default_value_t = 0.01)]
    min_epsilon: f64,
    /// Seeds slip noise with SEED and exploration with SEED + 1
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct PlayArgs {
    #[arg(short, long, value_name = "CONFIG_FILE", default_value = "grid_config.json")]
    config: PathBuf,
    #[arg(short, long, value_name = "TABLE_FILE", default_value = "q_table.bin")]
    table: PathBuf,
    /// Steps to show before giving up
    #[arg(long, default_value_t = 50)]
    max_steps: usize,
    /// Delay between animation frames
    #[arg(long, default_value_t = 500)]
    delay_ms: u64,
    #[arg(long, default_value_t = 0.0)]
    slip: f64,
    #[arg(long)]
    seed: Option<u64>,
    /// Write logs here; the terminal UI hides them otherwise
    #[arg(long, value_name = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InitConfigArgs {
    #[arg(short, long, value_name = "CONFIG_FILE", default_value = "grid_config.json")]
    output: PathBuf,
    #[arg(long, default_value_t = 5)]
    rows: usize,
    #[arg(long, default_value_t = 5)]
    cols: usize,
    /// Place this many random obstacles instead of the diagonal layout
    #[arg(long)]
    random_obstacles: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    match cli.command {
        Command::Train(args) => {
            init_tracing(None)?;
            run_train(args)
        }
        Command::Play(args) => {
            if let Some(path) = &args.log_file {
                init_tracing(Some(path))?;
            }
            run_play(args)
        }
        Command::InitConfig(args) => {
            init_tracing(None)?;
            run_init_config(args)
        }
    }
}

/// Installs the log subscriber; `RUST_LOG` overrides the `info` default.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => GridConfig::load(path)
            .with_context(|| format!("Failed to load grid configuration {}", path.display()))?,
        None => GridConfig::default(),
    };
    let settings = EnvSettings {
        max_steps_per_episode: args.max_steps,
        slip_prob: args.slip,
        seed: args.seed,
        ..EnvSettings::default()
    };
    let mut world = GridWorld::new(config, settings).context("Invalid environment")?;

    let params = Hyperparameters {
        learning_rate: args.learning_rate,
        discount_factor: args.discount,
        initial_epsilon: args.epsilon.unwrap_or(1.0),
        epsilon_decay: args.epsilon_decay,
        min_epsilon: args.min_epsilon,
    };
    let mut agent = QLearningAgent::for_world(&world, params, agent_seed(args.seed))
        .context("Invalid hyperparameters")?;
    let resumed = args.resume
        && agent
            .load_table(&args.table)
            .with_context(|| format!("Failed to resume from {}", args.table.display()))?;
    let epsilon = starting_epsilon(args.epsilon, resumed, args.min_epsilon);
    agent.set_epsilon(epsilon);

    tracing::info!(
        episodes = args.episodes,
        rows = world.rows(),
        cols = world.cols(),
        slip = args.slip,
        epsilon,
        resumed,
        "starting training"
    );
    let summaries = train(&mut world, &mut agent, args.episodes, &mut NoopRenderer)?;
    let goals = summaries.iter().filter(|s| s.reached_goal()).count();
    tracing::info!(goals, episodes = summaries.len(), "training finished");

    agent
        .save_table(&args.table)
        .with_context(|| format!("Failed to save table to {}", args.table.display()))?;

    let rollout = greedy_rollout(&mut world, &agent, args.max_steps, &mut NoopRenderer)?;
    tracing::info!(
        steps = rollout.steps(),
        reward = rollout.total_reward,
        reached_goal = rollout.reached_goal(),
        "greedy rollout"
    );
    Ok(())
}

/// Exploration stream seed, kept apart from the world's slip stream.
fn agent_seed(seed: Option<u64>) -> Option<u64> {
    seed.map(|seed| seed.wrapping_add(1))
}

/// A resumed table is already trained, so it restarts at the exploration
/// floor unless the caller asks otherwise.
fn starting_epsilon(requested: Option<f64>, resumed: bool, min_epsilon: f64) -> f64 {
    match requested {
        Some(epsilon) => epsilon,
        None if resumed => min_epsilon,
        None => 1.0,
    }
}

fn run_init_config(args: InitConfigArgs) -> Result<()> {
    if args.rows == 0 || args.cols == 0 {
        anyhow::bail!("Grid must have at least one row and one column");
    }
    let start = Position::new(0, 0);
    let goal = Position::new(args.rows - 1, args.cols - 1);
    let config = match args.random_obstacles {
        Some(count) => GridConfig::new(args.rows, args.cols, start, goal)
            .with_random_obstacles(count, args.seed),
        None => {
            let last = args.rows.min(args.cols).saturating_sub(1);
            let diagonal = (1..last).map(|i| Position::new(i, i));
            GridConfig::new(args.rows, args.cols, start, goal).with_obstacles(diagonal)
        }
    };
    config.validate().context("Generated configuration is invalid")?;
    config
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    tracing::info!(
        path = %args.output.display(),
        obstacles = config.obstacles.len(),
        "wrote grid configuration"
    );
    Ok(())
}

fn run_play(args: PlayArgs) -> Result<()> {
    // Ensure the config file exists
    if !args.config.exists() {
        return Err(anyhow::anyhow!(
            "Config file does not exist: {}",
            args.config.display()
        ));
    }
    let config = GridConfig::load(&args.config)
        .with_context(|| format!("Failed to load grid configuration {}", args.config.display()))?;
    let settings = EnvSettings {
        slip_prob: args.slip,
        seed: args.seed,
        ..EnvSettings::default()
    };
    let mut world = GridWorld::new(config, settings).context("Invalid environment")?;

    let mut agent = QLearningAgent::for_world(&world, Hyperparameters::default(), args.seed)?;
    agent
        .load_table(&args.table)
        .with_context(|| format!("Failed to load table {}", args.table.display()))?;
    agent.set_epsilon(0.0);

    let rollout = greedy_rollout(&mut world, &agent, args.max_steps, &mut NoopRenderer)?;
    let mut app = App::new(world, rollout, Duration::from_millis(args.delay_ms));

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    // Run the main application loop
    let result = run_app(&mut terminal, &mut app);

    // Restore the terminal state
    restore_terminal(&mut terminal)?;
    result?;

    print_summary(&app.rollout);
    Ok(())
}

fn print_summary(rollout: &Rollout) {
    if rollout.reached_goal() {
        println!(
            "Episode complete. Total reward: {}, Total steps: {}",
            rollout.total_reward,
            rollout.steps()
        );
        let path: Vec<String> = rollout
            .path
            .iter()
            .map(|p| format!("({}, {})", p.row, p.col))
            .collect();
        println!("Path taken: {}", path.join(" -> "));
    } else {
        println!("Agent did not reach the goal within the step limit. Check training.");
    }
}

struct App {
    /// The environment, used for its layout.
    world: GridWorld,
    /// The recorded greedy episode being replayed.
    rollout: Rollout,
    /// Index into `rollout.path` of the frame on screen.
    frame: usize,
    tick_rate: Duration,
    /// Flag to control the main loop.
    should_quit: bool,
}

impl App {
    fn new(world: GridWorld, rollout: Rollout, tick_rate: Duration) -> Self {
        App {
            world,
            rollout,
            frame: 0,
            tick_rate,
            should_quit: false,
        }
    }

    fn finished(&self) -> bool {
        self.frame + 1 >= self.rollout.path.len()
    }

    /// Advances the replay by one step.
    fn tick(&mut self) {
        if !self.finished() {
            self.frame += 1;
        }
    }

    fn restart(&mut self) {
        self.frame = 0;
    }

    fn position(&self) -> Position {
        self.rollout.path[self.frame]
    }

    fn reward_so_far(&self) -> f64 {
        self.rollout.rewards[..self.frame].iter().sum()
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = app
            .tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    KeyCode::Char('r') => app.restart(),
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= app.tick_rate {
            app.tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(70), // Area for the map
            Constraint::Percentage(20), // Area for episode status
            Constraint::Percentage(10), // Area for help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], app);
    render_status(frame, main_layout[1], app);

    let help_text = Paragraph::new("Press 'r' to replay, 'q' or 'Esc' to quit.")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Renders step, position and reward of the current frame.
fn render_status(frame: &mut Frame, area: Rect, app: &App) {
    let position = app.position();
    let mut lines = vec![ListItem::from(Line::from(format!(
        "Step: {}/{}  Pos: ({}, {})  Reward: {:.1}",
        app.frame,
        app.rollout.steps(),
        position.row,
        position.col,
        app.reward_so_far()
    )))];

    if app.finished() {
        let outcome = match app.rollout.termination {
            Some(Termination::GoalReached) => {
                Span::styled("Goal reached", Style::default().fg(Color::Green).bold())
            }
            Some(Termination::Timeout) => {
                Span::styled("Episode timed out", Style::default().fg(Color::Yellow))
            }
            None => Span::styled("Step limit reached", Style::default().fg(Color::Red)),
        };
        lines.push(ListItem::from(Line::from(outcome)));
    }

    let status = List::new(lines).block(Block::default().borders(Borders::ALL).title("Episode"));
    frame.render_widget(status, area);
}

/// Renders the grid, the trail so far and the agent.
fn render_map(frame: &mut Frame, area: Rect, app: &App) {
    let grid = app.world.grid();
    let agent_pos = app.position();
    let trail = &app.rollout.path[..app.frame];

    let mut lines: Vec<Line> = Vec::with_capacity(grid.rows());
    for row in 0..grid.rows() {
        let mut spans: Vec<Span> = Vec::with_capacity(grid.cols());
        for col in 0..grid.cols() {
            let pos = Position::new(row, col);
            if pos == agent_pos {
                spans.push(Span::styled(" @ ", Style::default().fg(Color::Blue).bold()));
                continue;
            }
            let span = match grid[pos] {
                CellKind::Obstacle => Span::styled("###", Style::default().fg(Color::DarkGray)),
                CellKind::Start => Span::styled(" S ", Style::default().fg(Color::Green)),
                CellKind::Goal => Span::styled(" G ", Style::default().fg(Color::Red).bold()),
                CellKind::Empty if trail.contains(&pos) => {
                    Span::styled(" . ", Style::default().fg(Color::Yellow))
                }
                CellKind::Empty => Span::raw(" · "),
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Grid World").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}
