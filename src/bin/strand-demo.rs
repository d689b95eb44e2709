//! Strand demo - a tick-driven prize game on the step runtime
//!
//! Recreates the classic scenario: a board-mutation loop driven by game
//! ticks runs alongside a prize race in which picking up the key opens
//! a chest window that expires unless the chest is taken in time. The
//! whole game runs on a virtual clock and an in-process event hub.

use std::cell::RefCell;
use std::rc::Rc;

use clap::Parser;
use strand::runtime::{Env, Event, Scheduler, SchedulerConfig, Step, Value};

#[derive(Parser)]
#[command(name = "strand-demo")]
#[command(about = "Tick-driven prize game on the strand step runtime", long_about = None)]
struct Cli {
    /// Simulated game length in seconds
    #[arg(long, default_value = "10")]
    seconds: u64,

    /// Chest window after the key is taken, in milliseconds
    #[arg(long, default_value = "6000")]
    chest_window_ms: u64,

    /// Game tick at which the key is picked up
    #[arg(long, default_value = "2")]
    key_tick: u64,

    /// Optional scheduler configuration file (JSON)
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

type Board = Rc<RefCell<Vec<Vec<i64>>>>;

/// Swap a fixed set of board tiles, returning the restore list
fn apply_changes(board: &Board, changes: &[(usize, usize, i64)]) -> Vec<(usize, usize, i64)> {
    let mut grid = board.borrow_mut();
    let mut restore = Vec::with_capacity(changes.len());
    for &(row, col, value) in changes {
        restore.push((row, col, grid[row][col]));
        grid[row][col] = value;
    }
    restore
}

/// The board-mutation loop: wait a tick, swap tiles, wait three ticks,
/// swap them back, forever
fn board_loop(board: Board) -> Step {
    let changes: Rc<RefCell<Vec<(usize, usize, i64)>>> =
        Rc::new(RefCell::new(vec![(0, 1, 9), (2, 2, 10)]));
    let swap = {
        let board = board.clone();
        let changes = changes.clone();
        Step::lift(move |value| {
            let restore = apply_changes(&board, &changes.borrow());
            *changes.borrow_mut() = restore;
            tracing::info!(board = ?board.borrow(), "board tiles changed");
            value
        })
    };
    Step::delay_ticks(1)
        .then(swap.clone())
        .then(Step::delay_ticks(3))
        .then(swap)
        .then(Step::lift(Value::continue_with))
        .repeat()
}

/// The prize flow: the key opens the chest window; the chest must be
/// taken before the window expires
fn prize_flow(chest_window_ms: u64) -> Step {
    let opened = Step::lift(|value| {
        tracing::info!("key taken, chest window open");
        value
    });
    let expired = Step::lift(|value| {
        tracing::info!("chest window expired, chest locked again");
        value
    });
    let taken = Step::lift(|value| {
        if let Value::Pair(pair) = &value {
            let player = pair
                .snd()
                .field("player")
                .cloned()
                .unwrap_or(Value::text("someone"));
            tracing::info!(%player, "chest taken");
        }
        value
    });

    Step::listen_for("take-prize", "name", Value::text("key"))
        .then(opened)
        .then(
            Step::delay(chest_window_ms)
                .then(expired)
                .race(Step::listen_for("take-prize", "name", Value::text("chest")).then(taken)),
        )
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };

    let (env, hub, clock) = Env::with_hub_and_clock();
    let scheduler = Scheduler::new(config, env);

    let board: Board = Rc::new(RefCell::new(vec![
        vec![1, 2, 3],
        vec![4, 5, 6],
        vec![7, 5, 8],
    ]));

    let game = board_loop(board).fanout(prize_flow(cli.chest_window_ms));
    let progress = game.run(Value::Null, &scheduler)?;

    // drive the game clock: one tick per simulated second
    for second in 1..=cli.seconds {
        clock.advance(1000);
        let tick = hub.emit_tick();
        tracing::info!(tick, "tick");

        if second == cli.key_tick {
            hub.emit(Event::new(
                "take-prize",
                Value::record([("name", "key".into()), ("player", "Dave".into())]),
            ));
        }
        if second == cli.key_tick + 4 {
            hub.emit(Event::new(
                "take-prize",
                Value::record([("name", "chest".into()), ("player", "Tony".into())]),
            ));
        }
        if let Some(fatal) = scheduler.take_fatal() {
            anyhow::bail!("scheduler aborted: {fatal}");
        }
    }

    tracing::info!(status = ?progress.status(), "game over");
    progress.cancel();
    scheduler.shutdown();
    Ok(())
}
