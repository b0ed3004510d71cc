use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use todostore::store::STORE_DIR;
use todostore::{Config, NewTask, Store, Task, TaskId, TaskState, TaskSummary, parse_due_date};

#[derive(Parser)]
#[command(name = "todostore")]
#[command(about = "TodoStore CLI - task tracking over SQLite with JSONL journals")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the store directory (overrides the config file)
    #[arg(short, long)]
    store_path: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task and print its id
    Add {
        /// Task title (at most 1024 characters)
        title: Option<String>,

        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due: Option<String>,
    },

    /// Mark a task done
    Done { id: TaskId },

    /// Remove a task's done marker
    Undone { id: TaskId },

    /// Delete a task (it must not be marked done)
    Rm { id: TaskId },

    /// Show one task
    Show { id: TaskId },

    /// List tasks
    Ls {
        /// Only tasks not yet done
        #[arg(long, conflicts_with = "done")]
        open: bool,

        /// Only tasks marked done
        #[arg(long)]
        done: bool,
    },

    /// List ids of tasks marked done
    Dones,

    /// Rebuild the database from the JSONL journals
    Sync,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.store_path {
        config.store_path = path;
    }

    init_logging(&config, cli.verbose)?;

    let mut store = Store::open_with_config(&config).context("Failed to open store")?;

    match cli.command {
        Commands::Add { title, due } => {
            let due_date = due.as_deref().map(parse_due_date).transpose()?;
            let id = store.add_task(NewTask { title, due_date })?;
            println!("{}", id);
        }
        Commands::Done { id } => {
            store.mark_done(id)?;
            println!("Task {} marked done", id);
        }
        Commands::Undone { id } => {
            store.unmark_done(id)?;
            println!("Task {} reopened", id);
        }
        Commands::Rm { id } => {
            store.delete_task(id)?;
            println!("Task {} deleted", id);
        }
        Commands::Show { id } => {
            let task = store.get_task(id)?.ok_or_else(|| eyre!("Task {} not found", id))?;
            let state = store.task_state(id)?;
            println!("{}", render(&task, state == TaskState::Done));
        }
        Commands::Ls { open, done } => {
            let summaries: Vec<TaskSummary> = store
                .list_task_summaries()?
                .into_iter()
                .filter(|s| (!open || !s.done) && (!done || s.done))
                .collect();

            if summaries.is_empty() {
                println!("{}", "No tasks".dimmed());
            }
            for summary in &summaries {
                println!("{}", render(&summary.task, summary.done));
            }
        }
        Commands::Dones => {
            for id in store.list_done()? {
                println!("{}", id);
            }
        }
        Commands::Sync => {
            println!("Syncing database from JSONL journals...");
            store.sync()?;
            println!("Sync complete");
        }
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let store_dir = config.store_path.join(STORE_DIR);
    fs::create_dir_all(&store_dir).context("Failed to create store directory")?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(store_dir.join("todostore.log"))
        .context("Failed to open log file")?;

    let level = if verbose { tracing::Level::DEBUG } else { config.level() };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .init();

    Ok(())
}

fn render(task: &Task, done: bool) -> String {
    let mark = if done { "x".green().to_string() } else { " ".to_string() };
    let title = task.title.as_deref().unwrap_or("(untitled)");
    let title = if done { title.dimmed().to_string() } else { title.to_string() };
    let due = task
        .due_date
        .map(|d| format!("  {}", format!("due {}", d).yellow()))
        .unwrap_or_default();

    format!("{:>4} [{}] {}{}", task.id.get(), mark, title, due)
}
