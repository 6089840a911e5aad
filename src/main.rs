use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use claude_squad::config;
use claude_squad::domain::SquadError;
use claude_squad::infrastructure::clipboard::SystemClipboard;
use claude_squad::infrastructure::event_log::{
    EventLogger, FileEventLogger, NullEventLogger, Severity,
};
use claude_squad::infrastructure::process::ProcessCmdRunner;
use claude_squad::infrastructure::pty::NativePtyFactory;
use claude_squad::session::tmux::cleanup_sessions;
use claude_squad::session::{InstanceManager, SupervisorDeps};

const LOG_FILE_NAME: &str = "claudesquad.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Version,
    Reset,
    Debug,
    Usage,
}

fn parse_command(args: impl IntoIterator<Item = String>) -> Command {
    let mut args = args.into_iter();
    match args.next().as_deref() {
        Some("version" | "--version" | "-v") => Command::Version,
        Some("reset") => Command::Reset,
        Some("debug") => Command::Debug,
        _ => Command::Usage,
    }
}

fn open_logger(config_dir: &PathBuf) -> Arc<dyn EventLogger> {
    if std::fs::create_dir_all(config_dir).is_err() {
        return Arc::new(NullEventLogger);
    }
    match FileEventLogger::open(&config_dir.join(LOG_FILE_NAME)) {
        Ok(logger) => Arc::new(logger),
        Err(_) => Arc::new(NullEventLogger),
    }
}

fn run() -> Result<(), SquadError> {
    let command = parse_command(std::env::args().skip(1));

    match command {
        Command::Version => {
            println!("claude-squad {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Usage => {
            println!("claude-squad — supervisor for AI coding agents in isolated worktrees");
            println!();
            println!("usage: claude-squad <command>");
            println!();
            println!("commands:");
            println!("  version   print the version");
            println!("  reset     kill all managed tmux sessions and clear stored state");
            println!("  debug     print configuration and known projects");
            Ok(())
        }
        Command::Reset => reset(),
        Command::Debug => debug(),
    }
}

fn reset() -> Result<(), SquadError> {
    let config_dir = config::config_dir()?;
    let logger = open_logger(&config_dir);
    let runner = ProcessCmdRunner;

    cleanup_sessions(&runner, logger.as_ref())?;
    println!("killed all managed tmux sessions");

    let projects_dir = config_dir.join("projects");
    if projects_dir.exists() {
        std::fs::remove_dir_all(&projects_dir)
            .map_err(|error| SquadError::Io(format!("failed to remove project state: {error}")))?;
        println!("removed {}", projects_dir.display());
    }

    let global_state = config_dir.join("global_state.json");
    if global_state.exists() {
        std::fs::remove_file(&global_state)
            .map_err(|error| SquadError::Io(format!("failed to remove global state: {error}")))?;
        println!("removed {}", global_state.display());
    }

    logger.log(Severity::Info, "reset completed");
    Ok(())
}

fn debug() -> Result<(), SquadError> {
    let config_dir = config::config_dir()?;
    let logger = open_logger(&config_dir);
    let runner: Arc<ProcessCmdRunner> = Arc::new(ProcessCmdRunner);
    let loaded = config::load_config(&config_dir, runner.as_ref(), logger.as_ref());

    println!("config dir:     {}", config_dir.display());
    println!("default program: {}", loaded.default_program);
    println!("auto yes:        {}", loaded.auto_yes);
    println!("poll interval:   {}ms", loaded.daemon_poll_interval);
    println!("branch prefix:   {}", loaded.branch_prefix);

    let deps = SupervisorDeps {
        runner,
        pty_factory: Arc::new(NativePtyFactory),
        logger,
        clipboard: Arc::new(SystemClipboard::default()),
        branch_prefix: loaded.branch_prefix.clone(),
    };
    let mut manager = InstanceManager::new(&config_dir, deps);

    let projects = manager.all_projects();
    println!();
    println!("projects: {}", projects.len());
    for project in projects {
        println!(
            "  {}  {}  {} instances  ({})",
            project.id,
            project.name,
            project.instance_count,
            project.repo_path.display()
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("claude-squad: {error}");
            ExitCode::FAILURE
        }
    }
}
