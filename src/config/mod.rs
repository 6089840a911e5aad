pub mod global_state;

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::SquadError;
use crate::infrastructure::event_log::{EventLogger, Severity};
use crate::infrastructure::process::{CmdRunner, CmdSpec};

pub const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_PROGRAM: &str = "claude";
const DEFAULT_DAEMON_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Program launched in new instances.
    pub default_program: String,
    /// Automatically accept agent prompts.
    #[serde(default)]
    pub auto_yes: bool,
    /// Poll cadence (ms) used by auto-yes daemon mode.
    #[serde(default = "default_daemon_poll_interval")]
    pub daemon_poll_interval: u64,
    /// Prefix for branches created per instance, e.g. "alice/".
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

const fn default_daemon_poll_interval() -> u64 {
    DEFAULT_DAEMON_POLL_INTERVAL_MS
}

fn default_branch_prefix() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    if username.is_empty() {
        return "session/".to_string();
    }
    format!("{}/", username.to_lowercase())
}

/// `$HOME/.claude-squad`.
pub fn config_dir() -> Result<PathBuf, SquadError> {
    dirs::home_dir()
        .map(|home| home.join(".claude-squad"))
        .ok_or_else(|| SquadError::Io("failed to resolve home directory".to_string()))
}

pub fn default_config(runner: &dyn CmdRunner, logger: &dyn EventLogger) -> Config {
    let default_program = match find_claude_command(runner) {
        Ok(program) => program,
        Err(error) => {
            logger.log(
                Severity::Error,
                &format!("failed to resolve claude command: {error}"),
            );
            DEFAULT_PROGRAM.to_string()
        }
    };

    Config {
        default_program,
        auto_yes: false,
        daemon_poll_interval: DEFAULT_DAEMON_POLL_INTERVAL_MS,
        branch_prefix: default_branch_prefix(),
    }
}

/// Loads the configuration from `<dir>/config.json`. A missing file writes
/// and returns defaults; a parse failure falls back to defaults.
pub fn load_config(dir: &Path, runner: &dyn CmdRunner, logger: &dyn EventLogger) -> Config {
    let path = dir.join(CONFIG_FILE_NAME);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            let defaults = default_config(runner, logger);
            if let Err(save_error) = save_config(dir, &defaults) {
                logger.log(
                    Severity::Warning,
                    &format!("failed to save default config: {save_error}"),
                );
            }
            return defaults;
        }
        Err(error) => {
            logger.log(
                Severity::Warning,
                &format!("failed to read config file: {error}"),
            );
            return default_config(runner, logger);
        }
    };

    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => config,
        Err(error) => {
            logger.log(
                Severity::Error,
                &format!("failed to parse config file: {error}"),
            );
            default_config(runner, logger)
        }
    }
}

pub fn save_config(dir: &Path, config: &Config) -> Result<(), SquadError> {
    fs::create_dir_all(dir)
        .map_err(|error| SquadError::Io(format!("failed to create config directory: {error}")))?;

    let encoded = serde_json::to_string_pretty(config)
        .map_err(|error| SquadError::Io(format!("failed to encode config: {error}")))?;

    let path = dir.join(CONFIG_FILE_NAME);
    write_atomically(&path, encoded.as_bytes())
}

/// Writes through a temp file and renames, so a crash never leaves a
/// truncated state file behind.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SquadError> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    fs::write(&temp_path, bytes)
        .map_err(|error| SquadError::Io(format!("failed to write {}: {error}", path.display())))?;
    fs::rename(&temp_path, path)
        .map_err(|error| SquadError::Io(format!("failed to rename {}: {error}", path.display())))
}

/// Resolves the `claude` command the way a login shell would see it:
/// source the rc file, run `which claude`, unwrap alias output, and fall
/// back to a PATH scan.
pub fn find_claude_command(runner: &dyn CmdRunner) -> Result<String, SquadError> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());

    let shell_cmd = if shell.contains("zsh") {
        "source ~/.zshrc &>/dev/null || true; which claude"
    } else if shell.contains("bash") {
        "source ~/.bashrc &>/dev/null || true; which claude"
    } else {
        "which claude"
    };

    let spec = CmdSpec::new(&shell).args(["-c", shell_cmd]);
    if let Ok(stdout) = runner.output(&spec) {
        let resolved = String::from_utf8_lossy(&stdout).trim().to_string();
        if !resolved.is_empty() {
            return Ok(parse_alias_output(&resolved));
        }
    }

    if let Some(found) = search_path(DEFAULT_PROGRAM) {
        return Ok(found);
    }

    Err(SquadError::NotFound(
        "claude command not found in aliases or PATH".to_string(),
    ))
}

/// Shells print aliases as `claude: aliased to /path`, `claude -> /path`
/// or `claude=/path`; extract the target, otherwise return the input.
pub(crate) fn parse_alias_output(output: &str) -> String {
    let Ok(alias_regex) = Regex::new(r"(?:aliased to|->|=)\s*(\S+)") else {
        return output.to_string();
    };

    match alias_regex.captures(output) {
        Some(captures) => captures[1].to_string(),
        None => output.to_string(),
    }
}

fn search_path(program: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().to_string());
        }
    }
    None
}
