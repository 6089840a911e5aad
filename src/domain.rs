use serde::{Deserialize, Serialize};

/// Hard cap on instances within a single project.
pub const PROJECT_INSTANCE_LIMIT: usize = 10;

/// Titles are ASCII-safe identifiers used for branch and session names.
pub const MAX_TITLE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The agent is working.
    Running,
    /// The agent is waiting for user input.
    Ready,
    /// The instance is starting up or mid-operation.
    Loading,
    /// Worktree removed, branch preserved, session possibly detached.
    Paused,
    /// A recoverable failure; only resume or kill are valid next.
    Error,
    /// A non-ASCII display name is being translated before first start.
    Translating,
}

impl Status {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Ready => "ready",
            Self::Loading => "loading",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Translating => "translating",
        }
    }

    /// Maps the integer statuses of the legacy single-file state format.
    pub fn from_legacy_code(code: i64) -> Self {
        match code {
            0 => Self::Running,
            1 => Self::Ready,
            2 => Self::Loading,
            3 => Self::Paused,
            _ => Self::Ready,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SquadError {
    #[error("{0}")]
    NotStarted(String),

    #[error("{0}")]
    PausedForbidden(String),

    #[error("{0}")]
    AlreadyStarted(String),

    #[error("invalid instance title: {0}")]
    NameInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("instance with title '{0}' already exists")]
    DuplicateTitle(String),

    #[error("project instance limit reached: maximum {0} instances allowed")]
    LimitExceeded(usize),

    #[error("cannot resume: branch '{0}' is checked out, please switch to a different branch")]
    BranchCheckedOut(String),

    #[error("tmux session already exists: {0}")]
    SessionExists(String),

    #[error("base commit SHA not set")]
    BaseCommitUnset,

    #[error("io error: {0}")]
    Io(String),

    #[error("child process failed: {0}")]
    ChildProcess(String),

    #[error("{}", format_error_list(.0))]
    Aggregate(Vec<SquadError>),
}

impl From<std::io::Error> for SquadError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

fn format_error_list(errors: &[SquadError]) -> String {
    let mut message = "multiple errors occurred:".to_string();
    for error in errors {
        message.push_str("\n  - ");
        message.push_str(&error.to_string());
    }
    message
}

/// Collapses an accumulated error list the way kill and pause report them:
/// nothing, the single error, or an aggregate.
pub fn combine_errors(errors: Vec<SquadError>) -> Result<(), SquadError> {
    let mut errors = errors;
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(SquadError::Aggregate(errors)),
    }
}

pub fn validate_title(title: &str) -> Result<(), SquadError> {
    if title.is_empty() {
        return Err(SquadError::NameInvalid("title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(SquadError::NameInvalid(format!(
            "title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
