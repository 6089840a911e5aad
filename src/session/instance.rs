use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DiffStats, SquadError, Status, combine_errors, validate_title};
use crate::infrastructure::clipboard::Clipboard;
use crate::infrastructure::event_log::{EventLogger, Severity};
use crate::infrastructure::process::CmdRunner;
use crate::infrastructure::pty::PtyFactory;
use crate::session::tmux::TmuxSession;
use crate::session::worktree::GitWorktree;

/// Pause lets the terminal settle before the enter keystroke, so the
/// carriage return is not read as part of the prompt text.
const PROMPT_SETTLE: Duration = Duration::from_millis(100);

/// Capabilities an instance needs to drive its session and worktree, plus
/// the project-scoped paths new worktrees land under.
#[derive(Clone)]
pub struct InstanceDeps {
    pub runner: Arc<dyn CmdRunner>,
    pub pty_factory: Arc<dyn PtyFactory>,
    pub logger: Arc<dyn EventLogger>,
    pub clipboard: Arc<dyn Clipboard>,
    pub branch_prefix: String,
    pub worktrees_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceOptions {
    /// Internal identifier; may start empty and be set before first start.
    pub title: String,
    /// Workspace path, made absolute on construction.
    pub path: PathBuf,
    /// Program to run, e.g. "claude" or "aider --model ollama_chat/gemma3:1b".
    pub program: String,
    /// Automatically press enter when the agent prompts.
    pub auto_yes: bool,
}

/// One agent workspace: a title bound to a branch, a worktree, and a
/// background tmux session.
pub struct Instance {
    pub title: String,
    /// User-facing name; may contain non-ASCII characters.
    pub display_name: String,
    pub path: PathBuf,
    pub branch: String,
    pub status: Status,
    pub program: String,
    pub height: u16,
    pub width: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auto_yes: bool,
    /// Initial prompt delivered after first start.
    pub prompt: String,

    diff_stats: Option<DiffStats>,
    started: bool,
    tmux_session: Option<TmuxSession>,
    git_worktree: Option<GitWorktree>,
    deps: InstanceDeps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GitWorktreeData {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffStatsData {
    pub added: usize,
    pub removed: usize,
    pub content: String,
}

/// On-disk image of an instance inside a project state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceData {
    pub title: String,
    #[serde(default)]
    pub display_name: String,
    pub path: PathBuf,
    pub branch: String,
    pub status: Status,
    pub height: u16,
    pub width: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub program: String,
    #[serde(default)]
    pub auto_yes: bool,
    #[serde(default)]
    pub worktree: GitWorktreeData,
    #[serde(default)]
    pub diff_stats: DiffStatsData,
}

impl Instance {
    pub fn new(opts: InstanceOptions, deps: InstanceDeps) -> Result<Self, SquadError> {
        let now = Utc::now();
        let abs_path = std::path::absolute(&opts.path)
            .map_err(|error| SquadError::Io(format!("failed to get absolute path: {error}")))?;

        Ok(Self {
            display_name: opts.title.clone(),
            title: opts.title,
            path: abs_path,
            branch: String::new(),
            status: Status::Ready,
            program: opts.program,
            height: 0,
            width: 0,
            created_at: now,
            updated_at: now,
            auto_yes: opts.auto_yes,
            prompt: String::new(),
            diff_stats: None,
            started: false,
            tmux_session: None,
            git_worktree: None,
            deps,
        })
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn paused(&self) -> bool {
        self.status == Status::Paused
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// The title names the branch and the session, so it freezes at first
    /// start.
    pub fn set_title(&mut self, title: &str) -> Result<(), SquadError> {
        if self.started {
            return Err(SquadError::AlreadyStarted(
                "cannot change title of a started instance".to_string(),
            ));
        }
        validate_title(title)?;
        self.title = title.to_string();
        Ok(())
    }

    pub fn repo_name(&self) -> Result<String, SquadError> {
        let worktree = self.worktree("get repo name")?;
        Ok(worktree.repo_name())
    }

    pub fn diff_stats(&self) -> Option<&DiffStats> {
        self.diff_stats.as_ref()
    }

    fn session(&self, operation: &str) -> Result<&TmuxSession, SquadError> {
        if !self.started {
            return Err(SquadError::NotStarted(format!(
                "cannot {operation} for instance that has not been started"
            )));
        }
        self.tmux_session.as_ref().ok_or_else(|| {
            SquadError::NotStarted("tmux session not initialized".to_string())
        })
    }

    fn worktree(&self, operation: &str) -> Result<&GitWorktree, SquadError> {
        if !self.started {
            return Err(SquadError::NotStarted(format!(
                "cannot {operation} for instance that has not been started"
            )));
        }
        self.git_worktree.as_ref().ok_or_else(|| {
            SquadError::NotStarted("git worktree not initialized".to_string())
        })
    }

    /// First start materializes the branch, worktree, and session;
    /// subsequent starts restore the surviving session.
    pub fn start(&mut self, first_time_setup: bool) -> Result<(), SquadError> {
        if self.title.is_empty() {
            return Err(SquadError::NameInvalid(
                "instance title cannot be empty".to_string(),
            ));
        }

        if self.tmux_session.is_none() {
            self.tmux_session = Some(TmuxSession::new(
                &self.title,
                &self.program,
                Arc::clone(&self.deps.pty_factory),
                Arc::clone(&self.deps.runner),
                Arc::clone(&self.deps.logger),
            ));
        }

        if first_time_setup {
            let (worktree, branch) = GitWorktree::create(
                &self.path,
                &self.title,
                &self.deps.branch_prefix,
                &self.deps.worktrees_dir,
                Arc::clone(&self.deps.runner),
            )
            .map_err(|error| {
                SquadError::Io(format!("failed to create git worktree: {error}"))
            })?;
            self.git_worktree = Some(worktree);
            self.branch = branch;
        }

        self.setup_resources(first_time_setup)?;

        self.started = true;
        self.set_status(Status::Running);
        Ok(())
    }

    fn setup_resources(&mut self, first_time_setup: bool) -> Result<(), SquadError> {
        let Some(session) = self.tmux_session.clone() else {
            return Err(SquadError::NotStarted(
                "tmux session not initialized".to_string(),
            ));
        };

        if !first_time_setup {
            return session.restore().map_err(|error| {
                SquadError::Io(format!("failed to restore existing session: {error}"))
            });
        }

        let Some(worktree) = self.git_worktree.as_mut() else {
            return Err(SquadError::NotStarted(
                "git worktree not initialized".to_string(),
            ));
        };

        worktree
            .setup()
            .map_err(|error| SquadError::Io(format!("failed to setup git worktree: {error}")))?;

        if let Err(error) = session.start(worktree.worktree_path()) {
            // The worktree was materialized above; release it before
            // surfacing the session failure.
            let mut message = format!("failed to start new session: {error}");
            if let Err(cleanup_error) = worktree.cleanup() {
                message.push_str(&format!(" (cleanup error: {cleanup_error})"));
            }
            return Err(SquadError::Io(message));
        }
        Ok(())
    }

    /// Terminates the session and cleans up the worktree and branch. Every
    /// step runs even when an earlier one fails.
    pub fn kill(&mut self) -> Result<(), SquadError> {
        if !self.started {
            return Ok(());
        }

        let mut errors = Vec::new();

        // The session runs inside the worktree; close it first.
        if let Some(session) = self.tmux_session.as_ref()
            && let Err(error) = session.close()
        {
            errors.push(SquadError::Io(format!(
                "failed to close tmux session: {error}"
            )));
        }

        if let Some(worktree) = self.git_worktree.as_ref()
            && let Err(error) = worktree.cleanup()
        {
            errors.push(SquadError::Io(format!(
                "failed to cleanup git worktree: {error}"
            )));
        }

        combine_errors(errors)
    }

    /// Commits dirty work, detaches the session, and removes the worktree
    /// while keeping the branch. The branch name lands on the clipboard so
    /// the operator can check it out elsewhere.
    pub fn pause(&mut self) -> Result<(), SquadError> {
        if !self.started {
            return Err(SquadError::NotStarted(
                "cannot pause instance that has not been started".to_string(),
            ));
        }
        if self.status == Status::Paused {
            return Err(SquadError::PausedForbidden(
                "instance is already paused".to_string(),
            ));
        }

        let mut errors = Vec::new();
        let worktree = match self.worktree("pause") {
            Ok(worktree) => worktree.clone(),
            Err(error) => return Err(error),
        };

        match worktree.is_dirty() {
            Err(error) => {
                let error =
                    SquadError::Io(format!("failed to check if worktree is dirty: {error}"));
                self.deps.logger.log(Severity::Error, &error.to_string());
                errors.push(error);
            }
            Ok(true) => {
                let message = format!(
                    "[claudesquad] update from '{}' on {} (paused)",
                    self.title,
                    Local::now().format("%d %b %y %H:%M %Z")
                );
                if let Err(error) = worktree.commit_changes(&message) {
                    let error =
                        SquadError::Io(format!("failed to commit changes: {error}"));
                    self.deps.logger.log(Severity::Error, &error.to_string());
                    errors.push(error);
                    // Do not remove the worktree when its changes could not
                    // be preserved.
                    return combine_errors(errors);
                }
            }
            Ok(false) => {}
        }

        if let Some(session) = self.tmux_session.as_ref()
            && let Err(error) = session.detach_safely()
        {
            let error = SquadError::Io(format!("failed to detach tmux session: {error}"));
            self.deps.logger.log(Severity::Error, &error.to_string());
            errors.push(error);
        }

        if worktree.worktree_path().exists() {
            if let Err(error) = worktree.remove() {
                let error = SquadError::Io(format!("failed to remove git worktree: {error}"));
                self.deps.logger.log(Severity::Error, &error.to_string());
                errors.push(error);
                return combine_errors(errors);
            }

            if let Err(error) = worktree.prune() {
                let error = SquadError::Io(format!("failed to prune git worktrees: {error}"));
                self.deps.logger.log(Severity::Error, &error.to_string());
                errors.push(error);
                return combine_errors(errors);
            }
        }

        combine_errors(errors)?;

        self.set_status(Status::Paused);
        let _ = self.deps.clipboard.write_text(worktree.branch_name());
        Ok(())
    }

    /// Recreates the worktree and restores or recreates the session.
    pub fn resume(&mut self) -> Result<(), SquadError> {
        if !self.started {
            return Err(SquadError::NotStarted(
                "cannot resume instance that has not been started".to_string(),
            ));
        }
        if self.status != Status::Paused {
            return Err(SquadError::PausedForbidden(
                "can only resume paused instances".to_string(),
            ));
        }

        let Some(worktree) = self.git_worktree.as_mut() else {
            return Err(SquadError::NotStarted(
                "git worktree not initialized".to_string(),
            ));
        };

        match worktree.is_branch_checked_out() {
            Err(error) => {
                return Err(SquadError::Io(format!(
                    "failed to check if branch is checked out: {error}"
                )));
            }
            Ok(true) => {
                return Err(SquadError::BranchCheckedOut(
                    worktree.branch_name().to_string(),
                ));
            }
            Ok(false) => {}
        }

        worktree
            .setup()
            .map_err(|error| SquadError::Io(format!("failed to setup git worktree: {error}")))?;
        let worktree = worktree.clone();

        let Some(session) = self.tmux_session.clone() else {
            return Err(SquadError::NotStarted(
                "tmux session not initialized".to_string(),
            ));
        };

        let needs_fresh_session = if session.does_session_exist() {
            match session.restore() {
                Ok(()) => false,
                Err(error) => {
                    self.deps.logger.log(
                        Severity::Error,
                        &format!("failed to restore session, recreating: {error}"),
                    );
                    true
                }
            }
        } else {
            true
        };

        if needs_fresh_session
            && let Err(error) = session.start(worktree.worktree_path())
        {
            let mut message = format!("failed to start new session: {error}");
            if let Err(cleanup_error) = worktree.cleanup() {
                message.push_str(&format!(" (cleanup error: {cleanup_error})"));
                self.deps.logger.log(Severity::Error, &message);
            }
            return Err(SquadError::Io(message));
        }

        self.set_status(Status::Running);
        Ok(())
    }

    /// Visible pane text; empty before first start and while paused.
    pub fn preview(&self) -> Result<String, SquadError> {
        if !self.started || self.status == Status::Paused {
            return Ok(String::new());
        }
        self.session("preview")?.capture_pane_content()
    }

    /// Whole scrollback; empty before first start and while paused.
    pub fn preview_full_history(&self) -> Result<String, SquadError> {
        if !self.started || self.status == Status::Paused {
            return Ok(String::new());
        }
        self.session("preview")?.capture_full_history()
    }

    pub fn has_updated(&self) -> (bool, bool) {
        if !self.started {
            return (false, false);
        }
        match self.session("check for updates") {
            Ok(session) => session.has_updated(),
            Err(_) => (false, false),
        }
    }

    /// Accepts the agent's pending prompt, but only in auto-yes mode.
    pub fn tap_enter(&self) {
        if !self.started || !self.auto_yes {
            return;
        }
        if let Ok(session) = self.session("tap enter")
            && let Err(error) = session.tap_enter()
        {
            self.deps
                .logger
                .log(Severity::Error, &format!("error tapping enter: {error}"));
        }
    }

    pub fn attach(&self) -> Result<Receiver<()>, SquadError> {
        self.session("attach")?.attach()
    }

    pub fn tmux_alive(&self) -> bool {
        self.tmux_session
            .as_ref()
            .is_some_and(TmuxSession::does_session_exist)
    }

    /// Recovery path for a dead session: kill whatever is left and start a
    /// fresh session in the existing worktree.
    pub fn restart_tmux(&mut self) -> Result<(), SquadError> {
        let worktree_path = self.worktree("restart tmux")?.worktree_path().to_path_buf();
        let session = self.session("restart tmux")?.clone();

        if let Err(error) = session.close() {
            self.deps.logger.log(
                Severity::Warning,
                &format!("error closing dead session before restart: {error}"),
            );
        }
        session.start(&worktree_path)
    }

    pub fn set_preview_size(&mut self, width: u16, height: u16) -> Result<(), SquadError> {
        if !self.started || self.status == Status::Paused {
            return Err(SquadError::PausedForbidden(
                "cannot set preview size for instance that has not been started or is paused"
                    .to_string(),
            ));
        }
        self.width = width;
        self.height = height;
        self.session("set preview size")?
            .set_detached_size(width, height)
    }

    /// Types the prompt, lets the terminal settle, then taps enter.
    pub fn send_prompt(&self, prompt: &str) -> Result<(), SquadError> {
        let session = self.session("send prompt")?;
        session
            .send_keys(prompt)
            .map_err(|error| SquadError::Io(format!("error sending keys: {error}")))?;

        thread::sleep(PROMPT_SETTLE);
        session
            .tap_enter()
            .map_err(|error| SquadError::Io(format!("error tapping enter: {error}")))
    }

    pub fn send_keys(&self, keys: &str) -> Result<(), SquadError> {
        if !self.started || self.status == Status::Paused {
            return Err(SquadError::PausedForbidden(
                "cannot send keys to instance that has not been started or is paused".to_string(),
            ));
        }
        self.session("send keys")?.send_keys(keys)
    }

    /// Refreshes the cached diff stats from the worktree. Not started
    /// clears them; paused keeps the previous snapshot; an unset base
    /// commit means the worktree is not materialized yet.
    pub fn update_diff_stats(&mut self) -> Result<(), SquadError> {
        if !self.started {
            self.diff_stats = None;
            return Ok(());
        }
        if self.status == Status::Paused {
            return Ok(());
        }

        let worktree = self.worktree("update diff stats")?;
        match worktree.diff() {
            Ok(stats) => {
                self.diff_stats = Some(stats);
                Ok(())
            }
            Err(SquadError::BaseCommitUnset) => {
                self.diff_stats = None;
                Ok(())
            }
            Err(error) => Err(SquadError::Io(format!(
                "failed to get diff stats: {error}"
            ))),
        }
    }

    pub fn git_worktree(&self) -> Result<&GitWorktree, SquadError> {
        self.worktree("get git worktree")
    }

    /// Injects a prepared session handle; start() will adopt it instead of
    /// creating its own.
    pub fn set_tmux_session(&mut self, session: TmuxSession) {
        self.tmux_session = Some(session);
    }

    pub fn to_instance_data(&self) -> InstanceData {
        InstanceData {
            title: self.title.clone(),
            display_name: self.display_name.clone(),
            path: self.path.clone(),
            branch: self.branch.clone(),
            status: self.status,
            height: self.height,
            width: self.width,
            created_at: self.created_at,
            updated_at: Utc::now(),
            program: self.program.clone(),
            auto_yes: self.auto_yes,
            worktree: self
                .git_worktree
                .as_ref()
                .map(|worktree| GitWorktreeData {
                    repo_path: worktree.repo_path().to_path_buf(),
                    worktree_path: worktree.worktree_path().to_path_buf(),
                    session_name: worktree.session_name().to_string(),
                    branch_name: worktree.branch_name().to_string(),
                    base_commit_sha: worktree
                        .base_commit_sha()
                        .unwrap_or_default()
                        .to_string(),
                })
                .unwrap_or_default(),
            diff_stats: self
                .diff_stats
                .as_ref()
                .map(|stats| DiffStatsData {
                    added: stats.added,
                    removed: stats.removed,
                    content: stats.content.clone(),
                })
                .unwrap_or_default(),
        }
    }

    /// Rebuilds an instance from storage. Paused records come back without
    /// touching tmux; everything else restores its session immediately.
    pub fn from_instance_data(data: InstanceData, deps: InstanceDeps) -> Result<Self, SquadError> {
        let display_name = if data.display_name.is_empty() {
            data.title.clone()
        } else {
            data.display_name
        };

        let mut instance = Self {
            title: data.title,
            display_name,
            path: data.path,
            branch: data.branch,
            status: data.status,
            program: data.program,
            height: data.height,
            width: data.width,
            created_at: data.created_at,
            updated_at: data.updated_at,
            auto_yes: data.auto_yes,
            prompt: String::new(),
            diff_stats: Some(DiffStats {
                added: data.diff_stats.added,
                removed: data.diff_stats.removed,
                content: data.diff_stats.content,
            }),
            started: false,
            tmux_session: None,
            git_worktree: Some(GitWorktree::from_storage(
                data.worktree.repo_path,
                data.worktree.worktree_path,
                data.worktree.session_name,
                data.worktree.branch_name,
                data.worktree.base_commit_sha,
                Arc::clone(&deps.runner),
            )),
            deps,
        };

        if instance.paused() {
            instance.started = true;
            instance.tmux_session = Some(TmuxSession::new(
                &instance.title,
                &instance.program,
                Arc::clone(&instance.deps.pty_factory),
                Arc::clone(&instance.deps.runner),
                Arc::clone(&instance.deps.logger),
            ));
        } else {
            instance.start(false)?;
        }

        Ok(instance)
    }
}
