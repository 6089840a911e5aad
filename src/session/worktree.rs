use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{DiffStats, SquadError, combine_errors};
use crate::infrastructure::process::{CmdRunner, CmdSpec};

/// Walks parent directories until one holds a `.git` entry (a directory in
/// the main checkout, a file inside linked worktrees).
pub fn find_repo_root(start: &Path) -> Result<PathBuf, SquadError> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(SquadError::NotFound(format!(
                "failed to find git repository root from path: {}",
                start.display()
            )));
        }
    }
}

/// One branch-and-worktree pair owned by an instance. The branch carries
/// the configured per-user prefix; the worktree lives under the project's
/// worktrees directory.
#[derive(Clone)]
pub struct GitWorktree {
    repo_path: PathBuf,
    worktree_path: PathBuf,
    session_name: String,
    branch_name: String,
    base_commit_sha: Option<String>,
    runner: Arc<dyn CmdRunner>,
}

impl GitWorktree {
    pub fn create(
        path: &Path,
        session_name: &str,
        branch_prefix: &str,
        worktrees_dir: &Path,
        runner: Arc<dyn CmdRunner>,
    ) -> Result<(Self, String), SquadError> {
        let repo_path = find_repo_root(path)?;
        let branch_name = format!("{branch_prefix}{session_name}");
        let worktree_path = worktrees_dir.join(&branch_name);

        let worktree = Self {
            repo_path,
            worktree_path,
            session_name: session_name.to_string(),
            branch_name: branch_name.clone(),
            base_commit_sha: None,
            runner,
        };
        Ok((worktree, branch_name))
    }

    pub fn from_storage(
        repo_path: PathBuf,
        worktree_path: PathBuf,
        session_name: String,
        branch_name: String,
        base_commit_sha: String,
        runner: Arc<dyn CmdRunner>,
    ) -> Self {
        let base_commit_sha = if base_commit_sha.is_empty() {
            None
        } else {
            Some(base_commit_sha)
        };
        Self {
            repo_path,
            worktree_path,
            session_name,
            branch_name,
            base_commit_sha,
            runner,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn worktree_path(&self) -> &Path {
        &self.worktree_path
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn base_commit_sha(&self) -> Option<&str> {
        self.base_commit_sha.as_deref()
    }

    pub fn repo_name(&self) -> String {
        self.repo_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.repo_path.display().to_string())
    }

    fn git_repo(&self, args: &[&str]) -> CmdSpec {
        CmdSpec::new("git").args(args.iter().copied()).dir(&self.repo_path)
    }

    fn git_worktree_dir(&self, args: &[&str]) -> CmdSpec {
        CmdSpec::new("git")
            .args(args.iter().copied())
            .dir(&self.worktree_path)
    }

    /// Materializes the branch and worktree. Idempotent: an already
    /// materialized worktree at the path is reused untouched.
    pub fn setup(&mut self) -> Result<(), SquadError> {
        if self.worktree_path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.worktree_path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                SquadError::Io(format!("failed to create worktrees directory: {error}"))
            })?;
        }

        if self.branch_exists()? {
            // Resuming: re-attach the surviving branch, base commit kept
            // from the original creation.
            let spec = self.git_repo(&[
                "worktree",
                "add",
                &self.worktree_path.to_string_lossy(),
                &self.branch_name,
            ]);
            self.runner.run(&spec).map_err(|error| {
                SquadError::ChildProcess(format!("failed to add worktree: {error}"))
            })?;
            return Ok(());
        }

        let head = self.head_commit()?;
        let spec = self.git_repo(&[
            "worktree",
            "add",
            "-b",
            &self.branch_name,
            &self.worktree_path.to_string_lossy(),
            &head,
        ]);
        self.runner.run(&spec).map_err(|error| {
            SquadError::ChildProcess(format!("failed to add worktree: {error}"))
        })?;
        self.base_commit_sha = Some(head);
        Ok(())
    }

    fn branch_exists(&self) -> Result<bool, SquadError> {
        let spec = self.git_repo(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{}", self.branch_name),
        ]);
        match self.runner.run(&spec) {
            Ok(()) => Ok(true),
            Err(error) if error.exit_code() == Some(1) => Ok(false),
            Err(error) => Err(SquadError::ChildProcess(format!(
                "failed to check branch existence: {error}"
            ))),
        }
    }

    fn head_commit(&self) -> Result<String, SquadError> {
        let stdout = self
            .runner
            .output(&self.git_repo(&["rev-parse", "HEAD"]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to resolve HEAD: {error}"))
            })?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Any staged or unstaged change, untracked files included.
    pub fn is_dirty(&self) -> Result<bool, SquadError> {
        let stdout = self
            .runner
            .output(&self.git_worktree_dir(&["status", "--porcelain"]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to check worktree status: {error}"))
            })?;
        Ok(!stdout.is_empty())
    }

    /// Local commit of everything in the worktree; never pushes.
    pub fn commit_changes(&self, message: &str) -> Result<(), SquadError> {
        self.runner
            .run(&self.git_worktree_dir(&["add", "-A"]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to stage changes: {error}"))
            })?;
        self.runner
            .run(&self.git_worktree_dir(&["commit", "-m", message]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to commit changes: {error}"))
            })
    }

    /// Commit (optionally allowing an empty one) and push the branch.
    pub fn push_changes(&self, message: &str, allow_empty: bool) -> Result<(), SquadError> {
        self.runner
            .run(&self.git_worktree_dir(&["add", "-A"]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to stage changes: {error}"))
            })?;

        let mut commit_args = vec!["commit", "-m", message];
        if allow_empty {
            commit_args.push("--allow-empty");
        }
        self.runner
            .run(&self.git_worktree_dir(&commit_args))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to commit changes: {error}"))
            })?;

        self.runner
            .run(&self.git_worktree_dir(&["push", "origin", &self.branch_name]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to push branch: {error}"))
            })
    }

    /// True when the branch is the checkout of some other worktree of this
    /// repository.
    pub fn is_branch_checked_out(&self) -> Result<bool, SquadError> {
        let stdout = self
            .runner
            .output(&self.git_repo(&["worktree", "list", "--porcelain"]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to list worktrees: {error}"))
            })?;
        let listing = String::from_utf8_lossy(&stdout).to_string();
        Ok(branch_checked_out_elsewhere(
            &listing,
            &self.branch_name,
            &self.worktree_path,
        ))
    }

    /// Lines added/removed and unified diff text since the base commit.
    pub fn diff(&self) -> Result<DiffStats, SquadError> {
        let Some(base) = self.base_commit_sha.as_deref() else {
            return Err(SquadError::BaseCommitUnset);
        };

        let stdout = self
            .runner
            .output(&self.git_worktree_dir(&["diff", base]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to compute diff: {error}"))
            })?;
        let content = String::from_utf8_lossy(&stdout).to_string();
        let (added, removed) = count_diff_lines(&content);

        Ok(DiffStats {
            added,
            removed,
            content,
        })
    }

    /// Deletes the worktree directory; the branch stays.
    pub fn remove(&self) -> Result<(), SquadError> {
        fs::remove_dir_all(&self.worktree_path).map_err(|error| {
            SquadError::Io(format!(
                "failed to remove worktree {}: {error}",
                self.worktree_path.display()
            ))
        })
    }

    /// Worktree garbage collection after a removal.
    pub fn prune(&self) -> Result<(), SquadError> {
        self.runner
            .run(&self.git_repo(&["worktree", "prune"]))
            .map_err(|error| {
                SquadError::ChildProcess(format!("failed to prune worktrees: {error}"))
            })
    }

    /// Removes the worktree and deletes the branch.
    pub fn cleanup(&self) -> Result<(), SquadError> {
        let mut errors = Vec::new();

        if self.worktree_path.exists()
            && let Err(error) = self.remove()
        {
            errors.push(error);
        }

        if let Err(error) = self.prune() {
            errors.push(error);
        }

        let spec = self.git_repo(&["branch", "-D", &self.branch_name]);
        if let Err(error) = self.runner.run(&spec) {
            errors.push(SquadError::ChildProcess(format!(
                "failed to delete branch {}: {error}",
                self.branch_name
            )));
        }

        combine_errors(errors)
    }
}

/// Parses `git worktree list --porcelain` and reports whether `branch` is
/// checked out at a path other than `own_path`.
fn branch_checked_out_elsewhere(listing: &str, branch: &str, own_path: &Path) -> bool {
    let branch_ref = format!("refs/heads/{branch}");
    let mut current_path: Option<PathBuf> = None;

    for line in listing.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(path));
            continue;
        }
        if let Some(checked_out) = line.strip_prefix("branch ")
            && checked_out == branch_ref
            && let Some(path) = current_path.as_deref()
            && path != own_path
        {
            return true;
        }
    }
    false
}

/// Counts content lines of a unified diff, skipping file headers.
fn count_diff_lines(diff: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;

    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    (added, removed)
}
