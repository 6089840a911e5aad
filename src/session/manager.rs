use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::global_state::GlobalStateManager;
use crate::domain::{PROJECT_INSTANCE_LIMIT, SquadError, Status};
use crate::infrastructure::clipboard::Clipboard;
use crate::infrastructure::event_log::{EventLogger, Severity};
use crate::infrastructure::process::CmdRunner;
use crate::infrastructure::pty::PtyFactory;
use crate::session::instance::{
    DiffStatsData, GitWorktreeData, Instance, InstanceData, InstanceDeps, InstanceOptions,
};
use crate::session::storage::ProjectStorage;
use crate::session::worktree::find_repo_root;

/// A project is the first half of the SHA-256 over its repository root
/// path; the same root always maps to the same identifier.
pub fn generate_project_id(repo_path: &Path) -> String {
    let digest = Sha256::digest(repo_path.as_os_str().as_encoded_bytes());
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Shared capabilities handed to every instance of a project.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub runner: Arc<dyn CmdRunner>,
    pub pty_factory: Arc<dyn PtyFactory>,
    pub logger: Arc<dyn EventLogger>,
    pub clipboard: Arc<dyn Clipboard>,
    pub branch_prefix: String,
}

/// Manages the instances of one project: creation under the cap, loading
/// from storage, updates, and deletion with count bookkeeping.
pub struct ProjectInstanceManager {
    project_id: String,
    repo_path: PathBuf,
    storage: ProjectStorage,
    global: GlobalStateManager,
    deps: SupervisorDeps,
}

impl ProjectInstanceManager {
    pub fn new(
        config_dir: &Path,
        project_id: &str,
        repo_path: &Path,
        deps: SupervisorDeps,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            repo_path: repo_path.to_path_buf(),
            storage: ProjectStorage::new(config_dir, project_id, repo_path),
            global: GlobalStateManager::with_logger(config_dir, Arc::clone(&deps.logger)),
            deps,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn storage(&self) -> &ProjectStorage {
        &self.storage
    }

    fn instance_deps(&self) -> InstanceDeps {
        InstanceDeps {
            runner: Arc::clone(&self.deps.runner),
            pty_factory: Arc::clone(&self.deps.pty_factory),
            logger: Arc::clone(&self.deps.logger),
            clipboard: Arc::clone(&self.deps.clipboard),
            branch_prefix: self.deps.branch_prefix.clone(),
            worktrees_dir: self.storage.worktrees_dir(),
        }
    }

    /// Creates and starts a new instance. The cap is checked before any
    /// branch or worktree is allocated; a failed persist rolls the
    /// instance's resources back.
    pub fn create_instance(&mut self, opts: InstanceOptions) -> Result<Instance, SquadError> {
        let existing = self.storage.instances()?;
        if existing.len() >= PROJECT_INSTANCE_LIMIT {
            return Err(SquadError::LimitExceeded(PROJECT_INSTANCE_LIMIT));
        }

        let mut instance = Instance::new(opts, self.instance_deps())?;
        instance.start(true)?;

        if let Err(error) = self.storage.add_instance(instance.to_instance_data()) {
            if let Err(kill_error) = instance.kill() {
                self.deps.logger.log(
                    Severity::Warning,
                    &format!("failed to roll back instance after save failure: {kill_error}"),
                );
            }
            return Err(error);
        }

        self.sync_instance_count(existing.len() + 1);
        Ok(instance)
    }

    /// Rehydrates every stored instance. Records that fail to restore are
    /// logged and skipped, never fatal for the rest of the project.
    pub fn all_instances(&mut self) -> Result<Vec<Instance>, SquadError> {
        let records = self.storage.instances()?;

        let mut instances = Vec::with_capacity(records.len());
        for record in records {
            let title = record.title.clone();
            match Instance::from_instance_data(record, self.instance_deps()) {
                Ok(instance) => instances.push(instance),
                Err(error) => {
                    self.deps.logger.log(
                        Severity::Error,
                        &format!("failed to restore instance '{title}': {error}"),
                    );
                }
            }
        }
        Ok(instances)
    }

    pub fn get_instance(&mut self, title: &str) -> Result<Instance, SquadError> {
        let mut instances = self.all_instances()?;
        let index = instances
            .iter()
            .position(|instance| instance.title == title)
            .ok_or_else(|| SquadError::NotFound(format!("instance {title}")))?;
        Ok(instances.swap_remove(index))
    }

    pub fn update_instance(&mut self, instance: &Instance) -> Result<(), SquadError> {
        if !instance.started() {
            return Err(SquadError::NotStarted(
                "cannot update instance that has not been started".to_string(),
            ));
        }
        self.storage.update_instance(instance.to_instance_data())
    }

    /// Kills the instance's resources and removes it from storage.
    pub fn delete_instance(&mut self, title: &str) -> Result<(), SquadError> {
        let mut instance = self.get_instance(title)?;

        if let Err(error) = instance.kill() {
            self.deps.logger.log(
                Severity::Warning,
                &format!("failed to kill instance during deletion: {error}"),
            );
        }

        self.storage.delete_instance(title)?;

        match self.storage.instances() {
            Ok(instances) => self.sync_instance_count(instances.len()),
            Err(error) => self.deps.logger.log(
                Severity::Warning,
                &format!("failed to get instance count for update: {error}"),
            ),
        }
        Ok(())
    }

    fn sync_instance_count(&mut self, count: usize) {
        if let Err(error) = self
            .global
            .update_project_instance_count(&self.project_id, count)
        {
            self.deps.logger.log(
                Severity::Warning,
                &format!("failed to update project instance count: {error}"),
            );
        }
    }
}

/// Routes the working directory to its project and owns the one-shot
/// migration from the legacy single-file state.
pub struct InstanceManager {
    config_dir: PathBuf,
    global: GlobalStateManager,
    deps: SupervisorDeps,
}

/// Flat record shape of the legacy single-file `state.json`, integer
/// statuses included.
#[derive(Debug, Deserialize)]
struct LegacyInstanceData {
    title: String,
    #[serde(default)]
    display_name: String,
    path: PathBuf,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    height: u16,
    #[serde(default)]
    width: u16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    auto_yes: bool,
    program: String,
    #[serde(default)]
    worktree: LegacyWorktreeData,
    #[serde(default)]
    diff_stats: LegacyDiffStatsData,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyWorktreeData {
    #[serde(default)]
    repo_path: PathBuf,
    #[serde(default)]
    worktree_path: PathBuf,
    #[serde(default)]
    session_name: String,
    #[serde(default)]
    branch_name: String,
    #[serde(default)]
    base_commit_sha: String,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyDiffStatsData {
    #[serde(default)]
    added: usize,
    #[serde(default)]
    removed: usize,
    #[serde(default)]
    content: String,
}

impl InstanceManager {
    pub fn new(config_dir: impl Into<PathBuf>, deps: SupervisorDeps) -> Self {
        let config_dir = config_dir.into();
        Self {
            global: GlobalStateManager::with_logger(&config_dir, Arc::clone(&deps.logger)),
            config_dir,
            deps,
        }
    }

    pub fn project_manager(&self, project_id: &str, repo_path: &Path) -> ProjectInstanceManager {
        ProjectInstanceManager::new(&self.config_dir, project_id, repo_path, self.deps.clone())
    }

    /// Resolves `path` to its repository root, registers the project on
    /// first sighting, and returns a bound project manager.
    pub fn project_manager_for_path(
        &mut self,
        path: &Path,
    ) -> Result<ProjectInstanceManager, SquadError> {
        let repo_path = find_repo_root(path)?;
        let project_id = generate_project_id(&repo_path);

        if self.global.get_project(&project_id).is_none() {
            let name = repo_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| repo_path.display().to_string());
            self.global.add_project(&project_id, &name, &repo_path)?;
            self.deps.logger.log(
                Severity::Info,
                &format!("registered new project {name} ({project_id})"),
            );
        }

        Ok(self.project_manager(&project_id, &repo_path))
    }

    /// The project manager for the current working directory.
    pub fn current_project_manager(&mut self) -> Result<ProjectInstanceManager, SquadError> {
        let cwd = std::env::current_dir()
            .map_err(|error| SquadError::Io(format!("failed to get working directory: {error}")))?;
        self.project_manager_for_path(&cwd)
    }

    pub fn all_projects(&mut self) -> Vec<crate::config::global_state::GlobalProjectData> {
        self.global.all_projects()
    }

    pub fn global_state(&mut self) -> &mut GlobalStateManager {
        &mut self.global
    }

    /// One-shot absorption of the legacy flat instance array: records are
    /// grouped by repository path, each group becomes a project with its
    /// own store, and the migration version moves to 1. Rerunning is a
    /// no-op.
    pub fn migrate_legacy_state(&mut self, legacy_raw: &str) -> Result<(), SquadError> {
        if self.global.migration_version() >= 1 {
            self.deps
                .logger
                .log(Severity::Info, "legacy migration already completed");
            return Ok(());
        }

        let legacy: Vec<LegacyInstanceData> = serde_json::from_str(legacy_raw)
            .map_err(|error| SquadError::Io(format!("failed to parse legacy instances: {error}")))?;

        let mut groups: BTreeMap<PathBuf, Vec<LegacyInstanceData>> = BTreeMap::new();
        for record in legacy {
            let repo_path = if record.worktree.repo_path.as_os_str().is_empty() {
                record.path.clone()
            } else {
                record.worktree.repo_path.clone()
            };
            groups.entry(repo_path).or_default().push(record);
        }

        for (repo_path, records) in groups {
            let project_id = generate_project_id(&repo_path);
            let name = repo_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| repo_path.display().to_string());
            let count = records.len();

            self.global.add_project(&project_id, &name, &repo_path)?;

            let storage = ProjectStorage::new(&self.config_dir, &project_id, &repo_path);
            storage.ensure_project_dir()?;

            let converted: Vec<InstanceData> =
                records.into_iter().map(convert_legacy_instance).collect();
            storage.save_instances(converted)?;

            self.global
                .update_project_instance_count(&project_id, count)?;

            self.deps.logger.log(
                Severity::Info,
                &format!("migrated {count} instances to project {name} ({project_id})"),
            );
        }

        self.global.mark_migration_complete()
    }
}

fn convert_legacy_instance(record: LegacyInstanceData) -> InstanceData {
    InstanceData {
        title: record.title,
        display_name: record.display_name,
        path: record.path,
        branch: record.branch,
        status: Status::from_legacy_code(record.status),
        height: record.height,
        width: record.width,
        created_at: record.created_at,
        updated_at: record.updated_at,
        program: record.program,
        auto_yes: record.auto_yes,
        worktree: GitWorktreeData {
            repo_path: record.worktree.repo_path,
            worktree_path: record.worktree.worktree_path,
            session_name: record.worktree.session_name,
            branch_name: record.worktree.branch_name,
            base_commit_sha: record.worktree.base_commit_sha,
        },
        diff_stats: DiffStatsData {
            added: record.diff_stats.added,
            removed: record.diff_stats.removed,
            content: record.diff_stats.content,
        },
    }
}
