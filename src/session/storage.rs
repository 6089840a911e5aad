use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::write_atomically;
use crate::domain::{PROJECT_INSTANCE_LIMIT, SquadError};
use crate::session::instance::InstanceData;

pub const PROJECTS_DIR_NAME: &str = "projects";
pub const PROJECT_STATE_FILE_NAME: &str = "state.json";
pub const PROJECT_WORKTREES_DIR_NAME: &str = "worktrees";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectData {
    pub id: String,
    pub name: String,
    pub repo_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub instance_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project: ProjectData,
    #[serde(default)]
    pub instances: Vec<InstanceData>,
}

/// On-disk record of one project's instances under
/// `<config>/projects/<project-id>/state.json`.
pub struct ProjectStorage {
    config_dir: PathBuf,
    project_id: String,
    repo_path: PathBuf,
}

impl ProjectStorage {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        project_id: impl Into<String>,
        repo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_dir: config_dir.into(),
            project_id: project_id.into(),
            repo_path: repo_path.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_dir(&self) -> PathBuf {
        self.config_dir.join(PROJECTS_DIR_NAME).join(&self.project_id)
    }

    pub fn state_path(&self) -> PathBuf {
        self.project_dir().join(PROJECT_STATE_FILE_NAME)
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.project_dir().join(PROJECT_WORKTREES_DIR_NAME)
    }

    pub fn ensure_project_dir(&self) -> Result<(), SquadError> {
        for dir in [self.project_dir(), self.worktrees_dir()] {
            fs::create_dir_all(&dir).map_err(|error| {
                SquadError::Io(format!(
                    "failed to create project directory {}: {error}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }

    fn default_state(&self) -> ProjectState {
        let now = Utc::now();
        let name = self
            .repo_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.repo_path.display().to_string());

        ProjectState {
            project: ProjectData {
                id: self.project_id.clone(),
                name,
                repo_path: self.repo_path.clone(),
                created_at: now,
                updated_at: now,
                instance_count: 0,
            },
            instances: Vec::new(),
        }
    }

    /// Missing file yields the default state; a file that exists but does
    /// not parse is surfaced, never silently reset.
    pub fn load(&self) -> Result<ProjectState, SquadError> {
        let raw = match fs::read_to_string(self.state_path()) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.default_state());
            }
            Err(error) => {
                return Err(SquadError::Io(format!(
                    "failed to read project state: {error}"
                )));
            }
        };

        serde_json::from_str(&raw)
            .map_err(|error| SquadError::Io(format!("failed to parse project state: {error}")))
    }

    pub fn save(&self, state: &ProjectState) -> Result<(), SquadError> {
        self.ensure_project_dir()?;

        let encoded = serde_json::to_string_pretty(state)
            .map_err(|error| SquadError::Io(format!("failed to encode project state: {error}")))?;
        write_atomically(&self.state_path(), encoded.as_bytes())
    }

    pub fn instances(&self) -> Result<Vec<InstanceData>, SquadError> {
        Ok(self.load()?.instances)
    }

    pub fn save_instances(&self, instances: Vec<InstanceData>) -> Result<(), SquadError> {
        let mut state = self.load()?;
        state.project.instance_count = instances.len();
        state.project.updated_at = Utc::now();
        state.instances = instances;
        self.save(&state)
    }

    /// Refuses duplicates and enforces the per-project cap; the stored
    /// state is untouched when the add fails.
    pub fn add_instance(&self, instance: InstanceData) -> Result<(), SquadError> {
        let mut instances = self.instances()?;

        if instances.len() >= PROJECT_INSTANCE_LIMIT {
            return Err(SquadError::LimitExceeded(PROJECT_INSTANCE_LIMIT));
        }
        if instances.iter().any(|existing| existing.title == instance.title) {
            return Err(SquadError::DuplicateTitle(instance.title));
        }

        instances.push(instance);
        self.save_instances(instances)
    }

    pub fn update_instance(&self, instance: InstanceData) -> Result<(), SquadError> {
        let mut instances = self.instances()?;

        let Some(existing) = instances
            .iter_mut()
            .find(|existing| existing.title == instance.title)
        else {
            return Err(SquadError::NotFound(format!("instance {}", instance.title)));
        };
        *existing = instance;

        self.save_instances(instances)
    }

    pub fn delete_instance(&self, title: &str) -> Result<(), SquadError> {
        let mut instances = self.instances()?;
        let before = instances.len();
        instances.retain(|instance| instance.title != title);

        if instances.len() == before {
            return Err(SquadError::NotFound(format!("instance {title}")));
        }
        self.save_instances(instances)
    }

    pub fn delete_all_instances(&self) -> Result<(), SquadError> {
        self.save_instances(Vec::new())
    }

    pub fn project_data(&self) -> Result<ProjectData, SquadError> {
        Ok(self.load()?.project)
    }
}
