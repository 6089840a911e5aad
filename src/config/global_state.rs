use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::write_atomically;
use crate::domain::SquadError;
use crate::infrastructure::event_log::{EventLogger, NullEventLogger, Severity};

pub const GLOBAL_STATE_FILE_NAME: &str = "global_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalProjectData {
    pub id: String,
    pub name: String,
    pub repo_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub instance_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default)]
    pub projects: Vec<GlobalProjectData>,
    /// Bitmask of help screens the operator has dismissed.
    #[serde(default)]
    pub help_screens_seen: u32,
    /// 0 = the legacy single-file state has not been absorbed yet, 1 = done.
    #[serde(default)]
    pub last_migration_version: u32,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            help_screens_seen: 0,
            last_migration_version: 0,
        }
    }
}

/// Capability over the help-seen bitmask, shared by the global store and
/// any future backing state.
pub trait AppState {
    fn help_screens_seen(&mut self) -> u32;
    fn set_help_screens_seen(&mut self, seen: u32) -> Result<(), SquadError>;
}

pub struct GlobalStateManager {
    config_dir: PathBuf,
    state: Option<GlobalState>,
    logger: Arc<dyn EventLogger>,
}

impl GlobalStateManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self::with_logger(config_dir, Arc::new(NullEventLogger))
    }

    pub fn with_logger(config_dir: impl Into<PathBuf>, logger: Arc<dyn EventLogger>) -> Self {
        Self {
            config_dir: config_dir.into(),
            state: None,
            logger,
        }
    }

    fn state_path(&self) -> PathBuf {
        self.config_dir.join(GLOBAL_STATE_FILE_NAME)
    }

    pub fn load(&mut self) -> Result<&GlobalState, SquadError> {
        let raw = match fs::read_to_string(self.state_path()) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.state.insert(GlobalState::default()));
            }
            Err(error) => {
                return Err(SquadError::Io(format!(
                    "failed to read global state: {error}"
                )));
            }
        };

        let state: GlobalState = serde_json::from_str(&raw)
            .map_err(|error| SquadError::Io(format!("failed to parse global state: {error}")))?;
        Ok(self.state.insert(state))
    }

    fn state_mut(&mut self) -> &mut GlobalState {
        if self.state.is_none() {
            let loaded = match self.load() {
                Ok(state) => state.clone(),
                Err(error) => {
                    self.logger.log(
                        Severity::Warning,
                        &format!("failed to load global state, using default: {error}"),
                    );
                    GlobalState::default()
                }
            };
            self.state = Some(loaded);
        }

        self.state.get_or_insert_with(GlobalState::default)
    }

    pub fn save(&mut self) -> Result<(), SquadError> {
        let path = self.state_path();
        let state = self.state_mut().clone();

        let encoded = serde_json::to_string_pretty(&state)
            .map_err(|error| SquadError::Io(format!("failed to encode global state: {error}")))?;

        fs::create_dir_all(&self.config_dir).map_err(|error| {
            SquadError::Io(format!("failed to create config directory: {error}"))
        })?;
        write_atomically(&path, encoded.as_bytes())
    }

    pub fn get_project(&mut self, project_id: &str) -> Option<GlobalProjectData> {
        self.state_mut()
            .projects
            .iter()
            .find(|project| project.id == project_id)
            .cloned()
    }

    /// Upsert on identifier: adding an existing project refreshes its name,
    /// repository path, and updated-at.
    pub fn add_project(
        &mut self,
        project_id: &str,
        name: &str,
        repo_path: &Path,
    ) -> Result<(), SquadError> {
        let now = Utc::now();
        let state = self.state_mut();

        if let Some(existing) = state
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
        {
            existing.name = name.to_string();
            existing.repo_path = repo_path.to_path_buf();
            existing.updated_at = now;
            return self.save();
        }

        state.projects.push(GlobalProjectData {
            id: project_id.to_string(),
            name: name.to_string(),
            repo_path: repo_path.to_path_buf(),
            created_at: now,
            updated_at: now,
            instance_count: 0,
        });
        self.save()
    }

    pub fn update_project_instance_count(
        &mut self,
        project_id: &str,
        count: usize,
    ) -> Result<(), SquadError> {
        let now = Utc::now();
        let state = self.state_mut();

        let Some(project) = state
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
        else {
            return Err(SquadError::NotFound(format!("project {project_id}")));
        };

        project.instance_count = count;
        project.updated_at = now;
        self.save()
    }

    pub fn all_projects(&mut self) -> Vec<GlobalProjectData> {
        self.state_mut().projects.clone()
    }

    pub fn remove_project(&mut self, project_id: &str) -> Result<(), SquadError> {
        let state = self.state_mut();
        let before = state.projects.len();
        state.projects.retain(|project| project.id != project_id);

        if state.projects.len() == before {
            return Err(SquadError::NotFound(format!("project {project_id}")));
        }
        self.save()
    }

    pub fn migration_version(&mut self) -> u32 {
        self.state_mut().last_migration_version
    }

    /// One-shot: records that the legacy single-file state has been
    /// absorbed. The migration itself lives in the instance manager.
    pub fn mark_migration_complete(&mut self) -> Result<(), SquadError> {
        if self.state_mut().last_migration_version >= 1 {
            return Ok(());
        }
        self.state_mut().last_migration_version = 1;
        self.save()
    }
}

impl AppState for GlobalStateManager {
    fn help_screens_seen(&mut self) -> u32 {
        self.state_mut().help_screens_seen
    }

    fn set_help_screens_seen(&mut self, seen: u32) -> Result<(), SquadError> {
        self.state_mut().help_screens_seen = seen;
        self.save()
    }
}
