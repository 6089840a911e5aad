use std::sync::mpsc::Receiver;

use crate::domain::{SquadError, Status};
use crate::infrastructure::event_log::{EventLogger, Severity};
use crate::session::Instance;
use crate::session::tmux::capture_error_indicates_dead_session;

/// Token returned by [`InstanceList::add_instance`]; committing it selects
/// the inserted row. A cancelled creation kills the row instead, so a
/// half-added instance never leaks into the list.
#[must_use]
pub struct InstanceFinalizer {
    index: usize,
}

/// Ordered sequence of instances with a selection cursor. All mutation
/// happens on the event-loop task that owns the list.
#[derive(Default)]
pub struct InstanceList {
    instances: Vec<Instance>,
    selected: usize,
}

impl InstanceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    pub fn get_selected(&self) -> Option<&Instance> {
        self.instances.get(self.selected)
    }

    pub fn get_selected_mut(&mut self) -> Option<&mut Instance> {
        self.instances.get_mut(self.selected)
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn set_selected(&mut self, index: usize) {
        if index < self.instances.len() {
            self.selected = index;
        }
    }

    pub fn up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn down(&mut self) {
        if self.selected + 1 < self.instances.len() {
            self.selected += 1;
        }
    }

    /// Two-phase insertion: the instance joins the list immediately so the
    /// front-end can render and mutate it (set a title, start it), and the
    /// returned finalizer commits it once creation goes through.
    pub fn add_instance(&mut self, instance: Instance) -> InstanceFinalizer {
        self.instances.push(instance);
        InstanceFinalizer {
            index: self.instances.len() - 1,
        }
    }

    pub fn finalize(&mut self, finalizer: InstanceFinalizer) {
        self.set_selected(finalizer.index);
    }

    /// Kills the selected instance's resources and removes its row.
    pub fn kill_selected(&mut self) -> Result<(), SquadError> {
        if self.selected >= self.instances.len() {
            return Err(SquadError::NotFound("no instance selected".to_string()));
        }

        let mut instance = self.instances.remove(self.selected);
        if self.selected >= self.instances.len() && self.selected > 0 {
            self.selected -= 1;
        }
        instance.kill()
    }

    pub fn attach_selected(&mut self) -> Result<Receiver<()>, SquadError> {
        self.get_selected()
            .ok_or_else(|| SquadError::NotFound("no instance selected".to_string()))?
            .attach()
    }

    /// The periodic metadata tick: for every started, non-paused instance,
    /// fold terminal activity into the status (change means the agent is
    /// working; a prompt with no change gets an enter in auto-yes mode;
    /// quiet means ready) and refresh the cached diff stats.
    pub fn refresh_metadata(&mut self, logger: &dyn EventLogger) {
        for instance in &mut self.instances {
            if !instance.started() || instance.paused() {
                continue;
            }

            let (updated, has_prompt) = instance.has_updated();
            if updated {
                instance.set_status(Status::Running);
            } else if has_prompt {
                instance.tap_enter();
            } else {
                instance.set_status(Status::Ready);
            }

            if let Err(error) = instance.update_diff_stats() {
                logger.log(
                    Severity::Warning,
                    &format!("could not update diff stats: {error}"),
                );
            }
        }
    }
}

/// Recovery for a preview capture that failed mid-session: restart the
/// session when it actually died, otherwise surface the original error.
/// A restart that fails moves the instance to Error; only resume or kill
/// make sense from there.
pub fn attempt_tmux_recovery(
    instance: &mut Instance,
    original: SquadError,
) -> Result<(), SquadError> {
    if !capture_error_indicates_dead_session(&original) {
        return Err(original);
    }

    if instance.tmux_alive() {
        return Err(SquadError::ChildProcess(format!(
            "tmux session exists but failed to capture content: {original}"
        )));
    }

    if let Err(restart_error) = instance.restart_tmux() {
        instance.set_status(Status::Error);
        return Err(SquadError::ChildProcess(format!(
            "tmux session died and failed to restart: {restart_error} (original error: {original})"
        )));
    }

    Ok(())
}
