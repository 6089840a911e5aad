mod support;

use std::path::Path;

use chrono::Utc;

use claude_squad::config::global_state::GlobalStateManager;
use claude_squad::domain::Status;
use claude_squad::session::instance::InstanceData;
use claude_squad::session::storage::ProjectStorage;
use claude_squad::session::{InstanceManager, generate_project_id};

fn instance_record(title: &str, repo: &str) -> InstanceData {
    let now = Utc::now();
    InstanceData {
        title: title.to_string(),
        display_name: title.to_string(),
        path: repo.into(),
        branch: format!("alice/{title}"),
        status: Status::Ready,
        height: 0,
        width: 0,
        created_at: now,
        updated_at: now,
        program: "claude".to_string(),
        auto_yes: false,
        worktree: Default::default(),
        diff_stats: Default::default(),
    }
}

#[test]
fn project_identifiers_are_stable_across_processes() {
    let id = generate_project_id(Path::new("/home/u/proj"));
    assert_eq!(id, generate_project_id(Path::new("/home/u/proj")));
    assert_ne!(id, generate_project_id(Path::new("/home/u/proj2")));
    assert_eq!(id.len(), 16);
}

#[test]
fn project_store_survives_a_reload() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let id = generate_project_id(Path::new("/repos/proj"));

    let storage = ProjectStorage::new(dir.path(), &id, "/repos/proj");
    storage
        .add_instance(instance_record("feat-x", "/repos/proj"))
        .expect("add should succeed");

    let reopened = ProjectStorage::new(dir.path(), &id, "/repos/proj");
    let state = reopened.load().expect("load should succeed");
    assert_eq!(state.instances.len(), 1);
    assert_eq!(state.instances[0].title, "feat-x");
    assert_eq!(state.project.instance_count, 1);
}

#[test]
fn router_registers_and_reuses_projects() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(repo.join(".git")).expect("repo fixture should be created");

    let mut manager = InstanceManager::new(dir.path(), support::deps());

    let first = manager
        .project_manager_for_path(&repo)
        .expect("router should resolve");
    let second = manager
        .project_manager_for_path(&repo.join("proj-src"))
        .expect("router should resolve nested paths");

    assert_eq!(first.project_id(), second.project_id());
    assert_eq!(manager.all_projects().len(), 1);

    // The registration is visible to a fresh global-state reader.
    let mut global = GlobalStateManager::new(dir.path());
    let state = global.load().expect("load should succeed");
    assert_eq!(state.projects.len(), 1);
    assert_eq!(state.projects[0].name, "proj");
}

#[test]
fn legacy_migration_is_grouped_and_one_shot() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut manager = InstanceManager::new(dir.path(), support::deps());

    let legacy = r#"[
        {"title": "one", "path": "/r", "program": "claude", "status": 1,
         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
         "worktree": {"repo_path": "/r"}},
        {"title": "two", "path": "/r", "program": "claude", "status": 0,
         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
         "worktree": {"repo_path": "/r"}},
        {"title": "three", "path": "/s", "program": "claude", "status": 3,
         "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"}
    ]"#;

    manager
        .migrate_legacy_state(legacy)
        .expect("migration should succeed");

    let projects = manager.all_projects();
    assert_eq!(projects.len(), 2);

    let id_r = generate_project_id(Path::new("/r"));
    let id_s = generate_project_id(Path::new("/s"));
    let count_of = |id: &str| {
        projects
            .iter()
            .find(|project| project.id == id)
            .expect("project should exist")
            .instance_count
    };
    assert_eq!(count_of(&id_r), 2);
    assert_eq!(count_of(&id_s), 1);

    // The per-project stores carry the migrated records.
    let storage = ProjectStorage::new(dir.path(), &id_s, "/s");
    let instances = storage.instances().expect("instances should load");
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].status, Status::Paused);

    // Rerunning changes nothing.
    manager
        .migrate_legacy_state("[]")
        .expect("rerun should be a no-op");
    assert_eq!(manager.all_projects().len(), 2);
}
