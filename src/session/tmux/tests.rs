use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    TMUX_PREFIX, TmuxSession, cleanup_sessions, prompt_needle, to_claude_squad_tmux_name,
    trust_prompt_for,
};
use crate::domain::SquadError;
use crate::infrastructure::event_log::NullEventLogger;
use crate::session::testutil::{FakeCmdRunner, FakePtyFactory};

fn session(
    name: &str,
    program: &str,
    factory: Arc<FakePtyFactory>,
    runner: Arc<FakeCmdRunner>,
) -> TmuxSession {
    TmuxSession::new(name, program, factory, runner, Arc::new(NullEventLogger))
}

#[test]
fn sanitized_names_strip_whitespace_and_dots() {
    assert_eq!(to_claude_squad_tmux_name("feat-x"), "claudesquad_feat-x");
    assert_eq!(to_claude_squad_tmux_name("my task"), "claudesquad_mytask");
    assert_eq!(
        to_claude_squad_tmux_name("v1.2 hotfix"),
        "claudesquad_v1_2hotfix"
    );
    assert_eq!(to_claude_squad_tmux_name(" \t a b \n"), "claudesquad_ab");
}

#[test]
fn sanitize_is_idempotent_modulo_prefix() {
    let once = to_claude_squad_tmux_name("v1.2 hotfix");
    let stripped = once.strip_prefix(TMUX_PREFIX).expect("prefix expected");
    assert_eq!(
        to_claude_squad_tmux_name(stripped),
        format!("{TMUX_PREFIX}{stripped}")
    );
}

#[test]
fn trust_prompt_table_matches_program_suffixes() {
    let claude = trust_prompt_for("/usr/local/bin/claude").expect("claude entry");
    assert_eq!(claude.needles.len(), 3);
    assert_eq!(claude.max_wait.as_secs(), 30);

    let aider = trust_prompt_for("aider").expect("aider entry");
    assert_eq!(aider.max_wait.as_secs(), 45);

    assert!(trust_prompt_for("bash").is_none());
}

#[test]
fn prompt_needles_are_keyed_by_program() {
    assert_eq!(
        prompt_needle("claude"),
        Some("No, and tell Claude what to do differently")
    );
    assert_eq!(
        prompt_needle("aider --model ollama_chat/gemma3:1b"),
        Some("(Y)es/(N)o/(D)on't ask again")
    );
    assert_eq!(prompt_needle("gemini"), Some("Yes, allow once"));
    assert_eq!(prompt_needle("bash"), None);
}

#[test]
fn start_refuses_existing_session() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("has-session") {
            return Ok(Vec::new());
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), runner);

    assert!(matches!(
        tmux.start(std::path::Path::new("/tmp")),
        Err(SquadError::SessionExists(_))
    ));
}

#[test]
fn start_creates_session_and_applies_options() {
    // The initial existence probe reports absent; once the new-session PTY
    // has launched, the session is there.
    let probes = Arc::new(AtomicUsize::new(0));
    let probes_for_runner = Arc::clone(&probes);
    let runner = FakeCmdRunner::new(move |spec| {
        if spec.args.first().map(String::as_str) == Some("has-session") {
            if probes_for_runner.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(FakeCmdRunner::exit_error(1));
            }
            return Ok(Vec::new());
        }
        Ok(Vec::new())
    });
    let factory = FakePtyFactory::new();
    let tmux = session("feat-x", "bash", Arc::clone(&factory), Arc::clone(&runner));

    tmux.start(std::path::Path::new("/work/dir"))
        .expect("start should succeed");

    let started = factory.started_specs();
    assert_eq!(started.len(), 2);
    assert_eq!(
        started[0].args[..5],
        ["new-session", "-d", "-s", "claudesquad_feat-x", "-c"]
    );
    assert_eq!(started[0].args[5], "/work/dir");
    assert_eq!(started[0].args[6], "bash");
    assert_eq!(
        started[1].args,
        vec!["attach-session", "-t", "claudesquad_feat-x"]
    );

    let options = runner.calls_for("tmux", "set-option");
    assert_eq!(options.len(), 2);
    assert!(options[0].args.contains(&"history-limit".to_string()));
    assert!(options[0].args.contains(&"10000".to_string()));
    assert!(options[1].args.contains(&"mouse".to_string()));
}

#[test]
fn start_cleans_up_when_pty_allocation_fails() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("has-session") {
            // Not there before start; "there" during cleanup probing would
            // also be fine, keep it simple and report absent.
            return Err(FakeCmdRunner::exit_error(1));
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "bash", FakePtyFactory::failing(), runner);

    assert!(matches!(
        tmux.start(std::path::Path::new("/tmp")),
        Err(SquadError::Io(_))
    ));
}

#[test]
fn capture_builds_the_expected_command() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("capture-pane") {
            return Ok(b"pane text".to_vec());
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), Arc::clone(&runner));

    let content = tmux.capture_pane_content().expect("capture should succeed");
    assert_eq!(content, "pane text");

    let calls = runner.calls_for("tmux", "capture-pane");
    assert_eq!(
        calls[0].args,
        vec!["capture-pane", "-p", "-e", "-J", "-t", "claudesquad_feat-x"]
    );
}

#[test]
fn full_history_capture_requests_whole_scrollback() {
    let runner = FakeCmdRunner::new(|_| Ok(Vec::new()));
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), Arc::clone(&runner));

    tmux.capture_full_history().expect("capture should succeed");

    let calls = runner.calls_for("tmux", "capture-pane");
    assert_eq!(
        calls[0].args,
        vec![
            "capture-pane",
            "-p",
            "-e",
            "-J",
            "-S",
            "-",
            "-E",
            "-",
            "-t",
            "claudesquad_feat-x"
        ]
    );
}

#[test]
fn has_updated_tracks_content_hash() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("capture-pane") {
            return Ok(b"stable output".to_vec());
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), runner);

    let (first, _) = tmux.has_updated();
    assert!(first);

    // Idempotent with no new terminal output.
    let (second, _) = tmux.has_updated();
    assert!(!second);
}

#[test]
fn has_updated_reports_agent_prompt() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("capture-pane") {
            return Ok(b"1. Yes\n2. No, and tell Claude what to do differently".to_vec());
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "claude", FakePtyFactory::new(), runner);

    let (_, has_prompt) = tmux.has_updated();
    assert!(has_prompt);
}

#[test]
fn restore_resets_the_status_monitor() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("capture-pane") {
            return Ok(b"same".to_vec());
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), runner);

    let (first, _) = tmux.has_updated();
    assert!(first);
    let (second, _) = tmux.has_updated();
    assert!(!second);

    tmux.restore().expect("restore should succeed");

    let (after_restore, _) = tmux.has_updated();
    assert!(after_restore);
}

#[test]
fn does_session_exist_uses_exact_match() {
    let runner = FakeCmdRunner::new(|_| Err(FakeCmdRunner::exit_error(1)));
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), Arc::clone(&runner));

    assert!(!tmux.does_session_exist());

    let calls = runner.calls_for("tmux", "has-session");
    assert_eq!(calls[0].args, vec!["has-session", "-t=claudesquad_feat-x"]);
}

#[test]
fn tap_enter_writes_carriage_return() {
    let runner = FakeCmdRunner::accepting();
    let factory = FakePtyFactory::new();
    let tmux = session("feat-x", "bash", Arc::clone(&factory), runner);
    tmux.restore().expect("restore should succeed");

    tmux.tap_enter().expect("tap should succeed");
    assert_eq!(factory.recorder.written_bytes(), vec![0x0D]);
}

#[test]
fn tap_d_and_enter_writes_both_bytes() {
    let runner = FakeCmdRunner::accepting();
    let factory = FakePtyFactory::new();
    let tmux = session("feat-x", "bash", Arc::clone(&factory), runner);
    tmux.restore().expect("restore should succeed");

    tmux.tap_d_and_enter().expect("tap should succeed");
    assert_eq!(factory.recorder.written_bytes(), vec![0x44, 0x0D]);
}

#[test]
fn send_keys_forwards_raw_bytes() {
    let runner = FakeCmdRunner::accepting();
    let factory = FakePtyFactory::new();
    let tmux = session("feat-x", "bash", Arc::clone(&factory), runner);
    tmux.restore().expect("restore should succeed");

    tmux.send_keys("ls -la").expect("send should succeed");
    assert_eq!(factory.recorder.written_bytes(), b"ls -la".to_vec());
}

#[test]
fn set_detached_size_resizes_the_pty() {
    let runner = FakeCmdRunner::accepting();
    let factory = FakePtyFactory::new();
    let tmux = session("feat-x", "bash", Arc::clone(&factory), runner);
    tmux.restore().expect("restore should succeed");

    tmux.set_detached_size(120, 40).expect("resize should succeed");
    assert_eq!(factory.recorder.resize_calls(), vec![(120, 40)]);
}

#[test]
fn close_kills_the_session() {
    let runner = FakeCmdRunner::accepting();
    let factory = FakePtyFactory::new();
    let tmux = session("feat-x", "bash", Arc::clone(&factory), Arc::clone(&runner));
    tmux.restore().expect("restore should succeed");

    tmux.close().expect("close should succeed");

    assert_eq!(*factory.recorder.closed_streams.lock().expect("lock"), 1);
    let kills = runner.calls_for("tmux", "kill-session");
    assert_eq!(kills[0].args, vec!["kill-session", "-t", "claudesquad_feat-x"]);
}

#[test]
fn close_aggregates_kill_failure() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("kill-session") {
            return Err(FakeCmdRunner::exit_error(1));
        }
        Ok(Vec::new())
    });
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), runner);

    assert!(matches!(tmux.close(), Err(SquadError::ChildProcess(_))));
}

#[test]
fn detach_hotkey_is_ctrl_q_behind_the_discard_window() {
    assert_eq!(super::DETACH_KEY, 0x11);
    assert_eq!(super::ATTACH_DISCARD_WINDOW.as_millis(), 50);
}

#[test]
fn detach_safely_is_a_noop_when_never_attached() {
    let runner = FakeCmdRunner::accepting();
    let tmux = session("feat-x", "bash", FakePtyFactory::new(), runner);

    tmux.detach_safely().expect("safe detach should succeed");
    tmux.detach_safely().expect("safe detach is idempotent");
}

#[test]
fn cleanup_sessions_kills_only_prefixed_sessions() {
    let runner = FakeCmdRunner::new(|spec| {
        if spec.args.first().map(String::as_str) == Some("ls") {
            return Ok(
                b"claudesquad_feat-x: 1 windows\nother: 2 windows\nclaudesquad_fix: 1 windows\n"
                    .to_vec(),
            );
        }
        Ok(Vec::new())
    });

    cleanup_sessions(runner.as_ref(), &NullEventLogger).expect("cleanup should succeed");

    let kills = runner.calls_for("tmux", "kill-session");
    assert_eq!(kills.len(), 2);
    assert_eq!(kills[0].args[2], "claudesquad_feat-x");
    assert_eq!(kills[1].args[2], "claudesquad_fix");
}

#[test]
fn cleanup_sessions_treats_exit_one_as_empty() {
    let runner = FakeCmdRunner::new(|_| Err(FakeCmdRunner::exit_error(1)));
    cleanup_sessions(runner.as_ref(), &NullEventLogger)
        .expect("no sessions should not be an error");
}

#[test]
fn cleanup_sessions_surfaces_other_failures() {
    let runner = FakeCmdRunner::new(|_| Err(FakeCmdRunner::exit_error(127)));
    assert!(cleanup_sessions(runner.as_ref(), &NullEventLogger).is_err());
}
