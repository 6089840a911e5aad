use super::{CmdError, CmdRunner, CmdSpec, ProcessCmdRunner};

#[test]
fn cmd_spec_builder_collects_fields() {
    let spec = CmdSpec::new("git")
        .args(["status", "--porcelain"])
        .dir("/tmp")
        .env("GIT_TERMINAL_PROMPT", "0");

    assert_eq!(spec.program, "git");
    assert_eq!(spec.args, vec!["status", "--porcelain"]);
    assert_eq!(spec.dir.as_deref(), Some(std::path::Path::new("/tmp")));
    assert_eq!(
        spec.env,
        vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
    );
    assert_eq!(spec.display(), "git status --porcelain");
}

#[test]
fn run_succeeds_for_zero_exit() {
    let runner = ProcessCmdRunner;
    let spec = CmdSpec::new("sh").args(["-c", "exit 0"]);
    assert!(runner.run(&spec).is_ok());
}

#[test]
fn run_reports_exit_code() {
    let runner = ProcessCmdRunner;
    let spec = CmdSpec::new("sh").args(["-c", "exit 3"]);

    match runner.run(&spec) {
        Err(error) => assert_eq!(error.exit_code(), Some(3)),
        Ok(()) => panic!("expected non-zero exit"),
    }
}

#[test]
fn output_captures_stdout() {
    let runner = ProcessCmdRunner;
    let spec = CmdSpec::new("sh").args(["-c", "printf hello"]);

    let stdout = runner.output(&spec).expect("command should succeed");
    assert_eq!(stdout, b"hello");
}

#[test]
fn output_carries_stderr_on_failure() {
    let runner = ProcessCmdRunner;
    let spec = CmdSpec::new("sh").args(["-c", "echo oops >&2; exit 1"]);

    match runner.output(&spec) {
        Err(CmdError::ExitStatus { stderr, code, .. }) => {
            assert_eq!(code, Some(1));
            assert_eq!(stderr, "oops");
        }
        other => panic!("expected exit-status error, got: {other:?}"),
    }
}

#[test]
fn spawn_failure_is_distinguished() {
    let runner = ProcessCmdRunner;
    let spec = CmdSpec::new("definitely-not-a-real-program-4711");

    match runner.run(&spec) {
        Err(error @ CmdError::Spawn { .. }) => assert_eq!(error.exit_code(), None),
        other => panic!("expected spawn error, got: {other:?}"),
    }
}
