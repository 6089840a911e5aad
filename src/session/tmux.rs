use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::domain::{SquadError, combine_errors};
use crate::infrastructure::event_log::{EventLogger, Severity};
use crate::infrastructure::process::{CmdRunner, CmdSpec};
use crate::infrastructure::pty::{PtyFactory, PtyStream};

pub const TMUX_PREFIX: &str = "claudesquad_";

pub const PROGRAM_CLAUDE: &str = "claude";
pub const PROGRAM_AIDER: &str = "aider";
pub const PROGRAM_GEMINI: &str = "gemini";

const SESSION_POLL_INITIAL: Duration = Duration::from_millis(5);
const SESSION_POLL_CAP: Duration = Duration::from_millis(50);
const SESSION_POLL_CEILING: Duration = Duration::from_secs(2);

const TRUST_POLL_INITIAL: Duration = Duration::from_millis(100);
const TRUST_POLL_CAP: Duration = Duration::from_secs(1);

/// Bytes arriving within this window after attach are terminal control
/// sequences, not operator input.
const ATTACH_DISCARD_WINDOW: Duration = Duration::from_millis(50);
/// Ctrl-Q.
const DETACH_KEY: u8 = 0x11;
const STDIN_CHUNK: usize = 32;

const HISTORY_LIMIT: &str = "10000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrustReply {
    Enter,
    DThenEnter,
}

/// First-run trust prompts per agent CLI. New agents extend this table.
struct TrustPrompt {
    program_suffix: &'static str,
    needles: &'static [&'static str],
    reply: TrustReply,
    max_wait: Duration,
}

const TRUST_PROMPTS: [TrustPrompt; 3] = [
    TrustPrompt {
        program_suffix: PROGRAM_CLAUDE,
        needles: &[
            "Do you trust the files in this folder?",
            "Quick safety check: Is this a project you created",
            "Yes, I trust this folder",
        ],
        reply: TrustReply::Enter,
        max_wait: Duration::from_secs(30),
    },
    TrustPrompt {
        program_suffix: PROGRAM_AIDER,
        needles: &["Open documentation url for more info"],
        reply: TrustReply::DThenEnter,
        max_wait: Duration::from_secs(45),
    },
    TrustPrompt {
        program_suffix: PROGRAM_GEMINI,
        needles: &["Open documentation url for more info"],
        reply: TrustReply::DThenEnter,
        max_wait: Duration::from_secs(45),
    },
];

fn trust_prompt_for(program: &str) -> Option<&'static TrustPrompt> {
    TRUST_PROMPTS
        .iter()
        .find(|entry| program.ends_with(entry.program_suffix))
}

/// Substring that marks an agent waiting on a yes/no decision, keyed by the
/// configured program.
fn prompt_needle(program: &str) -> Option<&'static str> {
    if program == PROGRAM_CLAUDE {
        return Some("No, and tell Claude what to do differently");
    }
    if program.starts_with(PROGRAM_AIDER) {
        return Some("(Y)es/(N)o/(D)on't ask again");
    }
    if program.starts_with(PROGRAM_GEMINI) {
        return Some("Yes, allow once");
    }
    None
}

/// Session names are the title with whitespace removed and dots replaced,
/// behind a fixed prefix. tmux itself rewrites dots, so we do it up front.
pub fn to_claude_squad_tmux_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|character| !character.is_whitespace())
        .map(|character| if character == '.' { '_' } else { character })
        .collect();
    format!("{TMUX_PREFIX}{cleaned}")
}

struct AttachState {
    done_tx: Sender<()>,
    stop: Arc<AtomicBool>,
    stdout_worker: JoinHandle<()>,
}

struct TmuxInner {
    sanitized_name: String,
    program: String,
    pty_factory: Arc<dyn PtyFactory>,
    runner: Arc<dyn CmdRunner>,
    logger: Arc<dyn EventLogger>,
    /// The PTY running `tmux attach-session`. Present whenever the session
    /// has been started or restored.
    live: Mutex<Option<Box<dyn PtyStream>>>,
    /// Last SHA-256 of the captured visible pane text.
    prev_output_hash: Mutex<Option<[u8; 32]>>,
    attached: Mutex<Option<AttachState>>,
}

/// One named background tmux session bound to a working directory and a
/// program. Cheap to clone; clones share the underlying session handle.
#[derive(Clone)]
pub struct TmuxSession {
    inner: Arc<TmuxInner>,
}

impl TmuxSession {
    pub fn new(
        name: &str,
        program: &str,
        pty_factory: Arc<dyn PtyFactory>,
        runner: Arc<dyn CmdRunner>,
        logger: Arc<dyn EventLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(TmuxInner {
                sanitized_name: to_claude_squad_tmux_name(name),
                program: program.to_string(),
                pty_factory,
                runner,
                logger,
                live: Mutex::new(None),
                prev_output_hash: Mutex::new(None),
                attached: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.sanitized_name
    }

    pub fn program(&self) -> &str {
        &self.inner.program
    }

    /// Creates the detached session, applies the session options, restores
    /// a live PTY against it, and answers the agent's first-run trust
    /// prompt when one is expected.
    pub fn start(&self, work_dir: &Path) -> Result<(), SquadError> {
        let inner = &self.inner;
        if self.does_session_exist() {
            return Err(SquadError::SessionExists(inner.sanitized_name.clone()));
        }

        let spec = CmdSpec::new("tmux")
            .args(["new-session", "-d", "-s", inner.sanitized_name.as_str(), "-c"])
            .arg(work_dir.to_string_lossy())
            .arg(&inner.program);

        let mut bootstrap = match inner.pty_factory.start(&spec) {
            Ok(stream) => stream,
            Err(error) => {
                let mut message = format!("error starting tmux session: {error}");
                if self.does_session_exist()
                    && let Err(cleanup_error) = inner.runner.run(&kill_session_spec(&inner.sanitized_name))
                {
                    message.push_str(&format!(" (cleanup error: {cleanup_error})"));
                }
                return Err(SquadError::Io(message));
            }
        };

        // Poll for the session with exponential backoff.
        let deadline = Instant::now() + SESSION_POLL_CEILING;
        let mut sleep_duration = SESSION_POLL_INITIAL;
        while !self.does_session_exist() {
            if Instant::now() >= deadline {
                let mut message = format!(
                    "timed out waiting for tmux session {}",
                    inner.sanitized_name
                );
                if let Err(cleanup_error) = self.close() {
                    message.push_str(&format!(" (cleanup error: {cleanup_error})"));
                }
                return Err(SquadError::ChildProcess(message));
            }
            thread::sleep(sleep_duration);
            if sleep_duration < SESSION_POLL_CAP {
                sleep_duration *= 2;
            }
        }
        let _ = bootstrap.close();
        drop(bootstrap);

        let history = CmdSpec::new("tmux").args([
            "set-option",
            "-t",
            inner.sanitized_name.as_str(),
            "history-limit",
            HISTORY_LIMIT,
        ]);
        if let Err(error) = inner.runner.run(&history) {
            inner.logger.log(
                Severity::Warning,
                &format!(
                    "failed to set history-limit for session {}: {error}",
                    inner.sanitized_name
                ),
            );
        }

        let mouse = CmdSpec::new("tmux").args([
            "set-option",
            "-t",
            inner.sanitized_name.as_str(),
            "mouse",
            "on",
        ]);
        if let Err(error) = inner.runner.run(&mouse) {
            inner.logger.log(
                Severity::Warning,
                &format!(
                    "failed to enable mouse for session {}: {error}",
                    inner.sanitized_name
                ),
            );
        }

        if let Err(error) = self.restore() {
            let mut message = format!("error restoring tmux session: {error}");
            if let Err(cleanup_error) = self.close() {
                message.push_str(&format!(" (cleanup error: {cleanup_error})"));
            }
            return Err(SquadError::Io(message));
        }

        self.answer_trust_prompt();
        Ok(())
    }

    /// Re-opens a PTY running `attach-session` against the existing session
    /// and resets the status monitor.
    pub fn restore(&self) -> Result<(), SquadError> {
        self.inner.restore()
    }

    /// Full-duplex relay between the operator's terminal and the session.
    /// The returned channel is closed once detachment completes; Ctrl-Q is
    /// the only byte interpreted locally.
    pub fn attach(&self) -> Result<Receiver<()>, SquadError> {
        let inner = &self.inner;
        let reader = {
            let Ok(mut live) = inner.live.lock() else {
                return Err(SquadError::Io("session stream lock poisoned".to_string()));
            };
            let Some(stream) = live.as_mut() else {
                return Err(SquadError::Io("no live session stream".to_string()));
            };
            stream.reader()?
        };

        let (done_tx, done_rx) = channel();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_for_stdout = Arc::clone(&stop);
        let stdout_worker = thread::spawn(move || {
            let mut reader = reader;
            let mut stdout = std::io::stdout();
            let _ = std::io::copy(&mut reader, &mut stdout);
            if !stop_for_stdout.load(Ordering::SeqCst) {
                eprintln!(
                    "\n\x1b[31mError: Session terminated without detaching. Use Ctrl-Q to properly detach from tmux sessions.\x1b[0m"
                );
            }
        });

        {
            let Ok(mut attached) = inner.attached.lock() else {
                return Err(SquadError::Io("attach state lock poisoned".to_string()));
            };
            *attached = Some(AttachState {
                done_tx,
                stop,
                stdout_worker,
            });
        }

        let relay = Arc::clone(&self.inner);
        thread::spawn(move || {
            let started = Instant::now();
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; STDIN_CHUNK];

            loop {
                let read = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => continue,
                };

                // Terminal emulators push control sequences right after
                // attach; anything inside the window is not operator input.
                if started.elapsed() < ATTACH_DISCARD_WINDOW {
                    relay.logger.log(
                        Severity::Info,
                        &format!("discarded attach control bytes: {:?}", &buf[..read]),
                    );
                    continue;
                }

                if read == 1 && buf[0] == DETACH_KEY {
                    relay.detach();
                    return;
                }

                if let Ok(mut live) = relay.live.lock()
                    && let Some(stream) = live.as_mut()
                {
                    let _ = stream.write_all(&buf[..read]);
                }
            }
        });

        Ok(done_rx)
    }

    /// Orderly detach: close the live PTY, restore a fresh one, stop the
    /// relay workers. Failure to close or restore is fatal; dying beats
    /// leaving the operator's terminal wedged to a dead stream.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Idempotent, non-panicking detach used from pause. Leaves the handle
    /// without a live stream; restore or start re-establishes one.
    pub fn detach_safely(&self) -> Result<(), SquadError> {
        let inner = &self.inner;
        let state = match inner.attached.lock() {
            Ok(mut attached) => attached.take(),
            Err(_) => None,
        };
        let Some(state) = state else {
            return Ok(());
        };

        let mut errors = Vec::new();

        let stream = match inner.live.lock() {
            Ok(mut live) => live.take(),
            Err(_) => None,
        };
        if let Some(mut stream) = stream
            && let Err(error) = stream.close()
        {
            errors.push(SquadError::Io(format!(
                "error closing attach pty stream: {error}"
            )));
        }

        state.stop.store(true, Ordering::SeqCst);
        if state.stdout_worker.join().is_err() {
            errors.push(SquadError::Io("stdout relay worker panicked".to_string()));
        }
        drop(state.done_tx);

        combine_errors(errors)
    }

    pub fn send_keys(&self, keys: &str) -> Result<(), SquadError> {
        self.inner.write_live(keys.as_bytes())
    }

    pub fn tap_enter(&self) -> Result<(), SquadError> {
        self.inner.write_live(&[0x0D])
    }

    pub fn tap_d_and_enter(&self) -> Result<(), SquadError> {
        self.inner.write_live(&[0x44, 0x0D])
    }

    /// Resizes the detached PTY window; the session conforms to it.
    pub fn set_detached_size(&self, cols: u16, rows: u16) -> Result<(), SquadError> {
        let Ok(mut live) = self.inner.live.lock() else {
            return Err(SquadError::Io("session stream lock poisoned".to_string()));
        };
        let Some(stream) = live.as_mut() else {
            return Err(SquadError::Io("no live session stream".to_string()));
        };
        stream
            .resize(cols, rows)
            .map_err(|error| SquadError::Io(format!("error resizing pty: {error}")))
    }

    /// Visible pane text with ANSI sequences preserved.
    pub fn capture_pane_content(&self) -> Result<String, SquadError> {
        self.inner.capture(&[])
    }

    /// Whole scrollback, top of history to the end.
    pub fn capture_full_history(&self) -> Result<String, SquadError> {
        self.inner.capture(&["-S", "-", "-E", "-"])
    }

    /// Compares a hash of the visible pane against the previous tick.
    /// Also reports whether the agent is sitting on a yes/no prompt.
    pub fn has_updated(&self) -> (bool, bool) {
        let inner = &self.inner;
        let content = match self.capture_pane_content() {
            Ok(content) => content,
            Err(error) => {
                inner.logger.log(
                    Severity::Error,
                    &format!("error capturing pane content in status monitor: {error}"),
                );
                return (false, false);
            }
        };

        let has_prompt = prompt_needle(&inner.program)
            .is_some_and(|needle| content.contains(needle));

        let hash: [u8; 32] = Sha256::digest(content.as_bytes()).into();
        let Ok(mut prev) = inner.prev_output_hash.lock() else {
            return (false, has_prompt);
        };
        if prev.as_ref() != Some(&hash) {
            *prev = Some(hash);
            return (true, has_prompt);
        }
        (false, has_prompt)
    }

    pub fn does_session_exist(&self) -> bool {
        // `-t name` is a prefix match; `-t=` matches exactly.
        let spec = CmdSpec::new("tmux")
            .arg("has-session")
            .arg(format!("-t={}", self.inner.sanitized_name));
        self.inner.runner.run(&spec).is_ok()
    }

    /// Closes the live PTY and kills the session, accumulating both errors.
    pub fn close(&self) -> Result<(), SquadError> {
        let inner = &self.inner;
        let mut errors = Vec::new();

        let stream = match inner.live.lock() {
            Ok(mut live) => live.take(),
            Err(_) => None,
        };
        if let Some(mut stream) = stream
            && let Err(error) = stream.close()
        {
            errors.push(SquadError::Io(format!("error closing pty: {error}")));
        }

        if let Err(error) = inner.runner.run(&kill_session_spec(&inner.sanitized_name)) {
            errors.push(SquadError::ChildProcess(format!(
                "error killing tmux session: {error}"
            )));
        }

        combine_errors(errors)
    }

    fn answer_trust_prompt(&self) {
        let inner = &self.inner;
        let Some(prompt) = trust_prompt_for(&inner.program) else {
            return;
        };

        inner.logger.log(
            Severity::Info,
            &format!(
                "waiting for trust prompt in {} (needles: {:?})",
                inner.sanitized_name, prompt.needles
            ),
        );

        let started = Instant::now();
        let mut sleep_duration = TRUST_POLL_INITIAL;
        while started.elapsed() < prompt.max_wait {
            thread::sleep(sleep_duration);

            if let Ok(content) = self.capture_pane_content()
                && let Some(needle) = prompt
                    .needles
                    .iter()
                    .find(|needle| content.contains(*needle))
            {
                inner.logger.log(
                    Severity::Info,
                    &format!(
                        "found trust prompt '{needle}' after {:?}",
                        started.elapsed()
                    ),
                );
                let reply = match prompt.reply {
                    TrustReply::Enter => self.tap_enter(),
                    TrustReply::DThenEnter => self.tap_d_and_enter(),
                };
                if let Err(error) = reply {
                    inner.logger.log(
                        Severity::Error,
                        &format!("could not answer trust prompt: {error}"),
                    );
                }
                return;
            }

            sleep_duration = sleep_duration.mul_f64(1.2);
            if sleep_duration > TRUST_POLL_CAP {
                sleep_duration = TRUST_POLL_CAP;
            }
        }

        inner.logger.log(
            Severity::Warning,
            &format!(
                "timed out waiting for trust prompt after {:?}",
                prompt.max_wait
            ),
        );
    }
}

impl TmuxInner {
    fn restore(&self) -> Result<(), SquadError> {
        let spec =
            CmdSpec::new("tmux").args(["attach-session", "-t", self.sanitized_name.as_str()]);
        let stream = self
            .pty_factory
            .start(&spec)
            .map_err(|error| SquadError::Io(format!("error opening pty: {error}")))?;

        let Ok(mut live) = self.live.lock() else {
            return Err(SquadError::Io("session stream lock poisoned".to_string()));
        };
        *live = Some(stream);

        if let Ok(mut prev) = self.prev_output_hash.lock() {
            *prev = None;
        }
        Ok(())
    }

    fn detach(&self) {
        let state = match self.attached.lock() {
            Ok(mut attached) => attached.take(),
            Err(_) => None,
        };
        let Some(state) = state else {
            return;
        };

        let stream = match self.live.lock() {
            Ok(mut live) => live.take(),
            Err(_) => None,
        };
        // A PTY that cannot be closed, or a session that cannot be
        // re-opened, leaves the operator's terminal wedged to a dead
        // stream. Terminating is the only safe exit.
        if let Some(mut stream) = stream
            && let Err(error) = stream.close()
        {
            self.die(&format!("error closing attach pty stream: {error}"));
        }

        if let Err(error) = self.restore() {
            self.die(&format!("error restoring session after detach: {error}"));
        }

        state.stop.store(true, Ordering::SeqCst);
        let _ = state.stdout_worker.join();
        drop(state.done_tx);
    }

    fn die(&self, message: &str) -> ! {
        self.logger.log(Severity::Error, message);
        eprintln!("claude-squad: {message}");
        std::process::exit(1);
    }

    fn write_live(&self, bytes: &[u8]) -> Result<(), SquadError> {
        let Ok(mut live) = self.live.lock() else {
            return Err(SquadError::Io("session stream lock poisoned".to_string()));
        };
        let Some(stream) = live.as_mut() else {
            return Err(SquadError::Io("no live session stream".to_string()));
        };
        stream
            .write_all(bytes)
            .map_err(|error| SquadError::Io(format!("error writing to pty: {error}")))
    }

    fn capture(&self, extra_args: &[&str]) -> Result<String, SquadError> {
        let mut spec = CmdSpec::new("tmux").args(["capture-pane", "-p", "-e", "-J"]);
        spec = spec.args(extra_args.iter().copied());
        spec = spec.args(["-t", self.sanitized_name.as_str()]);

        let stdout = self.runner.output(&spec).map_err(|error| {
            SquadError::ChildProcess(format!("error capturing pane content: {error}"))
        })?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

fn kill_session_spec(name: &str) -> CmdSpec {
    CmdSpec::new("tmux").args(["kill-session", "-t", name])
}

/// Kills every session carrying the claude-squad prefix. Exit code 1 from
/// `tmux ls` means the server has no sessions at all.
pub fn cleanup_sessions(
    runner: &dyn CmdRunner,
    logger: &dyn EventLogger,
) -> Result<(), SquadError> {
    let stdout = match runner.output(&CmdSpec::new("tmux").arg("ls")) {
        Ok(stdout) => stdout,
        Err(error) if error.exit_code() == Some(1) => return Ok(()),
        Err(error) => {
            return Err(SquadError::ChildProcess(format!(
                "failed to list tmux sessions: {error}"
            )));
        }
    };

    let listing = String::from_utf8_lossy(&stdout).to_string();
    for line in listing.lines() {
        let Some((name, _)) = line.split_once(':') else {
            continue;
        };
        if !name.starts_with(TMUX_PREFIX) {
            continue;
        }

        logger.log(Severity::Info, &format!("cleaning up session: {name}"));
        if let Err(error) = runner.run(&kill_session_spec(name)) {
            return Err(SquadError::ChildProcess(format!(
                "failed to kill tmux session {name}: {error}"
            )));
        }
    }
    Ok(())
}

/// Classifies a capture error that may mean the backing session died.
pub fn capture_error_indicates_dead_session(error: &SquadError) -> bool {
    matches!(error, SquadError::ChildProcess(_) | SquadError::Io(_))
}

#[cfg(test)]
mod tests;
