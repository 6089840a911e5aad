use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// Write-only clipboard access. Callers treat failures as best-effort;
/// nothing in the supervisor hard-fails on a clipboard error.
pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), String>;
}

pub struct NullClipboard;

impl Clipboard for NullClipboard {
    fn write_text(&self, _text: &str) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
pub struct SystemClipboard {
    clipboard: Mutex<Option<arboard::Clipboard>>,
}

const FALLBACK_WRITERS: [(&str, &[&str]); 3] = [
    ("pbcopy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("wl-copy", &[]),
];

impl SystemClipboard {
    fn write_via_arboard(&self, text: &str) -> Result<(), String> {
        let Ok(mut guard) = self.clipboard.lock() else {
            return Err("clipboard unavailable".to_string());
        };

        if guard.is_none() {
            *guard = Some(arboard::Clipboard::new().map_err(|error| error.to_string())?);
        }

        let Some(clipboard) = guard.as_mut() else {
            return Err("clipboard unavailable".to_string());
        };
        clipboard
            .set_text(text.to_string())
            .map_err(|error| error.to_string())
    }

    fn write_via_command(program: &str, args: &[&str], text: &str) -> Result<(), String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| format!("{program}: {error}"))?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(format!("{program}: failed to open stdin"));
        };
        stdin
            .write_all(text.as_bytes())
            .map_err(|error| format!("{program}: {error}"))?;
        drop(stdin);

        let status = child
            .wait()
            .map_err(|error| format!("{program}: {error}"))?;
        if status.success() {
            return Ok(());
        }

        Err(format!("{program}: exited with status {status}"))
    }
}

impl Clipboard for SystemClipboard {
    fn write_text(&self, text: &str) -> Result<(), String> {
        let arboard_error = match self.write_via_arboard(text) {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        for (program, args) in FALLBACK_WRITERS {
            if Self::write_via_command(program, args, text).is_ok() {
                return Ok(());
            }
        }

        Err(arboard_error)
    }
}
