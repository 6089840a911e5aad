use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use crate::infrastructure::clipboard::Clipboard;
use crate::infrastructure::process::{CmdError, CmdRunner, CmdSpec};
use crate::infrastructure::pty::{PtyFactory, PtyStream};

type CmdHandler = dyn Fn(&CmdSpec) -> Result<Vec<u8>, CmdError> + Send + Sync;

/// Scripted command runner: a handler decides each call's outcome and every
/// spec is recorded for assertions.
pub struct FakeCmdRunner {
    handler: Box<CmdHandler>,
    calls: Mutex<Vec<CmdSpec>>,
}

impl FakeCmdRunner {
    pub fn new(
        handler: impl Fn(&CmdSpec) -> Result<Vec<u8>, CmdError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Runner that accepts every command with empty output.
    pub fn accepting() -> Arc<Self> {
        Self::new(|_| Ok(Vec::new()))
    }

    pub fn calls(&self) -> Vec<CmdSpec> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, program: &str, first_arg: &str) -> Vec<CmdSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| {
                spec.program == program && spec.args.first().map(String::as_str) == Some(first_arg)
            })
            .collect()
    }

    pub fn exit_error(code: i32) -> CmdError {
        CmdError::ExitStatus {
            program: "fake".to_string(),
            code: Some(code),
            stderr: String::new(),
        }
    }
}

impl CmdRunner for FakeCmdRunner {
    fn run(&self, spec: &CmdSpec) -> Result<(), CmdError> {
        self.output(spec).map(|_| ())
    }

    fn output(&self, spec: &CmdSpec) -> Result<Vec<u8>, CmdError> {
        self.calls.lock().expect("calls lock").push(spec.clone());
        (self.handler)(spec)
    }
}

#[derive(Default)]
pub struct PtyRecorder {
    pub written: Mutex<Vec<u8>>,
    pub resizes: Mutex<Vec<(u16, u16)>>,
    pub closed_streams: Mutex<usize>,
}

impl PtyRecorder {
    pub fn written_bytes(&self) -> Vec<u8> {
        self.written.lock().expect("written lock").clone()
    }

    pub fn resize_calls(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().expect("resizes lock").clone()
    }
}

struct FakePtyStream {
    recorder: Arc<PtyRecorder>,
}

impl PtyStream for FakePtyStream {
    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::empty()))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.recorder
            .written
            .lock()
            .expect("written lock")
            .extend_from_slice(bytes);
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.recorder
            .resizes
            .lock()
            .expect("resizes lock")
            .push((cols, rows));
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        *self.recorder.closed_streams.lock().expect("closed lock") += 1;
        Ok(())
    }
}

/// PTY factory whose streams record writes, resizes, and closes into a
/// shared recorder.
pub struct FakePtyFactory {
    pub recorder: Arc<PtyRecorder>,
    pub started: Mutex<Vec<CmdSpec>>,
    pub fail: bool,
}

impl FakePtyFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            recorder: Arc::new(PtyRecorder::default()),
            started: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            recorder: Arc::new(PtyRecorder::default()),
            started: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn started_specs(&self) -> Vec<CmdSpec> {
        self.started.lock().expect("started lock").clone()
    }
}

impl PtyFactory for FakePtyFactory {
    fn start(&self, spec: &CmdSpec) -> io::Result<Box<dyn PtyStream>> {
        self.started.lock().expect("started lock").push(spec.clone());
        if self.fail {
            return Err(io::Error::other("pty allocation failed"));
        }
        Ok(Box::new(FakePtyStream {
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

/// Clipboard that records written text instead of touching the system.
#[derive(Default)]
pub struct RecordingClipboard {
    pub texts: Mutex<Vec<String>>,
}

impl RecordingClipboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> Option<String> {
        self.texts.lock().expect("texts lock").last().cloned()
    }
}

impl Clipboard for RecordingClipboard {
    fn write_text(&self, text: &str) -> Result<(), String> {
        self.texts.lock().expect("texts lock").push(text.to_string());
        Ok(())
    }
}
