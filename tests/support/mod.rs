use std::io;
use std::sync::Arc;

use claude_squad::infrastructure::clipboard::Clipboard;
use claude_squad::infrastructure::event_log::NullEventLogger;
use claude_squad::infrastructure::process::{CmdError, CmdRunner, CmdSpec};
use claude_squad::infrastructure::pty::{PtyFactory, PtyStream};
use claude_squad::session::SupervisorDeps;

pub struct AcceptingRunner;

impl CmdRunner for AcceptingRunner {
    fn run(&self, _spec: &CmdSpec) -> Result<(), CmdError> {
        Ok(())
    }

    fn output(&self, _spec: &CmdSpec) -> Result<Vec<u8>, CmdError> {
        Ok(Vec::new())
    }
}

pub struct UnusedPtyFactory;

impl PtyFactory for UnusedPtyFactory {
    fn start(&self, _spec: &CmdSpec) -> io::Result<Box<dyn PtyStream>> {
        Err(io::Error::other("no pty in storage tests"))
    }
}

pub struct DiscardingClipboard;

impl Clipboard for DiscardingClipboard {
    fn write_text(&self, _text: &str) -> Result<(), String> {
        Ok(())
    }
}

pub fn deps() -> SupervisorDeps {
    SupervisorDeps {
        runner: Arc::new(AcceptingRunner),
        pty_factory: Arc::new(UnusedPtyFactory),
        logger: Arc::new(NullEventLogger),
        clipboard: Arc::new(DiscardingClipboard),
        branch_prefix: "alice/".to_string(),
    }
}
