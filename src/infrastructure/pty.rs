use std::io::{self, Read, Write};

use portable_pty::{CommandBuilder, PtySize, native_pty_system};

use super::process::CmdSpec;

/// The bidirectional byte stream of a child attached to a pseudo-terminal.
/// Closing it signals EOF to the child and to any cloned readers.
pub trait PtyStream: Send {
    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

pub trait PtyFactory: Send + Sync {
    fn start(&self, spec: &CmdSpec) -> io::Result<Box<dyn PtyStream>>;
}

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

pub struct NativePtyFactory;

impl PtyFactory for NativePtyFactory {
    fn start(&self, spec: &CmdSpec) -> io::Result<Box<dyn PtyStream>> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(io::Error::other)?;

        let mut command = CommandBuilder::new(&spec.program);
        for arg in &spec.args {
            command.arg(arg);
        }
        if let Some(dir) = &spec.dir {
            command.cwd(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = pair.slave.spawn_command(command).map_err(io::Error::other)?;
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(io::Error::other)?;

        Ok(Box::new(NativePtyStream {
            master: pair.master,
            writer,
            child,
            closed: false,
        }))
    }
}

struct NativePtyStream {
    master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    closed: bool,
}

impl PtyStream for NativePtyStream {
    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        self.master.try_clone_reader().map_err(io::Error::other)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(io::Error::other)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Killing the child (the tmux attach client) EOFs every reader
        // cloned from the master side.
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for NativePtyStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
