use std::path::PathBuf;
use std::process::Command;

/// A prepared child-process invocation. Built once, executed by a
/// [`CmdRunner`], so everything above this layer is testable with fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CmdSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CmdError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with status {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CmdError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Spawn { .. } => None,
            Self::ExitStatus { code, .. } => *code,
        }
    }
}

/// Run-and-wait and run-and-capture. Both are short, blocking operations;
/// there is no streaming and no cancellation.
pub trait CmdRunner: Send + Sync {
    fn run(&self, spec: &CmdSpec) -> Result<(), CmdError>;
    fn output(&self, spec: &CmdSpec) -> Result<Vec<u8>, CmdError>;
}

pub struct ProcessCmdRunner;

impl ProcessCmdRunner {
    fn execute(&self, spec: &CmdSpec) -> Result<Vec<u8>, CmdError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let output = command.output().map_err(|error| CmdError::Spawn {
            program: spec.program.clone(),
            message: error.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CmdError::ExitStatus {
                program: spec.program.clone(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(output.stdout)
    }
}

impl CmdRunner for ProcessCmdRunner {
    fn run(&self, spec: &CmdSpec) -> Result<(), CmdError> {
        self.execute(spec).map(|_| ())
    }

    fn output(&self, spec: &CmdSpec) -> Result<Vec<u8>, CmdError> {
        self.execute(spec)
    }
}

#[cfg(test)]
mod tests;
