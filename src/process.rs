//! Invocation of external programs.
//!
//! A [`Cmd`] runs to completion and hands back its exit status and captured
//! streams as one [`ProcessOutput`]. [`Cmd::run`] additionally turns a
//! non-zero exit into a [`ProcessError::Failed`] carrying that output.

use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("No command given")]
    Empty,

    #[error("Program '{0}' was not found, is it installed and on the PATH?")]
    NotFound(String),

    #[error("Couldn't run '{0}': {1}")]
    Spawn(String, std::io::Error),

    #[error("'{command}' exited with {status}\n{stderr}{stdout}")]
    Failed {
        command: String,
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// Exit status and captured streams of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    stdin: Option<Vec<u8>>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Builds a command from a program followed by its arguments.
    pub fn from_slice(parts: &[String]) -> Result<Self, ProcessError> {
        let (program, args) = parts.split_first().ok_or(ProcessError::Empty)?;
        Ok(Self::new(program.clone()).args(args))
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

    pub fn cwd(mut self, dir: impl AsRef<Utf8Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Bytes fed to the standard input of the process.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Full command line, for messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the process to completion, whatever its exit status.
    pub fn output(self) -> Result<ProcessOutput, ProcessError> {
        let display = self.display();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProcessError::NotFound(self.program.clone()),
            _ => ProcessError::Spawn(display.clone(), e),
        })?;

        // Feed stdin from a separate thread so a chatty process can't
        // deadlock on a full stdout pipe.
        let writer = match (child.stdin.take(), self.stdin) {
            (Some(mut pipe), Some(input)) => {
                Some(std::thread::spawn(move || pipe.write_all(&input)))
            }
            _ => None,
        };

        let output = child
            .wait_with_output()
            .map_err(|e| ProcessError::Spawn(display, e))?;

        if let Some(writer) = writer {
            // A process may exit without reading all of its input.
            let _ = writer.join();
        }

        Ok(ProcessOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Runs the process and fails on a non-zero exit status.
    pub fn run(self) -> Result<ProcessOutput, ProcessError> {
        let command = self.display();
        let output = self.output()?;

        if !output.success() {
            return Err(ProcessError::Failed {
                command,
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }
}
