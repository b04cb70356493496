// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Spawns external tools with captured output and a timeout guard.

use log::debug;
use std::ffi::OsStr;
use std::io;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use wait_timeout::ChildExt;

/// Default timeout for external tool invocations (30 seconds).
pub(crate) const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that prevent a subprocess from producing an exit status. A tool
/// that runs but fails is reported through [`CommandOutput`] instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Empty command line")]
    EmptyCommand,
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("Failed to spawn command: {command}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },
    #[error("Failed to collect output of command: {command}")]
    OutputFailed {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Capability for spawning external tools.
///
/// Explicit `env` entries override inherited environment variables; the rest
/// of the environment passes through. Both output pipes are drained to
/// completion before the exit status is read.
pub trait CommandRunner {
    /// Run `argv` to completion and capture its output.
    ///
    /// # Errors
    /// Returns an error only when no exit status could be obtained (missing
    /// tool, spawn failure, timeout).
    fn run(&self, argv: &[&OsStr], env: &[(&str, &str)]) -> Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, argv: &[&OsStr], env: &[(&str, &str)]) -> Result<CommandOutput> {
        (**self).run(argv, env)
    }
}

/// [`CommandRunner`] backed by `std::process` with a hang guard.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[&OsStr], env: &[(&str, &str)]) -> Result<CommandOutput> {
        let (program, arguments) = argv.split_first().ok_or(RunnerError::EmptyCommand)?;
        let command_name = program.to_string_lossy().into_owned();

        let mut command = Command::new(program);
        command
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RunnerError::CommandNotFound {
                    command: command_name.clone(),
                }
            } else {
                RunnerError::SpawnFailed {
                    command: command_name.clone(),
                    source: e,
                }
            }
        })?;

        // Both pipes are read on their own threads so a chatty tool cannot
        // fill a pipe buffer and deadlock against our wait.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let status = match child
            .wait_timeout(self.timeout)
            .map_err(|e| RunnerError::OutputFailed {
                command: command_name.clone(),
                source: e,
            })? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunnerError::Timeout {
                    command: command_name,
                    timeout: self.timeout,
                });
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

/// Resolve an external tool, preferring a copy next to our own executable
/// over `$PATH`. Falls back to the bare name so spawn errors carry it.
pub(crate) fn resolve_tool(name: &str) -> PathBuf {
    if let Ok(own_path) = std::env::current_exe() {
        if let Some(directory) = own_path.parent() {
            let local = directory.join(name);
            if local.exists() {
                debug!("Using {}: {}", name, local.display());
                return local;
            }
        }
    }
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}
