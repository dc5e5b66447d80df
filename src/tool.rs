use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    fn new(status: ExitStatus, stdout: String, stderr: String) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
            stdout,
            stderr,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: Option<String>,
    pub version: Option<String>,
}

/// An external CLI located on PATH. Commands run to completion and return
/// stdout and stderr separately; nothing is streamed.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    name: String,
    program: Option<PathBuf>,
}

impl ToolRunner {
    pub fn locate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            program: find_in_path(name),
        }
    }

    pub fn with_program(name: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            program: Some(program.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> Result<&Path, ToolError> {
        self.program
            .as_deref()
            .ok_or_else(|| ToolError::Missing(self.name.clone()))
    }

    /// Runs the command and captures its streams regardless of exit status.
    pub fn output(&self, args: &[String]) -> Result<ToolOutput, ToolError> {
        self.output_within(args, None)
    }

    /// Like [`ToolRunner::output`], but the child is killed once `timeout`
    /// elapses and the call fails with [`ToolError::TimedOut`].
    pub fn output_within(
        &self,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let program = self.program()?;
        tracing::debug!(tool = %self.name, args = ?args, ?timeout, "running external command");
        let mut command = Command::new(program);
        command.args(args);

        let Some(timeout) = timeout else {
            let output = command.output().map_err(|err| self.spawn_error(err))?;
            return Ok(ToolOutput::new(
                output.status,
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        };

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.spawn_error(err))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait().map_err(|err| self.spawn_error(err))? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        tool = %self.name,
                        ?timeout,
                        "killed external command at deadline"
                    );
                    return Err(ToolError::TimedOut {
                        tool: self.name.clone(),
                        after: timeout,
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };
        Ok(ToolOutput::new(status, collect(stdout), collect(stderr)))
    }

    /// Like [`ToolRunner::output`], but a non-zero exit becomes an error
    /// carrying the trimmed stderr.
    pub fn run(&self, args: &[String]) -> Result<ToolOutput, ToolError> {
        self.run_within(args, None)
    }

    pub fn run_within(
        &self,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let output = self.output_within(args, timeout)?;
        if output.success {
            return Ok(output);
        }
        let stderr = output.stderr.trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", self.name)
        } else {
            stderr
        };
        Err(ToolError::Failed {
            tool: self.name.clone(),
            code: output
                .code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            message,
        })
    }

    fn spawn_error(&self, err: std::io::Error) -> ToolError {
        ToolError::Spawn {
            tool: self.name.clone(),
            message: err.to_string(),
        }
    }

    pub fn info(&self, version_args: &[&str]) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            path: self
                .program
                .as_ref()
                .map(|path| path.display().to_string()),
            version: self
                .program
                .as_ref()
                .and_then(|path| tool_version(path, version_args)),
        }
    }
}

/// Reads a child pipe to the end on its own thread so a chatty child cannot
/// block on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        // some tools (older rsync builds, aws v1) print their version on stderr
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return (!stderr.is_empty()).then_some(stderr);
    }
    stdout.lines().next().map(str::to_string)
}
