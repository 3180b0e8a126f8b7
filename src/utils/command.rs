use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::constants::COMMAND_POLL_INTERVAL_MS;

/// Description of an external command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub capture_output: bool,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        CommandSpec {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout: None,
            capture_output: true,
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

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send stdout/stderr to /dev/null; for programs that daemonize and keep inherited pipes open
    pub fn discard_output(mut self) -> Self {
        self.capture_output = false;
        self
    }

    /// Command line as it would be typed, for logs and placeholders
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished (or killed) command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Successful exit with the given stdout
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Failed exit with the given stderr
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        CommandOutput {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Seam between the collectors and the host's external tools.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion (or until its timeout expires).
    ///
    /// An `Err` means the command could not be started at all; a non-zero
    /// exit or a timeout is reported through [`CommandOutput`].
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `program` resolves to an executable on the search path
    fn is_installed(&self, program: &str) -> bool;
}

/// Runs commands on the local host with `std::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        SystemCommandRunner
    }

    fn build(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).stdin(Stdio::null());
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn run_with_deadline(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        let mut child = Self::build(spec)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(format!("Failed to execute {}", spec.program))?;

        // Drain both pipes on their own threads so a chatty child can't block on a full pipe
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let start = Instant::now();
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        warn!("{} exceeded its {:?} timeout, killing it", spec.display(), timeout);
                        let _ = child.kill();
                        let _ = child.wait();
                        timed_out = true;
                        break None;
                    }
                    thread::sleep(Duration::from_millis(COMMAND_POLL_INTERVAL_MS));
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(e).context(format!("Failed to wait for {}", spec.program));
                }
            }
        };

        // A killed child's descendants may keep the pipes open; don't wait on them forever
        let grace = if timed_out {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(30)
        };
        let stdout = stdout_reader
            .and_then(|rx| rx.recv_timeout(grace).ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|rx| rx.recv_timeout(grace).ok())
            .unwrap_or_default();

        Ok(CommandOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            timed_out,
        })
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {}", spec.display());

        if !spec.capture_output {
            let status = Self::build(spec)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .context(format!("Failed to execute {}", spec.program))?;
            return Ok(CommandOutput {
                exit_code: status.code(),
                ..Default::default()
            });
        }

        if let Some(timeout) = spec.timeout {
            return Self::run_with_deadline(spec, timeout);
        }

        let output = Self::build(spec)
            .output()
            .context(format!("Failed to execute {}", spec.program))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
        })
    }

    fn is_installed(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
            .unwrap_or(false)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
