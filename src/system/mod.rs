//! OS abstraction: external process execution.
//!
//! Every external tool (git, cmake, ninja) is started through a
//! [`CommandRunner`]. Each [`Invocation`] carries its own working directory,
//! so the process-wide current directory is never changed.
//!
//! [`SystemRunner`] is the production implementation. Tests substitute their
//! own runner to simulate tool behaviour and exit codes.

pub mod paths;

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ProcessError;

/// One external process to run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
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

    /// Shell-like rendering for log lines.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Exit status plus whatever the process printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; -1 when the process was terminated by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Blocking execution of external tools.
pub trait CommandRunner {
    /// Run the invocation to completion and report its exit code.
    ///
    /// A non-zero exit is *not* an error at this level; callers decide
    /// whether it is fatal.
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;

    /// Resolve a tool the way the runner would when spawning it.
    fn locate(&self, program: &str) -> Option<PathBuf> {
        paths::find_executable(program)
    }
}

/// Spawns real processes with piped output and an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Log target for lines a child process wrote to stdout.
pub const PROCESS_TARGET: &str = "process";

/// Log target for lines a child process wrote to stderr.
pub const PROCESS_STDERR_TARGET: &str = "process::stderr";

impl SystemRunner {
    pub fn new() -> Self {
        SystemRunner { timeout: None }
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        SystemRunner { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        log::debug!(
            "[{}] $ {}",
            invocation.cwd.display(),
            invocation.display()
        );

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(|s| stream_lines(s, false));
        let stderr = child.stderr.take().map(|s| stream_lines(s, true));

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    return Err(ProcessError::Spawn {
                        program: invocation.program.clone(),
                        source,
                    })
                }
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_lines(stdout);
                    join_lines(stderr);
                    return Err(ProcessError::TimedOut {
                        program: invocation.program.clone(),
                        secs: limit.as_secs(),
                    });
                }
            }

            thread::sleep(POLL_INTERVAL);
        };

        Ok(ProcessOutput {
            code: status.code().unwrap_or(-1),
            stdout: join_lines(stdout),
            stderr: join_lines(stderr),
        })
    }
}

/// Forward every line of a child stream to the log and keep a copy.
fn stream_lines<R: Read + Send + 'static>(
    stream: R,
    is_stderr: bool,
) -> thread::JoinHandle<String> {
    let target = if is_stderr { PROCESS_STDERR_TARGET } else { PROCESS_TARGET };
    thread::spawn(move || {
        let mut captured = String::new();
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            log::info!(target: target, "{}", line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

fn join_lines(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
