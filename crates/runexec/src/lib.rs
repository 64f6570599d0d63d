//! External tool execution with captured output and an optional bounded wait.
//! （執行外部工具、擷取輸出，並可選擇限制等待時間。）
//!
//! Every collaborator of the viewer (converter, map script, elevation
//! script, document opener) is an external program. This crate wraps
//! `std::process::Command` so callers get one shape of result: the exit
//! state plus everything the tool wrote, or a [`RunError`] when the program
//! could not be started at all.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(15);
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);
const OUTPUT_LOST_NOTE: &str = "(further output lost: a subprocess kept the pipe open)";

/// Errors that keep a tool from running to completion.
/// （讓工具無法執行完成的錯誤。）
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read output of {program}: {source}")]
    Output {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to poll {program}: {source}")]
    Poll {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to terminate {program}: {source}")]
    Kill {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Program plus leading arguments, as stored in configuration.
/// （設定檔中保存的程式與前置參數。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Short name used in diagnostics: the program's file name.
    pub fn tool_name(&self) -> String {
        std::path::Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Starts an invocation carrying the configured leading arguments.
    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.program).with_args(self.args.iter().cloned())
    }
}

/// A fully specified run of one external program.
/// （一次外部程式執行的完整描述。）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Bounds the wait; the child is killed once the limit passes.
    /// `None` waits for as long as the tool runs.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|limit| !limit.is_zero());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How the child process ended.
/// （子程序結束的方式。）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitState {
    Code(i32),
    /// Terminated by a signal (no exit code available).
    Signal,
    TimedOut(Duration),
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Code(code) => write!(f, "exit status {code}"),
            ExitState::Signal => write!(f, "termination by signal"),
            ExitState::TimedOut(limit) => write!(f, "timeout after {limit:?}"),
        }
    }
}

/// Everything a finished tool produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub state: ExitState,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    /// A pipe was still held open after a timeout, so its tail is missing.
    pub output_lost: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.state == ExitState::Code(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured stderr followed by stdout, trimmed, for error reports.
    pub fn diagnostics(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stdout = String::from_utf8_lossy(&self.stdout);
        let note = if self.output_lost { OUTPUT_LOST_NOTE } else { "" };
        [stderr.trim(), stdout.trim(), note]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs `invocation`, blocking until it exits or its timeout elapses.
pub fn run(invocation: &Invocation) -> Result<ToolOutput, RunError> {
    let program = invocation.program.clone();
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }

    debug!(command = %invocation, "spawning tool");
    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;

    // Drain both pipes concurrently so a chatty tool never blocks on a full pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let state = wait(&mut child, invocation.timeout, start, &program)?;
    let (stdout, stderr, output_lost) = if matches!(state, ExitState::TimedOut(_)) {
        let deadline = Instant::now() + TIMEOUT_GRACE;
        let stdout = collect_until(stdout, deadline, &program)?;
        let stderr = collect_until(stderr, deadline, &program)?;
        let lost = stdout.is_none() || stderr.is_none();
        (stdout.unwrap_or_default(), stderr.unwrap_or_default(), lost)
    } else {
        (collect(stdout, &program)?, collect(stderr, &program)?, false)
    };
    let duration = start.elapsed();
    debug!(command = %invocation, %state, ?duration, "tool finished");

    Ok(ToolOutput {
        state,
        stdout,
        stderr,
        duration,
        output_lost,
    })
}

fn wait(
    child: &mut Child,
    timeout: Option<Duration>,
    start: Instant,
    program: &str,
) -> Result<ExitState, RunError> {
    let status = match timeout {
        None => child.wait().map_err(|source| RunError::Poll {
            program: program.to_string(),
            source,
        })?,
        Some(limit) => loop {
            if let Some(status) = child.try_wait().map_err(|source| RunError::Poll {
                program: program.to_string(),
                source,
            })? {
                break status;
            }
            if start.elapsed() >= limit {
                child.kill().map_err(|source| RunError::Kill {
                    program: program.to_string(),
                    source,
                })?;
                // Reap the child so it does not linger as a zombie.
                let _ = child.wait();
                return Ok(ExitState::TimedOut(limit));
            }
            thread::sleep(POLL_INTERVAL);
        },
    };
    Ok(status.code().map_or(ExitState::Signal, ExitState::Code))
}

type Drain = Option<JoinHandle<io::Result<Vec<u8>>>>;

fn drain<R>(pipe: Option<R>) -> Drain
where
    R: Read + Send + 'static,
{
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    })
}

// After a kill the readers finish once every holder of the pipe is gone;
// grandchildren can keep it open, in which case the reader stays detached.
fn collect_until(
    handle: Drain,
    deadline: Instant,
    program: &str,
) -> Result<Option<Vec<u8>>, RunError> {
    let Some(handle) = handle else {
        return Ok(Some(Vec::new()));
    };
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
    collect(Some(handle), program).map(Some)
}

fn collect(handle: Drain, program: &str) -> Result<Vec<u8>, RunError> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    match handle.join() {
        Ok(result) => result.map_err(|source| RunError::Output {
            program: program.to_string(),
            source,
        }),
        Err(_) => Err(RunError::Output {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::Other, "output reader panicked"),
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let output = run(&sh("printf 'Track #0, Segment #0'")).expect("sh should run");
        assert!(output.success());
        assert_eq!(output.stdout_text(), "Track #0, Segment #0");
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn reports_nonzero_exit_with_diagnostics() {
        let output = run(&sh("echo 'no such track' >&2; echo partial; exit 2")).unwrap();
        assert_eq!(output.state, ExitState::Code(2));
        assert!(!output.success());
        assert_eq!(output.diagnostics(), "no such track\npartial");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run(&Invocation::new("gpxview-definitely-missing-tool")).unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[test]
    fn timeout_kills_the_child() {
        let invocation = sh("sleep 5").with_timeout(Some(Duration::from_millis(100)));
        let output = run(&invocation).unwrap();
        assert!(matches!(output.state, ExitState::TimedOut(_)));
        assert!(!output.success());
        assert!(output.duration < Duration::from_secs(5));
    }

    #[test]
    fn output_written_before_a_timeout_is_kept() {
        let invocation = sh("echo 'reading track 0' >&2; exec sleep 5")
            .with_timeout(Some(Duration::from_millis(200)));
        let output = run(&invocation).unwrap();
        assert!(matches!(output.state, ExitState::TimedOut(_)));
        assert!(!output.output_lost);
        assert_eq!(output.diagnostics(), "reading track 0");
    }

    #[test]
    fn pipe_held_by_a_grandchild_is_reported_as_lost() {
        let invocation = sh("echo started; sleep 5 & wait")
            .with_timeout(Some(Duration::from_millis(200)));
        let output = run(&invocation).unwrap();
        assert!(matches!(output.state, ExitState::TimedOut(_)));
        assert!(output.output_lost);
        assert!(output.diagnostics().ends_with(OUTPUT_LOST_NOTE));
        assert!(output.duration < Duration::from_secs(5));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let invocation = sh("exit 0").with_timeout(Some(Duration::ZERO));
        assert_eq!(invocation.timeout, None);
        assert!(run(&invocation).unwrap().success());
    }

    #[test]
    fn large_output_does_not_block() {
        let output = run(&sh("i=0; while [ $i -lt 20000 ]; do echo 'Track #1 Segment #2'; i=$((i+1)); done"))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_text().lines().count(), 20000);
    }

    #[test]
    fn runs_in_working_directory() {
        let temp = tempdir().expect("tempdir");
        let output = run(&sh("pwd").with_working_dir(temp.path())).unwrap();
        let reported = std::fs::canonicalize(output.stdout_text().trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn tool_command_prepends_configured_args() {
        let tool = ToolCommand::new("/usr/bin/python3").with_args(["scripts/gpx2html.py"]);
        let invocation = tool.invocation().arg("ride.gpx").arg("0");
        assert_eq!(invocation.to_string(), "/usr/bin/python3 scripts/gpx2html.py ride.gpx 0");
        assert_eq!(tool.tool_name(), "python3");
    }
}
