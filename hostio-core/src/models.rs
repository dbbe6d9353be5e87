use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{HostioError, Result};

/// Text or raw bytes, as accepted by writes and stdin and returned by reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Bytes(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(s) => s.into_bytes(),
            Payload::Bytes(b) => b,
        }
    }

    /// Text view; invalid UTF-8 in a byte payload is replaced.
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(s) => Cow::Borrowed(s.as_str()),
            Payload::Bytes(b) => String::from_utf8_lossy(b),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Text(String::new())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Payload::Bytes(b.to_vec())
    }
}

/// How captured stdout/stderr are returned
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Capture {
    #[default]
    Text,
    Bytes,
}

/// Ambient state a launch or file operation runs against.
///
/// Threaded explicitly through every call instead of relying on the
/// process-wide working directory, so concurrent callers can use different
/// directories and shells.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecContext {
    pub cwd: PathBuf,
    pub shell: PathBuf,
}

impl ExecContext {
    pub fn new<P: AsRef<Path>>(cwd: P) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            shell: default_shell(),
        }
    }

    /// Snapshot of the current process: working directory and `$SHELL`.
    pub fn from_env() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::new(cwd))
    }

    pub fn with_shell<P: AsRef<Path>>(mut self, shell: P) -> Self {
        self.shell = shell.as_ref().to_path_buf();
        self
    }

    /// Resolves `path` against the context directory unless it is absolute.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

fn default_shell() -> PathBuf {
    match std::env::var("SHELL") {
        Ok(shell) if !shell.trim().is_empty() => PathBuf::from(shell),
        _ => PathBuf::from("/bin/sh"),
    }
}

/// Options shared by `exec`, `shell` and raw launches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ExecOptions {
    /// Variables added to (or, with `replace_env`, replacing) the parent environment
    pub env: BTreeMap<String, String>,
    pub replace_env: bool,
    /// Working directory; relative paths resolve against the context
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Payload>,
    /// Wall-clock deadline from spawn. Ignored for background launches.
    pub timeout_ms: Option<u64>,
    pub background: bool,
    /// Signal sent to the process group on timeout; SIGTERM when unset
    pub kill_signal: Option<i32>,
    pub capture: Capture,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn replace_env(mut self, replace: bool) -> Self {
        self.replace_env = replace;
        self
    }

    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin<D: Into<Payload>>(mut self, data: D) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn kill_signal(mut self, signal: i32) -> Self {
        self.kill_signal = Some(signal);
        self
    }

    pub fn capture(mut self, capture: Capture) -> Self {
        self.capture = capture;
        self
    }
}

/// A single process launch. Built per call, never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    /// Executable; bare names are looked up on PATH
    pub path: String,
    /// Full argument vector, `args[0]` being the display name
    pub args: Vec<String>,
    #[serde(flatten)]
    pub options: ExecOptions,
}

impl ExecutionRequest {
    pub fn new<S: Into<String>>(path: S) -> Self {
        let path = path.into();
        Self {
            args: vec![path.clone()],
            path,
            options: ExecOptions::default(),
        }
    }

    /// Replaces the whole argument vector, including `argv[0]`.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of a synchronous launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub pid: u32,
    pub stdout: Payload,
    pub stderr: Payload,
    /// Exit code; `None` when the child was ended by a signal
    pub status: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    pub fn stdout_text(&self) -> Cow<'_, str> {
        self.stdout.to_text_lossy()
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        self.stderr.to_text_lossy()
    }

    /// Turns a non-zero exit into [`HostioError::ProcessRuntime`].
    ///
    /// Timed-out runs are returned unchanged; callers check `timed_out`.
    pub fn check(self) -> Result<Self> {
        match self.status {
            Some(status) if status != 0 && !self.timed_out => Err(HostioError::ProcessRuntime {
                pid: self.pid,
                status,
                stderr: self.stderr_text().into_owned(),
            }),
            _ => Ok(self),
        }
    }
}

/// A process left running by a background launch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// What a launch produced, depending on `background`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Spawned {
    Completed(ExecutionResult),
    Background(ProcessHandle),
}

impl Spawned {
    pub fn pid(&self) -> u32 {
        match self {
            Spawned::Completed(result) => result.pid,
            Spawned::Background(handle) => handle.pid,
        }
    }

    pub fn into_result(self) -> Option<ExecutionResult> {
        match self {
            Spawned::Completed(result) => Some(result),
            Spawned::Background(_) => None,
        }
    }

    pub fn into_handle(self) -> Option<ProcessHandle> {
        match self {
            Spawned::Completed(_) => None,
            Spawned::Background(handle) => Some(handle),
        }
    }
}
