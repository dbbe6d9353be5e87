use crate::process::{
    build_command, exit_parts, signal_pid, terminate_group, terminate_orphaned_group, to_signal,
};
use chrono::Utc;
use hostio_core::{
    Capture, ExecConfig, ExecContext, ExecOptions, ExecutionRequest, ExecutionResult, HostioError,
    Payload, ProcessHandle, Result, Spawned,
};
use nix::sys::signal::Signal;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long `kill` waits for the signalled child to be reaped
const KILL_SETTLE: Duration = Duration::from_millis(50);
const KILL_POLL: Duration = Duration::from_millis(5);

/// Launches child processes and collects their output.
#[derive(Clone)]
pub struct ProcessLauncher {
    ctx: ExecContext,
    config: ExecConfig,
}

impl ProcessLauncher {
    pub fn new(ctx: ExecContext, config: ExecConfig) -> Self {
        Self { ctx, config }
    }

    /// Launcher for the current directory and `$SHELL` with default settings
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ExecContext::from_env()?, ExecConfig::default()))
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Run `program` with `args`, `argv[0]` being the program name itself.
    pub async fn exec<I, S>(&self, program: &str, args: I, options: ExecOptions) -> Result<Spawned>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = ExecutionRequest::new(program).options(options);
        request.args.extend(args.into_iter().map(Into::into));
        self.spawn(request).await
    }

    /// Launch a request.
    ///
    /// Synchronous requests resolve once the child exits or its timeout
    /// fires; background requests resolve as soon as the child is running.
    /// Failing to start the child is an error, a non-zero exit is not.
    pub async fn spawn(&self, mut request: ExecutionRequest) -> Result<Spawned> {
        request.options = self
            .config
            .apply_defaults(std::mem::take(&mut request.options));

        if request.options.background {
            self.spawn_background(request).map(Spawned::Background)
        } else {
            self.run(request).await.map(Spawned::Completed)
        }
    }

    fn spawn_background(&self, request: ExecutionRequest) -> Result<ProcessHandle> {
        let mut cmd = build_command(&self.ctx, &request)?;
        let mut child = cmd.spawn().map_err(|e| HostioError::ProcessSpawn {
            program: request.path.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id().unwrap_or_default();

        info!(pid, program = %request.path, "Started background process");

        let writer = spawn_stdin_writer(child.stdin.take(), request.options.stdin);

        // Reap the child so a later `kill` sees it gone rather than a zombie
        tokio::spawn(async move {
            let status = child.wait().await;
            if let Some(writer) = writer {
                writer.abort();
            }
            match status {
                Ok(status) => debug!(pid, ?status, "Background process exited"),
                Err(e) => warn!(pid, "Failed waiting for background process: {}", e),
            }
        });

        Ok(ProcessHandle { pid })
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start_instant = Instant::now();
        let options = &request.options;

        let kill_signal = to_signal(options.kill_signal.unwrap_or(Signal::SIGTERM as i32))?;
        let grace = self.config.grace();

        let mut cmd = build_command(&self.ctx, &request)?;
        let mut child = cmd.spawn().map_err(|e| HostioError::ProcessSpawn {
            program: request.path.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id().unwrap_or_default();

        info!(
            execution_id = %execution_id,
            pid,
            program = %request.path,
            "Started process"
        );

        let writer = spawn_stdin_writer(child.stdin.take(), options.stdin.clone());
        let mut stdout = OutputCollector::start(child.stdout.take());
        let mut stderr = OutputCollector::start(child.stderr.take());

        // The deadline counts from spawn and covers draining the pipes too
        let deadline = options
            .timeout_ms
            .map(|ms| (ms, time::Instant::now() + Duration::from_millis(ms)));

        let (status, mut timed_out) = match deadline {
            Some((ms, deadline)) => match time::timeout_at(deadline, child.wait()).await {
                Ok(status) => (status?, false),
                Err(_elapsed) => {
                    warn!(
                        execution_id = %execution_id,
                        pid,
                        timeout_ms = ms,
                        "Process timed out, terminating its group"
                    );
                    (terminate_group(&mut child, pid, kill_signal, grace).await?, true)
                }
            },
            None => (child.wait().await?, false),
        };

        if let Some(writer) = writer {
            writer.abort();
        }

        if let (Some((ms, deadline)), false) = (deadline, timed_out) {
            // Descendants of an exited child can keep the pipes open
            let stdout_done = stdout.drained_by(deadline).await?;
            let stderr_done = stderr.drained_by(deadline).await?;
            if !(stdout_done && stderr_done) {
                warn!(
                    execution_id = %execution_id,
                    pid,
                    timeout_ms = ms,
                    "Output still open at the deadline, terminating the group"
                );
                terminate_orphaned_group(pid, kill_signal, grace).await?;
                timed_out = true;
            }
        }

        let drain_limit = timed_out.then_some(grace);
        let stdout = stdout.finish(drain_limit).await?;
        let stderr = stderr.finish(drain_limit).await?;

        let (code, signal) = exit_parts(status);
        let completed_at = Utc::now();
        let duration_ms = start_instant.elapsed().as_millis() as u64;

        info!(
            execution_id = %execution_id,
            pid,
            status = ?code,
            signal = ?signal,
            timed_out,
            duration_ms,
            "Process completed"
        );

        Ok(ExecutionResult {
            execution_id,
            pid,
            stdout: into_payload(stdout, options.capture),
            stderr: into_payload(stderr, options.capture),
            status: code,
            signal,
            timed_out,
            duration_ms,
            started_at,
            completed_at,
        })
    }

    /// Signal a process, `SIGTERM` when `signal` is `None`. Signal 0 only
    /// checks that the process is alive.
    ///
    /// Returns `false` when the process is already gone or cannot be
    /// signalled. Never fails.
    pub async fn kill(&self, pid: u32, signal: Option<i32>) -> bool {
        let signal = match signal {
            Some(0) => None,
            Some(n) => match to_signal(n) {
                Ok(sig) => Some(sig),
                Err(e) => {
                    warn!(pid, "Not sending signal: {}", e);
                    return false;
                }
            },
            None => Some(Signal::SIGTERM),
        };

        let delivered = match signal_pid(pid, signal) {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(pid, "Failed to signal process: {}", e);
                return false;
            }
        };
        debug!(pid, ?signal, delivered, "Signal sent");

        if delivered && signal.is_some() {
            settle(pid).await;
        }
        delivered
    }
}

/// Gives a reaper task the chance to collect a just-signalled child.
async fn settle(pid: u32) {
    let deadline = Instant::now() + KILL_SETTLE;
    while Instant::now() < deadline {
        match signal_pid(pid, None) {
            Ok(true) => time::sleep(KILL_POLL).await,
            _ => return,
        }
    }
}

fn spawn_stdin_writer(stdin: Option<ChildStdin>, data: Option<Payload>) -> Option<JoinHandle<()>> {
    let (mut stdin, data) = (stdin?, data?);
    Some(tokio::spawn(async move {
        if let Err(e) = stdin.write_all(data.as_bytes()).await {
            // The child may exit without reading its input
            debug!("stdin write stopped: {}", e);
        }
        // Dropping the pipe delivers EOF
        drop(stdin);
    }))
}

/// Drains one output pipe in the background into a shared buffer, so
/// whatever arrived is still available if draining is cut short.
struct OutputCollector {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl OutputCollector {
    fn start<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = reader.map(|reader| tokio::spawn(read_into(reader, Arc::clone(&buf))));
        Self { buf, task }
    }

    /// Waits for end of file until `deadline`. Returns `false` when the
    /// deadline passed first; the reader keeps running.
    async fn drained_by(&mut self, deadline: time::Instant) -> Result<bool> {
        let Some(task) = self.task.as_mut() else {
            return Ok(true);
        };
        match time::timeout_at(deadline, task).await {
            Ok(joined) => {
                self.task = None;
                flatten(joined)?;
                Ok(true)
            }
            Err(_elapsed) => Ok(false),
        }
    }

    async fn finish(self, limit: Option<Duration>) -> Result<Vec<u8>> {
        if let Some(mut task) = self.task {
            match limit {
                None => join_reader(task).await?,
                Some(limit) => match time::timeout(limit, &mut task).await {
                    Ok(joined) => flatten(joined)?,
                    Err(_elapsed) => {
                        debug!("Discarding output that arrived after the grace period");
                        task.abort();
                    }
                },
            }
        }

        let mut guard = self
            .buf
            .lock()
            .map_err(|_| HostioError::IoError(std::io::Error::other("output buffer poisoned")))?;
        Ok(std::mem::take(&mut *guard))
    }
}

async fn read_into<R>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0_u8; 8192];
    loop {
        let count = reader.read(&mut chunk).await?;
        if count == 0 {
            return Ok(());
        }
        buf.lock()
            .map_err(|_| std::io::Error::other("output buffer poisoned"))?
            .extend_from_slice(&chunk[..count]);
    }
}

async fn join_reader(task: JoinHandle<std::io::Result<()>>) -> Result<()> {
    flatten(task.await)
}

fn flatten(joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(HostioError::IoError(std::io::Error::other(format!(
            "output reader failed: {}",
            e
        )))),
    }
}

fn into_payload(bytes: Vec<u8>, capture: Capture) -> Payload {
    match capture {
        Capture::Text => Payload::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Capture::Bytes => Payload::Bytes(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn launcher() -> ProcessLauncher {
        ProcessLauncher::new(ExecContext::new("/"), ExecConfig::default())
    }

    fn completed(spawned: Spawned) -> ExecutionResult {
        spawned.into_result().expect("synchronous launch")
    }

    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let result = completed(
            launcher()
                .exec("echo", ["hello", "world"], ExecOptions::new())
                .await
                .unwrap(),
        );
        assert_eq!(result.stdout_text(), "hello world\n");
        assert_eq!(result.status, Some(0));
        assert!(result.success());
        assert!(!result.timed_out);
        assert!(result.pid > 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_long_sleep() {
        let start = Instant::now();
        let result = completed(
            launcher()
                .exec("sleep", ["10"], ExecOptions::new().timeout_ms(200))
                .await
                .unwrap(),
        );
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(result.timed_out);
        assert_eq!(result.status, None);
        assert_eq!(result.signal, Some(Signal::SIGTERM as i32));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_timeout_bounds_output_held_by_descendants() {
        let start = Instant::now();
        let result = completed(
            launcher()
                .exec("sh", ["-c", "sleep 3 & echo hi"], ExecOptions::new().timeout_ms(200))
                .await
                .unwrap(),
        );
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(result.timed_out);
        assert_eq!(result.stdout_text(), "hi\n");
        // the shell itself had already exited normally
        assert_eq!(result.status, Some(0));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_timeout_escalates_when_signal_is_ignored() {
        let config = ExecConfig {
            grace_ms: 100,
            ..ExecConfig::default()
        };
        let launcher = ProcessLauncher::new(ExecContext::new("/"), config);
        let start = Instant::now();
        let result = completed(
            launcher
                .exec(
                    "sh",
                    ["-c", "trap '' TERM; echo started; sleep 10"],
                    ExecOptions::new().timeout_ms(300),
                )
                .await
                .unwrap(),
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(result.timed_out);
        assert_eq!(result.signal, Some(Signal::SIGKILL as i32));
        assert_eq!(result.stdout_text(), "started\n");
    }

    #[tokio::test]
    async fn test_env_is_merged_with_parent() {
        std::env::set_var("HOSTIO_TEST_INHERITED", "parent");
        let result = completed(
            launcher()
                .exec("env", Vec::<String>::new(), ExecOptions::new().env("myvar", "myval"))
                .await
                .unwrap(),
        );
        let stdout = result.stdout_text();
        assert!(stdout.lines().any(|l| l == "myvar=myval"));
        assert!(stdout.lines().any(|l| l == "HOSTIO_TEST_INHERITED=parent"));
    }

    #[tokio::test]
    async fn test_env_replacement() {
        let result = completed(
            launcher()
                .exec(
                    "/usr/bin/env",
                    Vec::<String>::new(),
                    ExecOptions::new().env("ONLY", "this").replace_env(true),
                )
                .await
                .unwrap(),
        );
        assert_eq!(result.stdout_text(), "ONLY=this\n");
    }

    #[tokio::test]
    async fn test_stdin_is_written_then_closed() {
        let result = completed(
            launcher()
                .exec("cat", Vec::<String>::new(), ExecOptions::new().stdin("hello"))
                .await
                .unwrap(),
        );
        assert_eq!(result.stdout_text(), "hello");
    }

    #[tokio::test]
    async fn test_missing_stdin_is_empty() {
        let result = completed(
            launcher()
                .exec("cat", Vec::<String>::new(), ExecOptions::new().timeout_ms(2000))
                .await
                .unwrap(),
        );
        assert!(!result.timed_out);
        assert_eq!(result.stdout_text(), "");
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams() {
        // Enough to fill either pipe if they were read one after the other
        let script = "head -c 200000 /dev/zero; head -c 200000 /dev/zero >&2";
        let result = completed(
            launcher()
                .exec("sh", ["-c", script], ExecOptions::new().capture(Capture::Bytes))
                .await
                .unwrap(),
        );
        assert_eq!(result.stdout.len(), 200_000);
        assert_eq!(result.stderr.len(), 200_000);
        assert!(matches!(result.stdout, Payload::Bytes(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_data() {
        let result = completed(
            launcher()
                .exec("sh", ["-c", "echo oops >&2; exit 3"], ExecOptions::new())
                .await
                .unwrap(),
        );
        assert_eq!(result.status, Some(3));
        assert_eq!(result.stderr_text(), "oops\n");

        match result.check().unwrap_err() {
            HostioError::ProcessRuntime { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_argv0_is_display_only() {
        let request = ExecutionRequest::new("sh").args(["custom-name", "-c", "echo $0"]);
        let result = completed(launcher().spawn(request).await.unwrap());
        assert_eq!(result.stdout_text(), "custom-name\n");
    }

    #[tokio::test]
    async fn test_cwd_is_relative_to_context() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let launcher = ProcessLauncher::new(ExecContext::new(dir.path()), ExecConfig::default());

        let result = completed(
            launcher
                .exec("pwd", Vec::<String>::new(), ExecOptions::new().cwd("sub"))
                .await
                .unwrap(),
        );
        let reported = std::path::PathBuf::from(result.stdout_text().trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().join("sub").canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let err = launcher()
            .exec("no-such-program-hostio", Vec::<String>::new(), ExecOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HostioError::ProcessSpawn { .. }));
    }

    #[tokio::test]
    async fn test_background_kill_then_second_kill() {
        let launcher = launcher();
        let handle = launcher
            .exec("sleep", ["10"], ExecOptions::new().background(true))
            .await
            .unwrap()
            .into_handle()
            .expect("background launch");
        assert!(handle.pid > 0);
        assert!(launcher.kill(handle.pid, None).await);

        time::sleep(Duration::from_millis(200)).await;
        assert!(!launcher.kill(handle.pid, None).await);
    }

    #[tokio::test]
    async fn test_background_returns_immediately() {
        let launcher = launcher();
        let start = Instant::now();
        let spawned = launcher
            .exec(
                "sh",
                ["-c", "cat > /dev/null; sleep 10"],
                ExecOptions::new().background(true).stdin("ignored"),
            )
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        let pid = spawned.pid();
        assert!(launcher.kill(pid, Some(0)).await);
        assert!(launcher.kill(pid, Some(Signal::SIGKILL as i32)).await);
    }

    #[tokio::test]
    async fn test_kill_with_unknown_signal() {
        assert!(!launcher().kill(std::process::id(), Some(999)).await);
    }
}
