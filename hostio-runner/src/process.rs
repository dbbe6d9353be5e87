// Command construction, executable lookup and signal delivery

use hostio_core::{ExecContext, ExecutionRequest, HostioError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time;
use tracing::debug;

const GROUP_POLL: Duration = Duration::from_millis(10);

/// Directory a request runs in: its own `cwd` resolved against the context.
pub fn working_dir(ctx: &ExecContext, request: &ExecutionRequest) -> PathBuf {
    match &request.options.cwd {
        Some(dir) => ctx.resolve(dir),
        None => ctx.cwd.clone(),
    }
}

/// PATH the child will see, honouring overrides and replacement.
fn child_path(request: &ExecutionRequest) -> Option<OsString> {
    match request.options.env.get("PATH") {
        Some(path) => Some(OsString::from(path)),
        None if request.options.replace_env => None,
        None => std::env::var_os("PATH"),
    }
}

/// Finds the executable for `request.path`.
///
/// Names containing a `/` are taken relative to `cwd`; bare names are
/// searched on the PATH the child would inherit.
pub fn resolve_program(request: &ExecutionRequest, cwd: &Path) -> Result<PathBuf> {
    let spawn_error = |reason: String| HostioError::ProcessSpawn {
        program: request.path.clone(),
        reason,
    };

    if request.path.is_empty() {
        return Err(spawn_error("empty program name".to_string()));
    }

    if request.path.contains('/') {
        let candidate = cwd.join(&request.path);
        return if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(spawn_error("no such file".to_string()))
        };
    }

    let search = child_path(request)
        .ok_or_else(|| spawn_error("PATH is not set for the child".to_string()))?;
    which::which_in(&request.path, Some(search), cwd)
        .map_err(|e| spawn_error(format!("not found on PATH: {}", e)))
}

/// Builds the command for a request. The child always leads its own
/// process group so a timeout can signal everything it started.
pub fn build_command(ctx: &ExecContext, request: &ExecutionRequest) -> Result<Command> {
    let cwd = working_dir(ctx, request);
    let program = resolve_program(request, &cwd)?;
    let options = &request.options;

    let mut cmd = Command::new(&program);
    match request.args.split_first() {
        Some((argv0, rest)) => {
            cmd.arg0(argv0);
            cmd.args(rest);
        }
        None => {
            cmd.arg0(&request.path);
        }
    }

    if options.replace_env {
        cmd.env_clear();
    }
    cmd.envs(&options.env);
    cmd.current_dir(&cwd);
    cmd.process_group(0);

    cmd.stdin(if options.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    if options.background {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    } else {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!(
        program = %program.display(),
        cwd = %cwd.display(),
        args = ?request.args,
        "Prepared command"
    );

    Ok(cmd)
}

pub fn to_signal(signal: i32) -> Result<Signal> {
    Signal::try_from(signal)
        .map_err(|_| HostioError::InvalidConfiguration(format!("unknown signal number {}", signal)))
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

/// Sends `signal` to a single process. `None` only checks the process exists.
///
/// Returns `false` when there is no such process.
pub fn signal_pid(pid: u32, signal: Option<Signal>) -> std::io::Result<bool> {
    let Some(target) = to_pid(pid) else {
        return Ok(false);
    };
    match signal::kill(target, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

/// Sends `signal` to the process group led by `pid`. `None` only checks
/// that some member of the group is still alive.
pub fn signal_group<S: Into<Option<Signal>>>(pid: u32, signal: S) -> std::io::Result<bool> {
    let Some(target) = to_pid(pid) else {
        return Ok(false);
    };
    match signal::killpg(target, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

pub async fn wait_for_exit(
    child: &mut Child,
    grace: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    match time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(Some(status?)),
        Err(_elapsed) => Ok(None),
    }
}

/// Stops a timed-out child: `signal` to its group, then `SIGKILL` once
/// `grace` has passed. Returns the reaped exit status.
pub async fn terminate_group(
    child: &mut Child,
    pid: u32,
    signal: Signal,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    if signal_group(pid, signal)? {
        if let Some(status) = wait_for_exit(child, grace).await? {
            return Ok(status);
        }
    }

    debug!(pid, "Escalating to SIGKILL");
    match signal_group(pid, Signal::SIGKILL) {
        Ok(_) => {}
        Err(_) => child.start_kill()?,
    }
    child.wait().await
}

/// Stops whatever is left of the group led by `pid` once the leader itself
/// has been reaped: `signal`, then `SIGKILL` if members survive `grace`.
pub async fn terminate_orphaned_group(
    pid: u32,
    signal: Signal,
    grace: Duration,
) -> std::io::Result<()> {
    if !signal_group(pid, signal)? {
        return Ok(());
    }

    let deadline = time::Instant::now() + grace;
    while time::Instant::now() < deadline {
        if !signal_group(pid, None)? {
            return Ok(());
        }
        time::sleep(GROUP_POLL).await;
    }

    debug!(pid, "Escalating to SIGKILL for remaining group members");
    signal_group(pid, Signal::SIGKILL).map(|_| ())
}

/// Splits an exit status into `(code, signal)`.
pub fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}
