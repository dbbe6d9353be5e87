use crate::executor::ProcessLauncher;
use hostio_core::{ExecOptions, ExecutionRequest, Result, Spawned};
use std::path::Path;

/// Runs command lines through the context's shell as `shell -c command`.
///
/// The command string is handed to the shell verbatim. Quoting and escaping
/// are the caller's responsibility, so never build it from untrusted input.
#[derive(Clone)]
pub struct ShellRunner {
    launcher: ProcessLauncher,
}

impl ShellRunner {
    pub fn new(launcher: ProcessLauncher) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &ProcessLauncher {
        &self.launcher
    }

    /// The request `shell` would launch for `command`.
    pub fn request(&self, command: &str, options: ExecOptions) -> ExecutionRequest {
        let shell = &self.launcher.context().shell;
        let name = shell_name(shell);
        ExecutionRequest::new(shell.to_string_lossy())
            .args([name.as_str(), "-c", command])
            .options(options)
    }

    pub async fn shell(&self, command: &str, options: ExecOptions) -> Result<Spawned> {
        self.launcher.spawn(self.request(command, options)).await
    }
}

fn shell_name(shell: &Path) -> String {
    shell
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shell.to_string_lossy().into_owned())
}
