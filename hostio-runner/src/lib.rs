pub mod executor;
pub mod process;
pub mod shell;

pub use executor::ProcessLauncher;
pub use shell::ShellRunner;
