use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostioError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Could not launch '{program}': {reason}")]
    ProcessSpawn { program: String, reason: String },

    #[error("Process {pid} exited with status {status}")]
    ProcessRuntime { pid: u32, status: i32, stderr: String },

    #[error("Refusing to copy over link '{}': {reason}", .dest.display())]
    LinkOverwriteConflict { dest: PathBuf, reason: String },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failures of file handles and whole-file helpers.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("error opening '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid open mode '{0}'")]
    InvalidMode(String),

    #[error("file handle for '{}' was previously closed", .0.display())]
    Closed(PathBuf),

    #[error("invalid seek to offset {offset} from {origin}: {reason}")]
    Seek {
        offset: i64,
        origin: String,
        reason: String,
    },

    #[error("error reading '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error writing '{}' (wrote {written} of {requested} bytes): {source}", .path.display())]
    Write {
        path: PathBuf,
        written: usize,
        requested: usize,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "'{}': window offset {offset}, length {length} is outside a {size} byte file",
        .path.display()
    )]
    InvalidWindow {
        path: PathBuf,
        offset: i64,
        length: i64,
        size: u64,
    },

    #[error("copy of '{}' failed: {reason}", .dest.display())]
    Copy { dest: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, HostioError>;
