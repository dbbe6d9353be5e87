pub mod config;
pub mod error;
pub mod models;

pub use config::{Config, ExecConfig, FsConfig};
pub use error::{FileError, HostioError, Result};
pub use models::*;
