//! The process's own standard streams, driven with the same calls as a
//! [`FileHandle`](crate::FileHandle).

use crate::handle::{read_line_bounded, write_counted};
use hostio_core::{FileError, HostioError, Payload, Result};
use hostio_format::{sprintf, FormatArg};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn name(&self) -> &'static str {
        match self {
            StdStream::Stdin => "stdin",
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }

    // Error reports carry a path; streams use their name in angle brackets
    fn label(&self) -> &'static Path {
        Path::new(match self {
            StdStream::Stdin => "<stdin>",
            StdStream::Stdout => "<stdout>",
            StdStream::Stderr => "<stderr>",
        })
    }

    fn wrong_direction(&self, operation: &str) -> HostioError {
        FileError::InvalidMode(format!("{} on {}", operation, self.name())).into()
    }

    /// Writes `data`, or its first `length` bytes. Fails on stdin.
    pub fn fwrite<D: Into<Payload>>(&self, data: D, length: Option<usize>) -> Result<usize> {
        let data = data.into();
        let bytes = data.as_bytes();
        let requested = length.map_or(bytes.len(), |n| n.min(bytes.len()));
        let bytes = &bytes[..requested];

        match self {
            StdStream::Stdout => write_counted(&mut io::stdout().lock(), self.label(), bytes),
            StdStream::Stderr => write_counted(&mut io::stderr().lock(), self.label(), bytes),
            StdStream::Stdin => Err(self.wrong_direction("fwrite")),
        }
    }

    pub fn fprintf(&self, format: &str, args: &[FormatArg]) -> Result<usize> {
        let text = sprintf(format, args)?;
        self.fwrite(text, None)
    }

    /// Flushes buffered output. A no-op on stdin.
    pub fn fflush(&self) -> Result<()> {
        let flushed = match self {
            StdStream::Stdout => io::stdout().lock().flush(),
            StdStream::Stderr => io::stderr().lock().flush(),
            StdStream::Stdin => Ok(()),
        };
        flushed.map_err(|source| {
            FileError::Write {
                path: self.label().to_path_buf(),
                written: 0,
                requested: 0,
                source,
            }
            .into()
        })
    }

    /// Reads up to `max_len` bytes from stdin, as text when `as_text` is set.
    pub fn fread(&self, max_len: usize, as_text: bool) -> Result<Payload> {
        if *self != StdStream::Stdin {
            return Err(self.wrong_direction("fread"));
        }
        let mut buf = Vec::new();
        io::stdin()
            .lock()
            .take(max_len as u64)
            .read_to_end(&mut buf)
            .map_err(|source| FileError::Read {
                path: self.label().to_path_buf(),
                source,
            })?;
        if as_text {
            Ok(Payload::Text(String::from_utf8_lossy(&buf).into_owned()))
        } else {
            Ok(Payload::Bytes(buf))
        }
    }

    /// Reads one line from stdin, as [`FileHandle::fgets`](crate::FileHandle::fgets).
    pub fn fgets(&self, max_len: usize) -> Result<Option<String>> {
        if *self != StdStream::Stdin {
            return Err(self.wrong_direction("fgets"));
        }
        read_line_bounded(&mut io::stdin().lock(), self.label(), max_len)
    }
}

impl FromStr for StdStream {
    type Err = HostioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdin" => Ok(StdStream::Stdin),
            "stdout" => Ok(StdStream::Stdout),
            "stderr" => Ok(StdStream::Stderr),
            other => Err(FileError::InvalidMode(format!(
                "unknown stream '{}', expected stdin, stdout or stderr",
                other
            ))
            .into()),
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
