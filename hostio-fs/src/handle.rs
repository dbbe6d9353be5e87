//! Positioned file handles.
//!
//! A [`FileHandle`] owns one OS file and exposes `fopen`-style open modes,
//! seek/tell, reads and writes against the single shared file position, and
//! formatted writes. The handle is not synchronized; share it between threads
//! only behind a lock of the caller's choosing.
//!
//! # Example
//!
//! ```no_run
//! use hostio_format::FormatArg;
//! use hostio_fs::{FileHandle, SeekOrigin};
//!
//! let mut fh = FileHandle::open("test.txt", "w+").unwrap();
//! fh.fprintf("%s-%d\n", &["id".into(), FormatArg::Int(7)]).unwrap();
//! fh.fseek(-2, SeekOrigin::End).unwrap();
//! fh.rewind().unwrap();
//! let text = fh.read_text(1000).unwrap();
//! fh.close().unwrap();
//! ```

use hostio_core::{ExecContext, FileError, HostioError, Payload, Result};
use hostio_format::{sprintf, FormatArg};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// `fopen` mode strings and their POSIX meaning.
///
/// | mode | read | write | create | truncate | append |
/// |------|------|-------|--------|----------|--------|
/// | `r`  | yes  |       |        |          |        |
/// | `r+` | yes  | yes   |        |          |        |
/// | `w`  |      | yes   | yes    | yes      |        |
/// | `w+` | yes  | yes   | yes    | yes      |        |
/// | `a`  |      | yes   | yes    |          | yes    |
/// | `a+` | yes  | yes   | yes    |          | yes    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
    Write,
    WriteRead,
    Append,
    AppendRead,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::ReadWrite => "r+",
            OpenMode::Write => "w",
            OpenMode::WriteRead => "w+",
            OpenMode::Append => "a",
            OpenMode::AppendRead => "a+",
        }
    }

    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::WriteRead => options.read(true).write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
            OpenMode::AppendRead => options.read(true).append(true).create(true),
        };
        options
    }
}

impl FromStr for OpenMode {
    type Err = HostioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(OpenMode::Read),
            "r+" => Ok(OpenMode::ReadWrite),
            "w" => Ok(OpenMode::Write),
            "w+" => Ok(OpenMode::WriteRead),
            "a" => Ok(OpenMode::Append),
            "a+" => Ok(OpenMode::AppendRead),
            other => Err(FileError::InvalidMode(other.to_string()).into()),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

impl FromStr for SeekOrigin {
    type Err = HostioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SEEK_SET" | "SET" | "START" => Ok(SeekOrigin::Start),
            "SEEK_CUR" | "CUR" | "CURRENT" => Ok(SeekOrigin::Current),
            "SEEK_END" | "END" => Ok(SeekOrigin::End),
            _ => Err(FileError::Seek {
                offset: 0,
                origin: s.to_string(),
                reason: "unknown seek origin".to_string(),
            }
            .into()),
        }
    }
}

impl fmt::Display for SeekOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeekOrigin::Start => "SEEK_SET",
            SeekOrigin::Current => "SEEK_CUR",
            SeekOrigin::End => "SEEK_END",
        };
        f.write_str(name)
    }
}

/// An open file with a single shared position.
///
/// Dropping the handle closes the file; [`FileHandle::close`] does the same
/// explicitly and makes every later operation fail with [`FileError::Closed`].
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    mode: OpenMode,
    file: Option<File>,
}

impl FileHandle {
    /// Opens `path` with an `fopen` mode string (`r`, `r+`, `w`, `w+`, `a`, `a+`).
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        Self::open_with(path, mode.parse()?)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = mode.options().open(&path).map_err(|source| FileError::Open {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), mode = %mode, "Opened file handle");

        Ok(Self {
            path,
            mode,
            file: Some(file),
        })
    }

    /// Opens `path` relative to the context's working directory.
    pub fn open_in<P: AsRef<Path>>(ctx: &ExecContext, path: P, mode: &str) -> Result<Self> {
        Self::open(ctx.resolve(path), mode)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file(&mut self) -> Result<&mut File> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(FileError::Closed(self.path.clone()).into()),
        }
    }

    /// Moves the position and returns the new offset from the start.
    ///
    /// Negative offsets are only meaningful relative to the current position
    /// or the end; any target before byte 0 is rejected.
    pub fn fseek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        let seek_error = |reason: String| -> HostioError {
            FileError::Seek {
                offset,
                origin: origin.to_string(),
                reason,
            }
            .into()
        };

        let file = self.file()?;
        let base: i128 = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => file
                .stream_position()
                .map_err(|e| seek_error(e.to_string()))?
                .into(),
            SeekOrigin::End => file
                .metadata()
                .map_err(|e| seek_error(e.to_string()))?
                .len()
                .into(),
        };

        let target = base + i128::from(offset);
        if target < 0 {
            return Err(seek_error("position would be before the start of the file".to_string()));
        }

        let target = u64::try_from(target).map_err(|e| seek_error(e.to_string()))?;
        file.seek(SeekFrom::Start(target))
            .map_err(|e| seek_error(e.to_string()))
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.fseek(0, SeekOrigin::Start).map(|_| ())
    }

    pub fn ftell(&mut self) -> Result<u64> {
        let path = self.path.clone();
        self.file()?
            .stream_position()
            .map_err(|source| FileError::Read { path, source }.into())
    }

    /// Reads up to `max_len` bytes, as text when `as_text` is set.
    pub fn fread(&mut self, max_len: usize, as_text: bool) -> Result<Payload> {
        let bytes = self.read_bytes(max_len)?;
        if as_text {
            Ok(Payload::Text(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            Ok(Payload::Bytes(bytes))
        }
    }

    /// Reads up to `max_len` bytes; fewer at end of file.
    pub fn read_bytes(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let file = self.file()?;
        let mut buf = Vec::new();
        file.take(max_len as u64)
            .read_to_end(&mut buf)
            .map_err(|source| FileError::Read { path, source })?;
        Ok(buf)
    }

    pub fn read_text(&mut self, max_len: usize) -> Result<String> {
        let bytes = self.read_bytes(max_len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads one line, newline included, stopping early after `max_len`
    /// bytes. Returns `None` once the position is at end of file.
    ///
    /// Bytes past the newline are left unread, so the position stays where
    /// the line ended.
    pub fn fgets(&mut self, max_len: usize) -> Result<Option<String>> {
        let path = self.path.clone();
        let file = self.file()?;
        read_line_bounded(file, &path, max_len)
    }

    /// Writes `data`, or only its first `length` bytes, at the current position.
    ///
    /// Returns the number of bytes written. A device error part way through
    /// is reported with the count already written.
    pub fn fwrite<D: Into<Payload>>(&mut self, data: D, length: Option<usize>) -> Result<usize> {
        let data = data.into();
        let bytes = data.as_bytes();
        let requested = length.map_or(bytes.len(), |n| n.min(bytes.len()));

        let path = self.path.clone();
        let file = self.file()?;
        write_counted(file, &path, &bytes[..requested])
    }

    /// Formats `args` printf-style and writes the result at the current position.
    pub fn fprintf(&mut self, format: &str, args: &[FormatArg]) -> Result<usize> {
        let text = sprintf(format, args)?;
        self.fwrite(text, None)
    }

    pub fn fflush(&mut self) -> Result<()> {
        let path = self.path.clone();
        self.file()?.flush().map_err(|source| {
            FileError::Write {
                path,
                written: 0,
                requested: 0,
                source,
            }
            .into()
        })
    }

    /// Releases the descriptor. Later operations, including a second close, fail.
    pub fn close(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| FileError::Closed(self.path.clone()))?;
        file.flush().map_err(|source| FileError::Write {
            path: self.path.clone(),
            written: 0,
            requested: 0,
            source,
        })?;
        debug!(path = %self.path.display(), "Closed file handle");
        Ok(())
    }
}

/// Formats `args` and writes them to the file at `path` in one call,
/// appending when `append` is set and truncating otherwise.
pub fn fprintf_path<P: AsRef<Path>>(
    path: P,
    append: bool,
    format: &str,
    args: &[FormatArg],
) -> Result<usize> {
    let mode = if append { OpenMode::Append } else { OpenMode::Write };
    let mut fh = FileHandle::open_with(path, mode)?;
    let written = fh.fprintf(format, args)?;
    fh.close()?;
    Ok(written)
}

/// Writes all of `bytes`, reporting how much landed before an error.
pub(crate) fn write_counted<W: Write>(out: &mut W, path: &Path, bytes: &[u8]) -> Result<usize> {
    let requested = bytes.len();
    let mut written = 0;
    while written < requested {
        match out.write(&bytes[written..]) {
            Ok(0) => {
                return Err(FileError::Write {
                    path: path.to_path_buf(),
                    written,
                    requested,
                    source: ErrorKind::WriteZero.into(),
                }
                .into())
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                warn!(path = %path.display(), written, requested, "Short write");
                return Err(FileError::Write {
                    path: path.to_path_buf(),
                    written,
                    requested,
                    source,
                }
                .into());
            }
        }
    }
    Ok(written)
}

/// Reads byte by byte up to and including a newline, or `max_len` bytes.
pub(crate) fn read_line_bounded<R: Read>(
    input: &mut R,
    path: &Path,
    max_len: usize,
) -> Result<Option<String>> {
    let read_error = |source: std::io::Error| -> HostioError {
        FileError::Read {
            path: path.to_path_buf(),
            source,
        }
        .into()
    };
    if max_len == 0 {
        return Err(read_error(std::io::Error::new(
            ErrorKind::InvalidInput,
            "line length must be at least one byte",
        )));
    }

    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while line.len() < max_len {
        match input.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        }
    }

    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.file.is_some() {
            debug!(path = %self.path.display(), "File handle released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_positioned_overwrite_without_truncation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        let mut fh = FileHandle::open(&path, "w+").unwrap();
        fh.fprintf("abcdef", &[]).unwrap();
        fh.fprintf("ghijkl", &[]).unwrap();

        fh.rewind().unwrap();
        fh.fprintf("123", &[]).unwrap();

        fh.fseek(-3, SeekOrigin::End).unwrap();
        fh.fprintf("456", &[]).unwrap();

        fh.rewind().unwrap();
        let buf = fh.fread(1000, false).unwrap();
        assert_eq!(buf, Payload::Bytes(b"123defghi456".to_vec()));

        // the read left the position at end of file
        let out = "789abcdefghijklmnopqrstuvwxyz";
        assert_eq!(fh.fwrite(out, Some(3)).unwrap(), 3);

        fh.rewind().unwrap();
        let text = fh.fread(1000, true).unwrap();
        assert_eq!(text, Payload::Text("123defghi456789".to_string()));
        fh.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 15);
    }

    #[test]
    fn test_w_plus_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "previous contents").unwrap();

        let mut fh = FileHandle::open(&path, "w+").unwrap();
        assert_eq!(fh.read_text(100).unwrap(), "");
        assert_eq!(fh.mode(), OpenMode::WriteRead);
    }

    #[test]
    fn test_r_plus_preserves_and_requires_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.txt");
        assert!(FileHandle::open(&path, "r+").is_err());

        std::fs::write(&path, "hello world").unwrap();
        let mut fh = FileHandle::open(&path, "r+").unwrap();
        fh.fwrite("J", None).unwrap();
        fh.rewind().unwrap();
        assert_eq!(fh.read_text(100).unwrap(), "Jello world");
    }

    #[test]
    fn test_append_ignores_position_for_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "one\n").unwrap();

        let mut fh = FileHandle::open(&path, "a+").unwrap();
        fh.rewind().unwrap();
        fh.fwrite("two\n", None).unwrap();
        fh.rewind().unwrap();
        assert_eq!(fh.read_text(100).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_invalid_mode_and_missing_parent() {
        let dir = tempdir().unwrap();
        let err = FileHandle::open(dir.path().join("x"), "rw").unwrap_err();
        assert!(matches!(err, HostioError::File(FileError::InvalidMode(_))));

        let err = FileHandle::open(dir.path().join("missing/x"), "w").unwrap_err();
        assert!(matches!(err, HostioError::File(FileError::Open { .. })));
    }

    #[test]
    fn test_seek_rules() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seek.txt");
        std::fs::write(&path, "0123456789").unwrap();

        let mut fh = FileHandle::open(&path, "r").unwrap();
        assert!(fh.fseek(-1, SeekOrigin::Start).is_err());
        assert!(fh.fseek(-11, SeekOrigin::End).is_err());

        assert_eq!(fh.fseek(4, SeekOrigin::Start).unwrap(), 4);
        assert_eq!(fh.fseek(-2, SeekOrigin::Current).unwrap(), 2);
        assert_eq!(fh.read_text(3).unwrap(), "234");
        assert_eq!(fh.ftell().unwrap(), 5);
        assert_eq!(fh.fseek(-1, SeekOrigin::End).unwrap(), 9);
        assert_eq!(fh.read_text(100).unwrap(), "9");
        assert_eq!(fh.read_text(100).unwrap(), "");
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = tempdir().unwrap();
        let mut fh = FileHandle::open(dir.path().join("c.txt"), "w").unwrap();
        fh.close().unwrap();
        assert!(!fh.is_open());

        for err in [
            fh.fwrite("x", None).unwrap_err(),
            fh.rewind().unwrap_err(),
            fh.read_bytes(1).unwrap_err(),
            fh.close().unwrap_err(),
        ] {
            assert!(matches!(err, HostioError::File(FileError::Closed(_))));
        }
    }

    #[test]
    fn test_fwrite_bytes_with_length_larger_than_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.bin");
        let mut fh = FileHandle::open(&path, "w").unwrap();
        assert_eq!(fh.fwrite(vec![1u8, 2, 3], Some(10)).unwrap(), 3);
        drop(fh);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_fgets_reads_one_line_at_a_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "first\nsecond line\nlast").unwrap();

        let mut fh = FileHandle::open(&path, "r").unwrap();
        assert_eq!(fh.fgets(100).unwrap().as_deref(), Some("first\n"));
        assert_eq!(fh.ftell().unwrap(), 6);
        assert_eq!(fh.fgets(6).unwrap().as_deref(), Some("second"));
        assert_eq!(fh.fgets(100).unwrap().as_deref(), Some(" line\n"));
        assert_eq!(fh.fgets(100).unwrap().as_deref(), Some("last"));
        assert_eq!(fh.fgets(100).unwrap(), None);

        let err = fh.fgets(0).unwrap_err();
        assert!(matches!(err, HostioError::File(FileError::Read { .. })));
        fh.close().unwrap();
        assert!(matches!(
            fh.fgets(10).unwrap_err(),
            HostioError::File(FileError::Closed(_))
        ));
    }

    #[test]
    fn test_fprintf_to_path_truncates_or_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, "stale contents\n").unwrap();

        assert_eq!(
            fprintf_path(&path, false, "%s=%d\n", &["a".into(), FormatArg::Int(1)]).unwrap(),
            4
        );
        fprintf_path(&path, true, "%s=%d\n", &["b".into(), FormatArg::Int(2)]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a=1\nb=2\n");

        let err = fprintf_path(dir.path().join("no/such/dir"), true, "x", &[]).unwrap_err();
        assert!(matches!(err, HostioError::File(FileError::Open { .. })));
    }

    struct TrickleWriter {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::other("disk full"));
            }
            let n = buf.len().min(2).min(self.budget);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_counted_reports_partial_progress() {
        let mut out = TrickleWriter {
            accepted: Vec::new(),
            budget: 5,
        };
        let err = write_counted(&mut out, Path::new("dev"), b"abcdefgh").unwrap_err();
        match err {
            HostioError::File(FileError::Write {
                written, requested, ..
            }) => {
                assert_eq!(written, 5);
                assert_eq!(requested, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(out.accepted, b"abcde");
    }

    #[test]
    fn test_parse_seek_origin() {
        assert_eq!("seek_end".parse::<SeekOrigin>().unwrap(), SeekOrigin::End);
        assert_eq!("SEEK_CUR".parse::<SeekOrigin>().unwrap(), SeekOrigin::Current);
        assert!("SEEK_MIDDLE".parse::<SeekOrigin>().is_err());
    }
}
