use hostio_core::{FileError, Payload, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use crate::codec::decode_window;

/// A resolved byte range of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub len: u64,
}

/// Resolves an `(offset, length)` pair against a file of `size` bytes.
///
/// A negative `offset` counts back from the end. A positive `length` is
/// clamped to the end of the file; zero or a negative `length` ends the
/// window that many bytes before the end. Returns `None` when the window
/// starts outside the file or would be empty.
pub fn resolve_window(size: u64, offset: i64, length: i64) -> Option<Window> {
    let size = i128::from(size);
    let offset = i128::from(offset);
    let length = i128::from(length);

    let start = if offset < 0 { size + offset } else { offset };
    if start < 0 || start > size {
        return None;
    }

    let end = if length <= 0 {
        size + length
    } else {
        (start + length).min(size)
    };
    if end <= start {
        return None;
    }

    Some(Window {
        start: u64::try_from(start).ok()?,
        len: u64::try_from(end - start).ok()?,
    })
}

/// Options for [`read_file_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    pub offset: i64,
    /// 0 reads to the end of the file
    pub length: i64,
    pub as_text: bool,
}

/// Reads the window `(offset, length)` of the file at `path` as raw bytes.
///
/// Windows that fall outside the file fail with [`FileError::InvalidWindow`].
pub fn read_file<P: AsRef<Path>>(path: P, offset: i64, length: i64) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let open_error = |source| FileError::Open {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(open_error)?;
    let size = file.metadata().map_err(open_error)?.len();

    let window = resolve_window(size, offset, length).ok_or_else(|| FileError::InvalidWindow {
        path: path.to_path_buf(),
        offset,
        length,
        size,
    })?;

    debug!(
        path = %path.display(),
        start = window.start,
        len = window.len,
        "Reading file window"
    );

    let read_error = |source| FileError::Read {
        path: path.to_path_buf(),
        source,
    };
    file.seek(SeekFrom::Start(window.start)).map_err(read_error)?;

    let mut buf = Vec::with_capacity(window.len as usize);
    file.take(window.len).read_to_end(&mut buf).map_err(read_error)?;
    Ok(buf)
}

/// Like [`read_file`], decoded as UTF-8 with partial characters at either
/// edge of the window dropped.
pub fn read_file_text<P: AsRef<Path>>(path: P, offset: i64, length: i64) -> Result<String> {
    let bytes = read_file(path, offset, length)?;
    Ok(decode_window(&bytes))
}

pub fn read_file_with<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Payload> {
    if options.as_text {
        read_file_text(path, options.offset, options.length).map(Payload::Text)
    } else {
        read_file(path, options.offset, options.length).map(Payload::Bytes)
    }
}
