use hostio_core::{FileError, HostioError, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tempfile::{Builder, NamedTempFile};
use tracing::debug;

/// Copies `src` to `dest`, preserving the source's permission bits.
///
/// Writing through a link would silently change another name for the same
/// data, so the copy is refused when `dest` is a symbolic link, a hard link
/// with other names, or the very file being copied. An existing regular
/// `dest` is replaced only when `overwrite` is set.
///
/// The data is staged in a temporary file next to `dest` and renamed over
/// it, so `dest` is either fully replaced or left as it was. The rename
/// replaces the name itself and never follows a link created after the
/// checks.
///
/// Returns the number of bytes copied.
pub fn copy_file<S: AsRef<Path>, D: AsRef<Path>>(src: S, dest: D, overwrite: bool) -> Result<u64> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    let src_meta = fs::metadata(src).map_err(|source| FileError::Open {
        path: src.to_path_buf(),
        source,
    })?;
    if !src_meta.is_file() {
        return Err(FileError::Copy {
            dest: dest.to_path_buf(),
            reason: format!("source '{}' is not a regular file", src.display()),
        }
        .into());
    }

    match fs::symlink_metadata(dest) {
        Ok(dest_meta) => {
            check_link_conflict(dest, &src_meta, &dest_meta)?;
            if !overwrite {
                return Err(exists_error(dest));
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(FileError::Open {
                path: dest.to_path_buf(),
                source,
            }
            .into())
        }
    }

    debug!(src = %src.display(), dest = %dest.display(), "Copying file");

    let mut reader = File::open(src).map_err(|source| FileError::Open {
        path: src.to_path_buf(),
        source,
    })?;
    replace_from(&mut reader, dest, src_meta.mode() & 0o7777, src_meta.len(), overwrite)
}

fn exists_error(dest: &Path) -> HostioError {
    FileError::Copy {
        dest: dest.to_path_buf(),
        reason: "destination exists and overwrite was not requested".to_string(),
    }
    .into()
}

fn check_link_conflict(
    dest: &Path,
    src_meta: &fs::Metadata,
    dest_meta: &fs::Metadata,
) -> Result<()> {
    let conflict = |reason: &str| HostioError::LinkOverwriteConflict {
        dest: dest.to_path_buf(),
        reason: reason.to_string(),
    };

    if dest_meta.file_type().is_symlink() {
        return Err(conflict("destination is a symbolic link"));
    }
    if dest_meta.dev() == src_meta.dev() && dest_meta.ino() == src_meta.ino() {
        return Err(conflict("source and destination are the same file"));
    }
    if dest_meta.nlink() > 1 {
        return Err(conflict("destination has other hard links"));
    }
    Ok(())
}

/// Streams `reader` into a staging file beside `dest` and renames it into
/// place. On any error the staging file is dropped and `dest` is untouched.
fn replace_from<R: Read>(
    reader: &mut R,
    dest: &Path,
    mode: u32,
    expected_len: u64,
    overwrite: bool,
) -> Result<u64> {
    let copy_error = |reason: String| -> HostioError {
        FileError::Copy {
            dest: dest.to_path_buf(),
            reason,
        }
        .into()
    };

    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged: NamedTempFile = Builder::new()
        .prefix(".hostio-copy")
        .tempfile_in(dir)
        .map_err(|e| copy_error(format!("could not create staging file: {}", e)))?;

    let copied = io::copy(reader, staged.as_file_mut()).map_err(|e| copy_error(e.to_string()))?;
    if copied < expected_len {
        return Err(copy_error(format!(
            "short copy: {} of {} bytes",
            copied, expected_len
        )));
    }

    let file = staged.as_file();
    file.set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| copy_error(format!("could not set permissions: {}", e)))?;
    file.sync_all().map_err(|e| copy_error(e.to_string()))?;

    let persisted = if overwrite {
        staged.persist(dest)
    } else {
        staged.persist_noclobber(dest)
    };
    match persisted {
        Ok(_) => Ok(copied),
        Err(e) if !overwrite && e.error.kind() == io::ErrorKind::AlreadyExists => {
            Err(exists_error(dest))
        }
        Err(e) => Err(copy_error(format!("could not move copy into place: {}", e.error))),
    }
}
