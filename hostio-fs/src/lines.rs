use hostio_core::{FileError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Iterates over the lines of a file with the trailing `\n` (and `\r\n`)
/// removed. Invalid UTF-8 is replaced rather than rejected.
pub struct LineReader {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| FileError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
        })
    }

    pub fn with_capacity<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let mut reader = Self::open(path)?;
        let file = reader.reader.into_inner();
        reader.reader = BufReader::with_capacity(capacity, file);
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for LineReader {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(source) => Some(Err(FileError::Read {
                path: self.path.clone(),
                source,
            }
            .into())),
        }
    }
}

/// Reads every line of a file
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    LineReader::open(path)?.collect()
}
