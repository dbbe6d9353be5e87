//! Positioned file handles and whole-file helpers.

pub mod codec;
pub mod copy;
pub mod handle;
pub mod lines;
pub mod stream;
pub mod window;

pub use codec::{decode, decode_window, encode, Encoding};
pub use copy::copy_file;
pub use handle::{fprintf_path, FileHandle, OpenMode, SeekOrigin};
pub use lines::{read_lines, LineReader};
pub use stream::StdStream;
pub use window::{read_file, read_file_text, read_file_with, resolve_window, ReadOptions, Window};
