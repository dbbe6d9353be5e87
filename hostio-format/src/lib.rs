//! printf-style formatting shared by `fprintf`, `sprintf` and the CLI.

mod grammar;
pub mod parser;
pub mod render;

pub use parser::{parse_format, Conversion, Count, Directive, Flags, Segment};
pub use render::{sprintf, FormatArg};
