use crate::grammar::{FormatParser, Rule};
use hostio_core::{HostioError, Result};
use pest::Parser;

/// One piece of a parsed format string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Percent,
    Directive(Directive),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Fixed(usize),
    /// Taken from the next argument (`*`)
    FromArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Signed,
    Unsigned,
    Octal,
    HexLower,
    HexUpper,
    Fixed { upper: bool },
    Exponent { upper: bool },
    Str,
    Char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub left: bool,
    pub plus: bool,
    pub space: bool,
    pub zero: bool,
    pub alternate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
    pub flags: Flags,
    pub width: Option<Count>,
    pub precision: Option<Count>,
    pub conversion: Conversion,
}

/// Parse a printf-style format string into segments
pub fn parse_format(input: &str) -> Result<Vec<Segment>> {
    let mut pairs = FormatParser::parse(Rule::format, input)
        .map_err(|e| HostioError::Format(format!("invalid format string: {}", e)))?;

    let format_pair = pairs
        .next()
        .ok_or_else(|| HostioError::Format("empty parse result".to_string()))?;

    let mut segments = Vec::new();
    for inner_pair in format_pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::literal => segments.push(Segment::Literal(inner_pair.as_str().to_string())),
            Rule::escape => segments.push(Segment::Percent),
            Rule::directive => segments.push(Segment::Directive(parse_directive(inner_pair)?)),
            _ => {}
        }
    }

    Ok(segments)
}

fn parse_directive(pair: pest::iterators::Pair<Rule>) -> Result<Directive> {
    let mut flags = Flags::default();
    let mut width = None;
    let mut precision = None;
    let mut conversion = None;

    for inner_pair in pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::flags => flags = parse_flags(inner_pair),
            Rule::width => width = parse_count(inner_pair)?,
            Rule::precision => {
                // A bare "." means a precision of zero
                precision = Some(parse_count(inner_pair)?.unwrap_or(Count::Fixed(0)));
            }
            Rule::conversion => conversion = Some(parse_conversion(inner_pair.as_str())?),
            _ => {}
        }
    }

    let conversion = conversion
        .ok_or_else(|| HostioError::Format("directive without a conversion".to_string()))?;

    Ok(Directive {
        flags,
        width,
        precision,
        conversion,
    })
}

fn parse_flags(pair: pest::iterators::Pair<Rule>) -> Flags {
    let mut flags = Flags::default();
    for flag in pair.as_str().chars() {
        match flag {
            '-' => flags.left = true,
            '+' => flags.plus = true,
            ' ' => flags.space = true,
            '0' => flags.zero = true,
            '#' => flags.alternate = true,
            _ => {}
        }
    }
    flags
}

fn parse_count(pair: pest::iterators::Pair<Rule>) -> Result<Option<Count>> {
    for inner_pair in pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::star => return Ok(Some(Count::FromArg)),
            Rule::number => {
                let n = inner_pair.as_str().parse::<usize>().map_err(|e| {
                    HostioError::Format(format!("bad count '{}': {}", inner_pair.as_str(), e))
                })?;
                return Ok(Some(Count::Fixed(n)));
            }
            _ => {}
        }
    }
    Ok(None)
}

fn parse_conversion(s: &str) -> Result<Conversion> {
    Ok(match s {
        "d" | "i" => Conversion::Signed,
        "u" => Conversion::Unsigned,
        "o" => Conversion::Octal,
        "x" => Conversion::HexLower,
        "X" => Conversion::HexUpper,
        "f" => Conversion::Fixed { upper: false },
        "F" => Conversion::Fixed { upper: true },
        "e" => Conversion::Exponent { upper: false },
        "E" => Conversion::Exponent { upper: true },
        "s" => Conversion::Str,
        "c" => Conversion::Char,
        other => {
            return Err(HostioError::Format(format!(
                "unsupported conversion '%{}'",
                other
            )))
        }
    })
}
