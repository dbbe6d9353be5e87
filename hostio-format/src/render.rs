use crate::parser::{parse_format, Conversion, Count, Directive, Segment};
use hostio_core::{HostioError, Result};

/// A value consumed by a format directive
#[derive(Debug, Clone, PartialEq)]
pub enum FormatArg {
    Str(String),
    Int(i64),
    Float(f64),
    Char(char),
    Bytes(Vec<u8>),
}

impl From<&str> for FormatArg {
    fn from(s: &str) -> Self {
        FormatArg::Str(s.to_string())
    }
}

impl From<String> for FormatArg {
    fn from(s: String) -> Self {
        FormatArg::Str(s)
    }
}

impl From<i64> for FormatArg {
    fn from(n: i64) -> Self {
        FormatArg::Int(n)
    }
}

impl From<i32> for FormatArg {
    fn from(n: i32) -> Self {
        FormatArg::Int(n.into())
    }
}

impl From<u32> for FormatArg {
    fn from(n: u32) -> Self {
        FormatArg::Int(n.into())
    }
}

impl From<f64> for FormatArg {
    fn from(n: f64) -> Self {
        FormatArg::Float(n)
    }
}

impl From<char> for FormatArg {
    fn from(c: char) -> Self {
        FormatArg::Char(c)
    }
}

impl From<Vec<u8>> for FormatArg {
    fn from(b: Vec<u8>) -> Self {
        FormatArg::Bytes(b)
    }
}

impl FormatArg {
    /// Best-effort typing of a command-line word: integer, float, or string.
    pub fn infer(word: &str) -> Self {
        if let Ok(n) = word.parse::<i64>() {
            FormatArg::Int(n)
        } else if let Some(f) = word
            .parse::<f64>()
            .ok()
            .filter(|_| word.bytes().any(|b| b.is_ascii_digit()))
        {
            FormatArg::Float(f)
        } else {
            FormatArg::Str(word.to_string())
        }
    }

    fn display(&self) -> String {
        match self {
            FormatArg::Str(s) => s.clone(),
            FormatArg::Int(n) => n.to_string(),
            FormatArg::Float(f) => f.to_string(),
            FormatArg::Char(c) => c.to_string(),
            FormatArg::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// Format `args` according to `format`.
pub fn sprintf(format: &str, args: &[FormatArg]) -> Result<String> {
    let segments = parse_format(format)?;
    let mut args = Args { args, next: 0 };
    let mut out = String::with_capacity(format.len());

    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Percent => out.push('%'),
            Segment::Directive(directive) => render_directive(&mut out, directive, &mut args)?,
        }
    }

    Ok(out)
}

struct Args<'a> {
    args: &'a [FormatArg],
    next: usize,
}

impl<'a> Args<'a> {
    fn take(&mut self) -> Result<&'a FormatArg> {
        let arg = self.args.get(self.next).ok_or_else(|| {
            HostioError::Format(format!("missing argument {} for format string", self.next + 1))
        })?;
        self.next += 1;
        Ok(arg)
    }

    fn take_int(&mut self) -> Result<i64> {
        let position = self.next + 1;
        match self.take()? {
            FormatArg::Int(n) => Ok(*n),
            FormatArg::Float(f) => Ok(*f as i64),
            FormatArg::Char(c) => Ok(*c as i64),
            other => Err(HostioError::Format(format!(
                "number required in format string argument {}, got {:?}",
                position, other
            ))),
        }
    }

    fn take_float(&mut self) -> Result<f64> {
        let position = self.next + 1;
        match self.take()? {
            FormatArg::Int(n) => Ok(*n as f64),
            FormatArg::Float(f) => Ok(*f),
            other => Err(HostioError::Format(format!(
                "number required in format string argument {}, got {:?}",
                position, other
            ))),
        }
    }
}

fn render_directive(out: &mut String, directive: &Directive, args: &mut Args) -> Result<()> {
    let mut flags = directive.flags;

    let width = match directive.width {
        Some(Count::Fixed(n)) => n,
        Some(Count::FromArg) => {
            let n = args.take_int()?;
            // negative star width means left-justify
            if n < 0 {
                flags.left = true;
            }
            n.unsigned_abs() as usize
        }
        None => 0,
    };

    let precision = match directive.precision {
        Some(Count::Fixed(n)) => Some(n),
        Some(Count::FromArg) => {
            let n = args.take_int()?;
            if n < 0 {
                None
            } else {
                Some(n as usize)
            }
        }
        None => None,
    };

    let (sign, body) = match directive.conversion {
        Conversion::Signed => {
            let n = args.take_int()?;
            let sign = if n < 0 {
                "-"
            } else if flags.plus {
                "+"
            } else if flags.space {
                " "
            } else {
                ""
            };
            (sign, with_min_digits(n.unsigned_abs().to_string(), precision))
        }
        Conversion::Unsigned => {
            let n = args.take_int()? as u64;
            ("", with_min_digits(n.to_string(), precision))
        }
        Conversion::Octal => {
            let n = args.take_int()? as u64;
            let mut digits = with_min_digits(format!("{:o}", n), precision);
            if flags.alternate && !digits.starts_with('0') {
                digits.insert(0, '0');
            }
            ("", digits)
        }
        Conversion::HexLower | Conversion::HexUpper => {
            let n = args.take_int()? as u64;
            let upper = directive.conversion == Conversion::HexUpper;
            let digits = if upper {
                format!("{:X}", n)
            } else {
                format!("{:x}", n)
            };
            let mut digits = with_min_digits(digits, precision);
            if flags.alternate && n != 0 {
                digits.insert_str(0, if upper { "0X" } else { "0x" });
            }
            ("", digits)
        }
        Conversion::Fixed { upper } => {
            let f = args.take_float()?;
            let body = if f.is_finite() {
                format!("{:.*}", precision.unwrap_or(6), f.abs())
            } else {
                non_finite(f, upper)
            };
            (float_sign(f, &flags), body)
        }
        Conversion::Exponent { upper } => {
            let f = args.take_float()?;
            let body = if f.is_finite() {
                exponent(f.abs(), precision.unwrap_or(6), upper)
            } else {
                non_finite(f, upper)
            };
            (float_sign(f, &flags), body)
        }
        Conversion::Str => {
            let s = args.take()?.display();
            let s = match precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            };
            flags.zero = false;
            ("", s)
        }
        Conversion::Char => {
            let c = match args.take()? {
                FormatArg::Char(c) => *c,
                FormatArg::Int(n) => u32::try_from(*n)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| HostioError::Format(format!("{} is not a character code", n)))?,
                FormatArg::Str(s) => s.chars().next().unwrap_or('\0'),
                other => {
                    return Err(HostioError::Format(format!(
                        "character required for %c, got {:?}",
                        other
                    )))
                }
            };
            flags.zero = false;
            ("", c.to_string())
        }
    };

    // zero padding does not apply when an integer precision is given
    let integer = matches!(
        directive.conversion,
        Conversion::Signed
            | Conversion::Unsigned
            | Conversion::Octal
            | Conversion::HexLower
            | Conversion::HexUpper
    );
    if integer && precision.is_some() {
        flags.zero = false;
    }

    pad(out, sign, &body, width, &flags);
    Ok(())
}

fn with_min_digits(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    }
}

fn float_sign(f: f64, flags: &crate::parser::Flags) -> &'static str {
    if f.is_sign_negative() && !f.is_nan() {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    }
}

fn non_finite(f: f64, upper: bool) -> String {
    let s = if f.is_nan() { "nan" } else { "inf" };
    if upper {
        s.to_uppercase()
    } else {
        s.to_string()
    }
}

/// C-style exponent notation: at least two exponent digits and an explicit sign.
fn exponent(f: f64, precision: usize, upper: bool) -> String {
    let rendered = format!("{:.*e}", precision, f);
    let (mantissa, exp) = rendered.split_once('e').unwrap_or((rendered.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.unsigned_abs())
}

fn pad(out: &mut String, sign: &str, body: &str, width: usize, flags: &crate::parser::Flags) {
    let len = sign.chars().count() + body.chars().count();
    let fill = width.saturating_sub(len);

    if flags.left {
        out.push_str(sign);
        out.push_str(body);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if flags.zero {
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(body);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(sign);
        out.push_str(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_and_padding() {
        let out = sprintf("testing utils - %-10s - ", &["printf".into()]).unwrap();
        assert_eq!(out, "testing utils - printf     - ");
        assert_eq!(sprintf("[%5s]", &["ab".into()]).unwrap(), "[   ab]");
        assert_eq!(sprintf("[%.2s]", &["abcdef".into()]).unwrap(), "[ab]");
    }

    #[test]
    fn test_octal_of_mode_bits() {
        assert_eq!(sprintf("%o", &[FormatArg::Int(0o777)]).unwrap(), "777");
        assert_eq!(sprintf("%#o", &[FormatArg::Int(8)]).unwrap(), "010");
        assert_eq!(sprintf("%04o", &[FormatArg::Int(0o7)]).unwrap(), "0007");
    }

    #[test]
    fn test_integers() {
        assert_eq!(sprintf("%d", &[FormatArg::Int(-42)]).unwrap(), "-42");
        assert_eq!(sprintf("%+d", &[FormatArg::Int(42)]).unwrap(), "+42");
        assert_eq!(sprintf("%05d", &[FormatArg::Int(-42)]).unwrap(), "-0042");
        assert_eq!(sprintf("%-5d|", &[FormatArg::Int(7)]).unwrap(), "7    |");
        assert_eq!(sprintf("%.3d", &[FormatArg::Int(7)]).unwrap(), "007");
        let n = FormatArg::Int(255);
        assert_eq!(
            sprintf("%x %X %#x", &[n.clone(), n.clone(), n]).unwrap(),
            "ff FF 0xff"
        );
        assert_eq!(sprintf("%*d", &[FormatArg::Int(4), FormatArg::Int(1)]).unwrap(), "   1");
    }

    #[test]
    fn test_floats() {
        assert_eq!(sprintf("%f", &[1.5.into()]).unwrap(), "1.500000");
        assert_eq!(sprintf("%.2f", &[(-3.14159).into()]).unwrap(), "-3.14");
        assert_eq!(sprintf("%8.1f|", &[2.26.into()]).unwrap(), "     2.3|");
        assert_eq!(sprintf("%e", &[1500.0.into()]).unwrap(), "1.500000e+03");
        assert_eq!(sprintf("%.1E", &[0.000123.into()]).unwrap(), "1.2E-04");
        assert_eq!(sprintf("%f", &[f64::INFINITY.into()]).unwrap(), "inf");
    }

    #[test]
    fn test_chars() {
        assert_eq!(sprintf("%-3c|", &['x'.into()]).unwrap(), "x  |");
        assert_eq!(sprintf("%c", &[FormatArg::Int(65)]).unwrap(), "A");
    }

    #[test]
    fn test_percent_escape() {
        assert_eq!(sprintf("100%%", &[]).unwrap(), "100%");
    }

    #[test]
    fn test_argument_errors() {
        assert!(sprintf("%s %s", &["one".into()]).is_err());
        assert!(sprintf("%d", &["nope".into()]).is_err());
    }

    #[test]
    fn test_infer_words() {
        assert_eq!(FormatArg::infer("12"), FormatArg::Int(12));
        assert_eq!(FormatArg::infer("1.5"), FormatArg::Float(1.5));
        assert_eq!(FormatArg::infer("x"), FormatArg::Str("x".to_string()));
        assert_eq!(FormatArg::infer("inf"), FormatArg::Str("inf".to_string()));
    }
}
