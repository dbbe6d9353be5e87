//! Conversion between raw bytes and text. Pure, no I/O.

use hostio_core::{HostioError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value
    Latin1,
    /// Lowercase hexadecimal, two digits per byte
    Hex,
}

impl FromStr for Encoding {
    type Err = HostioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            "hex" => Ok(Encoding::Hex),
            other => Err(HostioError::Encoding(format!("unknown encoding '{}'", other))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Utf8 => "utf8",
            Encoding::Latin1 => "latin1",
            Encoding::Hex => "hex",
        };
        f.write_str(name)
    }
}

/// Bytes to text. UTF-8 decoding is strict.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<String> {
    match encoding {
        Encoding::Utf8 => String::from_utf8(bytes.to_vec())
            .map_err(|e| HostioError::Encoding(format!("invalid utf-8: {}", e))),
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        Encoding::Hex => Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}

/// Text to bytes.
pub fn encode(text: &str, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
        Encoding::Latin1 => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    HostioError::Encoding(format!("'{}' cannot be represented in latin1", c))
                })
            })
            .collect(),
        Encoding::Hex => {
            let digits = text.trim().as_bytes();
            if digits.len() % 2 != 0 {
                return Err(HostioError::Encoding(
                    "hex input must have an even number of digits".to_string(),
                ));
            }
            digits
                .chunks(2)
                .map(|pair| {
                    let pair = std::str::from_utf8(pair)
                        .map_err(|_| HostioError::Encoding("non-ascii hex digit".to_string()))?;
                    u8::from_str_radix(pair, 16)
                        .map_err(|_| HostioError::Encoding(format!("invalid hex byte '{}'", pair)))
                })
                .collect()
        }
    }
}

/// Decodes a slice cut out of a larger UTF-8 stream.
///
/// Continuation bytes before the first complete character and an unfinished
/// sequence at the end are dropped; any other invalid byte is replaced.
pub fn decode_window(bytes: &[u8]) -> String {
    let start = bytes
        .iter()
        .position(|b| !(0x80..0xC0).contains(b))
        .unwrap_or(bytes.len());
    let body = &bytes[start..];

    match std::str::from_utf8(body) {
        Ok(s) => s.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&body[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_is_strict() {
        assert_eq!(decode(b"hello", Encoding::Utf8).unwrap(), "hello");
        assert!(decode(&[0x66, 0xff], Encoding::Utf8).is_err());
    }

    #[test]
    fn test_latin1() {
        assert_eq!(decode(&[0x63, 0x61, 0x66, 0xe9], Encoding::Latin1).unwrap(), "café");
        assert_eq!(encode("café", Encoding::Latin1).unwrap(), vec![0x63, 0x61, 0x66, 0xe9]);
        assert!(encode("€", Encoding::Latin1).is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(decode(&[0x00, 0xab, 0x10], Encoding::Hex).unwrap(), "00ab10");
        assert_eq!(encode("00AB10", Encoding::Hex).unwrap(), vec![0x00, 0xab, 0x10]);
        assert!(encode("abc", Encoding::Hex).is_err());
        assert!(encode("zz", Encoding::Hex).is_err());
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("latin1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert!("ebcdic".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Hex.to_string(), "hex");
    }

    #[test]
    fn test_decode_window_trims_partial_characters() {
        // "é" is c3 a9, "€" is e2 82 ac
        let bytes = "aé€b€".as_bytes();
        // starts inside "é", ends inside the last "€"
        let cut = &bytes[2..bytes.len() - 1];
        assert_eq!(decode_window(cut), "€b");
        assert_eq!(decode_window(b"plain"), "plain");
        assert_eq!(decode_window(&[0x82, 0xac]), "");
    }
}
