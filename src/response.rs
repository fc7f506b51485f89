//! Decoding of instrument replies.
//!
//! Every reply starts with a fixed-length prefix naming what it carries, for
//! example `NSDCV+1.20000E+01,NMDCI+2.5000E-09` for a reading taken while
//! sourcing voltage. The prefix is checked before anything else is parsed.

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::units::{Amperes, Volts};

/// A reply type with a known set of accepted prefixes.
pub trait Response: Sized {
    /// Accepted prefixes, all of the same length.
    const PREFIXES: &'static [&'static str];

    /// Parse the fields following the prefix. `variant` is the index of the matched prefix.
    fn parse_fields(variant: usize, reader: &mut Reader<'_>) -> Result<Self, ParseError>;

    /// Parse a complete reply line.
    fn parse(line: &str) -> Result<Self, ParseError> {
        let mut reader = Reader::new(line);
        let variant = reader.prefix(Self::PREFIXES)?;
        let value = Self::parse_fields(variant, &mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Cursor over a single reply line.
pub struct Reader<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, position: 0 }
    }

    pub fn remaining(&self) -> &'a str {
        &self.text[self.position..]
    }

    /// Consume exactly one of `accepted` (all the same length) and return its index.
    pub fn prefix(&mut self, accepted: &'static [&'static str]) -> Result<usize, ParseError> {
        let length = accepted.first().map_or(0, |p| p.len());
        let rest = self.remaining();
        let received = rest.get(..length).unwrap_or(rest);

        match accepted.iter().position(|p| *p == received) {
            Some(index) => {
                self.position += length;
                Ok(index)
            }
            None => Err(ParseError::Prefix {
                received: received.to_string(),
                accepted,
            }),
        }
    }

    /// Consume `token` exactly.
    pub fn separator(&mut self, token: &'static str) -> Result<(), ParseError> {
        let rest = self.remaining();
        if rest.starts_with(token) {
            self.position += token.len();
            Ok(())
        } else {
            Err(ParseError::Separator {
                expected: token,
                received: rest.to_string(),
            })
        }
    }

    /// Consume a decimal number: `[+-]digits[.digits][(e|E)[+-]digits]`.
    pub fn number(&mut self) -> Result<f64, ParseError> {
        let rest = self.remaining();
        let bytes = rest.as_bytes();
        let mut end = 0;

        if matches!(bytes.first(), Some(b'+' | b'-')) {
            end += 1;
        }
        let integer_digits = count_digits(&bytes[end..]);
        end += integer_digits;
        let mut fraction_digits = 0;
        if bytes.get(end) == Some(&b'.') {
            fraction_digits = count_digits(&bytes[end + 1..]);
            end += 1 + fraction_digits;
        }
        if integer_digits + fraction_digits == 0 {
            return Err(ParseError::Number {
                received: rest.to_string(),
            });
        }
        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            let mut exponent_end = end + 1;
            if matches!(bytes.get(exponent_end), Some(b'+' | b'-')) {
                exponent_end += 1;
            }
            let exponent_digits = count_digits(&bytes[exponent_end..]);
            if exponent_digits == 0 {
                return Err(ParseError::Number {
                    received: rest.to_string(),
                });
            }
            end = exponent_end + exponent_digits;
        }

        let value = rest[..end].parse::<f64>().map_err(|_| ParseError::Number {
            received: rest.to_string(),
        })?;
        self.position += end;
        Ok(value)
    }

    /// Consume an optionally signed decimal integer.
    pub fn integer(&mut self) -> Result<i64, ParseError> {
        let rest = self.remaining();
        let bytes = rest.as_bytes();
        let sign = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
        let digits = count_digits(&bytes[sign..]);
        if digits == 0 {
            return Err(ParseError::Number {
                received: rest.to_string(),
            });
        }
        let value = rest[..sign + digits]
            .parse::<i64>()
            .map_err(|_| ParseError::Number {
                received: rest.to_string(),
            })?;
        self.position += sign + digits;
        Ok(value)
    }

    /// Consume exactly `count` `'0'`/`'1'` characters. The first character is bit 0.
    pub fn bits(&mut self, count: usize) -> Result<u32, ParseError> {
        let rest = self.remaining();
        let mut mask = 0u32;
        let mut taken = 0;
        for byte in rest.bytes().take(count) {
            match byte {
                b'0' => {}
                b'1' => mask |= 1 << taken,
                _ => break,
            }
            taken += 1;
        }
        if taken < count {
            return Err(ParseError::BitMask {
                expected: count,
                received: rest.to_string(),
            });
        }
        self.position += count;
        Ok(mask)
    }

    /// Fail if anything is left over.
    pub fn finish(&self) -> Result<(), ParseError> {
        let rest = self.remaining();
        if rest.is_empty() {
            Ok(())
        } else {
            Err(ParseError::Trailing {
                received: rest.to_string(),
            })
        }
    }
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// One reading of the source and measure values.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub voltage: Volts,
    pub current: Amperes,
    /// Host time at which the reply was decoded.
    pub timestamp: DateTime<Utc>,
    /// The source is limited by its compliance setting.
    pub in_compliance: bool,
}

impl Response for Measurement {
    const PREFIXES: &'static [&'static str] = &["NSDCV", "OSDCV"];

    fn parse_fields(variant: usize, reader: &mut Reader<'_>) -> Result<Self, ParseError> {
        let voltage = Volts(reader.number()?);
        reader.separator(",")?;
        reader.prefix(&["NMDCI"])?;
        let current = Amperes(reader.number()?);
        Ok(Measurement {
            voltage,
            current,
            timestamp: Utc::now(),
            in_compliance: variant == 1,
        })
    }
}

/// Compliance level the instrument actually committed to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceValue {
    pub current: Amperes,
}

impl Response for ComplianceValue {
    const PREFIXES: &'static [&'static str] = &["ICP"];

    fn parse_fields(_variant: usize, reader: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(ComplianceValue {
            current: Amperes(reader.number()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_measurement() {
        let m = Measurement::parse("NSDCV+1.20000E+01,NMDCI+2.5000E-09").unwrap();
        assert_eq!(m.voltage, Volts(12.0));
        assert_eq!(m.current, Amperes(2.5e-9));
        assert!(!m.in_compliance);
    }

    #[test]
    fn compliance_prefix_sets_flag() {
        let m = Measurement::parse("OSDCV-5.0000E+00,NMDCI-1.0000E-02").unwrap();
        assert_eq!(m.voltage, Volts(-5.0));
        assert!(m.in_compliance);
    }

    #[test]
    fn unexpected_prefix_is_rejected() {
        let err = Measurement::parse("XSDCV+1.20000E+01,NMDCI+2.5000E-09").unwrap_err();
        assert_eq!(
            err,
            ParseError::Prefix {
                received: "XSDCV".into(),
                accepted: &["NSDCV", "OSDCV"],
            }
        );
    }

    #[test]
    fn short_reply_is_a_prefix_mismatch() {
        assert!(matches!(
            Measurement::parse("NSD"),
            Err(ParseError::Prefix { received, .. }) if received == "NSD"
        ));
    }

    #[test]
    fn separator_must_match() {
        assert!(matches!(
            Measurement::parse("NSDCV+1.0E+00;NMDCI+1.0E-09"),
            Err(ParseError::Separator { expected: ",", .. })
        ));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(matches!(
            ComplianceValue::parse("ICP+1.000E-02xyz"),
            Err(ParseError::Trailing { .. })
        ));
    }

    #[test]
    fn compliance_value() {
        let c = ComplianceValue::parse("ICP+1.000E-02").unwrap();
        assert_eq!(c.current, Amperes(0.01));
    }

    #[test]
    fn number_grammar() {
        for (text, expected) in [
            ("1", 1.0),
            ("-2.5", -2.5),
            ("+.5", 0.5),
            ("3.", 3.0),
            ("1.5e3", 1500.0),
            ("-1E-2", -0.01),
            ("+1.2000E1", 12.0),
        ] {
            let mut reader = Reader::new(text);
            assert_eq!(reader.number().unwrap(), expected, "{text}");
            assert!(reader.finish().is_ok());
        }
        for text in ["", "+", ".", "e5", "1e", "1e+"] {
            assert!(Reader::new(text).number().is_err(), "{text:?}");
        }
    }

    #[test]
    fn number_stops_at_first_foreign_character() {
        let mut reader = Reader::new("12.5,3");
        assert_eq!(reader.number().unwrap(), 12.5);
        assert_eq!(reader.remaining(), ",3");
    }

    #[test]
    fn bit_masks() {
        let mut reader = Reader::new("1010");
        assert_eq!(reader.bits(4).unwrap(), 0b0101);

        assert!(matches!(
            Reader::new("10").bits(4),
            Err(ParseError::BitMask { expected: 4, .. })
        ));
        assert!(Reader::new("1021").bits(4).is_err());
    }

    #[test]
    fn integers() {
        let mut reader = Reader::new("-12,7");
        assert_eq!(reader.integer().unwrap(), -12);
        reader.separator(",").unwrap();
        assert_eq!(reader.integer().unwrap(), 7);
        assert!(Reader::new("x").integer().is_err());
    }
}
