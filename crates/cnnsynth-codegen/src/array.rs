//! Array literal serialization.
//!
//! Weights, biases and golden data are rendered as a single `#define` whose
//! value is a brace-enclosed initializer wrapped with backslash continuations.

use crate::error::FormatError;

/// Radix and case of a numeric element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radix {
    Decimal,
    LowerHex,
    UpperHex,
    Octal,
    Binary,
}

/// Parsed `[0][width]type` numeric format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericSpec {
    pub zero_fill: bool,
    pub width: usize,
    pub radix: Radix,
}

impl NumericSpec {
    fn parse(spec: &str) -> Result<Self, FormatError> {
        let invalid = |reason: &str| FormatError::InvalidNumericFormat {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };
        if spec.is_empty() {
            return Err(invalid("empty format"));
        }

        let (digits, radix) = match spec.chars().last() {
            Some('d') => (&spec[..spec.len() - 1], Radix::Decimal),
            Some('x') => (&spec[..spec.len() - 1], Radix::LowerHex),
            Some('X') => (&spec[..spec.len() - 1], Radix::UpperHex),
            Some('o') => (&spec[..spec.len() - 1], Radix::Octal),
            Some('b') => (&spec[..spec.len() - 1], Radix::Binary),
            Some(c) if c.is_ascii_digit() => (spec, Radix::Decimal),
            _ => return Err(invalid("unsupported presentation type")),
        };
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("only zero-fill and width are supported"));
        }

        let zero_fill = digits.starts_with('0');
        let width = if digits.is_empty() {
            0
        } else {
            digits
                .parse::<usize>()
                .map_err(|_| invalid("width out of range"))?
        };
        Ok(Self {
            zero_fill,
            width,
            radix,
        })
    }

    /// Format one value. Negative numbers keep the sign in front of any
    /// zero padding.
    pub fn format(&self, value: i64) -> String {
        let magnitude = value.unsigned_abs();
        let digits = match self.radix {
            Radix::Decimal => magnitude.to_string(),
            Radix::LowerHex => format!("{magnitude:x}"),
            Radix::UpperHex => format!("{magnitude:X}"),
            Radix::Octal => format!("{magnitude:o}"),
            Radix::Binary => format!("{magnitude:b}"),
        };
        let sign = if value < 0 { "-" } else { "" };
        let len = sign.len() + digits.len();
        if len >= self.width {
            return format!("{sign}{digits}");
        }
        let pad = self.width - len;
        if self.zero_fill {
            format!("{sign}{}{digits}", "0".repeat(pad))
        } else {
            format!("{}{sign}{digits}", " ".repeat(pad))
        }
    }
}

/// Element format descriptor: optional literal prefix plus numeric format,
/// written as `prefix%spec` (e.g. `0x%08x`, `%d`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementFormat {
    pub prefix: String,
    pub spec: NumericSpec,
}

impl ElementFormat {
    pub fn parse(descriptor: &str) -> Result<Self, FormatError> {
        let (prefix, spec) =
            descriptor
                .split_once('%')
                .ok_or_else(|| FormatError::MissingNumericFormat {
                    descriptor: descriptor.to_string(),
                })?;
        if spec.contains('%') {
            return Err(FormatError::InvalidNumericFormat {
                spec: spec.to_string(),
                reason: "more than one '%'".into(),
            });
        }
        Ok(Self {
            prefix: prefix.to_string(),
            spec: NumericSpec::parse(spec)?,
        })
    }

    pub fn format(&self, value: i64) -> String {
        format!("{}{}", self.prefix, self.spec.format(value))
    }
}

/// A named, ordered sequence of fixed-point integers ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    pub name: String,
    pub values: Vec<i64>,
    pub format: ElementFormat,
    pub wrap_width: usize,
}

impl Array {
    pub fn new(
        name: impl Into<String>,
        values: Vec<i64>,
        format: &str,
        wrap_width: usize,
    ) -> Result<Self, FormatError> {
        if wrap_width == 0 {
            return Err(FormatError::ZeroWrapWidth);
        }
        Ok(Self {
            name: name.into(),
            values,
            format: ElementFormat::parse(format)?,
            wrap_width,
        })
    }
}

/// Renders arrays into literal text.
pub trait ArraySerializer {
    fn serialize(&self, array: &Array) -> String;
}

/// The `#define NAME { \ ... \ }` macro literal form.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacroLiteral;

impl ArraySerializer for MacroLiteral {
    fn serialize(&self, array: &Array) -> String {
        let mut out = format!("#define {} {{ \\\n  ", array.name);
        let count = array.values.len();
        for (i, value) in array.values.iter().enumerate() {
            out.push_str(&array.format.format(*value));
            if i + 1 < count {
                out.push_str(", ");
                if (i + 1) % array.wrap_width == 0 {
                    out.push_str("\\\n  ");
                }
            }
        }
        out.push_str(" \\\n}\n");
        out
    }
}

/// Render `values` as a wrapped `#define` literal named `name`.
///
/// `format` is a `prefix%spec` descriptor. A line break follows every
/// `wrap_width` elements except the last, so a literal of `L` elements holds
/// `ceil(L / wrap_width) - 1` internal breaks.
pub fn c_define(
    values: &[i64],
    name: &str,
    format: &str,
    wrap_width: usize,
) -> Result<String, FormatError> {
    let array = Array::new(name, values.to_vec(), format, wrap_width)?;
    Ok(MacroLiteral.serialize(&array))
}
