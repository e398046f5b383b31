//! Parsers for user-supplied text: memory ranges, watch expressions, and
//! register values.

use sentinel::MemorySegment;

use crate::error::DebugError;

/// A recognized watch expression.
///
/// Exactly five syntaxes exist; anything else is [`DebugError::UnknownExpression`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expression {
    /// `x0`..`x31`
    GpRegister(u8),
    /// `f0`..`f31`
    FpRegister(u8),
    /// `csr.<name>`
    Csr(String),
    /// The literal `outputStatus`.
    OutputStatus,
    /// `mem[<0x-hex address>]`; the address text is kept as written.
    Memory(String),
}

pub(crate) fn parse_expression(expression: &str) -> Result<Expression, DebugError> {
    let trimmed = expression.trim();

    if trimmed == "outputStatus" {
        return Ok(Expression::OutputStatus);
    }
    if let Some(name) = trimmed.strip_prefix("csr.") {
        if !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Ok(Expression::Csr(name.to_string()));
        }
    }
    if let Some(address) = trimmed
        .strip_prefix("mem[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let address = address.trim();
        let digits = address.strip_prefix("0x").unwrap_or("");
        if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Ok(Expression::Memory(address.to_string()));
        }
    }
    if let Some(index) = register_index(trimmed, 'x') {
        return Ok(Expression::GpRegister(index));
    }
    if let Some(index) = register_index(trimmed, 'f') {
        return Ok(Expression::FpRegister(index));
    }

    Err(DebugError::UnknownExpression(expression.to_string()))
}

/// `<prefix><0..31>`, no leading zeros.
fn register_index(expression: &str, prefix: char) -> Option<u8> {
    let digits = expression.strip_prefix(prefix)?;
    if digits.is_empty()
        || digits.len() > 2
        || !digits.chars().all(|ch| ch.is_ascii_digit())
        || (digits.len() == 2 && digits.starts_with('0'))
    {
        return None;
    }
    let index: u8 = digits.parse().ok()?;
    (index <= 31).then_some(index)
}

/// Parse a `;`-separated memory range specification into dump segments.
///
/// Each segment is `start-end` (inclusive hex bounds, byte length
/// `⌈(end − start + 1) / 8⌉`) or `start+bits` (hex start, decimal bit
/// length rounded up to whole bytes). Start addresses are kept as the text
/// the user wrote; the simulator parses them on its side.
pub fn parse_ranges(spec: &str) -> Result<Vec<MemorySegment>, DebugError> {
    let mut segments = Vec::new();
    for part in spec.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        segments.push(parse_segment(part)?);
    }
    if segments.is_empty() {
        return Err(DebugError::MalformedRange(
            "empty range specification".to_string(),
        ));
    }
    Ok(segments)
}

fn parse_segment(part: &str) -> Result<MemorySegment, DebugError> {
    if let Some((start, bits)) = part.split_once('+') {
        let start = start.trim();
        let bits = bits.trim();
        parse_hex(start)?;
        let bits: u64 = bits.parse().map_err(|_| {
            DebugError::MalformedRange(format!("bit length {bits:?} is not a decimal number"))
        })?;
        if bits == 0 {
            return Err(DebugError::MalformedRange(
                "bit length must be positive".to_string(),
            ));
        }
        return Ok(MemorySegment {
            start: start.to_string(),
            byte_len: bits.div_ceil(8),
        });
    }

    if let Some((start, end)) = part.split_once('-') {
        let start = start.trim();
        let end = end.trim();
        let from = parse_hex(start)?;
        let to = parse_hex(end)?;
        if from > to {
            return Err(DebugError::MalformedRange(format!(
                "range start {start} is past its end {end}"
            )));
        }
        return Ok(MemorySegment {
            start: start.to_string(),
            byte_len: (to - from + 1).div_ceil(8),
        });
    }

    Err(DebugError::MalformedRange(format!(
        "segment {part:?} is neither start-end nor start+bits"
    )))
}

fn parse_hex(text: &str) -> Result<u64, DebugError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return Err(DebugError::MalformedRange(format!(
            "{text:?} is not a hex address"
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|_| DebugError::MalformedRange(format!("{text:?} is not a hex address")))
}

/// Left-pad a `0x`-prefixed value to the simulator's 16 hex digits.
///
/// Values without the prefix pass through unchanged; the simulator reports
/// its own verdict on those.
pub(crate) fn pad_register_value(value: &str) -> String {
    match value.strip_prefix("0x") {
        Some(digits) if digits.len() < 16 => format!("0x{digits:0>16}"),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(spec: &str) -> MemorySegment {
        let mut segments = parse_ranges(spec).unwrap();
        assert_eq!(segments.len(), 1);
        segments.remove(0)
    }

    #[test]
    fn bounded_range_counts_bytes() {
        assert_eq!(
            segment("0x1000-0x100F"),
            MemorySegment {
                start: "0x1000".to_string(),
                byte_len: 2,
            }
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = parse_ranges("0x100F-0x1000").unwrap_err();
        assert!(matches!(err, DebugError::MalformedRange(_)));
    }

    #[test]
    fn non_hex_bound_is_rejected() {
        let err = parse_ranges("zz-0x10").unwrap_err();
        assert!(matches!(err, DebugError::MalformedRange(_)));
    }

    #[test]
    fn bit_length_rounds_up_to_bytes() {
        assert_eq!(segment("0x2000+25").byte_len, 4);
        assert_eq!(segment("0x2000+24").byte_len, 3);
        assert_eq!(segment("0x2000+1").byte_len, 1);
    }

    #[test]
    fn zero_bit_length_is_rejected() {
        let err = parse_ranges("0x2000+0").unwrap_err();
        assert!(matches!(err, DebugError::MalformedRange(_)));
    }

    #[test]
    fn non_decimal_bit_length_is_rejected() {
        let err = parse_ranges("0x2000+ten").unwrap_err();
        assert!(matches!(err, DebugError::MalformedRange(_)));
    }

    #[test]
    fn multiple_segments_split_on_semicolon() {
        let segments = parse_ranges("0x1000-0x100F; 0x2000+25").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].byte_len, 2);
        assert_eq!(segments[1].byte_len, 4);
    }

    #[test]
    fn one_bad_segment_fails_the_whole_spec() {
        assert!(parse_ranges("0x1000-0x100F;bogus").is_err());
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert!(parse_ranges("").is_err());
        assert!(parse_ranges(" ; ").is_err());
    }

    #[test]
    fn bare_hex_bounds_are_accepted() {
        assert_eq!(segment("1000-100F").byte_len, 2);
    }

    #[test]
    fn expressions_parse() {
        assert_eq!(parse_expression("x0").unwrap(), Expression::GpRegister(0));
        assert_eq!(parse_expression("x31").unwrap(), Expression::GpRegister(31));
        assert_eq!(parse_expression("f7").unwrap(), Expression::FpRegister(7));
        assert_eq!(
            parse_expression("csr.mstatus").unwrap(),
            Expression::Csr("mstatus".to_string())
        );
        assert_eq!(
            parse_expression("outputStatus").unwrap(),
            Expression::OutputStatus
        );
        assert_eq!(
            parse_expression("mem[0x10FF]").unwrap(),
            Expression::Memory("0x10FF".to_string())
        );
    }

    #[test]
    fn malformed_expressions_are_unknown() {
        for expression in [
            "x32", "x-1", "x05", "f99", "csr.", "mem[10FF]", "mem[]", "pc", "", "x", "mem[0x]",
        ] {
            assert!(
                matches!(
                    parse_expression(expression),
                    Err(DebugError::UnknownExpression(_))
                ),
                "expression {expression:?} should be unknown"
            );
        }
    }

    #[test]
    fn register_values_pad_to_16_digits() {
        assert_eq!(pad_register_value("0x5"), "0x0000000000000005");
        assert_eq!(
            pad_register_value("0xdeadbeefdeadbeef"),
            "0xdeadbeefdeadbeef"
        );
        assert_eq!(pad_register_value("42"), "42");
    }
}
