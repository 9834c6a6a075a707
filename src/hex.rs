//! Tokenizers for the two hex mini-languages used by [`ByteStream`](crate::ByteStream):
//! search patterns (`"34 ** 56"`) and patches (`"AA ** ++ BB"`).
//! Both are sequences of two-character tokens; whitespace is ignored.

use crate::error::{Error, Result};

pub const WILDCARD: char = '*';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternToken {
    Byte(u8),
    /// Matches any byte.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchToken {
    Byte(u8),
    /// `**`: rewrite the byte already at the write position.
    Keep,
    /// `++`: copy from the patch's own read cursor, then advance it.
    Copy,
}

fn pairs(source: &str) -> Vec<String> {
    let compact: Vec<char> = source.chars().filter(|c| !c.is_whitespace()).collect();
    compact.chunks(2).map(|pair| pair.iter().collect()).collect()
}

fn parse_byte(token: &str) -> Result<u8> {
    if token.len() != 2 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::HexSyntax { token: token.to_string() });
    }
    u8::from_str_radix(token, 16).map_err(|_| Error::HexSyntax { token: token.to_string() })
}

/// An odd number of digits is read as if a leading `0` were present.
pub fn parse_pattern(source: &str) -> Result<Vec<PatternToken>> {
    let digits = source.chars().filter(|c| !c.is_whitespace()).count();
    let padded;
    let source = if digits % 2 == 1 {
        padded = format!("0{source}");
        padded.as_str()
    } else {
        source
    };
    pairs(source)
        .iter()
        .map(|token| if token.contains(WILDCARD) { Ok(PatternToken::Any) } else { parse_byte(token).map(PatternToken::Byte) })
        .collect()
}

pub fn parse_patch(source: &str) -> Result<Vec<PatchToken>> {
    pairs(source)
        .iter()
        .map(|token| match token.as_str() {
            "**" => Ok(PatchToken::Keep),
            "++" => Ok(PatchToken::Copy),
            t if t.len() == 2 => parse_byte(t).map(PatchToken::Byte),
            t => Err(Error::HexSyntax { token: t.to_string() }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_ignores_whitespace_and_marks_wildcards() {
        let tokens = parse_pattern("34 ** 5*\n6 0").unwrap();
        assert_eq!(tokens, vec![PatternToken::Byte(0x34), PatternToken::Any, PatternToken::Any, PatternToken::Byte(0x60)]);
    }

    #[test]
    fn odd_pattern_gets_leading_zero() {
        assert_eq!(parse_pattern("A12").unwrap(), vec![PatternToken::Byte(0x0A), PatternToken::Byte(0x12)]);
    }

    #[test]
    fn patch_tokens() {
        let tokens = parse_patch("aa ** ++ 0F").unwrap();
        assert_eq!(tokens, vec![PatchToken::Byte(0xAA), PatchToken::Keep, PatchToken::Copy, PatchToken::Byte(0x0F)]);
    }

    #[test]
    fn bad_tokens_are_rejected() {
        assert!(matches!(parse_patch("GG"), Err(Error::HexSyntax { .. })));
        assert!(matches!(parse_patch("ABC"), Err(Error::HexSyntax { token }) if token == "C"));
        assert!(matches!(parse_pattern("+1"), Err(Error::HexSyntax { .. })));
    }
}
