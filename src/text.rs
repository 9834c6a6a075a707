//! Table-driven string decoding and encoding on a [`ByteStream`].

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{EncodeError, Error, Result, Warning};
use crate::stream::ByteStream;

/// Byte value to character, by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTable {
    chars: Vec<char>,
}

impl DirectTable {
    pub fn new(chars: impl IntoIterator<Item = char>) -> Self {
        DirectTable { chars: chars.into_iter().collect() }
    }

    /// Codes 0x00..=0x7F.
    pub fn ascii() -> Self {
        Self::new((0u8..0x80).map(char::from))
    }

    /// Codes 0x00..=0xFF mapped to U+0000..=U+00FF.
    pub fn latin1() -> Self {
        Self::new((0u8..=0xFF).map(char::from))
    }

    pub fn get(&self, code: u8) -> Option<char> {
        self.chars.get(usize::from(code)).copied()
    }

    pub fn code_of(&self, c: char) -> Option<u8> {
        self.chars.iter().position(|&x| x == c).and_then(|i| u8::try_from(i).ok())
    }
}

/// Bidirectional map between multi-byte codes and symbols. A symbol is either
/// a single character or a bracketed control-code name such as `[END]`.
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    by_code: HashMap<Vec<u8>, String>,
    by_symbol: HashMap<String, Vec<u8>>,
    max_code_len: usize,
}

impl CodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: impl Into<Vec<u8>>, symbol: impl Into<String>) {
        let code = code.into();
        let symbol = symbol.into();
        self.max_code_len = self.max_code_len.max(code.len());
        self.by_symbol.entry(symbol.clone()).or_insert_with(|| code.clone());
        self.by_code.insert(code, symbol);
    }

    /// Parses `HEX=symbol` lines. Blank lines and lines starting with `#` are skipped.
    pub fn parse(source: &str) -> Result<Self> {
        let mut table = CodeTable::new();
        for line in source.lines() {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((hex, symbol)) = line.split_once('=') else {
                return Err(Error::HexSyntax { token: line.to_string() });
            };
            let hex = hex.trim();
            if hex.is_empty() || hex.len() % 2 == 1 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::HexSyntax { token: hex.to_string() });
            }
            let code = (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                .collect::<std::result::Result<Vec<u8>, _>>()
                .map_err(|_| Error::HexSyntax { token: hex.to_string() })?;
            table.insert(code, symbol);
        }
        Ok(table)
    }

    pub fn symbol(&self, code: &[u8]) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    pub fn code(&self, symbol: &str) -> Option<&[u8]> {
        self.by_symbol.get(symbol).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Longest known code that is a prefix of `bytes`.
    fn longest_match(&self, bytes: &[u8]) -> Option<(usize, &str)> {
        (1..=self.max_code_len.min(bytes.len()))
            .rev()
            .find_map(|len| self.symbol(&bytes[..len]).map(|s| (len, s)))
    }
}

#[derive(Debug, Clone)]
pub enum CharTable {
    Direct(DirectTable),
    Code(CodeTable),
}

impl CharTable {
    fn encode_char(&self, c: char) -> Option<Vec<u8>> {
        match self {
            CharTable::Direct(t) => t.code_of(c).map(|b| vec![b]),
            CharTable::Code(t) => t.code(c.encode_utf8(&mut [0; 4])).map(<[u8]>::to_vec),
        }
    }

    fn encode_control(&self, name: &str) -> Option<Vec<u8>> {
        match self {
            CharTable::Direct(_) => None,
            CharTable::Code(t) => t.code(name).map(<[u8]>::to_vec),
        }
    }

    fn printable(&self, byte: u8) -> Option<char> {
        let c = match self {
            CharTable::Direct(t) => t.get(byte)?,
            CharTable::Code(t) => {
                let mut chars = t.symbol(&[byte])?.chars();
                let c = chars.next()?;
                if chars.next().is_some() {
                    return None;
                }
                c
            }
        };
        (!c.is_control()).then_some(c)
    }
}

impl From<DirectTable> for CharTable {
    fn from(t: DirectTable) -> Self {
        CharTable::Direct(t)
    }
}

impl From<CodeTable> for CharTable {
    fn from(t: CodeTable) -> Self {
        CharTable::Code(t)
    }
}

/// Big-endian integer value of a code, used to compare against a terminator.
fn code_value(code: &[u8]) -> Option<u32> {
    (code.len() <= 4).then(|| code.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

#[derive(Debug, Clone)]
pub struct ReadStringOptions {
    /// Read from here inside a save/restore scope, leaving the cursor untouched.
    pub start: Option<usize>,
    pub terminator: Option<u32>,
    pub max_chars: usize,
}

impl Default for ReadStringOptions {
    fn default() -> Self {
        ReadStringOptions { start: None, terminator: Some(0), max_chars: 1_000_000 }
    }
}

impl ReadStringOptions {
    /// Exactly `n` units, no terminator.
    pub fn fixed(n: usize) -> Self {
        ReadStringOptions { start: None, terminator: None, max_chars: n }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitWidth {
    U8,
    U16,
    U32,
}

#[derive(Debug, Clone)]
pub struct WriteStringOptions {
    /// Write here and leave the cursor untouched; `None` writes at the cursor and advances it.
    pub pos: Option<usize>,
    /// Width of literal control codes, terminator and fill units.
    pub unit: UnitWidth,
    pub terminator: Option<u32>,
    pub fill: u32,
    /// Fixed field size in units: longer input is cut, shorter input is filled.
    pub size: Option<usize>,
    /// Bracketed text is a hex literal rather than a table symbol.
    pub literal_codes: bool,
    pub delimiters: (char, char),
}

impl Default for WriteStringOptions {
    fn default() -> Self {
        WriteStringOptions {
            pos: None,
            unit: UnitWidth::U8,
            terminator: None,
            fill: 0x20,
            size: None,
            literal_codes: false,
            delimiters: ('[', ']'),
        }
    }
}

impl ByteStream {
    pub fn read_string(&mut self, table: &CharTable, options: &ReadStringOptions) -> Result<String> {
        let Some(start) = options.start else {
            return self.read_units(table, options);
        };
        self.save_state();
        self.set_index(start);
        let text = self.read_units(table, options);
        self.restore_state()?;
        text
    }

    fn read_units(&mut self, table: &CharTable, options: &ReadStringOptions) -> Result<String> {
        let mut out = String::new();
        for _ in 0..options.max_chars {
            let offset = self.index();
            let (len, symbol) = match table {
                CharTable::Direct(t) => {
                    let byte = self.peek_bytes(offset, 1)?[0];
                    (1, t.get(byte).map(String::from))
                }
                CharTable::Code(t) => {
                    self.peek_bytes(offset, 1)?;
                    match t.longest_match(&self.as_bytes()[offset..]) {
                        Some((len, s)) => (len, Some(s.to_string())),
                        None => (1, None),
                    }
                }
            };
            let code = self.read_bytes(len)?.to_vec();
            if options.terminator.is_some() && code_value(&code) == options.terminator {
                break;
            }
            match symbol {
                Some(s) => out.push_str(&s),
                None => {
                    self.warn(Warning::UnresolvedChar { offset, value: code[0] });
                    out.push_str(&format!("[{:02X}]", code[0]));
                }
            }
        }
        Ok(out)
    }

    fn write_unit(&mut self, value: u32, unit: UnitWidth, pos: usize) -> usize {
        match unit {
            UnitWidth::U8 => {
                self.write_bytes_at(&value.to_be_bytes()[3..], pos);
                pos + 1
            }
            UnitWidth::U16 => {
                self.write_bytes_at(&value.to_be_bytes()[2..], pos);
                pos + 2
            }
            UnitWidth::U32 => {
                self.write_u32_at(value, pos);
                pos + 4
            }
        }
    }

    /// Encodes `text` through `table`. Returns the offset just past the last written unit.
    pub fn write_string(&mut self, text: &str, table: &CharTable, options: &WriteStringOptions) -> Result<usize> {
        let (open, close) = options.delimiters;
        let chars: Vec<char> = text.chars().collect();
        let mut at = options.pos.unwrap_or(self.index());
        let mut units = 0;
        let mut i = 0;
        while i < chars.len() {
            if let Some(size) = options.size {
                if units >= size {
                    self.warn(Warning::Truncated { text: text.to_string(), size });
                    break;
                }
            }
            let c = chars[i];
            if c == open {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&x| x == close)
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| EncodeError::UnterminatedControlCode(chars[i..].iter().collect()))?;
                if options.literal_codes {
                    let inner: String = chars[i + 1..end].iter().collect();
                    let value = u32::from_str_radix(inner.trim(), 16).map_err(|_| EncodeError::InvalidControlCode(inner.clone()))?;
                    at = self.write_unit(value, options.unit, at);
                } else {
                    let name: String = chars[i..=end].iter().collect();
                    let code = table.encode_control(&name).ok_or(EncodeError::UnknownControlCode(name))?;
                    at = self.write_bytes_at(&code, at) + code.len();
                }
                i = end + 1;
            } else {
                let code = table.encode_char(c).ok_or(EncodeError::UnknownSymbol(c))?;
                at = self.write_bytes_at(&code, at) + code.len();
                i += 1;
            }
            units += 1;
        }
        if let Some(terminator) = options.terminator {
            at = self.write_unit(terminator, options.unit, at);
        }
        if let Some(size) = options.size {
            for _ in units..size {
                at = self.write_unit(options.fill, options.unit, at);
            }
        }
        if options.pos.is_none() {
            self.set_index(at);
        }
        Ok(at)
    }

    /// Hex dump of `range`, 16 bytes per line with a text column rendered through `table`.
    pub fn dump(&self, range: Range<usize>, table: &CharTable) -> String {
        let end = range.end.min(self.len());
        let mut lines = Vec::new();
        let mut line_start = range.start;
        let mut hex = String::new();
        let mut text = String::new();
        for pos in range.start..end {
            let byte = self.as_bytes()[pos];
            hex.push_str(&format!("{byte:02X} "));
            text.push(table.printable(byte).unwrap_or('.'));
            if (pos + 1) % 16 == 0 {
                lines.push(format!("{line_start:08X} : {hex} | {text}"));
                line_start = pos + 1;
                hex.clear();
                text.clear();
            }
        }
        if !hex.is_empty() || lines.is_empty() {
            lines.push(format!("{line_start:08X} : {hex} | {text}"));
        }
        lines.join("\n")
    }
}
