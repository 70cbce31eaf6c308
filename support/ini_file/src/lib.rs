//! A very small parser for flat ini files.
//!
//! The input is ASCII. Each non-empty line is either a comment starting with
//! '#', or a `key = value` pair. A value may be quoted to keep whitespace or
//! '#' in it. A '#' after an unquoted value starts a trailing comment.
//! Section headers are not supported.
//!
//! ```ignore
//! # Boot loader settings
//! log_level = info
//! banner = "two words"   # kept as is
//! ```
//!
//! The caller pulls pairs with [`Parser::parse()`] until it gets `Ok(None)`
//! or an error. Interpreting the keys is up to the caller.

#![cfg_attr(not(test), no_std)]

/// Line and column are 1-based, `pos` is the byte offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
    pub pos: usize,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            line: 1,
            col: 1,
            pos: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidKeyName(Location),
    ExpectedAssign(Location),
    ExpectedValue(Location),
    UnmatchedQuote(Location),
    UnexpectedToken(Location),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyValue<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

pub struct Parser<'a> {
    input: &'a [u8],
    location: Location,
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-')
}

fn is_blank(byte: u8) -> bool {
    byte != b'\n' && (b'\t'..=b' ').contains(&byte)
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        // A NUL terminates the input, firmware reads tend to leave them around.
        let len = input.iter().position(|&b| b == 0).unwrap_or(input.len());
        Self {
            input: &input[..len],
            location: Location::default(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.location.pos).copied()
    }

    fn bump(&mut self) {
        if self.peek() == Some(b'\n') {
            self.location.line += 1;
            self.location.col = 1;
        } else {
            self.location.col += 1;
        }
        self.location.pos += 1;
    }

    fn skip_blanks(&mut self) {
        while self.peek().is_some_and(is_blank) {
            self.bump();
        }
    }

    fn skip_comment(&mut self) {
        if self.peek() == Some(b'#') {
            while self.peek().is_some_and(|b| b != b'\n') {
                self.bump();
            }
        }
    }

    /// Skips blank lines and comment lines.
    fn skip_trivia(&mut self) {
        loop {
            self.skip_blanks();
            self.skip_comment();
            if self.peek() == Some(b'\n') {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> &'a [u8] {
        let start = self.location.pos;
        while self.peek().is_some_and(is_word_byte) {
            self.bump();
        }
        &self.input[start..self.location.pos]
    }

    fn value(&mut self) -> Result<&'a [u8], Error> {
        match self.peek() {
            Some(b'"') => {
                let open = self.location;
                self.bump();
                let start = self.location.pos;
                loop {
                    match self.peek() {
                        Some(b'"') => break,
                        None | Some(b'\n') => return Err(Error::UnmatchedQuote(open)),
                        Some(_) => self.bump(),
                    }
                }
                let value = &self.input[start..self.location.pos];
                self.bump();
                Ok(value)
            }
            Some(b) if is_word_byte(b) => Ok(self.word()),
            _ => Err(Error::ExpectedValue(self.location)),
        }
    }

    /// Consumes whatever may follow a value on its line.
    fn end_of_line(&mut self) -> Result<(), Error> {
        self.skip_blanks();
        self.skip_comment();
        match self.peek() {
            None => Ok(()),
            Some(b'\n') => {
                self.bump();
                Ok(())
            }
            Some(_) => Err(Error::UnexpectedToken(self.location)),
        }
    }

    pub fn parse(&mut self) -> Result<Option<KeyValue<'a>>, Error> {
        self.skip_trivia();
        let Some(first) = self.peek() else {
            return Ok(None);
        };
        if !first.is_ascii_alphabetic() {
            return Err(if is_word_byte(first) {
                Error::InvalidKeyName(self.location)
            } else {
                Error::UnexpectedToken(self.location)
            });
        }

        let key = self.word();
        self.skip_blanks();
        if self.peek() != Some(b'=') {
            return Err(Error::ExpectedAssign(self.location));
        }
        self.bump();
        self.skip_blanks();

        let value = self.value()?;
        self.end_of_line()?;

        Ok(Some(KeyValue { key, value }))
    }
}
