//! Cursor over template source text

use crate::result::{EngineError, Result};

pub(crate) fn err_at(pos: usize, message: impl Into<String>) -> EngineError {
    EngineError::Template {
        pos,
        message: message.into(),
    }
}

/// Byte-position scanner. Positions reported in errors are byte offsets
/// into the original text.
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Scanner { src, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consumes `token` when the scanner sits right on it.
    pub fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    /// Text up to the next `token`, leaving the scanner on the token.
    /// `None` when the token never appears.
    pub fn take_until_token(&mut self, token: &str) -> Option<&'a str> {
        let ix = self.rest().find(token)?;
        let start = self.pos;
        self.pos += ix;
        Some(&self.src[start..self.pos])
    }

    /// Remaining text; leaves the scanner at the end.
    pub fn take_rest(&mut self) -> &'a str {
        let rest = &self.src[self.pos..];
        self.pos = self.src.len();
        rest
    }

    /// A run of non-blank characters, stopping before a closing `%]`.
    pub fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            if c == '%' && self.rest().starts_with("%]") {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    /// Reads a `'...'` span, `''` escaping a quote. The scanner must sit
    /// on the opening quote. Returns the raw inner text, escapes intact.
    pub fn quoted_raw(&mut self) -> Result<&'a str> {
        let open = self.pos;
        self.pos += 1;
        let start = self.pos;
        loop {
            match self.rest().find('\'') {
                None => return Err(err_at(open, "Unexpected end of string")),
                Some(ix) => {
                    let quote = self.pos + ix;
                    let after = quote + 1;
                    if self.src[after..].starts_with('\'') {
                        self.pos = after + 1;
                    } else {
                        self.pos = after;
                        return Ok(&self.src[start..quote]);
                    }
                }
            }
        }
    }
}
