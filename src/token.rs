//! The token definition for the PQL language.

use std::borrow::Cow;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Names: function names and field references alike, e.g. `eq`, `donor.gender`
    Identifier(&'a str),

    // Literals
    String(Cow<'a, str>), // Content without the quotes, escapes resolved
    Integer(i64),
    Float(f64),

    // Punctuation
    LParen, // (
    RParen, // )
    Comma,  // ,
    Star,   // *
    Plus,   // +
    Minus,  // -

    // Special
    UnterminatedString, // A quote that is never closed
    Illegal,            // An illegal/unknown character or malformed number
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns the slice of `source` covered by this span.
    pub fn fragment<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.start..self.end).unwrap_or("")
    }
}
