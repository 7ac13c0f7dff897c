// MIT License
//
// Copyright (c) 2024 Jerome Johnson
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Handlebars expression tokenization
//!
//! Splits a tag's inner text into whitespace separated tokens while keeping quoted strings,
//! bracket segments and parenthesized subexpressions whole:
//!
//! ```text
//! each items as |item index|         -> each, items, as, |item index|
//! helper "a b" [c d].e (sub 1 (x))   -> helper, "a b", [c d].e, (sub 1 (x))
//! key="value with spaces"            -> key="value with spaces"
//! ```
//!
//! The tokenizer only checks that every opened construct is closed. Deciding what a token
//! means is left to the expression parser.

/// A token parsed from an expression
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    /// The token's text
    pub value: &'a str,
    /// The remaining text after this token
    pub tail: &'a str,
}

/// Name of the construct left open at the end of the input
pub(crate) type Unterminated = &'static str;

type Result<T> = std::result::Result<T, Unterminated>;

fn opens_quote(prev: Option<char>) -> bool {
    prev.is_none_or(|p| p == '=' || p == '(' || p.is_whitespace())
}

/// Finds the end of the token at the start of `src`
///
/// Tracks a stack of expected closers so `(a (b "c)"))` is one token.
fn find_end(src: &str) -> Result<usize> {
    let mut expect: Vec<char> = Vec::new();
    let mut prev = None;
    let mut chars = src.char_indices();
    while let Some((i, c)) = chars.next() {
        match expect.last().copied() {
            Some(quote @ ('"' | '\'')) => {
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    expect.pop();
                }
            }
            Some(']') => {
                if c == ']' {
                    expect.pop();
                }
            }
            top => match c {
                '"' | '\'' if opens_quote(prev) => expect.push(c),
                '[' => expect.push(']'),
                '(' => expect.push(')'),
                ')' if top == Some(')') => {
                    expect.pop();
                }
                c if c.is_whitespace() && top.is_none() => return Ok(i),
                _ => (),
            },
        }
        prev = Some(c);
    }
    match expect.last() {
        None => Ok(src.len()),
        Some('"' | '\'') => Err("string literal"),
        Some(']') => Err("bracket segment `[`"),
        _ => Err("subexpression `(`"),
    }
}

/// Parses a single token from the input string
fn parse(src: &str) -> Result<Option<Token<'_>>> {
    if src.is_empty() {
        return Ok(None);
    }
    let end = find_end(src)?;
    Ok(Some(Token {
        value: &src[..end],
        tail: src[end..].trim_start(),
    }))
}

impl<'a> Token<'a> {
    /// Parses the first token from a string
    pub fn first(src: &'a str) -> Result<Option<Self>> {
        parse(src.trim())
    }

    /// Parses the next token after this one
    pub fn next(&self) -> Result<Option<Self>> {
        parse(self.tail)
    }

    /// Reads the `|a b|` list following an `as` token
    ///
    /// Returns the names and the text after the closing pipe.
    pub fn block_params(&self) -> Result<Option<(Vec<&'a str>, &'a str)>> {
        let Some(rest) = self.tail.strip_prefix('|') else {
            return Ok(None);
        };
        let end = rest.find('|').ok_or("block parameters `|`")?;
        Ok(Some((
            rest[..end].split_whitespace().collect(),
            rest[end + 1..].trim_start(),
        )))
    }
}

/// Tokenizes a whole expression
#[cfg(test)]
fn tokens(src: &str) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    let mut token = Token::first(src)?;
    while let Some(current) = token {
        out.push(current.value);
        token = current.next()?;
    }
    Ok(out)
}
