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

//! Lexical scanning of template text
//!
//! The scanner walks raw template text and splits it into literal runs and tags. It knows
//! about delimiters and nothing else: the tag's inner text is handed on untouched.
//!
//! # Tag forms
//!
//! - Escaped variables: `{{name}}`
//! - Raw variables: `{{{name}}}`
//! - Blocks, inverses, closers, partials: `{{#x}}`, `{{^x}}`, `{{/x}}`, `{{> x}}`
//! - Comments: `{{! comment }}` or `{{!-- comment with }} inside --}}`
//! - Raw blocks: `{{{{name}}}}not {{parsed}} at all{{{{/name}}}}`
//! - Escaped delimiters: `\{{name}}` is literal text, `\\{{name}}` is a backslash and a tag
//!
//! A `~` directly inside either delimiter marks the adjacent literal for whitespace
//! stripping.

use std::borrow::Cow;

use crate::error::{ParseError, Result, rcap};

/// A tag split into its six raw parts
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawTag<'a> {
    /// Open delimiter with its modifiers, e.g. `{{~{`
    pub open: &'a str,
    /// Operation characters, e.g. `#`, `#>`, `!`
    pub op: &'a str,
    /// Whitespace between the operation and the inner text
    pub lead: &'a str,
    pub inner: &'a str,
    /// Whitespace between the inner text and the close delimiter
    pub trail: &'a str,
    /// Close delimiter with its modifiers, e.g. `~}}}`
    pub close: &'a str,
    /// 0 for `{{`, 1 for `{{{`, 2 for raw blocks
    pub braces: usize,
    pub strip_before: bool,
    pub strip_after: bool,
    /// The whole tag as written
    pub source: &'a str,
    pub line: usize,
    /// Verbatim body of a raw block
    pub raw_body: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub(crate) enum Piece<'a> {
    Text(Cow<'a, str>),
    Tag(RawTag<'a>),
}

pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    open: &'a str,
    close: &'a str,
    line: usize,
    line_pos: usize,
}

/// Splits surrounding whitespace off a tag's inner text
fn split_ws(raw: &str) -> (&str, &str, &str) {
    let trimmed = raw.trim_start();
    let lead = &raw[..raw.len() - trimmed.len()];
    let inner = trimmed.trim_end();
    (lead, inner, &trimmed[inner.len()..])
}

/// Counts the backslashes immediately before `end`
fn trailing_backslashes(text: &str) -> usize {
    text.bytes().rev().take_while(|b| *b == b'\\').count()
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str, open: &'a str, close: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            open,
            close,
            line: 1,
            line_pos: 0,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        self.line += self.src[self.line_pos..offset].matches('\n').count();
        self.line_pos = offset;
        self.line
    }

    fn unclosed(&mut self, start: usize) -> ParseError {
        let line = self.line_at(start);
        let end = (start + self.open.len()).min(self.src.len());
        self.pos = self.src.len();
        ParseError::UnclosedTag {
            near: rcap(&self.src[..end]).to_string(),
            line,
        }
    }

    /// Reads literal text up to the next unescaped open delimiter
    fn scan_text(&mut self) -> Cow<'a, str> {
        let src = self.src;
        let mut text = String::new();
        let mut owned = false;
        let mut segment = self.pos;
        let mut search = self.pos;
        let end = loop {
            let Some(found) = src[search..].find(self.open) else {
                break src.len();
            };
            let at = search + found;
            let slashes = trailing_backslashes(&src[segment..at]);
            if slashes == 0 {
                break at;
            }
            owned = true;
            text.push_str(&src[segment..at - slashes]);
            text.push_str(&"\\".repeat(slashes / 2));
            if slashes % 2 == 0 {
                segment = at;
                break at;
            }
            // escaped delimiter: keep it as text and carry on after it
            text.push_str(self.open);
            segment = at + self.open.len();
            search = segment;
        };
        let start = self.pos;
        self.pos = end;
        if owned {
            text.push_str(&src[segment..end]);
            Cow::Owned(text)
        } else {
            Cow::Borrowed(&src[start..end])
        }
    }

    fn find_close(&self, from: usize) -> Option<usize> {
        self.src[from..].find(self.close).map(|i| from + i)
    }

    fn scan_tag(&mut self) -> Result<Piece<'a>> {
        let src = self.src;
        let start = self.pos;
        let line = self.line_at(start);
        let mut cur = start + self.open.len();
        let mut strip_before = false;
        if src[cur..].starts_with('~') {
            strip_before = true;
            cur += 1;
        }
        let mut braces = 0;
        while braces < 2 && src[cur..].starts_with('{') {
            braces += 1;
            cur += 1;
        }
        if braces > 0 && !strip_before && src[cur..].starts_with('~') {
            strip_before = true;
            cur += 1;
        }
        let tag = RawTag {
            open: &src[start..cur],
            op: "",
            lead: "",
            inner: "",
            trail: "",
            close: "",
            braces,
            strip_before,
            strip_after: false,
            source: "",
            line,
            raw_body: None,
        };
        match braces {
            2 => self.scan_raw_block(start, cur, tag),
            1 => self.scan_triple(start, cur, tag),
            _ => self.scan_plain(start, cur, tag),
        }
    }

    fn scan_plain(&mut self, start: usize, mut cur: usize, mut tag: RawTag<'a>) -> Result<Piece<'a>> {
        let src = self.src;
        let rest = &src[cur..];
        tag.op = if rest.starts_with("#>") || rest.starts_with("#*") {
            &rest[..2]
        } else if rest.starts_with(['#', '^', '/', '!', '>', '&']) {
            &rest[..1]
        } else {
            ""
        };
        cur += tag.op.len();

        let (inner_end, close_at) = if tag.op == "!" && src[cur..].starts_with("--") {
            cur += 2;
            let mut from = cur;
            loop {
                let Some(found) = src[from..].find("--") else {
                    return Err(self.unclosed(start));
                };
                let dashes = from + found;
                let mut after = dashes + 2;
                if src[after..].starts_with('~') {
                    after += 1;
                }
                if src[after..].starts_with(self.close) {
                    tag.strip_after = after > dashes + 2;
                    break (dashes, after);
                }
                from = dashes + 1;
            }
        } else {
            let Some(close_at) = self.find_close(cur) else {
                return Err(self.unclosed(start));
            };
            let end = close_at + self.close.len();
            if src[end..].starts_with('}') {
                let inner = src[cur..close_at].trim().trim_matches('~').trim();
                self.pos = end + 1;
                return Err(ParseError::BadToken {
                    found: src[start..end + 1].to_string(),
                    suggestion: format!(
                        "{open}{op}{inner}{close} or {open}{{{inner}}}{close}",
                        open = self.open,
                        op = tag.op,
                        close = self.close
                    ),
                    line: tag.line,
                });
            }
            let mut inner_end = close_at;
            if inner_end > cur && src[..inner_end].ends_with('~') {
                tag.strip_after = true;
                inner_end -= 1;
            }
            (inner_end, close_at)
        };

        let end = close_at + self.close.len();
        (tag.lead, tag.inner, tag.trail) = split_ws(&src[cur..inner_end]);
        tag.close = &src[inner_end..end];
        tag.source = &src[start..end];
        self.pos = end;
        Ok(Piece::Tag(tag))
    }

    fn scan_triple(&mut self, start: usize, cur: usize, mut tag: RawTag<'a>) -> Result<Piece<'a>> {
        let src = self.src;
        let Some(plain) = self.find_close(cur) else {
            return Err(self.unclosed(start));
        };
        let closer = format!("}}{}", self.close);
        let stripped = format!("}}~{}", self.close);
        let triple = [closer.as_str(), stripped.as_str()]
            .into_iter()
            .filter_map(|c| src[cur..].find(c).map(|i| (cur + i, c)))
            .min_by_key(|(i, _)| *i);

        match triple {
            Some((at, matched)) if plain >= at => {
                let mut inner_end = at;
                tag.strip_after = matched.len() > closer.len();
                if inner_end > cur && src[..inner_end].ends_with('~') {
                    tag.strip_after = true;
                    inner_end -= 1;
                }
                let end = at + matched.len();
                (tag.lead, tag.inner, tag.trail) = split_ws(&src[cur..inner_end]);
                tag.close = &src[inner_end..end];
                tag.source = &src[start..end];
                self.pos = end;
                Ok(Piece::Tag(tag))
            }
            _ => {
                let end = plain + self.close.len();
                let inner = src[cur..plain].trim().trim_matches('~').trim();
                self.pos = end;
                Err(ParseError::BadToken {
                    found: src[start..end].to_string(),
                    suggestion: format!(
                        "{open}{inner}{close} or {open}{{{inner}}}{close}",
                        open = self.open,
                        close = self.close
                    ),
                    line: tag.line,
                })
            }
        }
    }

    fn scan_raw_block(&mut self, start: usize, cur: usize, mut tag: RawTag<'a>) -> Result<Piece<'a>> {
        let src = self.src;
        let closer = format!("}}}}{}", self.close);
        let Some(found) = src[cur..].find(&closer) else {
            return Err(self.unclosed(start));
        };
        let mut inner_end = cur + found;
        if inner_end > cur && src[..inner_end].ends_with('~') {
            tag.strip_after = true;
            inner_end -= 1;
        }
        let open_end = cur + found + closer.len();
        (tag.lead, tag.inner, tag.trail) = split_ws(&src[cur..inner_end]);
        tag.close = &src[inner_end..open_end];

        let end_open = format!("{}{{{{/", self.open);
        let mut from = open_end;
        loop {
            let Some(candidate) = src[from..].find(&end_open) else {
                return Err(self.unclosed(start));
            };
            let name_start = from + candidate + end_open.len();
            let Some(name_len) = src[name_start..].find(&closer) else {
                return Err(self.unclosed(start));
            };
            if src[name_start..name_start + name_len].trim() == tag.inner {
                let end = name_start + name_len + closer.len();
                tag.raw_body = Some(&src[open_end..from + candidate]);
                tag.source = &src[start..end];
                self.pos = end;
                return Ok(Piece::Tag(tag));
            }
            from = name_start;
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Piece<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.src.len() {
            return None;
        }
        if self.src[self.pos..].starts_with(self.open) {
            Some(self.scan_tag())
        } else {
            Some(Ok(Piece::Text(self.scan_text())))
        }
    }
}
