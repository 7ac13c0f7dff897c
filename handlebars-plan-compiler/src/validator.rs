//! Structural validation
//!
//! Drives the scanner across a whole template and turns its pieces into the token stream the
//! compiler consumes. Along the way it
//!
//! - classifies every tag and parses its expressions,
//! - removes the whitespace around standalone tags (a block, comment, partial or `else` tag
//!   alone on its line) and next to `~` markers,
//! - captures the indentation of standalone partials,
//! - checks that block tags open and close in balance.
//!
//! Every problem is recorded in the compile state; validation never stops early.

use std::borrow::Cow;

use crate::{
    error::ParseError,
    expression::{Expr, ExprParser, Literal, Parsed, PartialName},
    scanner::{Piece, RawTag, Scanner},
    state::CompileState,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TagKind {
    /// `{{x}}`, or `{{{x}}}` / `{{&x}}` when raw
    Variable { raw: bool },
    Open,
    OpenInverse,
    /// `{{else}}`, `{{^}}`, or `{{else if x}}` when chained
    Else { chained: bool },
    Close,
    Comment,
    Partial { name: PartialName },
    PartialBlock { name: PartialName },
    Inline { name: String },
    RawBlock { body: String },
}

impl TagKind {
    fn may_stand_alone(&self) -> bool {
        !matches!(self, Self::Variable { .. } | Self::RawBlock { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Tag {
    pub kind: TagKind,
    pub parsed: Parsed,
    pub source: String,
    pub line: usize,
    /// Indentation removed in front of a standalone partial
    pub indent: String,
}

#[derive(Debug, Clone)]
pub(crate) enum Token {
    Text(String),
    Tag(Tag),
}

enum Item<'a> {
    Text {
        text: Cow<'a, str>,
        start: usize,
        end: usize,
    },
    Tag {
        raw: RawTag<'a>,
        tag: Tag,
    },
}

impl Item<'_> {
    fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Tag { .. } => None,
        }
    }
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c == ' ' || c == '\t' || c == '\r')
}

/// Strips `else` off the inner text of `{{else}}` and `{{else if x}}`
fn strip_else(inner: &str) -> Option<&str> {
    let rest = inner.strip_prefix("else")?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then(|| rest.trim_start())
}

fn first_word(inner: &str) -> String {
    inner.split_whitespace().next().unwrap_or_default().to_string()
}

/// Classifies a tag and parses its expressions
fn classify(raw: &RawTag<'_>, state: &mut CompileState<'_>) -> Tag {
    let mut parser = ExprParser::new(state, raw.source, raw.line);
    let inner = raw.inner;
    let (kind, parsed) = match (raw.braces, raw.op) {
        (2, _) => {
            let kind = TagKind::RawBlock {
                body: raw.raw_body.unwrap_or_default().to_string(),
            };
            let parsed = Parsed {
                head: inner.to_string(),
                ..Parsed::default()
            };
            (kind, Ok(parsed))
        }
        (1, _) | (_, "&") => (TagKind::Variable { raw: true }, parser.parse_tag(inner)),
        (_, "#") => (TagKind::Open, parser.parse_tag(inner)),
        (_, "^") if inner.is_empty() => (TagKind::Else { chained: false }, Ok(Parsed::default())),
        (_, "^") => (TagKind::OpenInverse, parser.parse_tag(inner)),
        (_, "/") => {
            let parsed = Parsed {
                head: inner.to_string(),
                ..Parsed::default()
            };
            (TagKind::Close, Ok(parsed))
        }
        (_, "!") => (TagKind::Comment, Ok(Parsed::default())),
        (_, ">" | "#>") => {
            let fallback = PartialName::Static(first_word(inner));
            let (name, parsed) = match parser.parse_partial(inner) {
                Ok((name, parsed)) => (name, Ok(parsed)),
                Err(err) => (fallback, Err(err)),
            };
            let kind = if raw.op == ">" {
                TagKind::Partial { name }
            } else {
                TagKind::PartialBlock { name }
            };
            (kind, parsed)
        }
        (_, "#*") => {
            let parsed = parser.parse_tag(inner);
            let name = match &parsed {
                Ok(Parsed { head, params, .. }) if head == "inline" => match params.first() {
                    Some(Expr::Literal {
                        value: Literal::String(name),
                        ..
                    }) => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            };
            match name {
                Some(name) => (TagKind::Inline { name }, parsed),
                None => {
                    let err = ParseError::arguments(
                        "only {{#*inline \"name\"}} decorators are supported",
                        raw.source,
                        raw.line,
                    );
                    let parsed = parsed.and(Err(err));
                    (TagKind::Inline { name: String::new() }, parsed)
                }
            }
        }
        _ => match strip_else(inner) {
            Some(rest) => (
                TagKind::Else {
                    chained: !rest.is_empty(),
                },
                parser.parse_tag(rest),
            ),
            None => (TagKind::Variable { raw: false }, parser.parse_tag(inner)),
        },
    };

    let parsed = parsed.unwrap_or_else(|err| {
        state.error(err);
        Parsed {
            head: first_word(inner),
            ..Parsed::default()
        }
    });

    let usage = &mut state.usage;
    match &kind {
        TagKind::Variable { .. } => usage.variables += 1,
        TagKind::Open | TagKind::OpenInverse => usage.sections += 1,
        TagKind::Else { chained } => {
            usage.else_branches += 1;
            if *chained {
                usage.sections += 1;
            }
        }
        TagKind::Comment => usage.comments += 1,
        TagKind::Partial { name } | TagKind::PartialBlock { name } => {
            usage.partials += 1;
            if matches!(name, PartialName::Dynamic(_)) {
                usage.dynamic_partials += 1;
            }
            if matches!(kind, TagKind::PartialBlock { .. }) {
                usage.partial_blocks += 1;
            }
        }
        TagKind::Inline { .. } => usage.inline_partials += 1,
        TagKind::RawBlock { .. } => usage.raw_blocks += 1,
        TagKind::Close => (),
    }

    Tag {
        kind,
        parsed,
        source: raw.source.to_string(),
        line: raw.line,
        indent: String::new(),
    }
}

/// Removes the whitespace around standalone tags
fn trim_standalone(items: &mut [Item<'_>], prevent_indent: bool) {
    let len = items.len();
    for i in 0..len {
        let Item::Tag { tag, .. } = &items[i] else {
            continue;
        };
        if !tag.kind.may_stand_alone() {
            continue;
        }
        let alone_before = i == 0
            || items[i - 1].text().is_some_and(|text| {
                let line = text.rfind('\n').map_or(text, |p| &text[p + 1..]);
                is_blank(line) && (text.contains('\n') || i == 1)
            });
        let alone_after = i + 1 == len
            || items[i + 1].text().is_some_and(|text| {
                let line = text.find('\n').map_or(text, |p| &text[..p]);
                is_blank(line) && (text.contains('\n') || i + 2 == len)
            });
        if !(alone_before && alone_after) {
            continue;
        }

        let is_partial = matches!(tag.kind, TagKind::Partial { .. });
        let mut indent = String::new();
        if i > 0 {
            if let Item::Text { text, end, .. } = &mut items[i - 1] {
                let cut = text.rfind('\n').map_or(0, |p| p + 1);
                if is_partial {
                    indent = text[cut..].to_string();
                }
                if !(is_partial && prevent_indent) {
                    *end = (*end).min(cut);
                }
            }
        }
        if let Some(Item::Text { text, start, .. }) = items.get_mut(i + 1) {
            let cut = text.find('\n').map_or(text.len(), |p| p + 1);
            *start = (*start).max(cut);
        }
        if is_partial && !prevent_indent {
            if let Item::Tag { tag, .. } = &mut items[i] {
                tag.indent = indent;
            }
        }
    }
}

/// Applies `~` whitespace control
fn trim_tildes(items: &mut [Item<'_>]) {
    for i in 0..items.len() {
        let Item::Tag { raw, .. } = &items[i] else {
            continue;
        };
        let (before, after) = (raw.strip_before, raw.strip_after);
        if before && i > 0 {
            if let Item::Text { text, start, end } = &mut items[i - 1] {
                if *start < *end {
                    *end = *start + text[*start..*end].trim_end().len();
                }
            }
        }
        if after {
            if let Some(Item::Text { text, start, end }) = items.get_mut(i + 1) {
                if *start < *end {
                    *start = *end - text[*start..*end].trim_start().len();
                }
            }
        }
    }
}

struct OpenBlock {
    name: String,
    source: String,
    line: usize,
    chained: bool,
    accepts_else: bool,
}

/// Checks that block tags are balanced
fn check_blocks(tokens: &[Token], state: &mut CompileState<'_>) {
    let mut stack: Vec<OpenBlock> = Vec::new();
    for token in tokens {
        let Token::Tag(tag) = token else {
            continue;
        };
        let open = |name: &str, chained, accepts_else| OpenBlock {
            name: name.to_string(),
            source: tag.source.clone(),
            line: tag.line,
            chained,
            accepts_else,
        };
        match &tag.kind {
            TagKind::Open | TagKind::OpenInverse => stack.push(open(&tag.parsed.head, false, true)),
            TagKind::PartialBlock { name } => {
                let name = name.as_static().unwrap_or(tag.parsed.head.as_str());
                stack.push(open(name, false, false));
            }
            TagKind::Inline { .. } => stack.push(open("inline", false, false)),
            TagKind::Else { chained } => match stack.last() {
                Some(top) if top.accepts_else => {
                    if *chained {
                        stack.push(open(&tag.parsed.head, true, true));
                    }
                }
                _ => state.error(ParseError::UnexpectedElse {
                    tag: tag.source.clone(),
                    line: tag.line,
                }),
            },
            TagKind::Close => {
                while stack.last().is_some_and(|top| top.chained) {
                    stack.pop();
                }
                let name = &tag.parsed.head;
                match stack.pop() {
                    None => state.error(ParseError::UnexpectedClose {
                        tag: tag.source.clone(),
                        line: tag.line,
                    }),
                    Some(top) if &top.name == name => (),
                    Some(top) if top.name == "each" => state.warn(format!(
                        "{} on line {} closes {} opened on line {}",
                        tag.source, tag.line, top.source, top.line
                    )),
                    Some(top) => state.error(ParseError::MismatchedBlock {
                        found: tag.source.clone(),
                        expected: top.source,
                        line: tag.line,
                    }),
                }
            }
            _ => (),
        }
    }
    for top in stack.into_iter().filter(|top| !top.chained) {
        state.error(ParseError::UnclosedBlock {
            tag: top.source,
            line: top.line,
        });
    }
}

/// Scans, classifies and trims a whole template
pub(crate) fn validate(src: &str, state: &mut CompileState<'_>) -> Vec<Token> {
    let options = state.options;
    let mut items = Vec::new();
    for piece in Scanner::new(src, &options.delimiters.open, &options.delimiters.close) {
        match piece {
            Ok(Piece::Text(text)) => items.push(Item::Text {
                start: 0,
                end: text.len(),
                text,
            }),
            Ok(Piece::Tag(raw)) => {
                let tag = classify(&raw, state);
                items.push(Item::Tag { raw, tag });
            }
            Err(err) => state.error(err),
        }
    }

    if !options.ignore_standalone {
        trim_standalone(&mut items, options.prevent_indent);
    }
    trim_tildes(&mut items);

    let tokens: Vec<Token> = items
        .into_iter()
        .filter_map(|item| match item {
            Item::Text { text, start, end } if start < end => {
                Some(Token::Text(text[start..end].to_string()))
            }
            Item::Text { .. } => None,
            Item::Tag { tag, .. } => Some(Token::Tag(tag)),
        })
        .collect();
    check_blocks(&tokens, state);
    tokens
}

/// Convenience for tests: the parsed head of each tag
#[cfg(test)]
fn shape(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .map(|token| match token {
            Token::Text(text) => format!("{text:?}"),
            Token::Tag(tag) => format!("{:?}:{}", tag.kind, tag.parsed.head),
        })
        .collect()
}
