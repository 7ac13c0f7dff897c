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

//! Handlebars expression parsing
//!
//! Turns the tokens of a tag into structured expressions:
//!
//! - Paths: `name`, `person.name`, `../parent`, `@index`, `@../key`, `[with spaces].x`
//! - Literals: `12`, `-1.5e3`, `"text"`, `'text'`, `true`, `false`, `null`, `undefined`
//! - Subexpressions: `(helper arg key=value)`
//! - Hash arguments: `key=value`, `[odd key]=value`
//! - Block parameters: `as |item index|`
//!
//! Bare path segments may not contain `! " # % & ' ( ) * + , ; < = > @ [ \ ] ^ ` { | } ~`
//! or whitespace. Such names must be wrapped in brackets; the error suggests the wrapped
//! form.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::{
    error::{ParseError, Result},
    expression_tokenizer::{Token, Unterminated},
    state::CompileState,
    value::Value,
};

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?$").unwrap());

/// A variable reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Number of `../` prefixes
    pub levels: usize,
    /// `@` prefixed: resolved against special variable frames
    pub special: bool,
    pub segments: Vec<String>,
    /// The path as written
    pub source: String,
}

impl Path {
    /// The current context
    pub fn this() -> Self {
        Self {
            source: "this".to_string(),
            ..Self::default()
        }
    }

    pub fn is_this(&self) -> bool {
        self.levels == 0 && !self.special && self.segments.is_empty()
    }

    /// The name of a plain single segment path
    pub fn simple_name(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [name] if self.levels == 0 && !self.special => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// What a call invokes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    /// A registered helper
    Helper(String),
    /// A value looked up at render time, invoked when it is callable
    Path(Path),
}

/// A helper invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Expr>,
    pub hash: IndexMap<String, Expr>,
}

impl Call {
    pub fn name(&self) -> &str {
        match &self.callee {
            Callee::Helper(name) => name,
            Callee::Path(path) => &path.source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Path(Path),
    Literal { value: Literal, source: String },
    Call(Box<Call>),
}

impl Expr {
    pub fn this() -> Self {
        Self::Path(Path::this())
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// The target of `{{> name}}`
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PartialName {
    Static(String),
    Dynamic(Expr),
}

impl PartialName {
    pub fn as_static(&self) -> Option<&str> {
        match self {
            Self::Static(name) => Some(name),
            Self::Dynamic(_) => None,
        }
    }
}

/// A tag's parsed contents
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Parsed {
    /// First token as written
    pub head: String,
    pub params: Vec<Expr>,
    pub hash: IndexMap<String, Expr>,
    pub block_params: Vec<String>,
}

fn is_reserved(c: char) -> bool {
    c.is_whitespace() || "!\"#%&'()*+,;<=>@[\\]^`{|}~".contains(c)
}

fn bracketed(segment: &str) -> Option<&str> {
    segment.strip_prefix('[')?.strip_suffix(']')
}

/// Splits a path on `.` and `/` outside of brackets
fn split_segments(src: &str) -> Vec<&str> {
    if src.is_empty() {
        return Vec::new();
    }
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_bracket = false;
    for (i, c) in src.char_indices() {
        match c {
            '[' if i == start => in_bracket = true,
            ']' if in_bracket => in_bracket = false,
            '.' | '/' if !in_bracket => {
                segments.push(&src[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    segments.push(&src[start..]);
    segments
}

/// Whether `..` appears outside brackets after the leading `../` steps were taken off
fn has_parent_step(src: &str) -> bool {
    let mut in_bracket = false;
    let mut prev = None;
    for c in src.chars() {
        match c {
            '[' if !in_bracket => in_bracket = true,
            ']' if in_bracket => in_bracket = false,
            '.' if !in_bracket && prev == Some('.') => return true,
            _ => (),
        }
        prev = Some(c);
    }
    false
}

fn unquote(token: &str) -> Option<String> {
    let quote = token.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    if token.len() < 2 || !token.ends_with(quote) {
        return None;
    }
    let mut out = String::new();
    let mut chars = token[1..token.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) if next == quote || next == '\\' => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    Some(out)
}

fn parse_number(token: &str) -> Option<Number> {
    if !NUMBER.is_match(token) {
        return None;
    }
    match token.parse::<i64>() {
        Ok(n) => Some(Number::from(n)),
        Err(_) => token.parse::<f64>().ok().and_then(Number::from_f64),
    }
}

/// Splits `name=value`, where the name may be bracket quoted
fn split_hash(token: &str) -> Option<(String, &str)> {
    if token.starts_with(['"', '\'', '(']) {
        return None;
    }
    let mut in_bracket = false;
    for (i, c) in token.char_indices() {
        match c {
            '[' => in_bracket = true,
            ']' => in_bracket = false,
            '=' if !in_bracket && i > 0 => {
                let name = &token[..i];
                let name = bracketed(name).unwrap_or(name);
                return Some((name.to_string(), &token[i + 1..]));
            }
            '(' | '"' | '\'' if !in_bracket => return None,
            _ => (),
        }
    }
    None
}

/// Parses the expressions of one tag, reporting against that tag
pub(crate) struct ExprParser<'s, 'r> {
    state: &'s mut CompileState<'r>,
    tag: &'s str,
    line: usize,
}

impl<'s, 'r> ExprParser<'s, 'r> {
    pub fn new(state: &'s mut CompileState<'r>, tag: &'s str, line: usize) -> Self {
        Self { state, tag, line }
    }

    fn unterminated(&self, construct: Unterminated) -> ParseError {
        ParseError::Unterminated {
            construct,
            tag: self.tag.to_string(),
            line: self.line,
        }
    }

    /// Tokenizes `inner`, pulling out any `as |a b|` block parameters
    fn split<'a>(&self, inner: &'a str) -> Result<(Vec<&'a str>, Vec<String>)> {
        let mut tokens = Vec::new();
        let mut block_params = Vec::new();
        let mut token = Token::first(inner).map_err(|c| self.unterminated(c))?;
        while let Some(current) = token {
            if current.value == "as" {
                if let Some((names, tail)) =
                    current.block_params().map_err(|c| self.unterminated(c))?
                {
                    block_params = names.into_iter().map(str::to_string).collect();
                    token = Token::first(tail).map_err(|c| self.unterminated(c))?;
                    continue;
                }
            }
            tokens.push(current.value);
            token = current.next().map_err(|c| self.unterminated(c))?;
        }
        Ok((tokens, block_params))
    }

    /// Parses `head params... hash... as |params|`
    pub fn parse_tag(&mut self, inner: &str) -> Result<Parsed> {
        let (tokens, block_params) = self.split(inner)?;
        let Some((head, rest)) = tokens.split_first() else {
            return Ok(Parsed::default());
        };
        let (params, hash) = self.parse_args(rest)?;
        if !block_params.is_empty() {
            self.state.usage.block_params += 1;
        }
        Ok(Parsed {
            head: head.to_string(),
            params,
            hash,
            block_params,
        })
    }

    /// Parses `name context hash...` of a partial tag
    pub fn parse_partial(&mut self, inner: &str) -> Result<(PartialName, Parsed)> {
        let mut parsed = self.parse_tag(inner)?;
        let head = parsed.head.as_str();
        let name = if head.starts_with('(') {
            PartialName::Dynamic(self.parse_expr(head)?)
        } else if let Some(name) = unquote(head) {
            PartialName::Static(name)
        } else {
            PartialName::Static(bracketed(head).unwrap_or(head).to_string())
        };
        if let PartialName::Static(name) = &name {
            parsed.head = name.clone();
        }
        Ok((name, parsed))
    }

    fn parse_args(&mut self, tokens: &[&str]) -> Result<(Vec<Expr>, IndexMap<String, Expr>)> {
        let mut params = Vec::new();
        let mut hash = IndexMap::new();
        for token in tokens {
            match split_hash(token) {
                Some((name, value)) => {
                    let value = self.parse_expr(value)?;
                    if hash.insert(name.clone(), value).is_some() {
                        self.state.warn(format!(
                            "duplicate named argument '{name}' in {} on line {}, the last value wins",
                            self.tag, self.line
                        ));
                    }
                }
                None => params.push(self.parse_expr(token)?),
            }
        }
        Ok((params, hash))
    }

    /// Classifies a single token
    pub fn parse_expr(&mut self, token: &str) -> Result<Expr> {
        let literal = |value| {
            Ok(Expr::Literal {
                value,
                source: token.to_string(),
            })
        };
        if let Some(number) = parse_number(token) {
            return literal(Literal::Number(number));
        }
        if let Some(text) = unquote(token) {
            return literal(Literal::String(text));
        }
        match token {
            "true" => return literal(Literal::Bool(true)),
            "false" => return literal(Literal::Bool(false)),
            "null" | "undefined" => return literal(Literal::Null),
            _ => (),
        }
        if token.starts_with('(') && token.ends_with(')') {
            return self.parse_call(&token[1..token.len() - 1]);
        }
        self.parse_path(token).map(Expr::Path)
    }

    fn parse_call(&mut self, inner: &str) -> Result<Expr> {
        let (tokens, _) = self.split(inner)?;
        let Some((head, rest)) = tokens.split_first() else {
            return Err(ParseError::arguments("empty subexpression", self.tag, self.line));
        };
        let (args, hash) = self.parse_args(rest)?;
        self.state.usage.subexpressions += 1;
        let callee = if self.state.registry.has_helper(head) {
            self.state.usage.helpers += 1;
            Callee::Helper(head.to_string())
        } else {
            let path = self.parse_path(head)?;
            if path.simple_name().is_some() && !(args.is_empty() && hash.is_empty()) {
                self.state.error(ParseError::MissingHelper {
                    name: head.to_string(),
                    tag: self.tag.to_string(),
                    line: self.line,
                });
            }
            Callee::Path(path)
        };
        Ok(Expr::Call(Box::new(Call { callee, args, hash })))
    }

    pub fn parse_path(&mut self, token: &str) -> Result<Path> {
        let mut path = Path {
            source: token.to_string(),
            ..Path::default()
        };
        let mut rest = token;
        if let Some(tail) = rest.strip_prefix('@') {
            path.special = true;
            rest = tail;
        }
        loop {
            if let Some(tail) = rest.strip_prefix("../") {
                path.levels += 1;
                rest = tail;
            } else if rest == ".." {
                path.levels += 1;
                rest = "";
            } else if let Some(tail) = rest.strip_prefix("./") {
                rest = tail;
            } else if let Some(tail) = rest
                .strip_prefix("this.")
                .or_else(|| rest.strip_prefix("this/"))
            {
                rest = tail;
            } else {
                break;
            }
        }
        if rest == "this" || rest == "." {
            rest = "";
        }
        let prefix = &token[..token.len() - rest.len()];
        if has_parent_step(rest) {
            return Err(ParseError::MisplacedParent {
                path: token.to_string(),
                tag: self.tag.to_string(),
                line: self.line,
            });
        }

        let segments = split_segments(rest);
        let mut illegal = false;
        for segment in &segments {
            if let Some(name) = bracketed(segment) {
                path.segments.push(name.to_string());
            } else if segment.is_empty() || segment.contains(is_reserved) {
                illegal = true;
            } else {
                path.segments.push(segment.to_string());
            }
        }
        if illegal {
            let suggestion = segments
                .iter()
                .filter(|segment| !segment.is_empty())
                .map(|segment| match bracketed(segment) {
                    None if segment.contains(is_reserved) => format!("[{segment}]"),
                    _ => segment.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".");
            return Err(ParseError::IllegalPath {
                path: token.to_string(),
                suggestion: format!("{prefix}{suggestion}"),
                tag: self.tag.to_string(),
                line: self.line,
            });
        }

        if path.levels > 0 {
            self.state.usage.parent_paths += 1;
        }
        if path.special {
            if path.segments.first().is_some_and(|s| s == "root") {
                self.state.usage.root_paths += 1;
            } else {
                self.state.usage.special_vars += 1;
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{options::Options, registry::Registry};

    fn with_parser<T>(f: impl FnOnce(&mut ExprParser) -> T) -> (T, Vec<ParseError>) {
        let options = Options::default();
        let registry = Registry::new();
        let mut state = CompileState::new(&options, &registry);
        let result = f(&mut ExprParser::new(&mut state, "{{tag}}", 3));
        (result, state.errors)
    }

    fn path(token: &str) -> Result<Path> {
        with_parser(|parser| parser.parse_path(token)).0
    }

    #[test]
    fn paths() {
        let p = path("../../person.[first name]/age").unwrap();
        assert_eq!(p.levels, 2);
        assert!(!p.special);
        assert_eq!(p.segments, ["person", "first name", "age"]);

        let p = path("@../index").unwrap();
        assert!(p.special);
        assert_eq!(p.levels, 1);
        assert_eq!(p.segments, ["index"]);

        assert!(path("this").unwrap().is_this());
        assert!(path(".").unwrap().is_this());
        assert_eq!(path("./name").unwrap().segments, ["name"]);
        assert_eq!(path("this.name").unwrap().simple_name(), Some("name"));
    }

    #[test]
    fn illegal_paths_suggest_brackets() {
        let err = path("a.b!c").unwrap_err();
        assert_eq!(
            err,
            ParseError::IllegalPath {
                path: "a.b!c".to_string(),
                suggestion: "a.[b!c]".to_string(),
                tag: "{{tag}}".to_string(),
                line: 3,
            }
        );
        assert!(err.to_string().ends_with("did you mean 'a.[b!c]'?"));

        match path("../foo=bar.x").unwrap_err() {
            ParseError::IllegalPath { suggestion, .. } => assert_eq!(suggestion, "../[foo=bar].x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parent_steps_only_lead_a_path() {
        let err = path("a/../b").unwrap_err();
        assert_eq!(
            err,
            ParseError::MisplacedParent {
                path: "a/../b".to_string(),
                tag: "{{tag}}".to_string(),
                line: 3,
            }
        );
        assert_eq!(
            err.to_string(),
            "'a/../b' in {{tag}} on line 3: ../ is only allowed at the start of a path"
        );
        assert!(path("a.[..].b").is_ok());
        assert_eq!(path("../../a").unwrap().levels, 2);
    }

    #[test]
    fn literals() {
        let (exprs, _) = with_parser(|parser| {
            ["12", "-1.5", "2e3", "\"a \\\"b\\\"\"", "'c'", "true", "null", "undefined"]
                .iter()
                .map(|t| parser.parse_expr(t).unwrap())
                .collect::<Vec<_>>()
        });
        let values: Vec<_> = exprs
            .iter()
            .map(|e| match e {
                Expr::Literal { value, .. } => value.to_value(),
                other => panic!("not a literal {other:?}"),
            })
            .collect();
        assert_eq!(
            values,
            [
                Value::from(json!(12)),
                Value::from(json!(-1.5)),
                Value::from(json!(2000.0)),
                Value::from("a \"b\""),
                Value::from("c"),
                Value::from(true),
                Value::Null,
                Value::Null
            ]
        );
    }

    #[test]
    fn tag_with_hash_and_block_params() {
        let (parsed, errors) = with_parser(|parser| {
            parser
                .parse_tag("each items [sort key]=name limit=3 as |item i|")
                .unwrap()
        });
        assert!(errors.is_empty());
        assert_eq!(parsed.head, "each");
        assert_eq!(parsed.params.len(), 1);
        assert_eq!(parsed.hash.keys().collect::<Vec<_>>(), ["sort key", "limit"]);
        assert_eq!(parsed.block_params, ["item", "i"]);
    }

    #[test]
    fn duplicate_hash_keys_keep_the_last() {
        let options = Options::default();
        let registry = Registry::new();
        let mut state = CompileState::new(&options, &registry);
        let parsed = ExprParser::new(&mut state, "{{x}}", 1)
            .parse_tag("x a=1 a=2")
            .unwrap();
        assert_eq!(parsed.hash.len(), 1);
        assert!(matches!(
            &parsed.hash["a"],
            Expr::Literal { source, .. } if source == "2"
        ));
        assert_eq!(state.warnings.len(), 1);
    }

    #[test]
    fn subexpressions() {
        let (expr, errors) = with_parser(|parser| parser.parse_expr("(lookup . (name))").unwrap());
        assert!(errors.is_empty());
        let Expr::Call(call) = expr else {
            panic!("not a call");
        };
        assert_eq!(call.callee, Callee::Helper("lookup".to_string()));
        assert!(matches!(&call.args[1], Expr::Call(inner) if inner.name() == "name"));
    }

    #[test]
    fn unregistered_subexpression_helper() {
        let (_, errors) = with_parser(|parser| parser.parse_expr("(shout name)").unwrap());
        assert_eq!(
            errors,
            [ParseError::MissingHelper {
                name: "shout".to_string(),
                tag: "{{tag}}".to_string(),
                line: 3,
            }]
        );
    }

    #[test]
    fn unterminated() {
        let (err, _) = with_parser(|parser| parser.parse_tag("if (eq a \"b)").unwrap_err());
        assert_eq!(err.to_string(), "unterminated string literal in {{tag}} on line 3");
    }

    #[test]
    fn partial_names() {
        let (names, _) = with_parser(|parser| {
            ["foo/bar ctx", "'my partial'", "[odd name]", "(which) a=1", "@partial-block"]
                .iter()
                .map(|inner| parser.parse_partial(inner).unwrap().0)
                .collect::<Vec<_>>()
        });
        assert_eq!(names[0], PartialName::Static("foo/bar".to_string()));
        assert_eq!(names[1], PartialName::Static("my partial".to_string()));
        assert_eq!(names[2], PartialName::Static("odd name".to_string()));
        assert!(matches!(names[3], PartialName::Dynamic(Expr::Call(_))));
        assert_eq!(names[4], PartialName::Static("@partial-block".to_string()));
    }
}
