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

//! Error handling for the Handlebars compiler and runtime
//!
//! Compile-time problems are reported as [`ParseError`] values. The compiler never stops at
//! the first one: every diagnostic found during a full pass is collected into a single
//! [`CompileError`]. Render-time failures abort the render call and surface as
//! [`RenderError`].

use thiserror::Error;

/// Returns the last 32 characters of a string for error context
pub(crate) fn rcap(src: &str) -> &str {
    static CAP_AT: usize = 32;

    if src.len() > CAP_AT {
        let mut start = src.len() - CAP_AT;
        while !src.is_char_boundary(start) {
            start += 1;
        }
        &src[start..]
    } else {
        src
    }
}

/// Broad family a compile diagnostic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed delimiters, unterminated quotes, brackets or subexpressions
    Lexical,
    /// Unbalanced or misplaced block tags
    Structural,
    /// Unknown helpers, illegal paths, recursive or missing partials
    Semantic,
}

/// A single compile diagnostic
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Bad token {found} on line {line}! Do you mean {suggestion}?")]
    BadToken {
        found: String,
        suggestion: String,
        line: usize,
    },

    #[error("unclosed tag near \"{near}\" on line {line}")]
    UnclosedTag { near: String, line: usize },

    #[error("unterminated {construct} in {tag} on line {line}")]
    Unterminated {
        construct: &'static str,
        tag: String,
        line: usize,
    },

    #[error("unclosed block {tag} opened on line {line}")]
    UnclosedBlock { tag: String, line: usize },

    #[error("unexpected {found} on line {line}: {expected} is not closed")]
    MismatchedBlock {
        found: String,
        expected: String,
        line: usize,
    },

    #[error("unexpected {tag} on line {line}: no block is open")]
    UnexpectedClose { tag: String, line: usize },

    #[error("{tag} on line {line} is only valid inside if, unless, each, with or a block helper")]
    UnexpectedElse { tag: String, line: usize },

    #[error("missing helper '{name}' in {tag} on line {line}")]
    MissingHelper {
        name: String,
        tag: String,
        line: usize,
    },

    #[error(
        "wrong variable naming as '{path}' in {tag} on line {line}! You should wrap ! \" # % & ' * + , ; < = > {{ | }} ~ into [ ], did you mean '{suggestion}'?"
    )]
    IllegalPath {
        path: String,
        suggestion: String,
        tag: String,
        line: usize,
    },

    #[error("'{path}' in {tag} on line {line}: ../ is only allowed at the start of a path")]
    MisplacedParent {
        path: String,
        tag: String,
        line: usize,
    },

    #[error("recursive partial includes as the path: {chain}! Enable runtime partials to allow it")]
    RecursivePartial { chain: String },

    #[error("the partial '{name}' could not be found ({tag} on line {line})")]
    PartialNotFound {
        name: String,
        tag: String,
        line: usize,
    },

    #[error("named argument '{name}' is not allowed in {tag} on line {line}")]
    NamedArgument {
        name: String,
        tag: String,
        line: usize,
    },

    #[error("{message} in {tag} on line {line}")]
    Arguments {
        message: String,
        tag: String,
        line: usize,
    },

    #[error("in partial '{partial}': {error}")]
    InPartial {
        partial: String,
        error: Box<ParseError>,
    },
}

impl ParseError {
    /// Which family this diagnostic belongs to
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BadToken { .. } | Self::UnclosedTag { .. } | Self::Unterminated { .. } => {
                ErrorClass::Lexical
            }
            Self::UnclosedBlock { .. }
            | Self::MismatchedBlock { .. }
            | Self::UnexpectedClose { .. }
            | Self::UnexpectedElse { .. } => ErrorClass::Structural,
            Self::InPartial { error, .. } => error.class(),
            _ => ErrorClass::Semantic,
        }
    }

    pub(crate) fn arguments(message: impl Into<String>, tag: &str, line: usize) -> Self {
        Self::Arguments {
            message: message.into(),
            tag: tag.to_string(),
            line,
        }
    }
}

/// Result type for template parsing operations
pub type Result<T> = std::result::Result<T, ParseError>;

/// Every diagnostic collected while compiling one template
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", join_errors(.errors))]
pub struct CompileError {
    pub errors: Vec<ParseError>,
}

fn join_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Raised by helper callables; the runtime wraps it with the helper's name
#[derive(Error, Debug)]
pub enum HelperError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Render(#[from] Box<RenderError>),
}

impl From<RenderError> for HelperError {
    fn from(err: RenderError) -> Self {
        Self::Render(Box::new(err))
    }
}

impl From<&str> for HelperError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<String> for HelperError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

/// Failure while rendering a compiled template
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("partial '{0}' could not be found")]
    MissingPartial(String),

    #[error("variable '{0}' does not exist")]
    MissingVariable(String),

    #[error("missing helper '{0}'")]
    MissingHelper(String),

    #[error("helper '{name}' failed: {source}")]
    Helper {
        name: String,
        #[source]
        source: HelperError,
    },

    #[error("partial '{name}' exceeded the maximum depth of {depth}")]
    PartialDepth { name: String, depth: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rcap_keeps_short_input() {
        assert_eq!(rcap("{{#if a}}"), "{{#if a}}");
    }

    #[test]
    fn rcap_respects_char_boundaries() {
        let src = format!("{}é{}", "a".repeat(10), "b".repeat(31));
        assert_eq!(rcap(&src), "b".repeat(31));
    }

    #[test]
    fn compile_error_lists_every_diagnostic() {
        let error = CompileError {
            errors: vec![
                ParseError::UnclosedBlock {
                    tag: "{{#if a}}".to_string(),
                    line: 1,
                },
                ParseError::MissingHelper {
                    name: "upper".to_string(),
                    tag: "{{upper (shout a)}}".to_string(),
                    line: 3,
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "unclosed block {{#if a}} opened on line 1\nmissing helper 'upper' in {{upper (shout a)}} on line 3"
        );
    }

    #[test]
    fn helper_failure_names_helper() {
        let error = RenderError::Helper {
            name: "shout".to_string(),
            source: HelperError::from("no voice"),
        };
        assert_eq!(error.to_string(), "helper 'shout' failed: no voice");
    }

    #[test]
    fn classes() {
        let nested = ParseError::InPartial {
            partial: "p".to_string(),
            error: Box::new(ParseError::UnexpectedClose {
                tag: "{{/if}}".to_string(),
                line: 2,
            }),
        };
        assert_eq!(nested.class(), ErrorClass::Structural);
        assert_eq!(
            ParseError::RecursivePartial {
                chain: "p -> p".to_string()
            }
            .class(),
            ErrorClass::Semantic
        );
    }
}
