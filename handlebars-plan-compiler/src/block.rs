//! Builtin block compilation
//!
//! The builtin blocks are looked up by name in a [`BlockMap`] of factories, each turning the
//! arguments of its opening tag into a section kind:
//!
//! - `{{#if value}}...{{/if}}` and `{{#unless value}}...{{/unless}}` test truthiness, with
//!   `includeZero=true` counting `0` as true
//! - `{{#with value}}...{{/with}}` changes the context
//! - `{{#each items}}...{{/each}}` iterates lists, maps and iterables, the current context
//!   when no argument is given
//!
//! Every one of them accepts an `{{else}}` branch.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::{
    error::ParseError,
    expression::{Expr, Literal},
    plan::SectionKind,
    state::CompileState,
    validator::Tag,
};

/// Arguments of an opening tag
pub(crate) struct BlockArgs<'t> {
    pub tag: &'t Tag,
    pub params: Vec<Expr>,
    pub hash: IndexMap<String, Expr>,
}

impl BlockArgs<'_> {
    /// Records a diagnostic when the argument count or named arguments are wrong
    fn check(&self, label: &str, min: usize, max: usize, allowed: &[&str], state: &mut CompileState<'_>) {
        let (tag, line) = (self.tag.source.as_str(), self.tag.line);
        if self.params.is_empty() && min > 0 {
            match self.hash.keys().next() {
                Some(name) => state.error(ParseError::NamedArgument {
                    name: name.clone(),
                    tag: tag.to_string(),
                    line,
                }),
                None => state.error(ParseError::arguments(
                    format!("`{label}` expects exactly {min} argument"),
                    tag,
                    line,
                )),
            }
            return;
        }
        if self.params.len() < min || self.params.len() > max {
            let message = if min == max {
                format!("`{label}` expects exactly {min} argument")
            } else {
                format!("`{label}` expects at most {max} argument")
            };
            state.error(ParseError::arguments(message, tag, line));
        }
        for name in self.hash.keys().filter(|name| !allowed.contains(&name.as_str())) {
            state.error(ParseError::NamedArgument {
                name: name.clone(),
                tag: tag.to_string(),
                line,
            });
        }
    }

    fn subject(&mut self) -> Expr {
        if self.params.is_empty() {
            Expr::Literal {
                value: Literal::Null,
                source: "null".to_string(),
            }
        } else {
            self.params.remove(0)
        }
    }
}

/// Trait for creating builtin sections
pub(crate) trait BlockFactory: Send + Sync {
    fn open(&self, args: BlockArgs<'_>, state: &mut CompileState<'_>) -> SectionKind;
}

pub(crate) type BlockMap = HashMap<&'static str, &'static dyn BlockFactory>;

/// Factory for if and unless blocks
struct IfOrUnless {
    label: &'static str,
    negate: bool,
}

impl BlockFactory for IfOrUnless {
    fn open(&self, mut args: BlockArgs<'_>, state: &mut CompileState<'_>) -> SectionKind {
        args.check(self.label, 1, 1, &["includeZero"], state);
        SectionKind::If {
            subject: args.subject(),
            include_zero: args.hash.shift_remove("includeZero"),
            negate: self.negate,
        }
    }
}

/// Factory for with blocks
struct WithFty {}

impl BlockFactory for WithFty {
    fn open(&self, mut args: BlockArgs<'_>, state: &mut CompileState<'_>) -> SectionKind {
        args.check("with", 1, 1, &[], state);
        SectionKind::With {
            subject: args.subject(),
        }
    }
}

/// Factory for each blocks
struct EachFty {}

impl BlockFactory for EachFty {
    fn open(&self, mut args: BlockArgs<'_>, state: &mut CompileState<'_>) -> SectionKind {
        args.check("each", 0, 1, &[], state);
        let subject = if args.params.is_empty() {
            Expr::this()
        } else {
            args.subject()
        };
        SectionKind::Each { subject }
    }
}

/// Adds the builtin blocks to a block map
pub(crate) fn add_builtins(block_map: &mut BlockMap) {
    block_map.insert(
        "if",
        &IfOrUnless {
            label: "if",
            negate: false,
        },
    );
    block_map.insert(
        "unless",
        &IfOrUnless {
            label: "unless",
            negate: true,
        },
    );
    block_map.insert("with", &WithFty {});
    block_map.insert("each", &EachFty {});
}

pub(crate) static BUILTINS: Lazy<BlockMap> = Lazy::new(|| {
    let mut block_map = BlockMap::new();
    add_builtins(&mut block_map);
    block_map
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        options::Options,
        registry::Registry,
        validator::{Token, validate},
    };

    fn open(src: &str) -> (SectionKind, Vec<ParseError>) {
        let options = Options::default();
        let registry = Registry::new();
        let mut state = CompileState::new(&options, &registry);
        let tokens = validate(src, &mut state);
        let Some(Token::Tag(tag)) = tokens.first() else {
            panic!("no tag");
        };
        let args = BlockArgs {
            tag,
            params: tag.parsed.params.clone(),
            hash: tag.parsed.hash.clone(),
        };
        let kind = BUILTINS[tag.parsed.head.as_str()].open(args, &mut state);
        (kind, state.errors)
    }

    #[test]
    fn if_with_include_zero() {
        let (kind, errors) = open("{{#if n includeZero=true}}{{/if}}");
        assert!(errors.is_empty());
        let SectionKind::If {
            include_zero,
            negate,
            ..
        } = kind
        else {
            panic!("not an if");
        };
        assert!(include_zero.is_some());
        assert!(!negate);
    }

    #[test]
    fn named_argument_instead_of_value() {
        let (_, errors) = open("{{#if includeZero=true}}{{/if}}");
        assert_eq!(
            errors,
            [ParseError::NamedArgument {
                name: "includeZero".to_string(),
                tag: "{{#if includeZero=true}}".to_string(),
                line: 1,
            }]
        );
    }

    #[test]
    fn argument_counts() {
        let (_, errors) = open("{{#with a b}}{{/with}}");
        assert_eq!(errors[0].to_string(), "`with` expects exactly 1 argument in {{#with a b}} on line 1");
        let (kind, errors) = open("{{#each}}{{/each}}");
        assert!(errors.is_empty());
        assert_eq!(kind, SectionKind::Each { subject: Expr::this() });
    }

    #[test]
    fn unknown_named_arguments() {
        let (_, errors) = open("{{#unless a limit=2}}{{/unless}}");
        assert!(matches!(&errors[..], [ParseError::NamedArgument { name, .. }] if name == "limit"));
    }
}
