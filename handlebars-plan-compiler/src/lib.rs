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

//! Handlebars templates compiled to render plans
//!
//! A template is compiled once into an immutable [`Plan`] and rendered any number of times
//! against a [`Value`]:
//!
//! ```ignore
//! use handlebars_plan_compiler::{Compiler, Options, Registry, Value};
//!
//! let mut registry = Registry::new();
//! registry.register_partial("user", "{{name}} <{{email}}>");
//! let template = Compiler::new(Options::default(), &registry)
//!     .compile("{{#each users}}{{> user}}\n{{/each}}")?;
//! let out = template.render(&serde_json::json!({"users": [...]}).into())?;
//! ```
//!
//! Compilation runs a scanner, an expression parser and a structural validator over the
//! source, then builds the plan. Every diagnostic of a full pass is returned together in a
//! [`CompileError`]. Rendering interprets the plan directly.

mod block;
mod compiler;
mod error;
mod escape;
mod expression;
mod expression_tokenizer;
mod helper;
mod options;
mod plan;
mod registry;
mod runtime;
mod scanner;
mod state;
mod template;
mod validator;
mod value;

pub use compiler::Compiler;
pub use error::{CompileError, ErrorClass, HelperError, ParseError, RenderError};
pub use escape::Escape;
pub use expression::{Call, Callee, Expr, Literal, Path};
pub use helper::{BlockHelperFn, HelperFn, HelperOptions, HelperResult};
pub use options::{Delimiters, Options};
pub use plan::{HelperStyle, Node, PartialCall, PartialTarget, Plan, Section, SectionKind};
pub use registry::Registry;
pub use state::Usage;
pub use template::Template;
pub use value::{Callable, Iterable, Map, Value};

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    fn compile(registry: &Registry, src: &str) -> Template {
        Compiler::new(Options::default(), registry)
            .compile(src)
            .unwrap()
    }

    fn render(src: &str, data: serde_json::Value) -> String {
        compile(&Registry::new(), src).render(&data.into()).unwrap()
    }

    #[test]
    fn each_with_else() {
        let src = "{{#each list}}X{{else}}Y{{/each}}";
        assert_eq!(render(src, json!({"list": []})), "Y");
        assert_eq!(render("{{#each list}}{{.}}{{/each}}", json!({"list": [1, 2]})), "12");
    }

    #[test]
    fn if_zero() {
        assert_eq!(render("{{#if 0}}A{{else}}B{{/if}}", json!({})), "B");
        assert_eq!(render("{{#if 0 includeZero=true}}A{{else}}B{{/if}}", json!({})), "A");
        assert_eq!(render("{{#unless n}}A{{else}}B{{/unless}}", json!({"n": 0})), "A");
    }

    #[test]
    fn ancestor_paths() {
        assert_eq!(
            render("{{#with inner}}{{b}}{{../a}}{{/with}}", json!({"a": 1, "inner": {"b": 2}})),
            "21"
        );
        assert_eq!(render("{{#with inner}}{{@root.a}}{{/with}}", json!({"a": 1, "inner": {"b": 2}})), "1");
    }

    #[test]
    fn escaping() {
        let data = json!({"x": "<a href=\"x\">&'=`"});
        assert_eq!(render("{{x}}", data.clone()), "&lt;a href=&quot;x&quot;&gt;&amp;&#039;=`");
        assert_eq!(render("{{{x}}}|{{&x}}", data.clone()), "<a href=\"x\">&'=`|<a href=\"x\">&'=`");

        let registry = Registry::new();
        let strict = Options {
            escape: Escape::HtmlStrict,
            ..Options::default()
        };
        let out = Compiler::new(strict, &registry)
            .compile("{{x}}")
            .unwrap()
            .render(&data.clone().into())
            .unwrap();
        assert_eq!(out, "&lt;a href&#x3D;&quot;x&quot;&gt;&amp;&#x27;&#x3D;&#x60;");

        let none = Options {
            escape: Escape::None,
            ..Options::default()
        };
        let out = Compiler::new(none, &registry)
            .compile("{{x}}")
            .unwrap()
            .render(&data.into())
            .unwrap();
        assert_eq!(out, "<a href=\"x\">&'=`");
    }

    #[test]
    fn each_key_block_params() {
        assert_eq!(
            render("{{#each . as |v k|}}#{{k}}{{/each}}", json!({"a": [], "c": []})),
            "#a#c"
        );
        assert_eq!(
            render("{{#each list as |item i|}}{{i}}:{{item.n}} {{/each}}", json!({"list": [{"n": "x"}, {"n": "y"}]})),
            "0:x 1:y "
        );
    }

    #[test]
    fn standalone_lines() {
        assert_eq!(
            render("1\n2\n{{#test}}\n3\n{{/test}}\n4", json!({"test": true})),
            "1\n2\n3\n4"
        );
        assert_eq!(
            render("<ul>\n  {{#each list}}\n  <li>{{.}}</li>\n  {{/each}}\n</ul>", json!({"list": [1, 2]})),
            "<ul>\n  <li>1</li>\n  <li>2</li>\n</ul>"
        );
    }

    #[test]
    fn illegal_path_suggestion() {
        let err = Compiler::new(Options::default(), &Registry::new())
            .compile("{{a.b!c}}")
            .unwrap_err();
        match &err.errors[..] {
            [ParseError::IllegalPath { suggestion, .. }] => assert_eq!(suggestion, "a.[b!c]"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().ends_with("did you mean 'a.[b!c]'?"));
        assert_eq!(render("{{a.[b!c]}}", json!({"a": {"b!c": "ok"}})), "ok");
    }

    #[test]
    fn bad_token() {
        let err = Compiler::new(Options::default(), &Registry::new())
            .compile("{{{x}}")
            .unwrap_err();
        assert_eq!(err.errors[0].class(), ErrorClass::Lexical);
        assert!(err.to_string().contains("Do you mean {{x}} or {{{x}}}?"), "{err}");
    }

    #[test]
    fn all_diagnostics_are_reported() {
        let err = Compiler::new(Options::default(), &Registry::new())
            .compile("{{#if a}}\n{{> nope}}\n{{x.y!}}\n{{/with}}")
            .unwrap_err();
        assert_eq!(err.errors.len(), 3, "{err}");
    }

    #[test]
    fn helpers_see_a_live_context() {
        let mut registry = Registry::new();
        registry.register_helper("set", |args: &[Value], options: &mut HelperOptions<'_>| {
            if let (Some(map), [key, value]) = (options.this.as_object_mut(), args) {
                map.insert(key.render().into_owned(), value.clone());
            }
            Ok(Value::Null)
        });
        let template = compile(&registry, "{{name}}{{set \"name\" \"Bob\"}}{{name}}|{{@root.name}}");
        let out = template.render(&json!({"name": "Ann"}).into()).unwrap();
        assert_eq!(out, "AnnBob|Ann");
    }

    #[test]
    fn handlebars_style_block_helpers() {
        let mut registry = Registry::new();
        registry
            .register_helper("bold", |_: &[Value], options: &mut HelperOptions<'_>| {
                Ok(Value::safe(format!("<b>{}</b>", options.render()?)))
            })
            .register_helper("times", |args: &[Value], options: &mut HelperOptions<'_>| {
                let n = args.first().and_then(Value::as_f64).unwrap_or(0.0) as usize;
                let mut out = String::new();
                for i in 0..n {
                    let mut data = Map::new();
                    data.insert("index".to_string(), Value::from(i));
                    out.push_str(&options.render_with_data(None, data, vec![Value::from(i)])?);
                }
                Ok(Value::safe(out))
            })
            .register_helper("depth", |_: &[Value], options: &mut HelperOptions<'_>| {
                Ok(Value::from(options.contexts().len()))
            });
        let template = compile(
            &registry,
            "{{#bold}}{{name}}{{/bold}} {{#times 3 as |i|}}{{i}}{{@index}}{{/times}} {{#with inner}}{{depth}}{{/with}}",
        );
        let out = template
            .render(&json!({"name": "Ann", "inner": {"k": 1}}).into())
            .unwrap();
        assert_eq!(out, "<b>Ann</b> 001122 2");
    }

    #[test]
    fn inverse_of_block_helpers() {
        let mut registry = Registry::new();
        registry.register_helper("check", |args: &[Value], options: &mut HelperOptions<'_>| {
            let text = if args.first().is_some_and(|v| v.is_truthy(false)) {
                options.render()?
            } else {
                options.inverse()?
            };
            Ok(Value::from(text))
        });
        let template = compile(&registry, "{{#check a}}yes{{else}}no{{/check}}{{^check a}}yes{{else}}no{{/check}}");
        let out = template.render(&json!({"a": true}).into()).unwrap();
        assert_eq!(out, "yesno");
    }

    #[test]
    fn positional_block_helpers() {
        let mut registry = Registry::new();
        registry.register_block_helper("people", |this: &Value, _: &[Value], _: &Map| {
            Ok(this.get("list").cloned().unwrap_or_default())
        });
        let template = compile(&registry, "{{#people}}{{.}},{{else}}nobody{{/people}}");
        assert_eq!(template.render(&json!({"list": ["a", "b"]}).into()).unwrap(), "a,b,");
        assert_eq!(template.render(&json!({}).into()).unwrap(), "nobody");
    }

    #[test]
    fn callables_in_data() {
        let template = compile(&Registry::new(), "{{upper name}} {{greeting}}");
        let mut data = Map::new();
        data.insert("name".to_string(), Value::from("ann"));
        data.insert(
            "upper".to_string(),
            Callable::new(|args: &[Value], _: &mut HelperOptions<'_>| {
                Ok(Value::from(args[0].render().to_uppercase()))
            })
            .into(),
        );
        data.insert(
            "greeting".to_string(),
            Callable::new(|_: &[Value], _: &mut HelperOptions<'_>| Ok(Value::from("hi"))).into(),
        );
        assert_eq!(template.render(&data.into()).unwrap(), "ANN hi");
    }

    #[test]
    fn helper_failures_name_the_helper() {
        let template = compile(&Registry::new(), "{{shout name}}");
        let err = template.render(&json!({"name": "x"}).into()).unwrap_err();
        assert_eq!(err.to_string(), "missing helper 'shout'");

        let err = compile(&Registry::new(), "{{lookup}}").render(&Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "helper 'lookup' failed: lookup requires an object and a key");
    }

    #[test]
    fn lookup_helper() {
        assert_eq!(
            render(
                "{{#each ids}}{{lookup ../names @index}} {{/each}}",
                json!({"ids": [7, 8], "names": ["a", "b"]})
            ),
            "a b "
        );
    }

    #[test]
    fn strict_mode() {
        let options = Options {
            strict: true,
            ..Options::default()
        };
        let template = Compiler::new(options, &Registry::new())
            .compile("{{#if missing}}x{{/if}}{{present}}{{missing}}")
            .unwrap();
        let err = template.render(&json!({"present": 1}).into()).unwrap_err();
        assert_eq!(err.to_string(), "variable 'missing' does not exist");
    }

    #[test]
    fn partial_block_asymmetry() {
        assert_eq!(render("[{{> @partial-block}}]", json!({})), "[]");

        let mut registry = Registry::new();
        registry.register_partial("layout", "<{{> @partial-block}}>");
        let data = Value::from(json!({"x": 1}));
        let out = compile(&registry, "{{#> layout}}body {{x}}{{/layout}}").render(&data);
        assert_eq!(out.unwrap(), "<body 1>");

        let err = compile(&registry, "{{#> layout}}{{> @partial-block}}{{/layout}}")
            .render(&data)
            .unwrap_err();
        assert_eq!(err.to_string(), "partial '@partial-block' could not be found");
    }

    #[test]
    fn nested_partial_blocks() {
        let mut registry = Registry::new();
        registry
            .register_partial("outer", "O({{#> inner}}{{> @partial-block}}{{/inner}})")
            .register_partial("inner", "I({{> @partial-block}})");
        let out = compile(&registry, "{{#> outer}}body{{/outer}}").render(&Value::Null);
        assert_eq!(out.unwrap(), "O(I(body))");
    }

    #[test]
    fn partial_indentation() {
        let mut registry = Registry::new();
        registry
            .register_partial("item", "a\nb\n")
            .register_partial("nested", "n:\n  {{> item}}\n");
        let template = compile(&registry, "list:\n  {{> item}}\nend");
        assert_eq!(template.render(&Value::Null).unwrap(), "list:\n  a\n  b\nend");

        let template = compile(&registry, "  {{> nested}}\n");
        assert_eq!(template.render(&Value::Null).unwrap(), "  n:\n    a\n    b\n");

        let options = Options {
            prevent_indent: true,
            ..Options::default()
        };
        let template = Compiler::new(options, &registry)
            .compile("list:\n  {{> item}}\nend")
            .unwrap();
        assert_eq!(template.render(&Value::Null).unwrap(), "list:\n  a\nb\nend");
    }

    #[test]
    fn inline_partials() {
        assert_eq!(
            render(
                "{{#*inline \"row\"}}<{{.}}>{{/inline}}{{#each list}}{{> row}}{{/each}}",
                json!({"list": [1, 2]})
            ),
            "<1><2>"
        );
    }

    #[test]
    fn partial_blocks_share_their_inline_partials() {
        let mut registry = Registry::new();
        registry.register_partial("layout", "<{{> content}}>");
        let src = "{{#> layout}}{{#*inline \"content\"}}C{{/inline}}{{/layout}}";
        assert_eq!(compile(&registry, src).render(&Value::Null).unwrap(), "<C>");

        let options = Options {
            runtime_partials: true,
            ..Options::default()
        };
        let template = Compiler::new(options, &registry).compile(src).unwrap();
        assert_eq!(template.render(&Value::Null).unwrap(), "<C>");
    }

    #[test]
    fn else_if_chains() {
        let src = "{{#if a}}A{{else if b}}B{{else}}C{{/if}}";
        assert_eq!(render(src, json!({"a": true})), "A");
        assert_eq!(render(src, json!({"b": true})), "B");
        assert_eq!(render(src, json!({})), "C");
    }

    #[test]
    fn raw_blocks() {
        assert_eq!(render("{{{{raw}}}}{{x}}{{{{/raw}}}}", json!({"x": 1})), "{{x}}");

        let mut registry = Registry::new();
        registry.register_helper("raw", |_: &[Value], options: &mut HelperOptions<'_>| {
            Ok(Value::safe(format!("[{}]", options.render()?)))
        });
        let out = compile(&registry, "{{{{raw}}}}{{x}}{{{{/raw}}}}").render(&Value::Null);
        assert_eq!(out.unwrap(), "[{{x}}]");
    }

    #[test]
    fn backslash_escapes() {
        assert_eq!(render(r"\{{x}} {{x}}", json!({"x": 1})), "{{x}} 1");
    }

    #[test]
    fn comments_render_nothing() {
        assert_eq!(render("a{{! note }}b{{!-- {{x}} --}}c", json!({})), "abc");
    }

    #[test]
    fn whitespace_control() {
        assert_eq!(render("a  {{~x~}}  b", json!({"x": "-"})), "a-b");
    }

    #[test]
    fn custom_delimiters() {
        let options = Options {
            delimiters: Delimiters {
                open: "<%".to_string(),
                close: "%>".to_string(),
            },
            ..Options::default()
        };
        let template = Compiler::new(options, &Registry::new())
            .compile("{{x}} <%x%>")
            .unwrap();
        assert_eq!(template.render(&json!({"x": 1}).into()).unwrap(), "{{x}} 1");
    }

    #[test]
    fn templates_are_shared_between_threads() {
        let template = std::sync::Arc::new(compile(&Registry::new(), "{{n}}"));
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let template = template.clone();
                std::thread::spawn(move || template.render(&json!({ "n": n }).into()).unwrap())
            })
            .collect();
        let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outputs, ["0", "1", "2", "3"]);
    }

    #[test]
    fn warnings_are_kept() {
        let template = compile(&Registry::new(), "{{#each a}}{{/list}}{{x k=1 k=2}}");
        assert_eq!(template.warnings().len(), 2);
    }

    #[traced_test]
    #[test]
    fn log_helper() {
        let out = render("{{log \"hello\" name level=\"warn\"}}", json!({"name": "Ann"}));
        assert_eq!(out, "");
        assert!(logs_contain("hello Ann"));
    }
}
