//! HTML entity encoding for interpolated values

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// How interpolated text is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escape {
    /// Output verbatim
    None,
    /// `& < > " '`
    #[default]
    Html,
    /// `& < > " '` plus `` ` `` and `=`, matching handlebars.js
    HtmlStrict,
}

static HTML: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[&<>"']"#).unwrap());
static HTML_STRICT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[&<>"'`=]"#).unwrap());

impl Escape {
    pub fn apply<'a>(&self, content: &'a str) -> Cow<'a, str> {
        match self {
            Escape::None => Cow::Borrowed(content),
            Escape::Html => HTML.replace_all(content, |captures: &Captures| {
                match &captures[0] {
                    "&" => "&amp;",
                    "<" => "&lt;",
                    ">" => "&gt;",
                    "\"" => "&quot;",
                    _ => "&#039;",
                }
            }),
            Escape::HtmlStrict => HTML_STRICT.replace_all(content, |captures: &Captures| {
                match &captures[0] {
                    "&" => "&amp;",
                    "<" => "&lt;",
                    ">" => "&gt;",
                    "\"" => "&quot;",
                    "'" => "&#x27;",
                    "`" => "&#x60;",
                    _ => "&#x3D;",
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html() {
        assert_eq!(
            Escape::Html.apply(r#"<a href="x">Tom & 'Jerry' = `cat`</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#039;Jerry&#039; = `cat`&lt;/a&gt;"
        );
    }

    #[test]
    fn strict_also_encodes_equals_and_backtick() {
        assert_eq!(
            Escape::HtmlStrict.apply("a='b' `c`"),
            "a&#x3D;&#x27;b&#x27; &#x60;c&#x60;"
        );
    }

    #[test]
    fn none_is_verbatim() {
        let src = "<b>&amp;</b>";
        assert!(matches!(Escape::None.apply(src), Cow::Borrowed(s) if s == src));
    }
}
