//! Text-search helpers exposed to strategy scripts.
//!
//! These are the only non-language symbols a strategy can call. All of them
//! are pure functions over strings; none touch the filesystem, network,
//! process or environment.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map};

/// Compiled-size cap for script-supplied patterns.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("static markdown link pattern")
});

static HTML_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("static html link pattern")
});

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>")
        .expect("static script/style pattern")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static tag pattern"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

/// Register every helper on the given engine.
pub(crate) fn register(engine: &mut Engine) {
    engine.register_fn("regex_is_match", regex_is_match);
    engine.register_fn("regex_find_all", regex_find_all);
    engine.register_fn("regex_captures", regex_captures);
    engine.register_fn("regex_replace", regex_replace);
    engine.register_fn("markdown_links", markdown_links);
    engine.register_fn("html_links", html_links);
    engine.register_fn("strip_tags", |html: &str| strip_tags(html));
    engine.register_fn("lines", lines);
}

fn compile_pattern(pattern: &str) -> Result<Regex, Box<EvalAltResult>> {
    RegexBuilder::new(pattern)
        .size_limit(PATTERN_SIZE_LIMIT)
        .dfa_size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| format!("invalid pattern '{pattern}': {e}").into())
}

fn regex_is_match(text: &str, pattern: &str) -> Result<bool, Box<EvalAltResult>> {
    Ok(compile_pattern(pattern)?.is_match(text))
}

fn regex_find_all(text: &str, pattern: &str) -> Result<Array, Box<EvalAltResult>> {
    let re = compile_pattern(pattern)?;
    Ok(re
        .find_iter(text)
        .map(|m| Dynamic::from(m.as_str().to_string()))
        .collect())
}

/// Every match as an array of groups; group 0 is the whole match and
/// non-participating groups are empty strings.
fn regex_captures(text: &str, pattern: &str) -> Result<Array, Box<EvalAltResult>> {
    let re = compile_pattern(pattern)?;
    Ok(re
        .captures_iter(text)
        .map(|caps| {
            let groups: Array = caps
                .iter()
                .map(|g| Dynamic::from(g.map(|m| m.as_str()).unwrap_or_default().to_string()))
                .collect();
            Dynamic::from(groups)
        })
        .collect())
}

fn regex_replace(
    text: &str,
    pattern: &str,
    replacement: &str,
) -> Result<String, Box<EvalAltResult>> {
    Ok(compile_pattern(pattern)?
        .replace_all(text, replacement)
        .into_owned())
}

/// `[text](url)` links, each with the remainder of its line after the link.
fn markdown_links(text: &str) -> Array {
    let mut out = Array::new();
    for line in text.lines() {
        for caps in MARKDOWN_LINK.captures_iter(line) {
            let (Some(whole), Some(label), Some(url)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let mut map = Map::new();
            map.insert("text".into(), Dynamic::from(label.as_str().trim().to_string()));
            map.insert("url".into(), Dynamic::from(url.as_str().trim().to_string()));
            map.insert(
                "rest".into(),
                Dynamic::from(line[whole.end()..].trim().to_string()),
            );
            out.push(Dynamic::from(map));
        }
    }
    out
}

fn html_links(html: &str) -> Array {
    HTML_LINK
        .captures_iter(html)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str().trim().to_string();
            let text = strip_tags(caps.get(2)?.as_str());
            let mut map = Map::new();
            map.insert("href".into(), Dynamic::from(href));
            map.insert("text".into(), Dynamic::from(text));
            Some(Dynamic::from(map))
        })
        .collect()
}

/// Drop markup, decode the common entities and collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_code, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

fn lines(text: &str) -> Array {
    text.lines().map(|l| Dynamic::from(l.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_strings(arr: Array) -> Vec<String> {
        arr.into_iter()
            .map(|d| d.into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_regex_find_all() {
        let found = regex_find_all("a1 b22 c333", r"\d+").unwrap();
        assert_eq!(as_strings(found), vec!["1", "22", "333"]);
    }

    #[test]
    fn test_regex_captures_groups() {
        let caps = regex_captures("x=1;y=2", r"(\w)=(\d)").unwrap();
        assert_eq!(caps.len(), 2);
        let first = caps[0].clone().into_array().unwrap();
        assert_eq!(as_strings(first), vec!["x=1", "x", "1"]);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(regex_is_match("abc", "(unclosed").is_err());
    }

    #[test]
    fn test_regex_replace() {
        assert_eq!(regex_replace("a-b-c", "-", "+").unwrap(), "a+b+c");
    }

    #[test]
    fn test_markdown_links_with_rest() {
        let md = "# Title\n- [Tool A](https://a.dev) - does things\n- plain line\n";
        let links = markdown_links(md);
        assert_eq!(links.len(), 1);
        let map = links[0].clone().cast::<Map>();
        assert_eq!(map["text"].clone().into_string().unwrap(), "Tool A");
        assert_eq!(map["url"].clone().into_string().unwrap(), "https://a.dev");
        assert_eq!(map["rest"].clone().into_string().unwrap(), "- does things");
    }

    #[test]
    fn test_html_links() {
        let html = r#"<ul><li><a class="x" href="https://b.dev">Tool <b>B</b></a></li></ul>"#;
        let links = html_links(html);
        assert_eq!(links.len(), 1);
        let map = links[0].clone().cast::<Map>();
        assert_eq!(map["href"].clone().into_string().unwrap(), "https://b.dev");
        assert_eq!(map["text"].clone().into_string().unwrap(), "Tool B");
    }

    #[test]
    fn test_strip_tags() {
        let html = "<p>Hello&nbsp;<em>world</em></p><script>alert(1)</script> &amp; more";
        assert_eq!(strip_tags(html), "Hello world & more");
    }

    #[test]
    fn test_lines() {
        assert_eq!(as_strings(lines("a\nb\n")), vec!["a", "b"]);
    }
}
