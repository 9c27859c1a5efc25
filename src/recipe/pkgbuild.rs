// src/recipe/pkgbuild.rs

//! Pattern-based extraction of PKGBUILD variables and functions
//!
//! PKGBUILDs are Bash scripts, so nothing short of a shell can evaluate
//! them exactly. These helpers read the common declaration forms directly
//! from the text:
//!
//! - `name=value`, `name="value"`, `name='value'`
//! - `name=('a' "b" c)`, optionally spread over several lines
//! - `name() {` and `function name {` / `function name() {`
//!
//! Anything more dynamic (expansions, conditionals, `pkgver()` functions)
//! is taken literally or missed.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static SCALAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    // name=value or name="value" or name='value', trailing comment allowed
    Regex::new(r#"^([a-zA-Z_][a-zA-Z0-9_]*)=(?:"([^"]*)"|'([^']*)'|([^\s"'#()]*))\s*(?:#.*)?$"#)
        .expect("scalar pattern is valid")
});

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]*)"|'([^']*)'|([^\s"']+)"#).expect("token pattern is valid")
});

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    // `name() {` or `function name {` / `function name() {`
    Regex::new(
        r"(?m)^[ \t]*(?:function[ \t]+([A-Za-z_][A-Za-z0-9_@.+-]*)[ \t]*(?:\(\))?|([A-Za-z_][A-Za-z0-9_@.+-]*)[ \t]*\(\))[ \t]*\{",
    )
    .expect("function pattern is valid")
});

/// Extract top-level scalar assignments
///
/// Later assignments override earlier ones, as they would in the shell.
pub fn extract_variables(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in content.lines() {
        if let Some(caps) = SCALAR_RE.captures(line.trim()) {
            let name = caps[1].to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            vars.insert(name, value);
        }
    }

    vars
}

/// Extract the elements of an array assignment `name=(...)`
///
/// Returns `None` when the array is not declared. Elements may be quoted
/// or bare and the declaration may span several lines; comments inside
/// the parentheses are dropped.
pub fn extract_array(content: &str, name: &str) -> Option<Vec<String>> {
    let pattern = format!(r"(?m)^[ \t]*{}=\(", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let start = re.find(content)?.end();
    let body = array_body(&content[start..]);

    let values = body
        .lines()
        .map(strip_comment)
        .flat_map(|line| {
            TOKEN_RE
                .captures_iter(line)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .collect();

    Some(values)
}

/// Extract a variable that may be declared as either a scalar or an array
pub fn extract_list(content: &str, vars: &HashMap<String, String>, name: &str) -> Vec<String> {
    extract_array(content, name).unwrap_or_else(|| {
        vars.get(name)
            .filter(|v| !v.is_empty())
            .map(|v| vec![v.clone()])
            .unwrap_or_default()
    })
}

/// Names of all functions defined in the recipe, in declaration order
pub fn function_names(content: &str) -> Vec<String> {
    FUNCTION_RE
        .captures_iter(content)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Text up to the closing parenthesis that is not inside quotes
fn array_body(rest: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut in_comment = false;
    let mut prev = ' ';

    for (i, c) in rest.char_indices() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
        } else {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"') | (None, '\'') => quote = Some(c),
                (None, '#') if prev.is_whitespace() => in_comment = true,
                (None, ')') => return &rest[..i],
                _ => {}
            }
        }
        prev = c;
    }

    rest
}

/// Drop an unquoted `#` comment from a line
///
/// A `#` only starts a comment at the beginning of a word.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev = ' ';
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '#') if prev.is_whitespace() => return &line[..i],
            _ => {}
        }
        prev = c;
    }
    line
}
