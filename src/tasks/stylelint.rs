//! A small stylelint-compatible linter for Sass sources.
//!
//! Rules are read from `.stylelintrc.json` in the stylelint format. Only the
//! rules listed in [`Rule`] are understood; anything else is ignored. Most
//! rules are fixed in place, only `block-no-empty` and
//! `color-no-invalid-hex` are reported.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([0-9a-zA-Z]+)\b").expect("invalid hex color regex"));

static ZERO_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s(,:])-?0+(?:\.0+)?(?:px|r?em|ex|ch|vw|vh|vmin|vmax|cm|mm|in|pt|pc|q)\b")
        .expect("invalid zero length regex")
});

/// Start of a declaration whose value runs past the end of the line.
static PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\$?[-\w]+\s*:(?:\s|$|[#0-9"'$])"#).expect("invalid property regex")
});

static EMPTY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*\}").expect("invalid empty block regex"));

/// Contents of `.stylelintrc.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LintConfig {
    #[serde(default)]
    pub rules: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indent {
    Tab,
    Spaces(usize),
}

impl Indent {
    fn unit(self) -> String {
        match self {
            Indent::Tab => "\t".into(),
            Indent::Spaces(n) => " ".repeat(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    NoEolWhitespace,
    NoMissingEndOfSourceNewline,
    MaxEmptyLines(usize),
    ColorHexCase(Case),
    LengthZeroNoUnit,
    Indentation(Indent),
    BlockNoEmpty,
    ColorNoInvalidHex,
}

impl Rule {
    fn parse(name: &str, primary: &Value) -> Option<Self> {
        let rule = match name {
            "no-eol-whitespace" => Rule::NoEolWhitespace,
            "no-missing-end-of-source-newline" => Rule::NoMissingEndOfSourceNewline,
            "max-empty-lines" => Rule::MaxEmptyLines(primary.as_u64()? as usize),
            "color-hex-case" => Rule::ColorHexCase(match primary.as_str()? {
                "lower" => Case::Lower,
                "upper" => Case::Upper,
                _ => return None,
            }),
            "length-zero-no-unit" => Rule::LengthZeroNoUnit,
            "indentation" => Rule::Indentation(match primary {
                Value::String(s) if s == "tab" => Indent::Tab,
                Value::Number(n) => Indent::Spaces(n.as_u64()? as usize),
                _ => return None,
            }),
            "block-no-empty" => Rule::BlockNoEmpty,
            "color-no-invalid-hex" => Rule::ColorNoInvalidHex,
            _ => return None,
        };
        Some(rule)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rule::NoEolWhitespace => "no-eol-whitespace",
            Rule::NoMissingEndOfSourceNewline => "no-missing-end-of-source-newline",
            Rule::MaxEmptyLines(_) => "max-empty-lines",
            Rule::ColorHexCase(_) => "color-hex-case",
            Rule::LengthZeroNoUnit => "length-zero-no-unit",
            Rule::Indentation(_) => "indentation",
            Rule::BlockNoEmpty => "block-no-empty",
            Rule::ColorNoInvalidHex => "color-no-invalid-hex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEntry {
    pub rule: Rule,
    pub severity: Severity,
}

impl LintConfig {
    /// Enabled rules this linter understands.
    pub fn rules(&self) -> Vec<RuleEntry> {
        let mut entries = Vec::new();

        for (name, value) in &self.rules {
            let (primary, severity) = match value {
                Value::Array(items) => {
                    let primary = items.first().cloned().unwrap_or(Value::Null);
                    let severity = items
                        .get(1)
                        .and_then(|options| options.get("severity"))
                        .and_then(Value::as_str)
                        .map(|s| match s {
                            "warning" => Severity::Warning,
                            _ => Severity::Error,
                        })
                        .unwrap_or_default();
                    (primary, severity)
                }
                other => (other.clone(), Severity::Error),
            };

            if matches!(primary, Value::Null | Value::Bool(false)) {
                continue;
            }

            match Rule::parse(name, &primary) {
                Some(rule) => entries.push(RuleEntry { rule, severity }),
                None => tracing::debug!("ignoring stylelint rule '{name}'"),
            }
        }

        entries
    }
}

/// A violation that couldn't be fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// One based.
    pub line: usize,
    pub rule: &'static str,
    pub message: String,
    pub severity: Severity,
}

impl Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.line, self.message, self.rule)
    }
}

/// Applies every fixable rule to `source` and reports the rest. Returns the
/// fixed source, which equals the input when nothing needed fixing.
pub fn lint(source: &str, rules: &[RuleEntry]) -> (String, Vec<Problem>) {
    if source.is_empty() {
        return (String::new(), Vec::new());
    }

    let has_newline = source.ends_with('\n');
    let body = source.strip_suffix('\n').unwrap_or(source);
    let mut lines: Vec<String> = body.split('\n').map(str::to_string).collect();

    let enabled = |check: fn(&Rule) -> bool| rules.iter().find(|entry| check(&entry.rule));

    if let Some(RuleEntry {
        rule: Rule::Indentation(indent),
        ..
    }) = enabled(|r| matches!(r, Rule::Indentation(_)))
    {
        reindent(&mut lines, *indent);
    }

    if enabled(|r| matches!(r, Rule::NoEolWhitespace)).is_some() {
        for line in &mut lines {
            let trimmed = line.trim_end().len();
            line.truncate(trimmed);
        }
    }

    let hex_case = match enabled(|r| matches!(r, Rule::ColorHexCase(_))) {
        Some(RuleEntry {
            rule: Rule::ColorHexCase(case),
            ..
        }) => Some(*case),
        _ => None,
    };
    let zero_units = enabled(|r| matches!(r, Rule::LengthZeroNoUnit)).is_some();
    let invalid_hex = enabled(|r| matches!(r, Rule::ColorNoInvalidHex)).copied();

    let mut problems = Vec::new();
    let mut in_comment = false;
    let mut continued = false;

    for (i, line) in lines.iter_mut().enumerate() {
        if is_comment(line, &mut in_comment) {
            continue;
        }

        let spans = value_spans(line, &mut continued);
        if spans.is_empty() {
            continue;
        }

        let mut out = String::with_capacity(line.len());
        let mut last = 0;

        for span in spans {
            out.push_str(&line[last..span.start]);
            last = span.end;
            let mut value = line[span].to_string();

            if let Some(case) = hex_case {
                value = HEX_COLOR
                    .replace_all(&value, |caps: &regex::Captures| match case {
                        Case::Lower => caps[0].to_lowercase(),
                        Case::Upper => format!("#{}", caps[1].to_uppercase()),
                    })
                    .into_owned();
            }

            if zero_units {
                value = ZERO_LENGTH.replace_all(&value, "${1}0").into_owned();
            }

            if let Some(entry) = invalid_hex {
                for caps in HEX_COLOR.captures_iter(&value) {
                    let hex = &caps[1];
                    let valid = matches!(hex.len(), 3 | 4 | 6 | 8)
                        && hex.chars().all(|c| c.is_ascii_hexdigit());
                    if !valid {
                        problems.push(Problem {
                            line: i + 1,
                            rule: entry.rule.name(),
                            message: format!("Unexpected invalid hex color \"#{hex}\""),
                            severity: entry.severity,
                        });
                    }
                }
            }

            out.push_str(&value);
        }

        out.push_str(&line[last..]);
        *line = out;
    }

    if let Some(RuleEntry {
        rule: Rule::MaxEmptyLines(max),
        ..
    }) = enabled(|r| matches!(r, Rule::MaxEmptyLines(_)))
    {
        let mut blank = 0;
        lines.retain(|line| {
            blank = if line.trim().is_empty() { blank + 1 } else { 0 };
            blank <= *max
        });
    }

    let mut fixed = lines.join("\n");
    if has_newline || enabled(|r| matches!(r, Rule::NoMissingEndOfSourceNewline)).is_some() {
        fixed.push('\n');
    }

    if let Some(entry) = enabled(|r| matches!(r, Rule::BlockNoEmpty)) {
        for found in EMPTY_BLOCK.find_iter(&fixed) {
            if fixed[..found.start()].ends_with('#') {
                continue;
            }
            problems.push(Problem {
                line: fixed[..found.start()].matches('\n').count() + 1,
                rule: entry.rule.name(),
                message: "Unexpected empty block".into(),
                severity: entry.severity,
            });
        }
    }

    problems.sort_by_key(|p| p.line);
    (fixed, problems)
}

/// Whether `line` is part of a comment, tracking block comments across lines.
fn is_comment(line: &str, in_comment: &mut bool) -> bool {
    let trimmed = line.trim_start();
    let was = *in_comment;

    if *in_comment {
        if line.contains("*/") {
            *in_comment = false;
        }
        return true;
    }

    if let Some(open) = line.find("/*")
        && !line[open..].contains("*/")
    {
        *in_comment = true;
    }

    was || trimmed.starts_with("//") || trimmed.starts_with("/*")
}

/// Byte ranges of `line` that hold declaration values, without string
/// literals and `url()` arguments. `continued` carries an unterminated value
/// over to the next line.
fn value_spans(line: &str, continued: &mut bool) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut carry = *continued;
    *continued = false;

    for (range, end) in statements(line) {
        let text = &line[range.clone()];
        let from = if std::mem::take(&mut carry) {
            Some(range.start)
        } else {
            match end {
                Some(b'{') => None,
                Some(_) => colon(text).map(|at| range.start + at + 1),
                None => colon(text)
                    .filter(|_| PROPERTY.is_match(text))
                    .map(|at| range.start + at + 1),
            }
        };

        if let Some(from) = from {
            spans.extend(plain(line, from..range.end));
            *continued = end.is_none();
        }
    }

    spans
}

/// Splits `line` at `{`, `}` and `;` outside strings, parentheses and
/// interpolation, dropping a trailing `//` comment. Each piece comes with the
/// byte that ended it, or `None` when it runs to the end of the line.
fn statements(line: &str) -> Vec<(Range<usize>, Option<u8>)> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut parens = 0usize;
    let mut end = bytes.len();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = closing_quote(bytes, i),
            b'#' if bytes.get(i + 1) == Some(&b'{') => i = closing_brace(bytes, i + 1),
            b'(' => parens += 1,
            b')' => parens = parens.saturating_sub(1),
            b'/' if parens == 0 && bytes.get(i + 1) == Some(&b'/') => {
                end = i;
                break;
            }
            c @ (b'{' | b'}' | b';') if parens == 0 => {
                out.push((start..i, Some(c)));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if !line[start..end].trim().is_empty() {
        out.push((start..end, None));
    }
    out
}

/// Offset of the `:` ending a property name.
fn colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = closing_quote(bytes, i),
            b'#' if bytes.get(i + 1) == Some(&b'{') => i = closing_brace(bytes, i + 1),
            b'(' => return None,
            b':' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parts of `range` outside string literals and `url()` arguments.
fn plain(line: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut start = range.start;
    let mut i = range.start;

    while i < range.end {
        let skip_to = match bytes[i] {
            b'"' | b'\'' => Some(closing_quote(bytes, i)),
            b'(' if line[..i].to_ascii_lowercase().ends_with("url") => {
                Some(bytes[i..].iter().position(|&b| b == b')').map_or(bytes.len(), |at| i + at))
            }
            _ => None,
        };

        if let Some(to) = skip_to {
            if start < i {
                out.push(start..i);
            }
            i = to.min(range.end);
            start = (to + 1).min(range.end);
        }
        i += 1;
    }

    if start < range.end {
        out.push(start..range.end);
    }
    out
}

/// Index of the quote closing the string opened at `open`.
fn closing_quote(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b if b == quote => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Index of the brace closing the one at `open`.
fn closing_brace(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    bytes.len()
}

/// Rewrites leading whitespace so that every line sits at its nesting depth.
/// Continuation lines keep whatever extra indentation they had.
fn reindent(lines: &mut [String], indent: Indent) {
    let unit = indent.unit();
    let width = source_width(lines, indent);

    let mut depth = 0usize;
    let mut continuation = false;
    let mut in_comment = false;

    for line in lines.iter_mut() {
        let trimmed = line.trim_start().to_string();
        if trimmed.is_empty() {
            continue;
        }

        if in_comment {
            in_comment = !trimmed.contains("*/");
            continue;
        }

        let leading = &line[..line.len() - trimmed.len()];
        let tabs = leading.chars().filter(|&c| c == '\t').count();
        let spaces = leading.chars().filter(|&c| c == ' ').count();
        let units = tabs + spaces / width;

        let level = if trimmed.starts_with('}') {
            depth.saturating_sub(1)
        } else {
            depth
        };

        let mut new = unit.repeat(level);
        if continuation {
            new.push_str(&unit.repeat(units.saturating_sub(level)));
            new.push_str(&" ".repeat(spaces % width));
        }
        new.push_str(&trimmed);
        *line = new;

        let code = strip_strings(&trimmed);
        let opens = code.matches('{').count();
        let closes = code.matches('}').count();
        depth = (depth + opens).saturating_sub(closes);

        if let Some(open) = trimmed.find("/*")
            && !trimmed[open..].contains("*/")
        {
            in_comment = true;
        }

        let end = code.trim_end();
        continuation =
            !end.starts_with("//") && !end.is_empty() && !end.ends_with(['{', '}', ';']);
    }
}

/// Smallest positive run of leading spaces, taken as the width of one
/// indentation level in the original source.
fn source_width(lines: &[String], indent: Indent) -> usize {
    lines
        .iter()
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .filter(|&n| n > 0)
        .min()
        .unwrap_or(match indent {
            Indent::Spaces(n) => n,
            Indent::Tab => 4,
        })
        .max(1)
}

/// Drops string literals and line comments so braces inside them don't count.
fn strip_strings(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(_) if c == '\\' => {
                chars.next();
            }
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '/' && chars.peek() == Some(&'/') => break,
            None => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> Vec<RuleEntry> {
        serde_json::from_str::<LintConfig>(json).unwrap().rules()
    }

    #[test]
    fn test_rule_formats() {
        let rules = config(
            r#"{"rules": {
                "block-no-empty": true,
                "color-hex-case": ["lower", {"severity": "warning"}],
                "max-empty-lines": 2,
                "length-zero-no-unit": null,
                "indentation": false,
                "selector-max-id": 0
            }}"#,
        );

        assert_eq!(
            rules,
            vec![
                RuleEntry {
                    rule: Rule::BlockNoEmpty,
                    severity: Severity::Error
                },
                RuleEntry {
                    rule: Rule::ColorHexCase(Case::Lower),
                    severity: Severity::Warning
                },
                RuleEntry {
                    rule: Rule::MaxEmptyLines(2),
                    severity: Severity::Error
                },
            ]
        );
    }

    #[test]
    fn test_fixes() {
        let rules = config(
            r#"{"rules": {
                "no-eol-whitespace": true,
                "no-missing-end-of-source-newline": true,
                "max-empty-lines": 1,
                "color-hex-case": "lower",
                "length-zero-no-unit": true
            }}"#,
        );

        let source = "a {  \n\tcolor: #FFF;\n\n\n\tmargin: 0px 10px 0.5em 0em;\n}";
        let (fixed, problems) = lint(source, &rules);

        assert_eq!(fixed, "a {\n\tcolor: #fff;\n\n\tmargin: 0 10px 0.5em 0;\n}\n");
        assert!(problems.is_empty());
    }

    #[test]
    fn test_fixes_are_idempotent() {
        let rules = config(
            r#"{"rules": {
                "no-eol-whitespace": true,
                "max-empty-lines": 1,
                "color-hex-case": "upper",
                "indentation": "tab"
            }}"#,
        );

        let source = "a {\n  color: #abc;   \n\n\n  &:hover {\n    color: #fff;\n  }\n}\n";
        let (once, _) = lint(source, &rules);
        let (twice, _) = lint(&once, &rules);

        assert_eq!(once, "a {\n\tcolor: #ABC;\n\n\t&:hover {\n\t\tcolor: #FFF;\n\t}\n}\n");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_indentation_to_spaces() {
        let rules = config(r#"{"rules": {"indentation": 2}}"#);

        let source = "a {\n\tfont-family: Arial,\n\t\tsans-serif;\n}\n";
        let (fixed, _) = lint(source, &rules);

        assert_eq!(fixed, "a {\n  font-family: Arial,\n    sans-serif;\n}\n");
    }

    #[test]
    fn test_selector_hex_is_untouched() {
        let rules = config(r#"{"rules": {"color-hex-case": "lower", "color-no-invalid-hex": true}}"#);

        let source = "#Main {\n\tcolor: #ABCDEF;\n}\n";
        let (fixed, problems) = lint(source, &rules);

        assert_eq!(fixed, "#Main {\n\tcolor: #abcdef;\n}\n");
        assert!(problems.is_empty());
    }

    #[test]
    fn test_reported_problems() {
        let rules = config(
            r#"{"rules": {
                "block-no-empty": true,
                "color-no-invalid-hex": [true, {"severity": "warning"}]
            }}"#,
        );

        let source = "a {\n}\nb {\n\tcolor: #ggg;\n\tbackground: #{$bg};\n}\n";
        let (fixed, problems) = lint(source, &rules);

        assert_eq!(fixed, source);
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].rule, "block-no-empty");
        assert_eq!(problems[0].line, 1);
        assert_eq!(problems[0].severity, Severity::Error);
        assert_eq!(problems[1].rule, "color-no-invalid-hex");
        assert_eq!(problems[1].line, 4);
        assert_eq!(problems[1].severity, Severity::Warning);
    }

    #[test]
    fn test_one_line_rule_keeps_selector() {
        let rules = config(r#"{"rules": {"color-hex-case": "lower", "length-zero-no-unit": true}}"#);

        let source = "a:hover #MainNav { color: #FFF; margin: 0px; }\n";
        let (fixed, _) = lint(source, &rules);

        assert_eq!(fixed, "a:hover #MainNav { color: #fff; margin: 0; }\n");
    }

    #[test]
    fn test_url_and_strings_are_untouched() {
        let rules = config(r#"{"rules": {"color-hex-case": "lower", "color-no-invalid-hex": true}}"#);

        let source = "a {\n\tbackground: url(icons.svg#ArrowUp) #ABC;\n\tcontent: \"#Quote\";\n}\n";
        let (fixed, problems) = lint(source, &rules);

        assert_eq!(
            fixed,
            "a {\n\tbackground: url(icons.svg#ArrowUp) #abc;\n\tcontent: \"#Quote\";\n}\n"
        );
        assert!(problems.is_empty());
    }

    #[test]
    fn test_multiline_selectors_and_values() {
        let rules = config(r#"{"rules": {"color-hex-case": "lower", "length-zero-no-unit": true}}"#);

        let source = "a:hover,\n#Nav:focus {\n\tbox-shadow: 0px 0 #FFF,\n\t\t0 0px #AAA;\n}\n";
        let (fixed, _) = lint(source, &rules);

        assert_eq!(
            fixed,
            "a:hover,\n#Nav:focus {\n\tbox-shadow: 0 0 #fff,\n\t\t0 0 #aaa;\n}\n"
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let rules = config(r#"{"rules": {"color-hex-case": "lower"}}"#);

        let source = "/*\n color: #ABC;\n */\n// color: #DEF;\na { color: #ABC; }\n";
        let (fixed, _) = lint(source, &rules);

        assert_eq!(fixed, "/*\n color: #ABC;\n */\n// color: #DEF;\na { color: #abc; }\n");
    }
}
