//! Media query packing.
//!
//! Top-level `@media` blocks sharing the same query are merged into one and
//! moved after every plain rule. The merged blocks are ordered by their
//! `min-width`, smallest first; queries without one come first, and ties keep
//! their original order.

use std::sync::LazyLock;

use regex::Regex;

static MIN_WIDTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min-width\s*:\s*([0-9]*\.?[0-9]+)\s*(px|em|rem)?").expect("invalid min-width regex")
});

#[derive(Debug)]
struct Media<'a> {
    query: String,
    bodies: Vec<&'a str>,
}

pub fn pack(css: &str) -> String {
    let mut plain = Vec::new();
    let mut media: Vec<Media> = Vec::new();

    for block in split_blocks(css) {
        match parse_media(block) {
            Some((query, body)) => match media.iter_mut().find(|m| m.query == query) {
                Some(group) => group.bodies.push(body),
                None => media.push(Media {
                    query,
                    bodies: vec![body],
                }),
            },
            None => plain.push(block),
        }
    }

    media.sort_by(|a, b| min_width(&a.query).total_cmp(&min_width(&b.query)));

    let mut out = plain.join("\n");
    for group in media {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("@media {} {{\n{}\n}}", group.query, group.bodies.join("\n")));
    }
    out.push('\n');
    out
}

/// `min-width` of a query in pixels, `-inf` when there is none.
fn min_width(query: &str) -> f64 {
    let Some(caps) = MIN_WIDTH.captures(query) else {
        return f64::NEG_INFINITY;
    };

    let value: f64 = caps[1].parse().unwrap_or(0.0);
    match caps.get(2).map(|unit| unit.as_str()) {
        Some("em" | "rem") => value * 16.0,
        _ => value,
    }
}

/// Splits a `@media` block into its normalized query and its inner rules.
fn parse_media(block: &str) -> Option<(String, &str)> {
    let rest = block.strip_prefix("@media")?;
    let open = rest.find('{')?;
    let close = rest.rfind('}')?;
    if close < open {
        return None;
    }

    let query = rest[..open].split_whitespace().collect::<Vec<_>>().join(" ");
    Some((query, rest[open + 1..close].trim()))
}

/// Splits a stylesheet into top-level statements: rules, at-rules with
/// blocks, `;`-terminated at-rules and standalone comments.
fn split_blocks(css: &str) -> Vec<&str> {
    let bytes = css.as_bytes();
    let mut blocks = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = css[i + 2..].find("*/").map_or(bytes.len(), |e| i + e + 4);
                if depth == 0 && css[start..i].trim().is_empty() {
                    blocks.push(&css[i..end]);
                    start = end;
                }
                i = end;
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    blocks.push(&css[start..=i]);
                    start = i + 1;
                }
            }
            b';' if depth == 0 => {
                blocks.push(&css[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < bytes.len() {
        blocks.push(&css[start..]);
    }

    blocks
        .into_iter()
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merges_equal_queries() {
        let css = "\
@media (max-width: 600px) {
  a { color: red; }
}
b { color: blue; }
@media (max-width:  600px) {
  c { color: green; }
}
";

        assert_eq!(
            pack(css),
            "b { color: blue; }\n@media (max-width: 600px) {\na { color: red; }\nc { color: green; }\n}\n"
        );
    }

    #[test]
    fn test_sorts_by_min_width() {
        let css = "\
@media (min-width: 768px) { a { x: 1; } }
@media print { b { x: 2; } }
@media (min-width: 40em) { c { x: 3; } }
@media (max-width: 600px) { d { x: 4; } }
";

        let packed = pack(css);
        let order: Vec<_> = packed
            .lines()
            .filter(|line| line.starts_with("@media"))
            .collect();

        assert_eq!(
            order,
            vec![
                "@media print {",
                "@media (max-width: 600px) {",
                "@media (min-width: 40em) {",
                "@media (min-width: 768px) {",
            ]
        );
    }

    #[test]
    fn test_braces_in_strings_and_comments() {
        let css = "/* } */\na::before { content: \"}\"; }\n@charset \"utf-8\";\n";

        assert_eq!(
            split_blocks(css),
            vec!["/* } */", "a::before { content: \"}\"; }", "@charset \"utf-8\";"]
        );
    }

    #[test]
    fn test_nested_media_is_left_alone() {
        let css = "@supports (display: grid) {\n  @media (min-width: 10px) { a { x: 1; } }\n}\n";
        assert_eq!(pack(css), css);
    }
}
