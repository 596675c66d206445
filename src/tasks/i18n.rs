//! Extraction of WordPress gettext calls into a `.pot` catalog.
//!
//! PHP sources are tokenized just enough to tell code from strings, comments
//! and inline HTML. Calls to the translation functions with literal arguments
//! and the project's text domain become catalog entries; everything else is
//! ignored.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;

use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

use crate::config::{Config, Package};
use crate::error::FileSetError;
use crate::fileset::PatternSet;
use crate::io::write_if_changed;
use crate::task::{TaskContext, TaskResult};

#[derive(Debug, Error)]
pub enum PotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    FileSet(#[from] FileSetError),
}

/// Role of a positional argument of a translation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arg {
    Msgid,
    Plural,
    Context,
    Domain,
    /// The number of a plural call.
    Skip,
}

use Arg::*;

const KEYWORDS: &[(&str, &[Arg])] = &[
    ("__", &[Msgid, Domain]),
    ("_e", &[Msgid, Domain]),
    ("esc_attr__", &[Msgid, Domain]),
    ("esc_html__", &[Msgid, Domain]),
    ("esc_attr_e", &[Msgid, Domain]),
    ("esc_html_e", &[Msgid, Domain]),
    ("_x", &[Msgid, Context, Domain]),
    ("_ex", &[Msgid, Context, Domain]),
    ("esc_attr_x", &[Msgid, Context, Domain]),
    ("esc_html_x", &[Msgid, Context, Domain]),
    ("_n", &[Msgid, Plural, Skip, Domain]),
    ("_nx", &[Msgid, Plural, Skip, Context, Domain]),
    ("_n_noop", &[Msgid, Plural, Domain]),
    ("_nx_noop", &[Msgid, Plural, Context, Domain]),
];

/// A translation call found in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub context: Option<String>,
    pub msgid: String,
    pub plural: Option<String>,
    pub line: usize,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    context: Option<String>,
    msgid: String,
    plural: Option<String>,
    references: Vec<String>,
    comments: Vec<String>,
}

/// Entries in order of first appearance, merged by context and message.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<Entry>,
    index: HashMap<(Option<String>, String), usize>,
}

pub fn translate(ctx: &TaskContext) -> TaskResult {
    let (path, count) = make_pot(&ctx.config)?;
    tracing::info!("{count} strings written to {path}");
    Ok(())
}

/// Scans the configured sources and writes the catalog. Returns its path and
/// the number of entries.
pub fn make_pot(config: &Config) -> Result<(Utf8PathBuf, usize), PotError> {
    let files = PatternSet::new(&config.languages.src)?.resolve(&config.root)?;
    let domain = config.domain();

    let scanned = files
        .par_iter()
        .map(|entry| {
            let source = fs::read(config.path(&entry.path))?;
            let calls = extract(&String::from_utf8_lossy(&source), domain);
            Ok((entry.path.as_str(), calls))
        })
        .collect::<Result<Vec<_>, std::io::Error>>()?;

    let mut catalog = Catalog::default();
    for (path, calls) in scanned {
        for call in calls {
            catalog.add(path, call);
        }
    }

    let path = config.path(config.catalog_path());
    write_if_changed(&path, catalog.to_pot(&config.package, domain).as_bytes())?;

    Ok((path, catalog.len()))
}

impl Catalog {
    pub fn add(&mut self, path: &str, call: Call) {
        let reference = format!("{path}:{}", call.line);
        let key = (call.context.clone(), call.msgid.clone());

        let entry = match self.index.get(&key) {
            Some(&i) => &mut self.entries[i],
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(Entry {
                    context: call.context,
                    msgid: call.msgid,
                    plural: None,
                    references: Vec::new(),
                    comments: Vec::new(),
                });
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        };

        if entry.plural.is_none() {
            entry.plural = call.plural;
        }
        if !entry.references.contains(&reference) {
            entry.references.push(reference);
        }
        if let Some(comment) = call.comment
            && !entry.comments.contains(&comment)
        {
            entry.comments.push(comment);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the catalog. The header carries no dates so the output only
    /// changes when the strings do.
    pub fn to_pot(&self, package: &Package, domain: &str) -> String {
        let version = match &package.version {
            Some(version) => format!("{} {version}", package.name),
            None => package.name.clone(),
        };

        let mut out = String::new();
        let _ = writeln!(out, "# Copyright (C) {}", package.name);
        let _ = writeln!(
            out,
            "# This file is distributed under the same license as the {} package.",
            package.name
        );
        out.push_str("msgid \"\"\nmsgstr \"\"\n");
        let _ = writeln!(out, "\"Project-Id-Version: {}\\n\"", escape(&version));
        out.push_str("\"MIME-Version: 1.0\\n\"\n");
        out.push_str("\"Content-Type: text/plain; charset=UTF-8\\n\"\n");
        out.push_str("\"Content-Transfer-Encoding: 8bit\\n\"\n");
        out.push_str("\"Plural-Forms: nplurals=INTEGER; plural=EXPRESSION;\\n\"\n");
        let _ = writeln!(out, "\"X-Domain: {}\\n\"", escape(domain));

        for entry in &self.entries {
            out.push('\n');
            for comment in &entry.comments {
                let _ = writeln!(out, "#. {comment}");
            }
            let _ = writeln!(out, "#: {}", entry.references.join(" "));
            if let Some(context) = &entry.context {
                let _ = writeln!(out, "msgctxt \"{}\"", escape(context));
            }
            let _ = writeln!(out, "msgid \"{}\"", escape(&entry.msgid));
            match &entry.plural {
                Some(plural) => {
                    let _ = writeln!(out, "msgid_plural \"{}\"", escape(plural));
                    out.push_str("msgstr[0] \"\"\nmsgstr[1] \"\"\n");
                }
                None => out.push_str("msgstr \"\"\n"),
            }
        }

        out
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Finds the translation calls of `domain` in a PHP source.
pub fn extract(source: &str, domain: &str) -> Vec<Call> {
    let lexemes = tokenize(source);

    let mut code = Vec::new();
    let mut comments = Vec::new();
    for lexeme in &lexemes {
        match &lexeme.token {
            Token::Comment(text) => {
                if let Some(comment) = translator_comment(text) {
                    comments.push((lexeme.end_line, comment));
                }
            }
            _ => code.push(lexeme),
        }
    }

    let mut calls = Vec::new();

    for (i, lexeme) in code.iter().enumerate() {
        let Token::Ident(name) = &lexeme.token else {
            continue;
        };
        let Some((_, roles)) = KEYWORDS.iter().find(|(keyword, _)| keyword == name) else {
            continue;
        };
        if !matches!(code.get(i + 1).map(|l| &l.token), Some(Token::Open)) {
            continue;
        }
        // methods, static calls and the definitions themselves
        if let Some(prev) = i.checked_sub(1).map(|p| &code[p].token)
            && (*prev == Token::Member || *prev == Token::Ident("function".into()))
        {
            continue;
        }

        let Some(args) = arguments(&code[i + 2..]) else {
            continue;
        };

        if let Some(call) = build_call(roles, &args, domain, lexeme.line) {
            let comment = comments
                .iter()
                .rev()
                .find(|(end, _)| *end == call.line || *end + 1 == call.line)
                .map(|(_, text)| text.clone());
            calls.push(Call { comment, ..call });
        }
    }

    calls
}

fn build_call(roles: &[Arg], args: &[Option<String>], domain: &str, line: usize) -> Option<Call> {
    let mut call = Call {
        context: None,
        msgid: String::new(),
        plural: None,
        line,
        comment: None,
    };
    let mut found_domain = false;

    for (k, role) in roles.iter().enumerate() {
        let value = args.get(k).cloned().flatten();
        match role {
            Msgid => call.msgid = value?,
            Plural => call.plural = Some(value?),
            Context => call.context = Some(value?),
            Domain => found_domain = value.as_deref() == Some(domain),
            Skip => {}
        }
    }

    (found_domain && !call.msgid.is_empty()).then_some(call)
}

/// Splits the arguments of a call starting right after its `(`. Each one is
/// its literal value, or `None` when it isn't made of string literals only.
fn arguments(code: &[&Lexeme]) -> Option<Vec<Option<String>>> {
    let mut args = Vec::new();
    let mut current: Vec<&Token> = Vec::new();
    let mut depth = 0usize;

    for lexeme in code {
        match &lexeme.token {
            Token::Close if depth == 0 => {
                if !current.is_empty() {
                    args.push(literal(&current));
                }
                return Some(args);
            }
            Token::Comma if depth == 0 => {
                args.push(literal(&current));
                current.clear();
            }
            token => {
                match token {
                    Token::Open => depth += 1,
                    Token::Close => depth -= 1,
                    _ => {}
                }
                current.push(token);
            }
        }
    }

    None
}

/// Value of `'a' . "b" . 'c'`.
fn literal(tokens: &[&Token]) -> Option<String> {
    let mut value = String::new();
    let mut expect_string = true;

    for token in tokens {
        match (token, expect_string) {
            (Token::Str(Some(part)), true) => value.push_str(part),
            (Token::Dot, false) => {}
            _ => return None,
        }
        expect_string = !expect_string;
    }

    (!expect_string).then_some(value)
}

fn translator_comment(text: &str) -> Option<String> {
    let text = text
        .trim_start_matches("//")
        .trim_start_matches('#')
        .trim_start_matches("/*")
        .trim_end_matches("*/");

    let text = text
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    text.to_ascii_lowercase()
        .starts_with("translators:")
        .then_some(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    /// A string literal, `None` when it interpolates variables.
    Str(Option<String>),
    Comment(String),
    Open,
    Close,
    Comma,
    Dot,
    /// `->`, `?->` or `::`.
    Member,
    Other,
}

#[derive(Debug)]
struct Lexeme {
    token: Token,
    line: usize,
    end_line: usize,
}

fn tokenize(source: &str) -> Vec<Lexeme> {
    let bytes = source.as_bytes();
    let newlines = |from: usize, to: usize| bytes[from..to].iter().filter(|&&b| b == b'\n').count();

    let mut out = Vec::new();
    let mut line = 1;
    let mut i = 0;
    let mut in_code = false;

    while i < bytes.len() {
        if !in_code {
            let Some(offset) = source[i..].find("<?") else {
                break;
            };
            line += newlines(i, i + offset);
            i += offset + 2;
            if source[i..].starts_with("php") {
                i += 3;
            } else if source[i..].starts_with('=') {
                i += 1;
            }
            in_code = true;
            continue;
        }

        let start = i;
        let next = bytes.get(i + 1).copied();
        let token = match bytes[i] {
            b'\n' => {
                line += 1;
                i += 1;
                continue;
            }
            b if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'?' if next == Some(b'>') => {
                in_code = false;
                i += 2;
                continue;
            }
            b'?' if source[i..].starts_with("?->") => {
                i += 3;
                Token::Member
            }
            b'/' if next == Some(b'/') => line_comment(source, &mut i),
            b'#' if next != Some(b'[') => line_comment(source, &mut i),
            b'/' if next == Some(b'*') => {
                i = source[i + 2..].find("*/").map_or(bytes.len(), |end| i + end + 4);
                Token::Comment(source[start..i].to_string())
            }
            quote @ (b'\'' | b'"') => {
                let (value, end) = string(bytes, i, quote);
                i = end;
                Token::Str(value)
            }
            b'-' if next == Some(b'>') => {
                i += 2;
                Token::Member
            }
            b':' if next == Some(b':') => {
                i += 2;
                Token::Member
            }
            b'$' => {
                i += 1;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                Token::Other
            }
            b if is_ident(b) && !b.is_ascii_digit() => {
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                Token::Ident(source[start..i].to_string())
            }
            b => {
                i += 1;
                match b {
                    b'(' => Token::Open,
                    b')' => Token::Close,
                    b',' => Token::Comma,
                    b'.' => Token::Dot,
                    _ => Token::Other,
                }
            }
        };

        let end_line = line + newlines(start, i);
        out.push(Lexeme {
            token,
            line,
            end_line,
        });
        line = end_line;
    }

    out
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Consumes a `//` or `#` comment, which ends at the line end or at `?>`.
fn line_comment(source: &str, i: &mut usize) -> Token {
    let start = *i;
    let rest = &source[start..];
    let end = [rest.find('\n'), rest.find("?>")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(rest.len());
    *i = start + end;
    Token::Comment(rest[..end].to_string())
}

/// Reads the string literal opening at `start`. Returns its unescaped value
/// and the index right after the closing quote.
fn string(bytes: &[u8], start: usize, quote: u8) -> (Option<String>, usize) {
    let mut value = Vec::new();
    let mut literal = true;
    let mut i = start + 1;

    while i < bytes.len() && bytes[i] != quote {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        if b == b'\\'
            && let Some(next) = next
        {
            let unescaped = match (quote, next) {
                (_, b'\\') => Some(b'\\'),
                (q, n) if q == n => Some(q),
                (b'"', b'n') => Some(b'\n'),
                (b'"', b't') => Some(b'\t'),
                (b'"', b'r') => Some(b'\r'),
                (b'"', b'$') => Some(b'$'),
                _ => None,
            };
            if let Some(c) = unescaped {
                value.push(c);
                i += 2;
                continue;
            }
        }

        if quote == b'"'
            && ((b == b'$' && next.is_some_and(|n| n == b'{' || is_ident(n) && !n.is_ascii_digit()))
                || (b == b'{' && next == Some(b'$')))
        {
            literal = false;
        }

        value.push(b);
        i += 1;
    }

    let value = literal.then(|| String::from_utf8_lossy(&value).into_owned());
    (value, (i + 1).min(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "my-plugin";

    fn msgids(source: &str) -> Vec<String> {
        extract(source, DOMAIN).into_iter().map(|c| c.msgid).collect()
    }

    #[test]
    fn test_function_forms() {
        let source = r#"<?php
__( 'Hello', 'my-plugin' );
_e( "World", 'my-plugin' );
$a = _x( 'Post', 'noun', 'my-plugin' );
printf( _n( '%d item', '%d items', $count, 'my-plugin' ), $count );
$b = _nx_noop( 'One', 'Many', 'ctx', 'my-plugin' );
echo esc_html__( 'Safe', 'my-plugin' );
"#;

        let calls = extract(source, DOMAIN);
        assert_eq!(calls.len(), 6);

        assert_eq!(calls[0].msgid, "Hello");
        assert_eq!(calls[0].line, 2);
        assert_eq!(calls[2].context.as_deref(), Some("noun"));
        assert_eq!(calls[3].plural.as_deref(), Some("%d items"));
        assert_eq!(calls[4].context.as_deref(), Some("ctx"));
        assert_eq!(calls[4].plural.as_deref(), Some("Many"));
        assert_eq!(calls[5].msgid, "Safe");
    }

    #[test]
    fn test_other_domains_and_non_literals() {
        let source = r#"<?php
__( 'Theirs', 'other-plugin' );
__( 'Core' );
__( $text, 'my-plugin' );
__( "Hi $name", 'my-plugin' );
__( 'Joined ' . 'string', 'my-plugin' );
"#;

        assert_eq!(msgids(source), vec!["Joined string"]);
    }

    #[test]
    fn test_methods_and_definitions_are_skipped() {
        let source = r#"<?php
function __( $text, $domain ) {}
$this->__( 'Method', 'my-plugin' );
Foo::__( 'Static', 'my-plugin' );
__( 'Real', 'my-plugin' );
"#;

        assert_eq!(msgids(source), vec!["Real"]);
    }

    #[test]
    fn test_strings_and_comments_are_not_code() {
        let source = r#"<?php
// __( 'Commented', 'my-plugin' );
/* __( 'Block', 'my-plugin' ); */
$s = "__( 'Quoted', 'my-plugin' )";
?>
<p>__( 'Html', 'my-plugin' )</p>
<?php _e( 'It\'s "back"', 'my-plugin' ); ?>
"#;

        let calls = extract(source, DOMAIN);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].msgid, "It's \"back\"");
        assert_eq!(calls[0].line, 7);
    }

    #[test]
    fn test_translator_comments() {
        let source = r#"<?php
/* translators: %s: user name */
printf( __( 'Hi %s', 'my-plugin' ), $name );

// Unrelated.
__( 'Plain', 'my-plugin' );
"#;

        let calls = extract(source, DOMAIN);
        assert_eq!(calls[0].comment.as_deref(), Some("translators: %s: user name"));
        assert_eq!(calls[1].comment, None);
    }

    #[test]
    fn test_catalog_merges_entries() {
        let mut catalog = Catalog::default();
        let source = "<?php\n__( 'Save', 'my-plugin' );\n_x( 'Save', 'verb', 'my-plugin' );\n";
        for call in extract(source, DOMAIN) {
            catalog.add("a.php", call);
        }
        for call in extract("<?php __( 'Save', 'my-plugin' );", DOMAIN) {
            catalog.add("b.php", call);
        }

        assert_eq!(catalog.len(), 2);

        let package = Package {
            name: "my-plugin".into(),
            version: Some("1.2.0".into()),
        };
        let pot = catalog.to_pot(&package, DOMAIN);

        assert!(pot.contains("\"Project-Id-Version: my-plugin 1.2.0\\n\""));
        assert!(pot.contains("\"X-Domain: my-plugin\\n\""));
        assert!(pot.contains("#: a.php:2 b.php:1\nmsgid \"Save\"\nmsgstr \"\"\n"));
        assert!(pot.contains("#: a.php:3\nmsgctxt \"verb\"\nmsgid \"Save\"\n"));
        assert!(!pot.contains("POT-Creation-Date"));
    }

    #[test]
    fn test_make_pot_skips_vendor() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let config = Config::with_defaults(root.clone(), "my-plugin");

        fs::create_dir_all(root.join("includes")).unwrap();
        fs::create_dir_all(root.join("vendor/lib")).unwrap();
        fs::write(root.join("plugin.php"), "<?php __( 'Main', 'my-plugin' );").unwrap();
        fs::write(
            root.join("includes/admin.php"),
            "<?php _e( 'Admin', 'my-plugin' );",
        )
        .unwrap();
        fs::write(
            root.join("vendor/lib/dep.php"),
            "<?php __( 'Vendored', 'my-plugin' );",
        )
        .unwrap();

        let (path, count) = make_pot(&config).unwrap();
        assert_eq!(path, root.join("languages/my-plugin.pot"));
        assert_eq!(count, 2);

        let pot = fs::read_to_string(path).unwrap();
        assert!(pot.contains("msgid \"Main\""));
        assert!(pot.contains("#: includes/admin.php:1"));
        assert!(!pot.contains("Vendored"));
    }
}
