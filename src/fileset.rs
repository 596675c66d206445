//! Resolution of ordered glob lists into concrete file sets.
//!
//! A pattern list mixes inclusions and `!`-prefixed exclusions. The result is
//! the union of all inclusions minus every path matched by an exclusion, so
//! exclusions can only ever narrow a set.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::FileSetError;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Include {
    glob: String,
    base: Utf8PathBuf,
    pattern: Pattern,
}

/// Compiled list of inclusion and exclusion globs.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    include: Vec<Include>,
    exclude: Vec<Pattern>,
}

/// A resolved file, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the project root.
    pub path: Utf8PathBuf,
    /// Static prefix of the glob that matched this file.
    pub base: Utf8PathBuf,
}

impl FileEntry {
    /// Path relative to the glob base, used to derive output paths.
    pub fn relative(&self) -> &Utf8Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> Result<Self, FileSetError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();

        for raw in patterns {
            match raw.as_ref().strip_prefix('!') {
                Some(negated) => set.exclude.push(compile(&normalize(negated))?),
                None => {
                    let glob = normalize(raw.as_ref());
                    set.include.push(Include {
                        base: glob_base(&glob),
                        pattern: compile(&glob)?,
                        glob,
                    });
                }
            }
        }

        Ok(set)
    }

    /// Whether a single root-relative path belongs to this set.
    pub fn matches(&self, path: impl AsRef<Utf8Path>) -> bool {
        let path = normalize(path.as_ref().as_str());
        self.include
            .iter()
            .any(|include| include.pattern.matches_with(&path, MATCH))
            && !self.is_excluded(&path)
    }

    /// Static directories of all inclusions, relative to the root.
    pub fn bases(&self) -> Vec<Utf8PathBuf> {
        self.include.iter().map(|i| i.base.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    /// Expands the set against `root`. Inclusions are visited in list order,
    /// the matches of each one sorted, and files already seen are skipped.
    pub fn resolve(&self, root: &Utf8Path) -> Result<Vec<FileEntry>, FileSetError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for include in &self.include {
            let full = if root.as_str().is_empty() {
                include.glob.clone()
            } else {
                format!(
                    "{}/{}",
                    Pattern::escape(root.as_str().trim_end_matches('/')),
                    include.glob
                )
            };

            let paths =
                glob::glob_with(&full, MATCH).map_err(|e| FileSetError::Pattern(full.clone(), e))?;

            let mut found = Vec::new();
            for path in paths {
                let path = Utf8PathBuf::try_from(path?)?;
                if !path.is_file() {
                    continue;
                }

                let relative = match path.strip_prefix(root) {
                    Ok(relative) => relative.to_path_buf(),
                    Err(_) => path,
                };
                found.push(Utf8PathBuf::from(normalize(relative.as_str())));
            }
            found.sort();

            for path in found {
                if self.is_excluded(path.as_str()) || !seen.insert(path.clone()) {
                    continue;
                }

                files.push(FileEntry {
                    path,
                    base: include.base.clone(),
                });
            }
        }

        Ok(files)
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.exclude.iter().any(|p| p.matches_with(path, MATCH))
    }
}

fn compile(glob: &str) -> Result<Pattern, FileSetError> {
    Pattern::new(glob).map_err(|e| FileSetError::Pattern(glob.to_string(), e))
}

fn normalize(glob: &str) -> String {
    let mut glob = glob;
    while let Some(rest) = glob.strip_prefix("./") {
        glob = rest;
    }
    glob.to_string()
}

/// Static directory prefix of a glob: every component before the first one
/// containing a wildcard. A glob without wildcards names a file, so its
/// parent directory is the base.
pub(crate) fn glob_base(glob: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(glob);
    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']));

    match split {
        Some(index) => components.iter().take(index).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}
