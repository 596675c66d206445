//! Sass linting and compilation.
//!
//! The Sass compiler reports no positions, so the source map of a stylesheet
//! is coarse: it lists every file the entry pulled in, with their contents,
//! and its one mapping ties the minified output to the start of the entry file.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use grass::OutputStyle;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use regex::{Captures, Regex};
use thiserror::Error;

use crate::config::Config;
use crate::error::FileSetError;
use crate::fileset::{FileEntry, PatternSet};
use crate::pipeline::{self, Asset, CommentStyle, root_from};
use crate::sourcemap::MapBuilder;
use crate::task::{TaskContext, TaskResult};
use crate::tasks::{mqpack, stylelint};

static GLOB_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+["']([^"']*[*?\[][^"']*)["']\s*;"#).expect("invalid import regex")
});

/// Errors that can occur when linting or compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error(transparent)]
    FileSet(#[from] FileSetError),

    #[error("{0} stylelint error(s) found")]
    Lint(usize),
}

/// Outcome of one compilation run.
#[derive(Debug, Default)]
pub struct StyleReport {
    /// Every file written, maps included.
    pub written: Vec<Utf8PathBuf>,
    /// Sources that failed to compile, with the error message.
    pub failed: Vec<(Utf8PathBuf, String)>,
}

pub fn sasslint(ctx: &TaskContext) -> TaskResult {
    let errors = lint_sources(&ctx.config)?;
    if errors > 0 {
        return Err(StyleError::Lint(errors).into());
    }
    Ok(())
}

pub fn adminstyles(ctx: &TaskContext) -> TaskResult {
    let report = compile_styles(&ctx.config)?;

    if let Some(live) = &ctx.live {
        for path in report.written.iter().filter(|p| p.extension() == Some("css")) {
            let path = path.strip_prefix(&ctx.config.root).unwrap_or(path.as_path());
            live.inject(path.as_str());
        }
    }

    Ok(())
}

/// Fixes every source in place and logs the problems left. Returns the
/// number of problems with error severity.
pub fn lint_sources(config: &Config) -> Result<usize, StyleError> {
    let rules = config.stylelint.rules();
    if rules.is_empty() {
        tracing::debug!("no stylelint rules configured");
        return Ok(0);
    }

    let files = PatternSet::new(&config.styles.src)?.resolve(&config.root)?;
    let mut errors = 0;

    for entry in &files {
        let path = config.path(&entry.path);
        let source = fs::read_to_string(&path)?;
        let (fixed, problems) = stylelint::lint(&source, &rules);

        if fixed != source {
            fs::write(&path, &fixed)?;
            tracing::info!("fixed {}", entry.path);
        }

        for problem in problems {
            match problem.severity {
                stylelint::Severity::Error => {
                    errors += 1;
                    tracing::error!("{}:{problem}", entry.path);
                }
                stylelint::Severity::Warning => tracing::warn!("{}:{problem}", entry.path),
            }
        }
    }

    Ok(errors)
}

/// Compiles every non-partial source into `styles.dest`. A file that fails
/// to compile is logged and reported but doesn't stop the others.
pub fn compile_styles(config: &Config) -> Result<StyleReport, StyleError> {
    let files = PatternSet::new(&config.styles.src)?.resolve(&config.root)?;
    let dest = config.path(&config.styles.dest);

    let results: Vec<_> = files
        .par_iter()
        .filter(|entry| !is_partial(&entry.path))
        .map(|entry| (entry, compile(config, entry)))
        .collect();

    let mut report = StyleReport::default();
    let mut assets = Vec::new();

    for (entry, result) in results {
        match result {
            Ok(asset) => assets.push(asset),
            Err(e) => {
                tracing::error!("{}: {e}", entry.path);
                report.failed.push((entry.path.clone(), e.to_string()));
            }
        }
    }

    report.written = pipeline::write(&dest, &assets)?;
    Ok(report)
}

/// Partials are only ever compiled through an import.
fn is_partial(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}

fn compile(config: &Config, entry: &FileEntry) -> Result<Asset, StyleError> {
    let sass_fs = GlobFs::default();
    let expanded = {
        let options = grass::Options::default()
            .style(OutputStyle::Expanded)
            .fs(&sass_fs);
        grass::from_path(config.path(&entry.path), &options)?
    };
    let packed = mqpack::pack(&expanded);
    let minified = grass::from_string(
        packed,
        &grass::Options::default().style(OutputStyle::Compressed),
    )?;

    let asset = Asset::new(entry.relative(), minified).with_extension("css");

    let file = asset.path.file_name().unwrap_or_default().to_string();
    let root = root_from(Utf8Path::new(&config.styles.dest), &asset.path);
    let mut map = MapBuilder::new(file).source_root(root);
    for (path, content) in sass_fs.into_sources() {
        let name = Utf8PathBuf::try_from(path)
            .map(|path| match path.strip_prefix(&config.root) {
                Ok(relative) => relative.to_string(),
                Err(_) => path.to_string(),
            })
            .unwrap_or_else(|e| e.into_path_buf().to_string_lossy().into_owned());
        map.add_source(name, Some(content));
    }
    // minified output is one line, traced back to the entry only
    map.map_line(0, 0, 0);

    Ok(asset.attach_map(map.build(), CommentStyle::Css))
}

/// Filesystem seen by the Sass compiler. Expands glob imports and records
/// every file read, in order, for the source map.
#[derive(Debug, Default)]
struct GlobFs {
    read: RefCell<Vec<(PathBuf, String)>>,
}

impl GlobFs {
    fn into_sources(self) -> Vec<(PathBuf, String)> {
        self.read.into_inner()
    }
}

impl grass::Fs for GlobFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let source = fs::read_to_string(path)?;
        let expanded = expand_glob_imports(path, &source);

        let mut read = self.read.borrow_mut();
        if !read.iter().any(|(seen, _)| seen == path) {
            read.push((path.to_path_buf(), source));
        }

        Ok(expanded.into_bytes())
    }
}

/// Replaces `@import "dir/*";` with one import per matching file, relative
/// to the importing file and sorted. The importing file never imports
/// itself.
fn expand_glob_imports(file: &Path, source: &str) -> String {
    let dir = file.parent().unwrap_or(Path::new(""));

    GLOB_IMPORT
        .replace_all(source, |caps: &Captures| {
            let Some(base) = dir.to_str() else {
                return String::new();
            };
            let pattern = match base {
                "" => caps[1].to_string(),
                _ => format!("{}/{}", glob::Pattern::escape(base), &caps[1]),
            };

            let mut matches: Vec<PathBuf> = match glob::glob(&pattern) {
                Ok(paths) => paths
                    .filter_map(Result::ok)
                    .filter(|path| path.is_file() && path != file)
                    .filter(|path| {
                        path.extension()
                            .is_some_and(|ext| ext == "scss" || ext == "sass" || ext == "css")
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("invalid glob import '{}': {e}", &caps[1]);
                    Vec::new()
                }
            };
            matches.sort();

            matches
                .iter()
                .filter_map(|path| path.strip_prefix(dir).ok())
                .map(|path| {
                    let path = path.to_string_lossy().replace('\\', "/");
                    format!("@import \"{path}\";")
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .into_owned()
}
