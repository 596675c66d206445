//! Script bundling and minification.
//!
//! The JavaScript work itself happens in a [`Toolchain`]. The production one
//! shells out to `esbuild` for transpiling and minifying and to `eslint` for
//! the advisory lint of the bundle.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

use crate::config::{Config, IifeConfig};
use crate::error::FileSetError;
use crate::fileset::PatternSet;
use crate::pipeline::{self, Asset, CommentStyle, root_from};
use crate::process::{Cmd, ProcessError};
use crate::sourcemap::MapBuilder;
use crate::task::{TaskContext, TaskResult};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    FileSet(#[from] FileSetError),

    #[error("Program '{0}' was not found, is it installed and on the PATH?")]
    Missing(String),

    #[error("Couldn't compile '{0}':\n{1}")]
    Compile(String, String),

    #[error("Linter failed:\n{0}")]
    Lint(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub trait Toolchain: Send + Sync {
    /// Lowers `source` to the configured language level.
    fn transpile(&self, name: &str, source: &str) -> Result<String, ScriptError>;

    fn minify(&self, name: &str, source: &str) -> Result<String, ScriptError>;

    /// Diagnostics for `source`, one per line. Never fails the build.
    fn lint(&self, name: &str, source: &str) -> Result<Vec<String>, ScriptError>;
}

/// `esbuild` and `eslint` running as subprocesses.
#[derive(Debug, Clone)]
pub struct Esbuild {
    program: String,
    target: String,
    eslint: Vec<String>,
    cwd: Utf8PathBuf,
}

impl Esbuild {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.scripts.esbuild.clone(),
            target: config.scripts.target.clone(),
            eslint: config.scripts.eslint.clone(),
            cwd: config.root.clone(),
        }
    }

    fn run(&self, name: &str, source: &str, minify: bool) -> Result<String, ScriptError> {
        let mut cmd = Cmd::new(&self.program)
            .arg("--loader=js")
            .arg(format!("--target={}", self.target))
            .arg(format!("--sourcefile={name}"))
            .cwd(&self.cwd)
            .stdin(source);

        if minify {
            cmd = cmd.arg("--minify");
        }

        match cmd.run() {
            Ok(output) => Ok(output.stdout),
            Err(ProcessError::NotFound(program)) => Err(ScriptError::Missing(program)),
            Err(ProcessError::Failed { stderr, .. }) => {
                Err(ScriptError::Compile(name.to_string(), stderr))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Toolchain for Esbuild {
    fn transpile(&self, name: &str, source: &str) -> Result<String, ScriptError> {
        self.run(name, source, false)
    }

    fn minify(&self, name: &str, source: &str) -> Result<String, ScriptError> {
        self.run(name, source, true)
    }

    fn lint(&self, name: &str, source: &str) -> Result<Vec<String>, ScriptError> {
        if self.eslint.is_empty() {
            return Ok(Vec::new());
        }

        let cmd = Cmd::from_slice(&self.eslint)?
            .args(["--stdin", "--stdin-filename", name, "--format", "unix"])
            .cwd(&self.cwd)
            .stdin(source);

        let output = match cmd.output() {
            Ok(output) => output,
            Err(ProcessError::NotFound(program)) => {
                tracing::warn!("{program} was not found, skipping lint");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        match output.status.code() {
            Some(0) => Ok(Vec::new()),
            // eslint exits with 1 when it found problems
            Some(1) => Ok(output
                .stdout
                .lines()
                .filter(|line| line.contains(':'))
                .map(str::to_string)
                .collect()),
            _ => Err(ScriptError::Lint(output.stderr)),
        }
    }
}

pub fn adminscripts(ctx: &TaskContext) -> TaskResult {
    let toolchain = Esbuild::new(&ctx.config);
    let written = bundle_scripts(&ctx.config, &toolchain)?;

    if let Some(live) = &ctx.live
        && !written.is_empty()
    {
        live.reload();
    }

    Ok(())
}

pub fn uglifyscripts(ctx: &TaskContext) -> TaskResult {
    let toolchain = Esbuild::new(&ctx.config);
    let written = minify_scripts(&ctx.config, &toolchain)?;

    if let Some(live) = &ctx.live
        && !written.is_empty()
    {
        live.reload();
    }

    Ok(())
}

/// Transpiles and concatenates every source into one IIFE wrapped bundle.
/// Nothing is written when any source fails to transpile, or when there are
/// no sources at all.
pub fn bundle_scripts(
    config: &Config,
    toolchain: &dyn Toolchain,
) -> Result<Vec<Utf8PathBuf>, ScriptError> {
    let files = PatternSet::new(&config.scripts.src)?.resolve(&config.root)?;
    if files.is_empty() {
        tracing::info!("no scripts to bundle");
        return Ok(Vec::new());
    }

    let chunks = files
        .par_iter()
        .map(|entry| {
            let source = fs::read_to_string(config.path(&entry.path))?;
            let code = toolchain.transpile(entry.path.as_str(), &source)?;
            Ok::<_, ScriptError>((entry.path.as_str(), source, code))
        })
        .collect::<Result<Vec<_>, ScriptError>>()?;

    let name = config.bundle_name();
    let (header, footer) = iife(&config.scripts.iife);
    let dest = Utf8Path::new(&config.scripts.dest);

    let mut map = MapBuilder::new(name.as_str()).source_root(root_from(dest, Utf8Path::new(&name)));
    let mut line = header.lines().count();
    let mut parts = Vec::with_capacity(chunks.len());

    for (path, source, code) in chunks {
        let code = code.trim_end_matches('\n');
        let last = source.lines().count().saturating_sub(1) as u32;
        let index = map.add_source(path, Some(source));

        for i in 0..code.lines().count() {
            map.map_line(line + i, index, (i as u32).min(last));
        }
        line += code.lines().count();
        parts.push(code.to_string());
    }

    let body = parts.join("\n");

    match toolchain.lint(&name, &body) {
        Ok(diagnostics) => {
            for diagnostic in diagnostics {
                tracing::warn!("{diagnostic}");
            }
        }
        Err(e) => tracing::warn!("lint skipped: {e}"),
    }

    let bundle = format!("{header}{body}\n{footer}");
    let asset = Asset::new(name, bundle).attach_map(map.build(), CommentStyle::Js);

    Ok(pipeline::write(&config.path(dest), &[asset])?)
}

/// Minifies every script matched by `scripts.uglify` into `<name>.min.js`.
pub fn minify_scripts(
    config: &Config,
    toolchain: &dyn Toolchain,
) -> Result<Vec<Utf8PathBuf>, ScriptError> {
    let files = PatternSet::new(&config.scripts.uglify)?.resolve(&config.root)?;

    let assets = files
        .par_iter()
        .map(|entry| {
            let source = fs::read_to_string(config.path(&entry.path))?;
            let code = toolchain.minify(entry.path.as_str(), &strip_map_comment(&source))?;
            Ok::<_, ScriptError>(Asset::new(entry.relative(), code).with_suffix(".min"))
        })
        .collect::<Result<Vec<_>, ScriptError>>()?;

    Ok(pipeline::write(
        &config.path(&config.scripts.dest),
        &assets,
    )?)
}

/// Opening and closing lines of the wrapper function.
fn iife(config: &IifeConfig) -> (String, String) {
    let mut header = format!(";(function({}) {{\n", config.params.join(", "));
    if config.use_strict {
        header.push_str("'use strict';\n");
    }
    let footer = format!("}}({}));\n", config.args.join(", "));
    (header, footer)
}

/// The minified file has no map, so the comment pointing at one goes.
fn strip_map_comment(source: &str) -> String {
    source
        .lines()
        .filter(|line| !line.trim_start().starts_with("//# sourceMappingURL="))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourceMap;

    /// Transpiles to itself and minifies by dropping line breaks.
    #[derive(Default)]
    struct FakeToolchain {
        broken: Option<&'static str>,
    }

    impl Toolchain for FakeToolchain {
        fn transpile(&self, name: &str, source: &str) -> Result<String, ScriptError> {
            if self.broken.is_some_and(|broken| name.ends_with(broken)) {
                return Err(ScriptError::Compile(name.into(), "Unexpected token".into()));
            }
            Ok(source.to_string())
        }

        fn minify(&self, _: &str, source: &str) -> Result<String, ScriptError> {
            Ok(source.lines().map(str::trim).collect())
        }

        fn lint(&self, _: &str, _: &str) -> Result<Vec<String>, ScriptError> {
            Ok(vec!["stdin:1:1: Unexpected var".into()])
        }
    }

    fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        for (path, content) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
        }
        (dir, Config::with_defaults(root, "my-plugin"))
    }

    fn js_files(config: &Config) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(config.path("assets/js"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(".js"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_bundle_and_minify() {
        let (_dir, config) = project(&[
            ("assets/js/src/x.js", "var x = 1;\n"),
            ("assets/js/src/y.js", "var y = 2;\nvar z = 3;\n"),
        ]);
        let toolchain = FakeToolchain::default();

        bundle_scripts(&config, &toolchain).unwrap();
        minify_scripts(&config, &toolchain).unwrap();
        minify_scripts(&config, &toolchain).unwrap();

        assert_eq!(
            js_files(&config),
            vec!["my-plugin-admin.js", "my-plugin-admin.min.js"]
        );

        let bundle = fs::read_to_string(config.path("assets/js/my-plugin-admin.js")).unwrap();
        assert_eq!(
            bundle,
            ";(function($) {\nvar x = 1;\nvar y = 2;\nvar z = 3;\n}(jQuery));\n//# sourceMappingURL=my-plugin-admin.js.map\n"
        );

        let minified =
            fs::read_to_string(config.path("assets/js/my-plugin-admin.min.js")).unwrap();
        assert!(!minified.contains("sourceMappingURL"));
    }

    #[test]
    fn test_bundle_map() {
        let (_dir, config) = project(&[
            ("assets/js/src/x.js", "var x = 1;\n"),
            ("assets/js/src/y.js", "var y = 2;\nvar z = 3;\n"),
        ]);

        bundle_scripts(&config, &FakeToolchain::default()).unwrap();

        let map = fs::read_to_string(config.path("assets/js/my-plugin-admin.js.map")).unwrap();
        let map: SourceMap = serde_json::from_str(&map).unwrap();

        assert_eq!(map.sources, vec!["assets/js/src/x.js", "assets/js/src/y.js"]);
        assert_eq!(map.source_root.as_deref(), Some("../../"));
        assert_eq!(map.mappings, ";AAAA;ACAA;AACA");
    }

    #[test]
    fn test_use_strict() {
        let config = IifeConfig {
            params: vec!["$".into(), "wp".into()],
            args: vec!["jQuery".into(), "window.wp".into()],
            use_strict: true,
        };

        let (header, footer) = iife(&config);
        assert_eq!(header, ";(function($, wp) {\n'use strict';\n");
        assert_eq!(footer, "}(jQuery, window.wp));\n");
    }

    #[test]
    fn test_transpile_failure_writes_nothing() {
        let (_dir, config) = project(&[
            ("assets/js/src/x.js", "var x = 1;\n"),
            ("assets/js/src/y.js", "var = ;\n"),
        ]);
        let toolchain = FakeToolchain { broken: Some("y.js") };

        let err = bundle_scripts(&config, &toolchain).unwrap_err();
        assert!(matches!(err, ScriptError::Compile(name, _) if name == "assets/js/src/y.js"));
        assert!(!config.path("assets/js/my-plugin-admin.js").exists());
    }

    #[test]
    fn test_no_sources() {
        let (_dir, config) = project(&[]);
        let written = bundle_scripts(&config, &FakeToolchain::default()).unwrap();
        assert!(written.is_empty());
        assert!(!config.path("assets/js").exists());
    }

    #[test]
    fn test_strip_map_comment() {
        assert_eq!(
            strip_map_comment("a();\n//# sourceMappingURL=a.js.map\n"),
            "a();"
        );
    }
}
