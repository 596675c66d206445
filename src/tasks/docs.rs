//! Changelog copy and readme generation.

use std::fs;

use camino::Utf8PathBuf;

use crate::config::Config;
use crate::io::write_if_changed;
use crate::process::{Cmd, ProcessError, ProcessOutput};
use crate::task::{TaskContext, TaskResult};

pub fn changelog(ctx: &TaskContext) -> TaskResult {
    match copy_changelog(&ctx.config)? {
        Some(path) => tracing::info!("Changelog copied to {path}"),
        None => tracing::info!("No {} to copy", ctx.config.changelog.src),
    }
    Ok(())
}

/// Copies the changelog byte for byte under its plain-text name. A project
/// without a changelog has nothing to copy.
pub fn copy_changelog(config: &Config) -> std::io::Result<Option<Utf8PathBuf>> {
    let source = config.path(&config.changelog.src);
    let data = match fs::read(&source) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let output = config
        .path(&config.changelog.dest)
        .join(&config.changelog.rename);
    write_if_changed(&output, &data)?;

    Ok(Some(output))
}

pub fn readme(ctx: &TaskContext) -> TaskResult {
    build_readme(&ctx.config)?;
    Ok(())
}

/// Runs the readme generator in the project root.
pub fn build_readme(config: &Config) -> Result<ProcessOutput, ProcessError> {
    let cmd = Cmd::from_slice(&config.readme.command)?.cwd(&config.root);
    tracing::debug!("Running {}", cmd.display());

    let output = cmd.run()?;
    forward(&output);
    Ok(output)
}

fn forward(output: &ProcessOutput) {
    for line in output.stdout.lines().filter(|line| !line.trim().is_empty()) {
        tracing::info!("{line}");
    }
    for line in output.stderr.lines().filter(|line| !line.trim().is_empty()) {
        tracing::warn!("{line}");
    }
}
