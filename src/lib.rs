#![forbid(unsafe_code)]
//! Asset build runner for WordPress plugins.
//!
//! Compiles Sass to CSS, bundles and minifies the admin scripts, optimizes the
//! documentation images, extracts translatable strings into a `.pot` catalog
//! and keeps the changelog and readme up to date. Every entry point is a named
//! [`Task`] in the [`Registry`] returned by [`tasks::registry`]; `watch` is
//! the one exception, it reruns the style and script tasks on file changes
//! until the process is stopped.

pub mod config;
mod error;
pub mod fileset;
mod hash;
mod io;
pub mod live;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod sourcemap;
pub mod task;
pub mod tasks;
pub mod watch;

use camino::Utf8Path;
use console::style;

pub use crate::config::Config;
pub use crate::error::*;
pub use crate::live::LiveReload;
pub use crate::task::{Registry, Task, TaskContext, TaskResult};

/// Name of the entry point that watches for changes.
pub const WATCH: &str = "watch";

/// Where the browser side of live reload is written, relative to the root.
pub const LIVE_SCRIPT: &str = ".cache/wpbuild/livereload.js";

/// Whether an entry point runs once, or keeps watching for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Build,
    Watch,
}

impl Mode {
    fn of(task: &str) -> Self {
        match task {
            WATCH => Mode::Watch,
            _ => Mode::Build,
        }
    }
}

/// Runs the entry point `task` of the project at `root`.
pub fn run(root: &Utf8Path, task: &str) -> Result<(), WpbuildError> {
    let config = Config::load(root)?;

    let mode = Mode::of(task);
    eprintln!(
        "Running {} {} for {}.",
        style("wpbuild").red(),
        style(task).blue(),
        style(config.domain()).yellow()
    );

    match mode {
        Mode::Build => tasks::registry().run(task, &TaskContext::new(config)),
        Mode::Watch => watch(config),
    }
}

fn watch(config: Config) -> Result<(), WpbuildError> {
    let watcher = tasks::watcher(&config).map_err(WatchError::from)?;
    let mut ctx = TaskContext::new(config);

    if ctx.config.live.enabled {
        let live = LiveReload::start(&ctx.config.live).map_err(WpbuildError::Live)?;

        let path = ctx.config.path(LIVE_SCRIPT);
        io::write_if_changed(&path, live.script().as_bytes()).map_err(WpbuildError::Live)?;
        tracing::info!("enqueue {path} in the plugin admin to enable live reload");

        ctx = ctx.with_live(live);
    }

    watcher.spawn(ctx)?.wait();
    Ok(())
}

/// Every entry point with the tasks it is made of.
pub fn task_tree() -> String {
    format!("{}{WATCH}\n", tasks::registry())
}
