//! Rerunning tasks on file changes.
//!
//! A [`Watcher`] is the idle state: a project root and a list of bindings,
//! each pairing a [`PatternSet`] with the task it triggers. [`Watcher::spawn`]
//! subscribes to the filesystem and hands back a [`WatchHandle`] for the
//! watching state, which lasts until the handle is cancelled.
//!
//! Events are debounced, then every changed path is matched against every
//! binding. Each task whose patterns match runs once per batch, in binding
//! order. A failing task is logged and the watcher keeps going.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};

use crate::error::WatchError;
use crate::fileset::PatternSet;
use crate::task::{Task, TaskContext};

const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct WatchBinding {
    pub patterns: PatternSet,
    pub task: Task,
}

#[derive(Debug)]
pub struct Watcher {
    root: Utf8PathBuf,
    bindings: Vec<WatchBinding>,
}

enum Message {
    Events(DebounceEventResult),
    Stop,
}

impl Watcher {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, patterns: PatternSet, task: Task) -> Self {
        self.bindings.push(WatchBinding { patterns, task });
        self
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Indices of the bindings matching any of `paths`. Paths outside of
    /// `root` are ignored.
    pub fn dirty(&self, root: &Utf8Path, paths: &[PathBuf]) -> Vec<usize> {
        let mut dirty = BTreeSet::new();

        for path in paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };

            for (i, binding) in self.bindings.iter().enumerate() {
                if binding.patterns.matches(relative) {
                    dirty.insert(i);
                }
            }
        }

        dirty.into_iter().collect()
    }

    /// Directories to subscribe to: the static base of every pattern, or its
    /// nearest existing ancestor, with nested directories collapsed.
    fn watch_roots(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut roots = HashSet::new();

        for binding in &self.bindings {
            for base in binding.patterns.bases() {
                let mut path = match base.as_str() {
                    "" => root.to_path_buf(),
                    _ => root.join(&base),
                };
                while !path.is_dir() && path.as_path() != root {
                    match path.parent() {
                        Some(parent) => path = parent.to_path_buf(),
                        None => break,
                    }
                }
                roots.insert(path);
            }
        }

        collapse_watch_paths(roots)
    }

    pub fn spawn(self, ctx: TaskContext) -> Result<WatchHandle, WatchError> {
        let root = self.root.canonicalize_utf8()?;
        let roots = self.watch_roots(&root);

        let (tx, rx) = std::sync::mpsc::channel();
        let events = tx.clone();
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            let _ = events.send(Message::Events(result));
        })?;

        for path in &roots {
            tracing::info!("watching {path}");
            debouncer.watch(path, RecursiveMode::Recursive)?;
        }

        let thread = std::thread::spawn(move || self.run(&root, rx, &ctx));

        Ok(WatchHandle {
            tx,
            thread,
            roots,
            _debouncer: debouncer,
        })
    }

    fn run(self, root: &Utf8Path, rx: Receiver<Message>, ctx: &TaskContext) {
        while let Ok(Message::Events(result)) = rx.recv() {
            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                    continue;
                }
            };

            let paths: Vec<_> = events
                .iter()
                .filter(|e| !matches!(e.event.kind, EventKind::Access(_)))
                .flat_map(|e| e.event.paths.iter().cloned())
                .collect();

            for index in self.dirty(root, &paths) {
                let task = &self.bindings[index].task;
                tracing::info!("change detected, running '{}'", task.name());
                if let Err(e) = task.run(ctx) {
                    tracing::error!("{e}");
                }
            }
        }
    }
}

/// Watching state; dropping it without [`WatchHandle::cancel`] leaves the
/// worker thread blocked.
pub struct WatchHandle {
    tx: Sender<Message>,
    thread: JoinHandle<()>,
    roots: Vec<Utf8PathBuf>,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl WatchHandle {
    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Stops the subscriptions and waits for a running task to finish.
    pub fn cancel(self) {
        let _ = self.tx.send(Message::Stop);
        drop(self._debouncer);
        if self.thread.join().is_err() {
            tracing::error!("watch thread panicked");
        }
    }

    /// Blocks for as long as the watcher runs, which is forever unless the
    /// worker thread dies.
    pub fn wait(self) {
        let WatchHandle {
            tx,
            thread,
            _debouncer,
            ..
        } = self;
        drop(tx);

        if thread.join().is_err() {
            tracing::error!("watch thread panicked");
        }
    }
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// Watches are recursive, so if we watch `/a` there is no point in watching
/// `/a/b` as well.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
