//! Named tasks and the combinators composing them.
//!
//! A [`Task`] is either an action, a plain function over the shared
//! [`TaskContext`], or a composition of other tasks. [`series`] runs its
//! members in order and stops at the first failure, [`parallel`] starts all
//! of its members on the rayon pool and waits for every one of them before
//! reporting.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::Instant;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::error::{TaskError, WpbuildError};
use crate::io::{as_overhead, task_style};
use crate::live::LiveReload;

pub type TaskResult<T = ()> = anyhow::Result<T>;

type ActionFn = dyn Fn(&TaskContext) -> TaskResult + Send + Sync;

/// Everything a task may look at while it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub config: Arc<Config>,
    /// Present only while watching with live reload enabled.
    pub live: Option<LiveReload>,
}

impl TaskContext {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            live: None,
        }
    }

    pub fn with_live(mut self, live: LiveReload) -> Self {
        self.live = Some(live);
        self
    }
}

#[derive(Clone)]
pub enum Task {
    Action {
        name: Cow<'static, str>,
        func: Arc<ActionFn>,
    },
    Series {
        name: Option<Cow<'static, str>>,
        tasks: Vec<Task>,
    },
    Parallel {
        name: Option<Cow<'static, str>>,
        tasks: Vec<Task>,
    },
}

/// Creates a leaf task.
pub fn action<F>(name: impl Into<Cow<'static, str>>, func: F) -> Task
where
    F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
{
    Task::Action {
        name: name.into(),
        func: Arc::new(func),
    }
}

/// Runs `tasks` one after another, aborting at the first failure.
pub fn series(tasks: impl IntoIterator<Item = Task>) -> Task {
    Task::Series {
        name: None,
        tasks: tasks.into_iter().collect(),
    }
}

/// Runs `tasks` concurrently. A failing member never cancels its siblings.
pub fn parallel(tasks: impl IntoIterator<Item = Task>) -> Task {
    Task::Parallel {
        name: None,
        tasks: tasks.into_iter().collect(),
    }
}

impl Task {
    pub fn named(mut self, new: impl Into<Cow<'static, str>>) -> Self {
        match &mut self {
            Task::Action { name, .. } => *name = new.into(),
            Task::Series { name, .. } | Task::Parallel { name, .. } => *name = Some(new.into()),
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Task::Action { name, .. } => name,
            Task::Series { name, .. } => name.as_deref().unwrap_or("<series>"),
            Task::Parallel { name, .. } => name.as_deref().unwrap_or("<parallel>"),
        }
    }

    pub fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        match self {
            Task::Action { name, func } => run_action(name, func.as_ref(), ctx),
            Task::Series { tasks, .. } => {
                for task in tasks {
                    task.run(ctx)?;
                }
                Ok(())
            }
            Task::Parallel { tasks, .. } => {
                let results: Vec<_> = tasks.par_iter().map(|task| task.run(ctx)).collect();

                let mut errors = Vec::new();
                for result in results {
                    match result {
                        Ok(()) => {}
                        Err(TaskError::Many(many)) => errors.extend(many),
                        Err(e) => errors.push(e),
                    }
                }

                match errors.len() {
                    0 => Ok(()),
                    1 => Err(errors.remove(0)),
                    _ => Err(TaskError::Many(errors)),
                }
            }
        }
    }

    fn children(&self) -> &[Task] {
        match self {
            Task::Action { .. } => &[],
            Task::Series { tasks, .. } | Task::Parallel { tasks, .. } => tasks,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Task::Action { .. } => "",
            Task::Series { .. } => "series",
            Task::Parallel { .. } => "parallel",
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Action { name, .. } => f.debug_tuple("Action").field(name).finish(),
            Task::Series { name, tasks } => f
                .debug_struct("Series")
                .field("name", name)
                .field("tasks", tasks)
                .finish(),
            Task::Parallel { name, tasks } => f
                .debug_struct("Parallel")
                .field("name", name)
                .field("tasks", tasks)
                .finish(),
        }
    }
}

fn run_action(name: &str, func: &ActionFn, ctx: &TaskContext) -> Result<(), TaskError> {
    let span = tracing::info_span!("task", name);
    span.pb_set_style(task_style());
    span.pb_set_message(&format!("Running {name}"));
    let _enter = span.enter();

    tracing::info!("Starting '{name}'...");
    let start = Instant::now();

    match func(ctx) {
        Ok(()) => {
            tracing::info!("Finished '{name}' after {}", as_overhead(start));
            Ok(())
        }
        Err(e) => {
            tracing::error!("'{name}' errored after {}", as_overhead(start));
            Err(TaskError::Failed(name.to_string(), e))
        }
    }
}

/// Named entry points.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    tasks: BTreeMap<String, Task>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` under its own name, replacing any earlier entry.
    pub fn register(&mut self, task: Task) -> &mut Self {
        self.tasks.insert(task.name().to_string(), task);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn run(&self, name: &str, ctx: &TaskContext) -> Result<(), WpbuildError> {
        let task = self.get(name).ok_or_else(|| {
            WpbuildError::UnknownTask(name.to_string(), self.names().collect::<Vec<_>>().join(", "))
        })?;

        task.run(ctx)?;
        Ok(())
    }
}

impl Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, task) in &self.tasks {
            writeln!(f, "{name}")?;
            write_children(f, task, "")?;
        }
        Ok(())
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, task: &Task, prefix: &str) -> fmt::Result {
    let children = task.children();
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let branch = if last { "└─" } else { "├─" };

        match child {
            Task::Action { name, .. } => writeln!(f, "{prefix}{branch} {name}")?,
            _ => writeln!(f, "{prefix}{branch} {} <{}>", child.name(), child.kind())?,
        }

        let nested = format!("{prefix}{}", if last { "   " } else { "│  " });
        write_children(f, child, &nested)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn context() -> TaskContext {
        TaskContext::new(Config::with_defaults("/nonexistent", "my-plugin"))
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = log.clone();
        action(name, move |_| {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    fn failing(name: &'static str) -> Task {
        action(name, |_| Err(anyhow::anyhow!("boom")))
    }

    #[test]
    fn test_series_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let task = series([recorder(&log, "a"), recorder(&log, "b"), recorder(&log, "c")]);

        task.run(&context()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_series_fails_fast() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let task = series([failing("a"), recorder(&log, "b")]);

        let err = task.run(&context()).unwrap_err();
        assert_eq!(err.failed(), vec!["a"]);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parallel_does_not_cancel_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let task = parallel([failing("a"), recorder(&log, "b")]);

        let err = task.run(&context()).unwrap_err();
        assert_eq!(err.failed(), vec!["a"]);
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_parallel_collects_every_failure() {
        let task = parallel([failing("a"), series([failing("b")]), failing("c")]);

        let err = task.run(&context()).unwrap_err();
        assert!(matches!(err, TaskError::Many(_)));
        assert_eq!(err.failed(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_registry_unknown_task() {
        let mut registry = Registry::new();
        registry.register(action("styles", |_| Ok(())));

        let err = registry.run("stlyes", &context()).unwrap_err();
        assert!(matches!(err, WpbuildError::UnknownTask(name, names) if name == "stlyes" && names == "styles"));
    }

    #[test]
    fn test_registry_tree() {
        let mut registry = Registry::new();
        registry.register(
            series([action("sasslint", |_| Ok(())), action("adminstyles", |_| Ok(()))])
                .named("styles"),
        );

        assert_eq!(
            registry.to_string(),
            "styles\n├─ sasslint\n└─ adminstyles\n"
        );
    }
}
