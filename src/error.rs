use std::fmt::Write;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WpbuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Task '{0}' is not defined, available tasks: {1}")]
    UnknownTask(String, String),

    #[error("Error while running tasks:\n{0}")]
    Task(#[from] TaskError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Couldn't start the live reload server:\n{0}")]
    Live(std::io::Error),
}

#[derive(Debug, Error)]
pub enum FileSetError {
    #[error("Couldn't compile glob pattern '{0}'.\n{1}")]
    Pattern(String, glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse package metadata '{0}'.\n{1}")]
    Package(Utf8PathBuf, serde_json::Error),

    #[error("Package metadata '{0}' has an empty name")]
    PackageName(Utf8PathBuf),

    #[error("Couldn't parse settings '{0}'.\n{1}")]
    Settings(Utf8PathBuf, toml::de::Error),

    #[error("Couldn't parse stylelint configuration '{0}'.\n{1}")]
    Lint(Utf8PathBuf, serde_json::Error),
}

/// Failure signal of a task, carrying the name of the task that failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("'{0}' errored:\n{1:#}")]
    Failed(String, anyhow::Error),

    #[error("{}", format_many(.0))]
    Many(Vec<TaskError>),
}

impl TaskError {
    /// Names of all failed leaf tasks.
    pub fn failed(&self) -> Vec<&str> {
        match self {
            TaskError::Failed(name, _) => vec![name],
            TaskError::Many(errors) => errors.iter().flat_map(TaskError::failed).collect(),
        }
    }
}

fn format_many(errors: &[TaskError]) -> String {
    let mut acc = format!("{} tasks failed", errors.len());
    for error in errors {
        let _ = write!(acc, "\n{error}");
    }
    acc
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    FileSet(#[from] FileSetError),
}
