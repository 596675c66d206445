use std::fmt::Display;
use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::Utf8Path;
use console::Style;
use indicatif::ProgressStyle;

use crate::hash::Hash32;

const ANSI_BLUE: Style = Style::new().blue();

static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

pub(crate) fn task_style() -> &'static ProgressStyle {
    &TASK_STYLE
}

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Writes `data` to `path`, creating parent directories. Files whose content
/// is already identical are left alone. Returns whether the file was written.
pub(crate) fn write_if_changed(path: &Utf8Path, data: &[u8]) -> std::io::Result<bool> {
    if let Ok(existing) = fs::read(path)
        && Hash32::hash(&existing) == Hash32::hash(data)
    {
        return Ok(false);
    }

    if let Some(dir) = path.parent()
        && !dir.as_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)?;
    Ok(true)
}
