//! In-memory assets flowing through the transform stages.
//!
//! Stages are plain functions taking and returning [`Asset`]s. Nothing touches
//! the disk until [`write`] persists a finished batch into a destination
//! directory.

use camino::{Utf8Path, Utf8PathBuf};

use crate::sourcemap::SourceMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `/*# sourceMappingURL=… */`
    Css,
    /// `//# sourceMappingURL=…`
    Js,
}

/// A file on its way to a destination directory.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Output path relative to the destination directory.
    pub path: Utf8PathBuf,
    pub contents: Vec<u8>,
    /// Source map written next to the asset as `<file>.map`.
    pub map: Option<SourceMap>,
}

impl Asset {
    pub fn new(path: impl Into<Utf8PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            map: None,
        }
    }

    pub fn with_extension(mut self, ext: &str) -> Self {
        self.path.set_extension(ext);
        self
    }

    /// `admin.js` with suffix `.min` becomes `admin.min.js`.
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        let stem = self.path.file_stem().unwrap_or_default();
        let name = match self.path.extension() {
            Some(ext) => format!("{stem}{suffix}.{ext}"),
            None => format!("{stem}{suffix}"),
        };
        self.path.set_file_name(name);
        self
    }

    /// Name of the map file written alongside this asset.
    pub fn map_name(&self) -> String {
        format!("{}.map", self.path.file_name().unwrap_or_default())
    }

    /// Attaches `map` and appends the `sourceMappingURL` comment.
    pub fn attach_map(mut self, map: SourceMap, style: CommentStyle) -> Self {
        let name = self.map_name();
        if !self.contents.is_empty() && !self.contents.ends_with(b"\n") {
            self.contents.push(b'\n');
        }
        let comment = match style {
            CommentStyle::Css => format!("/*# sourceMappingURL={name} */\n"),
            CommentStyle::Js => format!("//# sourceMappingURL={name}\n"),
        };
        self.contents.extend_from_slice(comment.as_bytes());
        self.map = Some(map);
        self
    }
}

/// Relative path from the directory of `output` (inside `dest`) back to the
/// project root, used as the `sourceRoot` of generated maps.
pub fn root_from(dest: &Utf8Path, output: &Utf8Path) -> String {
    let depth = dest
        .join(output)
        .parent()
        .map(|dir| {
            dir.components()
                .filter(|c| !matches!(c, camino::Utf8Component::CurDir))
                .count()
        })
        .unwrap_or(0);

    "../".repeat(depth)
}

/// Persists `assets` below `dest`. This is the only stage with side effects.
/// Returns the paths of every file written, maps included.
pub fn write(dest: &Utf8Path, assets: &[Asset]) -> std::io::Result<Vec<Utf8PathBuf>> {
    let mut written = Vec::new();

    for asset in assets {
        let path = dest.join(&asset.path);
        crate::io::write_if_changed(&path, &asset.contents)?;
        written.push(path.clone());

        if let Some(map) = &asset.map {
            let map_path = path.with_file_name(asset.map_name());
            let json = map.to_json().map_err(std::io::Error::other)?;
            crate::io::write_if_changed(&map_path, json.as_bytes())?;
            written.push(map_path);
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::sourcemap::MapBuilder;

    #[test]
    fn test_with_suffix() {
        let asset = Asset::new("nested/admin.js", "x").with_suffix(".min");
        assert_eq!(asset.path, "nested/admin.min.js");
    }

    #[test]
    fn test_with_extension() {
        let asset = Asset::new("admin.scss", "x").with_extension("css");
        assert_eq!(asset.path, "admin.css");
    }

    #[test]
    fn test_root_from() {
        assert_eq!(root_from(Utf8Path::new("assets/css"), Utf8Path::new("admin.css")), "../../");
        assert_eq!(
            root_from(Utf8Path::new("./assets/css"), Utf8Path::new("sub/admin.css")),
            "../../../"
        );
    }

    #[test]
    fn test_write_with_map() {
        let dir = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let map = MapBuilder::new("admin.css").build();
        let asset = Asset::new("admin.css", "a{color:red}").attach_map(map, CommentStyle::Css);

        let written = write(&dest, &[asset]).unwrap();
        assert_eq!(written, vec![dest.join("admin.css"), dest.join("admin.css.map")]);

        let css = fs::read_to_string(dest.join("admin.css")).unwrap();
        assert_eq!(css, "a{color:red}\n/*# sourceMappingURL=admin.css.map */\n");
    }
}
