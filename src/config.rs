//! Project configuration.
//!
//! A [`Config`] is built once at start from three files in the project root:
//!
//! - `package.json` (required): the package `name` names the script bundle and
//!   the translation catalog, and doubles as the text domain;
//! - `wpbuild.toml` (optional): overrides for any of the task sections below;
//! - `.stylelintrc.json` (optional): rules for the style linter.
//!
//! The value is immutable afterwards and shared with every task through the
//! task context.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::tasks::stylelint::LintConfig;

pub const PACKAGE_FILE: &str = "package.json";
pub const SETTINGS_FILE: &str = "wpbuild.toml";
pub const STYLELINT_FILE: &str = ".stylelintrc.json";

#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    pub src: Vec<String>,
    pub dest: String,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            src: vec!["assets/sass/**/*.scss".into()],
            dest: "assets/css".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IifeConfig {
    pub params: Vec<String>,
    pub args: Vec<String>,
    pub use_strict: bool,
}

impl Default for IifeConfig {
    fn default() -> Self {
        Self {
            params: vec!["$".into()],
            args: vec!["jQuery".into()],
            use_strict: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptsConfig {
    pub src: Vec<String>,
    pub uglify: Vec<String>,
    pub dest: String,
    /// Language level passed to the transpiler.
    pub target: String,
    /// Transpiler and minifier executable.
    pub esbuild: String,
    /// Linter command line; empty disables linting.
    pub eslint: Vec<String>,
    pub iife: IifeConfig,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            src: vec!["assets/js/src/*.js".into()],
            uglify: vec!["assets/js/*.js".into(), "!assets/js/*.min.js".into()],
            dest: "assets/js".into(),
            target: "es2015".into(),
            esbuild: "esbuild".into(),
            eslint: vec!["eslint".into()],
            iife: IifeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SvgConfig {
    pub remove_view_box: bool,
    pub collapse_groups: bool,
}

impl Default for SvgConfig {
    fn default() -> Self {
        Self {
            remove_view_box: false,
            collapse_groups: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub src: Vec<String>,
    pub dest: String,
    pub jpeg_quality: u8,
    /// PNG compression effort, 0 to 7.
    pub png_level: u8,
    pub svg: SvgConfig,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            src: vec!["docs/assets/img/**/*".into()],
            dest: "docs/assets/img".into(),
            jpeg_quality: 90,
            png_level: 5,
            svg: SvgConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LanguagesConfig {
    pub src: Vec<String>,
    pub dest: String,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            src: vec![
                "**/*.php".into(),
                "!.git/**".into(),
                "!.svn/**".into(),
                "!bin/**".into(),
                "!node_modules/**".into(),
                "!release/**".into(),
                "!vendor/**".into(),
            ],
            dest: "languages".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangelogConfig {
    pub src: String,
    pub rename: String,
    pub dest: String,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            src: "changelog.md".into(),
            rename: "changelog.txt".into(),
            dest: ".".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadmeConfig {
    pub command: Vec<String>,
}

impl Default for ReadmeConfig {
    fn default() -> Self {
        Self {
            command: vec!["php".into(), "bin/wp-readme.php".into()],
        }
    }
}

/// Live reload is off unless the project turns it on. The host of the local
/// site has no default and must come from the project settings; without it the
/// browser script connects from any page that enqueues it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveConfig {
    pub enabled: bool,
    pub site: Option<String>,
    pub port: u16,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            site: None,
            port: 1337,
        }
    }
}

/// Contents of `wpbuild.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub styles: StylesConfig,
    pub scripts: ScriptsConfig,
    pub images: ImagesConfig,
    pub languages: LanguagesConfig,
    pub changelog: ChangelogConfig,
    pub readme: ReadmeConfig,
    pub live: LiveConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root: Utf8PathBuf,
    pub package: Package,
    pub styles: StylesConfig,
    pub scripts: ScriptsConfig,
    pub images: ImagesConfig,
    pub languages: LanguagesConfig,
    pub changelog: ChangelogConfig,
    pub readme: ReadmeConfig,
    pub live: LiveConfig,
    pub stylelint: LintConfig,
}

impl Config {
    /// Loads the configuration of the project rooted at `root`.
    pub fn load(root: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();

        let path = root.join(PACKAGE_FILE);
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let package: Package =
            serde_json::from_str(&text).map_err(|e| ConfigError::Package(path.clone(), e))?;
        if package.name.trim().is_empty() {
            return Err(ConfigError::PackageName(path));
        }

        let path = root.join(SETTINGS_FILE);
        let settings = match read_optional(&path)? {
            Some(text) => toml::from_str(&text).map_err(|e| ConfigError::Settings(path, e))?,
            None => Settings::default(),
        };

        let path = root.join(STYLELINT_FILE);
        let stylelint = match read_optional(&path)? {
            Some(text) => serde_json::from_str(&text).map_err(|e| ConfigError::Lint(path, e))?,
            None => LintConfig::default(),
        };

        Ok(Self::from_parts(root, package, settings, stylelint))
    }

    pub fn from_parts(
        root: impl Into<Utf8PathBuf>,
        package: Package,
        settings: Settings,
        stylelint: LintConfig,
    ) -> Self {
        let Settings {
            styles,
            scripts,
            images,
            languages,
            changelog,
            readme,
            live,
        } = settings;

        Self {
            root: root.into(),
            package,
            styles,
            scripts,
            images,
            languages,
            changelog,
            readme,
            live,
            stylelint,
        }
    }

    /// Default configuration for a package called `name`.
    pub fn with_defaults(root: impl Into<Utf8PathBuf>, name: &str) -> Self {
        let package = Package {
            name: name.to_string(),
            version: None,
        };
        Self::from_parts(root, package, Settings::default(), LintConfig::default())
    }

    /// Resolves a project relative path.
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Text domain of the translation catalog.
    pub fn domain(&self) -> &str {
        &self.package.name
    }

    /// File name of the concatenated admin script.
    pub fn bundle_name(&self) -> String {
        format!("{}-admin.js", self.package.name)
    }

    /// Project relative path of the translation catalog.
    pub fn catalog_path(&self) -> Utf8PathBuf {
        Utf8Path::new(&self.languages.dest).join(format!("{}.pot", self.package.name))
    }
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Read(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_load_defaults() {
        let (_dir, root) = project();
        fs::write(root.join(PACKAGE_FILE), r#"{"name": "my-plugin", "version": "1.0.0"}"#).unwrap();

        let config = Config::load(&root).unwrap();
        assert_eq!(config.package.name, "my-plugin");
        assert_eq!(config.bundle_name(), "my-plugin-admin.js");
        assert_eq!(config.catalog_path(), "languages/my-plugin.pot");
        assert_eq!(config.styles.dest, "assets/css");
        assert!(!config.live.enabled);
        assert!(config.live.site.is_none());
    }

    #[test]
    fn test_settings_override() {
        let (_dir, root) = project();
        fs::write(root.join(PACKAGE_FILE), r#"{"name": "my-plugin"}"#).unwrap();
        fs::write(
            root.join(SETTINGS_FILE),
            r#"
[live]
enabled = true
site = "plugin.test"

[images]
jpeg_quality = 80
"#,
        )
        .unwrap();

        let config = Config::load(&root).unwrap();
        assert!(config.live.enabled);
        assert_eq!(config.live.site.as_deref(), Some("plugin.test"));
        assert_eq!(config.images.jpeg_quality, 80);
        assert_eq!(config.images.png_level, 5);
    }

    #[test]
    fn test_unknown_setting_is_rejected() {
        let (_dir, root) = project();
        fs::write(root.join(PACKAGE_FILE), r#"{"name": "my-plugin"}"#).unwrap();
        fs::write(root.join(SETTINGS_FILE), "[styles]\nsource = []\n").unwrap();

        assert!(matches!(Config::load(&root), Err(ConfigError::Settings(..))));
    }

    #[test]
    fn test_missing_package() {
        let (_dir, root) = project();
        assert!(matches!(Config::load(&root), Err(ConfigError::Read(..))));
    }

    #[test]
    fn test_empty_package_name() {
        let (_dir, root) = project();
        fs::write(root.join(PACKAGE_FILE), r#"{"name": " "}"#).unwrap();
        assert!(matches!(Config::load(&root), Err(ConfigError::PackageName(_))));
    }
}
