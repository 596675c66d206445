//! The build tasks of a plugin and how they are wired together.

pub mod docs;
pub mod i18n;
pub mod images;
pub mod mqpack;
pub mod scripts;
pub mod styles;
pub mod stylelint;
pub mod svg;

use crate::config::Config;
use crate::error::FileSetError;
use crate::fileset::PatternSet;
use crate::task::{Registry, Task, action, parallel, series};
use crate::watch::Watcher;

/// PHP templates whose edits trigger a full page reload.
const TEMPLATES: [&str; 4] = ["**/*.php", "!node_modules/**", "!release/**", "!vendor/**"];

fn styles() -> Task {
    series([
        action("sasslint", styles::sasslint),
        action("adminstyles", styles::adminstyles),
    ])
    .named("styles")
}

fn scripts() -> Task {
    series([
        action("adminscripts", scripts::adminscripts),
        action("uglifyscripts", scripts::uglifyscripts),
    ])
    .named("scripts")
}

/// Every entry point a user can run by name, except `watch`.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(action("sasslint", styles::sasslint))
        .register(action("adminstyles", styles::adminstyles))
        .register(styles())
        .register(action("adminscripts", scripts::adminscripts))
        .register(action("uglifyscripts", scripts::uglifyscripts))
        .register(scripts())
        .register(action("images", images::images))
        .register(action("translate", i18n::translate))
        .register(action("changelog", docs::changelog))
        .register(action("readme", docs::readme))
        .register(
            parallel([
                styles(),
                scripts(),
                action("images", images::images),
                action("translate", i18n::translate),
                action("changelog", docs::changelog),
                action("readme", docs::readme),
            ])
            .named("default"),
        );
    registry
}

/// Bindings of the watch entry point.
pub fn watcher(config: &Config) -> Result<Watcher, FileSetError> {
    let mut watcher = Watcher::new(config.root.clone())
        .bind(
            PatternSet::new(&config.styles.src)?,
            action("adminstyles", styles::adminstyles),
        )
        .bind(
            PatternSet::new(&config.scripts.src)?,
            action("adminscripts", scripts::adminscripts),
        );

    if config.live.enabled {
        let reload = action("reload", |ctx| {
            if let Some(live) = &ctx.live {
                live.reload();
            }
            Ok(())
        });
        watcher = watcher.bind(PatternSet::new(TEMPLATES)?, reload);
    }

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points() {
        let registry = registry();
        let names: Vec<_> = registry.names().collect();

        for name in ["styles", "scripts", "images", "translate", "changelog", "readme", "default"] {
            assert!(names.contains(&name), "missing {name}");
        }
        assert!(registry.get("watch").is_none());
    }

    #[test]
    fn test_default_tree() {
        let tree = registry().to_string();
        let default = tree
            .split_once("default\n")
            .map(|(_, rest)| rest)
            .unwrap();

        assert!(default.starts_with(
            "├─ styles <series>\n│  ├─ sasslint\n│  └─ adminstyles\n├─ scripts <series>\n"
        ));
    }

    #[test]
    fn test_php_binding_needs_live_reload() {
        let mut config = Config::with_defaults("/project", "my-plugin");
        assert_eq!(watcher(&config).unwrap().bindings().len(), 2);

        config.live.enabled = true;
        let watcher = watcher(&config).unwrap();
        assert_eq!(watcher.bindings().len(), 3);
        assert!(watcher.bindings()[2].patterns.matches("includes/admin.php"));
        assert!(!watcher.bindings()[2].patterns.matches("vendor/lib/dep.php"));
    }
}
