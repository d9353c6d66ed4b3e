//! Import search paths for the Sass compiler.
//!
//! Load paths come from three places: the user's `load_paths`, the site's
//! Sass directory and the global paths registered through `SASS_PATH`. In safe
//! mode every one of them is clamped into the site source so a configuration
//! can never make the compiler read files outside of it.

use std::{
    env,
    ffi::OsStr,
    path::{Component, Path, PathBuf},
};

use crate::SassConfig;

/// Global import directories, shared by every converter of a process.
///
/// Built once at startup (usually with [`GlobalLoadPaths::from_env`]) and
/// handed to each converter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalLoadPaths {
    paths: Vec<PathBuf>,
}

impl GlobalLoadPaths {
    pub const ENV_VAR: &'static str = "SASS_PATH";

    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Read `SASS_PATH`, a list of directories separated by the platform path
    /// separator (`:` on Unix, `;` on Windows).
    pub fn from_env() -> Self {
        env::var_os(Self::ENV_VAR)
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    fn parse(value: &OsStr) -> Self {
        Self {
            paths: env::split_paths(value)
                .filter(|path| !path.as_os_str().is_empty())
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component)
            }
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
        }
    }
    normalized
}

/// Clamp `questionable` into `base`.
///
/// The path is first expanded against `/`. If the result lies inside `base`
/// it is kept, otherwise it is re-rooted under `base`: `/etc/passwd` becomes
/// `<base>/etc/passwd` and `../..` becomes `<base>`. `base` must be an
/// absolute, normalized path.
pub fn sanitized_path(base: &Path, questionable: impl AsRef<Path>) -> PathBuf {
    let questionable = questionable.as_ref();
    if questionable == base {
        return base.to_path_buf();
    }

    let raw = questionable.to_string_lossy();
    let expanded = if raw.starts_with('~') {
        PathBuf::from(format!("/{raw}"))
    } else {
        Path::new("/").join(questionable)
    };
    let clean = normalize(&expanded);
    if clean.starts_with(base) {
        return clean;
    }

    let relative: PathBuf = clean
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect();
    if relative.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Make `path` absolute against the working directory and normalize it.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize(&absolute)
}

/// Resolves the ordered list of directories handed to the compiler.
#[derive(Debug, Clone)]
pub struct LoadPathResolver {
    site_source: PathBuf,
    safe: bool,
    globals: GlobalLoadPaths,
    theme_sass_dir: Option<PathBuf>,
}

impl LoadPathResolver {
    pub fn new(site_source: impl AsRef<Path>, safe: bool) -> Self {
        Self {
            site_source: absolutize(site_source.as_ref()),
            safe,
            globals: GlobalLoadPaths::default(),
            theme_sass_dir: None,
        }
    }

    pub fn with_globals(mut self, globals: GlobalLoadPaths) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_theme_sass_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.theme_sass_dir = Some(absolutize(dir.as_ref()));
        self
    }

    pub fn site_source(&self) -> &Path {
        &self.site_source
    }

    pub fn safe(&self) -> bool {
        self.safe
    }

    /// The Sass directory, always clamped into the site source regardless of
    /// safe mode.
    pub fn sass_dir_relative_to_site_source(&self, sass_dir: &str) -> PathBuf {
        sanitized_path(&self.site_source, sass_dir)
    }

    /// Resolve the load paths for one conversion.
    ///
    /// Entries are returned in the order the user listed them, followed by
    /// the Sass directory, the global paths and finally the theme's Sass
    /// directory. Duplicates and entries that are not existing directories
    /// are dropped.
    pub fn resolve(&self, user_load_paths: &[String], sass_dir: &str) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = user_load_paths.iter().map(PathBuf::from).collect();
        candidates.push(self.sass_dir_relative_to_site_source(sass_dir));
        candidates.extend(self.globals.iter().map(Path::to_path_buf));

        if self.safe {
            candidates = candidates
                .iter()
                .map(|path| sanitized_path(&self.site_source, path))
                .collect();
        }

        let mut resolved: Vec<PathBuf> = Vec::new();
        for candidate in &candidates {
            for matched in self.expand(candidate) {
                // Sanitize again, globbing must not produce an escaping path.
                let path = if self.safe {
                    sanitized_path(&self.site_source, &matched)
                } else {
                    normalize(&self.site_source.join(&matched))
                };
                if !resolved.contains(&path) {
                    resolved.push(path);
                }
            }
        }
        resolved.retain(|path| path.is_dir());

        // The theme is installed by the site owner and exempt from clamping.
        if let Some(theme) = &self.theme_sass_dir {
            if theme.is_dir() && !resolved.contains(theme) {
                resolved.push(theme.clone());
            }
        }

        resolved
    }

    /// Expand shell-style globs in `path`. Relative patterns are anchored at
    /// the site source, whose own characters are matched literally.
    fn expand(&self, path: &Path) -> Vec<PathBuf> {
        let pattern = match path.strip_prefix(&self.site_source) {
            Ok(rest) => anchored_pattern(&self.site_source, rest),
            Err(_) if path.is_absolute() => path.to_string_lossy().into_owned(),
            Err(_) => anchored_pattern(&self.site_source, path),
        };

        match glob::glob(&pattern) {
            Ok(paths) => paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unreadable load path match");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "invalid load path pattern, using it literally");
                vec![path.to_path_buf()]
            }
        }
    }
}

fn anchored_pattern(root: &Path, rest: &Path) -> String {
    let root = glob::Pattern::escape(&*root.to_string_lossy());
    if rest.as_os_str().is_empty() {
        root
    } else {
        format!("{}/{}", root.trim_end_matches('/'), rest.to_string_lossy())
    }
}

/// Resolve the load paths of `config` for a site rooted at `site_source`.
pub fn resolve_load_paths(
    site_source: impl AsRef<Path>,
    config: &SassConfig,
    safe: bool,
    globals: &GlobalLoadPaths,
) -> Vec<PathBuf> {
    LoadPathResolver::new(site_source, safe)
        .with_globals(globals.clone())
        .resolve(&config.load_paths, config.sass_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn site() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = absolutize(&fs::canonicalize(dir.path()).unwrap());
        fs::create_dir_all(root.join("_sass")).unwrap();
        (dir, root)
    }

    fn config(load_paths: &[&str]) -> SassConfig {
        SassConfig {
            load_paths: load_paths.iter().map(|p| p.to_string()).collect(),
            ..SassConfig::default()
        }
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn sanitized_path_reroots_absolute_paths() {
        let base = Path::new("/srv/site");
        assert_eq!(
            sanitized_path(base, "/etc/passwd"),
            PathBuf::from("/srv/site/etc/passwd")
        );
        assert_eq!(sanitized_path(base, "_sass"), PathBuf::from("/srv/site/_sass"));
        assert_eq!(sanitized_path(base, "../.."), PathBuf::from("/srv/site"));
        assert_eq!(
            sanitized_path(base, "../../etc/passwd"),
            PathBuf::from("/srv/site/etc/passwd")
        );
        assert_eq!(
            sanitized_path(base, "~/.ssh"),
            PathBuf::from("/srv/site/~/.ssh")
        );
    }

    #[test]
    fn sanitized_path_keeps_paths_inside_base() {
        let base = Path::new("/srv/site");
        assert_eq!(sanitized_path(base, base), PathBuf::from("/srv/site"));
        assert_eq!(
            sanitized_path(base, "/srv/site/_sass"),
            PathBuf::from("/srv/site/_sass")
        );
        assert_eq!(
            sanitized_path(base, "/srv/site/a/../_sass"),
            PathBuf::from("/srv/site/_sass")
        );
        // A sibling sharing the prefix is still outside.
        assert_eq!(
            sanitized_path(base, "/srv/site-other"),
            PathBuf::from("/srv/site/srv/site-other")
        );
    }

    #[test]
    fn default_load_path_is_sass_dir() {
        let (_dir, root) = site();
        for safe in [false, true] {
            let paths = resolve_load_paths(&root, &config(&[]), safe, &GlobalLoadPaths::default());
            assert_eq!(paths, vec![root.join("_sass")]);
        }
    }

    #[test]
    fn custom_sass_dir() {
        let (_dir, root) = site();
        fs::create_dir(root.join("_scss")).unwrap();
        let config = SassConfig {
            sass_dir: Some("_scss".to_owned()),
            ..SassConfig::default()
        };
        let paths = resolve_load_paths(&root, &config, false, &GlobalLoadPaths::default());
        assert_eq!(paths, vec![root.join("_scss")]);
    }

    #[test]
    fn sass_dir_outside_source_is_rerooted() {
        let (_dir, root) = site();
        let resolver = LoadPathResolver::new(&root, true);
        assert_eq!(
            resolver.sass_dir_relative_to_site_source("/etc/passwd"),
            root.join("etc/passwd")
        );

        let config = SassConfig {
            sass_dir: Some("/etc/passwd".to_owned()),
            ..SassConfig::default()
        };
        let paths = resolve_load_paths(&root, &config, true, &GlobalLoadPaths::default());
        assert!(paths.is_empty(), "{paths:?}");
    }

    #[test]
    fn sass_dir_listed_twice_appears_once() {
        let (_dir, root) = site();
        let external = tempfile::tempdir().unwrap();
        let external_lib = absolutize(&fs::canonicalize(external.path()).unwrap());
        let sass_dir = root.join("_sass");

        let config = config(&[
            &*external_lib.to_string_lossy(),
            &*sass_dir.to_string_lossy(),
        ]);
        let paths = resolve_load_paths(&root, &config, false, &GlobalLoadPaths::default());
        assert_eq!(paths, vec![external_lib, sass_dir]);
    }

    #[test]
    fn unsafe_mode_keeps_external_paths() {
        let (_dir, root) = site();
        let external = tempfile::tempdir().unwrap();
        let external_lib = absolutize(&fs::canonicalize(external.path()).unwrap());

        let config = config(&[&*external_lib.to_string_lossy()]);
        let paths = resolve_load_paths(&root, &config, false, &GlobalLoadPaths::default());
        assert_eq!(paths, vec![external_lib, root.join("_sass")]);
    }

    #[test]
    fn safe_mode_ignores_external_paths() {
        let (_dir, root) = site();
        let external = tempfile::tempdir().unwrap();
        let external_lib = absolutize(&fs::canonicalize(external.path()).unwrap());

        let config = config(&[&*external_lib.to_string_lossy()]);
        let paths = resolve_load_paths(&root, &config, true, &GlobalLoadPaths::default());
        assert_eq!(paths, vec![root.join("_sass")]);
    }

    #[test]
    fn globs_are_expanded_relative_to_source() {
        let (_dir, root) = site();
        fs::create_dir_all(root.join("bower_components/jquery")).unwrap();
        fs::create_dir_all(root.join("bower_components/bootstrap")).unwrap();
        fs::write(root.join("bower_components/README"), "not a dir").unwrap();

        for safe in [false, true] {
            let paths = resolve_load_paths(
                &root,
                &config(&["bower_components/*"]),
                safe,
                &GlobalLoadPaths::default(),
            );
            assert_eq!(
                paths,
                vec![
                    root.join("bower_components/bootstrap"),
                    root.join("bower_components/jquery"),
                    root.join("_sass"),
                ]
            );
        }
    }

    #[test]
    fn safe_mode_never_escapes_source() {
        let (_dir, root) = site();
        fs::create_dir_all(root.join("bower_components/jquery")).unwrap();
        let tmp = std::env::temp_dir();

        let config = config(&[&*tmp.to_string_lossy(), "bower_components/*", "../..", "/**/*"]);
        let paths = resolve_load_paths(&root, &config, true, &GlobalLoadPaths::default());

        assert!(paths.contains(&root.join("bower_components/jquery")));
        assert!(!paths.contains(&tmp));
        for path in &paths {
            assert!(path.starts_with(&root), "{path:?} escaped {root:?}");
            assert!(
                !path.components().any(|c| c == Component::ParentDir),
                "{path:?} contains .."
            );
        }
    }

    #[test]
    fn nonexistent_paths_are_dropped() {
        let (_dir, root) = site();
        let paths = resolve_load_paths(
            &root,
            &config(&["missing", "/definitely/not/here"]),
            false,
            &GlobalLoadPaths::default(),
        );
        assert_eq!(paths, vec![root.join("_sass")]);
    }

    #[test]
    fn source_with_glob_characters_is_matched_literally() {
        let dir = tempfile::tempdir().unwrap();
        let root = absolutize(&fs::canonicalize(dir.path()).unwrap()).join("[alpha]beta");
        fs::create_dir_all(root.join("_sass")).unwrap();
        fs::create_dir_all(root.join("vendor/grid")).unwrap();

        let paths = resolve_load_paths(&root, &config(&["vendor/*"]), true, &GlobalLoadPaths::default());
        assert_eq!(paths, vec![root.join("vendor/grid"), root.join("_sass")]);
    }

    #[test]
    fn global_paths_follow_sass_dir() {
        let (_dir, root) = site();
        let global = tempfile::tempdir().unwrap();
        let global_dir = absolutize(&fs::canonicalize(global.path()).unwrap());
        let globals = GlobalLoadPaths::new([global_dir.clone()]);

        let paths = resolve_load_paths(&root, &config(&[]), false, &globals);
        assert_eq!(paths, vec![root.join("_sass"), global_dir]);

        // Clamped into the source, where it does not exist.
        let paths = resolve_load_paths(&root, &config(&[]), true, &globals);
        assert_eq!(paths, vec![root.join("_sass")]);
    }

    #[test]
    fn theme_sass_dir_is_kept_in_safe_mode() {
        let (_dir, root) = site();
        let theme = tempfile::tempdir().unwrap();
        let theme_sass = absolutize(&fs::canonicalize(theme.path()).unwrap()).join("_sass");
        fs::create_dir(&theme_sass).unwrap();

        let paths = LoadPathResolver::new(&root, true)
            .with_theme_sass_dir(&theme_sass)
            .resolve(&[], "_sass");
        assert_eq!(paths, vec![root.join("_sass"), theme_sass]);
    }

    #[test]
    fn parses_sass_path() {
        let value = env::join_paths(["/opt/sass", "", "/usr/share/sass"]).unwrap();
        let globals = GlobalLoadPaths::parse(&value);
        assert_eq!(
            globals.iter().collect::<Vec<_>>(),
            vec![Path::new("/opt/sass"), Path::new("/usr/share/sass")]
        );
        assert!(GlobalLoadPaths::parse(OsStr::new("")).is_empty());
    }
}
