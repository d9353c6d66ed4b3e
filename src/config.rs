use serde::{Deserialize, Deserializer};
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::Error;

/// Directory searched for partials when `sass_dir` is not configured.
pub const DEFAULT_SASS_DIR: &str = "_sass";

/// Output style requested from the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SassStyle {
    Nested,
    #[default]
    Expanded,
    Compact,
    Compressed,
}

impl SassStyle {
    pub const ALLOWED: [&'static str; 4] = ["nested", "expanded", "compact", "compressed"];

    /// Parse a configured style name. A leading `:` is ignored, so
    /// `:compressed` and `compressed` are the same style.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches(':').to_ascii_lowercase().as_str() {
            "nested" => Some(Self::Nested),
            "expanded" => Some(Self::Expanded),
            "compact" => Some(Self::Compact),
            "compressed" => Some(Self::Compressed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nested => "nested",
            Self::Expanded => "expanded",
            Self::Compact => "compact",
            Self::Compressed => "compressed",
        }
    }
}

impl fmt::Display for SassStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether source maps are generated for associated pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMapMode {
    #[default]
    Always,
    Never,
}

/// The `sass` section of the site configuration.
///
/// Keys this converter does not know about are kept in `extra` and handed to
/// the compiler untouched, unless the site runs in safe mode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SassConfig {
    pub style: Option<String>,
    pub sass_dir: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub load_paths: Vec<String>,
    pub add_charset: bool,
    pub sourcemap: SourceMapMode,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl SassConfig {
    /// The configured style, or [`SassStyle::default`] when it is missing or
    /// not one of [`SassStyle::ALLOWED`].
    pub fn style(&self) -> SassStyle {
        let Some(name) = self.style.as_deref() else {
            return SassStyle::default();
        };
        SassStyle::from_name(name).unwrap_or_else(|| {
            tracing::warn!(
                style = name,
                fallback = %SassStyle::default(),
                "unknown sass style"
            );
            SassStyle::default()
        })
    }

    pub fn sass_dir(&self) -> &str {
        match self.sass_dir.as_deref() {
            Some(dir) if !dir.is_empty() => dir,
            _ => DEFAULT_SASS_DIR,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(path)) => vec![path],
        Some(OneOrMany::Many(paths)) => paths,
    })
}

/// Site-wide settings read from `_config.yml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub safe: bool,
    /// Root directory of the site theme. Its `_sass` directory is always
    /// searched for imports.
    pub theme: Option<PathBuf>,
    pub sass: SassConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            destination: PathBuf::from("_site"),
            safe: false,
            theme: None,
            sass: SassConfig::default(),
        }
    }
}

impl SiteConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document is a valid, fully defaulted config.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// Load the config file at `path`. Relative `source`, `destination` and
    /// `theme` paths are resolved against the directory holding the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)?;
        let mut config =
            Self::from_yaml(&yaml).map_err(|e| Error::Config(path.to_path_buf(), e))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.source = base.join(&config.source);
        config.destination = base.join(&config.destination);
        config.theme = config.theme.map(|theme| base.join(theme));
        Ok(config)
    }

    pub fn theme_sass_dir(&self) -> Option<PathBuf> {
        self.theme.as_ref().map(|theme| theme.join(DEFAULT_SASS_DIR))
    }
}
