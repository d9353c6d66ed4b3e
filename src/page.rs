use gray_matter::{engine::YAML, Matter};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::Error;

/// A stylesheet page of the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    dir: PathBuf,
    name: String,
    content: String,
}

impl Page {
    /// Create a page named `name` living in `dir`, relative to the site source.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Read the page at `path`, which must live under `site_source`.
    /// Front matter, if any, is stripped from the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has no file name.
    pub fn read(site_source: &Path, path: &Path) -> Result<Self, Error> {
        let name = path
            .file_name()
            .ok_or_else(|| Error::NoFileName(path.to_path_buf()))?
            .to_string_lossy()
            .to_string();
        let dir = path
            .parent()
            .and_then(|parent| parent.strip_prefix(site_source).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let raw = fs::read_to_string(path)?;
        // A byte order mark would hide the front matter fence.
        let raw = match raw.strip_prefix('\u{feff}') {
            Some(rest) => rest.to_owned(),
            None => raw,
        };
        let content = if raw.starts_with("---") {
            Matter::<YAML>::new().parse(&raw).content
        } else {
            raw
        };

        Ok(Self { dir, name, content })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name without its extension.
    pub fn basename(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((basename, _)) if !basename.is_empty() => basename,
            _ => &self.name,
        }
    }

    /// The extension including the leading dot, or an empty string.
    pub fn ext(&self) -> &str {
        &self.name[self.basename().len()..]
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Path of the source file relative to the site source.
    pub fn relative_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Path of the generated stylesheet relative to the site destination.
    pub fn output_relative_path(&self) -> PathBuf {
        self.dir.join(format!("{}.css", self.basename()))
    }
}

/// The source map generated for a stylesheet page.
///
/// It lives next to the stylesheet as `<basename>.css.map` and is an asset:
/// its output is written as is, never templated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapPage {
    dir: PathBuf,
    name: String,
    output: String,
}

impl SourceMapPage {
    pub fn new(css_page: &Page) -> Self {
        Self {
            dir: css_page.dir().to_path_buf(),
            name: format!("{}.css.map", css_page.basename()),
            output: String::new(),
        }
    }

    pub fn set_source_map(&mut self, map: impl Into<String>) {
        self.output = map.into();
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ext(&self) -> &str {
        ".map"
    }

    pub fn asset_file(&self) -> bool {
        true
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn relative_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}
