use std::{
    fs, io,
    path::{Path, PathBuf},
};

mod association;
mod compiler;
mod config;
mod load_paths;
mod page;
mod sass;
mod site;

pub use association::PageAssociation;
pub use compiler::{CompileError, Compiler, CompilerOptions, GrassCompiler, Rendered, Syntax};
pub use config::{SassConfig, SassStyle, SiteConfig, SourceMapMode, DEFAULT_SASS_DIR};
pub use load_paths::{normalize, resolve_load_paths, sanitized_path, GlobalLoadPaths, LoadPathResolver};
pub use page::{Page, SourceMapPage};
pub use sass::{SassConverter, SyntaxError};
pub use site::Site;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] io::Error),
    #[error("{0}")]
    GlobPatternError(#[from] glob::PatternError),
    #[error("{0}")]
    GlobError(#[from] glob::GlobError),
    #[error("failed to parse config {0}: {1}")]
    Config(PathBuf, serde_yaml::Error),
    #[error("failed to convert {0}: {1}")]
    Convert(PathBuf, SyntaxError),
    #[error("no file name for: {0}")]
    NoFileName(PathBuf),
}

pub fn glob(glob: impl AsRef<str>) -> Result<Glob, Error> {
    let paths = glob::glob(glob.as_ref())?
        .into_iter()
        .collect::<Result<Vec<PathBuf>, glob::GlobError>>()?;
    Ok(Glob { paths })
}

pub fn write(contents: impl Into<String>, to: impl AsRef<Path>) -> Result<(), Error> {
    // Create directory tree
    if let Some(parent) = to.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::debug!(path = %to.as_ref().display(), "writing output");
    fs::write(to.as_ref(), contents.into())?;
    Ok(())
}

#[derive(Debug)]
pub struct Glob {
    paths: Vec<PathBuf>,
}

impl Glob {
    pub fn filter(mut self, predicate: impl Fn(&Path) -> bool) -> Self {
        self.paths.retain(|path| predicate(path));
        self
    }

    pub fn parse<T>(self, parse_fn: impl Fn(PathBuf) -> Result<T, Error>) -> Result<Vec<T>, Error> {
        self.paths.into_iter().map(parse_fn).collect()
    }

    pub fn into_paths(self) -> Vec<PathBuf> {
        self.paths
    }
}
