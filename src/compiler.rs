//! The boundary to the Sass compiler.
//!
//! [`Compiler`] is what the converter talks to. [`GrassCompiler`] implements
//! it on top of [`grass`], adding the source map and the `sourceMappingURL`
//! comment that grass does not produce itself.

use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use crate::SassStyle;

/// Syntax dialect of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syntax {
    /// Brace-delimited `.scss`.
    Scss,
    /// Indented `.sass`.
    Sass,
}

/// Everything the compiler needs to know about one conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerOptions {
    pub syntax: Syntax,
    pub style: SassStyle,
    /// Name of the input, used in error messages and as the main map source.
    pub filename: String,
    /// Name of the generated stylesheet, recorded as the map's `file`.
    pub output_path: String,
    /// Name of the map. No map is generated when empty.
    pub source_map_file: String,
    /// Directory map sources are made relative to.
    pub source_dir: Option<PathBuf>,
    pub load_paths: Vec<PathBuf>,
    /// Embed the sources' text in the map.
    pub source_map_contents: bool,
    pub omit_source_map_url: bool,
    /// Options forwarded from the site configuration as is.
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub css: String,
    pub source_map: Option<String>,
    /// Files the compiler read through `@import`, in the order read.
    pub imports: Vec<PathBuf>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    /// 1-based line of the offending input, when known.
    pub line: Option<usize>,
}

impl CompileError {
    fn from_grass(error: Box<grass::Error>) -> Self {
        let rendered = error.to_string();
        match (*error).kind() {
            grass::ErrorKind::ParseError { message, loc, .. } => Self {
                message,
                line: Some(loc.begin.line + 1),
            },
            grass::ErrorKind::IoError(e) => Self {
                message: e.to_string(),
                line: None,
            },
            grass::ErrorKind::FromUtf8Error(message) => Self {
                message,
                line: None,
            },
            #[allow(unreachable_patterns)]
            _ => Self {
                message: rendered,
                line: None,
            },
        }
    }
}

pub trait Compiler: Send + Sync + fmt::Debug {
    fn compile(&self, content: &str, options: &CompilerOptions) -> Result<Rendered, CompileError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GrassCompiler;

impl Compiler for GrassCompiler {
    fn compile(&self, content: &str, options: &CompilerOptions) -> Result<Rendered, CompileError> {
        let quiet = options
            .extra
            .get("quiet")
            .and_then(serde_yaml::Value::as_bool)
            .unwrap_or(false);
        for key in options.extra.keys().filter(|key| key.as_str() != "quiet") {
            tracing::debug!(option = %key, "ignoring option unsupported by grass");
        }

        let fs = RecordingFs::default();
        let mut css = {
            let grass_options = grass::Options::default()
                .style(output_style(options.style))
                .input_syntax(input_syntax(options.syntax))
                .load_paths(options.load_paths.as_slice())
                .allows_charset(false)
                .quiet(quiet)
                .fs(&fs);
            grass::from_string(content.to_owned(), &grass_options)
                .map_err(CompileError::from_grass)?
        };

        let reads = fs.into_reads();
        let imports = reads.iter().map(|(path, _)| path.clone()).collect();
        if options.source_map_file.is_empty() {
            return Ok(Rendered {
                css,
                source_map: None,
                imports,
            });
        }

        let source_map = build_source_map(content, options, reads);
        if source_map.is_some() && !options.omit_source_map_url {
            if !css.is_empty() && !css.ends_with('\n') {
                css.push('\n');
            }
            css.push_str(&format!("/*# sourceMappingURL={} */", options.source_map_file));
        }
        Ok(Rendered {
            css,
            source_map,
            imports,
        })
    }
}

// grass renders only expanded and compressed output.
fn output_style(style: SassStyle) -> grass::OutputStyle {
    match style {
        SassStyle::Compressed => grass::OutputStyle::Compressed,
        SassStyle::Nested | SassStyle::Expanded | SassStyle::Compact => grass::OutputStyle::Expanded,
    }
}

fn input_syntax(syntax: Syntax) -> grass::InputSyntax {
    match syntax {
        Syntax::Scss => grass::InputSyntax::Scss,
        Syntax::Sass => grass::InputSyntax::Sass,
    }
}

/// Filesystem used by grass that remembers every file read while compiling.
#[derive(Debug, Default)]
struct RecordingFs {
    reads: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingFs {
    fn into_reads(self) -> Vec<(PathBuf, String)> {
        self.reads.into_inner().unwrap_or_default()
    }
}

impl grass::Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        grass::Fs::is_dir(&grass::StdFs, path)
    }

    fn is_file(&self, path: &Path) -> bool {
        grass::Fs::is_file(&grass::StdFs, path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let bytes = grass::Fs::read(&grass::StdFs, path)?;
        if let Ok(mut reads) = self.reads.lock() {
            if !reads.iter().any(|(read, _)| read == path) {
                reads.push((path.to_path_buf(), String::from_utf8_lossy(&bytes).into_owned()));
            }
        }
        Ok(bytes)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapDocument<'a> {
    version: u8,
    file: &'a str,
    sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources_content: Option<Vec<String>>,
    names: Vec<String>,
    mappings: &'a str,
}

/// Build a version 3, file-level source map: it lists every source that went
/// into the stylesheet but carries no segment mappings.
fn build_source_map(
    content: &str,
    options: &CompilerOptions,
    imports: Vec<(PathBuf, String)>,
) -> Option<String> {
    let mut sources = vec![options.filename.clone()];
    let mut contents = vec![content.to_owned()];
    for (path, text) in imports {
        let source = match &options.source_dir {
            Some(dir) => relative_path(&path, dir),
            None => path,
        };
        sources.push(source.to_string_lossy().replace('\\', "/"));
        contents.push(text);
    }

    let document = SourceMapDocument {
        version: 3,
        file: &options.output_path,
        sources,
        sources_content: options.source_map_contents.then_some(contents),
        names: Vec::new(),
        mappings: "",
    };
    match serde_json::to_string(&document) {
        Ok(map) => Some(map),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize source map");
            None
        }
    }
}

/// Express `path` relative to the directory `base`.
fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path = fs::canonicalize(path).unwrap_or_else(|_| crate::load_paths::absolutize(path));
    let base = fs::canonicalize(base).unwrap_or_else(|_| crate::load_paths::absolutize(base));

    let path_components: Vec<Component> = path.components().collect();
    let base_components: Vec<Component> = base.components().collect();
    let common = path_components
        .iter()
        .zip(&base_components)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &path_components[common..] {
        relative.push(component);
    }
    relative
}
