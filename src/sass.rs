use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    CompileError, Compiler, CompilerOptions, GrassCompiler, LoadPathResolver, PageAssociation,
    Rendered, SassConfig, SassStyle, SourceMapMode, SourceMapPage, Syntax,
};

const BYTE_ORDER_MARK: char = '\u{feff}';
const CHARSET: &str = "@charset \"UTF-8\";";

/// A stylesheet that failed to compile.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}{}", .line.map(|line| format!(" on line {line}")).unwrap_or_default())]
pub struct SyntaxError {
    message: String,
    line: Option<usize>,
}

impl SyntaxError {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 1-based line of the error, when the compiler reported one.
    pub fn line(&self) -> Option<usize> {
        self.line
    }
}

impl From<CompileError> for SyntaxError {
    fn from(error: CompileError) -> Self {
        Self {
            message: error.message,
            line: error.line,
        }
    }
}

/// Converts Sass or SCSS pages into CSS.
#[derive(Debug)]
pub struct SassConverter {
    syntax: Syntax,
    config: SassConfig,
    resolver: LoadPathResolver,
    compiler: Arc<dyn Compiler>,
    cache: Mutex<HashMap<blake3::Hash, CacheEntry>>,
}

impl SassConverter {
    pub fn new(syntax: Syntax, resolver: LoadPathResolver, config: SassConfig) -> Self {
        Self {
            syntax,
            config,
            resolver,
            compiler: Arc::new(GrassCompiler),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Converter for `.scss` files.
    pub fn scss(resolver: LoadPathResolver, config: SassConfig) -> Self {
        Self::new(Syntax::Scss, resolver, config)
    }

    /// Converter for indented `.sass` files.
    pub fn sass(resolver: LoadPathResolver, config: SassConfig) -> Self {
        Self::new(Syntax::Sass, resolver, config)
    }

    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }

    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    pub fn matches(&self, ext: &str) -> bool {
        let expected = match self.syntax {
            Syntax::Scss => ".scss",
            Syntax::Sass => ".sass",
        };
        ext.eq_ignore_ascii_case(expected)
    }

    pub fn output_ext(&self) -> &'static str {
        ".css"
    }

    pub fn safe(&self) -> bool {
        self.resolver.safe()
    }

    pub fn allow_caching(&self) -> bool {
        !self.safe()
    }

    pub fn add_charset(&self) -> bool {
        self.config.add_charset
    }

    pub fn sass_style(&self) -> SassStyle {
        self.config.style()
    }

    pub fn sass_dir(&self) -> &str {
        self.config.sass_dir()
    }

    pub fn sass_dir_relative_to_site_source(&self) -> PathBuf {
        self.resolver.sass_dir_relative_to_site_source(self.sass_dir())
    }

    pub fn sass_load_paths(&self) -> Vec<PathBuf> {
        self.resolver.resolve(&self.config.load_paths, self.sass_dir())
    }

    /// Options for compiling the page of `association`.
    ///
    /// In safe mode only the computed options reach the compiler, anything
    /// else configured under `sass` is dropped.
    pub fn sass_configs(&self, association: &PageAssociation<'_>) -> CompilerOptions {
        let sourcemap = self.config.sourcemap != SourceMapMode::Never;
        CompilerOptions {
            syntax: self.syntax,
            style: self.sass_style(),
            filename: association.filename(),
            output_path: association.output_path(),
            source_map_file: if sourcemap {
                association.source_map_file()
            } else {
                String::new()
            },
            source_dir: association.source_dir(self.resolver.site_source()),
            load_paths: self.sass_load_paths(),
            source_map_contents: true,
            omit_source_map_url: !association.is_associated() || !sourcemap,
            extra: if self.safe() {
                Default::default()
            } else {
                self.config.extra.clone()
            },
        }
    }

    /// Convert `content` without an associated page.
    ///
    /// # Errors
    ///
    /// Returns an error if the stylesheet does not compile.
    pub fn convert(&self, content: &str) -> Result<String, SyntaxError> {
        self.convert_page(content, &mut PageAssociation::new(), &mut Vec::new())
    }

    /// Convert the content of the page of `association`. The generated source
    /// map page, if any, is pushed to `outputs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stylesheet does not compile.
    pub fn convert_page(
        &self,
        content: &str,
        association: &mut PageAssociation<'_>,
        outputs: &mut Vec<SourceMapPage>,
    ) -> Result<String, SyntaxError> {
        let options = self.sass_configs(association);
        let rendered = self.compile(content, &options)?;

        if association.is_associated() && self.config.sourcemap != SourceMapMode::Never {
            association.emit_source_map(&rendered, outputs);
        }

        let body = rendered
            .css
            .strip_prefix(BYTE_ORDER_MARK)
            .unwrap_or(&rendered.css);
        let replacement = if self.add_charset() { CHARSET } else { "" };
        Ok(format!("{replacement}{body}"))
    }

    fn compile(&self, content: &str, options: &CompilerOptions) -> Result<Rendered, SyntaxError> {
        if !self.allow_caching() {
            return Ok(self.compiler.compile(content, options)?);
        }

        let key = cache_key(content, options);
        let entry = self.cache.lock().ok().and_then(|cache| cache.get(&key).cloned());
        if let Some(entry) = entry {
            if imports_digest(&entry.rendered.imports).as_ref() == Some(&entry.imports) {
                tracing::debug!(file = %options.filename, "sass cache hit");
                return Ok(entry.rendered);
            }
            tracing::debug!(file = %options.filename, "sass imports changed, recompiling");
        }

        let rendered = self.compiler.compile(content, options)?;
        if let Some(imports) = imports_digest(&rendered.imports) {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(
                    key,
                    CacheEntry {
                        rendered: rendered.clone(),
                        imports,
                    },
                );
            }
        }
        Ok(rendered)
    }
}

/// A compiled stylesheet and the state of the files it imported.
#[derive(Debug, Clone)]
struct CacheEntry {
    rendered: Rendered,
    imports: blake3::Hash,
}

fn cache_key(content: &str, options: &CompilerOptions) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content.as_bytes());
    hasher.update(&[0]);
    hasher.update(format!("{options:?}").as_bytes());
    hasher.finalize()
}

/// Hash the current contents of `imports`. `None` if one can't be read.
fn imports_digest(imports: &[PathBuf]) -> Option<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    for path in imports {
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(&[0]);
        hasher.update(&read_import(path)?);
        hasher.update(&[0]);
    }
    Some(hasher.finalize())
}

fn read_import(path: &Path) -> Option<Vec<u8>> {
    fs::read(path)
        .inspect_err(|e| tracing::debug!(path = %path.display(), error = %e, "sass import unreadable"))
        .ok()
}
