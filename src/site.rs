use rayon::prelude::*;
use std::path::{Component, Path, PathBuf};

use crate::{
    load_paths::absolutize, write, Error, GlobalLoadPaths, LoadPathResolver, Page,
    PageAssociation, SassConverter, SiteConfig, SourceMapPage,
};

/// A site whose stylesheet pages are compiled to CSS.
#[derive(Debug)]
pub struct Site {
    config: SiteConfig,
    source: PathBuf,
    destination: PathBuf,
    converters: [SassConverter; 2],
    pages: Vec<Page>,
    source_maps: Vec<SourceMapPage>,
}

impl Site {
    pub fn new(config: SiteConfig, globals: GlobalLoadPaths) -> Self {
        let source = absolutize(&config.source);
        let destination = absolutize(&config.destination);

        let mut resolver = LoadPathResolver::new(&source, config.safe).with_globals(globals);
        if let Some(theme_sass_dir) = config.theme_sass_dir() {
            resolver = resolver.with_theme_sass_dir(theme_sass_dir);
        }
        let converters = [
            SassConverter::scss(resolver.clone(), config.sass.clone()),
            SassConverter::sass(resolver, config.sass.clone()),
        ];

        Self {
            config,
            source,
            destination,
            converters,
            pages: Vec::new(),
            source_maps: Vec::new(),
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Source map pages generated by the last [`Site::process`].
    pub fn source_maps(&self) -> &[SourceMapPage] {
        &self.source_maps
    }

    pub fn find_converter(&self, ext: &str) -> Option<&SassConverter> {
        self.converters.iter().find(|converter| converter.matches(ext))
    }

    /// Collect the stylesheet pages under the source directory. Files and
    /// directories starting with `_` or `.` are skipped, they hold partials
    /// and site internals.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be searched or a page not read.
    pub fn read(&mut self) -> Result<(), Error> {
        let root = glob::Pattern::escape(&self.source.to_string_lossy());
        let source = self.source.clone();

        let mut pages = Vec::new();
        for ext in ["scss", "sass"] {
            pages.extend(
                crate::glob(format!("{}/**/*.{ext}", root.trim_end_matches('/')))?
                    .filter(|path| is_page(&source, path))
                    .parse(|path| Page::read(&source, &path))?,
            );
        }
        pages.sort_by_key(Page::relative_path);

        tracing::debug!(count = pages.len(), "read stylesheet pages");
        self.pages = pages;
        Ok(())
    }

    /// Convert `page`, pushing its source map page to `outputs`.
    ///
    /// The page is associated right before the conversion and dissociated
    /// right after, whether it succeeds or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the page does not compile.
    pub fn render_page(&self, page: &Page, outputs: &mut Vec<SourceMapPage>) -> Result<String, Error> {
        let Some(converter) = self.find_converter(page.ext()) else {
            return Ok(page.content().to_owned());
        };

        let mut association = PageAssociation::new();
        association.associate(page);
        let result = converter.convert_page(page.content(), &mut association, outputs);
        association.dissociate(page);

        result.map_err(|e| Error::Convert(page.relative_path(), e))
    }

    /// Read, convert and write every stylesheet page of the site.
    ///
    /// # Errors
    ///
    /// Returns an error if a page fails to compile or an output cannot be
    /// written.
    pub fn process(&mut self) -> Result<(), Error> {
        self.read()?;

        let rendered = self
            .pages
            .par_iter()
            .map(|page| {
                let mut source_maps = Vec::new();
                let css = self.render_page(page, &mut source_maps)?;
                Ok((page.output_relative_path(), css, source_maps))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        self.source_maps.clear();
        let mut stylesheets = Vec::with_capacity(rendered.len());
        for (path, css, source_maps) in rendered {
            stylesheets.push((path, css));
            self.source_maps.extend(source_maps);
        }

        let destination = &self.destination;
        stylesheets
            .into_par_iter()
            .map(|(path, css)| write(css, destination.join(path)))
            .collect::<Result<Vec<_>, Error>>()?;
        self.source_maps
            .par_iter()
            .map(|map| write(map.output(), destination.join(map.relative_path())))
            .collect::<Result<Vec<_>, Error>>()?;

        tracing::info!(
            pages = self.pages.len(),
            source_maps = self.source_maps.len(),
            destination = %self.destination.display(),
            "site processed"
        );
        Ok(())
    }
}

fn is_page(source: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(source) else {
        return false;
    };
    !relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('_') || name.starts_with('.')
        }
        _ => false,
    })
}
