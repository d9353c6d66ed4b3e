//! The page a conversion works on.
//!
//! A [`PageAssociation`] is created for each conversion and handed to
//! [`SassConverter::convert_page`](crate::SassConverter::convert_page). It
//! names the input and output files and owns the source map page generated
//! for the associated page.

use std::path::{Path, PathBuf};

use crate::{Page, Rendered, SourceMapPage};

#[derive(Debug, Default)]
pub struct PageAssociation<'p> {
    page: Option<&'p Page>,
    source_map_page: Option<SourceMapPage>,
    emitted: bool,
}

impl<'p> PageAssociation<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `page`. Returns `false` if another page was already
    /// associated: the slot is then cleared and the conversion runs as if no
    /// page was associated at all.
    pub fn associate(&mut self, page: &'p Page) -> bool {
        if let Some(current) = self.page {
            tracing::warn!(
                current = current.name(),
                page = page.name(),
                "sass page re-associated, dropping association"
            );
            self.clear();
            return false;
        }
        self.page = Some(page);
        true
    }

    /// Release the association. Safe to call any number of times.
    pub fn dissociate(&mut self, page: &Page) {
        if !self.page.is_some_and(|current| std::ptr::eq(current, page)) {
            tracing::warn!(
                page = page.name(),
                "dissociating a page that was never associated"
            );
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.page = None;
        self.source_map_page = None;
        self.emitted = false;
    }

    pub fn page(&self) -> Option<&'p Page> {
        self.page
    }

    pub fn is_associated(&self) -> bool {
        self.page.is_some()
    }

    /// Name of the input file, `stdin` without a page.
    pub fn filename(&self) -> String {
        match self.page {
            Some(page) => page.name().to_owned(),
            None => "stdin".to_owned(),
        }
    }

    /// Name of the generated stylesheet, `stdin.css` without a page.
    pub fn output_path(&self) -> String {
        match self.page {
            Some(page) => format!("{}.css", page.basename()),
            None => "stdin.css".to_owned(),
        }
    }

    /// Name of the source map, empty without a page.
    pub fn source_map_file(&self) -> String {
        match self.page {
            Some(page) => format!("{}.css.map", page.basename()),
            None => String::new(),
        }
    }

    /// Directory holding the page source.
    pub fn source_dir(&self, site_source: &Path) -> Option<PathBuf> {
        self.page.map(|page| site_source.join(page.dir()))
    }

    pub fn source_map_page(&mut self) -> Option<&mut SourceMapPage> {
        let page = self.page?;
        Some(
            self.source_map_page
                .get_or_insert_with(|| SourceMapPage::new(page)),
        )
    }

    /// Fill the source map page from `rendered` and add it to `outputs`, at
    /// most once per association. Does nothing without a page.
    pub fn emit_source_map(&mut self, rendered: &Rendered, outputs: &mut Vec<SourceMapPage>) {
        let Some(page) = self.page else {
            return;
        };
        let Some(map) = &rendered.source_map else {
            tracing::warn!(
                page = page.name(),
                "could not generate source map, the compiler produced none"
            );
            return;
        };
        if self.emitted {
            tracing::debug!(page = page.name(), "source map already emitted");
            return;
        }

        if let Some(source_map_page) = self.source_map_page() {
            source_map_page.set_source_map(map.as_str());
            outputs.push(source_map_page.clone());
            self.emitted = true;
        }
    }
}
