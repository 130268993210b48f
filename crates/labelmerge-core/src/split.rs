//! Quadrant split
//!
//! Every source page becomes four pages of half its width and height. Each
//! quadrant page draws the whole source page at full size, shifted so that
//! only the wanted quarter falls inside the page bounds.

use crate::canvas::OutputDocument;
use crate::error::Result;
use crate::geometry::{PageSize, Rect};
use crate::template::TemplateSource;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quadrant {
    TopLeft,
    BottomLeft,
    TopRight,
    BottomRight,
}

impl Quadrant {
    /// Output order for each source page.
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::BottomLeft,
        Quadrant::TopRight,
        Quadrant::BottomRight,
    ];

    /// Where the source origin goes on the quadrant page (millimeters,
    /// top-left origin).
    pub fn offset(&self, half: PageSize) -> (f64, f64) {
        match self {
            Quadrant::TopLeft => (0.0, 0.0),
            Quadrant::BottomLeft => (0.0, -half.height),
            Quadrant::TopRight => (-half.width, 0.0),
            Quadrant::BottomRight => (-half.width, -half.height),
        }
    }
}

pub struct PageSplitter;

impl PageSplitter {
    /// Split every page of `source` into a fresh document.
    pub fn split(source: &TemplateSource) -> Result<OutputDocument> {
        let mut output = OutputDocument::new();
        Self::split_into(source, &mut output)?;
        Ok(output)
    }

    /// Append the quadrant pages of `source` to `output`. Returns how many
    /// pages were appended.
    pub fn split_into(source: &TemplateSource, output: &mut OutputDocument) -> Result<usize> {
        let before = output.page_count();

        for page in 0..source.page_count() {
            Self::split_page(source, page, output).map_err(|e| e.on_source_page(page))?;
        }

        Ok(output.page_count() - before)
    }

    fn split_page(source: &TemplateSource, page: usize, output: &mut OutputDocument) -> Result<()> {
        let template = source.import_template(page)?;
        let size = template.size();
        let half = size.half();

        for quadrant in Quadrant::ALL {
            let (x, y) = quadrant.offset(half);
            let mut canvas = output.begin_page(half)?;
            canvas.place(&template, Rect::new(x, y, size.width, size.height))?;
            canvas.finish()?;
        }
        debug!(
            page,
            width = size.width,
            height = size.height,
            "split source page into quadrants"
        );
        Ok(())
    }

    /// Split a raw PDF and return the serialized quadrant document.
    pub fn split_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
        let source = TemplateSource::open(bytes)?;
        Self::split(&source)?.to_bytes()
    }
}
