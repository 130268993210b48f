//! Fiscal document rendering hook
//!
//! Field layout and text rendering of fiscal documents live outside this
//! crate. A renderer turns one document description (typically the authorized
//! XML) into a single-page PDF sized to its own content.

use crate::error::Result;

pub trait DocumentRenderer {
    /// Render `description` into a single-page PDF. Failures should be
    /// reported as `RenderFailed`.
    fn render(&self, description: &str) -> Result<Vec<u8>>;
}

impl<F> DocumentRenderer for F
where
    F: Fn(&str) -> Result<Vec<u8>>,
{
    fn render(&self, description: &str) -> Result<Vec<u8>> {
        self(description)
    }
}
