//! Shipping label + fiscal document compositing
//!
//! This crate merges carrier label sheets and rendered fiscal documents
//! (DANFE) onto single printable pages using lopdf.
//!
//! The pipeline has two stages:
//! - [`PageSplitter`]: every page of an oversized label sheet becomes four
//!   quadrant pages of half its width and height
//! - [`Compositor`]: each quadrant page is drawn next to its fiscal document,
//!   scaled and rotated into a fixed landscape layout
//!
//! [`BatchOrchestrator`] drives both stages over a list of jobs and collects
//! every composited page into one output PDF.

pub mod batch;
pub mod canvas;
pub mod command;
pub mod composite;
pub mod encoding;
pub mod error;
pub mod geometry;
pub mod normalize;
pub mod render;
pub mod rotation;
pub mod split;
pub mod template;

pub use batch::{
    BatchConfig, BatchOrchestrator, BatchOutcome, DocumentSet, FiscalDocument, JobErrorPolicy,
    JobFailure, LabelJob, MissingDocumentPolicy,
};
pub use canvas::{ContentSink, OutputDocument, PageCanvas};
pub use command::{run_request, BatchRequest, ProcessMetrics, ProcessResult};
pub use composite::{CompositeLayout, Compositor, LayoutPlan};
pub use encoding::{decode_artifact, encode_artifact};
pub use error::LabelMergeError;
pub use geometry::{PageSize, Rect};
pub use normalize::{ArtifactNormalizer, GhostscriptNormalizer, NormalizePolicy};
pub use render::DocumentRenderer;
pub use rotation::RotationContext;
pub use split::{PageSplitter, Quadrant};
pub use template::{Template, TemplateSource};

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<u32, LabelMergeError> {
    Ok(TemplateSource::open(bytes)?.page_count() as u32)
}

/// Composite a batch of base64 jobs with the default configuration and
/// return the output PDF as base64.
pub fn process_base64(jobs: &[(String, Vec<String>)]) -> Result<String, LabelMergeError> {
    let decoded = jobs
        .iter()
        .map(|(label, documents)| {
            let documents = documents
                .iter()
                .map(|d| decode_artifact(d))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(LabelJob::new(decode_artifact(label)?, documents))
        })
        .collect::<Result<Vec<_>, LabelMergeError>>()?;
    let output = BatchOrchestrator::default().process(decoded)?;
    Ok(encode_artifact(&output))
}
