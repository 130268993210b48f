//! Batch orchestration
//!
//! Each job's label sheet is split into quadrants, then every quadrant is
//! paired with the job's next fiscal document and composited. All jobs append
//! to one output document, in job order then quadrant order.

use crate::canvas::OutputDocument;
use crate::composite::{CompositeLayout, Compositor};
use crate::error::{LabelMergeError, Result};
use crate::normalize::{ArtifactNormalizer, NormalizePolicy};
use crate::render::DocumentRenderer;
use crate::split::PageSplitter;
use crate::template::{Template, TemplateSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One fiscal document as supplied by the caller.
#[derive(Debug, Clone)]
pub enum FiscalDocument {
    /// Already rendered single-page PDF
    Artifact(Vec<u8>),
    /// Description handed to the configured [`DocumentRenderer`]
    Description(String),
}

#[derive(Debug, Clone)]
pub enum DocumentSet {
    /// One document reused for every quadrant
    Shared(FiscalDocument),
    /// Document `i` goes with quadrant page `i`
    Ordered(Vec<FiscalDocument>),
}

impl DocumentSet {
    /// Number of positions that have a document, `None` when unbounded.
    pub fn len(&self) -> Option<usize> {
        match self {
            DocumentSet::Shared(_) => None,
            DocumentSet::Ordered(docs) => Some(docs.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct LabelJob {
    pub label: Vec<u8>,
    pub documents: DocumentSet,
}

impl LabelJob {
    pub fn new(label: Vec<u8>, documents: Vec<Vec<u8>>) -> Self {
        Self {
            label,
            documents: DocumentSet::Ordered(
                documents.into_iter().map(FiscalDocument::Artifact).collect(),
            ),
        }
    }

    pub fn shared(label: Vec<u8>, document: Vec<u8>) -> Self {
        Self {
            label,
            documents: DocumentSet::Shared(FiscalDocument::Artifact(document)),
        }
    }
}

/// What happens to quadrant pages that have no matching document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDocumentPolicy {
    /// Stop compositing the job at the first missing document
    #[default]
    Truncate,
    /// Emit the label alone in the same layout
    LabelOnly,
    /// Fail the job with `MissingDocumentTemplate`
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorPolicy {
    /// A job failure aborts the batch, except normalizer failures which
    /// only drop their own job
    #[default]
    Abort,
    /// Roll back the failed job's pages and continue
    SkipJob,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub layout: CompositeLayout,
    pub missing_documents: MissingDocumentPolicy,
    pub on_job_error: JobErrorPolicy,
    pub normalize: NormalizePolicy,
    /// Return an empty document for an empty batch instead of `EmptyBatch`
    pub allow_empty_batch: bool,
}

impl BatchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LabelMergeError::OperationError(format!("Invalid config: {}", e)))
    }
}

#[derive(Debug)]
pub struct JobFailure {
    pub job: usize,
    pub error: LabelMergeError,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub artifact: Vec<u8>,
    pub page_count: usize,
    pub failures: Vec<JobFailure>,
}

#[derive(Default)]
pub struct BatchOrchestrator {
    config: BatchConfig,
    normalizer: Option<Box<dyn ArtifactNormalizer>>,
    renderer: Option<Box<dyn DocumentRenderer>>,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            normalizer: None,
            renderer: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: impl ArtifactNormalizer + 'static) -> Self {
        self.normalizer = Some(Box::new(normalizer));
        self
    }

    pub fn with_renderer(mut self, renderer: impl DocumentRenderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Composite every job into one PDF.
    pub fn process(&self, jobs: Vec<LabelJob>) -> Result<Vec<u8>> {
        Ok(self.process_with_report(jobs)?.artifact)
    }

    /// Like [`process`](Self::process), also reporting skipped jobs.
    pub fn process_with_report(&self, jobs: Vec<LabelJob>) -> Result<BatchOutcome> {
        if jobs.is_empty() && !self.config.allow_empty_batch {
            return Err(LabelMergeError::EmptyBatch);
        }
        self.config.layout.validate()?;

        let job_count = jobs.len();
        let mut output = OutputDocument::new();
        let mut failures = Vec::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let checkpoint = output.checkpoint();
            match self.process_job(index, &job, &mut output) {
                Ok(pages) => info!(job = index, pages, "job composited"),
                Err(err) => {
                    let err = err.in_job(index, None);
                    if self.config.on_job_error == JobErrorPolicy::Abort && !err.is_job_local() {
                        return Err(err);
                    }
                    output.rollback(checkpoint);
                    warn!(job = index, error = %err, "skipping failed job");
                    failures.push(JobFailure { job: index, error: err });
                }
            }
        }

        let page_count = output.page_count();
        let artifact = output.to_bytes()?;
        info!(
            jobs = job_count,
            pages = page_count,
            failed = failures.len(),
            bytes = artifact.len(),
            "batch complete"
        );
        Ok(BatchOutcome {
            artifact,
            page_count,
            failures,
        })
    }

    fn process_job(&self, index: usize, job: &LabelJob, output: &mut OutputDocument) -> Result<usize> {
        let quadrants = self.split_label(&job.label)?;
        let labels = TemplateSource::open(&quadrants)?;

        let compositor = Compositor::new(self.config.layout)
            .require_document(self.config.missing_documents == MissingDocumentPolicy::Error);

        let shared = match &job.documents {
            DocumentSet::Shared(document) => Some(
                self.open_document(document)
                    .map_err(|e| e.in_job(index, Some(0)))?,
            ),
            DocumentSet::Ordered(_) => None,
        };

        if let Some(count) = job.documents.len() {
            if count > labels.page_count() {
                debug!(
                    job = index,
                    documents = count,
                    labels = labels.page_count(),
                    "more documents than labels; extra documents ignored"
                );
            }
        }

        let mut appended = 0;
        for position in 0..labels.page_count() {
            let owned;
            let source: Option<&TemplateSource> = match (&job.documents, &shared) {
                (_, Some(shared)) => Some(shared),
                (DocumentSet::Ordered(docs), None) => match docs.get(position) {
                    Some(document) => {
                        owned = self
                            .open_document(document)
                            .map_err(|e| e.in_job(index, Some(position)))?;
                        Some(&owned)
                    }
                    None if self.config.missing_documents == MissingDocumentPolicy::Truncate => {
                        debug!(job = index, position, "documents exhausted");
                        break;
                    }
                    None => None,
                },
                (DocumentSet::Shared(_), None) => None,
            };

            let label = labels
                .import_template(position)
                .map_err(|e| e.in_job(index, Some(position)))?;
            let document = source
                .map(first_page)
                .transpose()
                .map_err(|e| e.in_job(index, Some(position)))?;

            compositor
                .compose(output, position, &label, document.as_ref())
                .map_err(|e| e.in_job(index, Some(position)))?;
            appended += 1;
        }

        Ok(appended)
    }

    /// Split the label sheet, normalizing it first when policy says so.
    fn split_label(&self, label: &[u8]) -> Result<Vec<u8>> {
        let normalizer = match &self.normalizer {
            Some(normalizer) => normalizer,
            None => return PageSplitter::split_bytes(label),
        };

        match self.config.normalize {
            NormalizePolicy::Never => PageSplitter::split_bytes(label),
            NormalizePolicy::Always => PageSplitter::split_bytes(&normalizer.normalize(label)?),
            NormalizePolicy::OnDecodeFailure => match PageSplitter::split_bytes(label) {
                Err(err) if matches!(err.root_cause(), LabelMergeError::MalformedInput(_)) => {
                    warn!(reason = %err, "label could not be imported, normalizing");
                    PageSplitter::split_bytes(&normalizer.normalize(label)?)
                }
                other => other,
            },
        }
    }

    fn open_document(&self, document: &FiscalDocument) -> Result<TemplateSource> {
        match document {
            FiscalDocument::Artifact(bytes) => TemplateSource::open(bytes),
            FiscalDocument::Description(description) => {
                let renderer = self.renderer.as_ref().ok_or_else(|| {
                    LabelMergeError::RenderFailed("no document renderer configured".into())
                })?;
                let rendered = renderer.render(description)?;
                TemplateSource::open(&rendered)
            }
        }
    }
}

fn first_page(source: &TemplateSource) -> Result<Template<'_>> {
    if source.page_count() == 0 {
        return Err(LabelMergeError::MalformedInput(
            "fiscal document has no pages".into(),
        ));
    }
    source.import_template(0)
}
