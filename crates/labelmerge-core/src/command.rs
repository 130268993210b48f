use crate::batch::{BatchOrchestrator, DocumentSet, FiscalDocument, JobErrorPolicy, LabelJob};
use crate::encoding::{decode_artifact, encode_artifact};
use crate::error::{LabelMergeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub jobs: Vec<JobRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Base64-encoded label sheet PDF
    pub label: String,
    pub documents: DocumentsRequest,
}

/// One base64 document shared by every label, or one per label.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DocumentsRequest {
    Single(String),
    Many(Vec<String>),
}

impl JobRequest {
    pub fn decode(&self) -> Result<LabelJob> {
        let label = decode_artifact(&self.label)?;
        let documents = match &self.documents {
            DocumentsRequest::Single(doc) => {
                DocumentSet::Shared(FiscalDocument::Artifact(decode_artifact(doc)?))
            }
            DocumentsRequest::Many(docs) => DocumentSet::Ordered(
                docs.iter()
                    .map(|d| decode_artifact(d).map(FiscalDocument::Artifact))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        Ok(LabelJob { label, documents })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    /// Base64-encoded PDF data
    pub data: Option<String>,
    pub error: Option<String>,
    pub metrics: Option<ProcessMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_jobs: Vec<SkippedJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedJob {
    pub job: usize,
    pub error: String,
}

impl ProcessResult {
    fn failure(error: &LabelMergeError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            metrics: None,
            skipped_jobs: Vec::new(),
        }
    }
}

/// Decode, composite and encode a JSON batch request.
pub fn run_request(orchestrator: &BatchOrchestrator, request: &BatchRequest) -> ProcessResult {
    let start = Instant::now();
    let skip = orchestrator.config().on_job_error == JobErrorPolicy::SkipJob;

    let mut jobs = Vec::with_capacity(request.jobs.len());
    let mut skipped = Vec::new();
    let mut input_size_bytes = 0;

    for (index, job) in request.jobs.iter().enumerate() {
        match job.decode() {
            Ok(decoded) => {
                input_size_bytes += decoded.label.len() + documents_size(&decoded.documents);
                jobs.push(decoded);
            }
            Err(err) => {
                let err = err.in_job(index, None);
                if !skip {
                    return ProcessResult::failure(&err);
                }
                warn!(job = index, error = %err, "skipping undecodable job");
                skipped.push(SkippedJob {
                    job: index,
                    error: err.to_string(),
                });
            }
        }
    }

    // Indices reported by the orchestrator refer to the decoded subset
    let kept: Vec<usize> = (0..request.jobs.len())
        .filter(|i| !skipped.iter().any(|s| s.job == *i))
        .collect();

    let allow_empty = orchestrator.config().allow_empty_batch;
    if jobs.is_empty() && !request.jobs.is_empty() && !allow_empty {
        let mut result = ProcessResult::failure(&LabelMergeError::EmptyBatch);
        result.skipped_jobs = skipped;
        return result;
    }

    match orchestrator.process_with_report(jobs) {
        Ok(outcome) => {
            for failure in outcome.failures {
                skipped.push(SkippedJob {
                    job: kept[failure.job],
                    error: failure.error.root_cause().to_string(),
                });
            }
            skipped.sort_by_key(|s| s.job);
            ProcessResult {
                success: true,
                metrics: Some(ProcessMetrics {
                    input_size_bytes,
                    output_size_bytes: outcome.artifact.len(),
                    page_count: outcome.page_count as u32,
                    processing_time_ms: start.elapsed().as_millis() as u64,
                }),
                data: Some(encode_artifact(&outcome.artifact)),
                error: None,
                skipped_jobs: skipped,
            }
        }
        Err(err) => ProcessResult::failure(&err),
    }
}

fn documents_size(documents: &DocumentSet) -> usize {
    let size = |doc: &FiscalDocument| match doc {
        FiscalDocument::Artifact(bytes) => bytes.len(),
        FiscalDocument::Description(text) => text.len(),
    };
    match documents {
        DocumentSet::Shared(doc) => size(doc),
        DocumentSet::Ordered(docs) => docs.iter().map(size).sum(),
    }
}
