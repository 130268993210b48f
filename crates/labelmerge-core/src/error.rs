use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelMergeError {
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Failed to parse PDF: {0}")]
    MalformedInput(String),

    #[error("Page index {index} out of range (source has {count} pages)")]
    PageIndexOutOfRange { index: usize, count: usize },

    #[error("Invalid template size {width}x{height}")]
    InvalidTemplateSize { width: f64, height: f64 },

    #[error("No document template for position {position}")]
    MissingDocumentTemplate { position: usize },

    #[error("Template decode failed: {0}")]
    TemplateDecodeFailed(String),

    #[error("Batch contains no jobs")]
    EmptyBatch,

    #[error("Document render failed: {0}")]
    RenderFailed(String),

    #[error("PDF operation failed: {0}")]
    OperationError(String),

    #[error("source page {page}: {source}")]
    SourcePage {
        page: usize,
        #[source]
        source: Box<LabelMergeError>,
    },

    #[error("{}: {source}", describe_position(.job, .page))]
    Job {
        job: usize,
        page: Option<usize>,
        #[source]
        source: Box<LabelMergeError>,
    },
}

fn describe_position(job: &usize, page: &Option<usize>) -> String {
    match page {
        Some(page) => format!("job {} page {}", job, page),
        None => format!("job {}", job),
    }
}

impl LabelMergeError {
    /// Attach the job (and optionally page) the error happened in.
    ///
    /// Already-wrapped errors keep their innermost context so a page index
    /// added deeper in the call chain is not overwritten.
    pub fn in_job(self, job: usize, page: Option<usize>) -> Self {
        match self {
            wrapped @ LabelMergeError::Job { .. } => wrapped,
            other => LabelMergeError::Job {
                job,
                page,
                source: Box::new(other),
            },
        }
    }

    /// Attach the label sheet page being split when the error happened.
    pub fn on_source_page(self, page: usize) -> Self {
        LabelMergeError::SourcePage {
            page,
            source: Box::new(self),
        }
    }

    /// The underlying error with any job or page context stripped.
    pub fn root_cause(&self) -> &LabelMergeError {
        match self {
            LabelMergeError::Job { source, .. } | LabelMergeError::SourcePage { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Label sheet page the error came from, if it happened while splitting.
    pub fn source_page_index(&self) -> Option<usize> {
        match self {
            LabelMergeError::SourcePage { page, .. } => Some(*page),
            LabelMergeError::Job { source, .. } => source.source_page_index(),
            _ => None,
        }
    }

    pub fn job_index(&self) -> Option<usize> {
        match self {
            LabelMergeError::Job { job, .. } => Some(*job),
            _ => None,
        }
    }

    pub fn page_index(&self) -> Option<usize> {
        match self {
            LabelMergeError::Job { page, .. } => *page,
            _ => None,
        }
    }

    /// Failures that end their own job but never the batch, whatever the
    /// job error policy says.
    pub fn is_job_local(&self) -> bool {
        matches!(self.root_cause(), LabelMergeError::TemplateDecodeFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, LabelMergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_context_is_reported() {
        let err = LabelMergeError::MalformedInput("bad xref".into()).in_job(2, Some(5));
        assert_eq!(err.to_string(), "job 2 page 5: Failed to parse PDF: bad xref");
        assert_eq!(err.job_index(), Some(2));
        assert_eq!(err.page_index(), Some(5));
        assert!(matches!(
            err.root_cause(),
            LabelMergeError::MalformedInput(_)
        ));
    }

    #[test]
    fn test_inner_context_wins() {
        let err = LabelMergeError::EmptyBatch
            .in_job(1, Some(3))
            .in_job(1, None);
        assert_eq!(err.page_index(), Some(3));
    }

    #[test]
    fn test_job_without_page() {
        let err = LabelMergeError::TemplateDecodeFailed("gs exited with 1".into()).in_job(0, None);
        assert!(err.to_string().starts_with("job 0: "));
    }

    #[test]
    fn test_source_page_survives_job_context() {
        let err = LabelMergeError::InvalidTemplateSize {
            width: 0.0,
            height: 0.0,
        }
        .on_source_page(1)
        .in_job(3, None);
        assert_eq!(
            err.to_string(),
            "job 3: source page 1: Invalid template size 0x0"
        );
        assert_eq!(err.source_page_index(), Some(1));
        assert!(matches!(
            err.root_cause(),
            LabelMergeError::InvalidTemplateSize { .. }
        ));
    }

    #[test]
    fn test_only_decode_failures_are_job_local() {
        let decode = LabelMergeError::TemplateDecodeFailed("gs exited with 1".into());
        assert!(decode.in_job(0, None).is_job_local());
        assert!(!LabelMergeError::MalformedInput("bad xref".into()).is_job_local());
        assert!(!LabelMergeError::EmptyBatch.is_job_local());
    }
}
