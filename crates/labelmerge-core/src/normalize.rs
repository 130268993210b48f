//! Artifact normalization
//!
//! Some label sheets arrive with encodings the importer cannot read (exotic
//! stream filters, broken cross-reference tables). A normalizer rewrites the
//! artifact with the same page geometry and plain internal encoding.

use crate::error::{LabelMergeError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// When the batch runs the configured normalizer over a label artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizePolicy {
    Never,
    /// Only after the label failed to import as-is
    #[default]
    OnDecodeFailure,
    Always,
}

pub trait ArtifactNormalizer {
    /// Return an artifact with identical page geometry. Failures are
    /// reported as `TemplateDecodeFailed`.
    fn normalize(&self, artifact: &[u8]) -> Result<Vec<u8>>;
}

/// Runs Ghostscript's `pdfwrite` device with compression disabled.
#[derive(Debug, Clone)]
pub struct GhostscriptNormalizer {
    program: PathBuf,
    timeout: Duration,
}

impl Default for GhostscriptNormalizer {
    fn default() -> Self {
        Self {
            program: PathBuf::from(default_program()),
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_program() -> &'static str {
    "gswin64c.exe"
}

#[cfg(not(target_os = "windows"))]
fn default_program() -> &'static str {
    "gs"
}

impl GhostscriptNormalizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn arguments(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-q".to_string(),
            "-dNOPAUSE".to_string(),
            "-dBATCH".to_string(),
            "-dSAFER".to_string(),
            "-sDEVICE=pdfwrite".to_string(),
            "-dCompatibilityLevel=1.4".to_string(),
            "-dPDFSETTINGS=/prepress".to_string(),
            "-dCompressPages=false".to_string(),
            "-dCompressFonts=false".to_string(),
            "-dEncodeColorImages=false".to_string(),
            "-dEncodeGrayImages=false".to_string(),
            "-dEncodeMonoImages=false".to_string(),
            format!("-sOutputFile={}", output.display()),
            input.display().to_string(),
        ]
    }

    /// Wait for the child, killing it once the timeout elapses.
    fn wait(&self, child: &mut std::process::Child) -> Result<std::process::ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(decode_failed)? {
                return Ok(status);
            }
            if start.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LabelMergeError::TemplateDecodeFailed(format!(
                    "{} timed out after {:?}",
                    self.program.display(),
                    self.timeout
                )));
            }
            thread::sleep(Duration::from_millis(15));
        }
    }
}

impl ArtifactNormalizer for GhostscriptNormalizer {
    fn normalize(&self, artifact: &[u8]) -> Result<Vec<u8>> {
        // Both temp paths are removed when they drop, on every return path
        let mut input = tempfile::Builder::new()
            .prefix("labelmerge-in-")
            .suffix(".pdf")
            .tempfile()
            .map_err(decode_failed)?;
        input.write_all(artifact).map_err(decode_failed)?;
        input.flush().map_err(decode_failed)?;

        let workdir = tempfile::Builder::new()
            .prefix("labelmerge-")
            .tempdir()
            .map_err(decode_failed)?;
        let output = workdir.path().join("normalized.pdf");

        let mut child = Command::new(&self.program)
            .args(Self::arguments(input.path(), &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                LabelMergeError::TemplateDecodeFailed(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let status = self.wait(&mut child)?;
        if !status.success() || !output.exists() {
            return Err(LabelMergeError::TemplateDecodeFailed(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }

        let normalized = std::fs::read(&output).map_err(decode_failed)?;
        debug!(
            input_bytes = artifact.len(),
            output_bytes = normalized.len(),
            "normalized artifact"
        );
        Ok(normalized)
    }
}

fn decode_failed(e: std::io::Error) -> LabelMergeError {
    LabelMergeError::TemplateDecodeFailed(e.to_string())
}
