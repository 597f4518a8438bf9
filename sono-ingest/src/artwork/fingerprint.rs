//! Chromaprint fingerprinting through the `fpcalc` command-line tool
//!
//! Audio bytes are streamed to fpcalc on stdin and the JSON report is parsed
//! from stdout.

use super::Fingerprinter;
use crate::error::LookupError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    #[allow(dead_code)]
    duration: Option<f64>,
    fingerprint: String,
}

pub struct FpcalcFingerprinter {
    program: PathBuf,
}

impl FpcalcFingerprinter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

fn parse_output(stdout: &[u8]) -> Result<String, LookupError> {
    let output: FpcalcOutput =
        serde_json::from_slice(stdout).map_err(|e| LookupError::Fingerprint(format!("Invalid fpcalc output: {}", e)))?;

    if output.fingerprint.is_empty() {
        return Err(LookupError::Fingerprint("fpcalc returned an empty fingerprint".to_string()));
    }
    Ok(output.fingerprint)
}

#[async_trait]
impl Fingerprinter for FpcalcFingerprinter {
    async fn fingerprint(&self, bytes: Arc<[u8]>, file_name: &str) -> Result<String, LookupError> {
        let mut child = Command::new(&self.program)
            .args(["-json", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LookupError::Fingerprint(format!("Failed to start {}: {}", self.program.display(), e)))?;

        // Feed stdin concurrently so a full stdout pipe cannot deadlock us
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| LookupError::Fingerprint("fpcalc stdin unavailable".to_string()))?;
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&bytes).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LookupError::Fingerprint(e.to_string()))?;

        if let Ok(Err(e)) = writer.await {
            // fpcalc may stop reading once it has enough audio
            tracing::debug!(file = %file_name, error = %e, "fpcalc closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LookupError::Fingerprint(format!(
                "fpcalc exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let fingerprint = parse_output(&output.stdout)?;
        tracing::debug!(file = %file_name, length = fingerprint.len(), "Computed fingerprint");
        Ok(fingerprint)
    }
}
