//! Shared decode/output resource
//!
//! One `AudioContext` per engine, created on first use. It owns the output
//! device and schedules decodes on the blocking pool.

use crate::audio::decoder::{decode_bytes, DecodedAudio};
use crate::audio::output::{AudioOutput, OutputState};
use crate::error::{PlaybackError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct AudioContext {
    output: Arc<dyn AudioOutput>,
}

impl AudioContext {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    /// Resume the output if the host suspended it
    pub fn ensure_running(&self) -> Result<()> {
        match self.output.state() {
            OutputState::Running => Ok(()),
            OutputState::Suspended => {
                info!("Audio output suspended, resuming");
                self.output.resume()
            }
            OutputState::Closed => Err(PlaybackError::Output("Audio output closed".to_string())),
        }
    }

    /// Decode a whole track off the async runtime
    pub async fn decode(
        &self,
        bytes: Arc<[u8]>,
        extension: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Arc<DecodedAudio>> {
        let audio = tokio::task::spawn_blocking(move || decode_bytes(bytes, extension.as_deref(), &cancel))
            .await
            .map_err(|e| PlaybackError::Decode(format!("Decode task failed: {}", e)))??;
        Ok(Arc::new(audio))
    }
}
