//! In-memory audio decoding using symphonia
//!
//! Decodes a whole track to interleaved f32 PCM. Runs on the blocking pool;
//! the cancellation token is polled between packets so a superseded load
//! stops burning CPU promptly.

use crate::error::{PlaybackError, Result};
use std::io::Cursor;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fully decoded track
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds
    pub duration: f64,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let frames = if channels == 0 { 0 } else { samples.len() / channels as usize };
        let duration = if sample_rate == 0 {
            0.0
        } else {
            frames as f64 / sample_rate as f64
        };
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            duration,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Decode a complete file held in memory
///
/// `extension` is only a probe hint; content sniffing decides the format.
pub fn decode_bytes(
    bytes: Arc<[u8]>,
    extension: Option<&str>,
    cancel: &CancellationToken,
) -> Result<DecodedAudio> {
    debug!(bytes = bytes.len(), extension = ?extension, "Decoding track");

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PlaybackError::Decode(format!("Failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PlaybackError::Decode("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PlaybackError::Decode("Sample rate not found".to_string()))?;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PlaybackError::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        if cancel.is_cancelled() {
            debug!("Decode cancelled");
            return Err(PlaybackError::Aborted);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if samples.is_empty() => {
                return Err(PlaybackError::Decode(format!("Failed to read packet: {}", e)));
            }
            Err(e) => {
                warn!(error = %e, "Error reading packet, truncating track");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if channels == 0 {
                    channels = spec.channels.count() as u16;
                }
                let needed = decoded.capacity() * spec.channels.count();
                if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(PlaybackError::Decode(format!("Decoder failed: {}", e))),
        }
    }

    if channels == 0 {
        return Err(PlaybackError::Decode("Channel count not found".to_string()));
    }

    let audio = DecodedAudio::new(samples, sample_rate, channels);
    debug!(
        sample_rate,
        channels,
        frames = audio.frames(),
        duration = audio.duration,
        "Decode complete"
    );
    Ok(audio)
}
