//! Audio output abstraction
//!
//! An [`AudioOutput`] renders [`DecodedAudio`] through short-lived
//! [`PlaybackNode`]s: one node per play/seek, torn down on pause/stop.
//! [`NullOutput`] advances position on the tokio clock and renders nothing,
//! which keeps the engine usable headless and under paused test time.

use crate::audio::decoder::DecodedAudio;
use crate::error::{PlaybackError, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::debug;

/// Output device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Running,
    /// Paused by the host (power management, device switch); resumable
    Suspended,
    Closed,
}

impl OutputState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            OutputState::Running => 0,
            OutputState::Suspended => 1,
            OutputState::Closed => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => OutputState::Running,
            1 => OutputState::Suspended,
            _ => OutputState::Closed,
        }
    }
}

/// Device backend shared by all playback of one engine
pub trait AudioOutput: Send + Sync {
    fn state(&self) -> OutputState;

    /// Resume a suspended output
    fn resume(&self) -> Result<()>;

    /// Start rendering `audio` from `offset` seconds at `gain`
    fn start(&self, audio: Arc<DecodedAudio>, offset: f64, gain: f32) -> Result<Box<dyn PlaybackNode>>;
}

/// One active rendering of a decoded buffer
pub trait PlaybackNode: Send + Sync {
    /// Seconds into the buffer
    fn position(&self) -> f64;

    /// Reached the end of the buffer
    fn is_finished(&self) -> bool;

    fn set_gain(&self, gain: f32);

    fn gain(&self) -> f32;

    /// Stop rendering; position freezes
    fn stop(&self);
}

/// Builds the output on first use
pub type OutputFactory = Arc<dyn Fn() -> Result<Arc<dyn AudioOutput>> + Send + Sync>;

/// Clock-driven output without a device
#[derive(Debug)]
pub struct NullOutput {
    state: AtomicU8,
    resumes: AtomicUsize,
    nodes_started: AtomicUsize,
}

impl NullOutput {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OutputState::Running.to_u8()),
            resumes: AtomicUsize::new(0),
            nodes_started: AtomicUsize::new(0),
        }
    }

    /// Simulate a host suspension
    pub fn suspend(&self) {
        self.state.store(OutputState::Suspended.to_u8(), Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.state.store(OutputState::Closed.to_u8(), Ordering::SeqCst);
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn nodes_started(&self) -> usize {
        self.nodes_started.load(Ordering::SeqCst)
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for NullOutput {
    fn state(&self) -> OutputState {
        OutputState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn resume(&self) -> Result<()> {
        match self.state() {
            OutputState::Closed => Err(PlaybackError::Output("Output closed".to_string())),
            _ => {
                self.state.store(OutputState::Running.to_u8(), Ordering::SeqCst);
                self.resumes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn start(&self, audio: Arc<DecodedAudio>, offset: f64, gain: f32) -> Result<Box<dyn PlaybackNode>> {
        if self.state() == OutputState::Closed {
            return Err(PlaybackError::Output("Output closed".to_string()));
        }
        self.nodes_started.fetch_add(1, Ordering::SeqCst);
        debug!(offset, duration = audio.duration, "Null output node started");
        Ok(Box::new(ClockNode {
            started_at: Instant::now(),
            offset,
            duration: audio.duration,
            gain: AtomicU32::new(gain.to_bits()),
            stopped: AtomicBool::new(false),
            frozen_at: Mutex::new(None),
        }))
    }
}

/// Node whose position is wall-clock time since start
struct ClockNode {
    started_at: Instant,
    offset: f64,
    duration: f64,
    gain: AtomicU32,
    stopped: AtomicBool,
    frozen_at: Mutex<Option<f64>>,
}

impl ClockNode {
    fn running_position(&self) -> f64 {
        (self.offset + self.started_at.elapsed().as_secs_f64()).min(self.duration)
    }
}

impl PlaybackNode for ClockNode {
    fn position(&self) -> f64 {
        let frozen = self.frozen_at.lock().unwrap_or_else(|e| e.into_inner());
        frozen.unwrap_or_else(|| self.running_position())
    }

    fn is_finished(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.position() >= self.duration
    }

    fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::SeqCst))
    }

    fn stop(&self) {
        let mut frozen = self.frozen_at.lock().unwrap_or_else(|e| e.into_inner());
        if frozen.is_none() {
            *frozen = Some(self.running_position());
        }
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn audio(seconds: usize) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(vec![0.0; 100 * seconds], 100, 1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_node_advances_and_finishes() {
        let output = NullOutput::new();
        let node = output.start(audio(2), 0.5, 1.0).unwrap();

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!((node.position() - 1.5).abs() < 1e-6);
        assert!(!node.is_finished());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(node.position(), 2.0);
        assert!(node.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_node_freezes() {
        let output = NullOutput::new();
        let node = output.start(audio(2), 0.0, 1.0).unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        node.stop();
        tokio::time::advance(Duration::from_millis(5000)).await;

        assert!((node.position() - 0.3).abs() < 1e-6);
        assert!(!node.is_finished());
    }

    #[test]
    fn test_suspend_and_resume() {
        let output = NullOutput::new();
        output.suspend();
        assert_eq!(output.state(), OutputState::Suspended);
        output.resume().unwrap();
        assert_eq!(output.state(), OutputState::Running);
        assert_eq!(output.resume_count(), 1);

        output.close();
        assert!(output.resume().is_err());
        assert!(output.start(audio(1), 0.0, 1.0).is_err());
    }
}
