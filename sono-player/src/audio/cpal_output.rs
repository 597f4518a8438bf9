//! Audio device output using cpal
//!
//! The cpal `Stream` is not `Send`, so it lives on a dedicated thread that
//! takes play and close commands. The realtime callback renders whichever
//! node is current; with no node it writes silence.

use crate::audio::decoder::DecodedAudio;
use crate::audio::output::{AudioOutput, OutputState, PlaybackNode};
use crate::error::{PlaybackError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tracing::{debug, error, info, warn};

enum StreamCommand {
    Play,
    Close,
}

type CurrentNode = Arc<Mutex<Option<Arc<NodeShared>>>>;

/// Default-device output
pub struct CpalOutput {
    commands: mpsc::Sender<StreamCommand>,
    current: CurrentNode,
    state: Arc<AtomicU8>,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    /// Open the default output device and start its stream thread
    pub fn open() -> Result<Self> {
        let current: CurrentNode = Arc::new(Mutex::new(None));
        let state = Arc::new(AtomicU8::new(OutputState::Running.to_u8()));
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread_current = Arc::clone(&current);
        let thread_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("sono-audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(thread_current, Arc::clone(&thread_state)) {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok((config.sample_rate.0, config.channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_stream_thread(stream, command_rx, thread_state);
            })
            .map_err(|e| PlaybackError::Output(format!("Failed to spawn output thread: {}", e)))?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Output("Output thread exited during setup".to_string()))??;

        info!(sample_rate, channels, "Audio output opened");
        Ok(Self {
            commands,
            current,
            state,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn send(&self, command: StreamCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::Output("Output thread has exited".to_string()))
    }
}

impl AudioOutput for CpalOutput {
    fn state(&self) -> OutputState {
        OutputState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn resume(&self) -> Result<()> {
        if self.state() == OutputState::Closed {
            return Err(PlaybackError::Output("Output closed".to_string()));
        }
        self.send(StreamCommand::Play)?;
        self.state.store(OutputState::Running.to_u8(), Ordering::SeqCst);
        Ok(())
    }

    fn start(&self, audio: Arc<DecodedAudio>, offset: f64, gain: f32) -> Result<Box<dyn PlaybackNode>> {
        if self.state() == OutputState::Closed {
            return Err(PlaybackError::Output("Output closed".to_string()));
        }
        let node = Arc::new(NodeShared::new(audio, offset, gain, self.sample_rate));
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(Arc::clone(&node)) {
            previous.stop();
        }
        Ok(Box::new(CpalNode {
            shared: node,
            current: Arc::clone(&self.current),
        }))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.send(StreamCommand::Close);
    }
}

fn build_stream(current: CurrentNode, state: Arc<AtomicU8>) -> Result<(Stream, StreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Output("No default output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using default audio device: {}", name);

    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::Output(format!("Failed to get default config: {}", e)))?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_typed_stream::<f32>(&device, &config, current, state)?,
        SampleFormat::I16 => build_typed_stream::<i16>(&device, &config, current, state)?,
        SampleFormat::U16 => build_typed_stream::<u16>(&device, &config, current, state)?,
        other => {
            return Err(PlaybackError::Output(format!("Unsupported sample format: {:?}", other)));
        }
    };

    stream
        .play()
        .map_err(|e| PlaybackError::Output(format!("Failed to start stream: {}", e)))?;
    Ok((stream, config))
}

fn build_typed_stream<T>(
    device: &Device,
    config: &StreamConfig,
    current: CurrentNode,
    state: Arc<AtomicU8>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let node = current.lock().ok().and_then(|guard| guard.clone());
                match node {
                    Some(node) => node.render(data, channels),
                    None => data.fill(T::from_sample_(0.0f32)),
                }
            },
            move |err| {
                error!("Audio stream error: {} - marking output suspended", err);
                state.store(OutputState::Suspended.to_u8(), Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| PlaybackError::Output(format!("Failed to build stream: {}", e)))
}

fn run_stream_thread(stream: Stream, commands: mpsc::Receiver<StreamCommand>, state: Arc<AtomicU8>) {
    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play => {
                if let Err(e) = stream.play() {
                    warn!(error = %e, "Failed to resume stream");
                    state.store(OutputState::Suspended.to_u8(), Ordering::SeqCst);
                }
            }
            StreamCommand::Close => break,
        }
    }
    state.store(OutputState::Closed.to_u8(), Ordering::SeqCst);
    debug!("Audio output thread exiting");
}

/// Render state shared between the engine and the realtime callback
struct NodeShared {
    audio: Arc<DecodedAudio>,
    /// Read cursor in source frames (f64 bits)
    cursor: AtomicU64,
    /// Source frames advanced per device frame
    step: f64,
    gain: AtomicU32,
    stopped: AtomicBool,
    finished: AtomicBool,
}

impl NodeShared {
    fn new(audio: Arc<DecodedAudio>, offset: f64, gain: f32, device_rate: u32) -> Self {
        let start_frame = (offset.max(0.0) * audio.sample_rate as f64).floor();
        let step = if device_rate == 0 {
            1.0
        } else {
            audio.sample_rate as f64 / device_rate as f64
        };
        Self {
            audio,
            cursor: AtomicU64::new(start_frame.to_bits()),
            step,
            gain: AtomicU32::new(gain.to_bits()),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Fill one device buffer; nearest-frame rate conversion, channels
    /// beyond the source's repeat its last channel
    fn render<T>(&self, data: &mut [T], device_channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let silence = T::from_sample_(0.0f32);
        let src_channels = self.audio.channels as usize;
        let frames = self.audio.frames();
        if device_channels == 0 || src_channels == 0 || self.stopped.load(Ordering::Relaxed) {
            data.fill(silence);
            return;
        }

        let gain = f32::from_bits(self.gain.load(Ordering::Relaxed));
        let mut cursor = f64::from_bits(self.cursor.load(Ordering::Relaxed));

        for frame in data.chunks_mut(device_channels) {
            let index = cursor as usize;
            if index >= frames {
                self.finished.store(true, Ordering::SeqCst);
                frame.fill(silence);
                continue;
            }
            let base = index * src_channels;
            for (channel, out) in frame.iter_mut().enumerate() {
                let sample = self.audio.samples[base + channel.min(src_channels - 1)];
                *out = T::from_sample_((sample * gain).clamp(-1.0, 1.0));
            }
            cursor += self.step;
        }

        self.cursor.store(cursor.to_bits(), Ordering::Relaxed);
    }

    fn position(&self) -> f64 {
        if self.audio.sample_rate == 0 {
            return 0.0;
        }
        let cursor = f64::from_bits(self.cursor.load(Ordering::Relaxed));
        (cursor / self.audio.sample_rate as f64).min(self.audio.duration)
    }
}

struct CpalNode {
    shared: Arc<NodeShared>,
    current: CurrentNode,
}

impl PlaybackNode for CpalNode {
    fn position(&self) -> f64 {
        self.shared.position()
    }

    fn is_finished(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst) && self.shared.finished.load(Ordering::SeqCst)
    }

    fn set_gain(&self, gain: f32) {
        self.shared.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.shared.gain.load(Ordering::SeqCst))
    }

    fn stop(&self) {
        self.shared.stop();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|node| Arc::ptr_eq(node, &self.shared)) {
            *current = None;
        }
    }
}
