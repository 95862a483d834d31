//! Capture/Playback device abstraction (spec §4.7, component C7).
//!
//! `cpal` drives real hardware through its own real-time callback thread;
//! the traits here let the audio pipeline (C6) stay agnostic about whether
//! it's talking to a real device or the null fallback used in tests and
//! when no hardware is present.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;

use crate::error::{CoreError, Result};

fn gain_to_bits(gain: f32) -> u32 {
    gain.clamp(0.0, 1.0).to_bits()
}

/// A source of captured audio samples, fixed at 48 kHz mono float32
/// (spec §4.6).
pub trait Capture: Send {
    fn initialize(&mut self, sample_rate: u32, channels: u16) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn set_gain(&self, gain: f32);
    fn get_gain(&self) -> f32;
    /// Install the callback invoked with each captured block. Replaces any
    /// previously installed callback.
    fn set_on_samples(&mut self, callback: Box<dyn Fn(&[f32]) + Send + Sync>);
}

/// A sink that plays back decoded audio samples.
pub trait Playback: Send {
    fn initialize(&mut self, sample_rate: u32, channels: u16) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn set_gain(&self, gain: f32);
    fn get_gain(&self) -> f32;
    /// Enqueue a block of decoded samples for playback.
    fn push_samples(&self, block: &[f32]);
}

/// Discards every captured sample and never calls its callback; the
/// playback half discards every pushed sample. This is the fallback
/// device used whenever hardware fails to initialize (spec §4.7).
#[derive(Default)]
pub struct NullDevice {
    gain_bits: AtomicU32,
}

impl NullDevice {
    pub fn new() -> Self {
        Self { gain_bits: AtomicU32::new(gain_to_bits(1.0)) }
    }
}

impl Capture for NullDevice {
    fn initialize(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        Ok(())
    }
    fn start(&mut self) -> Result<()> {
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
    fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain_to_bits(gain), Ordering::Relaxed);
    }
    fn get_gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }
    fn set_on_samples(&mut self, _callback: Box<dyn Fn(&[f32]) + Send + Sync>) {}
}

impl Playback for NullDevice {
    fn initialize(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
        Ok(())
    }
    fn start(&mut self) -> Result<()> {
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
    fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain_to_bits(gain), Ordering::Relaxed);
    }
    fn get_gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }
    fn push_samples(&self, _block: &[f32]) {}
}

/// A `cpal` input device. The capture callback runs on cpal's real-time
/// thread and must never block; it only clamps gain (an atomic load) and
/// forwards to the installed callback.
pub struct CpalCapture {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    gain_bits: Arc<AtomicU32>,
    on_samples: Arc<Mutex<Option<Box<dyn Fn(&[f32]) + Send + Sync>>>>,
}

// cpal::Stream is conservatively !Send on all platforms, but this struct
// only ever calls play()/pause()/drop on it and never touches
// platform-specific internals directly, so moving it across threads is sound.
unsafe impl Send for CpalCapture {}

impl CpalCapture {
    /// Open the host's default input device, or `Err(Device)` if there is
    /// none — callers fall back to `NullDevice` in that case.
    pub fn default_device() -> Result<Self> {
        let device = cpal::default_host().default_input_device().ok_or_else(|| CoreError::Device("no default input device".into()))?;
        Ok(Self { device, stream: None, gain_bits: Arc::new(AtomicU32::new(gain_to_bits(1.0))), on_samples: Arc::new(Mutex::new(None)) })
    }
}

impl Capture for CpalCapture {
    fn initialize(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        let config = StreamConfig { channels, sample_rate: cpal::SampleRate(sample_rate), buffer_size: cpal::BufferSize::Default };
        let gain_bits = self.gain_bits.clone();
        let on_samples = self.on_samples.clone();
        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let gain = f32::from_bits(gain_bits.load(Ordering::Relaxed));
                    let callback = on_samples.lock().unwrap();
                    if let Some(callback) = callback.as_ref() {
                        if gain == 1.0 {
                            callback(data);
                        } else {
                            let scaled: Vec<f32> = data.iter().map(|s| s * gain).collect();
                            callback(&scaled);
                        }
                    }
                },
                |error| tracing::warn!(%error, "capture stream error"),
                None,
            )
            .map_err(|e| CoreError::Device(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.stream.as_ref().ok_or_else(|| CoreError::Device("capture not initialized".into()))?.play().map_err(|e| CoreError::Device(e.to_string()))
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| CoreError::Device(e.to_string()))?;
        }
        Ok(())
    }

    fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain_to_bits(gain), Ordering::Relaxed);
    }

    fn get_gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    fn set_on_samples(&mut self, callback: Box<dyn Fn(&[f32]) + Send + Sync>) {
        *self.on_samples.lock().unwrap() = Some(callback);
    }
}

/// A `cpal` output device. `push_samples` is called from async/network
/// code and only needs to hand samples to the ring buffer the output
/// callback drains — never the other way around.
pub struct CpalPlayback {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    gain_bits: Arc<AtomicU32>,
    queue: Arc<parking_lot::Mutex<std::collections::VecDeque<f32>>>,
}

// See the Send impl for CpalCapture above — same reasoning applies here.
unsafe impl Send for CpalPlayback {}

impl CpalPlayback {
    pub fn default_device() -> Result<Self> {
        let device = cpal::default_host().default_output_device().ok_or_else(|| CoreError::Device("no default output device".into()))?;
        Ok(Self { device, stream: None, gain_bits: Arc::new(AtomicU32::new(gain_to_bits(1.0))), queue: Arc::new(parking_lot::Mutex::new(std::collections::VecDeque::new())) })
    }
}

impl Playback for CpalPlayback {
    fn initialize(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        let config = StreamConfig { channels, sample_rate: cpal::SampleRate(sample_rate), buffer_size: cpal::BufferSize::Default };
        let gain_bits = self.gain_bits.clone();
        let queue = self.queue.clone();
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _| {
                    let gain = f32::from_bits(gain_bits.load(Ordering::Relaxed));
                    let mut queue = queue.lock();
                    for slot in out.iter_mut() {
                        *slot = queue.pop_front().map(|s| s * gain).unwrap_or(0.0);
                    }
                },
                |error| tracing::warn!(%error, "playback stream error"),
                None,
            )
            .map_err(|e| CoreError::Device(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.stream.as_ref().ok_or_else(|| CoreError::Device("playback not initialized".into()))?.play().map_err(|e| CoreError::Device(e.to_string()))
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| CoreError::Device(e.to_string()))?;
        }
        Ok(())
    }

    fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain_to_bits(gain), Ordering::Relaxed);
    }

    fn get_gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    fn push_samples(&self, block: &[f32]) {
        const MAX_QUEUED: usize = 48_000; // ~1s at 48kHz mono (spec §4.6)
        let mut queue = self.queue.lock();
        queue.extend(block.iter().copied());
        while queue.len() > MAX_QUEUED {
            queue.pop_front();
        }
    }
}
