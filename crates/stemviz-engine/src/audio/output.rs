//! Audio output for the main stem.
//!
//! One cpal output stream renders the main stem's mono buffer to every
//! output channel. The callback owns a fractional sample cursor stored
//! as f64 bits in an `AtomicU64`, which makes the device-side playhead
//! readable from any thread without touching the callback's lock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::decode::StemBuffer;
use crate::error::EngineError;

/// State shared between the transport and the output callback.
pub struct MainTap {
    buffer: Mutex<Option<StemBuffer>>,
    /// Fractional sample position, f64 bits.
    cursor_bits: AtomicU64,
    playing: AtomicBool,
}

impl MainTap {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(None),
            cursor_bits: AtomicU64::new(0f64.to_bits()),
            playing: AtomicBool::new(false),
        }
    }

    pub fn install(&self, buffer: StemBuffer) {
        if let Ok(mut guard) = self.buffer.lock() {
            *guard = Some(buffer);
        }
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    /// Playhead in seconds, derived from the device cursor.
    pub fn position_secs(&self) -> Option<f64> {
        let guard = self.buffer.lock().ok()?;
        let buf = guard.as_ref()?;
        let cursor = f64::from_bits(self.cursor_bits.load(Ordering::Relaxed));
        Some(cursor / buf.sample_rate as f64)
    }

    pub fn seek_secs(&self, secs: f64) {
        let Ok(guard) = self.buffer.lock() else {
            return;
        };
        if let Some(buf) = guard.as_ref() {
            let max = buf.samples.len() as f64;
            let cursor = (secs.max(0.0) * buf.sample_rate as f64).min(max);
            self.cursor_bits.store(cursor.to_bits(), Ordering::Relaxed);
        }
    }
}

impl Default for MainTap {
    fn default() -> Self {
        Self::new()
    }
}

/// Live output stream. Dropping it stops playback.
pub struct Output {
    _stream: cpal::Stream,
}

impl Output {
    /// Open the default output device and start rendering from `tap`.
    pub fn open(tap: Arc<MainTap>) -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::NoOutputDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::OutputStream(e.to_string()))?;

        let out_rate = config.sample_rate().0 as f64;
        let channels = config.channels() as usize;
        log::info!(
            "audio output: {} @ {}Hz, {} channels",
            device.name().unwrap_or_else(|_| "unknown".into()),
            out_rate,
            channels
        );

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render(&tap, data, channels, out_rate);
                },
                |err| log::error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::OutputStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| EngineError::OutputStream(e.to_string()))?;

        Ok(Self { _stream: stream })
    }
}

fn render(tap: &MainTap, data: &mut [f32], channels: usize, out_rate: f64) {
    data.fill(0.0);

    if !tap.playing.load(Ordering::Relaxed) {
        return;
    }

    // try_lock so a transport-side install can never glitch the device
    let Ok(guard) = tap.buffer.try_lock() else {
        return;
    };
    let Some(buf) = guard.as_ref() else {
        return;
    };

    let step = buf.sample_rate as f64 / out_rate;
    let mut cursor = f64::from_bits(tap.cursor_bits.load(Ordering::Relaxed));
    let samples = &buf.samples;

    for frame in data.chunks_mut(channels) {
        let idx = cursor as usize;
        if idx + 1 >= samples.len() {
            break;
        }
        let frac = (cursor - idx as f64) as f32;
        let value = samples[idx] * (1.0 - frac) + samples[idx + 1] * frac;
        for slot in frame.iter_mut() {
            *slot = value;
        }
        cursor += step;
    }

    tap.cursor_bits.store(cursor.to_bits(), Ordering::Relaxed);
}
