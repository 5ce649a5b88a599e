//! Stem decoding via symphonia.
//!
//! Decodes an entire track into a mono f32 buffer up front; playback
//! and analysis both read from the buffer, so neither ever blocks on
//! the decoder.

use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::StemLoadError;

/// Decoded mono audio, shared between the player clock, the audio
/// callback and the analysis thread.
#[derive(Clone)]
pub struct StemBuffer {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl StemBuffer {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Build a buffer from raw samples (used by tests and synthetic stems).
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }
}

pub fn decode_stem(path: &Path) -> Result<StemBuffer, StemLoadError> {
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| StemLoadError::Open {
        path: display.clone(),
        source: e,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| StemLoadError::Decode {
            path: display.clone(),
            reason: format!("probe failed: {e}"),
        })?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| StemLoadError::Decode {
            path: display.clone(),
            reason: "no audio tracks".into(),
        })?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| StemLoadError::Decode {
            path: display.clone(),
            reason: "unknown sample rate".into(),
        })?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| StemLoadError::Decode {
            path: display.clone(),
            reason: format!("no decoder: {e}"),
        })?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(StemLoadError::Decode {
                    path: display,
                    reason: e.to_string(),
                })
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Skip corrupt packets rather than failing the whole stem
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => {
                return Err(StemLoadError::Decode {
                    path: display,
                    reason: e.to_string(),
                })
            }
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        // Downmix to mono
        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let mono: f32 = frame_samples.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        }
    }

    log::info!(
        "decoded {}: {} samples @ {}Hz ({:.1}s)",
        display,
        all_samples.len(),
        sample_rate,
        all_samples.len() as f32 / sample_rate as f32
    );

    Ok(StemBuffer::from_samples(all_samples, sample_rate))
}
