//! Encoded audio to mono f32 PCM via symphonia.

use crate::error::{CompanionError, Result};
use bytes::Bytes;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode `data` (mp3, aac, mp4 or wav) and downmix to mono.
///
/// # Errors
///
/// Returns [`CompanionError::Audio`] when the container format is not recognized,
/// has no decodable track, or a packet fails to read.
pub fn decode_to_mono_f32(data: Bytes, hint: Option<&str>) -> Result<DecodedAudio> {
    if data.is_empty() {
        return Err(CompanionError::Audio("no audio data".into()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let mut format_hint = Hint::new();
    if let Some(ext) = hint {
        format_hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(
            &format_hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| CompanionError::Audio(format!("unsupported audio format: {e}")))?;

    let mut format = detected.format;
    let track = format
        .default_track()
        .ok_or_else(|| CompanionError::Audio("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| CompanionError::Audio("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| CompanionError::Audio(format!("failed to create decoder: {e}")))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(CompanionError::Audio(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(CompanionError::Audio(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let required = usize::try_from(frames)
            .unwrap_or(usize::MAX)
            .saturating_mul(channels);

        let reusable = sample_buf.as_ref().is_some_and(|b| b.capacity() >= required);
        if !reusable {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.clear();
        buf.copy_interleaved_ref(decoded);

        let data = buf.samples();
        if channels <= 1 {
            samples.extend_from_slice(data);
        } else {
            samples.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    tracing::debug!(
        sample_rate,
        secs = samples.len() as f64 / f64::from(sample_rate.max(1)),
        "decoded audio"
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
