//! Audio playback to system speakers via cpal.
//!
//! Each [`CpalStream`] owns a dedicated output thread that holds the cpal
//! stream (which is not `Send` on every platform). The stream handle talks
//! to the thread through a crossbeam channel and observes completion
//! through a shared flag.

use crate::audio::{AudioBackend, AudioStream, DecodedAudio, PlaybackSettings, decode_to_mono_f32};
use crate::config::AudioConfig;
use crate::error::{AudioStatus, CompanionError, PlaybackFailure, Result};
use bytes::Bytes;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

const DOMAIN: &str = "cpal";
const START_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Opens [`CpalStream`]s on the configured output device.
pub struct CpalBackend {
    output_device: Option<String>,
    volume: f32,
}

impl CpalBackend {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            output_device: config.output_device.clone(),
            volume: config.volume.clamp(0.0, 1.0),
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| CompanionError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        data: Bytes,
        hint: Option<&str>,
        settings: PlaybackSettings,
    ) -> Result<Box<dyn AudioStream>> {
        let audio = decode_to_mono_f32(data, hint)?;
        let settings = PlaybackSettings {
            volume: settings.volume * self.volume,
            ..settings
        };
        Ok(Box::new(CpalStream::new(
            audio,
            self.output_device.clone(),
            settings,
        )))
    }
}

enum StreamControl {
    Stop,
}

/// One decoded clip bound to the output device.
pub struct CpalStream {
    audio: Option<DecodedAudio>,
    output_device: Option<String>,
    settings: PlaybackSettings,
    finished: Arc<AtomicBool>,
    control: Option<Sender<StreamControl>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn new(audio: DecodedAudio, output_device: Option<String>, settings: PlaybackSettings) -> Self {
        Self {
            audio: Some(audio),
            output_device,
            settings,
            finished: Arc::new(AtomicBool::new(false)),
            control: None,
            thread: None,
        }
    }
}

impl AudioStream for CpalStream {
    fn play(&mut self) -> std::result::Result<(), PlaybackFailure> {
        let Some(audio) = self.audio.take() else {
            // Already started (or stopped); nothing left to hand to a thread.
            return Ok(());
        };

        let (control_tx, control_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let finished = Arc::clone(&self.finished);
        let device_name = self.output_device.clone();
        let settings = self.settings;

        let thread = std::thread::Builder::new()
            .name("fluffel-audio-out".into())
            .spawn(move || {
                run_output(device_name, audio, settings, finished, ready_tx, control_rx);
            })
            .map_err(|e| {
                PlaybackFailure::new(DOMAIN, AudioStatus::Unknown.code(), format!("spawn output thread: {e}"))
            })?;

        self.control = Some(control_tx);
        self.thread = Some(thread);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(PlaybackFailure::new(
                DOMAIN,
                AudioStatus::Unknown.code(),
                "output thread did not report readiness",
            )),
        }
    }

    fn stop(&mut self) {
        self.audio = None;
        if let Some(control) = self.control.take() {
            let _ = control.try_send(StreamControl::Stop);
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("audio output thread panicked");
        }
        self.finished.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    looping: bool,
}

fn run_output(
    device_name: Option<String>,
    audio: DecodedAudio,
    settings: PlaybackSettings,
    finished: Arc<AtomicBool>,
    ready: Sender<std::result::Result<(), PlaybackFailure>>,
    control: Receiver<StreamControl>,
) {
    let stream = match start_output(device_name.as_deref(), audio, settings, &finished) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(failure) => {
            finished.store(true, Ordering::SeqCst);
            let _ = ready.send(Err(failure));
            return;
        }
    };

    loop {
        match control.recv_timeout(POLL_INTERVAL) {
            Ok(StreamControl::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if finished.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    drop(stream);
    finished.store(true, Ordering::SeqCst);
    debug!("audio output stream closed");
}

fn start_output(
    device_name: Option<&str>,
    audio: DecodedAudio,
    settings: PlaybackSettings,
    finished: &Arc<AtomicBool>,
) -> std::result::Result<cpal::Stream, PlaybackFailure> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| {
                PlaybackFailure::new(DOMAIN, AudioStatus::FileNotOpen.code(), format!("cannot enumerate devices: {e}"))
            })?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                PlaybackFailure::new(
                    DOMAIN,
                    AudioStatus::FileNotFound.code(),
                    format!("output device '{name}' not found"),
                )
            })?,
        None => host.default_output_device().ok_or_else(|| {
            PlaybackFailure::new(DOMAIN, AudioStatus::FileNotOpen.code(), "no default output device")
        })?,
    };

    let default_config = device.default_output_config().map_err(|e| {
        PlaybackFailure::new(DOMAIN, AudioStatus::ParameterError.code(), format!("no default output config: {e}"))
    })?;
    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    // Rate > 1.0 plays faster, which is the same as resampling from a higher source rate.
    let source_rate = (f64::from(audio.sample_rate) * f64::from(settings.rate.max(0.05))) as u32;
    let mut samples = resample_linear(&audio.samples, source_rate, native_rate);
    for s in &mut samples {
        *s *= settings.volume;
    }

    info!(
        source_rate = audio.sample_rate,
        native_rate, native_channels, "starting audio output"
    );

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        looping: settings.looping,
    }));
    let callback_buffer = Arc::clone(&buffer);
    let callback_finished = Arc::clone(finished);
    let channels = usize::from(native_channels.max(1));

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match callback_buffer.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };

                for frame in data.chunks_mut(channels) {
                    if buf.position >= buf.samples.len() && buf.looping && !buf.samples.is_empty() {
                        buf.position = 0;
                    }
                    let sample = match buf.samples.get(buf.position).copied() {
                        Some(s) => {
                            buf.position += 1;
                            s
                        }
                        None => {
                            callback_finished.store(true, Ordering::SeqCst);
                            0.0
                        }
                    };
                    frame.fill(sample);
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| build_failure(&e))?;

    stream.play().map_err(|e| {
        let code = match e {
            cpal::PlayStreamError::DeviceNotAvailable => AudioStatus::FileNotOpen.code(),
            _ => AudioStatus::Unknown.code(),
        };
        PlaybackFailure::new(DOMAIN, code, format!("failed to start output stream: {e}"))
    })?;

    Ok(stream)
}

fn build_failure(err: &cpal::BuildStreamError) -> PlaybackFailure {
    let status = match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioStatus::FileNotOpen,
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => AudioStatus::ParameterError,
        _ => AudioStatus::Unknown,
    };
    PlaybackFailure::new(DOMAIN, status.code(), format!("failed to build output stream: {err}"))
}

/// Linear-interpolation resampler from `src_rate` to `dst_rate`.
pub(crate) fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}
