use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info};

use super::decode::PlaybackBuffer;
use super::device::{find_output_device, DeviceThread};
use crate::error::AgentResult;

pub type BufferId = u64;

/// A buffer handed to the sink with its absolute start time on the output clock.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: BufferId,
    pub buffer: PlaybackBuffer,
    pub start_at: f64,
    /// Receives `id` once the buffer has played out naturally. Not sent on `stop`.
    pub on_end: mpsc::UnboundedSender<BufferId>,
}

/// Speaker side of a session: an output clock plus start/stop of scheduled voices.
pub trait AudioSink: Send + Sync {
    /// Seconds of audio the device has rendered since it was opened.
    fn now(&self) -> f64;

    fn start(&self, voice: Voice);

    /// Silences `id` immediately. Unknown ids are ignored.
    fn stop(&self, id: BufferId);

    /// Releases the device. Idempotent.
    fn close(&self);
}

/// Factory for sinks; opened once per session.
pub trait Speaker: Send + Sync {
    fn open(&self, sample_rate: u32) -> AgentResult<Arc<dyn AudioSink>>;
}

struct MixVoice {
    id: BufferId,
    samples: Arc<[f32]>,
    channels: usize,
    frames: usize,
    /// Source frames advanced per device frame.
    step: f64,
    start_frame: u64,
    on_end: mpsc::UnboundedSender<BufferId>,
    done: bool,
}

/// Sample-clock mixer shared between the sink handle and the device callback.
pub struct Mixer {
    rate: u32,
    channels: usize,
    rendered_frames: u64,
    voices: Vec<MixVoice>,
}

impl Mixer {
    pub fn new(rate: u32, channels: usize) -> Self {
        Self {
            rate,
            channels: channels.max(1),
            rendered_frames: 0,
            voices: Vec::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.rendered_frames as f64 / self.rate as f64
    }

    pub fn add(&mut self, voice: Voice) {
        let buffer = voice.buffer;
        let start_frame = (voice.start_at.max(0.0) * self.rate as f64).round() as u64;
        self.voices.push(MixVoice {
            id: voice.id,
            channels: buffer.channels().max(1) as usize,
            frames: buffer.frames(),
            step: buffer.sample_rate() as f64 / self.rate as f64,
            samples: buffer.samples().clone(),
            start_frame,
            on_end: voice.on_end,
            done: false,
        });
    }

    pub fn remove(&mut self, id: BufferId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Fills `out` (interleaved, device channel count) and advances the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() / self.channels;

        for voice in self.voices.iter_mut() {
            for i in 0..frames {
                let abs = self.rendered_frames + i as u64;
                if abs < voice.start_frame {
                    continue;
                }
                let pos = ((abs - voice.start_frame) as f64 * voice.step) as usize;
                if pos >= voice.frames {
                    voice.done = true;
                    break;
                }
                let base = pos * voice.channels;
                let mono = voice.samples[base..base + voice.channels]
                    .iter()
                    .sum::<f32>()
                    / voice.channels as f32;
                for c in 0..self.channels {
                    out[i * self.channels + c] += mono;
                }
            }
            if voice.frames == 0 {
                voice.done = true;
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        self.rendered_frames += frames as u64;

        self.voices.retain(|v| {
            if v.done {
                let _ = v.on_end.send(v.id);
            }
            !v.done
        });
    }
}

/// Sink over a cpal output stream driven by a [`Mixer`].
pub struct CpalSink {
    mixer: Arc<Mutex<Mixer>>,
    device: Mutex<Option<DeviceThread>>,
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        self.mixer.lock().unwrap_or_else(|e| e.into_inner()).now()
    }

    fn start(&self, voice: Voice) {
        self.mixer.lock().unwrap_or_else(|e| e.into_inner()).add(voice);
    }

    fn stop(&self, id: BufferId) {
        self.mixer.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    fn close(&self) {
        let thread = self.device.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut thread) = thread {
            thread.shutdown();
            info!("Speaker released");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Default)]
pub struct CpalSpeaker {
    pub device_pattern: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device_pattern: Option<String>) -> Self {
        Self { device_pattern }
    }
}

impl Speaker for CpalSpeaker {
    fn open(&self, sample_rate: u32) -> AgentResult<Arc<dyn AudioSink>> {
        let pattern = self.device_pattern.clone();

        let (thread, mixer) = DeviceThread::spawn("speaker", move || {
            let host = cpal::default_host();
            let device = find_output_device(&host, pattern.as_deref())?;
            info!("Audio Output Device: {}", device.name().unwrap_or_default());

            let mut selected = None;
            for range in device.supported_output_configs()? {
                if range.min_sample_rate().0 <= sample_rate
                    && range.max_sample_rate().0 >= sample_rate
                {
                    selected = Some(range.with_sample_rate(cpal::SampleRate(sample_rate)));
                    break;
                }
            }
            let config = match selected {
                Some(c) => c,
                None => device.default_output_config()?,
            };
            let rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            info!("Output Config Selected: Rate={}Hz, Channels={}", rate, channels);

            let mixer = Arc::new(Mutex::new(Mixer::new(rate, channels)));
            let err_fn = |err| error!("an error occurred on output stream: {}", err);

            let stream = match config.sample_format() {
                cpal::SampleFormat::F32 => {
                    let mixer = mixer.clone();
                    device.build_output_stream(
                        &config.into(),
                        move |data: &mut [f32], _: &_| {
                            mixer.lock().unwrap_or_else(|e| e.into_inner()).render(data);
                        },
                        err_fn,
                        None,
                    )?
                }
                cpal::SampleFormat::I16 => {
                    let mixer = mixer.clone();
                    let mut scratch: Vec<f32> = Vec::new();
                    device.build_output_stream(
                        &config.into(),
                        move |data: &mut [i16], _: &_| {
                            scratch.resize(data.len(), 0.0);
                            mixer.lock().unwrap_or_else(|e| e.into_inner()).render(&mut scratch);
                            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                                *dst = (src * i16::MAX as f32) as i16;
                            }
                        },
                        err_fn,
                        None,
                    )?
                }
                other => return Err(anyhow::anyhow!("Unsupported sample format {:?}", other)),
            };
            stream.play()?;

            Ok((stream, mixer))
        })?;

        Ok(Arc::new(CpalSink {
            mixer,
            device: Mutex::new(Some(thread)),
        }))
    }
}
