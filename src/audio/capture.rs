use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, info};

use super::device::{find_input_device, DeviceThread};
use crate::error::AgentResult;

/// A live microphone: mono f32 samples at `sample_rate` arriving in `consumer`.
///
/// The device stays open for as long as this value lives.
pub struct MicStream {
    pub sample_rate: u32,
    pub consumer: HeapCons<f32>,
    _guard: Box<dyn Send>,
}

impl MicStream {
    pub fn new(sample_rate: u32, consumer: HeapCons<f32>, guard: Box<dyn Send>) -> Self {
        Self {
            sample_rate,
            consumer,
            _guard: guard,
        }
    }
}

impl std::fmt::Debug for MicStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicStream").field("sample_rate", &self.sample_rate).finish()
    }
}

/// Source of microphone audio. Failure here is a `DeviceUnavailable`.
pub trait Microphone: Send + Sync {
    /// Opens the device, preferring `preferred_rate`. The returned stream may
    /// run at a different rate; callers resample.
    fn open(&self, preferred_rate: u32) -> AgentResult<MicStream>;
}

/// Microphone backed by the host's cpal input device.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    pub device_pattern: Option<String>,
    pub ring_seconds: u32,
}

impl CpalMicrophone {
    pub fn new(device_pattern: Option<String>, ring_seconds: u32) -> Self {
        Self {
            device_pattern,
            ring_seconds: ring_seconds.max(1),
        }
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, preferred_rate: u32) -> AgentResult<MicStream> {
        let pattern = self.device_pattern.clone();
        let ring_seconds = self.ring_seconds.max(1);

        let (thread, (rate, consumer)) = DeviceThread::spawn("microphone", move || {
            let host = cpal::default_host();
            let device = find_input_device(&host, pattern.as_deref())?;
            info!("Audio Input Device: {}", device.name().unwrap_or_default());

            // Prefer the wire rate so no resampling is needed; otherwise take a common rate.
            let target_rates = [preferred_rate, 48_000, 44_100, 32_000];
            let mut selected = None;
            for &rate in &target_rates {
                for range in device.supported_input_configs()? {
                    if range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate {
                        selected = Some(range.with_sample_rate(cpal::SampleRate(rate)));
                        break;
                    }
                }
                if selected.is_some() {
                    break;
                }
            }
            let config = match selected {
                Some(c) => c,
                None => device.default_input_config()?,
            };

            let rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            info!("Audio Config Selected: Rate={}Hz, Channels={}", rate, channels);

            let rb = HeapRb::<f32>::new(rate as usize * ring_seconds as usize);
            let (mut producer, consumer) = rb.split();

            let err_fn = |err| error!("an error occurred on input stream: {}", err);
            let stream = match config.sample_format() {
                cpal::SampleFormat::F32 => device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &_| write_input_data(data, channels, &mut producer),
                    err_fn,
                    None,
                )?,
                cpal::SampleFormat::I16 => device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &_| write_input_data_i16(data, channels, &mut producer),
                    err_fn,
                    None,
                )?,
                other => return Err(anyhow::anyhow!("Unsupported sample format {:?}", other)),
            };
            stream.play()?;

            Ok((stream, (rate, consumer)))
        })?;

        Ok(MicStream::new(rate, consumer, Box::new(thread)))
    }
}

// Full ring drops samples rather than blocking the audio callback.
fn write_input_data(input: &[f32], channels: usize, producer: &mut HeapProd<f32>) {
    if channels <= 1 {
        producer.push_slice(input);
        return;
    }
    for frame in input.chunks(channels) {
        let mono = frame.iter().sum::<f32>() / frame.len() as f32;
        let _ = producer.try_push(mono);
    }
}

fn write_input_data_i16(input: &[i16], channels: usize, producer: &mut HeapProd<f32>) {
    for frame in input.chunks(channels.max(1)) {
        let sum: f32 = frame.iter().map(|&s| s as f32 / i16::MAX as f32).sum();
        let _ = producer.try_push(sum / frame.len() as f32);
    }
}
