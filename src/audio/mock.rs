//! Hardware-free devices.
//!
//! `ManualSink` has a clock that only moves when told to, so scheduling can be
//! asserted exactly. The microphones either replay fixed samples or refuse to
//! open.

use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::capture::{MicStream, Microphone};
use super::playback::{AudioSink, BufferId, Speaker, Voice};
use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, PartialEq)]
pub struct StartedVoice {
    pub id: BufferId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Default)]
struct SinkState {
    now: f64,
    started: Vec<StartedVoice>,
    live: HashMap<BufferId, Voice>,
    stopped: Vec<BufferId>,
}

#[derive(Default)]
pub struct ManualSink {
    state: Mutex<SinkState>,
    closed: AtomicBool,
}

impl ManualSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_now(&self, now: f64) {
        self.lock().now = now;
    }

    /// Moves the clock forward and retires every voice that has played out.
    pub fn advance(&self, seconds: f64) {
        let finished: Vec<Voice> = {
            let mut state = self.lock();
            state.now += seconds;
            let now = state.now;
            let done: Vec<BufferId> = state
                .live
                .values()
                .filter(|v| v.start_at + v.buffer.duration() <= now)
                .map(|v| v.id)
                .collect();
            done.iter().filter_map(|id| state.live.remove(id)).collect()
        };
        for voice in finished {
            let _ = voice.on_end.send(voice.id);
        }
    }

    /// Ends one voice naturally, regardless of the clock.
    pub fn finish(&self, id: BufferId) -> bool {
        let voice = self.lock().live.remove(&id);
        match voice {
            Some(v) => {
                let _ = v.on_end.send(v.id);
                true
            }
            None => false,
        }
    }

    pub fn started(&self) -> Vec<StartedVoice> {
        self.lock().started.clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.lock().stopped.clone()
    }

    pub fn live(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioSink for ManualSink {
    fn now(&self) -> f64 {
        self.lock().now
    }

    fn start(&self, voice: Voice) {
        let mut state = self.lock();
        state.started.push(StartedVoice {
            id: voice.id,
            start_at: voice.start_at,
            duration: voice.buffer.duration(),
        });
        state.live.insert(voice.id, voice);
    }

    fn stop(&self, id: BufferId) {
        let mut state = self.lock();
        if state.live.remove(&id).is_some() {
            state.stopped.push(id);
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        let ids: Vec<BufferId> = state.live.keys().copied().collect();
        state.live.clear();
        state.stopped.extend(ids);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared [`ManualSink`] and counts opens.
#[derive(Clone, Default)]
pub struct ManualSpeaker {
    pub sink: Arc<ManualSink>,
    opens: Arc<AtomicUsize>,
}

impl ManualSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Speaker for ManualSpeaker {
    fn open(&self, _sample_rate: u32) -> AgentResult<Arc<dyn AudioSink>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.sink.closed.store(false, Ordering::SeqCst);
        let sink: Arc<dyn AudioSink> = self.sink.clone();
        Ok(sink)
    }
}

/// Tracks whether the device a [`MicStream`] came from is still held.
#[derive(Debug, Clone, Default)]
pub struct DeviceLease {
    held: Arc<AtomicUsize>,
}

impl DeviceLease {
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> LeaseGuard {
        self.held.fetch_add(1, Ordering::SeqCst);
        LeaseGuard {
            held: Arc::clone(&self.held),
        }
    }
}

struct LeaseGuard {
    held: Arc<AtomicUsize>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Replays a fixed sample sequence once per open, then goes quiet.
#[derive(Debug, Clone)]
pub struct ScriptedMicrophone {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    pub lease: DeviceLease,
}

impl ScriptedMicrophone {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            lease: DeviceLease::default(),
        }
    }

    pub fn silent(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }
}

impl Microphone for ScriptedMicrophone {
    fn open(&self, _preferred_rate: u32) -> AgentResult<MicStream> {
        let rb = HeapRb::<f32>::new(self.samples.len().max(1));
        let (mut producer, consumer) = rb.split();
        producer.push_slice(&self.samples);
        Ok(MicStream::new(
            self.sample_rate,
            consumer,
            Box::new(self.lease.acquire()),
        ))
    }
}

/// Microphone whose permission is always refused.
#[derive(Debug, Clone)]
pub struct DeniedMicrophone {
    pub reason: String,
}

impl DeniedMicrophone {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl Microphone for DeniedMicrophone {
    fn open(&self, _preferred_rate: u32) -> AgentResult<MicStream> {
        Err(AgentError::DeviceUnavailable(self.reason.clone()))
    }
}
