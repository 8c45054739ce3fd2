use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::cancel::Generation;
use crate::audio::decode::{decode_pcm16, PlaybackBuffer};
use crate::audio::playback::{AudioSink, BufferId, Voice};
use crate::error::AgentResult;

/// Slot reserved in receipt order before a chunk is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    /// The ticket predates an interruption; the buffer was dropped.
    Stale,
    /// Buffers placed on the timeline by this commit. Empty while an earlier
    /// ticket is still decoding.
    Placed(Vec<ScheduledBuffer>),
}

#[derive(Debug, Default)]
struct Timeline {
    next_start_time: f64,
    active: HashMap<BufferId, ScheduledBuffer>,
    next_buffer_id: BufferId,
    next_seq: u64,
    next_commit: u64,
    /// Decoded (or failed, `None`) buffers waiting for earlier tickets.
    pending: BTreeMap<u64, Option<PlaybackBuffer>>,
}

/// Gapless back-to-back playback with immediate cancellation.
///
/// All mutation happens under one lock, so concurrent decode completions and
/// `interrupt` serialize. Buffers are placed strictly in ticket order at
/// `max(next_start_time, sink.now())`.
pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    generation: Generation,
    timeline: Mutex<Timeline>,
    ended_tx: mpsc::UnboundedSender<BufferId>,
    ended_rx: Mutex<mpsc::UnboundedReceiver<BufferId>>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            sink,
            generation: Generation::new(),
            timeline: Mutex::new(Timeline::default()),
            ended_tx,
            ended_rx: Mutex::new(ended_rx),
        }
    }

    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    pub fn reserve(&self) -> Ticket {
        let mut tl = self.lock();
        let seq = tl.next_seq;
        tl.next_seq += 1;
        Ticket {
            generation: self.generation.current(),
            seq,
        }
    }

    /// Hands in the decode result for `ticket`. `None` marks a failed decode so
    /// later tickets are not held back by it.
    pub fn commit(&self, ticket: Ticket, buffer: Option<PlaybackBuffer>) -> Commit {
        let mut tl = self.lock();
        if !self.generation.is_current(ticket.generation) {
            debug!("Discarding stale chunk (seq {})", ticket.seq);
            return Commit::Stale;
        }
        self.reap(&mut tl);

        tl.pending.insert(ticket.seq, buffer);
        let mut placed = Vec::new();
        loop {
            let next = tl.next_commit;
            let Some(ready) = tl.pending.remove(&next) else {
                break;
            };
            tl.next_commit += 1;
            if let Some(buffer) = ready {
                placed.push(self.place(&mut tl, buffer));
            }
        }
        Commit::Placed(placed)
    }

    /// Synchronous path for an already decoded buffer.
    pub fn schedule(&self, buffer: PlaybackBuffer) -> Commit {
        let ticket = self.reserve();
        self.commit(ticket, Some(buffer))
    }

    /// Reserves a slot now and decodes off the caller's path. The returned
    /// task resolves to the commit outcome, or the decode error. A chunk cut
    /// by `interrupt` resolves to `Stale` even if it failed to decode.
    pub fn schedule_chunk(
        self: &Arc<Self>,
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    ) -> JoinHandle<AgentResult<Commit>> {
        let ticket = self.reserve();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match decode_pcm16(&data, sample_rate, channels) {
                Ok(buffer) => Ok(this.commit(ticket, Some(buffer))),
                Err(e) => match this.commit(ticket, None) {
                    Commit::Stale => Ok(Commit::Stale),
                    Commit::Placed(_) => Err(e),
                },
            }
        })
    }

    /// Barge-in. Stops everything playing or queued, forgets pending decodes
    /// and rewinds the watermark to zero. Returns how many buffers were cut.
    pub fn interrupt(&self) -> usize {
        let mut tl = self.lock();
        self.generation.bump();

        let cut = tl.active.len();
        for (id, _) in tl.active.drain() {
            self.sink.stop(id);
        }
        tl.pending.clear();
        tl.next_seq = 0;
        tl.next_commit = 0;
        tl.next_start_time = 0.0;

        // Anything that finished meanwhile is already gone from `active`.
        let mut ended = self.ended_rx.lock().unwrap_or_else(|e| e.into_inner());
        while ended.try_recv().is_ok() {}

        if cut > 0 {
            info!("Playback interrupted, {} buffer(s) stopped", cut);
        }
        cut
    }

    /// Interrupts and releases the output device.
    pub fn shutdown(&self) {
        self.interrupt();
        self.sink.close();
    }

    pub fn active_len(&self) -> usize {
        let mut tl = self.lock();
        self.reap(&mut tl);
        tl.active.len()
    }

    pub fn active(&self) -> Vec<ScheduledBuffer> {
        let mut tl = self.lock();
        self.reap(&mut tl);
        let mut buffers: Vec<_> = tl.active.values().cloned().collect();
        buffers.sort_by(|a, b| a.start_at.total_cmp(&b.start_at));
        buffers
    }

    pub fn next_start_time(&self) -> f64 {
        self.lock().next_start_time
    }

    fn place(&self, tl: &mut Timeline, buffer: PlaybackBuffer) -> ScheduledBuffer {
        let start_at = tl.next_start_time.max(self.sink.now());
        let duration = buffer.duration();
        let id = tl.next_buffer_id;
        tl.next_buffer_id += 1;

        let scheduled = ScheduledBuffer {
            id,
            start_at,
            duration,
        };
        tl.active.insert(id, scheduled.clone());
        tl.next_start_time = start_at + duration;

        self.sink.start(Voice {
            id,
            buffer,
            start_at,
            on_end: self.ended_tx.clone(),
        });
        scheduled
    }

    fn reap(&self, tl: &mut Timeline) {
        let mut ended = self.ended_rx.lock().unwrap_or_else(|e| e.into_inner());
        while let Ok(id) = ended.try_recv() {
            tl.active.remove(&id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(|e| e.into_inner())
    }
}
