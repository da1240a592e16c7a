// Ordered playback queue of synthesis result slots
use super::clip::AudioClip;
use super::synth::SynthesisError;
use crate::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;

/// Synthesized audio plus the settings captured when it was requested
#[derive(Debug, Clone)]
pub(crate) struct PreparedClip {
    pub clip: AudioClip,
    pub volume: f32,
    pub speed: f32,
}

#[derive(Debug)]
pub(crate) enum SlotState {
    Pending,
    Ready(PreparedClip),
    Failed(SynthesisError),
}

struct Slot {
    sequence: u64,
    state: SlotState,
    task: Option<AbortHandle>,
}

/// A head slot that is no longer pending, removed from the queue
#[derive(Debug)]
pub(crate) struct Settled {
    pub sequence: u64,
    pub generation: u64,
    pub state: SlotState,
}

struct Slots {
    entries: VecDeque<Slot>,
    generation: u64,
    open: bool,
}

/// Outcome of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reservation {
    Reserved,
    Full,
    Closed,
}

/// Slots in request-issue order.
///
/// Reservation, filling and removal all happen under one lock that is never
/// held across an await. Exactly one consumer (the playback driver) takes
/// from the head. `generation` is bumped by every `close` so the consumer can
/// tell whether the slot it took has since been discarded. A closed queue
/// refuses reservations until reopened.
pub(crate) struct PlaybackQueue {
    slots: Mutex<Slots>,
    capacity: usize,
    settled: Notify,
    generation_tx: watch::Sender<u64>,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            slots: Mutex::new(Slots {
                entries: VecDeque::new(),
                generation: 0,
                open: true,
            }),
            capacity: capacity.max(1),
            settled: Notify::new(),
            generation_tx,
        }
    }

    /// Reserve a pending slot at the tail
    pub fn reserve(&self, sequence: u64) -> Reservation {
        let mut slots = lock(&self.slots);
        if !slots.open {
            return Reservation::Closed;
        }
        if slots.entries.len() >= self.capacity {
            return Reservation::Full;
        }
        slots.entries.push_back(Slot {
            sequence,
            state: SlotState::Pending,
            task: None,
        });
        Reservation::Reserved
    }

    /// Remember the task filling `sequence` so `close` can abort it
    pub fn attach(&self, sequence: u64, task: AbortHandle) {
        let mut slots = lock(&self.slots);
        match slots.entries.iter_mut().find(|s| s.sequence == sequence) {
            Some(slot) if matches!(slot.state, SlotState::Pending) => slot.task = Some(task),
            // Already settled, or discarded by a close
            _ => {}
        }
    }

    /// Settle a pending slot. Returns false if the slot no longer exists.
    pub fn fill(&self, sequence: u64, result: Result<PreparedClip, SynthesisError>) -> bool {
        let filled = {
            let mut slots = lock(&self.slots);
            match slots
                .entries
                .iter_mut()
                .find(|s| s.sequence == sequence && matches!(s.state, SlotState::Pending))
            {
                Some(slot) => {
                    slot.state = match result {
                        Ok(prepared) => SlotState::Ready(prepared),
                        Err(e) => SlotState::Failed(e),
                    };
                    slot.task = None;
                    true
                }
                None => false,
            }
        };
        if filled {
            self.settled.notify_one();
        }
        filled
    }

    /// Remove the head if it has settled
    pub fn try_next(&self) -> Option<Settled> {
        let mut slots = lock(&self.slots);
        let head_settled = slots
            .entries
            .front()
            .map(|s| !matches!(s.state, SlotState::Pending))
            .unwrap_or(false);
        if !head_settled {
            return None;
        }
        let generation = slots.generation;
        slots.entries.pop_front().map(|slot| Settled {
            sequence: slot.sequence,
            generation,
            state: slot.state,
        })
    }

    /// Wait until the head slot settles, then remove and return it.
    /// A pending head blocks everything behind it.
    pub async fn next_settled(&self) -> Settled {
        loop {
            if let Some(settled) = self.try_next() {
                return settled;
            }
            self.settled.notified().await;
        }
    }

    /// Discard every slot, abort their synthesis tasks and refuse new
    /// reservations. Returns the number of discarded slots.
    pub fn close(&self) -> usize {
        let mut slots = lock(&self.slots);
        slots.open = false;
        Self::discard(&mut slots, &self.generation_tx)
    }

    /// Accept reservations again. Returns false if already open.
    pub fn reopen(&self) -> bool {
        let mut slots = lock(&self.slots);
        !std::mem::replace(&mut slots.open, true)
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slots).open
    }

    fn discard(slots: &mut Slots, generation_tx: &watch::Sender<u64>) -> usize {
        let discarded = slots.entries.len();
        for slot in slots.entries.drain(..) {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
        slots.generation += 1;
        generation_tx.send_replace(slots.generation);
        discarded
    }

    /// Resolves once the queue generation differs from `generation`
    pub async fn cleared_since(&self, generation: u64) {
        let mut rx = self.generation_tx.subscribe();
        if rx.wait_for(|g| *g != generation).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
