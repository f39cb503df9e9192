//! Request Table: 64 correlation slots indexed by request id.
//!
//! A caller allocates an id, sends its command with that id, then blocks in
//! [`RequestTable::wait`] until the Reader Task resolves the slot, the
//! connection fails, or the deadline passes. Ids are never reused before the
//! owner frees them, and a timed-out id stays reserved until the late
//! response arrives or the connection it was sent on is gone.

use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::EmpError;
use crate::status::Status;

/// Index into the table, carried in the frame header.
pub type RequestId = u8;

/// Number of request slots, and the exclusive upper bound of request ids.
pub const MAX_REQUESTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Available,
    Allocated,
    /// An Agent response was delivered.
    Resolved,
    /// A local failure was delivered.
    Error,
    /// The waiter gave up; the id stays reserved until reclaimed.
    TimedOut,
}

/// Locally synthesized failures delivered through a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Closed,
    Io { kind: io::ErrorKind, message: String },
    CommunicationError,
    MalformedResponse(usize),
}

impl Failure {
    pub fn from_io(err: &io::Error) -> Self {
        Failure::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn into_error(self) -> EmpError {
        match self {
            Failure::Closed => EmpError::Closed,
            Failure::Io { kind, message } => EmpError::Io(io::Error::new(kind, message)),
            Failure::CommunicationError => EmpError::CommunicationError,
            Failure::MalformedResponse(len) => EmpError::MalformedResponse(len),
        }
    }
}

/// What a waiter wakes up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The Agent answered; `body` excludes the status prefix.
    Response { status: Status, body: Bytes },
    Failed(Failure),
    TimedOut,
}

/// Result of handing a resolution to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// A waiter was signalled.
    Delivered,
    /// The slot had timed out; the late response freed it.
    Reclaimed,
    /// Nobody was waiting on that id.
    Dropped,
}

#[derive(Debug)]
struct SlotInner {
    state: SlotState,
    resolution: Option<Resolution>,
}

#[derive(Debug)]
struct Slot {
    inner: Mutex<SlotInner>,
    signal: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Available,
                resolution: None,
            }),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size table of in-flight requests.
///
/// Lock order is bitmap then slot; no path holds a slot lock while taking
/// the bitmap.
#[derive(Debug)]
pub struct RequestTable {
    in_use: Mutex<u64>,
    slots: Vec<Slot>,
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            in_use: Mutex::new(0),
            slots: (0..MAX_REQUESTS).map(|_| Slot::new()).collect(),
        }
    }

    fn bitmap(&self) -> MutexGuard<'_, u64> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, id: RequestId) -> Option<&Slot> {
        self.slots.get(usize::from(id))
    }

    fn release_bit(&self, id: RequestId) {
        *self.bitmap() &= !(1u64 << id);
    }

    /// Reserve the lowest free id. Fails with [`EmpError::Busy`] when all 64
    /// are taken; there is no queueing.
    pub fn allocate(&self) -> Result<RequestId, EmpError> {
        let mut bitmap = self.bitmap();
        let free = (!*bitmap).trailing_zeros();
        if free as usize >= MAX_REQUESTS {
            debug!("request table exhausted");
            return Err(EmpError::Busy);
        }
        let id = free as RequestId;
        *bitmap |= 1u64 << id;

        let mut slot = self.slots[usize::from(id)].lock();
        slot.state = SlotState::Allocated;
        slot.resolution = None;
        trace!(rid = id, "request slot allocated");
        Ok(id)
    }

    /// Deliver `resolution` to the waiter of `id`.
    ///
    /// Each allocation is resolved at most once; later calls are dropped.
    pub fn resolve(&self, id: RequestId, resolution: Resolution) -> ResolveOutcome {
        let Some(slot) = self.slot(id) else {
            debug!(rid = id, "response for out-of-range request id dropped");
            return ResolveOutcome::Dropped;
        };

        let mut inner = slot.lock();
        match inner.state {
            SlotState::Allocated => {
                inner.state = match resolution {
                    Resolution::Response { .. } => SlotState::Resolved,
                    Resolution::Failed(_) | Resolution::TimedOut => SlotState::Error,
                };
                inner.resolution = Some(resolution);
                slot.signal.notify_one();
                ResolveOutcome::Delivered
            }
            SlotState::TimedOut => {
                inner.state = SlotState::Available;
                inner.resolution = None;
                drop(inner);
                self.release_bit(id);
                debug!(rid = id, "late response reclaimed timed-out slot");
                ResolveOutcome::Reclaimed
            }
            state => {
                debug!(rid = id, ?state, "response with no waiter dropped");
                ResolveOutcome::Dropped
            }
        }
    }

    /// Block until `id` is resolved or `deadline` passes (`None` never
    /// expires).
    ///
    /// On expiry the slot is marked [`SlotState::TimedOut`] and
    /// [`Resolution::TimedOut`] is returned. Returns `None` when `id` is not
    /// awaiting a resolution.
    pub fn wait(&self, id: RequestId, deadline: Option<Instant>) -> Option<Resolution> {
        let slot = self.slot(id)?;
        let mut inner = slot.lock();
        loop {
            match inner.state {
                SlotState::Resolved | SlotState::Error => return inner.resolution.take(),
                SlotState::Available | SlotState::TimedOut => return None,
                SlotState::Allocated => {}
            }

            inner = match deadline {
                None => slot
                    .signal
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        inner.state = SlotState::TimedOut;
                        inner.resolution = None;
                        debug!(rid = id, "request timed out");
                        return Some(Resolution::TimedOut);
                    }
                    slot.signal
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Release an id held by its owner.
    ///
    /// No-op on an available slot, so a double free is harmless, and on a
    /// timed-out slot, which belongs to the late-response path.
    pub fn free(&self, id: RequestId) {
        let Some(slot) = self.slot(id) else {
            return;
        };
        let mut inner = slot.lock();
        match inner.state {
            SlotState::Available | SlotState::TimedOut => return,
            SlotState::Allocated | SlotState::Resolved | SlotState::Error => {
                inner.state = SlotState::Available;
                inner.resolution = None;
            }
        }
        drop(inner);
        self.release_bit(id);
        trace!(rid = id, "request slot freed");
    }

    /// Resolve every allocated slot with `failure` and wake its waiter.
    /// Returns the number of waiters woken.
    pub fn fail_all(&self, failure: Failure) -> usize {
        let mut woken = 0;
        for slot in &self.slots {
            let mut inner = slot.lock();
            if inner.state == SlotState::Allocated {
                inner.state = SlotState::Error;
                inner.resolution = Some(Resolution::Failed(failure.clone()));
                slot.signal.notify_all();
                woken += 1;
            }
        }
        if woken > 0 {
            debug!(woken, ?failure, "pending requests failed");
        }
        woken
    }

    /// Free every timed-out slot. Called once the connection those requests
    /// went out on is gone, since their responses can no longer arrive.
    pub fn reclaim_timed_out(&self) -> usize {
        let mut reclaimed = 0;
        for (id, slot) in self.slots.iter().enumerate() {
            let mut inner = slot.lock();
            if inner.state == SlotState::TimedOut {
                inner.state = SlotState::Available;
                drop(inner);
                self.release_bit(id as RequestId);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, "timed-out request slots reclaimed");
        }
        reclaimed
    }

    pub fn state(&self, id: RequestId) -> Option<SlotState> {
        self.slot(id).map(|slot| slot.lock().state)
    }

    /// Ids currently reserved, timed-out ones included.
    pub fn in_use(&self) -> usize {
        self.bitmap().count_ones() as usize
    }
}
