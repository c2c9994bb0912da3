// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The guest command queue.
//!
//! [`CommandQueue`] is the device's view of a virtqueue: pop a guest buffer,
//! complete it, signal the guest. [`GuestRing`] is an in-memory bounded ring
//! implementing it, with a guest-side handle for submitting commands and
//! collecting completions.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use virtio_watchdog_protocol::WatchdogEvent;
use virtio_watchdog_protocol::WatchdogEventKind;
use zerocopy::IntoBytes;

/// A guest buffer popped from the queue.
///
/// The request must be handed back through [`CommandQueue::complete`] to
/// return its descriptor to the guest.
#[derive(Debug)]
pub struct QueueRequest {
    index: u16,
    payload: Vec<u8>,
    // Ring reset generation the request was popped in.
    generation: u64,
}

impl QueueRequest {
    /// Builds a request for descriptor `index` carrying the device-readable
    /// bytes `payload`.
    pub fn new(index: u16, payload: Vec<u8>) -> Self {
        Self {
            index,
            payload,
            generation: 0,
        }
    }

    /// The descriptor index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The device-readable contents of the buffer.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// The device side of a command queue.
pub trait CommandQueue: Send {
    /// The number of requests the guest has made available and the device
    /// has not yet popped.
    fn available(&self) -> usize;

    /// Pops the oldest available request.
    fn pop(&mut self) -> Option<QueueRequest>;

    /// Returns a request to the guest, reporting `written` bytes of response.
    fn complete(&mut self, request: QueueRequest, written: u32);

    /// Signals the guest that completed requests are ready.
    fn notify_guest(&mut self);

    /// Drops every outstanding request and returns the queue to its initial
    /// state.
    fn reset(&mut self);
}

/// A completed request, as seen by the guest.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UsedElement {
    /// The descriptor index.
    pub index: u16,
    /// Bytes written by the device.
    pub len: u32,
}

/// The guest tried to submit to a ring with no free descriptors.
#[derive(Debug, Error)]
#[error("command queue is full ({size} descriptors in use)")]
pub struct QueueFull {
    size: u16,
}

#[derive(Debug)]
struct RingState {
    size: u16,
    free: VecDeque<u16>,
    available: VecDeque<QueueRequest>,
    in_flight: Vec<bool>,
    used: Vec<UsedElement>,
    notifications: u64,
    generation: u64,
}

impl RingState {
    fn new(size: u16, generation: u64) -> Self {
        Self {
            size,
            generation,
            free: (0..size).collect(),
            available: VecDeque::new(),
            in_flight: vec![false; size.into()],
            used: Vec::new(),
            notifications: 0,
        }
    }
}

/// Constructor for a bounded in-memory command ring.
pub struct GuestRing;

impl GuestRing {
    /// Creates a ring with `size` descriptors, returning the guest and device
    /// ends.
    pub fn new(size: u16) -> (GuestRingHandle, DeviceRing) {
        let state = Arc::new(Mutex::new(RingState::new(size, 0)));
        (
            GuestRingHandle {
                state: state.clone(),
            },
            DeviceRing { state },
        )
    }
}

/// The guest end of a [`GuestRing`].
#[derive(Debug, Clone)]
pub struct GuestRingHandle {
    state: Arc<Mutex<RingState>>,
}

impl GuestRingHandle {
    /// Places a buffer on the ring, returning its descriptor index.
    pub fn submit(&self, data: &[u8]) -> Result<u16, QueueFull> {
        let mut state = self.state.lock();
        let size = state.size;
        let index = state.free.pop_front().ok_or(QueueFull { size })?;
        state
            .available
            .push_back(QueueRequest::new(index, data.to_vec()));
        Ok(index)
    }

    /// Places a well-formed command on the ring.
    pub fn submit_event(&self, kind: WatchdogEventKind) -> Result<u16, QueueFull> {
        self.submit(WatchdogEvent::new(kind).as_bytes())
    }

    /// Collects completed requests, freeing their descriptors.
    pub fn take_used(&self) -> Vec<UsedElement> {
        let mut state = self.state.lock();
        let used = std::mem::take(&mut state.used);
        for element in &used {
            state.free.push_back(element.index);
        }
        used
    }

    /// Requests submitted but not yet completed by the device.
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock();
        state.available.len() + state.in_flight.iter().filter(|&&busy| busy).count()
    }

    /// The number of times the device has signaled the guest.
    pub fn notifications(&self) -> u64 {
        self.state.lock().notifications
    }
}

/// The device end of a [`GuestRing`].
#[derive(Debug)]
pub struct DeviceRing {
    state: Arc<Mutex<RingState>>,
}

impl CommandQueue for DeviceRing {
    fn available(&self) -> usize {
        self.state.lock().available.len()
    }

    fn pop(&mut self) -> Option<QueueRequest> {
        let mut state = self.state.lock();
        let mut request = state.available.pop_front()?;
        request.generation = state.generation;
        state.in_flight[usize::from(request.index)] = true;
        Some(request)
    }

    fn complete(&mut self, request: QueueRequest, written: u32) {
        let mut state = self.state.lock();
        let index = request.index;
        if request.generation != state.generation {
            // Popped before a reset. The descriptor may already belong to a
            // newer buffer.
            tracing::debug!(index, "dropping completion from before reset");
            return;
        }
        let Some(busy) = state.in_flight.get_mut(usize::from(index)) else {
            tracing::warn!(index, "completion for descriptor outside the ring");
            return;
        };
        if !std::mem::replace(busy, false) {
            // The ring was reset while this request was being processed.
            tracing::debug!(index, "dropping completion for released descriptor");
            return;
        }
        state.used.push(UsedElement {
            index,
            len: written,
        });
    }

    fn notify_guest(&mut self) {
        self.state.lock().notifications += 1;
    }

    fn reset(&mut self) {
        let mut state = self.state.lock();
        let size = state.size;
        let generation = state.generation.wrapping_add(1);
        *state = RingState::new(size, generation);
    }
}
