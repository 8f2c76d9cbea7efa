/*
 * Copyright (C) 2021-2024 The KMS Core Developers.
 *
 * This file is part of KMS Core.
 *
 * KMS Core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * KMS Core is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with KMS Core. If not, see <https://www.gnu.org/licenses/>.
 */

//! The driver-supplied commit executor and the plumbing that lets a completed commit
//! publish its state and retire page-flip events.

use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::device::Device;
use crate::file::{ClientFile, Event};
use crate::state::AtomicState;

/// A client's request to be woken, with `cookie`, once a commit touching `crtc_id`
/// completes.
pub struct EventRequest {
    pub file: Weak<ClientFile>,
    pub crtc_id: u32,
    pub cookie: u64,
}

/// A driver-provided commit executor.
///
/// `check` is always synchronous, including for test-only commits (which consist of
/// nothing else). `commit` is only invoked for accepted, non-test transactions, and may
/// finish the hardware programming on any thread; it must call
/// [`CompletionSink::complete`] exactly once, whenever that programming actually lands.
pub trait Configuration: Send + Sync {
    /// Synchronous feasibility check over the (not yet visible) touched sub-states.
    fn check(&self, device: &Device, state: &AtomicState) -> bool;

    /// Schedules hardware programming for an accepted, non-test commit.
    fn commit(&self, device: &Device, sink: CompletionSink);
}

/// Handed to a [`Configuration`] on an accepted non-test commit. Consuming it via
/// [`CompletionSink::complete`] publishes the touched sub-states and retires any
/// requested page-flip events.
pub struct CompletionSink {
    device: Arc<Device>,
    state: AtomicState,
    event_requests: Vec<EventRequest>,
}

impl CompletionSink {
    pub(crate) fn new(device: Arc<Device>, state: AtomicState, event_requests: Vec<EventRequest>) -> Self {
        Self { device, state, event_requests }
    }

    /// Publishes the commit's touched sub-states and posts a flip-complete event to
    /// every file that asked for one on a touched CRTC. Consumes `self` so a
    /// [`Configuration`] cannot call it twice.
    pub fn complete(self) {
        let touched_crtcs = self.device.publish(self.state);
        let timestamp_ns = monotonic_now_ns();

        for request in self.event_requests {
            if !touched_crtcs.contains(&request.crtc_id) {
                continue;
            }
            let Some(file) = request.file.upgrade() else { continue };
            file.post_event(Event { cookie: request.cookie, crtc_id: request.crtc_id, timestamp_ns });
        }
    }
}

/// Nanoseconds since an arbitrary, process-local epoch. Only ever used for ordering and
/// deltas between events within one process, never compared across processes.
pub fn monotonic_now_ns() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// A `Configuration` that "commits" by recording the state and completing immediately,
/// on the calling thread. Used by the CLI harness and by this crate's own tests so
/// neither needs real hardware or a lane transport.
pub struct SoftwareConfiguration {
    accept: bool,
}

impl SoftwareConfiguration {
    pub fn new() -> Self {
        Self { accept: true }
    }

    /// A configuration that always rejects, for exercising the rollback path.
    pub fn rejecting() -> Self {
        Self { accept: false }
    }
}

impl Default for SoftwareConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration for SoftwareConfiguration {
    fn check(&self, _device: &Device, _state: &AtomicState) -> bool {
        self.accept
    }

    fn commit(&self, _device: &Device, sink: CompletionSink) {
        sink.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_monotonic_non_decreasing() {
        let a = monotonic_now_ns();
        let b = monotonic_now_ns();
        assert!(b >= a);
    }
}
