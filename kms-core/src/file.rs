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

//! Per-open-session state: the local buffer-object handle table, the indirect memory
//! aggregator, and the pending flip-event queue a client drains via `read`/`pollWait`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use kms_uapi::{Credentials, FlipCompleteRecord, StatusPage};

use crate::bo::BufferObject;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::id::IdAllocator;
use crate::object::FrameBuffer;
use crate::sync::{Bell, CancelToken};

/// Number of slots in a file's indirect memory aggregator. Matches the upper bound a BO's
/// `mapping >> 32` slot index is installed against.
pub const AGGREGATOR_SLOTS: usize = 1024;

/// A retired page flip, queued until the client reads it.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub cookie: u64,
    pub crtc_id: u32,
    pub timestamp_ns: u64,
}

struct Queue {
    events: VecDeque<Event>,
    status: StatusPage,
}

/// A client's open session against a [`Device`].
///
/// Holds a local handle namespace over buffer objects, an indirect memory aggregator
/// publishing each handle's BO mapping, and the pending flip-event queue with its status
/// page. Never holds a strong reference back to the `Device`'s object registry beyond what
/// it needs to resolve handles.
pub struct ClientFile {
    device: Arc<Device>,
    nonblocking: bool,

    handle_ids: IdAllocator,
    handles: Mutex<HashMap<u32, Arc<BufferObject>>>,
    aggregator: Mutex<Box<[Option<Arc<BufferObject>>; AGGREGATOR_SLOTS]>>,

    queue: Mutex<Queue>,
    bell: Arc<Bell>,

    /// Ids of framebuffers created through this file and not yet explicitly destroyed.
    /// Torn down on drop, since framebuffers are the one mode object a client creates
    /// directly rather than the device setting up.
    created_framebuffers: Mutex<Vec<u32>>,
}

impl ClientFile {
    pub fn new(device: Arc<Device>, nonblocking: bool) -> Arc<Self> {
        Arc::new(Self {
            device,
            nonblocking,
            handle_ids: IdAllocator::new(),
            handles: Mutex::new(HashMap::new()),
            aggregator: Mutex::new(Box::new(std::array::from_fn(|_| None))),
            queue: Mutex::new(Queue { events: VecDeque::new(), status: StatusPage::default() }),
            bell: Arc::new(Bell::new()),
            created_framebuffers: Mutex::new(Vec::new()),
        })
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    // -- handle table / aggregator ------------------------------------------------

    fn aggregator_slot(bo: &Arc<BufferObject>) -> Result<usize> {
        let mapping = bo.mapping().ok_or(Error::Fatal("buffer object has no installed mapping"))?;
        let slot = (mapping >> 32) as usize;
        if slot >= AGGREGATOR_SLOTS {
            return Err(Error::Fatal("mapping slot out of range for the aggregator"));
        }
        Ok(slot)
    }

    /// Creates a fresh local handle for `bo` and publishes its mapping into this file's
    /// aggregator.
    pub fn create_handle(&self, bo: Arc<BufferObject>) -> Result<u32> {
        let slot = Self::aggregator_slot(&bo)?;
        self.aggregator.lock().unwrap()[slot] = Some(bo.clone());

        let handle = self.handle_ids.alloc();
        self.handles.lock().unwrap().insert(handle, bo);
        Ok(handle)
    }

    pub fn resolve_handle(&self, handle: u32) -> Option<Arc<BufferObject>> {
        self.handles.lock().unwrap().get(&handle).cloned()
    }

    /// Returns the buffer object this file's aggregator has installed at `slot`, i.e. the
    /// target of an `accessMemory` call against that slot.
    pub fn access_memory(&self, slot: usize) -> Result<Arc<BufferObject>> {
        self.aggregator
            .lock()
            .unwrap()
            .get(slot)
            .and_then(|entry| entry.clone())
            .ok_or(Error::NotFound("no buffer object installed at that aggregator slot"))
    }

    /// Reverse lookup of an existing handle for `bo`. Linear scan: handle tables are small
    /// and this is never on a hot path.
    pub fn get_handle(&self, bo: &Arc<BufferObject>) -> Option<u32> {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .find(|(_, v)| Arc::ptr_eq(v, bo))
            .map(|(handle, _)| *handle)
    }

    /// Publishes `handle`'s buffer object into the device-wide export map under `creds`.
    pub fn export_buffer_object(&self, handle: u32, creds: Credentials) -> Result<()> {
        let bo = self.resolve_handle(handle).ok_or(Error::NotFound("no such local handle"))?;
        self.device.register_buffer_object(bo, creds);
        Ok(())
    }

    /// Resolves `creds` to a buffer object, creating a local handle for it if this file
    /// doesn't already have one.
    pub fn import_buffer_object(&self, creds: Credentials) -> Result<(Arc<BufferObject>, u32)> {
        let bo = self.device.find_buffer_object(creds).ok_or(Error::NotFound("no buffer object for these credentials"))?;
        if let Some(handle) = self.get_handle(&bo) {
            return Ok((bo, handle));
        }
        let handle = self.create_handle(bo.clone())?;
        Ok((bo, handle))
    }

    // -- framebuffers ----------------------------------------------------------------

    /// Creates a framebuffer bound to `bo` and records this file as its owner, so it is
    /// torn down automatically if the client never destroys it explicitly.
    pub fn create_framebuffer(&self, width: u32, height: u32, pitch: u32, format: u32, bo: Arc<BufferObject>) -> Arc<FrameBuffer> {
        let fb = self.device.create_framebuffer(width, height, pitch, format, bo);
        self.created_framebuffers.lock().unwrap().push(fb.id());
        fb
    }

    /// Destroys a framebuffer this file created. Returns `false` if `id` was never owned by
    /// this file (already destroyed, or created elsewhere).
    pub fn destroy_framebuffer(&self, id: u32) -> bool {
        let mut owned = self.created_framebuffers.lock().unwrap();
        let Some(pos) = owned.iter().position(|&owned_id| owned_id == id) else {
            return false;
        };
        owned.remove(pos);
        drop(owned);
        self.device.destroy_framebuffer(id)
    }

    // -- events --------------------------------------------------------------------

    /// Appends `event` to the pending queue, advancing the sequence counter and marking the
    /// status page readable if the queue was empty, then wakes any `read`/`pollWait` waiters.
    pub fn post_event(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap();
        let was_empty = queue.events.is_empty();
        queue.events.push_back(event);
        if was_empty {
            queue.status.sequence += 1;
            queue.status.mask |= StatusPage::READABLE;
        }
        drop(queue);
        self.bell.notify_all();
    }

    /// Pops one event and serializes it as a flip-complete record into `buf`. Blocks until an
    /// event is available unless the file was opened non-blocking, in which case an empty
    /// queue yields [`Error::WouldBlock`] immediately.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < FlipCompleteRecord::RECORD_LEN {
            return Err(Error::Protocol("read buffer is shorter than one flip-complete record"));
        }

        if self.nonblocking && self.queue.lock().unwrap().events.is_empty() {
            return Err(Error::WouldBlock);
        }

        self.bell.wait_while(|| self.queue.lock().unwrap().events.is_empty());

        let mut queue = self.queue.lock().unwrap();
        let event = queue.events.pop_front().expect("bell woke with an empty queue");
        if queue.events.is_empty() {
            queue.status.mask &= !StatusPage::READABLE;
        }
        drop(queue);

        let record = FlipCompleteRecord::new(event.cookie, event.crtc_id, event.timestamp_ns);
        record.write_to(buf);
        Ok(FlipCompleteRecord::RECORD_LEN)
    }

    /// Suspends while the status page's sequence counter equals `sequence`, returning the
    /// current `(sequence, mask)` once it advances or `cancel` fires. Rejects a `sequence`
    /// ahead of the current one as a client programming error.
    pub fn poll_wait(&self, sequence: u64, cancel: &CancelToken) -> Result<(u64, u32)> {
        if sequence > self.queue.lock().unwrap().status.sequence {
            return Err(Error::InvalidArgument("pollWait sequence is ahead of the current sequence"));
        }

        cancel.bind(self.bell.clone());
        self.bell.wait_while(|| {
            let current = self.queue.lock().unwrap().status.sequence;
            current == sequence && !cancel.is_cancelled()
        });

        Ok(self.poll_status())
    }

    pub fn poll_status(&self) -> (u64, u32) {
        let status = self.queue.lock().unwrap().status;
        (status.sequence, status.mask)
    }

    /// `true` once [`ClientFile::poll_status`]'s mask has the readable bit set.
    pub fn is_readable(&self) -> bool {
        self.poll_status().1 & StatusPage::READABLE != 0
    }
}

impl Drop for ClientFile {
    fn drop(&mut self) {
        for id in self.created_framebuffers.lock().unwrap().drain(..) {
            self.device.destroy_framebuffer(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bo::TestMemoryProvider;
    use crate::device::Device;
    use std::thread;
    use std::time::Duration;

    fn new_bo(device: &Arc<Device>, size: u64) -> Arc<BufferObject> {
        let bo = BufferObject::new(size, Arc::new(TestMemoryProvider { handle: 1, offset: 0 }));
        device.install_mapping(&bo);
        bo
    }

    #[test]
    fn non_blocking_read_on_empty_queue_would_block() {
        let device = Device::new();
        let file = ClientFile::new(device, true);
        let mut buf = [0u8; FlipCompleteRecord::RECORD_LEN];
        assert!(matches!(file.read(&mut buf), Err(Error::WouldBlock)));
    }

    #[test]
    fn posting_then_reading_returns_the_event_and_clears_readable() {
        let device = Device::new();
        let file = ClientFile::new(device, true);

        file.post_event(Event { cookie: 42, crtc_id: 7, timestamp_ns: 1_000 });
        assert!(file.is_readable());

        let mut buf = [0u8; FlipCompleteRecord::RECORD_LEN];
        let written = file.read(&mut buf).unwrap();
        assert_eq!(written, FlipCompleteRecord::RECORD_LEN);
        assert!(!file.is_readable());
    }

    #[test]
    fn short_buffer_is_a_protocol_error() {
        let device = Device::new();
        let file = ClientFile::new(device, true);
        file.post_event(Event { cookie: 1, crtc_id: 1, timestamp_ns: 1 });

        let mut buf = [0u8; 4];
        assert!(matches!(file.read(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn export_then_import_resolves_to_the_same_handle() {
        let device = Device::new();
        let a = ClientFile::new(device.clone(), true);
        let b = ClientFile::new(device, true);

        let bo = new_bo(&a.device, 4096);
        let handle_a = a.create_handle(bo.clone()).unwrap();
        let creds: Credentials = [9u8; 16];
        a.export_buffer_object(handle_a, creds).unwrap();

        let (imported, handle_b1) = b.import_buffer_object(creds).unwrap();
        assert!(Arc::ptr_eq(&imported, &bo));

        let (_, handle_b2) = b.import_buffer_object(creds).unwrap();
        assert_eq!(handle_b1, handle_b2, "re-importing must return the same handle");
    }

    #[test]
    fn poll_wait_rejects_a_sequence_ahead_of_current() {
        let device = Device::new();
        let file = ClientFile::new(device, true);
        let cancel = CancelToken::new();
        assert!(matches!(file.poll_wait(1, &cancel), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn poll_wait_returns_once_cancelled() {
        let device = Device::new();
        let file = ClientFile::new(device, true);
        let cancel = CancelToken::new();
        cancel.cancel();

        let (sequence, mask) = file.poll_wait(0, &cancel).unwrap();
        assert_eq!(sequence, 0);
        assert_eq!(mask, 0);
    }

    #[test]
    fn cancelling_a_parked_poll_wait_wakes_it() {
        let device = Device::new();
        let file = ClientFile::new(device, true);
        let cancel = Arc::new(CancelToken::new());

        let file2 = file.clone();
        let cancel2 = cancel.clone();
        let handle = thread::spawn(move || file2.poll_wait(0, &cancel2));

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        let (sequence, mask) = handle.join().unwrap().unwrap();
        assert_eq!(sequence, 0);
        assert_eq!(mask, 0);
    }

    #[test]
    fn access_memory_returns_the_installed_mapping() {
        let device = Device::new();
        let file = ClientFile::new(device.clone(), true);
        let bo = new_bo(&device, 4096);
        let slot = (bo.mapping().unwrap() >> 32) as usize;
        file.create_handle(bo.clone()).unwrap();

        let fetched = file.access_memory(slot).unwrap();
        assert!(Arc::ptr_eq(&fetched, &bo));
    }

    #[test]
    fn access_memory_rejects_an_unpopulated_slot() {
        let device = Device::new();
        let file = ClientFile::new(device, true);
        assert!(matches!(file.access_memory(0), Err(Error::NotFound(_))));
    }

    #[test]
    fn creating_a_framebuffer_through_a_file_is_visible_on_the_device() {
        let device = Device::new();
        let file = ClientFile::new(device.clone(), true);
        let bo = new_bo(&device, 4096);

        let fb = file.create_framebuffer(1920, 1080, 7680, 0, bo);
        assert!(device.find_object(fb.id()).is_some());
    }

    #[test]
    fn explicit_destroy_removes_it_and_a_second_call_fails() {
        let device = Device::new();
        let file = ClientFile::new(device.clone(), true);
        let bo = new_bo(&device, 4096);
        let fb = file.create_framebuffer(1920, 1080, 7680, 0, bo);

        assert!(file.destroy_framebuffer(fb.id()));
        assert!(device.find_object(fb.id()).is_none());
        assert!(!file.destroy_framebuffer(fb.id()));
    }

    #[test]
    fn dropping_the_file_tears_down_framebuffers_it_still_owns() {
        let device = Device::new();
        let fb_id;
        {
            let file = ClientFile::new(device.clone(), true);
            let bo = new_bo(&device, 4096);
            let fb = file.create_framebuffer(1920, 1080, 7680, 0, bo);
            fb_id = fb.id();
        }
        assert!(device.find_object(fb_id).is_none());
    }
}
