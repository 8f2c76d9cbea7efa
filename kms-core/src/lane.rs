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

//! The lane server: turns [`Request`]s into open [`ClientFile`] sessions and routes the
//! per-file operations (`read`, `accessMemory`, framebuffer create/destroy, `ioctl`,
//! `pollWait`, `pollStatus`) against whichever session they name. A transport sits in front
//! of this and is out of scope here, the way the rest of this crate stays transport-agnostic;
//! this module only knows about lane ids and sessions, not sockets or fds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kms_uapi::{Credentials, DevOpenResponse, OpenCaps, OpenFlags, Request, WireError};

use crate::bo::BufferObject;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::file::ClientFile;
use crate::id::IdAllocator;
use crate::object::FrameBuffer;
use crate::sync::CancelToken;

struct Session {
    file: Arc<ClientFile>,
    credentials: Option<Credentials>,
}

/// Owns every open session against one [`Device`], keyed by the sub-lane id handed back from
/// `DEV_OPEN`.
pub struct LaneServer {
    device: Arc<Device>,
    lane_ids: IdAllocator,
    sessions: Mutex<HashMap<u32, Session>>,
}

impl LaneServer {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device, lane_ids: IdAllocator::new(), sessions: Mutex::new(HashMap::new()) }
    }

    fn session_file(&self, lane_id: u32) -> Result<Arc<ClientFile>> {
        self.sessions
            .lock()
            .unwrap()
            .get(&lane_id)
            .map(|session| session.file.clone())
            .ok_or(Error::NotFound("no open lane with that id"))
    }

    /// Handles `DEV_OPEN`: mints a fresh sub-lane id, opens a [`ClientFile`] against it with
    /// the requested flags, and makes its (initially empty) status page immediately
    /// queryable via [`LaneServer::dispatch_file_op`]. Rejects any flag bit outside
    /// [`OpenFlags`].
    pub fn dev_open(&self, flags: u32) -> (u32, DevOpenResponse) {
        let Some(open_flags) = OpenFlags::from_bits(flags) else {
            return (0, DevOpenResponse { error: WireError::InvalidArgument, caps: 0 });
        };

        let nonblocking = open_flags.contains(OpenFlags::NONBLOCK);
        let file = ClientFile::new(self.device.clone(), nonblocking);
        let lane_id = self.lane_ids.alloc();
        self.sessions.lock().unwrap().insert(lane_id, Session { file, credentials: None });

        log::debug!("lane: opened sub-lane {lane_id} (nonblocking={nonblocking})");
        let caps = (OpenCaps::STATUS_PAGE | OpenCaps::POSIX_LANE).bits();
        (lane_id, DevOpenResponse { error: WireError::Ok, caps })
    }

    /// Handles `OPEN_FD_LANE`: records the credentials a real transport would have captured
    /// off the POSIX lane fd's ancillary data (`SCM_CREDENTIALS` and friends), keyed by the
    /// session they arrived alongside.
    pub fn open_fd_lane(&self, lane_id: u32, credentials: Credentials) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&lane_id).ok_or(Error::NotFound("no open lane with that id"))?;
        session.credentials = Some(credentials);
        Ok(())
    }

    pub fn credentials(&self, lane_id: u32) -> Option<Credentials> {
        self.sessions.lock().unwrap().get(&lane_id).and_then(|session| session.credentials)
    }

    /// Parses and routes one [`Request`]. `lane_id`/`credentials` carry what a transport
    /// delivers out of band: the lane a request arrived on, and any ancillary credentials
    /// riding alongside it. `DEV_OPEN` ignores both and always mints a new lane.
    pub fn dispatch(&self, lane_id: Option<u32>, credentials: Option<Credentials>, request: Request) -> (Option<u32>, DevOpenResponse) {
        match request {
            Request::DevOpen { flags } => {
                let (new_lane, response) = self.dev_open(flags);
                (Some(new_lane), response)
            }
            Request::OpenFdLane => {
                let result = match (lane_id, credentials) {
                    (Some(lane_id), Some(credentials)) => self.open_fd_lane(lane_id, credentials),
                    _ => Err(Error::Protocol("OPEN_FD_LANE requires an already-open lane and credentials")),
                };
                let error = result.err().map(WireError::from).unwrap_or(WireError::Ok);
                (lane_id, DevOpenResponse { error, caps: 0 })
            }
        }
    }

    /// Closes a session. Dropping its [`ClientFile`] releases any framebuffers it still
    /// owned. Returns `false` if `lane_id` wasn't open.
    pub fn close(&self, lane_id: u32) -> bool {
        self.sessions.lock().unwrap().remove(&lane_id).is_some()
    }

    /// Routes one file-level operation against an already-open lane.
    pub fn dispatch_file_op(&self, lane_id: u32, op: FileOp<'_>) -> Result<FileOpResult> {
        let file = self.session_file(lane_id)?;
        match op {
            FileOp::Read(buf) => file.read(buf).map(FileOpResult::BytesRead),
            FileOp::AccessMemory(slot) => file.access_memory(slot).map(FileOpResult::Memory),
            FileOp::CreateFramebuffer { width, height, pitch, format, handle } => {
                let bo = file.resolve_handle(handle).ok_or(Error::NotFound("no such local buffer object handle"))?;
                Ok(FileOpResult::Framebuffer(file.create_framebuffer(width, height, pitch, format, bo)))
            }
            FileOp::DestroyFramebuffer(id) => Ok(FileOpResult::Destroyed(file.destroy_framebuffer(id))),
            FileOp::Ioctl(command, arg) => ioctl(command, arg).map(FileOpResult::Ioctl),
            FileOp::PollWait(sequence, cancel) => file.poll_wait(sequence, cancel).map(|(sequence, mask)| FileOpResult::Status(sequence, mask)),
            FileOp::PollStatus => {
                let (sequence, mask) = file.poll_status();
                Ok(FileOpResult::Status(sequence, mask))
            }
        }
    }
}

/// Requests a file-ops table can route once a lane is open. `read`/`accessMemory`/framebuffer
/// create-destroy/`pollWait`/`pollStatus` each get their own variant; anything else falls
/// through to [`FileOp::Ioctl`].
pub enum FileOp<'a> {
    Read(&'a mut [u8]),
    AccessMemory(usize),
    CreateFramebuffer { width: u32, height: u32, pitch: u32, format: u32, handle: u32 },
    DestroyFramebuffer(u32),
    Ioctl(u32, u64),
    PollWait(u64, &'a CancelToken),
    PollStatus,
}

pub enum FileOpResult {
    BytesRead(usize),
    Memory(Arc<BufferObject>),
    Framebuffer(Arc<FrameBuffer>),
    Destroyed(bool),
    Ioctl(u64),
    Status(u64, u32),
}

/// Catch-all for commands the table doesn't model as a dedicated variant. Every unknown
/// command is rejected rather than silently accepted.
fn ioctl(command: u32, arg: u64) -> Result<u64> {
    log::warn!("lane: unknown ioctl command {command:#x} (arg={arg:#x})");
    Err(Error::Protocol("unknown ioctl command"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bo::TestMemoryProvider;

    fn new_bo(device: &Arc<Device>, size: u64) -> Arc<BufferObject> {
        let bo = BufferObject::new(size, Arc::new(TestMemoryProvider { handle: 1, offset: 0 }));
        device.install_mapping(&bo);
        bo
    }

    #[test]
    fn dev_open_rejects_flag_bits_outside_open_flags() {
        let lane = LaneServer::new(Device::new());
        let (lane_id, response) = lane.dev_open(0xFFFF_FFFF);
        assert_eq!(lane_id, 0);
        assert_eq!(response.error, WireError::InvalidArgument);
    }

    #[test]
    fn dev_open_opens_a_working_session() {
        let lane = LaneServer::new(Device::new());
        let (lane_id, response) = lane.dev_open(OpenFlags::NONBLOCK.bits());
        assert_eq!(response.error, WireError::Ok);
        assert_ne!(lane_id, 0);

        let result = lane.dispatch_file_op(lane_id, FileOp::PollStatus).unwrap();
        assert!(matches!(result, FileOpResult::Status(0, 0)));
    }

    #[test]
    fn open_fd_lane_rejects_an_unopened_lane() {
        let lane = LaneServer::new(Device::new());
        let creds: Credentials = [1u8; 16];
        assert!(matches!(lane.open_fd_lane(99, creds), Err(Error::NotFound(_))));
    }

    #[test]
    fn dispatch_routes_dev_open_then_open_fd_lane() {
        let lane = LaneServer::new(Device::new());

        let (new_lane, response) = lane.dispatch(None, None, Request::DevOpen { flags: 0 });
        assert_eq!(response.error, WireError::Ok);
        let lane_id = new_lane.expect("DEV_OPEN always mints a lane");

        let creds: Credentials = [7u8; 16];
        let (echoed_lane, response) = lane.dispatch(Some(lane_id), Some(creds), Request::OpenFdLane);
        assert_eq!(echoed_lane, Some(lane_id));
        assert_eq!(response.error, WireError::Ok);
        assert_eq!(lane.credentials(lane_id), Some(creds));
    }

    #[test]
    fn file_ops_table_routes_read_and_access_memory() {
        let device = Device::new();
        let lane = LaneServer::new(device.clone());
        let (lane_id, _) = lane.dev_open(0);

        let file = lane.session_file(lane_id).unwrap();
        let bo = new_bo(&device, 4096);
        let slot = (bo.mapping().unwrap() >> 32) as usize;
        let handle = file.create_handle(bo.clone()).unwrap();

        match lane.dispatch_file_op(lane_id, FileOp::AccessMemory(slot)).unwrap() {
            FileOpResult::Memory(memory) => assert!(Arc::ptr_eq(&memory, &bo)),
            _ => panic!("expected Memory"),
        }

        file.post_event(crate::file::Event { cookie: 1, crtc_id: 0, timestamp_ns: 0 });
        let mut buf = [0u8; kms_uapi::FlipCompleteRecord::RECORD_LEN];
        match lane.dispatch_file_op(lane_id, FileOp::Read(&mut buf)).unwrap() {
            FileOpResult::BytesRead(n) => assert_eq!(n, kms_uapi::FlipCompleteRecord::RECORD_LEN),
            _ => panic!("expected BytesRead"),
        }

        let _ = handle;
    }

    #[test]
    fn file_ops_table_creates_and_destroys_a_framebuffer() {
        let device = Device::new();
        let lane = LaneServer::new(device.clone());
        let (lane_id, _) = lane.dev_open(0);

        let file = lane.session_file(lane_id).unwrap();
        let bo = new_bo(&device, 4096);
        let handle = file.create_handle(bo).unwrap();

        let fb_id = match lane.dispatch_file_op(lane_id, FileOp::CreateFramebuffer { width: 1920, height: 1080, pitch: 7680, format: 0, handle }).unwrap() {
            FileOpResult::Framebuffer(fb) => fb.id(),
            _ => panic!("expected Framebuffer"),
        };
        assert!(device.find_object(fb_id).is_some());

        match lane.dispatch_file_op(lane_id, FileOp::DestroyFramebuffer(fb_id)).unwrap() {
            FileOpResult::Destroyed(true) => {}
            _ => panic!("expected a successful destroy"),
        }
        assert!(device.find_object(fb_id).is_none());
    }

    #[test]
    fn unknown_ioctl_commands_are_rejected() {
        let lane = LaneServer::new(Device::new());
        let (lane_id, _) = lane.dev_open(0);
        assert!(matches!(lane.dispatch_file_op(lane_id, FileOp::Ioctl(0xDEAD_BEEF, 0)), Err(Error::Protocol(_))));
    }

    #[test]
    fn closing_a_lane_drops_its_session() {
        let lane = LaneServer::new(Device::new());
        let (lane_id, _) = lane.dev_open(0);
        assert!(lane.close(lane_id));
        assert!(!lane.close(lane_id), "closing twice must return false");
        assert!(matches!(lane.dispatch_file_op(lane_id, FileOp::PollStatus), Err(Error::NotFound(_))));
    }
}
