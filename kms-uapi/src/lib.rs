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

//! Wire-level types shared between the lane server and its clients: request/response
//! framing, the flip-complete event record, the status page layout, and the DRM FourCC
//! constants. Nothing in this crate touches the mode-setting object model itself.

use serde::{Deserialize, Serialize};

pub mod fourcc;

bitflags::bitflags! {
    /// Flags accepted by `DEV_OPEN`. Any bit outside this set is rejected.
    #[derive(Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        const NONBLOCK = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Capability bits advertised in a `DEV_OPEN` response.
    #[derive(Serialize, Deserialize)]
    pub struct OpenCaps: u32 {
        const STATUS_PAGE = 1 << 0;
        const POSIX_LANE = 1 << 1;
    }
}

/// Numeric error codes carried in a response's `error` field.
///
/// Mirrors [`kms_core::Error`](../kms_core/enum.Error.html) but kept independent so this
/// crate never depends on the core object model.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum WireError {
    Ok = 0,
    InvalidArgument = 1,
    NotFound = 2,
    WouldBlock = 3,
    Protocol = 4,
    Fatal = 5,
}

/// Requests a client may send over a lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Open a fresh per-client session on a new sub-lane.
    DevOpen { flags: u32 },
    /// Hand over one POSIX lane descriptor for later credential introspection.
    OpenFdLane,
}

/// Response to a [`Request::DevOpen`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevOpenResponse {
    pub error: WireError,
    pub caps: u32,
}

pub const FLIP_COMPLETE: u32 = 0x01;

/// On-the-wire layout of a page-flip completion record, as returned by `read`.
///
/// | field      | bytes | meaning                     |
/// |------------|-------|------------------------------|
/// | `kind`     | 4     | always [`FLIP_COMPLETE`]     |
/// | `length`   | 4     | `RECORD_LEN`                 |
/// | `user_data`| 8     | caller-supplied cookie       |
/// | `tv_sec`   | 4     | seconds component            |
/// | `tv_usec`  | 4     | microseconds component       |
/// | `crtc_id`  | 4     | target CRTC object id        |
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct FlipCompleteRecord {
    pub kind: u32,
    pub length: u32,
    pub user_data: u64,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub crtc_id: u32,
}

impl FlipCompleteRecord {
    pub const RECORD_LEN: usize = 4 + 4 + 8 + 4 + 4 + 4;

    pub fn new(user_data: u64, crtc_id: u32, timestamp_ns: u64) -> Self {
        Self {
            kind: FLIP_COMPLETE,
            length: Self::RECORD_LEN as u32,
            user_data,
            tv_sec: (timestamp_ns / 1_000_000_000) as u32,
            tv_usec: ((timestamp_ns % 1_000_000_000) / 1_000) as u32,
            crtc_id,
        }
    }

    /// Serializes the record into `buf` in the layout documented above. `buf` must be at
    /// least [`Self::RECORD_LEN`] bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::RECORD_LEN, "buffer too small for record");

        buf[0..4].copy_from_slice(&self.kind.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.length.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.user_data.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.tv_sec.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.tv_usec.to_ne_bytes());
        buf[24..28].copy_from_slice(&self.crtc_id.to_ne_bytes());
    }
}

/// Shared-memory layout polled by clients via `pollStatus`/`pollWait`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[repr(C)]
pub struct StatusPage {
    pub sequence: u64,
    pub mask: u32,
}

impl StatusPage {
    /// Single bit in [`StatusPage::mask`] meaning "the event queue is non-empty".
    pub const READABLE: u32 = 1 << 0;
}

/// Fixed-size mode-timing record; the payload of a `MODE_ID` blob.
#[derive(Debug, Copy, Clone, Eq, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ModeInfo {
    pub clock_khz: u32,

    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,

    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,

    pub flags: u32,
    pub mode_type: u32,
    pub name: [u8; 32],
}

impl ModeInfo {
    pub const SIZE: usize = core::mem::size_of::<ModeInfo>();

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Reinterprets `data` as a [`ModeInfo`], failing if its length doesn't match
    /// [`Self::SIZE`] exactly. `data` need not be aligned.
    pub fn from_bytes(data: &[u8]) -> Option<ModeInfo> {
        if data.len() != Self::SIZE {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(data))
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        bytemuck::cast(*self)
    }
}

/// Opaque 16-byte credential token used to key the buffer-object export map.
pub type Credentials = [u8; 16];

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mode() -> ModeInfo {
        let mut name = [0u8; 32];
        name[..4].copy_from_slice(b"1080");
        ModeInfo {
            clock_khz: 148_500,
            hdisplay: 1920,
            hsync_start: 2008,
            hsync_end: 2052,
            htotal: 2200,
            hskew: 0,
            vdisplay: 1080,
            vsync_start: 1084,
            vsync_end: 1089,
            vtotal: 1125,
            vscan: 0,
            flags: 0,
            mode_type: 1,
            name,
        }
    }

    #[test]
    fn mode_info_roundtrips_through_bytes() {
        let mode = sample_mode();
        let decoded = ModeInfo::from_bytes(&mode.to_bytes()).expect("well-sized buffer must decode");
        assert_eq!(decoded, mode);
        assert_eq!(decoded.name_str(), "1080");
    }

    #[test]
    fn mode_info_rejects_wrong_size_buffers() {
        assert!(ModeInfo::from_bytes(&[0u8; ModeInfo::SIZE - 1]).is_none());
        assert!(ModeInfo::from_bytes(&[0u8; ModeInfo::SIZE + 1]).is_none());
    }

    #[test]
    fn flip_complete_record_splits_timestamp_into_sec_and_usec() {
        let record = FlipCompleteRecord::new(7, 3, 1_500_002_000);
        assert_eq!(record.tv_sec, 1);
        assert_eq!(record.tv_usec, 500_002);
        assert_eq!(record.kind, FLIP_COMPLETE);
        assert_eq!(record.length as usize, FlipCompleteRecord::RECORD_LEN);

        let mut buf = [0u8; FlipCompleteRecord::RECORD_LEN];
        record.write_to(&mut buf);
        assert_eq!(u32::from_ne_bytes(buf[0..4].try_into().unwrap()), FLIP_COMPLETE);
        assert_eq!(u64::from_ne_bytes(buf[8..16].try_into().unwrap()), 7);
        assert_eq!(u32::from_ne_bytes(buf[24..28].try_into().unwrap()), 3);
    }

    #[test]
    #[should_panic(expected = "buffer too small")]
    fn flip_complete_record_panics_on_short_buffer() {
        let record = FlipCompleteRecord::new(0, 0, 0);
        let mut buf = [0u8; 4];
        record.write_to(&mut buf);
    }

    #[test]
    fn status_page_readable_bit_is_the_low_bit() {
        assert_eq!(StatusPage::READABLE, 1);
    }
}
