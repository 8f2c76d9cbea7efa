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

//! Mode-catalog utilities: the built-in DMT timing table, legacy bpp/depth to FourCC
//! conversion, and per-format byte-per-pixel lookup.

use kms_uapi::{fourcc, ModeInfo};

use crate::error::{Error, Result};

/// Returns `true` when `data` decodes to a [`ModeInfo`] of the right size whose timing
/// fields satisfy `hdisplay <= hsync_start <= hsync_end <= htotal` (and the analogous
/// vertical chain).
pub fn validate_mode_blob(data: &[u8]) -> bool {
    let Some(mode) = ModeInfo::from_bytes(data) else { return false };
    mode.hdisplay <= mode.hsync_start
        && mode.hsync_start <= mode.hsync_end
        && mode.hsync_end <= mode.htotal
        && mode.vdisplay <= mode.vsync_start
        && mode.vsync_start <= mode.vsync_end
        && mode.vsync_end <= mode.vtotal
}

/// Converts a legacy `(bpp, depth)` pair to its FourCC. Total over the documented pairs;
/// any other combination is a client programming error, not recoverable input, so it
/// returns [`Error::InvalidArgument`] rather than `None`.
pub fn convert_legacy_format(bpp: u32, depth: u32) -> Result<u32> {
    match (bpp, depth) {
        (8, 8) => Ok(fourcc::C8),
        (16, 15) => Ok(fourcc::XRGB1555),
        (16, 16) => Ok(fourcc::RGB565),
        (24, 24) => Ok(fourcc::RGB888),
        (32, 24) => Ok(fourcc::XRGB8888),
        (32, 30) => Ok(fourcc::XRGB2101010),
        (32, 32) => Ok(fourcc::ARGB8888),
        _ => Err(Error::InvalidArgument("unsupported (bpp, depth) pair for legacy format conversion")),
    }
}

/// Bytes per pixel for one of the FourCCs [`convert_legacy_format`] can produce.
pub fn get_format_info(format: u32) -> Result<u32> {
    match format {
        fourcc::C8 => Ok(1),
        fourcc::XRGB1555 | fourcc::RGB565 => Ok(2),
        fourcc::RGB888 => Ok(3),
        fourcc::XRGB8888 | fourcc::XRGB2101010 | fourcc::ARGB8888 => Ok(4),
        _ => Err(Error::InvalidArgument("unknown fourcc")),
    }
}

fn name(bytes: &[u8]) -> [u8; 32] {
    let mut name = [0u8; 32];
    let len = bytes.len().min(32);
    name[..len].copy_from_slice(&bytes[..len]);
    name
}

fn mode(
    name_str: &'static str,
    mode_type: u32,
    clock_khz: u32,
    hdisplay: u16,
    hsync_start: u16,
    hsync_end: u16,
    htotal: u16,
    vdisplay: u16,
    vsync_start: u16,
    vsync_end: u16,
    vtotal: u16,
    flags: u32,
) -> ModeInfo {
    ModeInfo {
        clock_khz,
        hdisplay,
        hsync_start,
        hsync_end,
        htotal,
        hskew: 0,
        vdisplay,
        vsync_start,
        vsync_end,
        vtotal,
        vscan: 0,
        flags,
        mode_type,
        name: name(name_str.as_bytes()),
    }
}

/// One entry per VESA DMT id. This is a deliberately small, representative subset of the
/// full industry table: enough common resolutions to exercise the filtering contract in
/// [`add_dmt_modes`] without vendoring the entire multi-hundred-entry table.
fn dmt_table() -> &'static [ModeInfo] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<Vec<ModeInfo>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            vec![
                mode("640x480", 1, 25175, 640, 656, 752, 800, 480, 490, 492, 525, 0),
                mode("800x600", 1, 40000, 800, 840, 968, 1056, 600, 601, 605, 628, 0),
                mode("1024x768", 1, 65000, 1024, 1048, 1184, 1344, 768, 771, 777, 806, 0),
                mode("1280x720", 1, 74250, 1280, 1390, 1430, 1650, 720, 725, 730, 750, 0),
                mode("1280x1024", 1, 108000, 1280, 1328, 1440, 1688, 1024, 1025, 1028, 1066, 0),
                mode("1920x1080", 1, 148500, 1920, 2008, 2052, 2200, 1080, 1084, 1089, 1125, 0),
                mode("2560x1440", 1, 241500, 2560, 2608, 2640, 2720, 1440, 1443, 1448, 1481, 0),
                mode("3840x2160", 1, 594000, 3840, 4016, 4104, 4400, 2160, 2168, 2178, 2250, 0),
            ]
        })
        .as_slice()
}

/// Appends every DMT mode with `hdisplay <= max_w && vdisplay <= max_h` to `sink`, in
/// table order. Passing `u16::MAX` for both bounds yields the full table.
pub fn add_dmt_modes(sink: &mut Vec<ModeInfo>, max_w: u16, max_h: u16) {
    sink.extend(dmt_table().iter().filter(|m| m.hdisplay <= max_w && m.vdisplay <= max_h).copied());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_format_roundtrips_bpp() {
        for (bpp, depth, expected_bytes) in [
            (8u32, 8u32, 1u32),
            (16, 15, 2),
            (16, 16, 2),
            (24, 24, 3),
            (32, 24, 4),
            (32, 30, 4),
            (32, 32, 4),
        ] {
            let format = convert_legacy_format(bpp, depth).unwrap();
            assert_eq!(get_format_info(format).unwrap(), expected_bytes);
        }
    }

    #[test]
    fn unsupported_bpp_depth_pair_is_rejected() {
        assert!(convert_legacy_format(17, 3).is_err());
    }

    #[test]
    fn add_dmt_modes_filters_by_bound() {
        let mut sink = Vec::new();
        add_dmt_modes(&mut sink, 1024, 768);
        assert!(sink.iter().all(|m| m.hdisplay <= 1024 && m.vdisplay <= 768));
        assert!(sink.iter().any(|m| m.hdisplay == 1024 && m.vdisplay == 768));
        assert!(!sink.iter().any(|m| m.hdisplay == 1920));
    }

    #[test]
    fn unbounded_query_yields_the_full_table() {
        let mut sink = Vec::new();
        add_dmt_modes(&mut sink, u16::MAX, u16::MAX);
        assert_eq!(sink.len(), dmt_table().len());
    }

    #[test]
    fn mode_blob_ordering_invariant() {
        let mut bad = dmt_table()[5]; // 1920x1080
        bad.hsync_start = bad.hdisplay - 10;
        assert!(!validate_mode_blob(&bad.to_bytes()));

        let good = dmt_table()[5];
        assert!(validate_mode_blob(&good.to_bytes()));
    }

    #[test]
    fn wrong_size_blob_is_rejected() {
        assert!(!validate_mode_blob(&[0u8; 4]));
    }
}
