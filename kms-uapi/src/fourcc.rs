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

//! DRM FourCC pixel-format constants, as little-endian packed ASCII (the cross-OS DRM
//! FourCC convention).

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const C8: u32 = fourcc(b'C', b'8', b' ', b' ');
pub const XRGB1555: u32 = fourcc(b'X', b'R', b'1', b'5');
pub const RGB565: u32 = fourcc(b'R', b'G', b'1', b'6');
pub const RGB888: u32 = fourcc(b'R', b'G', b'2', b'4');
pub const XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const XRGB2101010: u32 = fourcc(b'X', b'R', b'3', b'0');
pub const ARGB8888: u32 = fourcc(b'A', b'R', b'2', b'4');
