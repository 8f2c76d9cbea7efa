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

//! The object graph, property/assignment engine, atomic modeset state and per-client event
//! delivery for a DRM-style mode-setting server. Everything here is transport-agnostic: a
//! lane server (or a test harness) drives it through `Device` and `ClientFile`.

pub mod blob;
pub mod bo;
pub mod configuration;
pub mod device;
pub mod error;
pub mod file;
pub mod id;
pub mod lane;
pub mod modes;
pub mod object;
pub mod property;
pub mod state;
pub mod sync;

pub use device::Device;
pub use error::{Error, Result};
pub use file::ClientFile;
pub use lane::LaneServer;
