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

//! Mutable per-object sub-states and the copy-on-write [`AtomicState`] transaction that
//! forks, mutates and (on commit) publishes them.
//!
//! Back-references from a sub-state to its owning object are pure lookup relations, not
//! ownership: each sub-state stores the owner's id and nothing else, resolved later
//! through [`Device::find_object`](crate::device::Device::find_object). This sidesteps the
//! `Plane <-> FrameBuffer`/`Plane <-> Crtc` cyclic-ownership risk entirely: a sub-state may
//! point at an `Arc<FrameBuffer>` or `Arc<Crtc>`, but nothing points back from those at a
//! sub-state.
use std::collections::HashMap;
use std::sync::Arc;

use crate::blob::Blob;

/// A rectangle in 16.16 fixed point, as used by `SRC_{X,Y,W,H}`. The fractional part of
/// the width/height is truncated on write; position keeps the full fixed-point value.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SrcRect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// A rectangle in integer pixels, as used by `CRTC_{X,Y,W,H}`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DstRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum Dpms {
    On = 0,
    Standby = 1,
    Suspend = 2,
    Off = 3,
}

impl Dpms {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Dpms::On),
            1 => Some(Dpms::Standby),
            2 => Some(Dpms::Suspend),
            3 => Some(Dpms::Off),
            _ => None,
        }
    }
}

/// Mutable state of a CRTC: its mode and whether it's driving output at all.
#[derive(Clone)]
pub struct CrtcState {
    owner: u32,
    pub active: bool,
    pub mode: Option<Arc<Blob>>,
    /// Set whenever `mode` is (re)written in this or the forking transaction.
    pub mode_changed: bool,
}

impl CrtcState {
    pub fn new(owner: u32) -> Self {
        Self { owner, active: false, mode: None, mode_changed: false }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }
}

/// Mutable state of a plane: its crtc/framebuffer binding and the src/dst rectangles.
#[derive(Clone)]
pub struct PlaneState {
    owner: u32,
    pub crtc: Option<u32>,
    pub fb: Option<u32>,
    pub src: SrcRect,
    pub dst: DstRect,
}

impl PlaneState {
    pub fn new(owner: u32) -> Self {
        Self { owner, crtc: None, fb: None, src: SrcRect::default(), dst: DstRect::default() }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }
}

/// Mutable state of a connector: power level and crtc routing.
#[derive(Clone)]
pub struct ConnectorState {
    owner: u32,
    pub dpms: Dpms,
    pub crtc: Option<u32>,
}

impl ConnectorState {
    pub fn new(owner: u32) -> Self {
        Self { owner, dpms: Dpms::Off, crtc: None }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }
}

/// A transactional, copy-on-write snapshot of touched per-object sub-states.
///
/// `crtc`/`plane`/`connector` fork from the object's live, committed state on first
/// touch and hand back the same forked instance on every later call within the same
/// transaction (by id). Nothing is visible to other readers until [`Device::commit`]
/// installs it.
///
/// [`Device::commit`]: crate::device::Device::commit
pub struct AtomicState {
    crtcs: HashMap<u32, CrtcState>,
    planes: HashMap<u32, PlaneState>,
    connectors: HashMap<u32, ConnectorState>,
}

impl AtomicState {
    pub fn new() -> Self {
        Self { crtcs: HashMap::new(), planes: HashMap::new(), connectors: HashMap::new() }
    }

    pub fn crtc(&mut self, crtc: &crate::object::Crtc) -> &mut CrtcState {
        self.crtcs.entry(crtc.id()).or_insert_with(|| (*crtc.state()).clone())
    }

    pub fn plane(&mut self, plane: &crate::object::Plane) -> &mut PlaneState {
        self.planes.entry(plane.id()).or_insert_with(|| (*plane.state()).clone())
    }

    pub fn connector(&mut self, connector: &crate::object::Connector) -> &mut ConnectorState {
        self.connectors.entry(connector.id()).or_insert_with(|| (*connector.state()).clone())
    }

    pub fn touched_crtcs(&self) -> impl Iterator<Item = (&u32, &CrtcState)> {
        self.crtcs.iter()
    }

    pub fn touched_planes(&self) -> impl Iterator<Item = (&u32, &PlaneState)> {
        self.planes.iter()
    }

    pub fn touched_connectors(&self) -> impl Iterator<Item = (&u32, &ConnectorState)> {
        self.connectors.iter()
    }

    /// Consumes the transaction, handing back its touched sub-states for publishing.
    pub(crate) fn into_parts(
        self,
    ) -> (HashMap<u32, CrtcState>, HashMap<u32, PlaneState>, HashMap<u32, ConnectorState>) {
        (self.crtcs, self.planes, self.connectors)
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Crtc;

    #[test]
    fn touching_the_same_crtc_twice_returns_the_identical_fork() {
        let crtc = Crtc::new(1, 0);
        let mut state = AtomicState::new();

        state.crtc(&crtc).active = true;
        assert!(state.crtc(&crtc).active, "second touch must see the first touch's write");
        assert_eq!(state.touched_crtcs().count(), 1);
    }
}
