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

//! The mode-object graph: connectors, CRTCs, encoders, planes and framebuffers.
//!
//! The upstream driver this is modeled on downcasts from a common polymorphic base. Here
//! the base is a closed, tagged variant over the five kinds instead: every [`ModeObject`]
//! carries a stable `{id, type}` header, and `as_*` accessors are total functions
//! returning `Option` rather than fallible downcasts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kms_uapi::ModeInfo;

use crate::bo::BufferObject;
use crate::id::IdAllocator;
use crate::state::{ConnectorState, CrtcState, PlaneState};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ObjectType {
    Crtc,
    Encoder,
    Connector,
    Plane,
    FrameBuffer,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlaneType {
    Primary,
    Overlay,
    Cursor,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
    Unknown,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SubpixelOrder {
    Unknown,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
    None,
}

/// A closed variant over every kind of mode object. Cloning is cheap: it clones the
/// inner `Arc`, never the object itself.
#[derive(Clone)]
pub enum ModeObject {
    Crtc(Arc<Crtc>),
    Encoder(Arc<Encoder>),
    Connector(Arc<Connector>),
    Plane(Arc<Plane>),
    FrameBuffer(Arc<FrameBuffer>),
}

impl ModeObject {
    pub fn id(&self) -> u32 {
        match self {
            ModeObject::Crtc(o) => o.id,
            ModeObject::Encoder(o) => o.id,
            ModeObject::Connector(o) => o.id,
            ModeObject::Plane(o) => o.id,
            ModeObject::FrameBuffer(o) => o.id,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            ModeObject::Crtc(_) => ObjectType::Crtc,
            ModeObject::Encoder(_) => ObjectType::Encoder,
            ModeObject::Connector(_) => ObjectType::Connector,
            ModeObject::Plane(_) => ObjectType::Plane,
            ModeObject::FrameBuffer(_) => ObjectType::FrameBuffer,
        }
    }

    pub fn as_crtc(&self) -> Option<Arc<Crtc>> {
        match self {
            ModeObject::Crtc(o) => Some(o.clone()),
            _ => None,
        }
    }

    pub fn as_encoder(&self) -> Option<Arc<Encoder>> {
        match self {
            ModeObject::Encoder(o) => Some(o.clone()),
            _ => None,
        }
    }

    pub fn as_connector(&self) -> Option<Arc<Connector>> {
        match self {
            ModeObject::Connector(o) => Some(o.clone()),
            _ => None,
        }
    }

    pub fn as_plane(&self) -> Option<Arc<Plane>> {
        match self {
            ModeObject::Plane(o) => Some(o.clone()),
            _ => None,
        }
    }

    pub fn as_framebuffer(&self) -> Option<Arc<FrameBuffer>> {
        match self {
            ModeObject::FrameBuffer(o) => Some(o.clone()),
            _ => None,
        }
    }
}

/// Display controller: owns a scanout mode and an active flag.
pub struct Crtc {
    id: u32,
    /// Dense index within the device, preserved by registration order.
    index: u32,
    state: Mutex<Arc<CrtcState>>,
}

impl Crtc {
    pub fn new(id: u32, index: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            index,
            state: Mutex::new(Arc::new(CrtcState::new(id))),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The CRTC's current, committed state.
    pub fn state(&self) -> Arc<CrtcState> {
        self.state.lock().unwrap().clone()
    }

    /// Publishes `state` as current. Called only by a completed [`Configuration`] commit.
    ///
    /// [`Configuration`]: crate::configuration::Configuration
    pub fn set_state(&self, state: Arc<CrtcState>) {
        *self.state.lock().unwrap() = state;
    }
}

/// Converts raw scanout data from a CRTC into a signal a connector can carry.
pub struct Encoder {
    id: u32,
    index: u32,
    encoder_type: u32,
    current_crtc: Mutex<Option<u32>>,
    possible_crtcs: Vec<u32>,
    possible_clones: Vec<u32>,
}

impl Encoder {
    pub fn new(
        id: u32,
        index: u32,
        encoder_type: u32,
        possible_crtcs: Vec<u32>,
        possible_clones: Vec<u32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            index,
            encoder_type,
            current_crtc: Mutex::new(None),
            possible_crtcs,
            possible_clones,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn encoder_type(&self) -> u32 {
        self.encoder_type
    }

    pub fn current_crtc(&self) -> Option<u32> {
        *self.current_crtc.lock().unwrap()
    }

    pub fn set_current_crtc(&self, crtc: Option<u32>) {
        *self.current_crtc.lock().unwrap() = crtc;
    }

    pub fn possible_crtcs(&self) -> &[u32] {
        &self.possible_crtcs
    }

    pub fn possible_clones(&self) -> &[u32] {
        &self.possible_clones
    }
}

/// Outputs the encoded signal to an external display; detects connection and carries
/// the list of modes the attached display supports.
pub struct Connector {
    id: u32,
    connector_type: u32,
    phys_width_mm: u32,
    phys_height_mm: u32,
    subpixel: SubpixelOrder,
    modes: Mutex<Vec<ModeInfo>>,
    status: Mutex<ConnectorStatus>,
    current_encoder: Mutex<Option<u32>>,
    possible_encoders: Vec<u32>,
    state: Mutex<Arc<ConnectorState>>,
}

impl Connector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        connector_type: u32,
        phys_width_mm: u32,
        phys_height_mm: u32,
        subpixel: SubpixelOrder,
        modes: Vec<ModeInfo>,
        status: ConnectorStatus,
        possible_encoders: Vec<u32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            connector_type,
            phys_width_mm,
            phys_height_mm,
            subpixel,
            modes: Mutex::new(modes),
            status: Mutex::new(status),
            current_encoder: Mutex::new(None),
            possible_encoders,
            state: Mutex::new(Arc::new(ConnectorState::new(id))),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn connector_type(&self) -> u32 {
        self.connector_type
    }

    pub fn physical_size_mm(&self) -> (u32, u32) {
        (self.phys_width_mm, self.phys_height_mm)
    }

    pub fn subpixel(&self) -> SubpixelOrder {
        self.subpixel
    }

    pub fn mode_list(&self) -> Vec<ModeInfo> {
        self.modes.lock().unwrap().clone()
    }

    pub fn set_mode_list(&self, modes: Vec<ModeInfo>) {
        *self.modes.lock().unwrap() = modes;
    }

    pub fn status(&self) -> ConnectorStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: ConnectorStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn current_encoder(&self) -> Option<u32> {
        *self.current_encoder.lock().unwrap()
    }

    pub fn set_current_encoder(&self, encoder: Option<u32>) {
        *self.current_encoder.lock().unwrap() = encoder;
    }

    pub fn possible_encoders(&self) -> &[u32] {
        &self.possible_encoders
    }

    pub fn state(&self) -> Arc<ConnectorState> {
        self.state.lock().unwrap().clone()
    }

    pub fn set_state(&self, state: Arc<ConnectorState>) {
        *self.state.lock().unwrap() = state;
    }
}

/// An image source: a cropped/resized view of a framebuffer composited by a CRTC.
pub struct Plane {
    id: u32,
    plane_type: PlaneType,
    possible_crtcs: Vec<u32>,
    state: Mutex<Arc<PlaneState>>,
}

impl Plane {
    pub fn new(id: u32, plane_type: PlaneType, possible_crtcs: Vec<u32>) -> Arc<Self> {
        Arc::new(Self {
            id,
            plane_type,
            possible_crtcs,
            state: Mutex::new(Arc::new(PlaneState::new(id))),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn plane_type(&self) -> PlaneType {
        self.plane_type
    }

    pub fn possible_crtcs(&self) -> &[u32] {
        &self.possible_crtcs
    }

    pub fn state(&self) -> Arc<PlaneState> {
        self.state.lock().unwrap().clone()
    }

    pub fn set_state(&self, state: Arc<PlaneState>) {
        *self.state.lock().unwrap() = state;
    }
}

/// A mode object representing pixel storage; concrete backing is driver-defined and
/// modeled here as a bound [`BufferObject`].
pub struct FrameBuffer {
    id: u32,
    width: u32,
    height: u32,
    pitch: u32,
    format: u32,
    bo: Arc<BufferObject>,
}

impl FrameBuffer {
    pub fn new(id: u32, width: u32, height: u32, pitch: u32, format: u32, bo: Arc<BufferObject>) -> Arc<Self> {
        Arc::new(Self { id, width, height, pitch, format, bo })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn buffer_object(&self) -> &Arc<BufferObject> {
        &self.bo
    }
}

/// All mode objects in a device, indexed by id. Mutated only by device setup and
/// explicit create/destroy calls; readers take a clone of the looked-up `ModeObject`
/// rather than holding the registry lock.
///
/// The id allocator is shared with [`crate::blob::BlobStore`] through [`Device`](crate::device::Device)
/// so object ids and blob ids are minted from one counter: ids must be unique across every
/// object kind *and* blobs.
pub struct ObjectRegistry {
    ids: Arc<IdAllocator>,
    objects: Mutex<HashMap<u32, ModeObject>>,
}

impl ObjectRegistry {
    pub fn new(ids: Arc<IdAllocator>) -> Self {
        Self {
            ids,
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocate_id(&self) -> u32 {
        self.ids.alloc()
    }

    pub fn register(&self, object: ModeObject) {
        self.objects.lock().unwrap().insert(object.id(), object);
    }

    pub fn find(&self, id: u32) -> Option<ModeObject> {
        self.objects.lock().unwrap().get(&id).cloned()
    }

    /// Drops the object from the registry and recycles its id. No-op if already absent.
    pub fn unregister(&self, id: u32) {
        if self.objects.lock().unwrap().remove(&id).is_some() {
            self.ids.free(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_matching_type() {
        let registry = ObjectRegistry::new(Arc::new(IdAllocator::new()));
        let crtc = Crtc::new(registry.allocate_id(), 0);
        let id = crtc.id();
        registry.register(ModeObject::Crtc(crtc));

        let found = registry.find(id).expect("object should be registered");
        assert_eq!(found.id(), id);
        assert_eq!(found.object_type(), ObjectType::Crtc);
        assert!(found.as_crtc().is_some());
        assert!(found.as_plane().is_none());
    }

    #[test]
    fn unregister_recycles_the_id() {
        let registry = ObjectRegistry::new(Arc::new(IdAllocator::new()));
        let id = registry.allocate_id();
        registry.register(ModeObject::Crtc(Crtc::new(id, 0)));

        registry.unregister(id);
        assert!(registry.find(id).is_none());

        let reused = registry.allocate_id();
        assert_eq!(reused, id);
    }
}
