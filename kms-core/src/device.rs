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

//! The `Device`: the single collaborator every session shares. It owns the object
//! registry, blob store, property catalog, buffer-object registry, and the id
//! allocators, and serializes its own commits.

use std::sync::{Arc, Mutex, Weak};

use kms_uapi::Credentials;

use crate::blob::{Blob, BlobStore};
use crate::bo::{BoRegistry, BufferObject};
use crate::configuration::{CompletionSink, Configuration, EventRequest};
use crate::error::{Error, Result};
use crate::id::IdAllocator;
use crate::object::{Connector, ConnectorStatus, Crtc, Encoder, FrameBuffer, ModeObject, ObjectRegistry, Plane, PlaneType, SubpixelOrder};
use crate::property::PropertyCatalog;
use crate::state::AtomicState;
use kms_uapi::ModeInfo;

pub struct Device {
    sref: Weak<Device>,

    objects: ObjectRegistry,
    blobs: BlobStore,
    properties: PropertyCatalog,
    bos: BoRegistry,
    memory_slots: IdAllocator,

    crtcs: Mutex<Vec<Arc<Crtc>>>,
    encoders: Mutex<Vec<Arc<Encoder>>>,
    connectors: Mutex<Vec<Arc<Connector>>>,

    min_dim: Mutex<(u32, u32)>,
    max_dim: Mutex<(u32, u32)>,

    /// Serializes the check phase and the publish phase of commits. Deliberately global
    /// rather than per-object: this is a stricter-than-required implementation of "no
    /// two configurations may concurrently commit to overlapping objects", traded for
    /// not having to track per-transaction conflict sets.
    commit_lock: Mutex<()>,
}

impl Device {
    pub fn new() -> Arc<Self> {
        let object_ids = Arc::new(IdAllocator::new());
        Arc::new_cyclic(|sref| Self {
            sref: sref.clone(),
            objects: ObjectRegistry::new(object_ids.clone()),
            blobs: BlobStore::new(object_ids),
            properties: PropertyCatalog::new(),
            bos: BoRegistry::new(),
            memory_slots: IdAllocator::new(),
            crtcs: Mutex::new(Vec::new()),
            encoders: Mutex::new(Vec::new()),
            connectors: Mutex::new(Vec::new()),
            min_dim: Mutex::new((0, 0)),
            max_dim: Mutex::new((u32::MAX, u32::MAX)),
            commit_lock: Mutex::new(()),
        })
    }

    fn upgrade(&self) -> Arc<Device> {
        self.sref.upgrade().expect("kms-core: device dropped while still in use")
    }

    // -- object graph setup ------------------------------------------------------

    /// Registers a new CRTC at the next dense index and installs it into the object
    /// registry.
    pub fn setup_crtc(&self) -> Arc<Crtc> {
        let mut crtcs = self.crtcs.lock().unwrap();
        let crtc = Crtc::new(self.objects.allocate_id(), crtcs.len() as u32);
        crtcs.push(crtc.clone());
        self.objects.register(ModeObject::Crtc(crtc.clone()));
        crtc
    }

    pub fn setup_encoder(&self, encoder_type: u32, possible_crtcs: Vec<u32>, possible_clones: Vec<u32>) -> Arc<Encoder> {
        let mut encoders = self.encoders.lock().unwrap();
        let encoder = Encoder::new(self.objects.allocate_id(), encoders.len() as u32, encoder_type, possible_crtcs, possible_clones);
        encoders.push(encoder.clone());
        self.objects.register(ModeObject::Encoder(encoder.clone()));
        encoder
    }

    #[allow(clippy::too_many_arguments)]
    pub fn attach_connector(
        &self,
        connector_type: u32,
        phys_width_mm: u32,
        phys_height_mm: u32,
        subpixel: SubpixelOrder,
        modes: Vec<ModeInfo>,
        status: ConnectorStatus,
        possible_encoders: Vec<u32>,
    ) -> Arc<Connector> {
        let connector = Connector::new(
            self.objects.allocate_id(),
            connector_type,
            phys_width_mm,
            phys_height_mm,
            subpixel,
            modes,
            status,
            possible_encoders,
        );
        self.connectors.lock().unwrap().push(connector.clone());
        self.objects.register(ModeObject::Connector(connector.clone()));
        connector
    }

    pub fn setup_plane(&self, plane_type: PlaneType, possible_crtcs: Vec<u32>) -> Arc<Plane> {
        let plane = Plane::new(self.objects.allocate_id(), plane_type, possible_crtcs);
        self.objects.register(ModeObject::Plane(plane.clone()));
        plane
    }

    pub fn crtcs(&self) -> Vec<Arc<Crtc>> {
        self.crtcs.lock().unwrap().clone()
    }

    pub fn encoders(&self) -> Vec<Arc<Encoder>> {
        self.encoders.lock().unwrap().clone()
    }

    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.connectors.lock().unwrap().clone()
    }

    // -- object / blob / bo registries --------------------------------------------

    pub fn allocate_object_id(&self) -> u32 {
        self.objects.allocate_id()
    }

    pub fn register_object(&self, object: ModeObject) {
        self.objects.register(object);
    }

    pub fn find_object(&self, id: u32) -> Option<ModeObject> {
        self.objects.find(id)
    }

    pub fn register_blob(&self, data: Vec<u8>) -> Arc<Blob> {
        self.blobs.register(data)
    }

    pub fn find_blob(&self, id: u32) -> Option<Arc<Blob>> {
        self.blobs.find(id)
    }

    pub fn delete_blob(&self, id: u32) -> bool {
        self.blobs.delete(id)
    }

    /// Creates a framebuffer bound to `bo` and registers it as a mode object. Unlike the
    /// rest of the object graph, framebuffers are created by explicit client request
    /// rather than by device setup.
    pub fn create_framebuffer(&self, width: u32, height: u32, pitch: u32, format: u32, bo: Arc<BufferObject>) -> Arc<FrameBuffer> {
        let fb = FrameBuffer::new(self.objects.allocate_id(), width, height, pitch, format, bo);
        self.objects.register(ModeObject::FrameBuffer(fb.clone()));
        fb
    }

    /// Unregisters the framebuffer `id`. Returns `false` if `id` doesn't name a
    /// framebuffer (already destroyed, or never one to begin with).
    pub fn destroy_framebuffer(&self, id: u32) -> bool {
        match self.objects.find(id) {
            Some(ModeObject::FrameBuffer(_)) => {
                self.objects.unregister(id);
                true
            }
            _ => false,
        }
    }

    pub fn register_buffer_object(&self, bo: Arc<BufferObject>, creds: Credentials) {
        self.bos.register(bo, creds);
    }

    pub fn find_buffer_object(&self, creds: Credentials) -> Option<Arc<BufferObject>> {
        self.bos.find(creds)
    }

    /// Allocates a fresh aggregator memory slot and installs it as `bo`'s mapping.
    pub fn install_mapping(&self, bo: &Arc<BufferObject>) -> u64 {
        let slot = self.memory_slots.alloc();
        let mapping = (slot as u64) << 32;
        bo.setup_mapping(mapping);
        mapping
    }

    // -- properties ----------------------------------------------------------------

    pub fn properties(&self) -> &PropertyCatalog {
        &self.properties
    }

    // -- dimension clamps ------------------------------------------------------------

    pub fn setup_min_dimensions(&self, width: u32, height: u32) {
        *self.min_dim.lock().unwrap() = (width, height);
    }

    pub fn setup_max_dimensions(&self, width: u32, height: u32) {
        *self.max_dim.lock().unwrap() = (width, height);
    }

    pub fn min_dim(&self) -> (u32, u32) {
        *self.min_dim.lock().unwrap()
    }

    pub fn max_dim(&self) -> (u32, u32) {
        *self.max_dim.lock().unwrap()
    }

    // -- atomic commit ---------------------------------------------------------------

    pub fn atomic_state(&self) -> AtomicState {
        AtomicState::new()
    }

    /// Runs the "prepare-validate-commit" protocol's submit step: checks feasibility,
    /// and for an accepted non-test commit, hands the state to `configuration` to
    /// schedule hardware programming. Returns as soon as the check has run; completion
    /// (and any posted events) happens whenever the configuration calls
    /// [`CompletionSink::complete`].
    pub fn commit(
        &self,
        state: AtomicState,
        configuration: &dyn Configuration,
        test_only: bool,
        event_requests: Vec<EventRequest>,
    ) -> Result<()> {
        {
            let _guard = self.commit_lock.lock().unwrap();
            if !configuration.check(self, &state) {
                log::debug!("kms-core: configuration rejected a transaction");
                return Err(Error::InvalidArgument("configuration rejected the transaction"));
            }
            if test_only {
                return Ok(());
            }
        }

        let sink = CompletionSink::new(self.upgrade(), state, event_requests);
        configuration.commit(self, sink);
        Ok(())
    }

    /// Publishes a commit's touched sub-states as the objects' current state, atomically
    /// per object. Returns the ids of every CRTC that was touched, for event targeting.
    pub(crate) fn publish(&self, state: AtomicState) -> Vec<u32> {
        let _guard = self.commit_lock.lock().unwrap();
        let (crtcs, planes, connectors) = state.into_parts();

        let mut touched_crtcs = Vec::with_capacity(crtcs.len());
        for (id, crtc_state) in crtcs {
            if let Some(crtc) = self.objects.find(id).and_then(|o| o.as_crtc()) {
                touched_crtcs.push(id);
                crtc.set_state(Arc::new(crtc_state));
            }
        }
        for (id, plane_state) in planes {
            if let Some(plane) = self.objects.find(id).and_then(|o| o.as_plane()) {
                plane.set_state(Arc::new(plane_state));
            }
        }
        for (id, connector_state) in connectors {
            if let Some(connector) = self.objects.find(id).and_then(|o| o.as_connector()) {
                connector.set_state(Arc::new(connector_state));
            }
        }

        log::trace!("kms-core: published commit touching {} crtc(s)", touched_crtcs.len());
        touched_crtcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bo::TestMemoryProvider;
    use crate::configuration::{EventRequest, SoftwareConfiguration};
    use crate::file::ClientFile;
    use crate::property::Value;

    fn init_logging() {
        let _ = env_logger::try_init();
    }

    #[test]
    fn object_and_blob_ids_are_minted_from_one_counter() {
        init_logging();
        let device = Device::new();
        let crtc = device.setup_crtc();
        let blob = device.register_blob(vec![1, 2, 3]);
        let encoder = device.setup_encoder(0, vec![crtc.id()], vec![]);

        let ids = [crtc.id(), blob.id(), encoder.id()];
        assert_eq!(ids.len(), ids.iter().collect::<std::collections::HashSet<_>>().len(), "ids must never collide across objects and blobs");
    }

    #[test]
    fn framebuffer_is_created_and_destroyed_by_explicit_request() {
        init_logging();
        let device = Device::new();
        let bo = BufferObject::new(4096, Arc::new(TestMemoryProvider { handle: 1, offset: 0 }));
        device.install_mapping(&bo);

        let fb = device.create_framebuffer(1920, 1080, 7680, 0, bo);
        assert!(matches!(device.find_object(fb.id()), Some(ModeObject::FrameBuffer(_))));

        assert!(device.destroy_framebuffer(fb.id()));
        assert!(device.find_object(fb.id()).is_none());
        assert!(!device.destroy_framebuffer(fb.id()), "destroying twice must return false");
    }

    #[test]
    fn setup_registers_objects_findable_by_id() {
        init_logging();
        let device = Device::new();
        let crtc = device.setup_crtc();
        let plane = device.setup_plane(PlaneType::Primary, vec![crtc.id()]);

        assert_eq!(device.find_object(crtc.id()).unwrap().id(), crtc.id());
        assert_eq!(device.find_object(plane.id()).unwrap().id(), plane.id());
        assert_ne!(crtc.id(), plane.id());
    }

    #[test]
    fn accepted_commit_publishes_state_and_posts_an_event() {
        init_logging();
        let device = Device::new();
        let crtc = device.setup_crtc();

        let file = ClientFile::new(device.clone(), true);
        let weak_file = Arc::downgrade(&file);

        let mut state = device.atomic_state();
        device
            .properties()
            .active()
            .write_to_state(&ModeObject::Crtc(crtc.clone()), &Value::Int(1), &mut state)
            .unwrap();

        let configuration = SoftwareConfiguration::new();
        let event_requests = vec![EventRequest { file: weak_file, crtc_id: crtc.id(), cookie: 99 }];
        device.commit(state, &configuration, false, event_requests).unwrap();

        assert!(crtc.state().active, "publish must install the touched sub-state");
        assert!(file.is_readable(), "a matching event request must post an event on commit");
    }

    #[test]
    fn rejected_commit_leaves_state_untouched() {
        init_logging();
        let device = Device::new();
        let crtc = device.setup_crtc();

        let mut state = device.atomic_state();
        device
            .properties()
            .active()
            .write_to_state(&ModeObject::Crtc(crtc.clone()), &Value::Int(1), &mut state)
            .unwrap();

        let configuration = SoftwareConfiguration::rejecting();
        assert!(device.commit(state, &configuration, false, Vec::new()).is_err());
        assert!(!crtc.state().active, "a rejected commit must never publish its sub-states");
    }

    #[test]
    fn test_only_commit_never_publishes() {
        init_logging();
        let device = Device::new();
        let crtc = device.setup_crtc();

        let mut state = device.atomic_state();
        device
            .properties()
            .active()
            .write_to_state(&ModeObject::Crtc(crtc.clone()), &Value::Int(1), &mut state)
            .unwrap();

        let configuration = SoftwareConfiguration::new();
        device.commit(state, &configuration, true, Vec::new()).unwrap();
        assert!(!crtc.state().active, "test-only commits must never publish");
    }
}
