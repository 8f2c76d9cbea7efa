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

//! The property/assignment engine: typed, named properties bound to the device, and the
//! assignments clients submit against them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::blob::Blob;
use crate::device::Device;
use crate::object::{ModeObject, PlaneType};
use crate::state::{AtomicState, Dpms};

pub type PropertyId = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PropertyType {
    Int,
    Enum,
    Blob,
    Object,
}

/// The value half of an [`Assignment`]; the active variant must match the target
/// property's [`PropertyType`].
#[derive(Clone)]
pub enum Value {
    Int(u64),
    Object(Option<u32>),
    Blob(Option<Arc<Blob>>),
}

impl Value {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Option<u32>> {
        match self {
            Value::Object(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Option<Arc<Blob>>> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }
}

/// Binds an object, a property, and a candidate value.
#[derive(Clone)]
pub struct Assignment {
    pub object: ModeObject,
    pub property: Arc<Property>,
    pub value: Value,
}

/// The three pure behaviors a property implements over the object it's assigned to.
///
/// `validate` defaults to accepting everything; most driver-registered properties never
/// need to override it. `write_to_state`/`read_from_state` have no default because a
/// property with no storage location would be pointless.
pub trait PropertyBehavior: Send + Sync {
    fn validate(&self, _device: &Device, _object: &ModeObject, _value: &Value) -> bool {
        true
    }

    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()>;

    fn read_from_state(&self, object: &ModeObject) -> Value;
}

pub struct Property {
    id: PropertyId,
    property_type: PropertyType,
    name: &'static str,
    enum_info: Option<HashMap<u64, &'static str>>,
    behavior: Box<dyn PropertyBehavior>,
}

impl Property {
    pub fn new(
        id: PropertyId,
        property_type: PropertyType,
        name: &'static str,
        enum_info: Option<HashMap<u64, &'static str>>,
        behavior: Box<dyn PropertyBehavior>,
    ) -> Arc<Self> {
        Arc::new(Self { id, property_type, name, enum_info, behavior })
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn enum_info(&self) -> Option<&HashMap<u64, &'static str>> {
        self.enum_info.as_ref()
    }

    pub fn validate(&self, device: &Device, object: &ModeObject, value: &Value) -> bool {
        self.behavior.validate(device, object, value)
    }

    pub fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        self.behavior.write_to_state(object, value, state)
    }

    pub fn read_from_state(&self, object: &ModeObject) -> Value {
        self.behavior.read_from_state(object)
    }
}

struct SrcXBehavior;
impl PropertyBehavior for SrcXBehavior {
    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let plane = object.as_plane().ok_or(crate::error::Error::InvalidArgument("SRC_X only applies to planes"))?;
        let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
        state.plane(&plane).src.x = value as i64;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("SRC_X only applies to planes");
        Value::Int(plane.state().src.x as u64)
    }
}

struct SrcYBehavior;
impl PropertyBehavior for SrcYBehavior {
    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let plane = object.as_plane().ok_or(crate::error::Error::InvalidArgument("SRC_Y only applies to planes"))?;
        let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
        state.plane(&plane).src.y = value as i64;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("SRC_Y only applies to planes");
        Value::Int(plane.state().src.y as u64)
    }
}

/// `SRC_W`/`SRC_H` are 16.16 fixed point; the `.16` fraction is truncated at write, so a
/// readback always sees the raw `>> 16` pixel count rather than the original fixed-point
/// value.
struct SrcWBehavior;
impl PropertyBehavior for SrcWBehavior {
    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let plane = object.as_plane().ok_or(crate::error::Error::InvalidArgument("SRC_W only applies to planes"))?;
        let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
        state.plane(&plane).src.w = (value >> 16) as i64;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("SRC_W only applies to planes");
        Value::Int(plane.state().src.w as u64)
    }
}

struct SrcHBehavior;
impl PropertyBehavior for SrcHBehavior {
    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let plane = object.as_plane().ok_or(crate::error::Error::InvalidArgument("SRC_H only applies to planes"))?;
        let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
        state.plane(&plane).src.h = (value >> 16) as i64;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("SRC_H only applies to planes");
        Value::Int(plane.state().src.h as u64)
    }
}

macro_rules! dst_rect_prop {
    ($behavior:ident, $field:ident) => {
        struct $behavior;
        impl PropertyBehavior for $behavior {
            fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
                let plane = object
                    .as_plane()
                    .ok_or(crate::error::Error::InvalidArgument(concat!(stringify!($behavior), " only applies to planes")))?;
                let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
                state.plane(&plane).dst.$field = value as i32;
                Ok(())
            }

            fn read_from_state(&self, object: &ModeObject) -> Value {
                let plane = object.as_plane().expect("destination rect property only applies to planes");
                Value::Int(plane.state().dst.$field as u64)
            }
        }
    };
}

dst_rect_prop!(CrtcXBehavior, x);
dst_rect_prop!(CrtcYBehavior, y);
dst_rect_prop!(CrtcWBehavior, w);
dst_rect_prop!(CrtcHBehavior, h);

struct CrtcIdBehavior;
impl PropertyBehavior for CrtcIdBehavior {
    fn validate(&self, _device: &Device, object: &ModeObject, value: &Value) -> bool {
        let Some(plane) = object.as_plane() else { return false };
        let Some(crtc) = value.as_object() else { return false };
        match crtc {
            None => true,
            Some(id) => plane.possible_crtcs().contains(&id),
        }
    }

    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let plane = object.as_plane().ok_or(crate::error::Error::InvalidArgument("CRTC_ID only applies to planes"))?;
        let crtc = value.as_object().ok_or(crate::error::Error::InvalidArgument("expected an object reference"))?;
        state.plane(&plane).crtc = crtc;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("CRTC_ID only applies to planes");
        Value::Object(plane.state().crtc)
    }
}

struct FbIdBehavior;
impl PropertyBehavior for FbIdBehavior {
    fn validate(&self, device: &Device, object: &ModeObject, value: &Value) -> bool {
        if object.as_plane().is_none() {
            return false;
        }
        let Some(target) = value.as_object() else { return false };
        match target {
            None => true,
            Some(id) => matches!(device.find_object(id), Some(ModeObject::FrameBuffer(_))),
        }
    }

    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let plane = object.as_plane().ok_or(crate::error::Error::InvalidArgument("FB_ID only applies to planes"))?;
        let fb = value.as_object().ok_or(crate::error::Error::InvalidArgument("expected an object reference"))?;
        state.plane(&plane).fb = fb;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("FB_ID only applies to planes");
        Value::Object(plane.state().fb)
    }
}

/// A mode-info blob must decode to exactly [`ModeInfo::SIZE`] bytes and satisfy the
/// horizontal/vertical timing chains (`hdisplay <= hsync_start <= hsync_end <= htotal`,
/// and the analogous vertical chain).
struct ModeIdBehavior;
impl PropertyBehavior for ModeIdBehavior {
    fn validate(&self, _device: &Device, object: &ModeObject, value: &Value) -> bool {
        if object.as_crtc().is_none() {
            return false;
        }
        let Some(blob) = value.as_blob() else { return false };
        match blob {
            None => true,
            Some(blob) => crate::modes::validate_mode_blob(blob.data()),
        }
    }

    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let crtc = object.as_crtc().ok_or(crate::error::Error::InvalidArgument("MODE_ID only applies to crtcs"))?;
        let blob = value.as_blob().ok_or(crate::error::Error::InvalidArgument("expected a blob reference"))?;
        let crtc_state = state.crtc(&crtc);
        crtc_state.mode = blob.clone();
        crtc_state.mode_changed = true;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let crtc = object.as_crtc().expect("MODE_ID only applies to crtcs");
        Value::Blob(crtc.state().mode.clone())
    }
}

struct ActiveBehavior;
impl PropertyBehavior for ActiveBehavior {
    fn validate(&self, _device: &Device, object: &ModeObject, value: &Value) -> bool {
        object.as_crtc().is_some() && matches!(value.as_int(), Some(0) | Some(1))
    }

    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let crtc = object.as_crtc().ok_or(crate::error::Error::InvalidArgument("ACTIVE only applies to crtcs"))?;
        let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
        state.crtc(&crtc).active = value != 0;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let crtc = object.as_crtc().expect("ACTIVE only applies to crtcs");
        Value::Int(crtc.state().active as u64)
    }
}

struct DpmsBehavior;
impl PropertyBehavior for DpmsBehavior {
    fn validate(&self, _device: &Device, object: &ModeObject, value: &Value) -> bool {
        object.as_connector().is_some() && value.as_int().map(Dpms::from_u64).is_some_and(|v| v.is_some())
    }

    fn write_to_state(&self, object: &ModeObject, value: &Value, state: &mut AtomicState) -> crate::error::Result<()> {
        let connector = object.as_connector().ok_or(crate::error::Error::InvalidArgument("DPMS only applies to connectors"))?;
        let value = value.as_int().ok_or(crate::error::Error::InvalidArgument("expected an integer value"))?;
        let dpms = Dpms::from_u64(value).ok_or(crate::error::Error::InvalidArgument("DPMS value out of range"))?;
        state.connector(&connector).dpms = dpms;
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let connector = object.as_connector().expect("DPMS only applies to connectors");
        Value::Int(connector.state().dpms as u64)
    }
}

/// `type` on a plane is read-only and reflective: it never accepts any assignment other
/// than the plane's own fixed type, and writing it never changes anything observable.
struct PlaneTypeBehavior;
impl PropertyBehavior for PlaneTypeBehavior {
    fn validate(&self, _device: &Device, object: &ModeObject, value: &Value) -> bool {
        let Some(plane) = object.as_plane() else { return false };
        let Some(value) = value.as_int() else { return false };
        plane_type_to_u64(plane.plane_type()) == value
    }

    fn write_to_state(&self, _object: &ModeObject, _value: &Value, _state: &mut AtomicState) -> crate::error::Result<()> {
        Ok(())
    }

    fn read_from_state(&self, object: &ModeObject) -> Value {
        let plane = object.as_plane().expect("type only applies to planes");
        Value::Int(plane_type_to_u64(plane.plane_type()))
    }
}

fn plane_type_to_u64(plane_type: PlaneType) -> u64 {
    match plane_type {
        PlaneType::Primary => 0,
        PlaneType::Overlay => 1,
        PlaneType::Cursor => 2,
    }
}

/// The canonical set of properties registered by device init, plus whatever a driver
/// layers on top via [`PropertyCatalog::register`].
pub struct PropertyCatalog {
    ids: crate::id::IdAllocator,
    properties: Mutex<HashMap<PropertyId, Arc<Property>>>,

    src_x: Arc<Property>,
    src_y: Arc<Property>,
    src_w: Arc<Property>,
    src_h: Arc<Property>,
    crtc_x: Arc<Property>,
    crtc_y: Arc<Property>,
    crtc_w: Arc<Property>,
    crtc_h: Arc<Property>,
    crtc_id: Arc<Property>,
    fb_id: Arc<Property>,
    mode_id: Arc<Property>,
    active: Arc<Property>,
    dpms: Arc<Property>,
    plane_type: Arc<Property>,
}

impl PropertyCatalog {
    pub fn new() -> Self {
        let ids = crate::id::IdAllocator::new();
        let mut properties = HashMap::new();

        macro_rules! canonical {
            ($name:literal, $ty:expr, $behavior:expr, $enum_info:expr) => {{
                let property = Property::new(ids.alloc(), $ty, $name, $enum_info, Box::new($behavior));
                properties.insert(property.id(), property.clone());
                property
            }};
        }

        let src_x = canonical!("SRC_X", PropertyType::Int, SrcXBehavior, None);
        let src_y = canonical!("SRC_Y", PropertyType::Int, SrcYBehavior, None);
        let src_w = canonical!("SRC_W", PropertyType::Int, SrcWBehavior, None);
        let src_h = canonical!("SRC_H", PropertyType::Int, SrcHBehavior, None);
        let crtc_x = canonical!("CRTC_X", PropertyType::Int, CrtcXBehavior, None);
        let crtc_y = canonical!("CRTC_Y", PropertyType::Int, CrtcYBehavior, None);
        let crtc_w = canonical!("CRTC_W", PropertyType::Int, CrtcWBehavior, None);
        let crtc_h = canonical!("CRTC_H", PropertyType::Int, CrtcHBehavior, None);
        let crtc_id = canonical!("CRTC_ID", PropertyType::Object, CrtcIdBehavior, None);
        let fb_id = canonical!("FB_ID", PropertyType::Object, FbIdBehavior, None);
        let mode_id = canonical!("MODE_ID", PropertyType::Blob, ModeIdBehavior, None);
        let active = canonical!("ACTIVE", PropertyType::Int, ActiveBehavior, None);

        let dpms_enum: HashMap<u64, &'static str> =
            [(0, "On"), (1, "Standby"), (2, "Suspend"), (3, "Off")].into_iter().collect();
        let dpms = canonical!("DPMS", PropertyType::Enum, DpmsBehavior, Some(dpms_enum));

        let plane_type_enum: HashMap<u64, &'static str> =
            [(0, "Primary"), (1, "Overlay"), (2, "Cursor")].into_iter().collect();
        let plane_type = canonical!("type", PropertyType::Enum, PlaneTypeBehavior, Some(plane_type_enum));

        Self {
            ids,
            properties: Mutex::new(properties),
            src_x,
            src_y,
            src_w,
            src_h,
            crtc_x,
            crtc_y,
            crtc_w,
            crtc_h,
            crtc_id,
            fb_id,
            mode_id,
            active,
            dpms,
            plane_type,
        }
    }

    /// Registers an additional, driver-defined property.
    pub fn register(
        &self,
        property_type: PropertyType,
        name: &'static str,
        enum_info: Option<HashMap<u64, &'static str>>,
        behavior: Box<dyn PropertyBehavior>,
    ) -> Arc<Property> {
        let property = Property::new(self.ids.alloc(), property_type, name, enum_info, behavior);
        self.properties.lock().unwrap().insert(property.id(), property.clone());
        property
    }

    pub fn find(&self, id: PropertyId) -> Option<Arc<Property>> {
        self.properties.lock().unwrap().get(&id).cloned()
    }

    pub fn src_x(&self) -> &Arc<Property> { &self.src_x }
    pub fn src_y(&self) -> &Arc<Property> { &self.src_y }
    pub fn src_w(&self) -> &Arc<Property> { &self.src_w }
    pub fn src_h(&self) -> &Arc<Property> { &self.src_h }
    pub fn crtc_x(&self) -> &Arc<Property> { &self.crtc_x }
    pub fn crtc_y(&self) -> &Arc<Property> { &self.crtc_y }
    pub fn crtc_w(&self) -> &Arc<Property> { &self.crtc_w }
    pub fn crtc_h(&self) -> &Arc<Property> { &self.crtc_h }
    pub fn crtc_id(&self) -> &Arc<Property> { &self.crtc_id }
    pub fn fb_id(&self) -> &Arc<Property> { &self.fb_id }
    pub fn mode_id(&self) -> &Arc<Property> { &self.mode_id }
    pub fn active(&self) -> &Arc<Property> { &self.active }
    pub fn dpms(&self) -> &Arc<Property> { &self.dpms }
    pub fn plane_type(&self) -> &Arc<Property> { &self.plane_type }
}

impl Default for PropertyCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bo::{BufferObject, TestMemoryProvider};
    use crate::object::{Crtc, Plane};

    #[test]
    fn dpms_bounds() {
        let device = Device::new();
        let catalog = PropertyCatalog::new();
        let connector = crate::object::Connector::new(
            1,
            0,
            0,
            0,
            crate::object::SubpixelOrder::Unknown,
            vec![],
            crate::object::ConnectorStatus::Connected,
            vec![],
        );
        let object = ModeObject::Connector(connector);

        for ok in 0..=3u64 {
            assert!(catalog.dpms().validate(&device, &object, &Value::Int(ok)), "{ok} should be valid DPMS");
        }
        assert!(!catalog.dpms().validate(&device, &object, &Value::Int(4)));
    }

    #[test]
    fn plane_type_is_reflective_only() {
        let device = Device::new();
        let catalog = PropertyCatalog::new();
        let plane = Plane::new(1, PlaneType::Cursor, vec![]);
        let object = ModeObject::Plane(plane);

        assert!(catalog.plane_type().validate(&device, &object, &Value::Int(2)));
        assert!(!catalog.plane_type().validate(&device, &object, &Value::Int(1)), "Overlay must be rejected on a Cursor plane");
    }

    #[test]
    fn src_w_truncates_fixed_point_fraction() {
        let catalog = PropertyCatalog::new();
        let plane = Plane::new(1, PlaneType::Primary, vec![]);
        let object = ModeObject::Plane(plane.clone());
        let mut state = AtomicState::new();

        // 1920.5 in 16.16 fixed point.
        let fixed = (1920u64 << 16) | (1 << 15);
        catalog.src_w().write_to_state(&object, &Value::Int(fixed), &mut state).unwrap();
        assert_eq!(state.plane(&plane).src.w, 1920);
    }

    #[test]
    fn crtc_id_must_be_a_possible_crtc() {
        let device = Device::new();
        let catalog = PropertyCatalog::new();
        let allowed_crtc = Crtc::new(10, 0);
        let plane = Plane::new(1, PlaneType::Overlay, vec![allowed_crtc.id()]);
        let object = ModeObject::Plane(plane);

        assert!(catalog.crtc_id().validate(&device, &object, &Value::Object(Some(10))));
        assert!(!catalog.crtc_id().validate(&device, &object, &Value::Object(Some(99))));
        assert!(catalog.crtc_id().validate(&device, &object, &Value::Object(None)));
    }

    #[test]
    fn fb_id_accepts_null_or_a_framebuffer() {
        let device = Device::new();
        let catalog = PropertyCatalog::new();
        let plane = device.setup_plane(PlaneType::Primary, vec![]);
        let crtc = device.setup_crtc();

        let bo = BufferObject::new(4096, Arc::new(TestMemoryProvider { handle: 1, offset: 0 }));
        device.install_mapping(&bo);
        let fb = device.create_framebuffer(1920, 1080, 7680, 0, bo);

        let object = ModeObject::Plane(plane);
        assert!(catalog.fb_id().validate(&device, &object, &Value::Object(None)));
        assert!(catalog.fb_id().validate(&device, &object, &Value::Object(Some(fb.id()))));
        assert!(!catalog.fb_id().validate(&device, &object, &Value::Object(Some(crtc.id()))), "a crtc id is not a framebuffer");
        assert!(!catalog.fb_id().validate(&device, &object, &Value::Object(Some(99_999))), "an unknown id must be rejected");
    }
}
