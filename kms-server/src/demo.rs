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

//! Wires up a single-CRTC/single-connector mode graph, drives one commit through it, then
//! opens and drives one client session through `kms_core::lane::LaneServer`. There is no
//! socket transport here -- `run_lane_session` calls `LaneServer::dispatch` directly rather
//! than reading requests off a real lane fd -- but the request parsing, session bookkeeping
//! and file-ops routing it exercises are exactly what a transport would sit in front of.

use std::sync::Arc;

use kms_core::device::Device;
use kms_core::error::Result;
use kms_core::lane::{FileOp, FileOpResult, LaneServer};
use kms_core::modes;
use kms_core::object::{ConnectorStatus, ModeObject, PlaneType, SubpixelOrder};
use kms_core::property::{Assignment, Value};
use kms_core::configuration::SoftwareConfiguration;
use kms_uapi::{Credentials, Request, WireError};

/// Registers one CRTC, encoder, connector and primary plane, each logged as it's created so
/// a running server's startup log reads as a manifest of the mode graph.
pub fn populate(device: &Arc<Device>) {
    let crtc = device.setup_crtc();
    log::info!("kms-server: registered crtc id={} index={}", crtc.id(), crtc.index());

    let encoder = device.setup_encoder(0, vec![crtc.id()], vec![]);
    log::info!("kms-server: registered encoder id={} index={}", encoder.id(), encoder.index());

    let (max_w, max_h) = device.max_dim();
    let mut modes = Vec::new();
    modes::add_dmt_modes(&mut modes, max_w.min(u16::MAX as u32) as u16, max_h.min(u16::MAX as u32) as u16);

    let connector = device.attach_connector(
        0,
        310,
        170,
        SubpixelOrder::Unknown,
        modes,
        ConnectorStatus::Connected,
        vec![encoder.id()],
    );
    log::info!("kms-server: registered connector id={} modes={}", connector.id(), connector.mode_list().len());

    let plane = device.setup_plane(PlaneType::Primary, vec![crtc.id()]);
    log::info!("kms-server: registered primary plane id={}", plane.id());

    for property in [
        device.properties().active(),
        device.properties().mode_id(),
        device.properties().dpms(),
        device.properties().crtc_id(),
        device.properties().fb_id(),
    ] {
        log::debug!("kms-server: property {} (id={})", property.name(), property.id());
    }
}

/// Activates the first registered CRTC with its connector's first supported mode, via the
/// same prepare-validate-commit protocol a real client would use.
pub fn run_sample_commit(device: &Arc<Device>) -> Result<()> {
    let crtc = device.crtcs().into_iter().next().expect("populate() registers at least one crtc");
    let connector = device.connectors().into_iter().next().expect("populate() registers at least one connector");

    let mode = connector.mode_list().into_iter().next().expect("populate() seeds at least one mode");
    let mode_blob = device.register_blob(mode.to_bytes().to_vec());

    let assignments = vec![
        Assignment {
            object: ModeObject::Crtc(crtc.clone()),
            property: device.properties().mode_id().clone(),
            value: Value::Blob(Some(mode_blob)),
        },
        Assignment {
            object: ModeObject::Crtc(crtc.clone()),
            property: device.properties().active().clone(),
            value: Value::Int(1),
        },
    ];

    let mut state = device.atomic_state();
    for assignment in &assignments {
        if !assignment.property.validate(device, &assignment.object, &assignment.value) {
            log::warn!("kms-server: assignment to {} rejected by validate", assignment.property.name());
            return Err(kms_core::error::Error::InvalidArgument("sample commit rejected"));
        }
    }
    for assignment in &assignments {
        assignment.property.write_to_state(&assignment.object, &assignment.value, &mut state)?;
    }

    let configuration = SoftwareConfiguration::new();
    device.commit(state, &configuration, false, Vec::new())?;

    log::info!("kms-server: committed crtc id={} active with connector id={}", crtc.id(), connector.id());
    Ok(())
}

/// Drives one client session through `LaneServer` end to end: `DEV_OPEN`, an `OPEN_FD_LANE`
/// credential handoff, and a `pollStatus` against the resulting session. Stands in for a
/// transport's accept loop, which would do the same thing against a real lane fd instead of
/// calling `dispatch`/`dispatch_file_op` directly.
pub fn run_lane_session(device: &Arc<Device>) -> Result<()> {
    let lane = LaneServer::new(device.clone());

    let (lane_id, response) = lane.dispatch(None, None, Request::DevOpen { flags: 0 });
    if response.error != WireError::Ok {
        return Err(kms_core::error::Error::Protocol("DEV_OPEN was rejected"));
    }
    let lane_id = lane_id.expect("DEV_OPEN always mints a lane on success");
    log::info!("kms-server: lane {lane_id} opened, caps={:#x}", response.caps);

    let credentials: Credentials = [0u8; 16];
    let (_, response) = lane.dispatch(Some(lane_id), Some(credentials), Request::OpenFdLane);
    if response.error != WireError::Ok {
        return Err(kms_core::error::Error::Protocol("OPEN_FD_LANE was rejected"));
    }
    log::info!("kms-server: lane {lane_id} bound to client credentials");

    match lane.dispatch_file_op(lane_id, FileOp::PollStatus)? {
        FileOpResult::Status(sequence, mask) => {
            log::info!("kms-server: lane {lane_id} status sequence={sequence} mask={mask:#x}");
        }
        _ => unreachable!("pollStatus always returns FileOpResult::Status"),
    }

    lane.close(lane_id);
    log::info!("kms-server: lane {lane_id} closed");
    Ok(())
}
