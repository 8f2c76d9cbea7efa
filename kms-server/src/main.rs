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

//! Demonstrative harness: wires a `Device` up with a software `Configuration`, runs one commit
//! through it, then opens and drives a client session through `kms_core::lane::LaneServer`.
//! There is still no real transport here -- `demo::run_lane_session` calls `LaneServer`
//! directly rather than reading requests off a socket -- but the `DEV_OPEN`/`OPEN_FD_LANE`
//! dispatch and file-ops routing a transport's accept loop would drive are fully wired up and
//! exercised.

use clap::Parser;

use kms_core::device::Device;

mod cli;
mod demo;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    log::info!("kms-server: starting against lane `{}`", cli.lane);

    let device = Device::new();
    device.setup_min_dimensions(cli.min_dim, cli.min_dim);
    device.setup_max_dimensions(cli.max_dim, cli.max_dim);

    demo::populate(&device);
    demo::run_sample_commit(&device)?;
    demo::run_lane_session(&device)?;

    log::info!("kms-server: demo commit and lane session complete, exiting");
    Ok(())
}
