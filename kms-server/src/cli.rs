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

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, version)]
pub struct Cli {
    #[arg(long, default_value = "/dev/dri/card0", help = "Lane path the server would bind to")]
    pub lane: String,

    #[arg(long, default_value_t = 64, help = "Minimum accepted mode width/height")]
    pub min_dim: u32,

    #[arg(long, default_value_t = 4096, help = "Maximum accepted mode width/height")]
    pub max_dim: u32,

    #[arg(long, default_value_t = String::from("info"), help = "Log verbosity (error, warn, info, debug, trace)")]
    pub log_level: String,
}
