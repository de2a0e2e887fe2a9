// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! psxrec entry point
//!
//! One positional argument: the disc image. Debug knobs come from the
//! environment rather than flags:
//! - `PSXREC_FRAME_LIMIT`: stop cleanly after N frames
//! - `PSXREC_VRAM_DUMP`: write the raw VRAM image here on shutdown
//! - `RUST_LOG`: log filtering (env_logger)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use psxrec::core::system::System;

#[derive(Parser)]
#[command(name = "psxrec")]
#[command(about = "A dynarec-based PlayStation (PSX) emulator")]
struct Args {
    /// Disc image to boot (.iso, .bin or .cue)
    image: PathBuf,
}

fn main() -> ExitCode {
    // Environment configuration, then logging.
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut system = System::new();
    system.frame_limit = std::env::var("PSXREC_FRAME_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok());
    system.vram_dump = std::env::var("PSXREC_VRAM_DUMP").ok().map(PathBuf::from);

    if let Err(e) = system.load_disc(&args.image) {
        println!("failed to load {}: {}", args.image.display(), e);
        return ExitCode::FAILURE;
    }

    log::info!("booting {}", args.image.display());
    match system.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("emulation stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
