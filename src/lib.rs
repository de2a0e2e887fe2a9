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

//! psxrec: a dynarec-based PlayStation (PSX) emulator
//!
//! Two engines carry the weight:
//!
//! - [`core::jit`], a basic-block binary translator for the MIPS R3000A:
//!   inline memory fast paths, direct block linking, self-modifying-code
//!   invalidation through page write generations, load/branch delay
//!   semantics, GTE pipeline stall accounting, dead-code elimination,
//!   constant propagation and super-block fall-through.
//! - [`core::gpu`], a GPU command translator: the GP0/GP1 state machine,
//!   a shadow of guest VRAM, CPU↔VRAM transfer engines with the guest's
//!   pixel semantics, and per-primitive translation into GIF packets for
//!   a GS-style rasterizer, backed by a CLUT-aware page-level texture
//!   cache.
//!
//! They share a cycle-driven event scheduler ([`core::timing`]), a guest
//! memory model with a 64 KiB-page LUT ([`core::memory`]), and a small
//! disc/ISO-9660 layer used at boot ([`core::cdrom`]).
//!
//! # Booting
//!
//! ```no_run
//! use psxrec::core::system::System;
//!
//! let mut system = System::new();
//! system.load_disc(std::path::Path::new("game.iso"))?;
//! system.run()?;
//! # Ok::<(), psxrec::core::error::EmulatorError>(())
//! ```
//!
//! # Error handling
//!
//! Fallible operations return [`core::error::Result`]. Guest-visible
//! faults never surface as Rust errors; they go through the COP0
//! exception machinery.

pub mod core;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
