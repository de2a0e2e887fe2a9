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

//! Error types for the emulator
//!
//! Fatal startup failures (image open, ISO walk, EXE load) surface as
//! [`EmulatorError`] values and terminate the process with a diagnostic.
//! Guest-visible faults (address errors, overflow, syscall) are *not* errors
//! at this level; they are delivered through the COP0 exception mechanism and
//! never escape the emulation loop.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Top-level emulator error
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// Access to an address no region or device claims
    #[error("invalid memory access at 0x{address:08X} ({access})")]
    InvalidMemoryAccess {
        /// Guest virtual address
        address: u32,
        /// Access description ("read8", "write32", ...)
        access: &'static str,
    },

    /// Misaligned halfword/word access outside the guest exception path
    #[error("unaligned {access} access at 0x{address:08X}")]
    UnalignedAccess {
        /// Guest virtual address
        address: u32,
        /// Access description
        access: &'static str,
    },

    /// Disc image / ISO-9660 layer failure
    #[error("disc error: {0}")]
    Disc(#[from] DiscError),

    /// PS-X EXE header or load failure
    #[error("executable load failed: {0}")]
    Loader(String),

    /// Host I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the disc-image and ISO-9660 layer
#[derive(Debug, Error)]
pub enum DiscError {
    /// Image file could not be opened or read
    #[error("failed to open disc image: {0}")]
    Open(String),

    /// Neither a 2048-byte ISO nor a recognizable 2352-byte raw image
    #[error("unrecognized disc image format")]
    UnknownFormat,

    /// Cue sheet present but unusable
    #[error("cue sheet error: {0}")]
    CueSheet(String),

    /// Primary volume descriptor missing or corrupt
    #[error("ISO-9660 primary volume descriptor not found")]
    NoVolumeDescriptor,

    /// Requested file not present in the root directory
    #[error("file not found on disc: {0}")]
    FileNotFound(String),

    /// SYSTEM.CNF exists but carries no usable BOOT line
    #[error("boot executable path not found: {0}")]
    BootPathNotFound(String),

    /// LBA beyond the end of the image
    #[error("sector {0} out of range")]
    SectorOutOfRange(u32),

    /// Host I/O failure while reading the image
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
