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

//! PS-X EXE loading
//!
//! The header occupies the first 2048 bytes; the code body follows and is
//! copied to the text load address. Entry state: PC = pc0, GP = gp0,
//! SP/FP = s_addr + s_size when set, a0/a1 zeroed.

use crate::core::cpu::CPU;
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::Bus;

/// Header magic
const MAGIC: &[u8; 8] = b"PS-X EXE";

/// Header size preceding the code body
pub const HEADER_SIZE: usize = 2048;

/// Parsed PS-X EXE header
#[derive(Debug, Clone, Copy)]
pub struct ExeHeader {
    pub pc0: u32,
    pub gp0: u32,
    pub text_addr: u32,
    pub text_size: u32,
    pub stack_addr: u32,
    pub stack_size: u32,
}

impl ExeHeader {
    /// Parse and validate the fixed header fields
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE || &data[..8] != MAGIC {
            return Err(EmulatorError::Loader(
                "missing PS-X EXE magic".to_string(),
            ));
        }
        let word = |off: usize| u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        let header = Self {
            pc0: word(0x10),
            gp0: word(0x14),
            text_addr: word(0x18),
            text_size: word(0x1C),
            stack_addr: word(0x30),
            stack_size: word(0x34),
        };

        let dest = header.text_addr & 0x001F_FFFF;
        if header.text_size as usize > Bus::RAM_SIZE
            || (dest as usize + header.text_size as usize) > Bus::RAM_SIZE
        {
            return Err(EmulatorError::Loader(format!(
                "text segment 0x{:08X}+0x{:X} exceeds RAM",
                header.text_addr, header.text_size
            )));
        }
        Ok(header)
    }
}

/// Copy the executable into RAM and point the CPU at its entry
pub fn load(data: &[u8], cpu: &mut CPU, bus: &mut Bus) -> Result<ExeHeader> {
    let header = ExeHeader::parse(data)?;
    let body = &data[HEADER_SIZE..];
    let copy = (header.text_size as usize).min(body.len());
    let dest = (header.text_addr & 0x001F_FFFF) as usize;

    bus.ram_mut()[dest..dest + copy].copy_from_slice(&body[..copy]);

    cpu.set_pc(header.pc0);
    cpu.set_reg(28, header.gp0);
    if header.stack_addr != 0 || header.stack_size != 0 {
        let sp = header.stack_addr.wrapping_add(header.stack_size);
        cpu.set_reg(29, sp);
        cpu.set_reg(30, sp);
    }
    cpu.set_reg(4, 0);
    cpu.set_reg(5, 0);

    log::info!(
        "EXE loaded: pc0=0x{:08X} text=0x{:08X}+0x{:X} sp=0x{:08X}",
        header.pc0,
        header.text_addr,
        header.text_size,
        cpu.reg(29)
    );
    Ok(header)
}
