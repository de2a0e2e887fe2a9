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

//! Memory bus: guest address space, page LUT and device dispatch
//!
//! Logical addresses are 32-bit with the upper three bits selecting the
//! segment; the physical mapping masks to 29 bits and mirrors the 2 MiB of
//! main RAM through kuseg/kseg0/kseg1.
//!
//! | Physical range          | Region        | Size   |
//! |-------------------------|---------------|--------|
//! | 0x00000000-0x001FFFFF   | Main RAM      | 2 MiB  |
//! | 0x1F000000-0x1F00FFFF   | Parallel port | stub   |
//! | 0x1F800000-0x1F8003FF   | Scratchpad    | 1 KiB  |
//! | 0x1F801000-0x1F802FFF   | HW registers  | 8 KiB  |
//! | 0x1FC00000-0x1FC7FFFF   | BIOS ROM      | 512 KiB|
//!
//! The 64 Ki-entry page LUT resolves the upper 16 address bits straight to
//! RAM or scratchpad; every other page goes through the range dispatch
//! below. Writes that land in RAM feed the per-4 KiB-page write generations
//! the translator's self-modifying-code detection keys on.

use crate::core::cdrom::CDROM;
use crate::core::dma::DMA;
use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::GPU;
use crate::core::interrupt::InterruptController;
use crate::core::sio::Sio;
use crate::core::timer::Timers;
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) mod smc;

pub use smc::SmcTracker;

/// One page-LUT entry
///
/// The original stores host base pointers with null for slow-path pages;
/// offsets into the owned regions are the safe rendition of the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Page is the given byte offset into main RAM
    Ram(u32),
    /// Page fronts the 1 KiB scratchpad (only the first 0x400 bytes hit)
    Scratchpad,
    /// No direct mapping: range dispatch decides
    Slow,
}

/// Memory bus owning guest memory and routing device accesses
pub struct Bus {
    /// Main RAM
    ram: Vec<u8>,
    /// Scratchpad (data cache in scratchpad mode)
    scratchpad: [u8; Self::SCRATCHPAD_SIZE],
    /// BIOS ROM image (all zeros when no BIOS is loaded; EXE boot does not
    /// need one)
    bios: Vec<u8>,
    /// Page LUT: upper 16 address bits to direct mapping
    lut: Vec<Page>,
    /// Per-page write generations for compiled-code invalidation
    pub smc: SmcTracker,
    /// Cache control register (0xFFFE0130)
    cache_control: u32,
    /// Memory control / RAM size registers, kept raw
    mem_ctrl: [u32; 9],
    ram_size_reg: u32,
    /// SPU register window, kept raw so status polls read back
    spu_regs: [u16; 0x200],
    /// Instruction fetches from the SPU/DMA apertures land here; almost
    /// certainly dead weight in real games, kept for the diagnostic path
    fetch_scratch: [u32; 64],
    /// Guest-TLB configuration: forces every translated access through the
    /// slow path (the PSX never enables this)
    pub tlb_active: bool,

    gpu: Option<Rc<RefCell<GPU>>>,
    dma: Option<Rc<RefCell<DMA>>>,
    timers: Option<Rc<RefCell<Timers>>>,
    intc: Option<Rc<RefCell<InterruptController>>>,
    cdrom: Option<Rc<RefCell<CDROM>>>,
    sio: Option<Rc<RefCell<Sio>>>,
}

impl Bus {
    /// Main RAM size
    pub const RAM_SIZE: usize = 2 * 1024 * 1024;
    /// BIOS ROM size
    pub const BIOS_SIZE: usize = 512 * 1024;
    /// Scratchpad size
    pub const SCRATCHPAD_SIZE: usize = 1024;

    /// Physical address mask (29-bit), pinned in a register by emitted code
    pub const PHYS_MASK: u32 = 0x1FFF_FFFF;

    /// RAM mirror window: the first 2 MiB repeat up to here
    const RAM_MIRROR_END: u32 = 0x0080_0000;

    const EXP1_START: u32 = 0x1F00_0000;
    const EXP1_END: u32 = 0x1F00_FFFF;
    const IO_START: u32 = 0x1F80_1000;
    const IO_END: u32 = 0x1F80_2FFF;
    const BIOS_START: u32 = 0x1FC0_0000;
    const BIOS_END: u32 = 0x1FC7_FFFF;
    const CACHE_CONTROL: u32 = 0x1FFE_0130;

    const I_STAT: u32 = 0x1F80_1070;
    const I_MASK: u32 = 0x1F80_1074;
    const JOY_FIRST: u32 = 0x1F80_1040;
    const JOY_LAST: u32 = 0x1F80_104F;
    const SIO_FIRST: u32 = 0x1F80_1050;
    const SIO_LAST: u32 = 0x1F80_105F;
    const DMA_FIRST: u32 = 0x1F80_1080;
    const DMA_LAST: u32 = 0x1F80_10FF;
    const TIMER_FIRST: u32 = 0x1F80_1100;
    const TIMER_LAST: u32 = 0x1F80_112F;
    const CDROM_FIRST: u32 = 0x1F80_1800;
    const CDROM_LAST: u32 = 0x1F80_1803;
    const GPU_GP0: u32 = 0x1F80_1810;
    const GPU_GP1: u32 = 0x1F80_1814;
    const SPU_FIRST: u32 = 0x1F80_1C00;
    const SPU_LAST: u32 = 0x1F80_1FFF;

    /// Bus with zeroed memory and a populated page LUT
    pub fn new() -> Self {
        let mut bus = Self {
            ram: vec![0u8; Self::RAM_SIZE],
            scratchpad: [0u8; Self::SCRATCHPAD_SIZE],
            bios: vec![0u8; Self::BIOS_SIZE],
            lut: vec![Page::Slow; 0x1_0000],
            smc: SmcTracker::new(),
            cache_control: 0,
            mem_ctrl: [0u32; 9],
            ram_size_reg: 0,
            spu_regs: [0u16; 0x200],
            fetch_scratch: [0u32; 64],
            tlb_active: false,
            gpu: None,
            dma: None,
            timers: None,
            intc: None,
            cdrom: None,
            sio: None,
        };
        bus.populate_lut();
        bus
    }

    /// Fill the LUT: RAM pages (with mirrors) in all three segments plus
    /// the scratchpad page; everything else stays on the slow path
    fn populate_lut(&mut self) {
        for seg_base in [0x0000u32, 0x8000, 0xA000] {
            // 0x00000000..0x00800000 mirrors the 2 MiB of RAM four times.
            for page in 0..0x80u32 {
                let offset = (page & 0x1F) << 16;
                self.lut[(seg_base + page) as usize] = Page::Ram(offset);
            }
            self.lut[(seg_base + 0x1F80) as usize] = Page::Scratchpad;
        }
    }

    /// LUT lookup for a 64 KiB page index
    #[inline(always)]
    pub fn lut_lookup(&self, page: u16) -> Page {
        self.lut[page as usize]
    }

    pub fn set_gpu(&mut self, gpu: Rc<RefCell<GPU>>) {
        self.gpu = Some(gpu);
    }

    pub fn set_dma(&mut self, dma: Rc<RefCell<DMA>>) {
        self.dma = Some(dma);
    }

    pub fn set_timers(&mut self, timers: Rc<RefCell<Timers>>) {
        self.timers = Some(timers);
    }

    pub fn set_interrupt_controller(&mut self, intc: Rc<RefCell<InterruptController>>) {
        self.intc = Some(intc);
    }

    pub fn set_cdrom(&mut self, cdrom: Rc<RefCell<CDROM>>) {
        self.cdrom = Some(cdrom);
    }

    pub fn set_sio(&mut self, sio: Rc<RefCell<Sio>>) {
        self.sio = Some(sio);
    }

    /// True when an unmasked device interrupt is pending
    pub fn irq_pending(&self) -> bool {
        self.intc
            .as_ref()
            .map(|ic| ic.borrow().pending())
            .unwrap_or(false)
    }

    /// Raise device interrupt bits
    pub fn raise_irq(&mut self, sources: u16) {
        if let Some(ic) = &self.intc {
            ic.borrow_mut().raise(sources);
        }
    }

    /// Direct RAM access for the translator fast path and loaders
    #[inline(always)]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// BIOS ROM bytes (translator instruction fetch)
    #[inline(always)]
    pub fn bios(&self) -> &[u8] {
        &self.bios
    }

    /// I_STAT without the generic dispatch (translator short-circuit)
    pub fn istat(&self) -> u32 {
        self.intc
            .as_ref()
            .map(|ic| ic.borrow().read_status())
            .unwrap_or(0)
    }

    /// I_MASK without the generic dispatch (translator short-circuit)
    pub fn imask(&self) -> u32 {
        self.intc
            .as_ref()
            .map(|ic| ic.borrow().read_mask())
            .unwrap_or(0)
    }

    /// GPUSTAT without the generic dispatch (translator short-circuit)
    pub fn gpustat(&self) -> u32 {
        self.gpu
            .as_ref()
            .map(|g| g.borrow().read_status())
            .unwrap_or(0x1480_2000)
    }

    /// DMA controller handle for the transfer engine
    pub(crate) fn dma_handle(&self) -> Option<Rc<RefCell<DMA>>> {
        self.dma.clone()
    }

    /// Push one word into GP0 (DMA traffic)
    pub(crate) fn gp0_write(&mut self, word: u32) {
        if let Some(gpu) = &self.gpu {
            gpu.borrow_mut().write_gp0(word);
        }
    }

    /// Pop one word from GPUREAD (DMA readback)
    pub(crate) fn gpuread(&mut self) -> u32 {
        self.gpu
            .as_ref()
            .map(|g| g.borrow_mut().read_gpuread())
            .unwrap_or(0)
    }

    /// Mutable RAM access; callers that can contain code must notify
    /// [`SmcTracker`] themselves
    #[inline(always)]
    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// Word read straight from RAM; `offset` must be in range and aligned
    #[inline(always)]
    pub fn ram_word(&self, offset: u32) -> u32 {
        let i = offset as usize;
        u32::from_le_bytes(self.ram[i..i + 4].try_into().unwrap())
    }

    /// Word write straight to RAM, with SMC generation upkeep
    #[inline(always)]
    pub fn ram_set_word(&mut self, offset: u32, value: u32) {
        let i = offset as usize;
        self.ram[i..i + 4].copy_from_slice(&value.to_le_bytes());
        self.smc.notice_write(offset);
    }

    /// Halfword write straight to RAM, with SMC generation upkeep
    #[inline(always)]
    pub fn ram_set_half(&mut self, offset: u32, value: u16) {
        let i = offset as usize;
        self.ram[i..i + 2].copy_from_slice(&value.to_le_bytes());
        self.smc.notice_write(offset);
    }

    /// Byte write straight to RAM, with SMC generation upkeep
    #[inline(always)]
    pub fn ram_set_byte(&mut self, offset: u32, value: u8) {
        self.ram[offset as usize] = value;
        self.smc.notice_write(offset);
    }

    /// Instruction fetch
    ///
    /// RAM and BIOS serve directly. Fetches from the SPU/DMA register
    /// apertures are bounced through a 64-word scratch buffer; no retail
    /// game is known to rely on this, but a diagnostic does.
    pub fn fetch32(&mut self, addr: u32) -> Result<u32> {
        let phys = addr & Self::PHYS_MASK;
        match phys {
            p if p < Self::RAM_MIRROR_END => Ok(self.ram_word(p & 0x001F_FFFF & !3)),
            Self::BIOS_START..=Self::BIOS_END => {
                let off = (phys - Self::BIOS_START) as usize & !3;
                Ok(u32::from_le_bytes(self.bios[off..off + 4].try_into().unwrap()))
            }
            p if (Self::SPU_FIRST..=Self::SPU_LAST).contains(&p)
                || (Self::DMA_FIRST..=Self::DMA_LAST).contains(&p) =>
            {
                let word = self.read32(addr & !3)?;
                self.fetch_scratch[((phys >> 2) & 0x3F) as usize] = word;
                Ok(word)
            }
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "fetch",
            }),
        }
    }

    /// 8-bit read
    pub fn read8(&mut self, addr: u32) -> Result<u8> {
        let phys = addr & Self::PHYS_MASK;
        match self.lut_lookup((addr >> 16) as u16) {
            Page::Ram(base) => {
                return Ok(self.ram[(base | (phys & 0xFFFF)) as usize]);
            }
            Page::Scratchpad if phys & 0xFFFF <= 0x3FF => {
                return Ok(self.scratchpad[(phys & 0x3FF) as usize]);
            }
            _ => {}
        }
        match phys {
            Self::BIOS_START..=Self::BIOS_END => {
                Ok(self.bios[(phys - Self::BIOS_START) as usize])
            }
            Self::EXP1_START..=Self::EXP1_END => Ok(0xFF),
            Self::CDROM_FIRST..=Self::CDROM_LAST => Ok(self.cdrom_read8(phys)),
            Self::IO_START..=Self::IO_END => {
                let word = self.io_read32(addr, phys & !3)?;
                Ok((word >> ((phys & 3) * 8)) as u8)
            }
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "read8",
            }),
        }
    }

    /// 16-bit read; caller guarantees alignment
    pub fn read16(&mut self, addr: u32) -> Result<u16> {
        let phys = addr & Self::PHYS_MASK;
        match self.lut_lookup((addr >> 16) as u16) {
            Page::Ram(base) => {
                let i = (base | (phys & 0xFFFF)) as usize;
                return Ok(u16::from_le_bytes(self.ram[i..i + 2].try_into().unwrap()));
            }
            Page::Scratchpad if phys & 0xFFFF <= 0x3FF => {
                let i = (phys & 0x3FF) as usize;
                return Ok(u16::from_le_bytes(
                    self.scratchpad[i..i + 2].try_into().unwrap(),
                ));
            }
            _ => {}
        }
        match phys {
            Self::BIOS_START..=Self::BIOS_END => {
                let i = (phys - Self::BIOS_START) as usize;
                Ok(u16::from_le_bytes(self.bios[i..i + 2].try_into().unwrap()))
            }
            Self::EXP1_START..=Self::EXP1_END => Ok(0xFFFF),
            Self::SPU_FIRST..=Self::SPU_LAST => {
                Ok(self.spu_regs[((phys - Self::SPU_FIRST) >> 1) as usize])
            }
            Self::IO_START..=Self::IO_END => {
                let word = self.io_read32(addr, phys & !3)?;
                Ok((word >> ((phys & 2) * 8)) as u16)
            }
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "read16",
            }),
        }
    }

    /// 32-bit read; caller guarantees alignment
    pub fn read32(&mut self, addr: u32) -> Result<u32> {
        let phys = addr & Self::PHYS_MASK;
        match self.lut_lookup((addr >> 16) as u16) {
            Page::Ram(base) => return Ok(self.ram_word(base | (phys & 0xFFFF))),
            Page::Scratchpad if phys & 0xFFFF <= 0x3FF => {
                let i = (phys & 0x3FF) as usize;
                return Ok(u32::from_le_bytes(
                    self.scratchpad[i..i + 4].try_into().unwrap(),
                ));
            }
            _ => {}
        }
        match phys {
            Self::BIOS_START..=Self::BIOS_END => {
                let i = (phys - Self::BIOS_START) as usize;
                Ok(u32::from_le_bytes(self.bios[i..i + 4].try_into().unwrap()))
            }
            Self::EXP1_START..=Self::EXP1_END => Ok(0xFFFF_FFFF),
            Self::CACHE_CONTROL => Ok(self.cache_control),
            Self::IO_START..=Self::IO_END => self.io_read32(addr, phys),
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "read32",
            }),
        }
    }

    /// 8-bit write
    pub fn write8(&mut self, addr: u32, value: u8) -> Result<()> {
        let phys = addr & Self::PHYS_MASK;
        match self.lut_lookup((addr >> 16) as u16) {
            Page::Ram(base) => {
                let off = base | (phys & 0xFFFF);
                self.ram[off as usize] = value;
                self.smc.notice_write(off);
                return Ok(());
            }
            Page::Scratchpad if phys & 0xFFFF <= 0x3FF => {
                self.scratchpad[(phys & 0x3FF) as usize] = value;
                return Ok(());
            }
            _ => {}
        }
        match phys {
            Self::CDROM_FIRST..=Self::CDROM_LAST => {
                self.cdrom_write8(phys, value);
                Ok(())
            }
            Self::EXP1_START..=Self::EXP1_END => Ok(()),
            // Expansion region 2 (POST display etc.)
            0x1F80_2000..=0x1F80_2FFF => Ok(()),
            Self::JOY_FIRST..=Self::JOY_LAST | Self::SIO_FIRST..=Self::SIO_LAST => {
                // TX data and control are poked byte-wide; the port keys on
                // the exact register offset.
                if let Some(sio) = &self.sio {
                    sio.borrow_mut().write16(phys, value as u16);
                }
                Ok(())
            }
            Self::IO_START..=Self::IO_END => {
                // Byte pokes into halfword registers widen
                self.io_write32(addr, phys & !3, (value as u32) << ((phys & 3) * 8))
            }
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "write8",
            }),
        }
    }

    /// 16-bit write; caller guarantees alignment
    pub fn write16(&mut self, addr: u32, value: u16) -> Result<()> {
        let phys = addr & Self::PHYS_MASK;
        match self.lut_lookup((addr >> 16) as u16) {
            Page::Ram(base) => {
                let off = base | (phys & 0xFFFF);
                let i = off as usize;
                self.ram[i..i + 2].copy_from_slice(&value.to_le_bytes());
                self.smc.notice_write(off);
                return Ok(());
            }
            Page::Scratchpad if phys & 0xFFFF <= 0x3FF => {
                let i = (phys & 0x3FF) as usize;
                self.scratchpad[i..i + 2].copy_from_slice(&value.to_le_bytes());
                return Ok(());
            }
            _ => {}
        }
        match phys {
            Self::SPU_FIRST..=Self::SPU_LAST => {
                self.spu_regs[((phys - Self::SPU_FIRST) >> 1) as usize] = value;
                Ok(())
            }
            Self::JOY_FIRST..=Self::JOY_LAST | Self::SIO_FIRST..=Self::SIO_LAST => {
                if let Some(sio) = &self.sio {
                    sio.borrow_mut().write16(phys, value);
                }
                Ok(())
            }
            Self::TIMER_FIRST..=Self::TIMER_LAST => {
                if let Some(timers) = &self.timers {
                    timers.borrow_mut().write(phys, value as u32);
                }
                Ok(())
            }
            Self::I_STAT => {
                if let Some(ic) = &self.intc {
                    // Halfword ack must not clear the upper sources.
                    let cur = ic.borrow().read_status();
                    ic.borrow_mut()
                        .write_status((cur & 0xFFFF_0000) | value as u32);
                }
                Ok(())
            }
            Self::I_MASK => {
                if let Some(ic) = &self.intc {
                    ic.borrow_mut().write_mask(value as u32);
                }
                Ok(())
            }
            0x1F80_2000..=0x1F80_2FFF => Ok(()),
            Self::IO_START..=Self::IO_END => {
                // Halfword pokes into word registers widen.
                self.io_write32(addr, phys & !3, (value as u32) << ((phys & 2) * 8))
            }
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "write16",
            }),
        }
    }

    /// 32-bit write; caller guarantees alignment
    pub fn write32(&mut self, addr: u32, value: u32) -> Result<()> {
        let phys = addr & Self::PHYS_MASK;
        match self.lut_lookup((addr >> 16) as u16) {
            Page::Ram(base) => {
                self.ram_set_word(base | (phys & 0xFFFF), value);
                return Ok(());
            }
            Page::Scratchpad if phys & 0xFFFF <= 0x3FF => {
                let i = (phys & 0x3FF) as usize;
                self.scratchpad[i..i + 4].copy_from_slice(&value.to_le_bytes());
                return Ok(());
            }
            _ => {}
        }
        match phys {
            Self::CACHE_CONTROL => {
                self.cache_control = value;
                Ok(())
            }
            Self::IO_START..=Self::IO_END => self.io_write32(addr, phys, value),
            _ => Err(EmulatorError::InvalidMemoryAccess {
                address: addr,
                access: "write32",
            }),
        }
    }

    /// Hardware-register word read dispatch
    fn io_read32(&mut self, addr: u32, phys: u32) -> Result<u32> {
        match phys {
            Self::I_STAT => Ok(self
                .intc
                .as_ref()
                .map(|ic| ic.borrow().read_status())
                .unwrap_or(0)),
            Self::I_MASK => Ok(self
                .intc
                .as_ref()
                .map(|ic| ic.borrow().read_mask())
                .unwrap_or(0)),
            Self::GPU_GP0 => Ok(self
                .gpu
                .as_ref()
                .map(|g| g.borrow_mut().read_gpuread())
                .unwrap_or(0)),
            Self::GPU_GP1 => Ok(self
                .gpu
                .as_ref()
                .map(|g| g.borrow().read_status())
                .unwrap_or(0x1480_2000)),
            Self::JOY_FIRST..=Self::JOY_LAST | Self::SIO_FIRST..=Self::SIO_LAST => Ok(self
                .sio
                .as_ref()
                .map(|s| s.borrow_mut().read32(phys))
                .unwrap_or(0)),
            Self::DMA_FIRST..=Self::DMA_LAST => Ok(self
                .dma
                .as_ref()
                .map(|d| d.borrow().read(phys))
                .unwrap_or(0)),
            Self::TIMER_FIRST..=Self::TIMER_LAST => Ok(self
                .timers
                .as_ref()
                .map(|t| t.borrow_mut().read(phys))
                .unwrap_or(0)),
            Self::CDROM_FIRST..=Self::CDROM_LAST => Ok(self.cdrom_read8(phys) as u32),
            Self::SPU_FIRST..=Self::SPU_LAST => {
                let i = ((phys - Self::SPU_FIRST) >> 1) as usize;
                Ok(self.spu_regs[i] as u32 | ((self.spu_regs[i + 1] as u32) << 16))
            }
            // Memory control block reads back raw
            0x1F80_1000..=0x1F80_1020 => Ok(self.mem_ctrl[((phys - 0x1F80_1000) >> 2) as usize]),
            0x1F80_1060 => Ok(self.ram_size_reg),
            _ => {
                log::debug!("unhandled I/O read at 0x{:08X}", addr);
                Ok(0)
            }
        }
    }

    /// Hardware-register word write dispatch
    fn io_write32(&mut self, addr: u32, phys: u32, value: u32) -> Result<()> {
        match phys {
            Self::I_STAT => {
                if let Some(ic) = &self.intc {
                    ic.borrow_mut().write_status(value);
                }
            }
            Self::I_MASK => {
                if let Some(ic) = &self.intc {
                    ic.borrow_mut().write_mask(value);
                }
            }
            Self::GPU_GP0 => {
                if let Some(gpu) = &self.gpu {
                    gpu.borrow_mut().write_gp0(value);
                }
            }
            Self::GPU_GP1 => {
                if let Some(gpu) = &self.gpu {
                    gpu.borrow_mut().write_gp1(value);
                }
            }
            Self::JOY_FIRST..=Self::JOY_LAST | Self::SIO_FIRST..=Self::SIO_LAST => {
                if let Some(sio) = &self.sio {
                    sio.borrow_mut().write16(phys, value as u16);
                }
            }
            Self::DMA_FIRST..=Self::DMA_LAST => {
                let kicked = self
                    .dma
                    .as_ref()
                    .map(|d| d.borrow_mut().write(phys, value))
                    .unwrap_or(None);
                if let Some(channel) = kicked {
                    self.run_dma(channel);
                }
            }
            Self::TIMER_FIRST..=Self::TIMER_LAST => {
                if let Some(timers) = &self.timers {
                    timers.borrow_mut().write(phys, value);
                }
            }
            Self::SPU_FIRST..=Self::SPU_LAST => {
                let i = ((phys - Self::SPU_FIRST) >> 1) as usize;
                self.spu_regs[i] = value as u16;
                self.spu_regs[i + 1] = (value >> 16) as u16;
            }
            Self::CDROM_FIRST..=Self::CDROM_LAST => self.cdrom_write8(phys, value as u8),
            0x1F80_1000..=0x1F80_1020 => {
                self.mem_ctrl[((phys - 0x1F80_1000) >> 2) as usize] = value;
            }
            0x1F80_1060 => self.ram_size_reg = value,
            _ => log::debug!("unhandled I/O write 0x{:08X} = 0x{:08X}", addr, value),
        }
        Ok(())
    }

    fn cdrom_read8(&mut self, phys: u32) -> u8 {
        self.cdrom
            .as_ref()
            .map(|c| c.borrow_mut().read((phys & 3) as usize))
            .unwrap_or(0)
    }

    fn cdrom_write8(&mut self, phys: u32, value: u8) {
        if let Some(cdrom) = &self.cdrom {
            cdrom.borrow_mut().write((phys & 3) as usize, value);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_mirrors_across_segments() {
        let mut bus = Bus::new();
        bus.write32(0x8000_0000, 0x1234_5678).unwrap();
        assert_eq!(bus.read32(0x0000_0000).unwrap(), 0x1234_5678);
        assert_eq!(bus.read32(0xA000_0000).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_ram_mirrors_within_segment() {
        let mut bus = Bus::new();
        bus.write32(0x0000_0100, 0xCAFE_BABE).unwrap();
        // 2 MiB image repeats through the first 8 MiB.
        assert_eq!(bus.read32(0x0020_0100).unwrap(), 0xCAFE_BABE);
        assert_eq!(bus.read32(0x0060_0100).unwrap(), 0xCAFE_BABE);
    }

    #[test]
    fn test_scratchpad_roundtrip() {
        let mut bus = Bus::new();
        bus.write32(0x1F80_0010, 0xAABB_CCDD).unwrap();
        assert_eq!(bus.read32(0x1F80_0010).unwrap(), 0xAABB_CCDD);
        assert_eq!(bus.read16(0x1F80_0012).unwrap(), 0xAABB);
        assert_eq!(bus.read8(0x1F80_0010).unwrap(), 0xDD);
    }

    #[test]
    fn test_lut_mapping() {
        let bus = Bus::new();
        assert_eq!(bus.lut_lookup(0x0000), Page::Ram(0));
        assert_eq!(bus.lut_lookup(0x0021), Page::Ram(0x0001_0000));
        assert_eq!(bus.lut_lookup(0x8005), Page::Ram(0x0005_0000));
        assert_eq!(bus.lut_lookup(0x1F80), Page::Scratchpad);
        assert_eq!(bus.lut_lookup(0x1FC0), Page::Slow);
        assert_eq!(bus.lut_lookup(0x1F81), Page::Slow);
    }

    #[test]
    fn test_byte_halfword_word_coherence() {
        let mut bus = Bus::new();
        bus.write8(0x100, 0x11).unwrap();
        bus.write8(0x101, 0x22).unwrap();
        bus.write8(0x102, 0x33).unwrap();
        bus.write8(0x103, 0x44).unwrap();
        assert_eq!(bus.read32(0x100).unwrap(), 0x4433_2211);
        assert_eq!(bus.read16(0x102).unwrap(), 0x4433);
    }

    #[test]
    fn test_ram_writes_bump_generation_only_with_blocks() {
        let mut bus = Bus::new();
        let page = 0x1000 >> 12;
        let gen0 = bus.smc.generation(page);
        bus.write32(0x1000, 1).unwrap();
        assert_eq!(bus.smc.generation(page), gen0, "no code on page yet");

        bus.smc.mark_page(page);
        bus.write32(0x1004, 2).unwrap();
        assert_eq!(bus.smc.generation(page), gen0 + 1);
    }

    #[test]
    fn test_spu_registers_read_back() {
        let mut bus = Bus::new();
        bus.write16(0x1F80_1C00, 0xBEEF).unwrap();
        assert_eq!(bus.read16(0x1F80_1C00).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_unmapped_access_is_an_error() {
        let mut bus = Bus::new();
        assert!(bus.read32(0x1F90_0000).is_err());
    }

    #[test]
    fn test_bios_is_not_writable() {
        let mut bus = Bus::new();
        assert!(bus.write32(0xBFC0_0000, 1).is_err());
    }

    #[test]
    fn test_fetch_from_spu_aperture_uses_scratch() {
        let mut bus = Bus::new();
        bus.write16(0x1F80_1C04, 0x1234).unwrap();
        let w = bus.fetch32(0x1F80_1C04).unwrap();
        assert_eq!(w & 0xFFFF, 0x1234);
        assert_eq!(bus.fetch_scratch[1], w, "word latched in the aperture");
    }
}
