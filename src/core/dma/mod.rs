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

//! DMA controller
//!
//! Seven channels with MADR/BCR/CHCR each, plus DPCR (per-channel enable
//! and priority) and DICR (interrupt aggregation). Channel 2 feeds the
//! GPU (block mode for VRAM data, linked-list mode for command chains)
//! and channel 6 builds the ordering-table clear list. Transfers run to
//! completion at the register write that kicks them; the bus drives the
//! actual word traffic.

use bitflags::bitflags;

use crate::core::error::Result;
use crate::core::interrupt::irq;
use crate::core::memory::Bus;

bitflags! {
    /// Channel control (CHCR) bits the controller acts on
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Chcr: u32 {
        /// Transfer direction: set = from RAM
        const FROM_RAM = 1 << 0;
        /// Address step: set = backward
        const BACKWARD = 1 << 1;
        /// Transfer start/busy
        const ENABLE = 1 << 24;
        /// Manual trigger (sync mode 0)
        const TRIGGER = 1 << 28;
    }
}

/// One DMA channel register file
#[derive(Debug, Clone, Copy, Default)]
pub struct Channel {
    /// Base address (MADR)
    pub base: u32,
    /// Block control (BCR)
    pub block: u32,
    /// Channel control (CHCR)
    pub control: u32,
}

impl Channel {
    fn chcr(&self) -> Chcr {
        Chcr::from_bits_truncate(self.control)
    }

    fn sync_mode(&self) -> u32 {
        (self.control >> 9) & 3
    }

    /// Total words for block transfers
    fn word_count(&self) -> u32 {
        match self.sync_mode() {
            0 => {
                let n = self.block & 0xFFFF;
                if n == 0 {
                    0x1_0000
                } else {
                    n
                }
            }
            _ => {
                let size = self.block & 0xFFFF;
                let count = self.block >> 16;
                size * count.max(1)
            }
        }
    }

    fn finish(&mut self) {
        self.control &= !(Chcr::ENABLE | Chcr::TRIGGER).bits();
    }
}

/// The controller: channels plus DPCR/DICR
pub struct DMA {
    channels: [Channel; 7],
    /// DPCR
    control: u32,
    /// DICR
    interrupt: u32,
}

/// GPU channel index
pub const CH_GPU: usize = 2;
/// Ordering-table clear channel index
pub const CH_OTC: usize = 6;

impl DMA {
    pub fn new() -> Self {
        Self {
            channels: [Channel::default(); 7],
            // Hardware reset priority layout.
            control: 0x0765_4321,
            interrupt: 0,
        }
    }

    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    /// Register read (word)
    pub fn read(&self, phys: u32) -> u32 {
        match phys {
            0x1F80_10F0 => self.control,
            0x1F80_10F4 => self.interrupt,
            _ => {
                let ch = ((phys - 0x1F80_1080) >> 4) as usize;
                if ch >= 7 {
                    return 0;
                }
                match phys & 0xF {
                    0x0 => self.channels[ch].base,
                    0x4 => self.channels[ch].block,
                    0x8 => self.channels[ch].control,
                    _ => 0,
                }
            }
        }
    }

    /// Register write; returns the channel to run when the write kicks a
    /// transfer
    pub fn write(&mut self, phys: u32, value: u32) -> Option<usize> {
        match phys {
            0x1F80_10F0 => {
                self.control = value;
                None
            }
            0x1F80_10F4 => {
                // Flag bits (24-30) are write-1-to-clear; the rest latch.
                let ack = value & 0x7F00_0000;
                let flags = self.interrupt & 0x7F00_0000 & !ack;
                self.interrupt = flags | (value & 0x00FF_803F);
                self.update_master_flag();
                None
            }
            _ => {
                let ch = ((phys - 0x1F80_1080) >> 4) as usize;
                if ch >= 7 {
                    return None;
                }
                match phys & 0xF {
                    0x0 => self.channels[ch].base = value & 0x00FF_FFFC,
                    0x4 => self.channels[ch].block = value,
                    0x8 => {
                        self.channels[ch].control = value;
                        if self.channel_ready(ch) {
                            return Some(ch);
                        }
                    }
                    _ => {}
                }
                None
            }
        }
    }

    fn channel_ready(&self, ch: usize) -> bool {
        let c = &self.channels[ch];
        let enabled_in_dpcr = self.control & (8 << (ch * 4)) != 0;
        let started = c.chcr().contains(Chcr::ENABLE)
            && (c.sync_mode() != 0 || c.chcr().contains(Chcr::TRIGGER));
        enabled_in_dpcr && started
    }

    /// Book transfer completion: clear busy, latch the channel's DICR flag
    ///
    /// Returns true when the aggregated interrupt line rises.
    pub fn complete(&mut self, ch: usize) -> bool {
        self.channels[ch].finish();

        let enable = self.interrupt & (1 << (16 + ch)) != 0;
        let master = self.interrupt & (1 << 23) != 0;
        let was = self.master_flag();
        if enable {
            self.interrupt |= 1 << (24 + ch);
        }
        self.update_master_flag();
        master && !was && self.master_flag()
    }

    fn master_flag(&self) -> bool {
        let force = self.interrupt & (1 << 15) != 0;
        let master = self.interrupt & (1 << 23) != 0;
        let flags = (self.interrupt >> 24) & 0x7F;
        let enable = (self.interrupt >> 16) & 0x7F;
        force || (master && (flags & enable) != 0)
    }

    fn update_master_flag(&mut self) {
        if self.master_flag() {
            self.interrupt |= 1 << 31;
        } else {
            self.interrupt &= !(1 << 31);
        }
    }
}

impl Default for DMA {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Execute a kicked DMA transfer to completion
    ///
    /// Runs at the CHCR write, which is a dispatch boundary: no translated
    /// code is executing and the devices are quiescent.
    pub(crate) fn run_dma(&mut self, ch: usize) {
        let result = match ch {
            CH_GPU => self.dma_gpu(),
            CH_OTC => self.dma_otc(),
            other => {
                log::debug!("DMA channel {} kicked; no device bound", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("DMA channel {} fault: {}", ch, e);
        }

        if let Some(dma) = self.dma_handle() {
            let raise = dma.borrow_mut().complete(ch);
            if raise {
                self.raise_irq(irq::DMA);
            }
        }
    }

    fn dma_gpu(&mut self) -> Result<()> {
        let Some(dma) = self.dma_handle() else {
            return Ok(());
        };
        let (chcr, sync, mut addr, words) = {
            let d = dma.borrow();
            let c = d.channel(CH_GPU);
            (c.chcr(), c.sync_mode(), c.base, c.word_count())
        };

        match sync {
            // Linked list: command chains into GP0.
            2 => {
                let mut guard = 0x10_0000;
                loop {
                    let header = self.ram_word(addr & 0x001F_FFFC);
                    let count = header >> 24;
                    for i in 0..count {
                        let word = self.ram_word((addr + 4 + i * 4) & 0x001F_FFFC);
                        self.gp0_write(word);
                    }
                    addr = header & 0x00FF_FFFF;
                    if addr & 0x0080_0000 != 0 {
                        break;
                    }
                    guard -= 1;
                    if guard == 0 {
                        log::warn!("GPU DMA linked list did not terminate");
                        break;
                    }
                }
            }
            // Block transfers both ways.
            _ => {
                let step: i64 = if chcr.contains(Chcr::BACKWARD) { -4 } else { 4 };
                if chcr.contains(Chcr::FROM_RAM) {
                    for _ in 0..words {
                        let word = self.ram_word((addr & 0x001F_FFFC) as u32);
                        self.gp0_write(word);
                        addr = (addr as i64 + step) as u32;
                    }
                } else {
                    for _ in 0..words {
                        let word = self.gpuread();
                        self.ram_set_word(addr & 0x001F_FFFC, word);
                        addr = (addr as i64 + step) as u32;
                    }
                }
            }
        }
        Ok(())
    }

    /// Channel 6: build the reverse ordering-table list
    fn dma_otc(&mut self) -> Result<()> {
        let Some(dma) = self.dma_handle() else {
            return Ok(());
        };
        let (mut addr, words) = {
            let d = dma.borrow();
            let c = d.channel(CH_OTC);
            (c.base, c.word_count())
        };

        for i in 0..words {
            let value = if i == words - 1 {
                0x00FF_FFFF
            } else {
                addr.wrapping_sub(4) & 0x001F_FFFF
            };
            self.ram_set_word(addr & 0x001F_FFFC, value);
            addr = addr.wrapping_sub(4);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kick_requires_dpcr_enable() {
        let mut dma = DMA::new();
        // DPCR reset value has the enable bits clear.
        assert_eq!(dma.write(0x1F80_10A8, 0x0100_0000), None);

        // Set channel 2's enable bit in its DPCR nibble.
        dma.write(0x1F80_10F0, 0x0765_4B21);
        assert_eq!(dma.write(0x1F80_10A8, 0x0100_0200), Some(2));
    }

    #[test]
    fn test_sync0_needs_trigger() {
        let mut dma = DMA::new();
        dma.write(0x1F80_10F0, 0x0880_0000 | 0x0765_4321);
        assert_eq!(dma.write(0x1F80_10E8, 0x0100_0000), None, "no trigger");
        assert_eq!(dma.write(0x1F80_10E8, 0x1100_0000), Some(6));
    }

    #[test]
    fn test_completion_latches_dicr_flag() {
        let mut dma = DMA::new();
        // Enable channel 2 interrupts plus the master enable.
        dma.write(0x1F80_10F4, (1 << 23) | (1 << 18));
        let rising = dma.complete(2);
        assert!(rising);
        assert_ne!(dma.read(0x1F80_10F4) & (1 << 26), 0);
        assert_ne!(dma.read(0x1F80_10F4) & (1 << 31), 0);

        // Acknowledge the flag.
        dma.write(0x1F80_10F4, (1 << 23) | (1 << 18) | (1 << 26));
        assert_eq!(dma.read(0x1F80_10F4) & (1 << 26), 0);
    }

    #[test]
    fn test_word_count_block_mode() {
        let mut ch = Channel {
            block: 0x0004_0010, // 4 blocks of 16
            control: 1 << 9,    // sync mode 1
            ..Default::default()
        };
        assert_eq!(ch.word_count(), 64);

        ch.control = 0;
        ch.block = 0;
        assert_eq!(ch.word_count(), 0x1_0000, "0 means 64K in sync 0");
    }
}
