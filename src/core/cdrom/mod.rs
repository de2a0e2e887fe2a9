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

//! CD-ROM controller
//!
//! The disc layer ([`disc`], [`iso9660`]) does the real work at boot:
//! sector reads and boot-executable extraction. The register file here is
//! the small command/response machine games poll, enough to answer
//! GetStat/GetID-style queries so a booted executable's drive probe
//! settles, with responses delivered through the scheduler's CD-ROM
//! event.

pub mod disc;
pub mod iso9660;

pub use disc::DiscImage;

use std::collections::VecDeque;

/// Command/response port model (0x1F801800..0x1F801803)
pub struct CDROM {
    /// Port 0 index selector (0..=3)
    index: u8,
    params: VecDeque<u8>,
    response: VecDeque<u8>,
    /// INT enable / flag pair (low 3 bits = response interrupt number)
    int_enable: u8,
    int_flag: u8,
    /// A response interrupt is waiting for the scheduler event
    pending: Option<(u8, Vec<u8>)>,
    disc_present: bool,
}

/// Drive status bits
mod stat {
    /// Motor spinning
    pub const MOTOR_ON: u8 = 1 << 1;
    /// Shell open (no disc)
    pub const SHELL_OPEN: u8 = 1 << 4;
}

impl CDROM {
    pub fn new() -> Self {
        Self {
            index: 0,
            params: VecDeque::new(),
            response: VecDeque::new(),
            int_enable: 0,
            int_flag: 0,
            pending: None,
            disc_present: false,
        }
    }

    /// Mark a disc as inserted (the image itself stays with the loader)
    pub fn set_disc_present(&mut self, present: bool) {
        self.disc_present = present;
    }

    fn drive_stat(&self) -> u8 {
        if self.disc_present {
            stat::MOTOR_ON
        } else {
            stat::SHELL_OPEN
        }
    }

    /// Byte-wide register read
    pub fn read(&mut self, reg: usize) -> u8 {
        match reg {
            0 => {
                // Status: index, parameter fifo empty (3) / not full (4),
                // response available (5).
                let mut s = self.index & 3;
                if self.params.is_empty() {
                    s |= 1 << 3;
                }
                if self.params.len() < 16 {
                    s |= 1 << 4;
                }
                if !self.response.is_empty() {
                    s |= 1 << 5;
                }
                s
            }
            1 => self.response.pop_front().unwrap_or(0),
            2 => 0, // data fifo: no streaming reads in the boot path
            3 => match self.index & 1 {
                0 => self.int_enable | 0xE0,
                _ => self.int_flag | 0xE0,
            },
            _ => 0,
        }
    }

    /// Byte-wide register write
    pub fn write(&mut self, reg: usize, value: u8) {
        match (reg, self.index & 3) {
            (0, _) => self.index = value & 3,
            (1, 0) => self.command(value),
            (2, 0) => {
                if self.params.len() < 16 {
                    self.params.push_back(value);
                }
            }
            (2, 1) => self.int_enable = value & 0x1F,
            (3, 1) => {
                // Acknowledge: clear flag bits, drop stale response bytes.
                self.int_flag &= !(value & 0x1F);
                if value & 0x40 != 0 {
                    self.params.clear();
                }
            }
            _ => {}
        }
    }

    /// True when an enabled response interrupt is asserted
    pub fn irq_asserted(&self) -> bool {
        self.int_flag & self.int_enable & 0x7 != 0
    }

    /// Scheduler event: deliver the queued response
    pub fn deliver_pending(&mut self) -> bool {
        if let Some((int, bytes)) = self.pending.take() {
            self.response.clear();
            self.response.extend(bytes);
            self.int_flag = int;
            return self.irq_asserted();
        }
        false
    }

    /// True while a response is queued for delivery
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn queue(&mut self, int: u8, bytes: &[u8]) {
        self.pending = Some((int, bytes.to_vec()));
    }

    fn command(&mut self, op: u8) {
        let stat = self.drive_stat();
        self.params.clear();
        match op {
            // GetStat
            0x01 => self.queue(3, &[stat]),
            // Setloc/SeekL/SetMode and friends: acknowledge and move on.
            0x02 | 0x0D | 0x0E | 0x15 | 0x16 => self.queue(3, &[stat]),
            // Init
            0x0A => self.queue(2, &[stat, stat]),
            // GetID
            0x1A => {
                if self.disc_present {
                    self.queue(2, &[0x02, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'A']);
                } else {
                    self.queue(5, &[0x08, 0x40, 0, 0, 0, 0, 0, 0]);
                }
            }
            // Test (0x20 sub-function: BIOS date)
            0x19 => self.queue(3, &[0x94, 0x09, 0x19, 0xC0]),
            other => {
                log::debug!("CDROM command 0x{:02X} not implemented", other);
                self.queue(5, &[stat | 1, 0x40]);
            }
        }
    }
}

impl Default for CDROM {
    fn default() -> Self {
        Self::new()
    }
}
