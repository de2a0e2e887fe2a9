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

//! GP1 control commands
//!
//! Display plumbing and resets. Display registers cache their raw words
//! like the GP0 environment does; GP1(0x10) latches drawing-state words
//! into the GPUREAD port.

use super::GPU;

impl GPU {
    pub(crate) fn execute_gp1(&mut self, word: u32) {
        match (word >> 24) & 0x3F {
            0x00 => {
                // Reset everything except VRAM contents.
                self.reset_state();
            }
            0x01 => {
                // Command buffer reset.
                self.upload = None;
                self.readout = None;
                self.mode = super::Gp0Mode::Command;
            }
            0x02 => self.ack_irq(),
            0x03 => self.disp.disabled = word & 1 != 0,
            0x04 => self.disp.dma_direction = (word & 3) as u8,
            0x05 => {
                self.disp.area_start = ((word & 0x3FF) as u16, ((word >> 10) & 0x1FF) as u16);
            }
            0x06 => self.disp.h_range_raw = word & 0xFF_FFFF,
            0x07 => self.disp.v_range_raw = word & 0xF_FFFF,
            0x08 => {
                self.disp.mode_raw = word & 0xFF;
                self.disp.pal = word & (1 << 3) != 0;
                self.disp.color24 = word & (1 << 4) != 0;
                self.disp.interlaced = word & (1 << 5) != 0;
            }
            0x10..=0x1F => self.gp1_info(word),
            other => log::debug!("unhandled GP1 command 0x{:02X}", other),
        }
    }

    /// GP1(0x10): latch internal state into GPUREAD
    fn gp1_info(&mut self, word: u32) {
        let latch = match word & 0xF {
            0x02 => self.draw.window_raw,
            0x03 => self.draw.area_tl_raw,
            0x04 => self.draw.area_br_raw,
            0x05 => self.draw.offset_raw,
            0x07 => 2, // GPU version
            0x08 => 0,
            // Other selectors keep the previous latch.
            _ => return,
        };
        self.set_read_latch(latch);
    }
}

#[cfg(test)]
mod tests {
    use super::super::GPU;

    #[test]
    fn test_display_enable_reflects_in_status() {
        let mut gpu = GPU::new();
        assert_ne!(gpu.read_status() & (1 << 23), 0, "disabled at reset");
        gpu.write_gp1(0x0300_0000);
        assert_eq!(gpu.read_status() & (1 << 23), 0);
    }

    #[test]
    fn test_reset_preserves_vram() {
        let mut gpu = GPU::new();
        gpu.vram.write(5, 5, 0x1234);
        gpu.write_gp1(0x0000_0000);
        assert_eq!(gpu.vram.read(5, 5), 0x1234);
    }

    #[test]
    fn test_info_latches_drawing_offset() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0xE500_0000 | (20 << 11) | 10);
        gpu.write_gp1(0x1000_0005);
        assert_eq!(gpu.read_gpuread(), (20 << 11) | 10);
    }

    #[test]
    fn test_irq_flag_set_and_acknowledged() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0x1F00_0000);
        assert_ne!(gpu.read_status() & (1 << 24), 0);
        gpu.write_gp1(0x0200_0000);
        assert_eq!(gpu.read_status() & (1 << 24), 0);
    }

    #[test]
    fn test_display_mode_bits_in_status() {
        let mut gpu = GPU::new();
        gpu.write_gp1(0x0800_0008); // PAL
        let s = gpu.read_status();
        assert_ne!(s & (1 << 20), 0);
    }
}
