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

//! VRAM transfer state machines (GP0 0xA0 / 0xC0 / 0x80)
//!
//! - CPU→VRAM: incoming words carry two pixels each; the shadow takes
//!   them with the guest's mask-set rule (STP forced onto non-zero
//!   pixels) and mask-check rule (destination pixels with STP set are
//!   skipped), the rasterizer gets the same data as an image upload plus
//!   a texture-flush, and an upload crossing column 1024 re-uploads the
//!   wrapped strip from the shadow.
//! - VRAM→CPU: arming the transfer raises the ready-to-send status bit;
//!   GPUREAD then drains two shadow pixels per word.
//! - VRAM↔VRAM: the shadow walks pixel-by-pixel, left-to-right and
//!   top-to-bottom, which smears when the destination overlaps below the
//!   source; when that happens the same walk is replayed over rasterizer
//!   memory so both sides agree.

use super::super::gif::{readback_rect, upload_rect};
use super::super::{Gp0Mode, ReadoutState, UploadState, GPU};

impl GPU {
    /// GP0(0xA0): CPU→VRAM transfer kick (3 words)
    pub(crate) fn gp0_upload_start(&mut self, cmd: &[u32; 16]) {
        let x = cmd[1] & 0x3FF;
        let y = (cmd[1] >> 16) & 0x1FF;
        let w = ((cmd[2] & 0xFFFF).wrapping_sub(1) & 0x3FF) + 1;
        let h = (((cmd[2] >> 16) & 0xFFFF).wrapping_sub(1) & 0x1FF) + 1;

        log::debug!("CPU->VRAM ({}, {}) {}x{}", x, y, w, h);
        self.upload = Some(UploadState {
            x,
            y,
            w,
            h,
            cursor: 0,
            staged: Vec::with_capacity((w * h) as usize),
            masked: self.draw.check_mask,
        });
        self.mode = Gp0Mode::Upload;
    }

    /// One CPU→VRAM data word (two pixels)
    pub(crate) fn upload_word(&mut self, word: u32) {
        let Some(mut up) = self.upload.take() else {
            self.mode = Gp0Mode::Command;
            return;
        };

        for pixel in [word as u16, (word >> 16) as u16] {
            if up.cursor >= up.w * up.h {
                break;
            }
            let x = (up.x + up.cursor % up.w) & 0x3FF;
            let y = (up.y + up.cursor / up.w) & 0x1FF;

            // Mask-set touches only non-zero pixels; zero stays zero.
            let p = if self.draw.set_mask && pixel != 0 {
                pixel | 0x8000
            } else {
                pixel
            };
            if !(self.draw.check_mask && self.vram.read(x, y) & 0x8000 != 0) {
                self.vram.write(x, y, p);
            }
            up.staged.push(p);
            up.cursor += 1;
        }

        if up.cursor >= up.w * up.h {
            self.finish_upload(up);
            self.mode = Gp0Mode::Command;
        } else {
            self.upload = Some(up);
        }
    }

    /// Completion: dirtiness, host image upload, wrap fix-up
    fn finish_upload(&mut self, up: UploadState) {
        self.vram.mark_rect(up.x, up.y, up.w, up.h);

        let main_w = up.w.min(1024 - up.x);
        let main: Vec<u16> = if up.masked {
            // The merge already happened in the shadow; it is the
            // authority for what the rasterizer must now hold.
            self.vram.copy_rect(up.x, up.y, main_w, up.h)
        } else {
            columns(&up.staged, up.w, 0, main_w, up.h)
        };
        upload_rect(
            &mut self.gif,
            &mut self.gs,
            0,
            16,
            up.x,
            up.y,
            main_w,
            up.h,
            &main,
        );

        if main_w < up.w {
            // The extent crossed column 1024: the wrapped strip lands at
            // column 0, re-read from the shadow.
            let strip_w = up.w - main_w;
            let strip = self.vram.copy_rect(0, up.y, strip_w, up.h);
            upload_rect(
                &mut self.gif,
                &mut self.gs,
                0,
                16,
                0,
                up.y,
                strip_w,
                up.h,
                &strip,
            );
        }
        log::debug!("CPU->VRAM complete ({} px)", up.w * up.h);
    }

    /// GP0(0xC0): VRAM→CPU transfer kick (3 words)
    pub(crate) fn gp0_readout_start(&mut self, cmd: &[u32; 16]) {
        let x = cmd[1] & 0x3FF;
        let y = (cmd[1] >> 16) & 0x1FF;
        let w = ((cmd[2] & 0xFFFF).wrapping_sub(1) & 0x3FF) + 1;
        let h = (((cmd[2] >> 16) & 0xFFFF).wrapping_sub(1) & 0x1FF) + 1;
        log::debug!("VRAM->CPU ({}, {}) {}x{}", x, y, w, h);
        self.readout = Some(ReadoutState {
            x,
            y,
            w,
            h,
            cursor: 0,
        });
    }

    /// GP0(0x80): VRAM→VRAM copy (4 words)
    pub(crate) fn gp0_vram_copy(&mut self, cmd: &[u32; 16]) {
        let sx = cmd[1] & 0x3FF;
        let sy = (cmd[1] >> 16) & 0x1FF;
        let dx = cmd[2] & 0x3FF;
        let dy = (cmd[2] >> 16) & 0x1FF;
        let w = ((cmd[3] & 0xFFFF).wrapping_sub(1) & 0x3FF) + 1;
        let h = (((cmd[3] >> 16) & 0xFFFF).wrapping_sub(1) & 0x1FF) + 1;

        log::debug!(
            "VRAM->VRAM ({}, {}) -> ({}, {}) {}x{}",
            sx,
            sy,
            dx,
            dy,
            w,
            h
        );

        // Shadow walk: the destination may be read again as source when
        // the rectangles overlap, which is the hardware's smear.
        for y in 0..h {
            for x in 0..w {
                let p = self.vram.read(sx + x, sy + y);
                let p = if self.draw.set_mask && p != 0 {
                    p | 0x8000
                } else {
                    p
                };
                let tx = (dx + x) & 0x3FF;
                let ty = (dy + y) & 0x1FF;
                if !(self.draw.check_mask && self.vram.read(tx, ty) & 0x8000 != 0) {
                    self.vram.write(tx, ty, p);
                }
            }
        }
        self.vram.mark_rect(dx, dy, w, h);

        // The rasterizer must see the same outcome. A smearing overlap
        // replays the walk over its memory; otherwise the destination
        // rectangle from the shadow is enough.
        let overlap = sx < dx + w && dx < sx + w && sy < dy + h && dy < sy + h;
        if overlap && dy > sy {
            self.replay_smear_on_host(sx, sy, dx, dy, w, h);
        } else {
            let data = self.vram.copy_rect(dx, dy, w, h);
            upload_rect(&mut self.gif, &mut self.gs, 0, 16, dx, dy, w, h, &data);
        }
    }

    /// Read the union rectangle back from the rasterizer, simulate the
    /// pixel walk in scratch memory, and upload the destination
    fn replay_smear_on_host(&mut self, sx: u32, sy: u32, dx: u32, dy: u32, w: u32, h: u32) {
        let ux = sx.min(dx);
        let uy = sy.min(dy);
        let uw = (sx.max(dx) + w) - ux;
        let uh = (sy.max(dy) + h) - uy;

        self.gif.flush_sync(&mut self.gs);
        let mut scratch = readback_rect(&mut self.gif, &mut self.gs, 0, 16, ux, uy, uw, uh);

        let at = |x: u32, y: u32| (y * uw + x) as usize;
        for y in 0..h {
            for x in 0..w {
                let p = scratch[at(sx - ux + x, sy - uy + y)];
                let p = if self.draw.set_mask && p != 0 {
                    p | 0x8000
                } else {
                    p
                };
                let t = at(dx - ux + x, dy - uy + y);
                if !(self.draw.check_mask && scratch[t] & 0x8000 != 0) {
                    scratch[t] = p;
                }
            }
        }

        let mut dst = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                dst.push(scratch[at(dx - ux + x, dy - uy + y)]);
            }
        }
        upload_rect(&mut self.gif, &mut self.gs, 0, 16, dx, dy, w, h, &dst);
    }
}

/// Extract a column range from a row-major staging buffer
fn columns(data: &[u16], stride: u32, from: u32, to: u32, rows: u32) -> Vec<u16> {
    let mut out = Vec::with_capacity(((to - from) * rows) as usize);
    for y in 0..rows {
        let row = (y * stride) as usize;
        out.extend_from_slice(&data[row + from as usize..row + to as usize]);
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::core::gpu::GPU;

    #[test]
    fn test_upload_and_readback_round_trip() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0xA000_0000);
        gpu.write_gp0(0x0064_0064); // (100, 100)
        gpu.write_gp0(0x0002_0002); // 2x2
        gpu.write_gp0(0x7FFF_001F);
        gpu.write_gp0(0x03E0_7C00);

        assert_eq!(gpu.vram.read(100, 100), 0x001F);
        assert_eq!(gpu.vram.read(101, 100), 0x7FFF);
        assert_eq!(gpu.vram.read(100, 101), 0x7C00);
        assert_eq!(gpu.vram.read(101, 101), 0x03E0);

        gpu.write_gp0(0xC000_0000);
        gpu.write_gp0(0x0064_0064);
        gpu.write_gp0(0x0002_0002);
        assert_ne!(gpu.read_status() & (1 << 27), 0, "ready to send");
        assert_eq!(gpu.read_gpuread(), 0x7FFF_001F);
        assert_eq!(gpu.read_gpuread(), 0x03E0_7C00);
        assert_eq!(gpu.read_status() & (1 << 27), 0, "drained");
    }

    #[test]
    fn test_upload_applies_stp_rules() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0xE600_0001); // set-mask
        gpu.write_gp0(0xA000_0000);
        gpu.write_gp0(0x0010_0010); // (16, 16)
        gpu.write_gp0(0x0001_0002); // 2x1

        gpu.write_gp0(0x7FFF_0000);
        // Zero pixels stay zero; non-zero pixels get the STP bit.
        assert_eq!(gpu.vram.read(16, 16), 0x0000);
        assert_eq!(gpu.vram.read(17, 16), 0xFFFF);
    }

    #[test]
    fn test_upload_mask_check_skips_protected_pixels() {
        let mut gpu = GPU::new();
        gpu.vram.write(16, 16, 0x8123);
        gpu.write_gp0(0xE600_0002); // check-mask
        gpu.write_gp0(0xA000_0000);
        gpu.write_gp0(0x0010_0010);
        gpu.write_gp0(0x0001_0002);
        gpu.write_gp0(0x1111_2222);

        assert_eq!(gpu.vram.read(16, 16), 0x8123, "protected pixel kept");
        assert_eq!(gpu.vram.read(17, 16), 0x1111);
    }

    #[test]
    fn test_upload_mirrors_into_rasterizer_memory() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0xA000_0000);
        gpu.write_gp0(0x0008_0008);
        gpu.write_gp0(0x0001_0002);
        gpu.write_gp0(0xBBBB_AAAA);
        gpu.gif.flush(&mut gpu.gs);

        assert_eq!(gpu.gs.local_read(8 * 1024 + 8), 0xAAAA);
        assert_eq!(gpu.gs.local_read(8 * 1024 + 9), 0xBBBB);
    }

    #[test]
    fn test_upload_wrap_reuploads_strip() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0xA000_0000);
        gpu.write_gp0(0x0000_03FE); // x=1022, y=0
        gpu.write_gp0(0x0001_0004); // 4x1: columns 1022,1023,0,1
        gpu.write_gp0(0x2222_1111);
        gpu.write_gp0(0x4444_3333);
        gpu.gif.flush(&mut gpu.gs);

        assert_eq!(gpu.vram.read(1022, 0), 0x1111);
        assert_eq!(gpu.vram.read(0, 0), 0x3333);
        assert_eq!(gpu.gs.local_read(1022), 0x1111);
        assert_eq!(gpu.gs.local_read(0), 0x3333, "wrapped strip re-uploaded");
    }

    #[test]
    fn test_vram_copy_plain() {
        let mut gpu = GPU::new();
        for i in 0..4u16 {
            gpu.vram.write(10 + i as u32, 10, 0x100 + i);
        }
        gpu.write_gp0(0x8000_0000);
        gpu.write_gp0(0x000A_000A); // src (10,10)
        gpu.write_gp0(0x0032_0032); // dst (50,50)
        gpu.write_gp0(0x0001_0004); // 4x1

        for i in 0..4u16 {
            assert_eq!(gpu.vram.read(50 + i as u32, 50), 0x100 + i);
            assert_eq!(gpu.vram.read(10 + i as u32, 10), 0x100 + i);
        }
    }

    #[test]
    fn test_vram_copy_downward_overlap_smears() {
        let mut gpu = GPU::new();
        // One source row of 0xAAAA at y=20; copy (10,20) 4x2 -> (10,21).
        for x in 0..4u32 {
            gpu.vram.write(10 + x, 20, 0xAAAA);
            gpu.vram.write(10 + x, 21, 0x1111);
            gpu.vram.write(10 + x, 22, 0x2222);
        }
        gpu.write_gp0(0x8000_0000);
        gpu.write_gp0(0x0014_000A); // src (10,20)
        gpu.write_gp0(0x0015_000A); // dst (10,21)
        gpu.write_gp0(0x0002_0004); // 4x2

        // Row 21 takes row 20; row 22 then takes the *new* row 21: smear.
        assert_eq!(gpu.vram.read(10, 21), 0xAAAA);
        assert_eq!(gpu.vram.read(10, 22), 0xAAAA);
    }
}
