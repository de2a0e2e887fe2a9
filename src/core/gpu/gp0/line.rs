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

//! GP0 line commands (0x40..0x5F)
//!
//! A line command carries its first segment inline; the polyline variants
//! then keep consuming vertex (or colour+vertex) words until the
//! 0x5000_5000 terminator pattern.

use super::super::translate::PVertex;
use super::super::{Gp0Mode, GPU};

/// Terminator: 0x5000_5000 in the low halves of a word pair
#[inline(always)]
fn is_terminator(word: u32) -> bool {
    word & 0xF000_F000 == 0x5000_5000
}

impl GPU {
    pub(crate) fn gp0_line(&mut self, cmd: &[u32; 16]) {
        let op = cmd[0] >> 24;
        let shaded = op & 0x10 != 0;
        let semi = op & 0x02 != 0;
        let polyline = op & 0x08 != 0;

        let c0 = cmd[0] & 0xFF_FFFF;
        let (c1, v0_word, v1_word) = if shaded {
            (cmd[2] & 0xFF_FFFF, cmd[1], cmd[3])
        } else {
            (c0, cmd[1], cmd[2])
        };

        let a = PVertex::at(v0_word, self.draw.offset, c0);
        let b = PVertex::at(v1_word, self.draw.offset, c1);
        self.draw_line_seg(a, b, shaded, semi);

        if polyline {
            self.poly_prev = b;
            self.poly_color = c0;
            self.mode = Gp0Mode::Polyline {
                shaded,
                semi,
                want_color: shaded,
            };
        }
    }

    /// One word of polyline continuation
    pub(crate) fn polyline_word(&mut self, word: u32, shaded: bool, semi: bool, want_color: bool) {
        if is_terminator(word) {
            self.mode = Gp0Mode::Command;
            return;
        }

        if shaded && want_color {
            self.poly_pending_color = word & 0xFF_FFFF;
            self.mode = Gp0Mode::Polyline {
                shaded,
                semi,
                want_color: false,
            };
            return;
        }

        let color = if shaded {
            self.poly_pending_color
        } else {
            self.poly_color
        };
        let next = PVertex::at(word, self.draw.offset, color);
        let prev = self.poly_prev;
        self.draw_line_seg(prev, next, shaded, semi);
        self.poly_prev = next;
        if shaded {
            self.mode = Gp0Mode::Polyline {
                shaded,
                semi,
                want_color: true,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::gpu::GPU;

    #[test]
    fn test_single_line_segment() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0x4000_FFFF); // flat opaque line
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0010_0010);
        gpu.gif.flush(&mut gpu.gs);
        assert_eq!(gpu.gs.stats.lines, 1);
    }

    #[test]
    fn test_flat_polyline_until_terminator() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0x4800_FFFF); // flat polyline
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0010_0010); // first segment
        gpu.write_gp0(0x0020_0020); // second segment
        gpu.write_gp0(0x0030_0000); // third segment
        gpu.write_gp0(0x5000_5000); // terminator
        gpu.write_gp0(0x0100_0000); // back in command mode: a nop
        gpu.gif.flush(&mut gpu.gs);
        assert_eq!(gpu.gs.stats.lines, 3);
    }

    #[test]
    fn test_shaded_polyline_consumes_color_vertex_pairs() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0x5800_00FF); // shaded polyline
        gpu.write_gp0(0x0000_0000); // v0
        gpu.write_gp0(0x0000_FF00); // c1
        gpu.write_gp0(0x0010_0010); // v1
        gpu.write_gp0(0x00FF_0000); // c2
        gpu.write_gp0(0x0020_0020); // v2
        gpu.write_gp0(0x5000_5000);
        gpu.gif.flush(&mut gpu.gs);
        assert_eq!(gpu.gs.stats.lines, 2);
    }

    #[test]
    fn test_terminator_restores_command_mode() {
        let mut gpu = GPU::new();
        gpu.write_gp0(0x4800_FFFF);
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0010_0010);
        gpu.write_gp0(0x0040_0040); // still a vertex
        gpu.write_gp0(0x5000_5000);

        // A fill command must now execute normally.
        gpu.write_gp0(0x02_0000FF);
        gpu.write_gp0(0x0000_0000);
        gpu.write_gp0(0x0001_0010);
        assert_eq!(gpu.vram.read(0, 0), 0x001F);
    }
}
