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

//! GPU command translator
//!
//! Consumes the guest's GP0/GP1 command stream and turns it into work for
//! the host rasterizer: drawing primitives become GIF packets, transfers
//! run through per-command state machines, and a shadow of guest VRAM
//! stays authoritative for decode and readback.
//!
//! Command sizes are fixed by the opcode byte (polygons 4–12 words by
//! their textured/shaded/quad flags, rectangles 2–4, lines 3–4 with the
//! polyline continuation, transfers 3/3/4); multi-word commands accumulate
//! in a 16-word buffer before dispatch. Environment commands cache their
//! last raw word and skip host-state re-emission when unchanged.

use crate::core::timing::TickCount;

pub mod gif;
pub mod gs;
pub mod registers;
pub mod texcache;
pub mod translate;
pub mod vram;

mod gp0;
mod gp1;

pub use registers::{DisplayState, DrawState};
pub use texcache::TexFormat;

use gif::GifBatcher;
use gs::Gs;
use texcache::TextureCache;
use translate::PVertex;
use vram::VramShadow;

/// CPU↔VRAM transfer state machine
#[derive(Debug, Clone)]
pub(crate) struct UploadState {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Halfwords received so far
    pub cursor: u32,
    /// Pixels staged for the rasterizer upload (streaming path)
    pub staged: Vec<u16>,
    /// Mask-check was active at kick time: the staged data is replaced by
    /// a shadow re-read at completion
    pub masked: bool,
}

/// VRAM→CPU readback state machine
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadoutState {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub cursor: u32,
}

/// GP0 word-stream interpretation mode
#[derive(Debug, Clone, Copy)]
pub(crate) enum Gp0Mode {
    /// Accumulating command words
    Command,
    /// Words are CPU→VRAM pixel data
    Upload,
    /// Words continue a polyline until the terminator
    Polyline {
        shaded: bool,
        semi: bool,
        /// Colour arrives before the vertex in shaded mode
        want_color: bool,
    },
}

/// The GPU: command FIFO, shadow VRAM, texture cache, GIF batcher and the
/// rasterizer backend
pub struct GPU {
    pub(crate) vram: VramShadow,
    pub(crate) draw: DrawState,
    pub(crate) disp: DisplayState,
    pub(crate) texcache: TextureCache,
    pub(crate) gif: GifBatcher,
    pub(crate) gs: Gs,

    /// Current command accumulation buffer
    cmd: [u32; 16],
    cmd_len: usize,
    cmd_need: usize,
    pub(crate) mode: Gp0Mode,

    pub(crate) upload: Option<UploadState>,
    pub(crate) readout: Option<ReadoutState>,

    /// Previous polyline vertex and colour
    pub(crate) poly_prev: PVertex,
    pub(crate) poly_color: u32,
    pub(crate) poly_pending_color: u32,

    /// GPUREAD latch for GP1(0x10) info queries
    read_latch: u32,
    /// GP0(0x1F) interrupt flag (GPUSTAT bit 24)
    irq: bool,
    /// Interlace odd/even
    odd_line: bool,
    /// Frames completed (VBlank count)
    pub frames: u64,
}

/// GPU clock cycles per frame (NTSC), in CPU-cycle units
pub const CYCLES_PER_FRAME: TickCount = 564_480;

impl GPU {
    pub fn new() -> Self {
        let mut gpu = Self {
            vram: VramShadow::new(),
            draw: DrawState::default(),
            disp: DisplayState::default(),
            texcache: TextureCache::new(),
            gif: GifBatcher::new(),
            gs: Gs::new(),
            cmd: [0; 16],
            cmd_len: 0,
            cmd_need: 0,
            mode: Gp0Mode::Command,
            upload: None,
            readout: None,
            poly_prev: PVertex::default(),
            poly_color: 0,
            poly_pending_color: 0,
            read_latch: 0,
            irq: false,
            odd_line: false,
            frames: 0,
        };
        gpu.emit_initial_env();
        gpu
    }

    /// Hardware reset (GP1 0x00 preserves VRAM; power-on clears it too)
    pub fn reset(&mut self) {
        self.vram.clear();
        self.reset_state();
    }

    pub(crate) fn reset_state(&mut self) {
        self.draw = DrawState::default();
        self.disp = DisplayState::default();
        self.texcache.clear();
        self.cmd_len = 0;
        self.cmd_need = 0;
        self.mode = Gp0Mode::Command;
        self.upload = None;
        self.readout = None;
        self.irq = false;
        self.emit_initial_env();
    }

    /// GP0 write: drawing and transfer commands
    pub fn write_gp0(&mut self, word: u32) {
        match self.mode {
            Gp0Mode::Upload => self.upload_word(word),
            Gp0Mode::Polyline { shaded, semi, want_color } => {
                self.polyline_word(word, shaded, semi, want_color)
            }
            Gp0Mode::Command => {
                if self.cmd_len == 0 {
                    self.cmd_need = command_words(word >> 24);
                }
                self.cmd[self.cmd_len] = word;
                self.cmd_len += 1;
                if self.cmd_len >= self.cmd_need {
                    self.cmd_len = 0;
                    self.execute_gp0();
                }
            }
        }
    }

    /// GP1 write: control and display
    pub fn write_gp1(&mut self, word: u32) {
        self.execute_gp1(word);
    }

    /// GPUREAD: transfer data or the info latch
    pub fn read_gpuread(&mut self) -> u32 {
        if let Some(mut rd) = self.readout.take() {
            let mut word = 0u32;
            for half in 0..2 {
                let x = rd.x + (rd.cursor % rd.w);
                let y = rd.y + (rd.cursor / rd.w);
                word |= (self.vram.read(x, y) as u32) << (half * 16);
                rd.cursor += 1;
                if rd.cursor >= rd.w * rd.h {
                    break;
                }
            }
            if rd.cursor < rd.w * rd.h {
                self.readout = Some(rd);
            }
            return word;
        }
        self.read_latch
    }

    /// GPUSTAT
    pub fn read_status(&self) -> u32 {
        let mut s = self.draw.mode_raw & 0x7FF;
        s |= (self.draw.set_mask as u32) << 11;
        s |= (self.draw.check_mask as u32) << 12;
        s |= 1 << 13;
        s |= (self.draw.tex_disable as u32) << 15;

        // GP1(0x08) fields fan out over bits 16..22.
        let m = self.disp.mode_raw;
        s |= ((m >> 6) & 1) << 16;
        s |= (m & 3) << 17;
        s |= ((m >> 2) & 1) << 19;
        s |= ((m >> 3) & 1) << 20;
        s |= ((m >> 4) & 1) << 21;
        s |= ((m >> 5) & 1) << 22;

        s |= (self.disp.disabled as u32) << 23;
        s |= (self.irq as u32) << 24;

        // Ready flags: always ready for commands and DMA blocks; ready to
        // send only while a readback is armed.
        s |= 1 << 26;
        s |= (self.readout.is_some() as u32) << 27;
        s |= 1 << 28;
        s |= (self.disp.dma_direction as u32) << 29;

        // Bit 25 reflects the selected DMA request line.
        let dma_req = match self.disp.dma_direction {
            2 => 1,
            3 => (self.readout.is_some()) as u32,
            _ => 0,
        };
        s |= dma_req << 25;

        s |= ((self.odd_line && !self.disp.interlaced) as u32) << 31;
        s
    }

    /// End-of-frame hook driven by the scheduler's VBlank event
    pub fn vblank(&mut self) {
        self.gif.flush(&mut self.gs);
        self.frames += 1;
        self.odd_line = !self.odd_line;
    }

    /// Take the GP0(0x1F) interrupt flag (edge to the controller)
    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq)
    }

    pub(crate) fn set_irq(&mut self) {
        self.irq = true;
    }

    pub(crate) fn ack_irq(&mut self) {
        self.irq = false;
    }

    pub(crate) fn set_read_latch(&mut self, value: u32) {
        self.read_latch = value;
    }

    /// Shadow VRAM pixels (display scan-out, debug dump)
    pub fn vram_pixels(&self) -> &[u16] {
        self.vram.pixels()
    }

    /// Dispatch one complete GP0 command from the accumulation buffer
    fn execute_gp0(&mut self) {
        let cmd = self.cmd;
        let op = cmd[0] >> 24;
        match op {
            0x00 | 0x04..=0x1E => {} // no-ops and reserved
            0x01 => self.texcache.clear(),
            0x02 => self.gp0_fill_rect(&cmd),
            0x1F => self.set_irq(),
            0x20..=0x3F => self.gp0_polygon(&cmd),
            0x40..=0x5F => self.gp0_line(&cmd),
            0x60..=0x7F => self.gp0_rectangle(&cmd),
            0x80..=0x9F => self.gp0_vram_copy(&cmd),
            0xA0..=0xBF => self.gp0_upload_start(&cmd),
            0xC0..=0xDF => self.gp0_readout_start(&cmd),
            0xE0..=0xFF => self.gp0_environment(&cmd),
            _ => {} // unreachable (op is cmd[0] >> 24, so 0x00..=0xFF); 0x03 is reserved, treated as a no-op like command_words' `_ => 1`
        }
    }
}

impl Default for GPU {
    fn default() -> Self {
        Self::new()
    }
}

/// Words a GP0 command occupies, by opcode byte
pub(crate) fn command_words(op: u32) -> usize {
    match op {
        0x02 => 3,
        0x20..=0x3F => {
            let quad = op & 0x08 != 0;
            let textured = op & 0x04 != 0;
            let shaded = op & 0x10 != 0;
            let n = if quad { 4 } else { 3 };
            1 + n + if textured { n } else { 0 } + if shaded { n - 1 } else { 0 }
        }
        0x40..=0x5F => {
            // Initial segment; polyline variants keep consuming words
            // until the terminator.
            if op & 0x10 != 0 {
                4
            } else {
                3
            }
        }
        0x60..=0x7F => {
            let textured = op & 0x04 != 0;
            let variable = op & 0x18 == 0;
            2 + textured as usize + variable as usize
        }
        0x80..=0x9F => 4,
        0xA0..=0xBF | 0xC0..=0xDF => 3,
        _ => 1,
    }
}
