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

//! GPU register state
//!
//! Environment commands are idempotent: each slot keeps the raw word it
//! was last written with, and the command handlers skip re-emitting host
//! state when the word repeats. The decoded fields sit next to the raw
//! words so the translator never re-parses.

use super::texcache::TexFormat;

/// Drawing environment (GP0 0xE1..0xE6)
#[derive(Debug, Clone, Copy)]
pub struct DrawState {
    /// GP0(0xE1) raw word
    pub mode_raw: u32,
    /// Texture page base column (64-pixel units)
    pub tpage_x: u32,
    /// Texture page base row (256-pixel units)
    pub tpage_y: u32,
    /// Semi-transparency equation (0..=3)
    pub semi_mode: u8,
    /// Texture depth: 0 = 4 bpp, 1 = 8 bpp, 2 = 15 bpp
    pub tex_depth: u8,
    pub dither: bool,
    pub draw_to_display: bool,
    pub tex_disable: bool,
    /// Textured-rectangle flips
    pub rect_flip_x: bool,
    pub rect_flip_y: bool,

    /// GP0(0xE2) raw word
    pub window_raw: u32,
    /// (mask x, mask y, offset x, offset y) in 8-pixel steps
    pub window: (u8, u8, u8, u8),

    /// GP0(0xE3)/GP0(0xE4) raw words
    pub area_tl_raw: u32,
    pub area_br_raw: u32,
    /// Drawing area (x0, y0, x1, y1); the bottom-right edge is exclusive
    /// in the emitted scissor
    pub area: (u16, u16, u16, u16),

    /// GP0(0xE5) raw word
    pub offset_raw: u32,
    /// Signed 11-bit drawing offset
    pub offset: (i16, i16),

    /// GP0(0xE6) raw word
    pub mask_raw: u32,
    /// Force the STP bit on drawn/uploaded pixels
    pub set_mask: bool,
    /// Skip destination pixels whose STP bit is set
    pub check_mask: bool,

    /// CLUT location latched from the last textured primitive
    pub clut_x: u32,
    pub clut_y: u32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            mode_raw: 0,
            tpage_x: 0,
            tpage_y: 0,
            semi_mode: 0,
            tex_depth: 0,
            dither: false,
            draw_to_display: false,
            tex_disable: false,
            rect_flip_x: false,
            rect_flip_y: false,
            window_raw: 0,
            window: (0, 0, 0, 0),
            area_tl_raw: 0,
            area_br_raw: 0,
            area: (0, 0, 1024, 512),
            offset_raw: 0,
            offset: (0, 0),
            mask_raw: 0,
            set_mask: false,
            check_mask: false,
            clut_x: 0,
            clut_y: 0,
        }
    }
}

impl DrawState {
    /// Decode a GP0(0xE1) word (also carried in polygon attribute words)
    pub fn apply_mode_word(&mut self, word: u32) {
        self.mode_raw = word & 0xFFFF;
        self.tpage_x = word & 0xF;
        self.tpage_y = (word >> 4) & 1;
        self.semi_mode = ((word >> 5) & 3) as u8;
        self.tex_depth = ((word >> 7) & 3).min(2) as u8;
        self.dither = word & (1 << 9) != 0;
        self.draw_to_display = word & (1 << 10) != 0;
        self.tex_disable = word & (1 << 11) != 0;
        self.rect_flip_x = word & (1 << 12) != 0;
        self.rect_flip_y = word & (1 << 13) != 0;
    }

    /// Texture format currently selected
    pub fn tex_format(&self) -> TexFormat {
        match self.tex_depth {
            0 => TexFormat::I4,
            1 => TexFormat::I8,
            _ => TexFormat::D16,
        }
    }

    /// Latch a primitive's CLUT attribute halfword
    pub fn apply_clut_word(&mut self, word: u32) {
        let clut = word >> 16;
        self.clut_x = clut & 0x3F;
        self.clut_y = (clut >> 6) & 0x1FF;
    }

    /// Sign-extend the 11-bit drawing-offset fields
    pub fn apply_offset_word(&mut self, word: u32) {
        self.offset_raw = word & 0x003F_FFFF;
        let x = (word & 0x7FF) as i16;
        let y = ((word >> 11) & 0x7FF) as i16;
        self.offset = ((x << 5) >> 5, (y << 5) >> 5);
    }
}

/// Display environment (GP1)
#[derive(Debug, Clone, Copy)]
pub struct DisplayState {
    pub disabled: bool,
    /// DMA direction field (0=off, 1=fifo, 2=CPU→GP0, 3=GPUREAD→CPU)
    pub dma_direction: u8,
    /// Display area start in VRAM
    pub area_start: (u16, u16),
    pub h_range_raw: u32,
    pub v_range_raw: u32,
    /// GP1(0x08) raw word
    pub mode_raw: u32,
    pub pal: bool,
    pub color24: bool,
    pub interlaced: bool,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            disabled: true,
            dma_direction: 0,
            area_start: (0, 0),
            h_range_raw: 0xC00200,
            v_range_raw: 0x040010,
            mode_raw: 0,
            pal: false,
            color24: false,
            interlaced: false,
        }
    }
}
