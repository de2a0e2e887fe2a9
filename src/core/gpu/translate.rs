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

//! Primitive translation: guest primitives to rasterizer packets
//!
//! Vertices arrive as signed guest coordinates (drawing offset already
//! applied) and leave as 12.4 fixed-point window coordinates biased by
//! 2048 so negative guest positions stay positive. Colour is 24-bit RGB
//! with a fixed 0x80 source alpha and Q = 1.0.
//!
//! Shapes:
//! - triangles and quads (two triangles sharing an edge) as one packed
//!   primitive per polygon;
//! - axis-aligned textured quads promote to a single SPRITE, avoiding the
//!   diagonal UV seam a triangulated interpolation would produce;
//! - textured rectangles split at the 256-texel wrap (one or two
//!   SPRITEs), and fall to float-ST REPEAT addressing when the 15-bit
//!   page runs past VRAM column 1024;
//! - fill-rectangle widens the scissor to the whole framebuffer for the
//!   duration of one sprite, then restores it.

use super::gif::reg;
use super::texcache::{TexFormat, TexKey, TexTarget};
use super::GPU;

/// Bias keeping negative guest coordinates positive in window space
pub const COORD_BIAS: i32 = 2048;

/// Semi-transparency mode 0 source factor: 88/128 ≈ 0.69 rather than the
/// textbook half, calibrated against reference screenshots. Keep it.
pub const FIX_ALPHA_HALF: u8 = 0x58;

/// IEEE-754 1.0, the fixed Q attached to every vertex
const Q_ONE: u32 = 0x3F80_0000;

/// A translated vertex before packing
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PVertex {
    pub x: i32,
    pub y: i32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub u: u8,
    pub v: u8,
}

impl PVertex {
    /// Decode a position word relative to the drawing offset
    pub(crate) fn at(word: u32, offset: (i16, i16), color: u32) -> Self {
        let x = ((word & 0x7FF) as i16) << 5 >> 5;
        let y = (((word >> 16) & 0x7FF) as i16) << 5 >> 5;
        Self {
            x: x as i32 + offset.0 as i32,
            y: y as i32 + offset.1 as i32,
            r: color as u8,
            g: (color >> 8) as u8,
            b: (color >> 16) as u8,
            u: 0,
            v: 0,
        }
    }

    pub(crate) fn with_uv(mut self, word: u32) -> Self {
        self.u = word as u8;
        self.v = (word >> 8) as u8;
        self
    }
}

fn xyz_word(x: i32, y: i32) -> u64 {
    let fx = (((x + COORD_BIAS) << 4) as u32 & 0xFFFF) as u64;
    let fy = (((y + COORD_BIAS) << 4) as u32 & 0xFFFF) as u64;
    fx | (fy << 16)
}

fn rgbaq_word(r: u8, g: u8, b: u8) -> u64 {
    (r as u64) | ((g as u64) << 8) | ((b as u64) << 16) | (0x80u64 << 24) | ((Q_ONE as u64) << 32)
}

fn uv_word(u: i32, v: i32) -> u64 {
    (((u << 4) as u32 & 0x3FFF) as u64) | ((((v << 4) as u32 & 0x3FFF) as u64) << 16)
}

fn st_word(s: f32, t: f32) -> u64 {
    (s.to_bits() as u64) | ((t.to_bits() as u64) << 32)
}

const PRIM_LINE: u64 = 1;
const PRIM_TRI: u64 = 3;
const PRIM_SPRITE: u64 = 6;

fn prim_word(kind: u64, gouraud: bool, textured: bool, blend: bool, uv_mode: bool) -> u64 {
    kind | ((gouraud as u64) << 3)
        | ((textured as u64) << 4)
        | ((blend as u64) << 6)
        | ((uv_mode as u64) << 8)
}

/// ALPHA_1 value for a guest semi-transparency mode
///
/// out = ((A - B) * C >> 7) + D with C always the FIX constant.
fn alpha_word(mode: u8) -> u64 {
    let (a, b, d, fix) = match mode {
        // Near-half average used by the calibration screenshots.
        0 => (0u64, 1u64, 1u64, FIX_ALPHA_HALF as u64),
        // dst + src
        1 => (0, 2, 1, 0x80),
        // dst - src
        2 => (2, 0, 1, 0x80),
        // dst + src/4
        _ => (0, 2, 1, 0x20),
    };
    a | (b << 2) | (2 << 4) | (d << 6) | (fix << 32)
}

impl GPU {
    /// Emit the window-space scissor for the current drawing area
    ///
    /// The guest's bottom-right corner is exclusive here: a drawing area
    /// (64,160)-(192,240) scissors x 64..=191, y 160..=239.
    pub(crate) fn emit_scissor(&mut self) {
        let (x0, y0, x1, y1) = self.draw.area;
        let x1 = (x1.saturating_sub(1)).max(x0) as u64;
        let y1 = (y1.saturating_sub(1)).max(y0) as u64;
        self.gif.packet(
            &mut self.gs,
            &[(
                reg::SCISSOR_1,
                (x0 as u64) | (x1 << 16) | ((y0 as u64) << 32) | (y1 << 48),
            )],
        );
    }

    /// One-time window setup: coordinate bias, alpha test, scissor
    pub(crate) fn emit_initial_env(&mut self) {
        let off = ((COORD_BIAS as u64) << 4) | (((COORD_BIAS as u64) << 4) << 32);
        // Alpha test NOTEQUAL 0: texels that decode to zero are the
        // guest's transparent colour.
        let test = 1u64 | (7 << 1);
        self.gif.packet(
            &mut self.gs,
            &[(reg::XYOFFSET_1, off), (reg::TEST_1, test)],
        );
        self.emit_scissor();
    }

    /// Resolve the bound texture page through the cache and emit TEX0
    fn bind_texture(&mut self) -> TexTarget {
        let key = TexKey {
            format: self.draw.tex_format(),
            page_x: self.draw.tpage_x,
            page_y: self.draw.tpage_y,
            clut_x: self.draw.clut_x,
            clut_y: self.draw.clut_y,
            window: self.draw.window,
        };
        let target = self
            .texcache
            .lookup(key, &self.vram, &mut self.gif, &mut self.gs);

        let tex0 = (target.tbp as u64)
            | ((target.tbw as u64) << 14)
            | ((target.psm as u64) << 20)
            | ((target.cbp as u64) << 37);
        // REPEAT on both axes; the decode paths bake every other wrap.
        self.gif
            .packet(&mut self.gs, &[(reg::TEX0_1, tex0), (reg::CLAMP_1, 0)]);
        target
    }

    /// Blend-state packet when the primitive is semi-transparent
    fn emit_blend(&mut self, semi: bool) {
        if semi {
            let word = alpha_word(self.draw.semi_mode);
            self.gif.packet(&mut self.gs, &[(reg::ALPHA_1, word)]);
        }
    }

    /// Triangles and quads; `count` is 3 or 4
    pub(crate) fn draw_polygon(
        &mut self,
        verts: &[PVertex; 4],
        count: usize,
        textured: bool,
        shaded: bool,
        semi: bool,
    ) {
        if textured {
            self.bind_texture();
        }
        self.emit_blend(semi);

        // An axis-aligned textured quad is a sprite in disguise; one
        // SPRITE avoids the diagonal interpolation seam.
        if count == 4 && textured && axis_aligned(verts) {
            let v0 = verts[0];
            let v3 = verts[3];
            let mut writes: Vec<(u8, u64)> = Vec::with_capacity(7);
            writes.push((
                reg::PRIM,
                prim_word(PRIM_SPRITE, false, true, semi, true),
            ));
            writes.push((reg::UV, uv_word(v0.u as i32, v0.v as i32)));
            writes.push((reg::RGBAQ, rgbaq_word(v0.r, v0.g, v0.b)));
            writes.push((reg::XYZ2, xyz_word(v0.x, v0.y)));
            writes.push((reg::UV, uv_word(v3.u as i32 + 1, v3.v as i32 + 1)));
            writes.push((reg::RGBAQ, rgbaq_word(v0.r, v0.g, v0.b)));
            writes.push((reg::XYZ2, xyz_word(v3.x + 1, v3.y + 1)));
            self.gif.packet(&mut self.gs, &writes);
            return;
        }

        // Quads decompose into two triangles sharing the 1-2 edge.
        let order: &[usize] = if count == 4 {
            &[0, 1, 2, 1, 2, 3]
        } else {
            &[0, 1, 2]
        };

        let mut writes: Vec<(u8, u64)> = Vec::with_capacity(1 + order.len() * 3);
        writes.push((
            reg::PRIM,
            prim_word(PRIM_TRI, shaded, textured, semi, true),
        ));
        for &i in order {
            let v = verts[i];
            if textured {
                writes.push((reg::UV, uv_word(v.u as i32, v.v as i32)));
            }
            writes.push((reg::RGBAQ, rgbaq_word(v.r, v.g, v.b)));
            writes.push((reg::XYZ2, xyz_word(v.x, v.y)));
        }
        self.gif.packet(&mut self.gs, &writes);
    }

    /// Sprites and fixed-size rectangles
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn draw_rect(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        color: u32,
        textured: bool,
        uv: (u8, u8),
        semi: bool,
    ) {
        if w <= 0 || h <= 0 {
            return;
        }
        let (r, g, b) = (color as u8, (color >> 8) as u8, (color >> 16) as u8);

        if !textured {
            self.emit_blend(semi);
            self.sprite_flat(x, y, w, h, r, g, b, semi);
            return;
        }

        let target = self.bind_texture();
        self.emit_blend(semi);

        // 15-bit pages running past VRAM column 1024 need the wrap
        // expressed as s >= 1.0 with REPEAT addressing.
        if target.psm == super::gs::psm::CT16
            && self.draw.tex_format() == TexFormat::D16
            && self.draw.tpage_x * 64 + uv.0 as u32 + w as u32 > 1024
        {
            self.sprite_float_st(x, y, w, h, (r, g, b), uv, semi);
            return;
        }

        let flip = self.draw.rect_flip_x;
        let (u0, v0) = (uv.0 as i32, uv.1 as i32);
        // The guest formula wraps u at 256; a sprite interpolation cannot,
        // so the rectangle splits at the seam.
        let spans: Vec<(i32, i32, i32)> = if !flip {
            if u0 + w <= 256 {
                vec![(0, w, u0)]
            } else {
                let first = 256 - u0;
                vec![(0, first, u0), (first, w, 0)]
            }
        } else if u0 - (w - 1) >= 0 {
            vec![(0, w, u0 - (w - 1))]
        } else {
            let first = u0 + 1;
            vec![(0, first, 0), (first, w, 256 - (w - first))]
        };

        for (dx0, dx1, span_u) in spans {
            let sw = dx1 - dx0;
            let (ua, ub) = if flip {
                (span_u + sw - 1, span_u - 1)
            } else {
                (span_u, span_u + sw)
            };
            let writes = [
                (
                    reg::PRIM,
                    prim_word(PRIM_SPRITE, false, true, semi, true),
                ),
                (reg::UV, uv_word(ua, v0)),
                (reg::RGBAQ, rgbaq_word(r, g, b)),
                (reg::XYZ2, xyz_word(x + dx0, y)),
                (reg::UV, uv_word(ub, v0 + h)),
                (reg::RGBAQ, rgbaq_word(r, g, b)),
                (reg::XYZ2, xyz_word(x + dx1, y + h)),
            ];
            self.gif.packet(&mut self.gs, &writes);
        }
    }

    fn sprite_flat(&mut self, x: i32, y: i32, w: i32, h: i32, r: u8, g: u8, b: u8, semi: bool) {
        let writes = [
            (
                reg::PRIM,
                prim_word(PRIM_SPRITE, false, false, semi, true),
            ),
            (reg::RGBAQ, rgbaq_word(r, g, b)),
            (reg::XYZ2, xyz_word(x, y)),
            (reg::RGBAQ, rgbaq_word(r, g, b)),
            (reg::XYZ2, xyz_word(x + w, y + h)),
        ];
        self.gif.packet(&mut self.gs, &writes);
    }

    /// Sprite with normalized float texture coordinates and REPEAT wrap
    fn sprite_float_st(
        &mut self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        rgb: (u8, u8, u8),
        uv: (u8, u8),
        semi: bool,
    ) {
        let s0 = uv.0 as f32 / 256.0;
        let t0 = uv.1 as f32 / 256.0;
        let s1 = (uv.0 as i32 + w) as f32 / 256.0;
        let t1 = (uv.1 as i32 + h) as f32 / 256.0;
        let writes = [
            (
                reg::PRIM,
                prim_word(PRIM_SPRITE, false, true, semi, false),
            ),
            (reg::ST, st_word(s0, t0)),
            (reg::RGBAQ, rgbaq_word(rgb.0, rgb.1, rgb.2)),
            (reg::XYZ2, xyz_word(x, y)),
            (reg::ST, st_word(s1, t1)),
            (reg::RGBAQ, rgbaq_word(rgb.0, rgb.1, rgb.2)),
            (reg::XYZ2, xyz_word(x + w, y + h)),
        ];
        self.gif.packet(&mut self.gs, &writes);
    }

    /// Line segment; polylines feed these one edge at a time
    pub(crate) fn draw_line_seg(&mut self, a: PVertex, b: PVertex, shaded: bool, semi: bool) {
        self.emit_blend(semi);
        let writes = [
            (
                reg::PRIM,
                prim_word(PRIM_LINE, shaded, false, semi, true),
            ),
            (reg::RGBAQ, rgbaq_word(a.r, a.g, a.b)),
            (reg::XYZ2, xyz_word(a.x, a.y)),
            (reg::RGBAQ, rgbaq_word(b.r, b.g, b.b)),
            (reg::XYZ2, xyz_word(b.x, b.y)),
        ];
        self.gif.packet(&mut self.gs, &writes);
    }

    /// GP0(0x02): fill rectangle, unclipped by the drawing area
    pub(crate) fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: u32) {
        if w == 0 || h == 0 {
            return;
        }

        // Widen to the whole framebuffer, draw, restore.
        self.gif.packet(
            &mut self.gs,
            &[(reg::SCISSOR_1, 1023u64 << 16 | (511u64 << 48))],
        );
        let (r, g, b) = (color as u8, (color >> 8) as u8, (color >> 16) as u8);
        self.sprite_flat(
            x as i32,
            y as i32,
            w as i32,
            h as i32,
            r & 0xF8,
            g & 0xF8,
            b & 0xF8,
            false,
        );
        self.emit_scissor();

        // The shadow tracks the fill in lock-step.
        let fill = (((r >> 3) as u16) | (((g >> 3) as u16) << 5) | (((b >> 3) as u16) << 10))
            & 0x7FFF;
        for dy in 0..h {
            for dx in 0..w {
                self.vram.write(x + dx, y + dy, fill);
            }
        }
        self.vram.mark_rect(x, y, w, h);
    }
}

/// Do the four vertices of a quad form an axis-aligned rectangle of
/// positive extent with matching texel alignment?
fn axis_aligned(v: &[PVertex; 4]) -> bool {
    v[0].y == v[1].y
        && v[2].y == v[3].y
        && v[0].x == v[2].x
        && v[1].x == v[3].x
        && v[1].x > v[0].x
        && v[2].y > v[0].y
        && v[0].u == v[2].u
        && v[1].u == v[3].u
        && v[0].v == v[1].v
        && v[2].v == v[3].v
        && v[1].u > v[0].u
        && v[2].v > v[0].v
}
