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

//! Host rasterizer: the GIF packet consumer
//!
//! Owns 4 MiB of graphics-local memory (modelled as a 1024×2048 grid of
//! 16-bit texels), parses GIF-tagged packets, maintains the drawing state
//! registers, and rasterizes sprites, triangles and lines with scissor,
//! CLUT sampling and the configured blending equation.
//!
//! Memory map used by the translator:
//! - rows 0..512: the guest framebuffer (PSX VRAM image)
//! - rows 512..1536: sixteen 64-row texture upload slots
//! - rows 1536..1552: one CLUT row per slot
//!
//! All base pointers travel in 64-texel units, widths in 64-texel units,
//! matching the register fields they are packed into.

use super::gif::{reg, Qword};

/// Local memory geometry
pub const LOCAL_WIDTH: u32 = 1024;
pub const LOCAL_HEIGHT: u32 = 2048;

/// Pixel storage formats carried in TEX0/BITBLTBUF PSM fields
pub mod psm {
    /// Direct 16-bit texels
    pub const CT16: u8 = 0x02;
    /// 8-bit palette indices
    pub const T8: u8 = 0x13;
    /// 4-bit palette indices
    pub const T4: u8 = 0x14;
}

/// Primitive kinds from the PRIM register
const PRIM_LINE: u8 = 1;
const PRIM_TRI: u8 = 3;
const PRIM_SPRITE: u8 = 6;

/// Hardware CLUT entry shuffle (CSM1): within each 32-entry group, the
/// 8..16 range swaps with the 16..24 range. Uploads pre-apply it so the
/// sampler's swizzled read lands on the right entry.
pub fn csm1_index(i: usize) -> usize {
    match i & 0x18 {
        0x08 => i + 8,
        0x10 => i - 8,
        _ => i,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Prim {
    kind: u8,
    gouraud: bool,
    textured: bool,
    blend: bool,
    /// UV addressing (fixed point) rather than ST (normalized floats)
    uv_mode: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Vertex {
    /// 12.4 window coordinates (offset not yet removed)
    x: i32,
    y: i32,
    r: u8,
    g: u8,
    b: u8,
    /// 12.4 texel coordinates (UV mode)
    u: i32,
    v: i32,
    /// Normalized coordinates (ST mode)
    s: f32,
    t: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tex0 {
    /// Texture base, 64-texel units
    tbp: u32,
    /// Buffer width, 64-texel units
    tbw: u32,
    psm: u8,
    /// CLUT base, 64-texel units
    cbp: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct AlphaCfg {
    a: u8,
    b: u8,
    d: u8,
    fix: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct Transfer {
    dbp: u32,
    dbw: u32,
    sbp: u32,
    sbw: u32,
    dsax: u32,
    dsay: u32,
    ssax: u32,
    ssay: u32,
    w: u32,
    h: u32,
    x: u32,
    y: u32,
    active: bool,
}

/// Rasterizer statistics consumed by the calibration tests
#[derive(Debug, Default, Clone)]
pub struct GsStats {
    pub sprites: u64,
    pub triangles: u64,
    pub lines: u64,
    pub image_qwords: u64,
    pub pixels_written: u64,
}

/// The packet-executing rasterizer
pub struct Gs {
    local: Vec<u16>,
    prim: Prim,
    rgbaq: (u8, u8, u8, u8),
    st: (f32, f32),
    uv: (i32, i32),
    tex0: Tex0,
    /// Wrap mode: false = repeat, true = clamp (S then T)
    clamp: (bool, bool),
    xyoffset: (i32, i32),
    scissor: (u32, u32, u32, u32),
    alpha: AlphaCfg,
    /// TEST register; with ATE set, texels that decode to 0 drop (the PSX
    /// alpha-test mapping for the STP bit)
    test: u64,
    verts: Vec<Vertex>,
    image: Transfer,
    /// Local→host readback staging
    readback: Vec<u16>,
    /// NLOOP of the most recent tag, for packet-shape assertions
    pub last_tag_nloop: u16,
    pub stats: GsStats,
}

impl Gs {
    pub fn new() -> Self {
        Self {
            local: vec![0u16; (LOCAL_WIDTH * LOCAL_HEIGHT) as usize],
            prim: Prim::default(),
            rgbaq: (0, 0, 0, 0x80),
            st: (0.0, 0.0),
            uv: (0, 0),
            tex0: Tex0::default(),
            clamp: (false, false),
            xyoffset: (0, 0),
            scissor: (0, LOCAL_WIDTH - 1, 0, 511),
            alpha: AlphaCfg::default(),
            test: 0,
            verts: Vec::with_capacity(3),
            image: Transfer::default(),
            readback: Vec::new(),
            last_tag_nloop: 0,
            stats: GsStats::default(),
        }
    }

    /// Current scissor window, inclusive (x0, x1, y0, y1)
    pub fn scissor(&self) -> (u32, u32, u32, u32) {
        self.scissor
    }

    /// Direct local-memory read (row-major texel index)
    pub fn local_read(&self, index: u32) -> u16 {
        self.local[(index as usize) % self.local.len()]
    }

    /// Take the staging buffer filled by a local→host transfer
    pub fn take_readback(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.readback)
    }

    /// Execute a kicked ring
    pub fn consume(&mut self, ring: &[Qword]) {
        let mut i = 0;
        while i < ring.len() {
            let tag = ring[i];
            i += 1;
            let nloop = (tag[0] & 0x7FFF) as usize;
            let flg = ((tag[0] >> 58) & 3) as u8;
            self.last_tag_nloop = nloop as u16;

            match flg {
                // PACKED A+D
                0 => {
                    for _ in 0..nloop {
                        if i >= ring.len() {
                            return;
                        }
                        let qw = ring[i];
                        i += 1;
                        self.write_register((qw[1] & 0xFF) as u8, qw[0]);
                    }
                }
                // IMAGE
                2 => {
                    for _ in 0..nloop {
                        if i >= ring.len() {
                            return;
                        }
                        let qw = ring[i];
                        i += 1;
                        self.image_data(qw);
                        self.stats.image_qwords += 1;
                    }
                }
                _ => {
                    log::debug!("GIF tag with unsupported FLG {}", flg);
                    i += nloop;
                }
            }
        }
    }

    /// A+D register write
    fn write_register(&mut self, register: u8, data: u64) {
        match register {
            reg::PRIM => {
                self.prim = Prim {
                    kind: (data & 7) as u8,
                    gouraud: data & (1 << 3) != 0,
                    textured: data & (1 << 4) != 0,
                    blend: data & (1 << 6) != 0,
                    uv_mode: data & (1 << 8) != 0,
                };
                self.verts.clear();
            }
            reg::RGBAQ => {
                self.rgbaq = (
                    data as u8,
                    (data >> 8) as u8,
                    (data >> 16) as u8,
                    (data >> 24) as u8,
                );
            }
            reg::ST => {
                self.st = (
                    f32::from_bits(data as u32),
                    f32::from_bits((data >> 32) as u32),
                );
            }
            reg::UV => {
                self.uv = ((data & 0x3FFF) as i32, ((data >> 16) & 0x3FFF) as i32);
            }
            reg::XYZ2 => {
                let x = (data & 0xFFFF) as i32;
                let y = ((data >> 16) & 0xFFFF) as i32;
                self.vertex_kick(x, y);
            }
            reg::TEX0_1 => {
                self.tex0 = Tex0 {
                    tbp: (data & 0x3FFF) as u32,
                    tbw: ((data >> 14) & 0x3F) as u32,
                    psm: ((data >> 20) & 0x3F) as u8,
                    cbp: ((data >> 37) & 0x3FFF) as u32,
                };
            }
            reg::CLAMP_1 => {
                self.clamp = (data & 7 == 1, (data >> 3) & 7 == 1);
            }
            reg::XYOFFSET_1 => {
                self.xyoffset = ((data & 0xFFFF) as i32, ((data >> 32) & 0xFFFF) as i32);
            }
            reg::TEXFLUSH => {}
            reg::SCISSOR_1 => {
                self.scissor = (
                    (data & 0x7FF) as u32,
                    ((data >> 16) & 0x7FF) as u32,
                    ((data >> 32) & 0x7FF) as u32,
                    ((data >> 48) & 0x7FF) as u32,
                );
            }
            reg::ALPHA_1 => {
                self.alpha = AlphaCfg {
                    a: (data & 3) as u8,
                    b: ((data >> 2) & 3) as u8,
                    d: ((data >> 6) & 3) as u8,
                    fix: ((data >> 32) & 0xFF) as u8,
                };
            }
            reg::TEST_1 => self.test = data,
            reg::BITBLTBUF => {
                self.image.sbp = (data & 0x3FFF) as u32;
                self.image.sbw = ((data >> 16) & 0x3F) as u32;
                self.image.dbp = ((data >> 32) & 0x3FFF) as u32;
                self.image.dbw = ((data >> 48) & 0x3F) as u32;
            }
            reg::TRXPOS => {
                self.image.ssax = (data & 0x7FF) as u32;
                self.image.ssay = ((data >> 16) & 0x7FF) as u32;
                self.image.dsax = ((data >> 32) & 0x7FF) as u32;
                self.image.dsay = ((data >> 48) & 0x7FF) as u32;
            }
            reg::TRXREG => {
                self.image.w = (data & 0xFFF) as u32;
                self.image.h = ((data >> 32) & 0xFFF) as u32;
            }
            reg::TRXDIR => {
                self.image.x = 0;
                self.image.y = 0;
                match data & 3 {
                    0 => self.image.active = true,
                    1 => self.run_readback(),
                    2 => self.run_local_copy(),
                    _ => self.image.active = false,
                }
            }
            other => log::debug!("unhandled GS register 0x{:02X}", other),
        }
    }

    // ---- image transfers ----

    #[inline(always)]
    fn dst_index(&self, x: u32, y: u32) -> usize {
        let stride = (self.image.dbw * 64).max(1);
        ((self.image.dbp * 64 + y * stride + x) as usize) % self.local.len()
    }

    #[inline(always)]
    fn src_index(&self, x: u32, y: u32) -> usize {
        let stride = (self.image.sbw * 64).max(1);
        ((self.image.sbp * 64 + y * stride + x) as usize) % self.local.len()
    }

    /// One IMAGE-mode qword: eight 16-bit texels
    fn image_data(&mut self, qw: Qword) {
        if !self.image.active {
            return;
        }
        for half in 0..8u32 {
            let texel = (qw[(half >> 2) as usize] >> ((half & 3) * 16)) as u16;
            let x = self.image.dsax + self.image.x;
            let y = self.image.dsay + self.image.y;
            let idx = self.dst_index(x, y);
            self.local[idx] = texel;

            self.image.x += 1;
            if self.image.x >= self.image.w {
                self.image.x = 0;
                self.image.y += 1;
                if self.image.y >= self.image.h {
                    self.image.active = false;
                    return;
                }
            }
        }
    }

    /// Local→host: stage the source rectangle for the caller
    fn run_readback(&mut self) {
        let (w, h) = (self.image.w, self.image.h);
        self.readback.clear();
        self.readback.reserve((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let idx = self.src_index(self.image.ssax + x, self.image.ssay + y);
                self.readback.push(self.local[idx]);
            }
        }
    }

    /// Local→local rectangle copy, top-to-bottom
    fn run_local_copy(&mut self) {
        let (w, h) = (self.image.w, self.image.h);
        for y in 0..h {
            for x in 0..w {
                let s = self.src_index(self.image.ssax + x, self.image.ssay + y);
                let d = self.dst_index(self.image.dsax + x, self.image.dsay + y);
                self.local[d] = self.local[s];
            }
        }
    }

    // ---- drawing ----

    fn vertex_kick(&mut self, x: i32, y: i32) {
        let v = Vertex {
            x,
            y,
            r: self.rgbaq.0,
            g: self.rgbaq.1,
            b: self.rgbaq.2,
            u: self.uv.0,
            v: self.uv.1,
            s: self.st.0,
            t: self.st.1,
        };
        self.verts.push(v);

        match self.prim.kind {
            PRIM_SPRITE if self.verts.len() == 2 => {
                let (a, b) = (self.verts[0], self.verts[1]);
                self.verts.clear();
                self.draw_sprite(a, b);
                self.stats.sprites += 1;
            }
            PRIM_TRI if self.verts.len() == 3 => {
                let (a, b, c) = (self.verts[0], self.verts[1], self.verts[2]);
                self.verts.clear();
                self.draw_triangle(a, b, c);
                self.stats.triangles += 1;
            }
            PRIM_LINE if self.verts.len() == 2 => {
                let (a, b) = (self.verts[0], self.verts[1]);
                self.verts.clear();
                self.draw_line(a, b);
                self.stats.lines += 1;
            }
            _ => {}
        }
    }

    /// Window 12.4 coordinate to integer pixel
    #[inline(always)]
    fn px(&self, v: i32, y_axis: bool) -> i32 {
        let off = if y_axis { self.xyoffset.1 } else { self.xyoffset.0 };
        (v - off) >> 4
    }

    #[inline(always)]
    fn in_scissor(&self, x: i32, y: i32) -> bool {
        let (x0, x1, y0, y1) = self.scissor;
        x >= x0 as i32 && x <= x1 as i32 && y >= y0 as i32 && y <= y1 as i32
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: u16, blend: bool) {
        if !self.in_scissor(x, y) {
            return;
        }
        let idx = ((y as u32 % LOCAL_HEIGHT) * LOCAL_WIDTH + (x as u32 % LOCAL_WIDTH)) as usize;
        let out = if blend {
            let dst = self.local[idx];
            blend_555(color, dst, &self.alpha) | (color & 0x8000)
        } else {
            color
        };
        self.local[idx] = out;
        self.stats.pixels_written += 1;
    }

    /// Sample the bound texture at integer texel coordinates
    fn sample(&self, u: i32, v: i32) -> u16 {
        let wrap = |c: i32, clamp: bool| -> u32 {
            if clamp {
                c.clamp(0, 255) as u32
            } else {
                (c & 0xFF) as u32
            }
        };
        let u = wrap(u, self.clamp.0);
        let v = wrap(v, self.clamp.1);
        let stride = (self.tex0.tbw * 64).max(1);
        let base = self.tex0.tbp * 64;
        let idx = ((base + v * stride + u) as usize) % self.local.len();
        match self.tex0.psm {
            psm::T8 => {
                let entry = (self.local[idx] & 0xFF) as usize;
                self.clut(entry)
            }
            psm::T4 => {
                let entry = (self.local[idx] & 0xF) as usize;
                self.clut(entry)
            }
            _ => self.local[idx],
        }
    }

    /// CLUT fetch with the CSM1 swizzle the uploader pre-applied
    fn clut(&self, entry: usize) -> u16 {
        let idx = ((self.tex0.cbp * 64) as usize + csm1_index(entry)) % self.local.len();
        self.local[idx]
    }

    /// Modulate a 5:5:5 texel by the 8-bit vertex color (128 = identity)
    fn modulate(texel: u16, r: u8, g: u8, b: u8) -> u16 {
        let m = |t5: u16, c: u8| -> u16 { ((t5 as u32 * c as u32) >> 7).min(31) as u16 };
        let tr = texel & 0x1F;
        let tg = (texel >> 5) & 0x1F;
        let tb = (texel >> 10) & 0x1F;
        (texel & 0x8000) | (m(tb, b) << 10) | (m(tg, g) << 5) | m(tr, r)
    }

    fn flat_color(v: &Vertex) -> u16 {
        (((v.b as u16) >> 3) << 10) | (((v.g as u16) >> 3) << 5) | ((v.r as u16) >> 3)
    }

    fn draw_sprite(&mut self, v0: Vertex, v1: Vertex) {
        let x0 = self.px(v0.x, false);
        let y0 = self.px(v0.y, true);
        let x1 = self.px(v1.x, false);
        let y1 = self.px(v1.y, true);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let w = x1 - x0;
        let h = y1 - y0;
        let blend = self.prim.blend;
        let textured = self.prim.textured;
        let flat = Self::flat_color(&v1);

        for dy in 0..h {
            for dx in 0..w {
                let color = if textured {
                    let (u, v) = if self.prim.uv_mode {
                        // Endpoint texel coordinates interpolate across
                        // the rectangle (right/bottom exclusive).
                        (
                            (v0.u + ((v1.u - v0.u) * dx * 16) / (w * 16)) >> 4,
                            (v0.v + ((v1.v - v0.v) * dy * 16) / (h * 16)) >> 4,
                        )
                    } else {
                        let s = v0.s + (v1.s - v0.s) * (dx as f32 + 0.5) / w as f32;
                        let t = v0.t + (v1.t - v0.t) * (dy as f32 + 0.5) / h as f32;
                        ((s * 256.0) as i32, (t * 256.0) as i32)
                    };
                    let texel = self.sample(u, v);
                    if texel == 0 && self.test & 1 != 0 {
                        continue;
                    }
                    Self::modulate(texel, v1.r, v1.g, v1.b)
                } else {
                    flat
                };
                let blend_this = blend && (!textured || color & 0x8000 != 0);
                self.put_pixel(x0 + dx, y0 + dy, color, blend_this);
            }
        }
    }

    fn draw_triangle(&mut self, v0: Vertex, v1: Vertex, v2: Vertex) {
        // 12.4 edge functions sampled at pixel centers.
        let (ox, oy) = self.xyoffset;
        let p = |v: &Vertex| ((v.x - ox) as i64, (v.y - oy) as i64);
        let (x0, y0) = p(&v0);
        let (x1, y1) = p(&v1);
        let (x2, y2) = p(&v2);

        let area = (x1 - x0) * (y2 - y0) - (y1 - y0) * (x2 - x0);
        if area == 0 {
            return;
        }
        let sign = if area > 0 { 1 } else { -1 };

        let min_x = (x0.min(x1).min(x2) >> 4).max(self.scissor.0 as i64);
        let max_x = ((x0.max(x1).max(x2) + 15) >> 4).min(self.scissor.1 as i64);
        let min_y = (y0.min(y1).min(y2) >> 4).max(self.scissor.2 as i64);
        let max_y = ((y0.max(y1).max(y2) + 15) >> 4).min(self.scissor.3 as i64);

        let blend = self.prim.blend;
        let textured = self.prim.textured;
        let gouraud = self.prim.gouraud;
        let flat = Self::flat_color(&v2);

        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let sx = (px << 4) + 8;
                let sy = (py << 4) + 8;
                let w0 = ((x1 - x0) * (sy - y0) - (y1 - y0) * (sx - x0)) * sign;
                let w1 = ((x2 - x1) * (sy - y1) - (y2 - y1) * (sx - x1)) * sign;
                let w2 = ((x0 - x2) * (sy - y2) - (y0 - y2) * (sx - x2)) * sign;
                if w0 < 0 || w1 < 0 || w2 < 0 {
                    continue;
                }
                // Barycentric weights: w1 belongs to v0, w2 to v1, w0 to v2.
                let total = (w0 + w1 + w2).max(1);
                let lerp = |a: i64, b: i64, c: i64| -> i64 { (a * w1 + b * w2 + c * w0) / total };

                let color = if textured {
                    let (u, v) = if self.prim.uv_mode {
                        (
                            (lerp(v0.u as i64, v1.u as i64, v2.u as i64) >> 4) as i32,
                            (lerp(v0.v as i64, v1.v as i64, v2.v as i64) >> 4) as i32,
                        )
                    } else {
                        let fl = |a: f32, b: f32, c: f32| {
                            (a * w1 as f32 + b * w2 as f32 + c * w0 as f32) / total as f32
                        };
                        (
                            (fl(v0.s, v1.s, v2.s) * 256.0) as i32,
                            (fl(v0.t, v1.t, v2.t) * 256.0) as i32,
                        )
                    };
                    let texel = self.sample(u, v);
                    if texel == 0 && self.test & 1 != 0 {
                        continue;
                    }
                    if gouraud {
                        let r = lerp(v0.r as i64, v1.r as i64, v2.r as i64) as u8;
                        let g = lerp(v0.g as i64, v1.g as i64, v2.g as i64) as u8;
                        let b = lerp(v0.b as i64, v1.b as i64, v2.b as i64) as u8;
                        Self::modulate(texel, r, g, b)
                    } else {
                        Self::modulate(texel, v2.r, v2.g, v2.b)
                    }
                } else if gouraud {
                    let r = lerp(v0.r as i64, v1.r as i64, v2.r as i64) as u16;
                    let g = lerp(v0.g as i64, v1.g as i64, v2.g as i64) as u16;
                    let b = lerp(v0.b as i64, v1.b as i64, v2.b as i64) as u16;
                    ((b >> 3) << 10) | ((g >> 3) << 5) | (r >> 3)
                } else {
                    flat
                };
                let blend_this = blend && (!textured || color & 0x8000 != 0);
                self.put_pixel(px as i32, py as i32, color, blend_this);
            }
        }
    }

    fn draw_line(&mut self, v0: Vertex, v1: Vertex) {
        let x0 = self.px(v0.x, false);
        let y0 = self.px(v0.y, true);
        let x1 = self.px(v1.x, false);
        let y1 = self.px(v1.y, true);

        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let steps = dx.max(dy).max(1);
        let blend = self.prim.blend;

        for i in 0..=steps {
            let x = x0 + (x1 - x0) * i / steps;
            let y = y0 + (y1 - y0) * i / steps;
            let color = if self.prim.gouraud {
                let l = |a: u8, b: u8| (a as i32 + (b as i32 - a as i32) * i / steps) as u16;
                ((l(v0.b, v1.b) >> 3) << 10) | ((l(v0.g, v1.g) >> 3) << 5) | (l(v0.r, v1.r) >> 3)
            } else {
                Self::flat_color(&v1)
            };
            self.put_pixel(x, y, color, blend);
        }
    }
}

impl Default for Gs {
    fn default() -> Self {
        Self::new()
    }
}

/// Configured blending equation on 5-bit channels:
/// out = ((A - B) * FIX >> 7) + D
fn blend_555(src: u16, dst: u16, cfg: &AlphaCfg) -> u16 {
    let ch = |v: u16, shift: u16| ((v >> shift) & 0x1F) as i32;
    let mut out = 0u16;
    for shift in [0u16, 5, 10] {
        let s = ch(src, shift);
        let d = ch(dst, shift);
        let sel = |code: u8| match code {
            0 => s,
            1 => d,
            _ => 0,
        };
        let v = (((sel(cfg.a) - sel(cfg.b)) * cfg.fix as i32) >> 7) + sel(cfg.d);
        out |= (v.clamp(0, 31) as u16) << shift;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gpu::gif::{ad, gif_tag};

    fn packed(writes: &[(u8, u64)]) -> Vec<Qword> {
        let mut ring = vec![gif_tag(writes.len() as u16, true, 0, 1, 0xE)];
        for (r, d) in writes {
            ring.push(ad(*r, *d));
        }
        ring
    }

    fn xy(x: i32, y: i32) -> u64 {
        // 12.4 with the standard 2048 bias the translator applies.
        let fx = ((x + 2048) << 4) as u64 & 0xFFFF;
        let fy = ((y + 2048) << 4) as u64 & 0xFFFF;
        fx | (fy << 16)
    }

    fn setup() -> Gs {
        let mut gs = Gs::new();
        gs.write_register(reg::XYOFFSET_1, ((2048u64 << 4) << 32) | (2048 << 4));
        gs.write_register(reg::SCISSOR_1, (511u64 << 48) | (1023 << 16));
        gs
    }

    #[test]
    fn test_scissor_register_unpack() {
        let mut gs = Gs::new();
        // x0=64, x1=191, y0=160, y1=239
        let data = 64u64 | (191 << 16) | (160 << 32) | (239 << 48);
        gs.write_register(reg::SCISSOR_1, data);
        assert_eq!(gs.scissor(), (64, 191, 160, 239));
    }

    #[test]
    fn test_flat_sprite_fills_rect_exclusive() {
        let mut gs = setup();
        let ring = packed(&[
            (reg::PRIM, PRIM_SPRITE as u64),
            (reg::RGBAQ, 0x80_00_00_F8), // red 0xF8
            (reg::XYZ2, xy(10, 10)),
            (reg::RGBAQ, 0x80_00_00_F8),
            (reg::XYZ2, xy(12, 12)),
        ]);
        gs.consume(&ring);
        assert_eq!(gs.stats.sprites, 1);
        assert_eq!(gs.local_read(10 * 1024 + 10), 0x001F);
        assert_eq!(gs.local_read(11 * 1024 + 11), 0x001F);
        // Right/bottom edges exclusive.
        assert_eq!(gs.local_read(12 * 1024 + 10), 0x0000);
        assert_eq!(gs.local_read(10 * 1024 + 12), 0x0000);
    }

    #[test]
    fn test_sprite_respects_scissor() {
        let mut gs = setup();
        gs.write_register(reg::SCISSOR_1, 5u64 | (6 << 16) | (5 << 32) | (6 << 48));
        let ring = packed(&[
            (reg::PRIM, PRIM_SPRITE as u64),
            (reg::RGBAQ, 0x80_00_00_F8),
            (reg::XYZ2, xy(0, 0)),
            (reg::XYZ2, xy(20, 20)),
        ]);
        gs.consume(&ring);
        assert_eq!(gs.local_read(5 * 1024 + 5), 0x001F);
        assert_eq!(gs.local_read(4 * 1024 + 5), 0x0000);
        assert_eq!(gs.local_read(7 * 1024 + 7), 0x0000);
    }

    #[test]
    fn test_image_upload_lands_in_local_memory() {
        let mut gs = setup();
        let mut ring = packed(&[
            // dbp 0, dbw 16 (1024 wide)
            (reg::BITBLTBUF, (16u64 << 48)),
            (reg::TRXPOS, (3u64 << 48) | (2 << 32)), // dsax=2, dsay=3
            (reg::TRXREG, (1u64 << 32) | 8),         // 8x1
            (reg::TRXDIR, 0),
        ]);
        ring.push(gif_tag(1, true, 2, 0, 0));
        ring.push([0x0004_0003_0002_0001, 0x0008_0007_0006_0005]);
        gs.consume(&ring);

        for i in 0..8u32 {
            assert_eq!(gs.local_read(3 * 1024 + 2 + i), (i + 1) as u16);
        }
    }

    #[test]
    fn test_readback_round_trip() {
        let mut gs = setup();
        let mut ring = packed(&[
            (reg::BITBLTBUF, (16u64 << 48)),
            (reg::TRXPOS, 0),
            (reg::TRXREG, (1u64 << 32) | 8),
            (reg::TRXDIR, 0),
        ]);
        ring.push(gif_tag(1, true, 2, 0, 0));
        ring.push([0xAAAA_BBBB_CCCC_DDDD, 0x1111_2222_3333_4444]);
        gs.consume(&ring);

        // sbp 0, sbw 16, read the same 8x1 back.
        let ring = packed(&[
            (reg::BITBLTBUF, 16u64 << 16),
            (reg::TRXPOS, 0),
            (reg::TRXREG, (1u64 << 32) | 8),
            (reg::TRXDIR, 1),
        ]);
        gs.consume(&ring);
        let rb = gs.take_readback();
        assert_eq!(rb, vec![0xDDDD, 0xCCCC, 0xBBBB, 0xAAAA, 0x4444, 0x3333, 0x2222, 0x1111]);
    }

    #[test]
    fn test_additive_blend() {
        let mut gs = setup();
        // Pre-paint destination green.
        let ring = packed(&[
            (reg::PRIM, PRIM_SPRITE as u64),
            (reg::RGBAQ, 0x80_00_F8_00),
            (reg::XYZ2, xy(0, 0)),
            (reg::XYZ2, xy(4, 4)),
        ]);
        gs.consume(&ring);

        // Additive: A=src, B=zero, C=FIX(0x80), D=dst.
        let alpha = (0u64) | (2 << 2) | (1 << 6) | (0x80 << 32);
        let ring = packed(&[
            (reg::ALPHA_1, alpha),
            (reg::PRIM, (PRIM_SPRITE as u64) | (1 << 6)),
            (reg::RGBAQ, 0x80_00_00_F8),
            (reg::XYZ2, xy(0, 0)),
            (reg::XYZ2, xy(4, 4)),
        ]);
        gs.consume(&ring);

        // Red over green: both channels present.
        assert_eq!(gs.local_read(0), 0x03FF & 0x7FFF);
    }

    #[test]
    fn test_gouraud_triangle_interpolates() {
        let mut gs = setup();
        let ring = packed(&[
            (reg::PRIM, (PRIM_TRI as u64) | (1 << 3)),
            (reg::RGBAQ, 0x80_00_00_F8), // red
            (reg::XYZ2, xy(0, 0)),
            (reg::RGBAQ, 0x80_00_00_F8),
            (reg::XYZ2, xy(31, 0)),
            (reg::RGBAQ, 0x80_F8_00_00), // blue
            (reg::XYZ2, xy(0, 31)),
        ]);
        gs.consume(&ring);
        assert_eq!(gs.stats.triangles, 1);
        // Near the red corner red dominates, near the blue corner blue.
        let near_red = gs.local_read(1 * 1024 + 1);
        let near_blue = gs.local_read(29 * 1024 + 1);
        assert!(near_red & 0x1F > (near_red >> 10) & 0x1F);
        assert!((near_blue >> 10) & 0x1F > near_blue & 0x1F);
    }

    #[test]
    fn test_csm1_swizzle_is_involution() {
        for i in 0..256 {
            assert_eq!(csm1_index(csm1_index(i)), i);
        }
        assert_eq!(csm1_index(0x08), 0x10);
        assert_eq!(csm1_index(0x17), 0x0F);
        assert_eq!(csm1_index(0x00), 0x00);
        assert_eq!(csm1_index(0x1F), 0x1F);
    }
}
