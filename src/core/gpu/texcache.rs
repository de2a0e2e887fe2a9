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

//! Page-level texture cache
//!
//! Sixteen entries keyed by (format, texture page, CLUT, texture window),
//! validated by the combined write-generation of every VRAM block the
//! texture data and CLUT overlap. LRU eviction by a monotonically
//! increasing tick; an MRU shortcut slot skips even the block scan when
//! the global VRAM generation has not moved.
//!
//! Two upload paths:
//! - **Hardware CLUT** for indexed formats with an inactive texture
//!   window: raw indices go to the entry's data slot, and the palette goes
//!   to its CLUT row with the CSM1 shuffle pre-applied and the STP bit
//!   forced on non-zero entries (colour 0 reads as transparent through
//!   the alpha test, everything else opaque).
//! - **Software decode** for 15-bit textures or an active window: the
//!   page is fully expanded through the CLUT and the window formula into
//!   a 256×256 16-bit image.

use super::gif::{upload_rect, GifBatcher};
use super::gs::{csm1_index, psm, Gs};
use super::vram::VramShadow;

/// Texture formats from the draw-mode register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFormat {
    I4,
    I8,
    D16,
}

/// Cache key: everything that changes what the page decodes to, except
/// the content generations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexKey {
    pub format: TexFormat,
    /// Texture page base, 64-pixel column units (0..16)
    pub page_x: u32,
    /// Texture page base row, 256-pixel units (0..2)
    pub page_y: u32,
    /// CLUT base, 16-pixel units
    pub clut_x: u32,
    pub clut_y: u32,
    /// Texture window (mask x/y, offset x/y in 8-pixel steps)
    pub window: (u8, u8, u8, u8),
}

/// Where the translator should point TEX0 for a cached page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexTarget {
    pub psm: u8,
    /// 64-texel units
    pub tbp: u32,
    /// 64-texel units
    pub tbw: u32,
    /// 64-texel units; unused for the decoded path
    pub cbp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    HardwareClut,
    Decoded,
}

#[derive(Debug, Clone)]
struct Entry {
    key: TexKey,
    combined_gen: u32,
    /// Global generation when the combined value was last validated
    seen_global: u32,
    mode: Mode,
    target: TexTarget,
    last_use: u64,
}

/// Cache statistics, watched by the dirtiness tests
#[derive(Debug, Default, Clone)]
pub struct TexCacheStats {
    pub hits: u64,
    pub mru_hits: u64,
    pub misses: u64,
    pub hw_clut_uploads: u64,
    pub decode_uploads: u64,
}

/// Number of cache slots
pub const SLOTS: usize = 16;

/// Local-memory layout: data slots are 64 rows each starting at row 512;
/// CLUT rows follow from row 1536.
const DATA_BASE_ROW: u32 = 512;
const DATA_SLOT_ROWS: u32 = 64;
const CLUT_BASE_ROW: u32 = 1536;

fn data_tbp(slot: usize) -> u32 {
    (DATA_BASE_ROW + slot as u32 * DATA_SLOT_ROWS) * 1024 / 64
}

fn clut_cbp(slot: usize) -> u32 {
    (CLUT_BASE_ROW + slot as u32) * 1024 / 64
}

pub struct TextureCache {
    entries: [Option<Entry>; SLOTS],
    tick: u64,
    mru: Option<usize>,
    pub stats: TexCacheStats,
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
            tick: 0,
            mru: None,
            stats: TexCacheStats::default(),
        }
    }

    /// Upload mode of the cached entry for `key`, if resident (test hook)
    #[cfg(test)]
    fn mode_of(&self, key: &TexKey) -> Option<Mode> {
        self.entries
            .iter()
            .flatten()
            .find(|e| e.key == *key)
            .map(|e| e.mode)
    }

    /// Drop everything (whole-VRAM invalidation)
    pub fn clear(&mut self) {
        self.entries = Default::default();
        self.mru = None;
    }

    /// Find or build the host texture for `key`
    pub fn lookup(
        &mut self,
        key: TexKey,
        vram: &VramShadow,
        gif: &mut GifBatcher,
        gs: &mut Gs,
    ) -> TexTarget {
        self.tick += 1;

        // MRU shortcut: same parameters and no VRAM write anywhere since
        // the last validation means no rescan of block generations.
        if let Some(slot) = self.mru {
            if let Some(entry) = &mut self.entries[slot] {
                if entry.key == key && entry.seen_global == vram.global_generation() {
                    entry.last_use = self.tick;
                    self.stats.hits += 1;
                    self.stats.mru_hits += 1;
                    return entry.target;
                }
            }
        }

        let combined = Self::combined_generation(&key, vram);

        for (slot, maybe) in self.entries.iter_mut().enumerate() {
            if let Some(entry) = maybe {
                if entry.key == key && entry.combined_gen == combined {
                    entry.last_use = self.tick;
                    entry.seen_global = vram.global_generation();
                    self.mru = Some(slot);
                    self.stats.hits += 1;
                    return entry.target;
                }
            }
        }

        self.stats.misses += 1;
        let slot = self.victim();
        let use_hw_clut = key.format != TexFormat::D16 && key.window == (0, 0, 0, 0);

        let (mode, target) = if use_hw_clut {
            self.stats.hw_clut_uploads += 1;
            (Mode::HardwareClut, upload_hw_clut(slot, &key, vram, gif, gs))
        } else {
            self.stats.decode_uploads += 1;
            (Mode::Decoded, upload_decoded(slot, &key, vram, gif, gs))
        };

        self.entries[slot] = Some(Entry {
            key,
            combined_gen: combined,
            seen_global: vram.global_generation(),
            mode,
            target,
            last_use: self.tick,
        });
        self.mru = Some(slot);
        target
    }

    /// Combined generation: max over the blocks the data area and (for
    /// indexed formats) the CLUT overlap
    fn combined_generation(key: &TexKey, vram: &VramShadow) -> u32 {
        let data_w = match key.format {
            TexFormat::I4 => 64,
            TexFormat::I8 => 128,
            TexFormat::D16 => 256,
        };
        let mut gen =
            vram.combined_generation(key.page_x * 64, key.page_y * 256, data_w, 256);
        if key.format != TexFormat::D16 {
            let entries = if key.format == TexFormat::I4 { 16 } else { 256 };
            gen = gen.max(vram.combined_generation(key.clut_x * 16, key.clut_y, entries, 1));
        }
        gen
    }

    /// First empty slot, else the least recently used
    fn victim(&self) -> usize {
        let mut lru = 0;
        let mut lru_tick = u64::MAX;
        for (slot, maybe) in self.entries.iter().enumerate() {
            match maybe {
                None => return slot,
                Some(e) if e.last_use < lru_tick => {
                    lru = slot;
                    lru_tick = e.last_use;
                }
                _ => {}
            }
        }
        lru
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware-CLUT path: raw indices plus the shuffled palette
fn upload_hw_clut(
    slot: usize,
    key: &TexKey,
    vram: &VramShadow,
    gif: &mut GifBatcher,
    gs: &mut Gs,
) -> TexTarget {
    let base_x = key.page_x * 64;
    let base_y = key.page_y * 256;

    // One index per 16-bit slot; the sampler masks back down.
    let mut indices = Vec::with_capacity(256 * 256);
    match key.format {
        TexFormat::I4 => {
            for v in 0..256u32 {
                for u in 0..256u32 {
                    let halfword = vram.read(base_x + u / 4, base_y + v);
                    indices.push((halfword >> ((u & 3) * 4)) & 0xF);
                }
            }
        }
        _ => {
            for v in 0..256u32 {
                for u in 0..256u32 {
                    let halfword = vram.read(base_x + u / 2, base_y + v);
                    indices.push((halfword >> ((u & 1) * 8)) & 0xFF);
                }
            }
        }
    }
    upload_rect(gif, gs, data_tbp(slot), 16, 0, 0, 256, 256, &indices);

    // Palette: CSM1 pre-shuffle plus the forced STP bit.
    let entries = if key.format == TexFormat::I4 { 16 } else { 256 };
    let mut palette = vec![0u16; entries.max(32)];
    for i in 0..entries {
        let raw = vram.read(key.clut_x * 16 + i as u32, key.clut_y);
        let forced = if raw == 0 { 0 } else { raw | 0x8000 };
        let idx = csm1_index(i) % palette.len();
        palette[idx] = forced;
    }
    upload_rect(gif, gs, clut_cbp(slot), 16, 0, 0, palette.len() as u32, 1, &palette);

    TexTarget {
        psm: if key.format == TexFormat::I4 {
            psm::T4
        } else {
            psm::T8
        },
        tbp: data_tbp(slot),
        tbw: 16,
        cbp: clut_cbp(slot),
    }
}

/// Texture-window formula the native hardware cannot express
#[inline(always)]
fn window_coord(c: u32, mask: u8, offset: u8) -> u32 {
    (c & !((mask as u32) << 3)) | (((offset & mask) as u32) << 3)
}

/// Software-decode path: expand the page into a 256×256 16-bit image
fn upload_decoded(
    slot: usize,
    key: &TexKey,
    vram: &VramShadow,
    gif: &mut GifBatcher,
    gs: &mut Gs,
) -> TexTarget {
    let (mx, my, ox, oy) = key.window;
    let base_x = key.page_x * 64;
    let base_y = key.page_y * 256;

    let mut out = Vec::with_capacity(256 * 256);
    for v in 0..256u32 {
        let wv = window_coord(v, my, oy);
        for u in 0..256u32 {
            let wu = window_coord(u, mx, ox);
            let texel = match key.format {
                TexFormat::D16 => vram.read(base_x + wu, base_y + wv),
                TexFormat::I8 => {
                    let halfword = vram.read(base_x + wu / 2, base_y + wv);
                    let index = (halfword >> ((wu & 1) * 8)) & 0xFF;
                    vram.read(key.clut_x * 16 + index as u32, key.clut_y)
                }
                TexFormat::I4 => {
                    let halfword = vram.read(base_x + wu / 4, base_y + wv);
                    let index = (halfword >> ((wu & 3) * 4)) & 0xF;
                    vram.read(key.clut_x * 16 + index as u32, key.clut_y)
                }
            };
            out.push(texel);
        }
    }
    upload_rect(gif, gs, data_tbp(slot), 16, 0, 0, 256, 256, &out);

    TexTarget {
        psm: psm::CT16,
        tbp: data_tbp(slot),
        tbw: 16,
        cbp: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_i8() -> TexKey {
        TexKey {
            format: TexFormat::I8,
            page_x: 8,
            page_y: 0,
            clut_x: 0,
            clut_y: 480,
            window: (0, 0, 0, 0),
        }
    }

    fn fixture() -> (TextureCache, VramShadow, GifBatcher, Gs) {
        (
            TextureCache::new(),
            VramShadow::new(),
            GifBatcher::new(),
            Gs::new(),
        )
    }

    #[test]
    fn test_overlapping_write_forces_miss() {
        let (mut cache, mut vram, mut gif, mut gs) = fixture();
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.misses, 1);

        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.hits, 1);

        // Dirty a block under the texture data area (page 8 = x 512).
        vram.write(520, 10, 0x1234);
        vram.mark_rect(520, 10, 1, 1);
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.misses, 2, "combined generation advanced");
    }

    #[test]
    fn test_unrelated_write_keeps_hit_path() {
        let (mut cache, mut vram, mut gif, mut gs) = fixture();
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);

        // Far from both the page and the CLUT: block scan still hits.
        vram.write(0, 10, 0x4321);
        vram.mark_rect(0, 10, 1, 1);
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.hits, 1);
        assert_eq!(cache.stats.misses, 1);
        assert_eq!(
            cache.stats.mru_hits, 0,
            "global generation moved, so the shortcut could not fire"
        );
    }

    #[test]
    fn test_mru_shortcut_fires_without_any_write() {
        let (mut cache, vram, mut gif, mut gs) = fixture();
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.mru_hits, 1);
    }

    #[test]
    fn test_clut_write_invalidates_indexed_texture() {
        let (mut cache, mut vram, mut gif, mut gs) = fixture();
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);

        vram.write(16, 480, 0x7FFF);
        vram.mark_rect(16, 480, 1, 1);
        cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.misses, 2);
    }

    #[test]
    fn test_window_forces_decode_path() {
        let (mut cache, vram, mut gif, mut gs) = fixture();
        let mut key = key_i8();
        key.window = (0x1F, 0, 4, 0);
        cache.lookup(key, &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.decode_uploads, 1);
        assert_eq!(cache.stats.hw_clut_uploads, 0);
        assert_eq!(cache.mode_of(&key), Some(Mode::Decoded));
    }

    #[test]
    fn test_d16_uses_decode_path() {
        let (mut cache, vram, mut gif, mut gs) = fixture();
        let mut key = key_i8();
        key.format = TexFormat::D16;
        let target = cache.lookup(key, &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.decode_uploads, 1);
        assert_eq!(target.psm, psm::CT16);
    }

    #[test]
    fn test_lru_eviction_prefers_oldest() {
        let (mut cache, vram, mut gif, mut gs) = fixture();
        // Fill all slots with distinct CLUT rows.
        for i in 0..SLOTS as u32 {
            let mut key = key_i8();
            key.clut_y = 400 + i;
            cache.lookup(key, &vram, &mut gif, &mut gs);
        }
        // Touch the first again so slot 1 is now the LRU.
        let mut first = key_i8();
        first.clut_y = 400;
        cache.lookup(first, &vram, &mut gif, &mut gs);

        let mut fresh = key_i8();
        fresh.clut_y = 499;
        cache.lookup(fresh, &vram, &mut gif, &mut gs);

        // First key must still hit; the evicted one was the second.
        cache.lookup(first, &vram, &mut gif, &mut gs);
        let mut second = key_i8();
        second.clut_y = 401;
        cache.lookup(second, &vram, &mut gif, &mut gs);
        assert_eq!(cache.stats.misses as usize, SLOTS + 1 + 1);
    }

    #[test]
    fn test_hw_clut_upload_shuffles_and_forces_stp() {
        let (mut cache, mut vram, mut gif, mut gs) = fixture();
        // Palette entry 1 = 0x001F, entry 8 = 0x03E0, entry 0 = 0.
        vram.write(1, 480, 0x001F);
        vram.write(8, 480, 0x03E0);
        let target = cache.lookup(key_i8(), &vram, &mut gif, &mut gs);
        gif.flush(&mut gs);

        let clut_base = target.cbp * 64;
        assert_eq!(gs.local_read(clut_base + 1), 0x801F, "STP forced");
        assert_eq!(gs.local_read(clut_base), 0x0000, "colour 0 stays clear");
        // Entry 8 lands at shuffled position 16.
        assert_eq!(gs.local_read(clut_base + 16), 0x83E0);
    }
}
