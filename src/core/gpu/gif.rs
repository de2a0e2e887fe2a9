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

//! GIF packet batching
//!
//! Rasterizer commands accumulate as 128-bit qwords in one of two rings
//! while the other ring is in flight. A flush writes back the filled
//! region, waits for the previous kick to drain, kicks the filled ring and
//! swaps. The synchronous variant additionally waits for the new kick,
//! required before any direct read of rasterizer memory.
//!
//! Packets are GIF-tagged: PACKED A+D register writes for state and
//! vertices, IMAGE mode for pixel transfers.

use super::gs::Gs;

/// One 128-bit rasterizer command word
pub type Qword = [u64; 2];

/// Ring capacity in qwords
pub const RING_QWORDS: usize = 16 * 1024;

/// Headroom checked before starting a packet so a tag is never split
/// across a flush
const TAG_MARGIN: usize = 64;

/// GIF register addresses used by the translator (A+D mode)
pub mod reg {
    pub const PRIM: u8 = 0x00;
    pub const RGBAQ: u8 = 0x01;
    pub const ST: u8 = 0x02;
    pub const UV: u8 = 0x03;
    pub const XYZ2: u8 = 0x05;
    pub const TEX0_1: u8 = 0x06;
    pub const CLAMP_1: u8 = 0x08;
    pub const XYOFFSET_1: u8 = 0x18;
    pub const TEXFLUSH: u8 = 0x3F;
    pub const SCISSOR_1: u8 = 0x40;
    pub const ALPHA_1: u8 = 0x42;
    pub const TEST_1: u8 = 0x47;
    pub const BITBLTBUF: u8 = 0x50;
    pub const TRXPOS: u8 = 0x51;
    pub const TRXREG: u8 = 0x52;
    pub const TRXDIR: u8 = 0x53;
}

/// Build a GIF tag qword
///
/// `flg`: 0 = PACKED, 2 = IMAGE. PACKED A+D uses one register descriptor
/// (0xE) and `nloop` register writes.
pub fn gif_tag(nloop: u16, eop: bool, flg: u8, nreg: u8, regs: u64) -> Qword {
    let lo = (nloop as u64 & 0x7FFF)
        | ((eop as u64) << 15)
        | ((flg as u64 & 3) << 58)
        | ((nreg as u64 & 0xF) << 60);
    [lo, regs]
}

/// PACKED A+D register-write qword
pub fn ad(register: u8, data: u64) -> Qword {
    [data, register as u64]
}

/// Double-buffered packet rings with the DMA handoff choreography
pub struct GifBatcher {
    rings: [Vec<Qword>; 2],
    current: usize,
    /// The other ring was kicked and has not been waited on
    in_flight: bool,
    /// Flush/kick statistics (the tests watch these)
    pub kicks: u64,
    pub sync_waits: u64,
}

impl GifBatcher {
    pub fn new() -> Self {
        Self {
            rings: [
                Vec::with_capacity(RING_QWORDS),
                Vec::with_capacity(RING_QWORDS),
            ],
            current: 0,
            in_flight: false,
            kicks: 0,
            sync_waits: 0,
        }
    }

    /// Qwords queued in the current ring
    pub fn queued(&self) -> usize {
        self.rings[self.current].len()
    }

    /// Append one qword
    pub fn push(&mut self, gs: &mut Gs, qw: Qword) {
        if self.rings[self.current].len() >= RING_QWORDS {
            self.flush(gs);
        }
        self.rings[self.current].push(qw);
    }

    /// Make room for a whole packet so its tag is not split by an
    /// auto-flush mid-way
    pub fn reserve(&mut self, gs: &mut Gs, qwords: usize) {
        let need = qwords + TAG_MARGIN;
        if self.rings[self.current].len() + need > RING_QWORDS {
            self.flush(gs);
        }
    }

    /// Emit a PACKED A+D packet from register/data pairs
    pub fn packet(&mut self, gs: &mut Gs, writes: &[(u8, u64)]) {
        self.reserve(gs, writes.len() + 1);
        self.push(gs, gif_tag(writes.len() as u16, true, 0, 1, 0xE));
        for (register, data) in writes {
            self.push(gs, ad(*register, *data));
        }
    }

    /// Write back the filled region, wait for the previous kick, kick the
    /// current ring and swap
    pub fn flush(&mut self, gs: &mut Gs) {
        if self.rings[self.current].is_empty() {
            return;
        }
        // Host cache write-back for the filled region is targeted, not
        // global; a no-op on this backend.
        self.wait_previous();

        let ring = std::mem::take(&mut self.rings[self.current]);
        gs.consume(&ring);
        self.rings[self.current] = ring;
        self.rings[self.current].clear();

        self.in_flight = true;
        self.kicks += 1;
        self.current ^= 1;
    }

    /// Flush and wait for the kicked transfer itself; mandatory before
    /// reading rasterizer memory directly
    pub fn flush_sync(&mut self, gs: &mut Gs) {
        self.flush(gs);
        self.wait_previous();
        self.sync_waits += 1;
    }

    fn wait_previous(&mut self) {
        // The backend consumes synchronously; the flag models the drain.
        self.in_flight = false;
    }
}

impl Default for GifBatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream a 16-bit rectangle into rasterizer memory
///
/// Emits the BITBLT header once, then IMAGE-mode data in ring-sized
/// chunks (the transfer state in the rasterizer survives packet
/// boundaries), and a TEXFLUSH so samplers never serve stale texels.
/// Base and width travel in 64-texel units; `dsax`/`dsay` position the
/// rectangle inside the destination buffer.
#[allow(clippy::too_many_arguments)]
pub(crate) fn upload_rect(
    gif: &mut GifBatcher,
    gs: &mut Gs,
    dbp: u32,
    dbw: u32,
    dsax: u32,
    dsay: u32,
    w: u32,
    h: u32,
    texels: &[u16],
) {
    if w == 0 || h == 0 || texels.is_empty() {
        return;
    }
    gif.packet(
        gs,
        &[
            (reg::BITBLTBUF, ((dbp as u64) << 32) | ((dbw as u64) << 48)),
            (
                reg::TRXPOS,
                ((dsax as u64) << 32) | ((dsay as u64) << 48),
            ),
            (reg::TRXREG, (w as u64) | ((h as u64) << 32)),
            (reg::TRXDIR, 0),
        ],
    );

    for chunk in texels.chunks(8 * 2048) {
        let qwords = chunk.len().div_ceil(8);
        gif.reserve(gs, qwords + 1);
        gif.push(gs, gif_tag(qwords as u16, true, 2, 0, 0));
        for part in chunk.chunks(8) {
            let mut qw: Qword = [0u64; 2];
            for (i, t) in part.iter().enumerate() {
                qw[i >> 2] |= (*t as u64) << ((i & 3) * 16);
            }
            gif.push(gs, qw);
        }
    }
    gif.packet(gs, &[(reg::TEXFLUSH, 0)]);
}

/// Read a 16-bit rectangle back from rasterizer memory
///
/// The caller must have issued a synchronous flush; the staged data is
/// returned row-major.
pub(crate) fn readback_rect(
    gif: &mut GifBatcher,
    gs: &mut Gs,
    sbp: u32,
    sbw: u32,
    ssax: u32,
    ssay: u32,
    w: u32,
    h: u32,
) -> Vec<u16> {
    gif.packet(
        gs,
        &[
            (reg::BITBLTBUF, (sbp as u64) | ((sbw as u64) << 16)),
            (reg::TRXPOS, (ssax as u64) | ((ssay as u64) << 16)),
            (reg::TRXREG, (w as u64) | ((h as u64) << 32)),
            (reg::TRXDIR, 1),
        ],
    );
    gif.flush_sync(gs);
    gs.take_readback()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_fields() {
        let tag = gif_tag(7, true, 0, 1, 0xE);
        assert_eq!(tag[0] & 0x7FFF, 7);
        assert_ne!(tag[0] & 0x8000, 0);
        assert_eq!((tag[0] >> 58) & 3, 0);
        assert_eq!((tag[0] >> 60) & 0xF, 1);
        assert_eq!(tag[1], 0xE);
    }

    #[test]
    fn test_packet_emits_tag_plus_writes() {
        let mut gif = GifBatcher::new();
        let mut gs = Gs::new();
        gif.packet(&mut gs, &[(reg::PRIM, 6), (reg::XYZ2, 0)]);
        assert_eq!(gif.queued(), 3);
    }

    #[test]
    fn test_flush_swaps_rings_and_counts_kicks() {
        let mut gif = GifBatcher::new();
        let mut gs = Gs::new();
        gif.packet(&mut gs, &[(reg::TEXFLUSH, 0)]);
        gif.flush(&mut gs);
        assert_eq!(gif.queued(), 0);
        assert_eq!(gif.kicks, 1);

        // Empty flush is a no-op.
        gif.flush(&mut gs);
        assert_eq!(gif.kicks, 1);
    }

    #[test]
    fn test_sync_flush_counts_wait() {
        let mut gif = GifBatcher::new();
        let mut gs = Gs::new();
        gif.packet(&mut gs, &[(reg::TEXFLUSH, 0)]);
        gif.flush_sync(&mut gs);
        assert_eq!(gif.sync_waits, 1);
    }
}
