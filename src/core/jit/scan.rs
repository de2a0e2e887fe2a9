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

//! Translation scan pass
//!
//! Walks guest code from a block's start PC to its boundary (branch plus
//! delay slot, SYSCALL/BREAK, or the sub-block window cap), collecting the
//! register read/write masks and a dead-instruction bitmap from a backward
//! liveness sweep.
//!
//! Everything is live at block exit. An instruction is dead only when it is
//! side-effect-free (pure ALU, shift, logical, move-from-HI/LO) and its
//! destination is overwritten before any downstream read. Loads are never
//! dead: their write lands through the delayed-load latch one instruction
//! later and the conservative analysis keeps that read. Overflow-trapping
//! arithmetic is not pure.

use crate::core::cpu::dec;

/// Sub-block size cap in guest instructions
pub const SCAN_WINDOW: usize = 64;

/// How a scanned sub-block ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Branch or jump; the delay slot is included in the count
    Branch,
    /// SYSCALL or BREAK; no delay slot
    Trap,
    /// Window cap reached without a natural boundary
    WindowCap,
}

/// Scan-pass result for one sub-block
#[derive(Debug, Clone)]
pub struct BlockScan {
    /// Guest instruction count (delay slot included when it fits)
    pub count: usize,
    /// Union of registers the sub-block reads
    pub reads: u32,
    /// Union of registers the sub-block writes
    pub writes: u32,
    /// Bit i set: instruction i can be skipped by the emitter
    pub dead: u64,
    /// Boundary kind
    pub end: BlockEnd,
    /// The terminal branch's delay slot made it into the window
    pub delay_included: bool,
}

/// Static read/write/purity classification of one instruction
#[derive(Debug, Clone, Copy, Default)]
struct Effects {
    reads: u32,
    writes: u32,
    pure: bool,
}

fn reg_bit(r: u8) -> u32 {
    // r0 writes are architectural no-ops; keep them out of the masks.
    if r == 0 {
        0
    } else {
        1 << r
    }
}

fn classify(instr: u32) -> Effects {
    let rs = reg_bit(dec::rs(instr));
    let rt = reg_bit(dec::rt(instr));
    let rd = reg_bit(dec::rd(instr));

    match dec::op(instr) {
        0x00 => match dec::funct(instr) {
            // SLL/SRL/SRA
            0x00 | 0x02 | 0x03 => Effects {
                reads: rt,
                writes: rd,
                pure: true,
            },
            // SLLV/SRLV/SRAV
            0x04 | 0x06 | 0x07 => Effects {
                reads: rs | rt,
                writes: rd,
                pure: true,
            },
            // JR
            0x08 => Effects {
                reads: rs,
                ..Default::default()
            },
            // JALR
            0x09 => Effects {
                reads: rs,
                writes: rd,
                pure: false,
            },
            // SYSCALL/BREAK
            0x0C | 0x0D => Effects::default(),
            // MFHI/MFLO
            0x10 | 0x12 => Effects {
                reads: 0,
                writes: rd,
                pure: true,
            },
            // MTHI/MTLO write HI/LO, outside the pure set
            0x11 | 0x13 => Effects {
                reads: rs,
                ..Default::default()
            },
            // MULT/MULTU/DIV/DIVU write HI/LO
            0x18 | 0x19 | 0x1A | 0x1B => Effects {
                reads: rs | rt,
                ..Default::default()
            },
            // ADD/SUB can trap: not pure
            0x20 | 0x22 => Effects {
                reads: rs | rt,
                writes: rd,
                pure: false,
            },
            // ADDU/SUBU/AND/OR/XOR/NOR/SLT/SLTU
            0x21 | 0x23 | 0x24 | 0x25 | 0x26 | 0x27 | 0x2A | 0x2B => Effects {
                reads: rs | rt,
                writes: rd,
                pure: true,
            },
            _ => Effects::default(),
        },
        // REGIMM: branch, may link
        0x01 => Effects {
            reads: rs,
            writes: if dec::rt(instr) & 0x1E == 0x10 {
                1 << 31
            } else {
                0
            },
            pure: false,
        },
        // J
        0x02 => Effects::default(),
        // JAL
        0x03 => Effects {
            writes: 1 << 31,
            ..Default::default()
        },
        // BEQ/BNE
        0x04 | 0x05 => Effects {
            reads: rs | rt,
            ..Default::default()
        },
        // BLEZ/BGTZ
        0x06 | 0x07 => Effects {
            reads: rs,
            ..Default::default()
        },
        // ADDI can trap
        0x08 => Effects {
            reads: rs,
            writes: rt,
            pure: false,
        },
        // ADDIU/SLTI/SLTIU/ANDI/ORI/XORI
        0x09..=0x0E => Effects {
            reads: rs,
            writes: rt,
            pure: true,
        },
        // LUI
        0x0F => Effects {
            reads: 0,
            writes: rt,
            pure: true,
        },
        // COP0/COP2: moves and commands, never eliminated
        0x10 | 0x12 => {
            if instr & (1 << 25) != 0 || dec::rs(instr) == 0x10 {
                // Coprocessor command / RFE: no GPR traffic
                Effects::default()
            } else if dec::rs(instr) & 0x04 == 0 {
                // MFC/CFC write rt
                Effects {
                    reads: 0,
                    writes: rt,
                    pure: false,
                }
            } else {
                // MTC/CTC read rt
                Effects {
                    reads: rt,
                    ..Default::default()
                }
            }
        }
        // Loads: never dead (delayed write), reads base plus rt for the
        // LWL/LWR merges
        0x20..=0x26 => Effects {
            reads: rs | if matches!(dec::op(instr), 0x22 | 0x26) { rt } else { 0 },
            writes: rt,
            pure: false,
        },
        // Stores
        0x28..=0x2E => Effects {
            reads: rs | rt,
            ..Default::default()
        },
        // LWC2/SWC2
        0x32 | 0x3A => Effects {
            reads: rs,
            ..Default::default()
        },
        _ => Effects::default(),
    }
}

/// GPR (reads, writes) masks of a single instruction, shared with the
/// emit pass's load-delay bookkeeping
pub(super) fn reads_writes(instr: u32) -> (u32, u32) {
    let e = classify(instr);
    (e.reads, e.writes)
}

/// Scan one sub-block starting at `words[0]`
///
/// `words` is the scan window; fewer than [`SCAN_WINDOW`] entries are fine
/// near the end of a mapped region.
pub fn scan(words: &[u32]) -> BlockScan {
    let cap = words.len().min(SCAN_WINDOW);
    let mut count = 0;
    let mut end = BlockEnd::WindowCap;
    let mut delay_included = false;

    while count < cap {
        let instr = words[count];
        count += 1;
        if dec::is_trap(instr) {
            end = BlockEnd::Trap;
            break;
        }
        if dec::is_branch(instr) {
            // Include the delay slot when the window has room for it.
            if count < cap {
                count += 1;
                delay_included = true;
            }
            end = BlockEnd::Branch;
            break;
        }
    }

    let mut reads = 0u32;
    let mut writes = 0u32;
    let effects: Vec<Effects> = words[..count].iter().map(|w| classify(*w)).collect();
    for e in &effects {
        reads |= e.reads;
        writes |= e.writes;
    }

    // Backward liveness; everything is live at exit. The terminal branch
    // and its delay slot are never candidates.
    let mut dead = 0u64;
    let mut live = u32::MAX;
    let protected_tail = match end {
        BlockEnd::Branch => {
            if delay_included {
                2.min(count)
            } else {
                1
            }
        }
        BlockEnd::Trap => 1,
        BlockEnd::WindowCap => 0,
    };
    for i in (0..count).rev() {
        let e = effects[i];
        if i < count - protected_tail && e.pure && e.writes != 0 && e.writes & live == 0 {
            dead |= 1 << i;
            // A dead instruction contributes no reads.
            continue;
        }
        live = (live & !e.writes) | e.reads;
    }

    BlockScan {
        count,
        reads,
        writes,
        dead,
        end,
        delay_included,
    }
}
