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

//! Translation emit pass
//!
//! Walks the scanned sub-blocks of a super-block and emits one op sequence
//! per live guest instruction, maintaining:
//!
//! - a virtual-register table tracking compile-time constants; chained
//!   constant arithmetic folds away and a "dirty const" is only
//!   materialized into the guest record at points that can observe it
//!   (memory ops, traps, branch epilogues, cold paths);
//! - the one-instruction load delay, by parking a load in the scratch
//!   latch when the following instruction reads or overwrites its target,
//!   and dropping the latch when that instruction is itself a load to the
//!   same register;
//! - the GTE pipeline countdown, charging `countdown + 1` interlock cycles
//!   when a GTE register read or a new GTE command arrives early;
//! - per-opcode cycle costs summed over non-dead instructions only.
//!
//! Conditional branches keep compiling the fall-through path inline (super
//! block) and defer the taken epilogue to cold code at the tail, snapshot
//! of the virtual-register table included. Up to three continuations and
//! 200 guest instructions per super-block.

use super::cache::{code_page, page_generation, BlockCache};
use super::ops::{ArenaRef, CodeArena, Cond, FaultCtx, MemWidth, TrapCause, UOp};
use super::scan::{self, BlockEnd, SCAN_WINDOW};
use crate::core::cpu::dec;
use crate::core::gte;
use crate::core::memory::{Bus, SmcTracker};

/// Super-block caps
const MAX_DEFERRED: usize = 3;
const MAX_SUPER_INSTRS: u32 = 200;

/// Known device registers short-circuited on constant-address loads
const REG_I_STAT: u32 = 0x1F80_1070;
const REG_I_MASK: u32 = 0x1F80_1074;
const REG_GPUSTAT: u32 = 0x1F80_1814;

/// Compile-time view of one guest register
#[derive(Debug, Clone, Copy, Default)]
struct VReg {
    /// Value known at compile time
    known: Option<u32>,
    /// Known value not yet stored to the guest record
    dirty: bool,
}

/// A conditional branch whose taken side is deferred to cold code
struct Deferred {
    /// The `BranchCold` op to patch once the cold path exists
    branch_op: ArenaRef,
    /// Guest target of the taken side
    target_pc: u32,
    /// Cycles accumulated when the branch retires
    cycles: u32,
    /// Virtual-register table at the branch, for cold materialization
    vregs: [VReg; 32],
}

/// What the finished block hands back to the cache layer
pub(super) struct EmitResult {
    pub entry: ArenaRef,
    pub guest_len: u32,
    pub host_len: u32,
    pub cycles: u32,
    pub hash: u32,
    pub idle: bool,
    /// Direct links waiting on targets not yet compiled
    pub patch_requests: Vec<(ArenaRef, u32)>,
}

/// How the current sub-block wants to terminate
enum Terminal {
    /// Unconditional jump to a known PC
    Jump(u32),
    /// Jump through the captured register latch
    JumpReg,
    /// Conditional with a deferred taken side; fall-through continues
    CondFallThrough,
    /// No boundary: continue at the next PC via the dispatcher
    Continue(u32),
    /// Trap already emitted; nothing follows
    Done,
}

pub(super) struct Emitter<'a> {
    arena: &'a mut CodeArena,
    cache: &'a BlockCache,
    smc: &'a SmcTracker,
    start_pc: u32,
    pc: u32,
    cycles: u32,
    guest_count: u32,
    gte_countdown: u32,
    vregs: [VReg; 32],
    /// Load whose register write is parked in the scratch latch
    pending_load: Option<u8>,
    deferred: Vec<Deferred>,
    patch_requests: Vec<(ArenaRef, u32)>,
    hash: u32,
    /// Set by anything the idle-loop detector must refuse
    side_effects: bool,
    /// Terminal targets the block's own start
    loops_to_self: bool,
    /// Current instruction sits in a branch delay slot
    in_delay_slot: bool,
}

impl<'a> Emitter<'a> {
    pub(super) fn new(
        arena: &'a mut CodeArena,
        cache: &'a BlockCache,
        smc: &'a SmcTracker,
        pc: u32,
    ) -> Self {
        Self {
            arena,
            cache,
            smc,
            start_pc: pc,
            pc,
            cycles: 0,
            guest_count: 0,
            gte_countdown: 0,
            vregs: [VReg::default(); 32],
            pending_load: None,
            deferred: Vec::new(),
            patch_requests: Vec::new(),
            hash: 5381,
            side_effects: false,
            loops_to_self: false,
            in_delay_slot: false,
        }
    }

    /// Translate the super-block starting at the emitter's PC
    pub(super) fn compile(mut self, bus: &Bus) -> Option<EmitResult> {
        let entry = self.arena.cursor();

        loop {
            let words = fetch_window(bus, self.pc)?;
            let scanned = scan::scan(&words);
            if scanned.count == 0 {
                return None;
            }
            // A lone branch pressed against the end of a mapped region
            // cannot make progress here; the interpreter owns that corner.
            if scanned.end == BlockEnd::Branch && !scanned.delay_included && scanned.count == 1 {
                return None;
            }
            self.hash = continue_djb2(self.hash, &words[..scanned.count]);

            let terminal = self.emit_sub_block(&words, &scanned);
            self.guest_count += scanned.count as u32;

            match terminal {
                Terminal::Jump(target) => {
                    self.loops_to_self = target == self.start_pc;
                    self.emit_epilogue(target);
                    break;
                }
                Terminal::JumpReg => {
                    self.flush_frame();
                    self.arena.push(UOp::ExitIndirect {
                        cycles: self.cycles,
                    });
                    break;
                }
                Terminal::Continue(next_pc) => {
                    self.emit_epilogue(next_pc);
                    break;
                }
                Terminal::Done => break,
                Terminal::CondFallThrough => {
                    if self.deferred.len() >= MAX_DEFERRED
                        || self.guest_count >= MAX_SUPER_INSTRS
                    {
                        let next = self.pc;
                        self.emit_epilogue(next);
                        break;
                    }
                    // Keep compiling the fall-through inline.
                }
            }
        }

        self.emit_cold_paths();

        Some(EmitResult {
            entry,
            guest_len: self.guest_count,
            host_len: self.arena.cursor() - entry,
            cycles: self.cycles,
            hash: self.hash,
            idle: self.loops_to_self && !self.side_effects && self.guest_count <= 8,
            patch_requests: self.patch_requests,
        })
    }

    // ---- sub-block body ----

    /// Emit every live instruction of one scanned sub-block and classify
    /// its boundary
    fn emit_sub_block(&mut self, words: &[u32], scanned: &scan::BlockScan) -> Terminal {
        let count = scanned.count;
        let has_delay = scanned.end == BlockEnd::Branch && scanned.delay_included;
        let branch_idx = if has_delay { count - 2 } else { usize::MAX };

        // A branch at the window edge without room for its delay slot is
        // cut off; the dispatcher re-enters at the branch itself.
        if scanned.end == BlockEnd::Branch && !has_delay {
            for i in 0..count - 1 {
                self.emit_instr(words[i], scanned.dead >> i & 1 != 0, peek(words, i, count));
                self.pc = self.pc.wrapping_add(4);
            }
            return Terminal::Continue(self.pc);
        }

        let mut branch: Option<Terminal> = None;
        let mut cond_target: Option<u32> = None;

        for i in 0..count {
            let instr = words[i];
            let dead = scanned.dead >> i & 1 != 0;
            self.in_delay_slot = has_delay && i == count - 1;

            if i == branch_idx {
                branch = Some(self.emit_branch_head(instr, &mut cond_target));
            } else {
                self.emit_instr(instr, dead, peek(words, i, count));
            }
            self.pc = self.pc.wrapping_add(4);
        }
        self.in_delay_slot = false;

        match branch {
            Some(Terminal::CondFallThrough) => {
                // A statically-not-taken branch has no target: it simply
                // vanishes and the fall-through continues.
                if let Some(target) = cond_target {
                    let branch_op = self.arena.push(UOp::BranchCold { target: 0 });
                    self.deferred.push(Deferred {
                        branch_op,
                        target_pc: target,
                        // Both sides have retired the same instructions at
                        // this point (delay slot included).
                        cycles: self.cycles,
                        vregs: self.vregs,
                    });
                }
                Terminal::CondFallThrough
            }
            Some(t) => t,
            None => {
                if scanned.end == BlockEnd::Trap {
                    Terminal::Done
                } else {
                    Terminal::Continue(self.pc)
                }
            }
        }
    }

    /// Emit the pre-delay-slot half of a branch: condition or target latch
    ///
    /// The epilogue itself is emitted after the delay slot.
    fn emit_branch_head(&mut self, instr: u32, cond_target: &mut Option<u32>) -> Terminal {
        self.charge(instr);
        let delay_pc = self.pc.wrapping_add(4);
        let ra = delay_pc.wrapping_add(4);
        // Branch targets are relative to the delay slot.
        let rel_target = delay_pc.wrapping_add(dec::simm(instr) << 2);
        let rs = dec::rs(instr);
        let rt = dec::rt(instr);

        let head = match dec::op(instr) {
            0x02 => Terminal::Jump((delay_pc & 0xF000_0000) | (dec::jtarget(instr) << 2)),
            0x03 => {
                self.set_const(31, ra);
                Terminal::Jump((delay_pc & 0xF000_0000) | (dec::jtarget(instr) << 2))
            }
            0x00 => {
                // JR / JALR
                let link_rd = if dec::funct(instr) == 0x09 {
                    Some(dec::rd(instr))
                } else {
                    None
                };
                let head = if let Some(target) = self.value_of(rs) {
                    Terminal::Jump(target)
                } else {
                    self.materialize(rs);
                    self.arena.push(UOp::CaptureJump { rs });
                    self.side_effects = true;
                    Terminal::JumpReg
                };
                if let Some(rd) = link_rd {
                    self.set_const(rd, ra);
                }
                head
            }
            op => {
                // Conditional family; REGIMM may link.
                let (cond, uses_rt) = match op {
                    0x04 => (Cond::Eq, true),
                    0x05 => (Cond::Ne, true),
                    0x06 => (Cond::LeZ, false),
                    0x07 => (Cond::GtZ, false),
                    _ => {
                        if rt & 1 != 0 {
                            (Cond::GeZ, false)
                        } else {
                            (Cond::LtZ, false)
                        }
                    }
                };
                if op == 0x01 && rt & 0x1E == 0x10 {
                    self.set_const(31, ra);
                }

                let folded = self.fold_condition(cond, rs, if uses_rt { rt } else { 0 });
                match folded {
                    Some(true) => Terminal::Jump(rel_target),
                    Some(false) => {
                        // Statically not taken: the branch disappears and
                        // the delay slot simply precedes the fall-through.
                        Terminal::CondFallThrough
                    }
                    None => {
                        self.materialize(rs);
                        if uses_rt {
                            self.materialize(rt);
                        }
                        self.arena.push(UOp::SetCond {
                            cond,
                            rs,
                            rt: if uses_rt { rt } else { 0 },
                        });
                        *cond_target = Some(rel_target);
                        Terminal::CondFallThrough
                    }
                }
            }
        };

        self.flush_pending_after_instr(0, instr_writes_gpr(instr));
        head
    }

    /// Fold a branch condition when its operands are compile-time constants
    fn fold_condition(&self, cond: Cond, rs: u8, rt: u8) -> Option<bool> {
        let a = self.value_of(rs)?;
        match cond {
            Cond::Eq => Some(a == self.value_of(rt)?),
            Cond::Ne => Some(a != self.value_of(rt)?),
            Cond::LeZ => Some(a as i32 <= 0),
            Cond::GtZ => Some(a as i32 > 0),
            Cond::LtZ => Some((a as i32) < 0),
            Cond::GeZ => Some(a as i32 >= 0),
        }
    }

    // ---- per-instruction emission ----

    /// Charge cycles and model the GTE pipeline for one instruction
    fn charge(&mut self, instr: u32) {
        let cost = dec::cycle_cost(instr);
        let gte_read = is_gte_read(instr);
        let gte_cmd = is_gte_command(instr);

        if self.gte_countdown > 0 && (gte_read || gte_cmd) {
            // Interlock: the pipeline drains before the access proceeds.
            self.cycles += self.gte_countdown + 1;
            self.gte_countdown = 0;
        }
        self.cycles += cost;
        self.gte_countdown = self.gte_countdown.saturating_sub(cost);
        if gte_cmd {
            self.gte_countdown = gte::command_latency(instr);
        }
    }

    /// Emit one non-branch instruction
    fn emit_instr(&mut self, instr: u32, dead: bool, next: Option<u32>) {
        if dead {
            // Skipped entirely, but the tracking for its destination must
            // not survive.
            let (_, writes) = scan::reads_writes(instr);
            for r in 1..32u8 {
                if writes & (1 << r) != 0 {
                    self.set_unknown(r);
                }
            }
            self.flush_pending_after_instr(0, writes);
            return;
        }

        self.charge(instr);

        let rs = dec::rs(instr);
        let rt = dec::rt(instr);
        let rd = dec::rd(instr);
        let simm = dec::simm(instr);
        let imm = dec::imm(instr);
        let ctx = self.fault_ctx();

        let mut new_load_to: u8 = 0;
        match dec::op(instr) {
            0x00 => self.emit_special(instr, rs, rt, rd, ctx),
            0x08 => self.emit_addi(rt, rs, simm, ctx),
            0x09 => self.emit_binop_imm(rt, rs, simm, BinImm::Add),
            0x0A => self.emit_binop_imm(rt, rs, simm, BinImm::Slt),
            0x0B => self.emit_binop_imm(rt, rs, simm, BinImm::Sltu),
            0x0C => self.emit_binop_imm(rt, rs, imm, BinImm::And),
            0x0D => self.emit_binop_imm(rt, rs, imm, BinImm::Or),
            0x0E => self.emit_binop_imm(rt, rs, imm, BinImm::Xor),
            0x0F => self.set_const(rt, imm << 16),
            0x10 => self.emit_cop0(instr, rs, rt, rd, ctx),
            0x12 => self.emit_cop2(instr, rs, rt, rd),
            0x20 => new_load_to = self.emit_load(rt, rs, simm, MemWidth::Byte, true, next, ctx),
            0x21 => new_load_to = self.emit_load(rt, rs, simm, MemWidth::Half, true, next, ctx),
            0x22 | 0x26 => {
                self.flush_dirty();
                self.arena.push(UOp::LoadUnaligned {
                    rd: rt,
                    base: rs,
                    off: simm as i16,
                    left: dec::op(instr) == 0x22,
                    ctx,
                });
                self.side_effects = true;
                self.set_unknown(rt);
            }
            0x23 => new_load_to = self.emit_load(rt, rs, simm, MemWidth::Word, false, next, ctx),
            0x24 => new_load_to = self.emit_load(rt, rs, simm, MemWidth::Byte, false, next, ctx),
            0x25 => new_load_to = self.emit_load(rt, rs, simm, MemWidth::Half, false, next, ctx),
            0x28 => self.emit_store(rt, rs, simm, MemWidth::Byte, ctx),
            0x29 => self.emit_store(rt, rs, simm, MemWidth::Half, ctx),
            0x2A | 0x2E => {
                self.flush_dirty();
                self.materialize(rt);
                self.arena.push(UOp::StoreUnaligned {
                    rt,
                    base: rs,
                    off: simm as i16,
                    left: dec::op(instr) == 0x2A,
                    ctx,
                });
                self.side_effects = true;
            }
            0x2B => self.emit_store(rt, rs, simm, MemWidth::Word, ctx),
            0x32 => {
                self.flush_dirty();
                self.materialize(rs);
                self.arena.push(UOp::GteLoad {
                    cr: rt,
                    base: rs,
                    off: simm as i16,
                    ctx,
                });
                self.side_effects = true;
            }
            0x3A => {
                self.flush_dirty();
                self.materialize(rs);
                self.arena.push(UOp::GteStore {
                    cr: rt,
                    base: rs,
                    off: simm as i16,
                    ctx,
                });
                self.side_effects = true;
            }
            _ => {
                self.flush_dirty();
                self.arena.push(UOp::Trap {
                    cause: TrapCause::Reserved,
                    ctx,
                });
                self.side_effects = true;
            }
        }

        self.flush_pending_after_instr(new_load_to, instr_writes_gpr(instr));
    }

    fn emit_special(&mut self, instr: u32, rs: u8, rt: u8, rd: u8, ctx: FaultCtx) {
        match dec::funct(instr) {
            0x00 => self.emit_shift_imm(rd, rt, dec::shamt(instr), ShiftKind::Sll),
            0x02 => self.emit_shift_imm(rd, rt, dec::shamt(instr), ShiftKind::Srl),
            0x03 => self.emit_shift_imm(rd, rt, dec::shamt(instr), ShiftKind::Sra),
            0x04 => self.emit_shift_var(rd, rt, rs, ShiftKind::Sll),
            0x06 => self.emit_shift_var(rd, rt, rs, ShiftKind::Srl),
            0x07 => self.emit_shift_var(rd, rt, rs, ShiftKind::Sra),
            0x0C => {
                self.flush_frame();
                self.arena.push(UOp::Trap {
                    cause: TrapCause::Syscall,
                    ctx,
                });
                self.side_effects = true;
            }
            0x0D => {
                self.flush_frame();
                self.arena.push(UOp::Trap {
                    cause: TrapCause::Break,
                    ctx,
                });
                self.side_effects = true;
            }
            0x10 => self.emit_hilo_read(rd, true),
            0x12 => self.emit_hilo_read(rd, false),
            0x11 | 0x13 => {
                self.materialize(rs);
                self.arena.push(if dec::funct(instr) == 0x11 {
                    UOp::MtHi { rs }
                } else {
                    UOp::MtLo { rs }
                });
                self.side_effects = true;
            }
            f @ (0x18 | 0x19 | 0x1A | 0x1B) => {
                self.materialize(rs);
                self.materialize(rt);
                self.arena.push(match f {
                    0x18 => UOp::Mult { rs, rt },
                    0x19 => UOp::Multu { rs, rt },
                    0x1A => UOp::Div { rs, rt },
                    _ => UOp::Divu { rs, rt },
                });
                self.side_effects = true;
            }
            0x20 => self.emit_add_trap(rd, rs, rt, false, ctx),
            0x22 => self.emit_add_trap(rd, rs, rt, true, ctx),
            f @ (0x21 | 0x23 | 0x24 | 0x25 | 0x26 | 0x27 | 0x2A | 0x2B) => {
                self.emit_binop(rd, rs, rt, f)
            }
            _ => {
                self.flush_dirty();
                self.arena.push(UOp::Trap {
                    cause: TrapCause::Reserved,
                    ctx,
                });
                self.side_effects = true;
            }
        }
    }

    fn emit_binop(&mut self, rd: u8, rs: u8, rt: u8, funct: u32) {
        let fold = |a: u32, b: u32| -> u32 {
            match funct {
                0x21 => a.wrapping_add(b),
                0x23 => a.wrapping_sub(b),
                0x24 => a & b,
                0x25 => a | b,
                0x26 => a ^ b,
                0x27 => !(a | b),
                0x2A => ((a as i32) < (b as i32)) as u32,
                _ => (a < b) as u32,
            }
        };
        if let (Some(a), Some(b)) = (self.value_of(rs), self.value_of(rt)) {
            self.set_const(rd, fold(a, b));
            return;
        }
        // ADDU/OR against r0 degrade to moves.
        if matches!(funct, 0x21 | 0x25) {
            if rt == 0 || self.value_of(rt) == Some(0) {
                self.emit_move(rd, rs);
                return;
            }
            if rs == 0 || self.value_of(rs) == Some(0) {
                self.emit_move(rd, rt);
                return;
            }
        }
        self.materialize(rs);
        self.materialize(rt);
        self.arena.push(match funct {
            0x21 => UOp::Add { rd, rs, rt },
            0x23 => UOp::Sub { rd, rs, rt },
            0x24 => UOp::And { rd, rs, rt },
            0x25 => UOp::Or { rd, rs, rt },
            0x26 => UOp::Xor { rd, rs, rt },
            0x27 => UOp::Nor { rd, rs, rt },
            0x2A => UOp::Slt { rd, rs, rt },
            _ => UOp::Sltu { rd, rs, rt },
        });
        self.set_unknown(rd);
    }

    fn emit_move(&mut self, rd: u8, rs: u8) {
        if rd == 0 || rd == rs {
            return;
        }
        if let Some(v) = self.value_of(rs) {
            self.set_const(rd, v);
            return;
        }
        self.arena.push(UOp::Move { rd, rs });
        self.set_unknown(rd);
    }

    fn emit_binop_imm(&mut self, rt: u8, rs: u8, imm: u32, kind: BinImm) {
        if let Some(a) = self.value_of(rs) {
            let v = match kind {
                BinImm::Add => a.wrapping_add(imm),
                BinImm::And => a & imm,
                BinImm::Or => a | imm,
                BinImm::Xor => a ^ imm,
                BinImm::Slt => ((a as i32) < (imm as i32)) as u32,
                BinImm::Sltu => (a < imm) as u32,
            };
            self.set_const(rt, v);
            return;
        }
        if imm == 0 && matches!(kind, BinImm::Add | BinImm::Or | BinImm::Xor) {
            self.emit_move(rt, rs);
            return;
        }
        self.materialize(rs);
        self.arena.push(match kind {
            BinImm::Add => UOp::AddImm { rd: rt, rs, imm },
            BinImm::And => UOp::AndImm { rd: rt, rs, imm },
            BinImm::Or => UOp::OrImm { rd: rt, rs, imm },
            BinImm::Xor => UOp::XorImm { rd: rt, rs, imm },
            BinImm::Slt => UOp::SltImm { rd: rt, rs, imm },
            BinImm::Sltu => UOp::SltuImm { rd: rt, rs, imm },
        });
        self.set_unknown(rt);
    }

    fn emit_addi(&mut self, rt: u8, rs: u8, simm: u32, ctx: FaultCtx) {
        if let Some(a) = self.value_of(rs) {
            if let Some(v) = (a as i32).checked_add(simm as i32) {
                self.set_const(rt, v as u32);
                return;
            }
            // Statically overflowing ADDI: leave the trap to runtime.
        }
        self.flush_dirty();
        self.arena.push(UOp::AddImmTrap {
            rd: rt,
            rs,
            imm: simm,
            ctx,
        });
        self.side_effects = true;
        self.set_unknown(rt);
    }

    fn emit_add_trap(&mut self, rd: u8, rs: u8, rt: u8, sub: bool, ctx: FaultCtx) {
        if let (Some(a), Some(b)) = (self.value_of(rs), self.value_of(rt)) {
            let r = if sub {
                (a as i32).checked_sub(b as i32)
            } else {
                (a as i32).checked_add(b as i32)
            };
            if let Some(v) = r {
                self.set_const(rd, v as u32);
                return;
            }
        }
        self.flush_dirty();
        self.arena.push(if sub {
            UOp::SubTrap { rd, rs, rt, ctx }
        } else {
            UOp::AddTrap { rd, rs, rt, ctx }
        });
        self.side_effects = true;
        self.set_unknown(rd);
    }

    fn emit_shift_imm(&mut self, rd: u8, rt: u8, sh: u8, kind: ShiftKind) {
        if let Some(a) = self.value_of(rt) {
            let v = match kind {
                ShiftKind::Sll => a << sh,
                ShiftKind::Srl => a >> sh,
                ShiftKind::Sra => ((a as i32) >> sh) as u32,
            };
            self.set_const(rd, v);
            return;
        }
        if sh == 0 {
            self.emit_move(rd, rt);
            return;
        }
        self.materialize(rt);
        self.arena.push(match kind {
            ShiftKind::Sll => UOp::Sll { rd, rt, sh },
            ShiftKind::Srl => UOp::Srl { rd, rt, sh },
            ShiftKind::Sra => UOp::Sra { rd, rt, sh },
        });
        self.set_unknown(rd);
    }

    fn emit_shift_var(&mut self, rd: u8, rt: u8, rs: u8, kind: ShiftKind) {
        if let (Some(a), Some(s)) = (self.value_of(rt), self.value_of(rs)) {
            let s = s & 0x1F;
            let v = match kind {
                ShiftKind::Sll => a << s,
                ShiftKind::Srl => a >> s,
                ShiftKind::Sra => ((a as i32) >> s) as u32,
            };
            self.set_const(rd, v);
            return;
        }
        self.materialize(rt);
        self.materialize(rs);
        self.arena.push(match kind {
            ShiftKind::Sll => UOp::Sllv { rd, rt, rs },
            ShiftKind::Srl => UOp::Srlv { rd, rt, rs },
            ShiftKind::Sra => UOp::Srav { rd, rt, rs },
        });
        self.set_unknown(rd);
    }

    fn emit_hilo_read(&mut self, rd: u8, hi: bool) {
        self.arena
            .push(if hi { UOp::MfHi { rd } } else { UOp::MfLo { rd } });
        self.set_unknown(rd);
    }

    fn emit_cop0(&mut self, instr: u32, rs: u8, rt: u8, rd: u8, ctx: FaultCtx) {
        self.side_effects = true;
        match rs {
            0x00 => {
                self.arena.push(UOp::Mfc0 { rd: rt, cr: rd });
                self.set_unknown(rt);
            }
            0x04 => {
                self.flush_dirty();
                self.materialize(rt);
                self.arena.push(UOp::Mtc0 { rt, cr: rd });
            }
            0x10 if instr & 0x3F == 0x10 => {
                self.arena.push(UOp::Rfe);
            }
            _ => {
                self.flush_dirty();
                self.arena.push(UOp::Trap {
                    cause: TrapCause::Reserved,
                    ctx,
                });
            }
        }
    }

    fn emit_cop2(&mut self, instr: u32, rs: u8, rt: u8, rd: u8) {
        self.side_effects = true;
        if instr & (1 << 25) != 0 {
            self.arena.push(UOp::GteCommand {
                cmd: instr & 0x01FF_FFFF,
            });
            return;
        }
        match rs {
            0x00 => {
                self.arena.push(UOp::Mfc2 { rd: rt, cr: rd });
                self.set_unknown(rt);
            }
            0x02 => {
                self.arena.push(UOp::Cfc2 { rd: rt, cr: rd });
                self.set_unknown(rt);
            }
            0x04 => {
                self.materialize(rt);
                self.arena.push(UOp::Mtc2 { rt, cr: rd });
            }
            _ => {
                self.materialize(rt);
                self.arena.push(UOp::Ctc2 { rt, cr: rd });
            }
        }
    }

    /// Loads, with the delay deferral and constant-address resolution
    ///
    /// Returns the latched register (or 0) so the caller's pending-load
    /// bookkeeping can see displacement by a second load.
    fn emit_load(
        &mut self,
        rt: u8,
        base: u8,
        simm: u32,
        width: MemWidth,
        signed: bool,
        next: Option<u32>,
        ctx: FaultCtx,
    ) -> u8 {
        self.side_effects = true;
        self.flush_dirty();

        // Defer when the very next instruction touches the target.
        let defer = rt != 0
            && next.map_or(false, |n| {
                let (r, w) = scan::reads_writes(n);
                (r | w) & (1 << rt) != 0
            });

        // Constant-address accesses resolve at compile time.
        if let Some(addr) = self.value_of(base).map(|b| b.wrapping_add(simm)) {
            if !defer {
                if let Some(offset) = ram_offset(addr, width) {
                    self.arena.push(UOp::LoadConst {
                        rd: rt,
                        offset,
                        width,
                        signed,
                    });
                    self.set_unknown(rt);
                    return 0;
                }
                let phys = addr & Bus::PHYS_MASK;
                if width == MemWidth::Word {
                    let short = match phys {
                        REG_I_STAT => Some(UOp::ReadIStat { rd: rt }),
                        REG_I_MASK => Some(UOp::ReadIMask { rd: rt }),
                        REG_GPUSTAT => Some(UOp::ReadGpuStat { rd: rt }),
                        _ => None,
                    };
                    if let Some(op) = short {
                        self.arena.push(op);
                        self.set_unknown(rt);
                        return 0;
                    }
                }
            }
        }

        self.materialize(base);
        if defer {
            self.arena.push(UOp::LoadLatch {
                base,
                off: simm as i16,
                width,
                signed,
                ctx,
            });
            self.pending_load = Some(rt);
            return rt;
        }
        self.arena.push(UOp::Load {
            rd: rt,
            base,
            off: simm as i16,
            width,
            signed,
            ctx,
        });
        self.set_unknown(rt);
        0
    }

    fn emit_store(&mut self, rt: u8, base: u8, simm: u32, width: MemWidth, ctx: FaultCtx) {
        self.side_effects = true;
        self.flush_dirty();
        self.materialize(rt);

        if let Some(addr) = self.value_of(base).map(|b| b.wrapping_add(simm)) {
            if let Some(offset) = ram_offset(addr, width) {
                self.arena.push(UOp::StoreConst { rt, offset, width });
                return;
            }
        }
        self.materialize(base);
        self.arena.push(UOp::Store {
            rt,
            base,
            off: simm as i16,
            width,
            ctx,
        });
    }

    // ---- pending load upkeep ----

    /// Resolve the load-delay latch after the instruction that follows the
    /// deferring load
    ///
    /// `new_latch` is the register a load emitted *this* instruction
    /// latched (displacement case); `wrote_gpr` covers direct overwrites.
    fn flush_pending_after_instr(&mut self, new_latch: u8, wrote_gpr: u32) {
        let Some(rd) = self.pending_load else { return };
        self.pending_load = None;
        if new_latch == rd {
            // Second load to the same target: the first value was dropped
            // (the latch already holds the replacement) and it lands on
            // the first's schedule, which is now.
            self.arena.push(UOp::LatchFlush { rd });
            self.set_unknown(rd);
            return;
        }
        if wrote_gpr & (1 << rd) != 0 {
            // Direct overwrite cancels the pending value.
            return;
        }
        self.arena.push(UOp::LatchFlush { rd });
        self.set_unknown(rd);
    }

    // ---- epilogues ----

    /// Flush everything the world outside the block may observe
    fn flush_frame(&mut self) {
        self.flush_dirty();
        if let Some(rd) = self.pending_load.take() {
            self.arena.push(UOp::LatchFlush { rd });
            self.set_unknown(rd);
        }
    }

    /// Terminal for a known target: direct link when the target block is
    /// compiled and fresh, otherwise a pending link / dispatcher exit
    fn emit_epilogue(&mut self, target: u32) {
        self.flush_frame();
        let cycles = self.cycles;

        if let Some(idx) = self.cache.lookup_table(target, self.smc) {
            let blk = self.cache.block(idx);
            self.arena.push(UOp::Link {
                entry: blk.entry,
                pc: target,
                cycles,
            });
            return;
        }
        let site = self.arena.push(UOp::LinkPending { pc: target, cycles });
        self.patch_requests.push((site, target));
    }

    /// Cold taken-paths for the deferred conditional branches
    fn emit_cold_paths(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for d in deferred {
            let cold = self.arena.cursor();
            self.arena.patch(d.branch_op, UOp::BranchCold { target: cold });

            // Restore the virtual-register table: materialize what was
            // dirty at the branch.
            for r in 1..32u8 {
                let v = d.vregs[r as usize];
                if v.dirty {
                    if let Some(imm) = v.known {
                        self.arena.push(UOp::MovImm { rd: r, imm });
                    }
                }
            }

            if let Some(idx) = self.cache.lookup_table(d.target_pc, self.smc) {
                let blk = self.cache.block(idx);
                self.arena.push(UOp::Link {
                    entry: blk.entry,
                    pc: d.target_pc,
                    cycles: d.cycles,
                });
            } else {
                let site = self.arena.push(UOp::LinkPending {
                    pc: d.target_pc,
                    cycles: d.cycles,
                });
                self.patch_requests.push((site, d.target_pc));
            }
        }
    }

    // ---- virtual registers ----

    fn value_of(&self, r: u8) -> Option<u32> {
        if r == 0 {
            Some(0)
        } else {
            self.vregs[r as usize].known
        }
    }

    fn set_const(&mut self, rd: u8, value: u32) {
        if rd == 0 {
            return;
        }
        let v = &mut self.vregs[rd as usize];
        if v.known == Some(value) && !v.dirty {
            return;
        }
        *v = VReg {
            known: Some(value),
            dirty: true,
        };
    }

    fn set_unknown(&mut self, rd: u8) {
        if rd != 0 {
            self.vregs[rd as usize] = VReg::default();
        }
    }

    /// Store a dirty constant back to the guest record
    fn materialize(&mut self, r: u8) {
        if r == 0 {
            return;
        }
        let v = self.vregs[r as usize];
        if v.dirty {
            if let Some(imm) = v.known {
                self.arena.push(UOp::MovImm { rd: r, imm });
            }
            self.vregs[r as usize].dirty = false;
        }
    }

    fn flush_dirty(&mut self) {
        for r in 1..32u8 {
            self.materialize(r);
        }
    }

    fn fault_ctx(&self) -> FaultCtx {
        FaultCtx {
            pc: self.pc,
            cycles: self.cycles.min(u16::MAX as u32) as u16,
            bd: self.in_delay_slot,
        }
    }
}

enum BinImm {
    Add,
    And,
    Or,
    Xor,
    Slt,
    Sltu,
}

enum ShiftKind {
    Sll,
    Srl,
    Sra,
}

/// GPR write mask of one instruction (for pending-load cancellation)
fn instr_writes_gpr(instr: u32) -> u32 {
    scan::reads_writes(instr).1
}

fn is_gte_command(instr: u32) -> bool {
    dec::op(instr) == 0x12 && instr & (1 << 25) != 0
}

/// GTE register reads that interlock against the pipeline
fn is_gte_read(instr: u32) -> bool {
    (dec::op(instr) == 0x12 && instr & (1 << 25) == 0 && matches!(dec::rs(instr), 0x00 | 0x02))
        || dec::op(instr) == 0x3A
}

fn peek(words: &[u32], i: usize, count: usize) -> Option<u32> {
    if i + 1 < count {
        Some(words[i + 1])
    } else {
        None
    }
}

/// RAM byte offset for a constant guest address, when the access stays in
/// the directly-mapped first mirror and is naturally aligned
fn ram_offset(addr: u32, width: MemWidth) -> Option<u32> {
    let align = match width {
        MemWidth::Byte => 0,
        MemWidth::Half => 1,
        MemWidth::Word => 3,
    };
    if addr & align != 0 {
        return None;
    }
    let phys = addr & Bus::PHYS_MASK;
    if (phys as usize) < Bus::RAM_SIZE {
        Some(phys)
    } else {
        None
    }
}

/// Fetch the scan window for a compileable PC
fn fetch_window(bus: &Bus, pc: u32) -> Option<Vec<u32>> {
    code_page(pc)?;
    let phys = pc & Bus::PHYS_MASK;
    let mut words = Vec::with_capacity(SCAN_WINDOW);
    for i in 0..SCAN_WINDOW as u32 {
        let addr = phys.wrapping_add(i * 4);
        if (addr as usize) < Bus::RAM_SIZE {
            words.push(bus.ram_word(addr));
        } else if (0x1FC0_0000..0x1FC8_0000).contains(&addr) {
            let off = (addr - 0x1FC0_0000) as usize;
            let bios = bus.bios();
            words.push(u32::from_le_bytes(bios[off..off + 4].try_into().unwrap()));
        } else {
            break;
        }
    }
    if words.is_empty() {
        None
    } else {
        Some(words)
    }
}

/// Extend a running djb2 state; seeded with 5381 this matches
/// [`super::cache::djb2`] over the concatenated words
fn continue_djb2(seed: u32, words: &[u32]) -> u32 {
    let mut h = seed;
    for w in words {
        h = h.wrapping_shl(5).wrapping_add(h).wrapping_add(*w);
    }
    h
}

/// Snapshot generation for the block's home page at compile time
pub(super) fn snapshot_generation(smc: &SmcTracker, pc: u32) -> Option<u32> {
    code_page(pc).map(|page| page_generation(smc, page))
}
