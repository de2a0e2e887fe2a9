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

//! CPU (MIPS R3000A): guest register state and the reference interpreter
//!
//! The `CPU` struct is the single guest-CPU record: the translator's emitted
//! code and the interpreter both mutate it directly. The interpreter in this
//! module is the reference implementation of every opcode (load delay,
//! branch delay, overflow traps, COP0 exception entry) and is what the
//! translator falls back to for opcodes it does not specialise. The
//! equivalence between the two is a tested property of the crate.
//!
//! # Delay slots
//!
//! - A loaded value becomes architecturally visible one instruction late;
//!   the intervening instruction still sees the old register. A second load
//!   to the same target drops the first value, and its own value lands on
//!   the first's schedule; a direct write to the target cancels the latch.
//! - The instruction after a branch always executes with the pre-branch
//!   state; `pc`/`next_pc` carry this without special cases.

use crate::core::error::Result;
use crate::core::gte::GTE;
use crate::core::memory::Bus;

pub mod cop0;
pub(crate) mod decode;
mod instructions;

pub use cop0::{Exception, Status, COP0};
pub use decode::{cycle_cost, is_branch, is_trap};

pub(crate) use decode as dec;

/// A load whose register write has not landed yet
#[derive(Debug, Clone, Copy)]
pub struct PendingLoad {
    /// Target register
    pub reg: u8,
    /// Loaded value
    pub value: u32,
}

/// Guest CPU state plus the single-step reference interpreter
///
/// One instance lives for the process. Translated code addresses the
/// register file and the budget counter directly.
pub struct CPU {
    /// General purpose registers; r0 reads as zero
    pub regs: [u32; 32],
    /// Program counter of the next instruction to execute
    pub pc: u32,
    /// Successor of `pc`; diverges from `pc + 4` after a branch
    pub next_pc: u32,
    /// Multiplier/divider result pair
    pub hi: u32,
    /// Multiplier/divider result pair
    pub lo: u32,
    /// System control coprocessor
    pub cop0: COP0,
    /// Geometry engine (coprocessor 2)
    pub gte: GTE,
    /// Delayed-load latch
    pub load_delay: Option<PendingLoad>,
    /// PC of the instruction currently executing (exception EPC latch)
    pub current_pc: u32,
    /// Cycle budget remaining in the current scheduler slice; translated
    /// block epilogues subtract from this and abort when it reaches zero
    pub cycles_left: i32,

    /// True while the executing instruction sits in a branch delay slot
    in_branch_delay: bool,
    /// Set by a branch/jump for the following instruction
    next_is_delay_slot: bool,
    /// Register directly written by the executing instruction, for pending
    /// load cancellation
    written_reg: Option<u8>,
}

/// Reset vector (BIOS entry)
pub const RESET_PC: u32 = 0xBFC0_0000;

/// General exception vector with BEV set
pub const VECTOR_BEV: u32 = 0xBFC0_0180;

/// General exception vector with BEV clear
pub const VECTOR_RAM: u32 = 0x8000_0080;

impl CPU {
    /// CPU in power-on state
    pub fn new() -> Self {
        Self {
            regs: [0u32; 32],
            pc: RESET_PC,
            next_pc: RESET_PC.wrapping_add(4),
            hi: 0,
            lo: 0,
            cop0: COP0::new(),
            gte: GTE::new(),
            load_delay: None,
            current_pc: RESET_PC,
            cycles_left: 0,
            in_branch_delay: false,
            next_is_delay_slot: false,
            written_reg: None,
        }
    }

    /// Power-cycle the CPU
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read a general purpose register; r0 is hardwired to zero
    #[inline(always)]
    pub fn reg(&self, index: u8) -> u32 {
        if index == 0 {
            0
        } else {
            self.regs[index as usize]
        }
    }

    /// Write a general purpose register; writes to r0 are elided
    #[inline(always)]
    pub fn set_reg(&mut self, index: u8, value: u32) {
        if index != 0 {
            self.regs[index as usize] = value;
            self.written_reg = Some(index);
        }
    }

    /// Register write that bypasses pending-load bookkeeping (used when the
    /// latch itself lands)
    #[inline(always)]
    fn set_reg_raw(&mut self, index: u8, value: u32) {
        if index != 0 {
            self.regs[index as usize] = value;
        }
    }

    /// Latch a delayed load
    ///
    /// The value is not visible until after the next instruction executes.
    #[inline(always)]
    pub(crate) fn delayed_load(&mut self, index: u8, value: u32) {
        if index != 0 {
            self.load_delay = Some(PendingLoad { reg: index, value });
        }
    }

    /// Point execution at a new address (executable entry, vector)
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.next_pc = pc.wrapping_add(4);
        self.next_is_delay_slot = false;
    }

    /// Execute one instruction with reference semantics
    ///
    /// Returns the cycle cost of the executed instruction (same table the
    /// translator charges from).
    pub fn step(&mut self, bus: &mut Bus) -> Result<u32> {
        self.in_branch_delay = self.next_is_delay_slot;
        self.next_is_delay_slot = false;
        self.current_pc = self.pc;

        if self.current_pc & 3 != 0 {
            self.cop0.regs[COP0::BADA] = self.current_pc;
            self.exception(Exception::AddressErrorLoad);
            return Ok(1);
        }

        let instr = bus.fetch32(self.current_pc)?;

        self.pc = self.next_pc;
        self.next_pc = self.next_pc.wrapping_add(4);

        // The pending load lands after this instruction has read its
        // operands, unless this instruction displaces or overwrites it.
        let pending = self.load_delay.take();
        self.written_reg = None;

        self.execute(instr, bus)?;

        if let Some(p) = pending {
            if self.written_reg == Some(p.reg) {
                // A direct write in the shadow of the load wins; the stale
                // value must not resurrect.
            } else if matches!(self.load_delay, Some(n) if n.reg == p.reg) {
                // Second load to the same target: the first value is
                // dropped and the replacement lands on the original
                // schedule.
                let n = self.load_delay.take().unwrap();
                self.set_reg_raw(n.reg, n.value);
            } else {
                self.set_reg_raw(p.reg, p.value);
            }
        }

        Ok(cycle_cost(instr))
    }

    /// Enter the exception handler for the instruction at `current_pc`
    pub fn exception(&mut self, cause: Exception) {
        self.raise_exception_at(cause, self.current_pc, self.in_branch_delay);
    }

    /// COP0 exception entry with an explicit faulting PC
    ///
    /// Also used by translated code's cold slow paths, which carry the guest
    /// PC of the faulting instruction.
    pub fn raise_exception_at(&mut self, cause: Exception, pc: u32, in_delay_slot: bool) {
        // Push the KU/IE stack: current -> previous -> old, enter kernel
        // with interrupts off.
        let sr = self.cop0.regs[COP0::SR];
        let mode = sr & 0x3F;
        self.cop0.regs[COP0::SR] = (sr & !0x3F) | ((mode << 2) & 0x3F);

        let mut cause_reg = self.cop0.regs[COP0::CAUSE] & !0x8000_007C;
        cause_reg |= (cause as u32) << 2;

        let epc = if in_delay_slot {
            cause_reg |= 1 << 31;
            pc.wrapping_sub(4)
        } else {
            pc
        };
        self.cop0.regs[COP0::CAUSE] = cause_reg;
        self.cop0.regs[COP0::EPC] = epc;

        let handler = if self.cop0.status().contains(Status::BEV) {
            VECTOR_BEV
        } else {
            VECTOR_RAM
        };

        log::trace!(
            "exception {:?} epc=0x{:08X} bd={} -> 0x{:08X}",
            cause,
            epc,
            in_delay_slot,
            handler
        );

        self.pc = handler;
        self.next_pc = handler.wrapping_add(4);
        self.next_is_delay_slot = false;
        self.load_delay = None;
    }

    /// Mirror the hardware interrupt line into CAUSE.IP2 and report whether
    /// an interrupt exception should be taken now
    ///
    /// Delivery is suppressed between a branch and its delay slot
    /// (`next_pc` diverges from `pc + 4` there), so EPC bookkeeping stays
    /// simple at dispatch boundaries.
    pub fn poll_interrupt(&mut self, line_asserted: bool) -> bool {
        if line_asserted {
            self.cop0.regs[COP0::CAUSE] |= 1 << 10;
        } else {
            self.cop0.regs[COP0::CAUSE] &= !(1 << 10);
        }

        let sr = self.cop0.regs[COP0::SR];
        if sr & 1 == 0 {
            return false;
        }
        if self.next_pc != self.pc.wrapping_add(4) {
            return false;
        }
        let pending = (self.cop0.regs[COP0::CAUSE] >> 8) & 0xFF;
        let mask = (sr >> 8) & 0xFF;
        pending & mask != 0
    }

    /// Take a pending hardware interrupt: EPC is the next instruction
    pub fn take_interrupt(&mut self) {
        self.raise_exception_at(Exception::Interrupt, self.pc, false);
    }

    /// Branch helper: schedules the target and marks the next instruction
    /// as a delay slot
    #[inline(always)]
    fn branch_to(&mut self, target: u32) {
        self.next_pc = target;
        self.next_is_delay_slot = true;
    }
}

impl Default for CPU {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_and_ram() -> (CPU, Bus) {
        let mut cpu = CPU::new();
        cpu.set_pc(0x8000_0000);
        (cpu, Bus::new())
    }

    fn poke_code(bus: &mut Bus, base: u32, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            bus.write32(base + (i as u32) * 4, *w).unwrap();
        }
    }

    #[test]
    fn test_r0_is_hardwired() {
        let mut cpu = CPU::new();
        cpu.set_reg(0, 0xDEAD_BEEF);
        assert_eq!(cpu.reg(0), 0);
    }

    #[test]
    fn test_load_delay_one_instruction() {
        let (mut cpu, mut bus) = cpu_and_ram();
        bus.write32(0x100, 0x0000_0015).unwrap();
        cpu.set_reg(8, 0x100); // r8 = address
        cpu.set_reg(9, 7); // old r9

        // lw r9, 0(r8); add r10, r9, r9
        poke_code(&mut bus, 0x8000_0000, &[0x8D09_0000, 0x0129_5020]);
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();

        // The add saw the old r9; the load landed afterwards.
        assert_eq!(cpu.reg(10), 14);
        assert_eq!(cpu.reg(9), 0x15);
    }

    #[test]
    fn test_consecutive_loads_drop_first_value() {
        let (mut cpu, mut bus) = cpu_and_ram();
        bus.write32(0x100, 0x1111_1111).unwrap();
        bus.write32(0x104, 0x2222_2222).unwrap();
        cpu.set_reg(8, 0x100);

        // lw r9, 0(r8); lw r9, 4(r8); add r10, r9, r9
        poke_code(
            &mut bus,
            0x8000_0000,
            &[0x8D09_0000, 0x8D09_0004, 0x0129_5020],
        );
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();

        // The first value never lands; the second lands on the first's
        // schedule, so the add already sees it.
        assert_eq!(cpu.reg(10), 0x4444_4444);
        assert_eq!(cpu.reg(9), 0x2222_2222);
    }

    #[test]
    fn test_direct_write_cancels_pending_load() {
        let (mut cpu, mut bus) = cpu_and_ram();
        bus.write32(0x100, 0x5555_5555).unwrap();
        cpu.set_reg(8, 0x100);

        // lw r9, 0(r8); addiu r9, r0, 3; nop
        poke_code(
            &mut bus,
            0x8000_0000,
            &[0x8D09_0000, 0x2409_0003, 0x0000_0000],
        );
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();

        // The direct write wins; the stale load must not resurrect.
        assert_eq!(cpu.reg(9), 3);
    }

    #[test]
    fn test_branch_delay_slot_executes() {
        let (mut cpu, mut bus) = cpu_and_ram();

        // beq r0, r0, L; addi r1, r0, 1; L: addi r2, r0, 2
        poke_code(
            &mut bus,
            0x8000_0000,
            &[0x1000_0001, 0x2001_0001, 0x2002_0002],
        );
        cpu.step(&mut bus).unwrap(); // beq (taken)
        cpu.step(&mut bus).unwrap(); // delay slot
        cpu.step(&mut bus).unwrap(); // branch target

        assert_eq!(cpu.reg(1), 1);
        assert_eq!(cpu.reg(2), 2);
        assert_eq!(cpu.pc, 0x8000_000C);
    }

    #[test]
    fn test_exception_in_delay_slot_sets_bd() {
        let (mut cpu, mut bus) = cpu_and_ram();

        // beq r0, r0, +2; syscall
        poke_code(&mut bus, 0x8000_0000, &[0x1000_0002, 0x0000_000C]);
        cpu.step(&mut bus).unwrap();
        cpu.step(&mut bus).unwrap();

        assert_eq!(cpu.cop0.read(COP0::EPC), 0x8000_0000);
        assert_ne!(cpu.cop0.read(COP0::CAUSE) & (1 << 31), 0);
        assert_eq!(cpu.pc, VECTOR_BEV);
    }

    #[test]
    fn test_overflow_traps() {
        let (mut cpu, mut bus) = cpu_and_ram();
        cpu.set_reg(1, 0x7FFF_FFFF);
        cpu.set_reg(2, 1);

        // add r3, r1, r2
        poke_code(&mut bus, 0x8000_0000, &[0x0022_1820]);
        cpu.step(&mut bus).unwrap();

        assert_eq!(cpu.reg(3), 0, "destination must be untouched on trap");
        assert_eq!(
            (cpu.cop0.read(COP0::CAUSE) >> 2) & 0x1F,
            Exception::Overflow as u32
        );
    }

    #[test]
    fn test_interrupt_not_taken_between_branch_and_delay_slot() {
        let (mut cpu, mut bus) = cpu_and_ram();
        poke_code(&mut bus, 0x8000_0000, &[0x1000_0002, 0x0000_0000]);

        // Enable IEc and IM2, assert the line mid-branch.
        cpu.cop0.regs[COP0::SR] |= 0x0401;
        cpu.step(&mut bus).unwrap(); // beq: next_pc now diverges
        assert!(!cpu.poll_interrupt(true));
        cpu.step(&mut bus).unwrap(); // delay slot retires
        assert!(cpu.poll_interrupt(true));
    }

    #[test]
    fn test_rfe_pops_mode_stack() {
        let (mut cpu, mut bus) = cpu_and_ram();
        cpu.cop0.regs[COP0::SR] |= 0x1; // IEc
        poke_code(&mut bus, 0x8000_0000, &[0x0000_000C]); // syscall
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.cop0.read(COP0::SR) & 0x3F, 0x04, "pushed stack");

        // BIOS is not writable through the bus; run the handler's rfe from
        // RAM instead.
        cpu.set_pc(0x8000_0100);
        poke_code(&mut bus, 0x8000_0100, &[0x4200_0010]);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.cop0.read(COP0::SR) & 0x3F, 0x01, "popped stack");
    }
}
