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

//! Branches and jumps
//!
//! At execute time `pc` already points at the delay slot and `next_pc` one
//! past it, so a taken branch only replaces `next_pc`. Branch targets are
//! relative to the delay slot. The REGIMM encodings follow the hardware
//! quirk: bit 0 of rt selects GE, and only rt & 0x1E == 0x10 links.

use super::super::{dec, CPU};

impl CPU {
    #[inline(always)]
    fn branch_target(&self, instr: u32) -> u32 {
        // pc currently addresses the delay slot.
        self.pc.wrapping_add(dec::simm(instr) << 2)
    }

    /// J: jump within the current 256 MiB region
    pub(crate) fn op_j(&mut self, instr: u32) {
        let target = (self.pc & 0xF000_0000) | (dec::jtarget(instr) << 2);
        self.branch_to(target);
    }

    /// JAL: J with the return address in r31
    pub(crate) fn op_jal(&mut self, instr: u32) {
        let ra = self.next_pc;
        self.op_j(instr);
        self.set_reg(31, ra);
    }

    /// JR: jump through a register
    pub(crate) fn op_jr(&mut self, rs: u8) {
        let target = self.reg(rs);
        self.branch_to(target);
    }

    /// JALR: JR with the return address in rd
    pub(crate) fn op_jalr(&mut self, rd: u8, rs: u8) {
        let target = self.reg(rs);
        let ra = self.next_pc;
        self.branch_to(target);
        self.set_reg(rd, ra);
    }

    /// BEQ
    pub(crate) fn op_beq(&mut self, instr: u32, rs: u8, rt: u8) {
        if self.reg(rs) == self.reg(rt) {
            let t = self.branch_target(instr);
            self.branch_to(t);
        }
    }

    /// BNE
    pub(crate) fn op_bne(&mut self, instr: u32, rs: u8, rt: u8) {
        if self.reg(rs) != self.reg(rt) {
            let t = self.branch_target(instr);
            self.branch_to(t);
        }
    }

    /// BLEZ
    pub(crate) fn op_blez(&mut self, instr: u32, rs: u8) {
        if (self.reg(rs) as i32) <= 0 {
            let t = self.branch_target(instr);
            self.branch_to(t);
        }
    }

    /// BGTZ
    pub(crate) fn op_bgtz(&mut self, instr: u32, rs: u8) {
        if (self.reg(rs) as i32) > 0 {
            let t = self.branch_target(instr);
            self.branch_to(t);
        }
    }

    /// BLTZ/BGEZ/BLTZAL/BGEZAL family
    pub(crate) fn op_regimm(&mut self, instr: u32, rs: u8, rt: u8) {
        let ge = rt & 1 != 0;
        let link = rt & 0x1E == 0x10;
        let neg = (self.reg(rs) as i32) < 0;
        let taken = ge != neg;

        if link {
            // The link lands even on a not-taken branch.
            let ra = self.next_pc;
            self.set_reg(31, ra);
        }
        if taken {
            let t = self.branch_target(instr);
            self.branch_to(t);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cpu::CPU;
    use crate::core::memory::Bus;

    fn run(cpu: &mut CPU, bus: &mut Bus, words: &[u32], steps: usize) {
        for (i, w) in words.iter().enumerate() {
            bus.write32(0x8000_0000 + (i as u32) * 4, *w).unwrap();
        }
        cpu.set_pc(0x8000_0000);
        for _ in 0..steps {
            cpu.step(bus).unwrap();
        }
    }

    #[test]
    fn test_jal_links_past_delay_slot() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        // jal 0x80000100; nop
        run(&mut cpu, &mut bus, &[0x0C00_0040, 0x0000_0000], 2);
        assert_eq!(cpu.reg(31), 0x8000_0008);
        assert_eq!(cpu.pc, 0x8000_0100);
    }

    #[test]
    fn test_bne_not_taken_falls_through() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        // bne r0, r0, +4; nop
        run(&mut cpu, &mut bus, &[0x1400_0004, 0x0000_0000], 2);
        assert_eq!(cpu.pc, 0x8000_0008);
    }

    #[test]
    fn test_bltzal_links_even_when_not_taken() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        cpu.set_reg(4, 1); // positive: not taken
                           // bltzal r4, +4; nop
        run(&mut cpu, &mut bus, &[0x0490_0004, 0x0000_0000], 2);
        assert_eq!(cpu.reg(31), 0x8000_0008);
        assert_eq!(cpu.pc, 0x8000_0008);
    }

    #[test]
    fn test_bgez_taken_on_zero() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        // bgez r0, +2; nop
        run(&mut cpu, &mut bus, &[0x0401_0002, 0x0000_0000], 2);
        assert_eq!(cpu.pc, 0x8000_000C);
    }

    #[test]
    fn test_jr_register_target() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        cpu.set_reg(2, 0x8000_2000);
        // jr r2; nop
        run(&mut cpu, &mut bus, &[0x0040_0008, 0x0000_0000], 2);
        assert_eq!(cpu.pc, 0x8000_2000);
    }
}
