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

//! Coprocessor transfers and control
//!
//! COP0 carries system control; COP2 is the geometry engine. Moves from a
//! coprocessor to a GPR land through the delayed-load latch like ordinary
//! loads.

use super::super::{Exception, Status, CPU};

impl CPU {
    /// COP0 opcode space: MFC0 / MTC0 / RFE
    pub(crate) fn op_cop0(&mut self, instr: u32, rs: u8, rt: u8, rd: u8) {
        match rs {
            0x00 => {
                // MFC0
                let v = self.cop0.read(rd as usize);
                self.delayed_load(rt, v);
            }
            0x04 => {
                // MTC0
                let v = self.reg(rt);
                self.cop0.write(rd as usize, v);
            }
            0x10 => {
                if instr & 0x3F == 0x10 {
                    self.cop0.rfe();
                } else {
                    self.exception(Exception::ReservedInstruction);
                }
            }
            _ => self.exception(Exception::ReservedInstruction),
        }
    }

    /// COP2 opcode space: register moves and GTE commands
    pub(crate) fn op_cop2(&mut self, instr: u32, rs: u8, rt: u8, rd: u8) {
        if !self.cop0.status().contains(Status::CU2) {
            self.exception(Exception::CoprocessorUnusable);
            return;
        }

        if instr & (1 << 25) != 0 {
            // GTE command; the interpreter has no pipeline, stalls are the
            // translator's concern.
            self.gte.execute(instr);
            return;
        }

        match rs {
            0x00 => {
                // MFC2
                let v = self.gte.read_data(rd as usize);
                self.delayed_load(rt, v);
            }
            0x02 => {
                // CFC2
                let v = self.gte.read_control(rd as usize);
                self.delayed_load(rt, v);
            }
            0x04 => {
                // MTC2
                let v = self.reg(rt);
                self.gte.write_data(rd as usize, v);
            }
            0x06 => {
                // CTC2
                let v = self.reg(rt);
                self.gte.write_control(rd as usize, v);
            }
            _ => self.exception(Exception::ReservedInstruction),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cpu::{cop0::COP0, Exception, CPU};
    use crate::core::memory::Bus;

    fn run_at(cpu: &mut CPU, bus: &mut Bus, words: &[u32], steps: usize) {
        for (i, w) in words.iter().enumerate() {
            bus.write32(0x8000_0000 + (i as u32) * 4, *w).unwrap();
        }
        cpu.set_pc(0x8000_0000);
        for _ in 0..steps {
            cpu.step(bus).unwrap();
        }
    }

    #[test]
    fn test_mfc0_has_load_delay() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        cpu.cop0.regs[COP0::EPC] = 0x1234_5678;
        cpu.set_reg(9, 0xAAAA_AAAA);

        // mfc0 r9, epc; or r10, r9, r0
        run_at(&mut cpu, &mut bus, &[0x4009_7000, 0x0120_5025], 2);
        assert_eq!(cpu.reg(10), 0xAAAA_AAAA, "move lands one instr late");
        assert_eq!(cpu.reg(9), 0x1234_5678);
    }

    #[test]
    fn test_mtc0_writes_register() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        cpu.set_reg(5, 0x0000_FF00);

        // mtc0 r5, sr
        run_at(&mut cpu, &mut bus, &[0x4085_6000], 1);
        assert_eq!(cpu.cop0.read(COP0::SR), 0x0000_FF00);
    }

    #[test]
    fn test_cop2_unusable_without_cu2() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();

        // mfc2 r9, dr0 with CU2 clear
        run_at(&mut cpu, &mut bus, &[0x4809_0000], 1);
        assert_eq!(
            (cpu.cop0.read(COP0::CAUSE) >> 2) & 0x1F,
            Exception::CoprocessorUnusable as u32
        );
    }

    #[test]
    fn test_ctc2_mfc2_round_trip() {
        let mut cpu = CPU::new();
        let mut bus = Bus::new();
        cpu.cop0.regs[COP0::SR] |= 1 << 30; // CU2
        cpu.set_reg(5, 0x0000_0155);

        // ctc2 r5, cr0; mtc2 r5, dr8 (IR0); nop
        run_at(
            &mut cpu,
            &mut bus,
            &[0x48C5_0000, 0x4885_4000, 0x0000_0000],
            3,
        );
        assert_eq!(cpu.gte.read_control(0), 0x0000_0155);
        assert_eq!(cpu.gte.read_data(8), 0x0000_0155);
    }
}
