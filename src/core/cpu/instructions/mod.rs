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

//! Interpreter opcode dispatch
//!
//! One match over the primary/secondary opcode space. Undefined encodings
//! raise the reserved-instruction exception, matching what the translator's
//! fallback path expects.

mod alu;
mod branch;
mod cop;
mod memory;
mod muldiv;

use super::dec;
use super::{Exception, CPU};
use crate::core::error::Result;
use crate::core::memory::Bus;

impl CPU {
    /// Execute one decoded instruction
    pub(super) fn execute(&mut self, instr: u32, bus: &mut Bus) -> Result<()> {
        let rs = dec::rs(instr);
        let rt = dec::rt(instr);
        let rd = dec::rd(instr);

        match dec::op(instr) {
            0x00 => match dec::funct(instr) {
                0x00 => self.op_sll(rd, rt, dec::shamt(instr)),
                0x02 => self.op_srl(rd, rt, dec::shamt(instr)),
                0x03 => self.op_sra(rd, rt, dec::shamt(instr)),
                0x04 => self.op_sllv(rd, rt, rs),
                0x06 => self.op_srlv(rd, rt, rs),
                0x07 => self.op_srav(rd, rt, rs),
                0x08 => self.op_jr(rs),
                0x09 => self.op_jalr(rd, rs),
                0x0C => self.exception(Exception::Syscall),
                0x0D => self.exception(Exception::Breakpoint),
                0x10 => self.op_mfhi(rd),
                0x11 => self.op_mthi(rs),
                0x12 => self.op_mflo(rd),
                0x13 => self.op_mtlo(rs),
                0x18 => self.op_mult(rs, rt),
                0x19 => self.op_multu(rs, rt),
                0x1A => self.op_div(rs, rt),
                0x1B => self.op_divu(rs, rt),
                0x20 => self.op_add(rd, rs, rt),
                0x21 => self.op_addu(rd, rs, rt),
                0x22 => self.op_sub(rd, rs, rt),
                0x23 => self.op_subu(rd, rs, rt),
                0x24 => self.op_and(rd, rs, rt),
                0x25 => self.op_or(rd, rs, rt),
                0x26 => self.op_xor(rd, rs, rt),
                0x27 => self.op_nor(rd, rs, rt),
                0x2A => self.op_slt(rd, rs, rt),
                0x2B => self.op_sltu(rd, rs, rt),
                _ => self.exception(Exception::ReservedInstruction),
            },
            0x01 => self.op_regimm(instr, rs, rt),
            0x02 => self.op_j(instr),
            0x03 => self.op_jal(instr),
            0x04 => self.op_beq(instr, rs, rt),
            0x05 => self.op_bne(instr, rs, rt),
            0x06 => self.op_blez(instr, rs),
            0x07 => self.op_bgtz(instr, rs),
            0x08 => self.op_addi(rt, rs, dec::simm(instr)),
            0x09 => self.op_addiu(rt, rs, dec::simm(instr)),
            0x0A => self.op_slti(rt, rs, dec::simm(instr)),
            0x0B => self.op_sltiu(rt, rs, dec::simm(instr)),
            0x0C => self.op_andi(rt, rs, dec::imm(instr)),
            0x0D => self.op_ori(rt, rs, dec::imm(instr)),
            0x0E => self.op_xori(rt, rs, dec::imm(instr)),
            0x0F => self.op_lui(rt, dec::imm(instr)),
            0x10 => self.op_cop0(instr, rs, rt, rd),
            0x12 => self.op_cop2(instr, rs, rt, rd),
            0x20 => return self.op_lb(rt, rs, dec::simm(instr), bus),
            0x21 => return self.op_lh(rt, rs, dec::simm(instr), bus),
            0x22 => return self.op_lwl(rt, rs, dec::simm(instr), bus),
            0x23 => return self.op_lw(rt, rs, dec::simm(instr), bus),
            0x24 => return self.op_lbu(rt, rs, dec::simm(instr), bus),
            0x25 => return self.op_lhu(rt, rs, dec::simm(instr), bus),
            0x26 => return self.op_lwr(rt, rs, dec::simm(instr), bus),
            0x28 => return self.op_sb(rt, rs, dec::simm(instr), bus),
            0x29 => return self.op_sh(rt, rs, dec::simm(instr), bus),
            0x2A => return self.op_swl(rt, rs, dec::simm(instr), bus),
            0x2B => return self.op_sw(rt, rs, dec::simm(instr), bus),
            0x2E => return self.op_swr(rt, rs, dec::simm(instr), bus),
            0x32 => return self.op_lwc2(rt, rs, dec::simm(instr), bus),
            0x3A => return self.op_swc2(rt, rs, dec::simm(instr), bus),
            _ => self.exception(Exception::ReservedInstruction),
        }
        Ok(())
    }
}
