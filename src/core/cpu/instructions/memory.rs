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

//! Load and store instructions
//!
//! Loads land through the delayed-load latch. Misaligned halfword/word
//! accesses raise the address-error exception with BadVaddr set and never
//! touch the bus. While the guest has isolated the cache (SR.IsC), stores
//! are dropped silently; that is its cache-flush idiom.

use super::super::{cop0::COP0, Exception, CPU};
use crate::core::error::Result;
use crate::core::memory::Bus;

impl CPU {
    #[inline(always)]
    fn addr(&self, rs: u8, simm: u32) -> u32 {
        self.reg(rs).wrapping_add(simm)
    }

    fn address_error(&mut self, addr: u32, store: bool) {
        self.cop0.regs[COP0::BADA] = addr;
        self.exception(if store {
            Exception::AddressErrorStore
        } else {
            Exception::AddressErrorLoad
        });
    }

    /// LB: sign-extended byte load
    pub(crate) fn op_lb(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        let v = bus.read8(addr)? as i8 as i32 as u32;
        self.delayed_load(rt, v);
        Ok(())
    }

    /// LBU: zero-extended byte load
    pub(crate) fn op_lbu(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        let v = bus.read8(addr)? as u32;
        self.delayed_load(rt, v);
        Ok(())
    }

    /// LH: sign-extended halfword load
    pub(crate) fn op_lh(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 1 != 0 {
            self.address_error(addr, false);
            return Ok(());
        }
        let v = bus.read16(addr)? as i16 as i32 as u32;
        self.delayed_load(rt, v);
        Ok(())
    }

    /// LHU: zero-extended halfword load
    pub(crate) fn op_lhu(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 1 != 0 {
            self.address_error(addr, false);
            return Ok(());
        }
        let v = bus.read16(addr)? as u32;
        self.delayed_load(rt, v);
        Ok(())
    }

    /// LW: word load
    pub(crate) fn op_lw(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 3 != 0 {
            self.address_error(addr, false);
            return Ok(());
        }
        let v = bus.read32(addr)?;
        self.delayed_load(rt, v);
        Ok(())
    }

    /// LWL: merge high-order bytes of an unaligned word
    pub(crate) fn op_lwl(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        let word = bus.read32(addr & !3)?;
        let cur = self.reg(rt);
        let v = match addr & 3 {
            0 => (cur & 0x00FF_FFFF) | (word << 24),
            1 => (cur & 0x0000_FFFF) | (word << 16),
            2 => (cur & 0x0000_00FF) | (word << 8),
            _ => word,
        };
        self.delayed_load(rt, v);
        Ok(())
    }

    /// LWR: merge low-order bytes of an unaligned word
    pub(crate) fn op_lwr(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        let word = bus.read32(addr & !3)?;
        let cur = self.reg(rt);
        let v = match addr & 3 {
            0 => word,
            1 => (cur & 0xFF00_0000) | (word >> 8),
            2 => (cur & 0xFFFF_0000) | (word >> 16),
            _ => (cur & 0xFFFF_FF00) | (word >> 24),
        };
        self.delayed_load(rt, v);
        Ok(())
    }

    /// SB
    pub(crate) fn op_sb(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        if self.cop0.cache_isolated() {
            return Ok(());
        }
        let addr = self.addr(rs, simm);
        bus.write8(addr, self.reg(rt) as u8)
    }

    /// SH
    pub(crate) fn op_sh(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 1 != 0 {
            self.address_error(addr, true);
            return Ok(());
        }
        if self.cop0.cache_isolated() {
            return Ok(());
        }
        bus.write16(addr, self.reg(rt) as u16)
    }

    /// SW
    pub(crate) fn op_sw(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 3 != 0 {
            self.address_error(addr, true);
            return Ok(());
        }
        if self.cop0.cache_isolated() {
            return Ok(());
        }
        bus.write32(addr, self.reg(rt))
    }

    /// SWL: store high-order bytes into an unaligned word
    pub(crate) fn op_swl(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        if self.cop0.cache_isolated() {
            return Ok(());
        }
        let addr = self.addr(rs, simm);
        let aligned = addr & !3;
        let mem = bus.read32(aligned)?;
        let val = self.reg(rt);
        let merged = match addr & 3 {
            0 => (mem & 0xFFFF_FF00) | (val >> 24),
            1 => (mem & 0xFFFF_0000) | (val >> 16),
            2 => (mem & 0xFF00_0000) | (val >> 8),
            _ => val,
        };
        bus.write32(aligned, merged)
    }

    /// SWR: store low-order bytes into an unaligned word
    pub(crate) fn op_swr(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        if self.cop0.cache_isolated() {
            return Ok(());
        }
        let addr = self.addr(rs, simm);
        let aligned = addr & !3;
        let mem = bus.read32(aligned)?;
        let val = self.reg(rt);
        let merged = match addr & 3 {
            0 => val,
            1 => (mem & 0x0000_00FF) | (val << 8),
            2 => (mem & 0x0000_FFFF) | (val << 16),
            _ => (mem & 0x00FF_FFFF) | (val << 24),
        };
        bus.write32(aligned, merged)
    }

    /// LWC2: word load into a GTE data register
    pub(crate) fn op_lwc2(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 3 != 0 {
            self.address_error(addr, false);
            return Ok(());
        }
        let v = bus.read32(addr)?;
        self.gte.write_data(rt as usize, v);
        Ok(())
    }

    /// SWC2: word store from a GTE data register
    pub(crate) fn op_swc2(&mut self, rt: u8, rs: u8, simm: u32, bus: &mut Bus) -> Result<()> {
        let addr = self.addr(rs, simm);
        if addr & 3 != 0 {
            self.address_error(addr, true);
            return Ok(());
        }
        if self.cop0.cache_isolated() {
            return Ok(());
        }
        bus.write32(addr, self.gte.read_data(rt as usize))
    }
}
