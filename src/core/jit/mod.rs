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

//! Dynamic binary translator
//!
//! Guest code is compiled one super-block at a time into the micro-op
//! arena and dispatched by PC through a hash-table/page-table pair. Block
//! chains run until the cycle budget is spent or control reaches a target
//! that is not compiled yet; returning from [`Jit::run`] is the abort
//! trampoline of the original design: a plain return, not a coroutine.
//!
//! Responsibilities split across the submodules:
//! - [`scan`]: block boundary, read/write masks, dead-instruction bitmap
//! - [`emit`]: per-opcode translation, constant propagation, load-delay
//!   and GTE-stall modeling, memory fast paths, super-block epilogues
//! - [`cache`]: block pool, two-level page table, dispatch hash, patch
//!   sites, whole-cache flush
//! - [`ops`]: the op set and the append-only code arena
//!
//! PCs outside RAM/BIOS (the register-aperture fetch corner) fall back to
//! the reference interpreter, as does anything a cold path cannot keep
//! inline.

pub mod cache;
pub mod emit;
pub mod ops;
pub mod scan;

#[cfg(test)]
mod tests;

use crate::core::cpu::{Exception, CPU};
use crate::core::cpu::cop0::COP0;
use crate::core::error::Result;
use crate::core::memory::Bus;

use cache::{code_page, Block, BlockCache, JitStats};
use emit::{snapshot_generation, Emitter};
use ops::{ArenaRef, CodeArena, Cond, FaultCtx, MemWidth, TrapCause, UOp};

/// The translator: code arena, block cache and runtime scratch state
pub struct Jit {
    arena: CodeArena,
    cache: BlockCache,
    /// Statistics; several invariants of the design are asserted on these
    pub stats: JitStats,
    /// Latched branch condition (survives the delay slot)
    cond_flag: bool,
    /// Latched register-jump target (survives the delay slot)
    jump_latch: u32,
    /// Delayed-load scratch value
    load_latch: u32,
    /// Sites rewritten from fast-path to slow-path form; cleared on flush
    backpatched: Vec<ArenaRef>,
}

impl Jit {
    pub fn new() -> Self {
        Self {
            arena: CodeArena::new(),
            cache: BlockCache::new(),
            stats: JitStats::default(),
            cond_flag: false,
            jump_latch: 0,
            load_latch: 0,
            backpatched: Vec::new(),
        }
    }

    /// Number of live blocks (test hook)
    pub fn block_count(&self) -> usize {
        self.cache.len()
    }

    /// Pending patch sites (test hook)
    pub fn pending_patches(&self) -> usize {
        self.cache.pending_patches()
    }

    /// Run translated code for up to `budget` guest cycles
    ///
    /// Returns the cycles actually consumed (the last block may overshoot
    /// by its own cost). Device interrupts are delivered at dispatch
    /// boundaries only; translated code is never preempted mid-block.
    pub fn run(&mut self, cpu: &mut CPU, bus: &mut Bus, budget: i32) -> Result<u32> {
        cpu.cycles_left = budget;
        while cpu.cycles_left > 0 {
            if cpu.poll_interrupt(bus.irq_pending()) {
                cpu.take_interrupt();
            }

            let pc = cpu.pc;
            match self.prepare(pc, bus)? {
                Some(idx) => {
                    let blk = self.cache.block(idx);
                    let (entry, idle, body_cycles) = (blk.entry, blk.idle, blk.cycles);
                    if idle {
                        // A side-effect-free self-loop spins until an event
                        // fires; charge the whole remaining budget as one
                        // pass and run the body once.
                        self.stats.idle_burns += 1;
                        cpu.cycles_left = cpu.cycles_left.min(body_cycles.max(1) as i32);
                    }
                    self.execute(entry, cpu, bus)?;
                }
                None => {
                    // Not translatable (register-aperture fetch and other
                    // oddities): reference interpreter.
                    let cycles = cpu.step(bus)?;
                    cpu.cycles_left -= cycles as i32;
                }
            }
        }
        Ok((budget - cpu.cycles_left).max(0) as u32)
    }

    /// Whole-cache flush: arena, tables, pool, patches, backpatch map
    pub fn flush_cache(&mut self, bus: &mut Bus) {
        log::debug!(
            "code cache flush: {} ops, {} blocks",
            self.arena.len(),
            self.cache.len()
        );
        self.arena.clear();
        self.cache.clear(&mut bus.smc);
        self.backpatched.clear();
        self.stats.cache_flushes += 1;
    }

    /// Find or compile the block for `pc`
    fn prepare(&mut self, pc: u32, bus: &mut Bus) -> Result<Option<u32>> {
        if pc & 3 != 0 || code_page(pc).is_none() {
            return Ok(None);
        }
        if let Some(idx) = self.cache.lookup_fast(pc, &bus.smc, &mut self.stats) {
            return Ok(Some(idx));
        }

        loop {
            if self.arena.low_on_space() {
                self.flush_cache(bus);
            }

            let Some(res) = Emitter::new(&mut self.arena, &self.cache, &bus.smc, pc).compile(bus)
            else {
                return Ok(None);
            };

            let block = Block {
                pc,
                entry: res.entry,
                page_gen: snapshot_generation(&bus.smc, pc).unwrap_or(0),
                host_len: res.host_len,
                guest_len: res.guest_len,
                cycles: res.cycles,
                hash: res.hash,
                idle: res.idle,
            };

            match self.cache.insert(block, &mut bus.smc) {
                Some(idx) => {
                    for (site, target) in res.patch_requests {
                        // A full patch array degrades that edge to a plain
                        // dispatcher exit; harmless.
                        let _ = self.cache.push_patch(site, target, &mut self.stats);
                    }
                    self.resolve_patches(pc, res.entry);
                    self.stats.blocks_compiled += 1;
                    return Ok(Some(idx));
                }
                None => {
                    // Pool exhausted: self-heal with a full flush and
                    // recompile into the fresh cache.
                    self.flush_cache(bus);
                }
            }
        }
    }

    /// Back-patch every pending site that waited for `pc`
    fn resolve_patches(&mut self, pc: u32, entry: ArenaRef) {
        for site in self.cache.take_patches_for(pc) {
            if let UOp::LinkPending { pc: target, cycles } = self.arena.at(site.site) {
                self.arena.patch(
                    site.site,
                    UOp::Link {
                        entry,
                        pc: target,
                        cycles,
                    },
                );
                self.stats.patch_sites_resolved += 1;
            }
        }
    }

    // ---- op execution ----

    /// Execute a block chain starting at an arena entry
    fn execute(&mut self, entry: ArenaRef, cpu: &mut CPU, bus: &mut Bus) -> Result<()> {
        let mut ip = entry;
        loop {
            match self.arena.at(ip) {
                UOp::MovImm { rd, imm } => cpu.set_reg(rd, imm),
                UOp::Move { rd, rs } => {
                    let v = cpu.reg(rs);
                    cpu.set_reg(rd, v);
                }
                UOp::Add { rd, rs, rt } => {
                    let v = cpu.reg(rs).wrapping_add(cpu.reg(rt));
                    cpu.set_reg(rd, v);
                }
                UOp::Sub { rd, rs, rt } => {
                    let v = cpu.reg(rs).wrapping_sub(cpu.reg(rt));
                    cpu.set_reg(rd, v);
                }
                UOp::And { rd, rs, rt } => {
                    let v = cpu.reg(rs) & cpu.reg(rt);
                    cpu.set_reg(rd, v);
                }
                UOp::Or { rd, rs, rt } => {
                    let v = cpu.reg(rs) | cpu.reg(rt);
                    cpu.set_reg(rd, v);
                }
                UOp::Xor { rd, rs, rt } => {
                    let v = cpu.reg(rs) ^ cpu.reg(rt);
                    cpu.set_reg(rd, v);
                }
                UOp::Nor { rd, rs, rt } => {
                    let v = !(cpu.reg(rs) | cpu.reg(rt));
                    cpu.set_reg(rd, v);
                }
                UOp::Slt { rd, rs, rt } => {
                    let v = ((cpu.reg(rs) as i32) < (cpu.reg(rt) as i32)) as u32;
                    cpu.set_reg(rd, v);
                }
                UOp::Sltu { rd, rs, rt } => {
                    let v = (cpu.reg(rs) < cpu.reg(rt)) as u32;
                    cpu.set_reg(rd, v);
                }
                UOp::AddTrap { rd, rs, rt, ctx } => {
                    match (cpu.reg(rs) as i32).checked_add(cpu.reg(rt) as i32) {
                        Some(v) => cpu.set_reg(rd, v as u32),
                        None => {
                            self.take_exception(cpu, Exception::Overflow, ctx);
                            return Ok(());
                        }
                    }
                }
                UOp::SubTrap { rd, rs, rt, ctx } => {
                    match (cpu.reg(rs) as i32).checked_sub(cpu.reg(rt) as i32) {
                        Some(v) => cpu.set_reg(rd, v as u32),
                        None => {
                            self.take_exception(cpu, Exception::Overflow, ctx);
                            return Ok(());
                        }
                    }
                }
                UOp::AddImm { rd, rs, imm } => {
                    let v = cpu.reg(rs).wrapping_add(imm);
                    cpu.set_reg(rd, v);
                }
                UOp::AddImmTrap { rd, rs, imm, ctx } => {
                    match (cpu.reg(rs) as i32).checked_add(imm as i32) {
                        Some(v) => cpu.set_reg(rd, v as u32),
                        None => {
                            self.take_exception(cpu, Exception::Overflow, ctx);
                            return Ok(());
                        }
                    }
                }
                UOp::AndImm { rd, rs, imm } => {
                    let v = cpu.reg(rs) & imm;
                    cpu.set_reg(rd, v);
                }
                UOp::OrImm { rd, rs, imm } => {
                    let v = cpu.reg(rs) | imm;
                    cpu.set_reg(rd, v);
                }
                UOp::XorImm { rd, rs, imm } => {
                    let v = cpu.reg(rs) ^ imm;
                    cpu.set_reg(rd, v);
                }
                UOp::SltImm { rd, rs, imm } => {
                    let v = ((cpu.reg(rs) as i32) < (imm as i32)) as u32;
                    cpu.set_reg(rd, v);
                }
                UOp::SltuImm { rd, rs, imm } => {
                    let v = (cpu.reg(rs) < imm) as u32;
                    cpu.set_reg(rd, v);
                }
                UOp::Sll { rd, rt, sh } => {
                    let v = cpu.reg(rt) << sh;
                    cpu.set_reg(rd, v);
                }
                UOp::Srl { rd, rt, sh } => {
                    let v = cpu.reg(rt) >> sh;
                    cpu.set_reg(rd, v);
                }
                UOp::Sra { rd, rt, sh } => {
                    let v = ((cpu.reg(rt) as i32) >> sh) as u32;
                    cpu.set_reg(rd, v);
                }
                UOp::Sllv { rd, rt, rs } => {
                    let v = cpu.reg(rt) << (cpu.reg(rs) & 0x1F);
                    cpu.set_reg(rd, v);
                }
                UOp::Srlv { rd, rt, rs } => {
                    let v = cpu.reg(rt) >> (cpu.reg(rs) & 0x1F);
                    cpu.set_reg(rd, v);
                }
                UOp::Srav { rd, rt, rs } => {
                    let v = ((cpu.reg(rt) as i32) >> (cpu.reg(rs) & 0x1F)) as u32;
                    cpu.set_reg(rd, v);
                }
                UOp::Mult { rs, rt } => cpu.op_mult(rs, rt),
                UOp::Multu { rs, rt } => cpu.op_multu(rs, rt),
                UOp::Div { rs, rt } => cpu.op_div(rs, rt),
                UOp::Divu { rs, rt } => cpu.op_divu(rs, rt),
                UOp::MfHi { rd } => {
                    let v = cpu.hi;
                    cpu.set_reg(rd, v);
                }
                UOp::MfLo { rd } => {
                    let v = cpu.lo;
                    cpu.set_reg(rd, v);
                }
                UOp::MtHi { rs } => cpu.hi = cpu.reg(rs),
                UOp::MtLo { rs } => cpu.lo = cpu.reg(rs),

                UOp::Load {
                    rd,
                    base,
                    off,
                    width,
                    signed,
                    ctx,
                } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    match self.mem_read(addr, width, signed, ctx, Some(ip), cpu, bus)? {
                        Some(v) => cpu.set_reg(rd, v),
                        None => return Ok(()),
                    }
                }
                UOp::LoadSlow {
                    rd,
                    base,
                    off,
                    width,
                    signed,
                    ctx,
                } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    match self.mem_read_slow(addr, width, signed, ctx, cpu, bus)? {
                        Some(v) => cpu.set_reg(rd, v),
                        None => return Ok(()),
                    }
                }
                UOp::LoadLatch {
                    base,
                    off,
                    width,
                    signed,
                    ctx,
                } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    match self.mem_read(addr, width, signed, ctx, None, cpu, bus)? {
                        Some(v) => self.load_latch = v,
                        None => return Ok(()),
                    }
                }
                UOp::LatchFlush { rd } => {
                    let v = self.load_latch;
                    cpu.set_reg(rd, v);
                }
                UOp::LoadUnaligned {
                    rd,
                    base,
                    off,
                    left,
                    ctx: _,
                } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    let word = bus.read32(addr & !3)?;
                    let cur = cpu.reg(rd);
                    let v = merge_unaligned_load(left, addr, word, cur);
                    cpu.set_reg(rd, v);
                }
                UOp::LoadConst {
                    rd,
                    offset,
                    width,
                    signed,
                } => {
                    let v = ram_read(bus, offset, width, signed);
                    cpu.set_reg(rd, v);
                }
                UOp::Store {
                    rt,
                    base,
                    off,
                    width,
                    ctx,
                } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    let value = cpu.reg(rt);
                    if !self.mem_write(addr, value, width, ctx, Some(ip), cpu, bus)? {
                        return Ok(());
                    }
                }
                UOp::StoreSlow {
                    rt,
                    base,
                    off,
                    width,
                    ctx,
                } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    let value = cpu.reg(rt);
                    if !self.mem_write_slow(addr, value, width, ctx, cpu, bus)? {
                        return Ok(());
                    }
                }
                UOp::StoreUnaligned {
                    rt,
                    base,
                    off,
                    left,
                    ctx: _,
                } => {
                    if !cpu.cop0.cache_isolated() {
                        let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                        let aligned = addr & !3;
                        let mem = bus.read32(aligned)?;
                        let merged = merge_unaligned_store(left, addr, mem, cpu.reg(rt));
                        bus.write32(aligned, merged)?;
                    }
                }
                UOp::StoreConst { rt, offset, width } => {
                    if !cpu.cop0.cache_isolated() {
                        ram_write(bus, offset, cpu.reg(rt), width);
                    }
                }
                UOp::ReadIStat { rd } => {
                    let v = bus.istat();
                    cpu.set_reg(rd, v);
                }
                UOp::ReadIMask { rd } => {
                    let v = bus.imask();
                    cpu.set_reg(rd, v);
                }
                UOp::ReadGpuStat { rd } => {
                    let v = bus.gpustat();
                    cpu.set_reg(rd, v);
                }

                UOp::Mfc0 { rd, cr } => {
                    let v = cpu.cop0.read(cr as usize);
                    cpu.set_reg(rd, v);
                }
                UOp::Mtc0 { rt, cr } => {
                    let v = cpu.reg(rt);
                    cpu.cop0.write(cr as usize, v);
                }
                UOp::Rfe => cpu.cop0.rfe(),
                UOp::GteCommand { cmd } => cpu.gte.execute(cmd),
                UOp::Mfc2 { rd, cr } => {
                    let v = cpu.gte.read_data(cr as usize);
                    cpu.set_reg(rd, v);
                }
                UOp::Cfc2 { rd, cr } => {
                    let v = cpu.gte.read_control(cr as usize);
                    cpu.set_reg(rd, v);
                }
                UOp::Mtc2 { rt, cr } => {
                    let v = cpu.reg(rt);
                    cpu.gte.write_data(cr as usize, v);
                }
                UOp::Ctc2 { rt, cr } => {
                    let v = cpu.reg(rt);
                    cpu.gte.write_control(cr as usize, v);
                }
                UOp::GteLoad { cr, base, off, ctx } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    match self.mem_read(addr, MemWidth::Word, false, ctx, None, cpu, bus)? {
                        Some(v) => cpu.gte.write_data(cr as usize, v),
                        None => return Ok(()),
                    }
                }
                UOp::GteStore { cr, base, off, ctx } => {
                    let addr = cpu.reg(base).wrapping_add(off as i32 as u32);
                    let value = cpu.gte.read_data(cr as usize);
                    if !self.mem_write(addr, value, MemWidth::Word, ctx, None, cpu, bus)? {
                        return Ok(());
                    }
                }

                UOp::SetCond { cond, rs, rt } => {
                    let a = cpu.reg(rs);
                    self.cond_flag = match cond {
                        Cond::Eq => a == cpu.reg(rt),
                        Cond::Ne => a != cpu.reg(rt),
                        Cond::LeZ => (a as i32) <= 0,
                        Cond::GtZ => (a as i32) > 0,
                        Cond::LtZ => (a as i32) < 0,
                        Cond::GeZ => (a as i32) >= 0,
                    };
                }
                UOp::CaptureJump { rs } => self.jump_latch = cpu.reg(rs),
                UOp::BranchCold { target } => {
                    if self.cond_flag {
                        ip = target;
                        continue;
                    }
                }
                UOp::Exit { pc, cycles } => {
                    // set_pc keeps next_pc coherent for the interpreter
                    // and the interrupt-delivery guard.
                    cpu.set_pc(pc);
                    cpu.cycles_left -= cycles as i32;
                    return Ok(());
                }
                UOp::ExitIndirect { cycles } => {
                    let target = self.jump_latch;
                    cpu.set_pc(target);
                    cpu.cycles_left -= cycles as i32;
                    return Ok(());
                }
                UOp::LinkPending { pc, cycles } => {
                    cpu.set_pc(pc);
                    cpu.cycles_left -= cycles as i32;
                    return Ok(());
                }
                UOp::Link { entry, pc, cycles } => {
                    cpu.cycles_left -= cycles as i32;
                    if cpu.cycles_left <= 0 {
                        cpu.set_pc(pc);
                        return Ok(());
                    }
                    ip = entry;
                    continue;
                }
                UOp::Trap { cause, ctx } => {
                    let cause = match cause {
                        TrapCause::Syscall => Exception::Syscall,
                        TrapCause::Break => Exception::Breakpoint,
                        TrapCause::Reserved => Exception::ReservedInstruction,
                        TrapCause::CopUnusable => Exception::CoprocessorUnusable,
                    };
                    self.take_exception(cpu, cause, ctx);
                    return Ok(());
                }
            }
            ip += 1;
        }
    }

    /// Exception exit: charge the executed prefix and enter the vector
    fn take_exception(&mut self, cpu: &mut CPU, cause: Exception, ctx: FaultCtx) {
        cpu.cycles_left -= ctx.cycles as i32;
        cpu.raise_exception_at(cause, ctx.pc, ctx.bd);
    }

    /// Inline load fast path with cold fallback
    ///
    /// `site` enables the slow-path backpatch: once a site misses the RAM
    /// range it is rewritten in place and never takes the fast path again.
    fn mem_read(
        &mut self,
        addr: u32,
        width: MemWidth,
        signed: bool,
        ctx: FaultCtx,
        site: Option<ArenaRef>,
        cpu: &mut CPU,
        bus: &mut Bus,
    ) -> Result<Option<u32>> {
        if misaligned(addr, width) {
            cpu.cop0.regs[COP0::BADA] = addr;
            self.take_exception(cpu, Exception::AddressErrorLoad, ctx);
            return Ok(None);
        }
        let phys = addr & Bus::PHYS_MASK;
        if !bus.tlb_active && (phys as usize) < Bus::RAM_SIZE {
            return Ok(Some(ram_read(bus, phys, width, signed)));
        }
        if let Some(site) = site {
            self.backpatch_load(site);
        }
        self.mem_read_slow(addr, width, signed, ctx, cpu, bus)
    }

    fn mem_read_slow(
        &mut self,
        addr: u32,
        width: MemWidth,
        signed: bool,
        ctx: FaultCtx,
        cpu: &mut CPU,
        bus: &mut Bus,
    ) -> Result<Option<u32>> {
        if misaligned(addr, width) {
            cpu.cop0.regs[COP0::BADA] = addr;
            self.take_exception(cpu, Exception::AddressErrorLoad, ctx);
            return Ok(None);
        }
        let v = match width {
            MemWidth::Byte => {
                let b = bus.read8(addr)?;
                if signed {
                    b as i8 as i32 as u32
                } else {
                    b as u32
                }
            }
            MemWidth::Half => {
                let h = bus.read16(addr)?;
                if signed {
                    h as i16 as i32 as u32
                } else {
                    h as u32
                }
            }
            MemWidth::Word => bus.read32(addr)?,
        };
        Ok(Some(v))
    }

    /// Inline store fast path with cold fallback; honors cache isolation
    fn mem_write(
        &mut self,
        addr: u32,
        value: u32,
        width: MemWidth,
        ctx: FaultCtx,
        site: Option<ArenaRef>,
        cpu: &mut CPU,
        bus: &mut Bus,
    ) -> Result<bool> {
        if misaligned(addr, width) {
            cpu.cop0.regs[COP0::BADA] = addr;
            self.take_exception(cpu, Exception::AddressErrorStore, ctx);
            return Ok(false);
        }
        if cpu.cop0.cache_isolated() {
            return Ok(true);
        }
        let phys = addr & Bus::PHYS_MASK;
        if !bus.tlb_active && (phys as usize) < Bus::RAM_SIZE {
            ram_write(bus, phys, value, width);
            return Ok(true);
        }
        if let Some(site) = site {
            self.backpatch_store(site);
        }
        self.mem_write_slow(addr, value, width, ctx, cpu, bus)
    }

    fn mem_write_slow(
        &mut self,
        addr: u32,
        value: u32,
        width: MemWidth,
        ctx: FaultCtx,
        cpu: &mut CPU,
        bus: &mut Bus,
    ) -> Result<bool> {
        if misaligned(addr, width) {
            cpu.cop0.regs[COP0::BADA] = addr;
            self.take_exception(cpu, Exception::AddressErrorStore, ctx);
            return Ok(false);
        }
        if cpu.cop0.cache_isolated() {
            return Ok(true);
        }
        match width {
            MemWidth::Byte => bus.write8(addr, value as u8)?,
            MemWidth::Half => bus.write16(addr, value as u16)?,
            MemWidth::Word => bus.write32(addr, value)?,
        }
        Ok(true)
    }

    /// First non-RAM access at a load site rewrites it to the slow form
    fn backpatch_load(&mut self, site: ArenaRef) {
        if let UOp::Load {
            rd,
            base,
            off,
            width,
            signed,
            ctx,
        } = self.arena.at(site)
        {
            self.arena.patch(
                site,
                UOp::LoadSlow {
                    rd,
                    base,
                    off,
                    width,
                    signed,
                    ctx,
                },
            );
            self.backpatched.push(site);
            self.stats.slow_path_backpatches += 1;
        }
    }

    fn backpatch_store(&mut self, site: ArenaRef) {
        if let UOp::Store {
            rt,
            base,
            off,
            width,
            ctx,
        } = self.arena.at(site)
        {
            self.arena.patch(
                site,
                UOp::StoreSlow {
                    rt,
                    base,
                    off,
                    width,
                    ctx,
                },
            );
            self.backpatched.push(site);
            self.stats.slow_path_backpatches += 1;
        }
    }

}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn misaligned(addr: u32, width: MemWidth) -> bool {
    match width {
        MemWidth::Byte => false,
        MemWidth::Half => addr & 1 != 0,
        MemWidth::Word => addr & 3 != 0,
    }
}

#[inline(always)]
fn ram_read(bus: &Bus, offset: u32, width: MemWidth, signed: bool) -> u32 {
    let ram = bus.ram();
    match width {
        MemWidth::Byte => {
            let b = ram[offset as usize];
            if signed {
                b as i8 as i32 as u32
            } else {
                b as u32
            }
        }
        MemWidth::Half => {
            let i = offset as usize;
            let h = u16::from_le_bytes(ram[i..i + 2].try_into().unwrap());
            if signed {
                h as i16 as i32 as u32
            } else {
                h as u32
            }
        }
        MemWidth::Word => bus.ram_word(offset),
    }
}

#[inline(always)]
fn ram_write(bus: &mut Bus, offset: u32, value: u32, width: MemWidth) {
    match width {
        MemWidth::Byte => bus.ram_set_byte(offset, value as u8),
        MemWidth::Half => bus.ram_set_half(offset, value as u16),
        MemWidth::Word => bus.ram_set_word(offset, value),
    }
}

fn merge_unaligned_load(left: bool, addr: u32, word: u32, cur: u32) -> u32 {
    if left {
        match addr & 3 {
            0 => (cur & 0x00FF_FFFF) | (word << 24),
            1 => (cur & 0x0000_FFFF) | (word << 16),
            2 => (cur & 0x0000_00FF) | (word << 8),
            _ => word,
        }
    } else {
        match addr & 3 {
            0 => word,
            1 => (cur & 0xFF00_0000) | (word >> 8),
            2 => (cur & 0xFFFF_0000) | (word >> 16),
            _ => (cur & 0xFFFF_FF00) | (word >> 24),
        }
    }
}

fn merge_unaligned_store(left: bool, addr: u32, mem: u32, val: u32) -> u32 {
    if left {
        match addr & 3 {
            0 => (mem & 0xFFFF_FF00) | (val >> 24),
            1 => (mem & 0xFFFF_0000) | (val >> 16),
            2 => (mem & 0xFF00_0000) | (val >> 8),
            _ => val,
        }
    } else {
        match addr & 3 {
            0 => val,
            1 => (mem & 0x0000_00FF) | (val << 8),
            2 => (mem & 0x0000_FFFF) | (val << 16),
            _ => (mem & 0x00FF_FFFF) | (val << 24),
        }
    }
}
