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

//! System integration: ownership, wiring and the main loop
//!
//! One `System` owns every engine for the life of the process. The loop
//! asks the scheduler for the next deadline, hands the translator that
//! many cycles, then dispatches due events (VBlank, timers, CD-ROM
//! responses) which raise interrupts and reschedule themselves. Devices
//! only ever advance at these boundaries; translated code is never
//! interrupted mid-block.
//!
//! Teardown order matters only at process exit and follows ownership:
//! scheduler and CPU state first, then the GPU (which owns rasterizer
//! memory), then the bus with RAM and BIOS.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::core::cdrom::{iso9660, DiscImage, CDROM};
use crate::core::cpu::CPU;
use crate::core::dma::DMA;
use crate::core::error::{DiscError, Result};
use crate::core::exe;
use crate::core::gpu::{CYCLES_PER_FRAME, GPU};
use crate::core::interrupt::{irq, InterruptController};
use crate::core::jit::Jit;
use crate::core::memory::Bus;
use crate::core::sio::Sio;
use crate::core::timer::Timers;
use crate::core::timing::{Event, Scheduler, TickCount, NO_DEADLINE};

/// CD-ROM command-to-response latency, in CPU cycles
const CDROM_RESPONSE_DELAY: TickCount = 25_000;

/// Longest slice handed to the translator in one go
const MAX_SLICE: TickCount = CYCLES_PER_FRAME;

/// The whole machine
pub struct System {
    cpu: CPU,
    bus: Bus,
    jit: Jit,
    scheduler: Scheduler,
    gpu: Rc<RefCell<GPU>>,
    dma: Rc<RefCell<DMA>>,
    cdrom: Rc<RefCell<CDROM>>,
    timers: Rc<RefCell<Timers>>,
    intc: Rc<RefCell<InterruptController>>,
    sio: Rc<RefCell<Sio>>,

    /// Global guest clock
    cycles: TickCount,
    next_vblank: TickCount,
    running: bool,
    /// Stop after this many frames (headless runs); `None` runs forever
    pub frame_limit: Option<u64>,
    /// Write the raw VRAM image here on clean shutdown
    pub vram_dump: Option<PathBuf>,
}

impl System {
    /// Build and wire every component
    pub fn new() -> Self {
        let gpu = Rc::new(RefCell::new(GPU::new()));
        let dma = Rc::new(RefCell::new(DMA::new()));
        let cdrom = Rc::new(RefCell::new(CDROM::new()));
        let timers = Rc::new(RefCell::new(Timers::new()));
        let intc = Rc::new(RefCell::new(InterruptController::new()));
        let sio = Rc::new(RefCell::new(Sio::new()));

        let mut bus = Bus::new();
        bus.set_gpu(gpu.clone());
        bus.set_dma(dma.clone());
        bus.set_cdrom(cdrom.clone());
        bus.set_timers(timers.clone());
        bus.set_interrupt_controller(intc.clone());
        bus.set_sio(sio.clone());

        let mut scheduler = Scheduler::new();
        scheduler.schedule(Event::VBlank, CYCLES_PER_FRAME);

        log::info!("system wired; VBlank every {} cycles", CYCLES_PER_FRAME);

        Self {
            cpu: CPU::new(),
            bus,
            jit: Jit::new(),
            scheduler,
            gpu,
            dma,
            cdrom,
            timers,
            intc,
            sio,
            cycles: 0,
            next_vblank: CYCLES_PER_FRAME,
            running: false,
            frame_limit: None,
            vram_dump: None,
        }
    }

    /// Boot a disc image: ISO walk, SYSTEM.CNF, EXE load
    pub fn load_disc(&mut self, path: &Path) -> Result<()> {
        let mut disc = DiscImage::open(path)?;
        let exe_data = {
            let mut fs = iso9660::IsoFilesystem::open(&mut disc)?;
            let boot_path = match fs.find("SYSTEM.CNF") {
                Ok(entry) => {
                    let cnf = fs.read_file(&entry)?;
                    iso9660::parse_boot_path(&String::from_utf8_lossy(&cnf))?
                }
                // Discs without a SYSTEM.CNF boot the conventional name.
                Err(DiscError::FileNotFound(_)) => "PSX.EXE".to_string(),
                Err(e) => return Err(e.into()),
            };
            log::info!("boot executable: {}", boot_path);
            let entry = fs.find(&boot_path)?;
            fs.read_file(&entry)?
        };

        exe::load(&exe_data, &mut self.cpu, &mut self.bus)?;
        self.cdrom.borrow_mut().set_disc_present(true);
        self.running = true;
        Ok(())
    }

    /// Current frame count
    pub fn frames(&self) -> u64 {
        self.gpu.borrow().frames
    }

    /// Guest cycles executed so far
    pub fn cycles(&self) -> TickCount {
        self.cycles
    }

    /// Run until stopped (frame limit, or an external `stop`)
    pub fn run(&mut self) -> Result<()> {
        self.running = true;
        while self.running {
            self.run_slice()?;
            if let Some(limit) = self.frame_limit {
                if self.frames() >= limit {
                    log::info!("frame limit {} reached", limit);
                    self.running = false;
                }
            }
        }
        if let Some(path) = self.vram_dump.take() {
            self.dump_vram(&path)?;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// One scheduler slice: budgeted translation then event dispatch
    pub fn run_slice(&mut self) -> Result<()> {
        let deadline = self.scheduler.next_deadline();
        let budget = if deadline == NO_DEADLINE {
            MAX_SLICE
        } else {
            deadline.saturating_sub(self.cycles).clamp(1, MAX_SLICE)
        };

        let consumed = self.jit.run(&mut self.cpu, &mut self.bus, budget as i32)?;
        self.cycles += consumed as TickCount;

        self.dispatch_events()?;
        self.poll_device_lines();
        Ok(())
    }

    fn dispatch_events(&mut self) -> Result<()> {
        let due = self.scheduler.dispatch(self.cycles);
        for event in due.iter() {
            match event {
                Event::VBlank => {
                    self.gpu.borrow_mut().vblank();
                    self.intc.borrow_mut().raise(irq::VBLANK);
                    // Deadline-relative, so frames never drift.
                    self.next_vblank += CYCLES_PER_FRAME;
                    self.scheduler.schedule(Event::VBlank, self.next_vblank);
                }
                Event::Timer0 | Event::Timer1 | Event::Timer2 => {
                    // Counters advance below; the slot only bounds the
                    // slice so the IRQ lands on time.
                }
                Event::GpuIrq => {
                    if self.gpu.borrow_mut().take_irq() {
                        self.intc.borrow_mut().raise(irq::GPU);
                    }
                }
                Event::Sio => {}
                Event::CdRom => {
                    if self.cdrom.borrow_mut().deliver_pending() {
                        self.intc.borrow_mut().raise(irq::CDROM);
                    }
                }
            }
        }
        Ok(())
    }

    /// Level-triggered device upkeep at the slice boundary
    fn poll_device_lines(&mut self) {
        // Timers run off the global clock; their IRQs surface here.
        let pending = self.timers.borrow_mut().advance_to(self.cycles);
        if pending != 0 {
            self.intc.borrow_mut().raise(pending);
        }
        for (i, event) in [Event::Timer0, Event::Timer1, Event::Timer2]
            .into_iter()
            .enumerate()
        {
            match self.timers.borrow().channel_deadline(i, self.cycles) {
                Some(at) => self.scheduler.schedule(event, at),
                None => self.scheduler.remove(event),
            }
        }

        // GPU IRQ (GP0 0x1F) is edge-delivered as soon as we see it.
        if self.gpu.borrow_mut().take_irq() {
            self.intc.borrow_mut().raise(irq::GPU);
        }

        // Queue CD-ROM responses behind their mechanical delay.
        if self.cdrom.borrow().has_pending() && !self.scheduler.is_scheduled(Event::CdRom) {
            self.scheduler
                .schedule(Event::CdRom, self.cycles + CDROM_RESPONSE_DELAY);
        }
    }

    /// Write the 1024×512×2 little-endian VRAM image
    pub fn dump_vram(&self, path: &Path) -> Result<()> {
        let gpu = self.gpu.borrow();
        let pixels = gpu.vram_pixels();
        let mut bytes = Vec::with_capacity(pixels.len() * 2);
        for p in pixels {
            bytes.extend_from_slice(&p.to_le_bytes());
        }
        std::fs::write(path, bytes)?;
        log::info!("VRAM dumped to {}", path.display());
        Ok(())
    }

    /// Borrow the CPU (tests, debugging)
    pub fn cpu(&self) -> &CPU {
        &self.cpu
    }

    /// Borrow the bus (tests, debugging)
    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Unused-port handle kept alive for the wiring's lifetime
    pub fn sio(&self) -> Rc<RefCell<Sio>> {
        self.sio.clone()
    }

    /// DMA controller handle (tests)
    pub fn dma(&self) -> Rc<RefCell<DMA>> {
        self.dma.clone()
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cdrom::disc::SECTOR_SIZE;
    use crate::core::exe::HEADER_SIZE;
    use std::io::Write;

    /// Assemble a bootable ISO with a SYSTEM.CNF and one executable
    fn build_boot_iso(dir: &Path, body: &[u32]) -> PathBuf {
        let cnf = b"BOOT = cdrom:\\MAIN.EXE;1\r\n".to_vec();

        let mut exe = vec![0u8; HEADER_SIZE + body.len() * 4];
        exe[..8].copy_from_slice(b"PS-X EXE");
        exe[0x10..0x14].copy_from_slice(&0x8001_0000u32.to_le_bytes()); // pc0
        exe[0x14..0x18].copy_from_slice(&0x8001_0000u32.to_le_bytes()); // gp0
        exe[0x18..0x1C].copy_from_slice(&0x8001_0000u32.to_le_bytes()); // text
        exe[0x1C..0x20].copy_from_slice(&((body.len() * 4) as u32).to_le_bytes());
        exe[0x30..0x34].copy_from_slice(&0x801F_FF00u32.to_le_bytes());
        for (i, w) in body.iter().enumerate() {
            exe[HEADER_SIZE + i * 4..HEADER_SIZE + i * 4 + 4]
                .copy_from_slice(&w.to_le_bytes());
        }

        let files: [(&str, &[u8]); 2] = [("SYSTEM.CNF;1", &cnf), ("MAIN.EXE;1", &exe)];

        // Flat single-directory ISO image.
        let file_sectors: usize = files
            .iter()
            .map(|(_, d)| d.len().div_ceil(SECTOR_SIZE).max(1))
            .sum();
        let total = 24 + file_sectors + 4;
        let mut image = vec![0u8; total * SECTOR_SIZE];

        let pvd = 16 * SECTOR_SIZE;
        image[pvd] = 0x01;
        image[pvd + 1..pvd + 6].copy_from_slice(b"CD001");
        image[pvd + 158..pvd + 162].copy_from_slice(&20u32.to_le_bytes());
        image[pvd + 166..pvd + 170].copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());

        let mut rec_off = 20 * SECTOR_SIZE;
        let mut data_lba = 24u32;
        for (name, data) in files {
            let start = data_lba as usize * SECTOR_SIZE;
            image[start..start + data.len()].copy_from_slice(data);

            let name_bytes = name.as_bytes();
            let rec_len = 33 + name_bytes.len() + (name_bytes.len() + 1) % 2;
            image[rec_off] = rec_len as u8;
            image[rec_off + 2..rec_off + 6].copy_from_slice(&data_lba.to_le_bytes());
            image[rec_off + 10..rec_off + 14]
                .copy_from_slice(&(data.len() as u32).to_le_bytes());
            image[rec_off + 32] = name_bytes.len() as u8;
            image[rec_off + 33..rec_off + 33 + name_bytes.len()].copy_from_slice(name_bytes);
            rec_off += rec_len;
            data_lba += data.len().div_ceil(SECTOR_SIZE).max(1) as u32;
        }

        let path = dir.join("boot.iso");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&image).unwrap();
        path
    }

    #[test]
    fn test_boot_runs_guest_code() {
        let dir = tempfile::tempdir().unwrap();
        // addiu r1,r0,0x7F; sw r1,0x100(r0); spin: j spin; nop
        let iso = build_boot_iso(
            dir.path(),
            &[0x2401_007F, 0xAC01_0100, 0x0800_4002, 0x0000_0000],
        );

        let mut sys = System::new();
        sys.load_disc(&iso).unwrap();
        assert_eq!(sys.cpu().pc, 0x8001_0000);
        assert_eq!(sys.cpu().reg(29), 0x801F_FF00);

        sys.frame_limit = Some(1);
        sys.run().unwrap();

        assert_eq!(sys.bus_mut().read32(0x100).unwrap(), 0x7F);
        assert_eq!(sys.frames(), 1);
        assert!(sys.cycles() >= CYCLES_PER_FRAME);
    }

    #[test]
    fn test_vblank_raises_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let iso = build_boot_iso(dir.path(), &[0x0800_4000, 0x0000_0000]); // spin
        let mut sys = System::new();
        sys.load_disc(&iso).unwrap();
        sys.frame_limit = Some(1);
        sys.run().unwrap();

        let stat = sys.bus_mut().read32(0x1F80_1070).unwrap();
        assert_ne!(stat & irq::VBLANK as u32, 0);
    }

    #[test]
    fn test_missing_boot_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // SYSTEM.CNF names an executable the image does not carry.
        let cnf: &[u8] = b"BOOT = cdrom:\\GONE.EXE;1\r\n";
        let mut image = vec![0u8; 32 * SECTOR_SIZE];
        let pvd = 16 * SECTOR_SIZE;
        image[pvd] = 0x01;
        image[pvd + 1..pvd + 6].copy_from_slice(b"CD001");
        image[pvd + 158..pvd + 162].copy_from_slice(&20u32.to_le_bytes());
        image[pvd + 166..pvd + 170].copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());
        let rec = 20 * SECTOR_SIZE;
        let name = b"SYSTEM.CNF;1";
        image[rec] = (33 + name.len() + 1) as u8;
        image[rec + 2..rec + 6].copy_from_slice(&24u32.to_le_bytes());
        image[rec + 10..rec + 14].copy_from_slice(&(cnf.len() as u32).to_le_bytes());
        image[rec + 32] = name.len() as u8;
        image[rec + 33..rec + 33 + name.len()].copy_from_slice(name);
        image[24 * SECTOR_SIZE..24 * SECTOR_SIZE + cnf.len()].copy_from_slice(cnf);

        let path = dir.path().join("broken.iso");
        std::fs::write(&path, image).unwrap();

        let mut sys = System::new();
        assert!(sys.load_disc(&path).is_err());
    }
}
