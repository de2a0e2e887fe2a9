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

//! Timer channels 0..=2
//!
//! Counter/mode/target register files, advanced in bulk between
//! scheduler slices. Timer 2 honours the sysclock/8 prescaler; the
//! dotclock and hblank sources of timers 0/1 approximate to the
//! sysclock, and sync-mode gating is not modelled. Coarse, but stable
//! for the interrupt-driven uses the boot path has.

use crate::core::interrupt::irq;
use crate::core::timing::TickCount;

#[derive(Debug, Clone, Copy, Default)]
struct Timer {
    counter: u32,
    mode: u32,
    target: u32,
    /// Accumulated sub-prescaler cycles
    remainder: u32,
    irq_armed: bool,
}

impl Timer {
    fn prescale(&self, index: usize) -> u32 {
        // Timer 2 clock source 2/3 is sysclock/8.
        if index == 2 && self.mode & (3 << 8) >= (2 << 8) {
            8
        } else {
            1
        }
    }

    /// Advance by CPU cycles; returns true when an enabled IRQ fires
    fn advance(&mut self, index: usize, cycles: u32) -> bool {
        let pre = self.prescale(index);
        let total = self.remainder + cycles;
        self.remainder = total % pre;
        let mut ticks = total / pre;
        let mut fired = false;

        while ticks > 0 {
            let target = self.target & 0xFFFF;
            let reset_at = if self.mode & (1 << 3) != 0 && target > 0 {
                target
            } else {
                0xFFFF
            };
            let until = reset_at.saturating_sub(self.counter).max(1);
            let step = ticks.min(until);
            self.counter += step;
            ticks -= step;

            if self.counter >= reset_at {
                self.counter = 0;
                if reset_at == target {
                    self.mode |= 1 << 11; // reached target
                    if self.mode & (1 << 4) != 0 && self.irq_armed {
                        fired = true;
                        if self.mode & (1 << 6) == 0 {
                            // One-shot mode arms once.
                            self.irq_armed = false;
                        }
                    }
                } else {
                    self.mode |= 1 << 12; // reached 0xFFFF
                    if self.mode & (1 << 5) != 0 && self.irq_armed {
                        fired = true;
                        if self.mode & (1 << 6) == 0 {
                            self.irq_armed = false;
                        }
                    }
                }
            }
        }
        fired
    }
}

/// The three hardware timers
pub struct Timers {
    timers: [Timer; 3],
    last_sync: TickCount,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            timers: [Timer::default(); 3],
            last_sync: 0,
        }
    }

    /// Register read; reading the mode register clears the reached flags
    pub fn read(&mut self, phys: u32) -> u32 {
        let index = (((phys >> 4) & 0xF) as usize).min(2);
        match phys & 0xF {
            0x0 => self.timers[index].counter & 0xFFFF,
            0x4 => {
                let mode = self.timers[index].mode;
                self.timers[index].mode &= !(3 << 11);
                mode
            }
            0x8 => self.timers[index].target & 0xFFFF,
            _ => 0,
        }
    }

    /// Register write
    pub fn write(&mut self, phys: u32, value: u32) {
        let index = (((phys >> 4) & 0xF) as usize).min(2);
        let t = &mut self.timers[index];
        match phys & 0xF {
            0x0 => t.counter = value & 0xFFFF,
            0x4 => {
                // Writing the mode resets the counter and re-arms the IRQ.
                t.mode = value & 0x3FF;
                t.counter = 0;
                t.remainder = 0;
                t.irq_armed = true;
            }
            0x8 => t.target = value & 0xFFFF,
            _ => {}
        }
    }

    /// Advance all channels to `now`; returns the I_STAT bits to raise
    pub fn advance_to(&mut self, now: TickCount) -> u16 {
        let elapsed = now.saturating_sub(self.last_sync) as u32;
        self.last_sync = now;
        if elapsed == 0 {
            return 0;
        }

        let mut pending = 0u16;
        for (i, t) in self.timers.iter_mut().enumerate() {
            if t.advance(i, elapsed) {
                pending |= match i {
                    0 => irq::TIMER0,
                    1 => irq::TIMER1,
                    _ => irq::TIMER2,
                };
            }
        }
        pending
    }

    /// Absolute deadline of one channel's next enabled IRQ
    pub fn channel_deadline(&self, index: usize, now: TickCount) -> Option<TickCount> {
        let t = &self.timers[index];
        let irq_on_target = t.mode & (1 << 4) != 0;
        let irq_on_wrap = t.mode & (1 << 5) != 0;
        if !t.irq_armed || (!irq_on_target && !irq_on_wrap) {
            return None;
        }
        let boundary = if irq_on_target && t.target & 0xFFFF > 0 {
            (t.target & 0xFFFF).saturating_sub(t.counter).max(1)
        } else {
            0x1_0000 - t.counter.min(0xFFFF)
        };
        Some(now + boundary as TickCount * t.prescale(index) as TickCount)
    }

    /// Cycles until the next enabled IRQ over all channels
    pub fn next_deadline_after(&self, now: TickCount) -> Option<TickCount> {
        (0..3)
            .filter_map(|i| self.channel_deadline(i, now))
            .min()
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}
