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

//! Cycle-driven event scheduler
//!
//! The scheduler owns a small fixed table of event slots, one per device
//! event source. The main loop asks for the next deadline, hands the
//! translator a cycle budget up to that deadline, and dispatches every due
//! slot once the budget is spent.
//!
//! A slot is deactivated *before* its event is handed back, so a handler
//! that immediately reschedules the same slot is never clobbered by the
//! dispatch pass. Within a single dispatch, due slots fire in slot-index
//! order, not deadline order; event sources are arranged so that no
//! order-sensitive pair can land in the same tick.

/// Guest cycle count
pub type TickCount = u64;

/// Deadline value reported when no slot is active
pub const NO_DEADLINE: TickCount = TickCount::MAX;

/// Event sources, one per scheduler slot
///
/// The discriminant is the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Event {
    /// Vertical blank (end of frame)
    VBlank = 0,
    /// Timer channel 0
    Timer0 = 1,
    /// Timer channel 1
    Timer1 = 2,
    /// Timer channel 2
    Timer2 = 3,
    /// GPU interrupt request (GP0 0x1F)
    GpuIrq = 4,
    /// Serial I/O / controller transfer completion
    Sio = 5,
    /// CD-ROM command completion
    CdRom = 6,
}

/// Number of slots in the event table
pub const NUM_SLOTS: usize = 7;

#[derive(Debug, Clone, Copy)]
struct Slot {
    active: bool,
    deadline: TickCount,
}

/// Due events collected by one dispatch pass
///
/// Bounded by the slot count, so no allocation is needed.
#[derive(Debug, Default)]
pub struct DueEvents {
    events: [Option<Event>; NUM_SLOTS],
    len: usize,
}

impl DueEvents {
    fn push(&mut self, event: Event) {
        self.events[self.len] = Some(event);
        self.len += 1;
    }

    /// Iterate the due events in slot order
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.events[..self.len].iter().filter_map(|e| *e)
    }

    /// Number of events that fired
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing fired
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fixed-slot event scheduler
///
/// # Example
///
/// ```
/// use psxrec::core::timing::{Event, Scheduler};
///
/// let mut sched = Scheduler::new();
/// sched.schedule(Event::VBlank, 50_000);
/// sched.schedule(Event::Timer0, 30_000);
/// assert_eq!(sched.next_deadline(), 30_000);
///
/// let due = sched.dispatch(30_000);
/// assert_eq!(due.iter().collect::<Vec<_>>(), vec![Event::Timer0]);
/// assert_eq!(sched.next_deadline(), 50_000);
/// ```
pub struct Scheduler {
    slots: [Slot; NUM_SLOTS],
}

impl Scheduler {
    /// Create a scheduler with every slot inactive
    pub fn new() -> Self {
        Self {
            slots: [Slot {
                active: false,
                deadline: 0,
            }; NUM_SLOTS],
        }
    }

    /// Arm a slot with an absolute deadline, overwriting any previous arming
    pub fn schedule(&mut self, event: Event, deadline: TickCount) {
        let slot = &mut self.slots[event as usize];
        slot.active = true;
        slot.deadline = deadline;
    }

    /// Deactivate a slot
    pub fn remove(&mut self, event: Event) {
        self.slots[event as usize].active = false;
    }

    /// True when the slot is armed
    pub fn is_scheduled(&self, event: Event) -> bool {
        self.slots[event as usize].active
    }

    /// Minimum deadline over the active slots
    ///
    /// Returns [`NO_DEADLINE`] when nothing is armed. The table is small
    /// enough that a linear scan beats any heap.
    pub fn next_deadline(&self) -> TickCount {
        let mut min = NO_DEADLINE;
        for slot in &self.slots {
            if slot.active && slot.deadline < min {
                min = slot.deadline;
            }
        }
        min
    }

    /// Collect every slot whose deadline has passed
    ///
    /// Each due slot is deactivated before it is recorded, so a handler may
    /// re-arm the same slot without the new deadline being lost.
    pub fn dispatch(&mut self, now: TickCount) -> DueEvents {
        let mut due = DueEvents::default();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.active && slot.deadline <= now {
                slot.active = false;
                // Slot index and Event discriminant coincide.
                due.push(match idx {
                    0 => Event::VBlank,
                    1 => Event::Timer0,
                    2 => Event::Timer1,
                    3 => Event::Timer2,
                    4 => Event::GpuIrq,
                    5 => Event::Sio,
                    _ => Event::CdRom,
                });
            }
        }
        due
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scheduler_has_no_deadline() {
        let sched = Scheduler::new();
        assert_eq!(sched.next_deadline(), NO_DEADLINE);
        assert!(!sched.is_scheduled(Event::VBlank));
    }

    #[test]
    fn test_next_deadline_is_minimum() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::VBlank, 50_000);
        sched.schedule(Event::Timer0, 30_000);
        assert_eq!(sched.next_deadline(), 30_000);
    }

    #[test]
    fn test_dispatch_fires_only_due_slots() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::VBlank, 50_000);
        sched.schedule(Event::Timer0, 30_000);

        let due = sched.dispatch(30_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due.iter().next(), Some(Event::Timer0));

        // Timer0 slot is now inactive, VBlank untouched.
        assert!(!sched.is_scheduled(Event::Timer0));
        assert!(sched.is_scheduled(Event::VBlank));
        assert_eq!(sched.next_deadline(), 50_000);
    }

    #[test]
    fn test_reschedule_from_handler_is_not_clobbered() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::Timer1, 100);

        let due = sched.dispatch(100);
        assert_eq!(due.len(), 1);
        // Handler re-arms the same slot; dispatch already deactivated it,
        // so the new deadline sticks.
        sched.schedule(Event::Timer1, 200);
        assert!(sched.is_scheduled(Event::Timer1));
        assert_eq!(sched.next_deadline(), 200);
    }

    #[test]
    fn test_schedule_overwrites() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::CdRom, 1_000);
        sched.schedule(Event::CdRom, 500);
        assert_eq!(sched.next_deadline(), 500);
    }

    #[test]
    fn test_remove() {
        let mut sched = Scheduler::new();
        sched.schedule(Event::Sio, 1_000);
        sched.remove(Event::Sio);
        assert_eq!(sched.next_deadline(), NO_DEADLINE);
        assert!(sched.dispatch(2_000).is_empty());
    }

    #[test]
    fn test_dispatch_order_follows_slot_index() {
        let mut sched = Scheduler::new();
        // Timer2 is due "earlier" but VBlank occupies a lower slot.
        sched.schedule(Event::Timer2, 10);
        sched.schedule(Event::VBlank, 20);

        let due = sched.dispatch(20);
        let fired: Vec<_> = due.iter().collect();
        assert_eq!(fired, vec![Event::VBlank, Event::Timer2]);
    }
}
