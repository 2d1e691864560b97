//! Ordered queue of pending events.
use std::collections::VecDeque;
use strum::{FromRepr, VariantArray};

/// An event which can be scheduled to happen at a specific time.
///
/// The discriminants are the identifiers used in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, VariantArray)]
#[repr(u32)]
pub enum Event {
    /// Vertical interrupt: a frame has been scanned out.
    Vi = 0x001,
    /// Count has reached Compare.
    Compare = 0x002,
    /// Re-evaluate pending interrupts.
    CheckInterrupt = 0x004,
    /// A serial interface DMA finished.
    Si = 0x008,
    /// A peripheral interface DMA finished.
    Pi = 0x010,
    /// An audio interface buffer finished.
    Ai = 0x040,
    /// The signal processor halted.
    Sp = 0x080,
    /// The display processor finished.
    Dp = 0x100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub deadline: u64,
    pub event: Event,
}

/// Keeps pending events sorted by deadline.
///
/// Time is measured in ticks of the Count register, extended to 64 bits so the queue order never
/// depends on Count wrapping around.
#[derive(Clone, PartialEq, Eq)]
pub struct Scheduler {
    elapsed: u64,
    scheduled: VecDeque<Scheduled>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("elapsed", &self.elapsed)
            .field("scheduled", &self.scheduled)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            elapsed: 0,
            scheduled: VecDeque::with_capacity(16),
        }
    }
}

impl Scheduler {
    /// Schedules `event` to happen `after` ticks from now. Events with equal deadlines fire in the
    /// order they were scheduled.
    #[inline(always)]
    pub fn schedule(&mut self, event: Event, after: u64) {
        let deadline = self.elapsed + after;
        let index = self.scheduled.partition_point(|e| e.deadline <= deadline);
        self.scheduled.insert(index, Scheduled { deadline, event });
    }

    #[inline(always)]
    pub fn schedule_now(&mut self, event: Event) {
        self.schedule(event, 0)
    }

    /// Removes every pending occurrence of `event`.
    #[inline(always)]
    pub fn cancel(&mut self, event: Event) {
        self.scheduled.retain(|e| e.event != event);
    }

    /// Whether `event` is pending.
    #[inline(always)]
    pub fn contains(&self, event: Event) -> bool {
        self.scheduled.iter().any(|e| e.event == event)
    }

    /// Ticks until `event` fires, if it is pending.
    pub fn until(&self, event: Event) -> Option<u64> {
        self.scheduled
            .iter()
            .find(|e| e.event == event)
            .map(|e| e.deadline.saturating_sub(self.elapsed))
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn advance(&mut self, ticks: u64) {
        self.elapsed += ticks;
    }

    /// Ticks until the next event. Zero if it is already due.
    #[inline(always)]
    pub fn until_next(&self) -> Option<u64> {
        self.scheduled
            .front()
            .map(|e| e.deadline.saturating_sub(self.elapsed))
    }

    /// Whether the next event is due.
    #[inline(always)]
    pub fn is_due(&self) -> bool {
        self.scheduled
            .front()
            .is_some_and(|e| e.deadline <= self.elapsed)
    }

    /// Pops the next event if it is due.
    #[inline(always)]
    pub fn pop(&mut self) -> Option<Event> {
        self.scheduled
            .pop_front_if(|e| e.deadline <= self.elapsed)
            .map(|e| e.event)
    }

    /// How many ticks have elapsed.
    #[inline(always)]
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Iterates over pending events in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &Scheduled> {
        self.scheduled.iter()
    }

    /// Removes every pending event.
    pub fn clear(&mut self) {
        self.scheduled.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn events_fire_in_deadline_order() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(Event::Vi, 100);
        scheduler.schedule(Event::Compare, 10);
        scheduler.schedule(Event::Si, 10);
        scheduler.schedule(Event::Pi, 50);

        assert_eq!(scheduler.until_next(), Some(10));
        assert_eq!(scheduler.pop(), None);

        scheduler.advance(60);
        assert_eq!(scheduler.pop(), Some(Event::Compare));
        assert_eq!(scheduler.pop(), Some(Event::Si));
        assert_eq!(scheduler.pop(), Some(Event::Pi));
        assert_eq!(scheduler.pop(), None);
        assert_eq!(scheduler.until_next(), Some(40));
    }

    #[test]
    fn cancel_and_query() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(Event::Compare, 30);
        scheduler.schedule(Event::Vi, 20);
        scheduler.schedule_now(Event::CheckInterrupt);

        assert!(scheduler.is_due());
        assert_eq!(scheduler.until(Event::Compare), Some(30));

        scheduler.cancel(Event::Compare);
        assert!(!scheduler.contains(Event::Compare));
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn snapshot_identifiers() {
        for event in Event::VARIANTS {
            assert_eq!(Event::from_repr(*event as u32), Some(*event));
        }
        assert_eq!(Event::from_repr(0x020), None);
    }
}
