//! Stats counters that generated code increments in place.

use std::sync::atomic::{AtomicI32, Ordering};

/// A named 32-bit counter with a stable address.
///
/// Generated code bumps the counter through an external reference to its
/// cell, so the cell lives behind a `Box`.
#[derive(Debug)]
pub struct StatsCounter {
    name: &'static str,
    cell: Box<AtomicI32>,
}

impl StatsCounter {
    /// Create a counter starting at zero.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: Box::new(AtomicI32::new(0)),
        }
    }

    /// Counter name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current value
    pub fn get(&self) -> i32 {
        self.cell.load(Ordering::Relaxed)
    }

    /// Add `delta` to the counter.
    pub fn increment(&self, delta: i32) {
        self.cell.fetch_add(delta, Ordering::Relaxed);
    }

    /// Subtract `delta` from the counter.
    pub fn decrement(&self, delta: i32) {
        self.cell.fetch_sub(delta, Ordering::Relaxed);
    }

    /// Reset to zero.
    pub fn reset(&self) {
        self.cell.store(0, Ordering::Relaxed);
    }

    /// Address of the counter cell.
    pub fn internal_pointer(&self) -> usize {
        self.cell.as_ref() as *const AtomicI32 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_arithmetic() {
        let counter = StatsCounter::new("c:reloc.records");
        counter.increment(5);
        counter.decrement(2);
        assert_eq!(counter.get(), 3);
        counter.reset();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.name(), "c:reloc.records");
    }

    #[test]
    fn test_internal_pointer_survives_move() {
        let counter = StatsCounter::new("c:moved");
        let before = counter.internal_pointer();
        let moved = counter;
        assert_eq!(moved.internal_pointer(), before);
    }
}
