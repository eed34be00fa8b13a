//! Operating-system abstraction layer (`spec.md` §4.A).
//!
//! Split into single-purpose traits, one narrow trait per hardware seam
//! rather than one monolithic OSAL trait. All operations are infallible:
//! a platform is expected to provide
//! correct glue, not propagate hardware faults through these primitives.
//! Logging does not get its own trait. Callers use the `log` crate
//! directly, and a platform installs whatever `log::Log` backend it wants.

/// Monotonic millisecond clock. Wraps at 2^32 ms (~49.7 days); callers
/// must compare ticks with wrapping subtraction, never direct ordering.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Returns `true` if `now` is at or past `deadline`, correct across a
/// single wraparound of the millisecond counter.
pub fn deadline_elapsed(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < (u32::MAX / 2)
}

/// Blocking delay. Only ever called from `Driver::init`/AT engine code,
/// never from the FSM's `tick()`.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Nestable critical section guard. Disables interrupt preemption on bare
/// metal, or takes a spinlock appropriate to the core count on an SMP
/// host. Only the two interrupt-touched Port flags need this.
pub trait CriticalSection {
    fn with<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// 32-bit entropy source.
///
/// A platform should derive this from ADC noise or similar; if the raw
/// sample is exactly zero, fall back to `tick ^ 0x5A5A_5A5A` rather than
/// returning zero, matching `original_source`'s `Port_GetRandomSeed`.
pub trait Entropy {
    fn random_u32(&mut self) -> u32;
}

/// Applies the zero-fallback rule any `Entropy` impl should use.
pub fn entropy_or_fallback(sample: u32, tick: u32) -> u32 {
    if sample == 0 {
        tick ^ 0x5A5A_5A5A
    } else {
        sample
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use core::cell::Cell;

    /// Fake clock whose value the test advances explicitly.
    pub struct FakeClock {
        now: Cell<u32>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            FakeClock { now: Cell::new(0) }
        }

        pub fn advance(&self, ms: u32) {
            self.now.set(self.now.get().wrapping_add(ms));
        }
    }

    impl Default for FakeClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> u32 {
            self.now.get()
        }
    }

    /// No-op delay that just advances the fake clock, so timing-sensitive
    /// tests stay deterministic without a real sleep.
    pub struct FakeDelay<'a> {
        pub clock: &'a FakeClock,
    }

    impl<'a> Delay for FakeDelay<'a> {
        fn delay_ms(&mut self, ms: u32) {
            self.clock.advance(ms);
        }
    }

    /// No-op critical section; single-threaded tests need no exclusion.
    pub struct NoopCriticalSection;

    impl CriticalSection for NoopCriticalSection {
        fn with<R>(&self, f: impl FnOnce() -> R) -> R {
            f()
        }
    }

    /// Deterministic entropy source for tests.
    pub struct FixedEntropy(pub u32);

    impl Entropy for FixedEntropy {
        fn random_u32(&mut self) -> u32 {
            self.0
        }
    }
}
