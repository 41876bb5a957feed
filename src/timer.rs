//! sdspi-disk - Deadline timer
//!
//! Every wait on the card is a poll loop bounded by a [`Deadline`], so no
//! operation can block forever.

/// A monotonic millisecond counter, such as a SysTick driven tick.
///
/// The counter is allowed to wrap around.
pub trait TickSource {
    /// Milliseconds since some fixed point in the past.
    fn now_ms(&self) -> u32;
}

impl<T> TickSource for &T
where
    T: TickSource,
{
    fn now_ms(&self) -> u32 {
        (*self).now_ms()
    }
}

/// A point in time after which a protocol step gives up.
pub struct Deadline<'t, T>
where
    T: TickSource,
{
    ticks: &'t T,
    start_tick: u32,
    duration_ms: u32,
}

impl<'t, T> Deadline<'t, T>
where
    T: TickSource,
{
    /// Start a deadline `duration_ms` from now.
    pub fn start(ticks: &'t T, duration_ms: u32) -> Self {
        Deadline {
            ticks,
            start_tick: ticks.now_ms(),
            duration_ms,
        }
    }

    /// Has the deadline passed?
    pub fn expired(&self) -> bool {
        self.ticks.now_ms().wrapping_sub(self.start_tick) >= self.duration_ms
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::Cell;

    struct ManualTicks(Cell<u32>);

    impl TickSource for ManualTicks {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }

    #[test]
    fn expires_after_duration() {
        let ticks = ManualTicks(Cell::new(1000));
        let deadline = Deadline::start(&ticks, 200);
        assert!(!deadline.expired());
        ticks.0.set(1199);
        assert!(!deadline.expired());
        ticks.0.set(1200);
        assert!(deadline.expired());
    }

    #[test]
    fn survives_counter_wrap() {
        let ticks = ManualTicks(Cell::new(u32::MAX - 10));
        let deadline = Deadline::start(&ticks, 500);
        ticks.0.set(100);
        assert!(!deadline.expired());
        ticks.0.set(489);
        assert!(deadline.expired());
    }

    #[test]
    fn zero_duration_is_already_expired() {
        let ticks = ManualTicks(Cell::new(7));
        assert!(Deadline::start(&ticks, 0).expired());
    }
}
