use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Production time of a published frame, microseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        let micros = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_micros() as i64,
            Err(before) => -(before.duration().as_micros() as i64),
        };
        Self(micros)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    pub const fn seconds(&self) -> i64 {
        self.0.div_euclid(1_000_000)
    }

    pub const fn subsec_micros(&self) -> i64 {
        self.0.rem_euclid(1_000_000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.seconds(), self.subsec_micros())
    }
}

/// Wall clock that never runs backwards, so published timestamps stay
/// non-decreasing across clock adjustments.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Timestamp,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> Timestamp {
        self.observe(Timestamp::now())
    }

    fn observe(&mut self, wall: Timestamp) -> Timestamp {
        self.last = self.last.max(wall);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_holds_through_backwards_jump() {
        let mut clock = MonotonicClock::new();
        assert_eq!(clock.observe(Timestamp::from_micros(5_000)), Timestamp::from_micros(5_000));
        assert_eq!(clock.observe(Timestamp::from_micros(4_000)), Timestamp::from_micros(5_000));
        assert_eq!(clock.observe(Timestamp::from_micros(6_000)), Timestamp::from_micros(6_000));
    }

    #[test]
    fn display_splits_seconds() {
        assert_eq!(Timestamp::from_micros(1_500_000_042).to_string(), "1500.000042");
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::ZERO);
    }
}
