use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::term::Term;

/// Converts between wall-clock instants and scheduler cycles.
///
/// A cycle is the integer index of a `cycle_millis`-wide window counted from
/// `beginning_of_time` (milliseconds since the Unix epoch). All cycle
/// arithmetic in the kernel goes through one shared clock so every subsystem
/// agrees on window boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorClock {
    pub beginning_of_time: i64,
    pub cycle_millis: u64,
}

impl ActorClock {
    pub fn new(beginning_of_time: i64, cycle_millis: u64) -> Result<Self> {
        if cycle_millis == 0 {
            return Err(Error::InvalidArgument("cycle_millis must be positive".to_string()));
        }
        Ok(Self { beginning_of_time, cycle_millis })
    }

    /// Cycle containing the given instant. Instants before the beginning of
    /// time map to cycle 0.
    pub fn cycle(&self, when: DateTime<Utc>) -> i64 {
        let millis = when.timestamp_millis();
        if millis <= self.beginning_of_time {
            return 0;
        }
        (millis - self.beginning_of_time) / self.cycle_millis as i64
    }

    /// First instant of the given cycle. Saturates at the end of
    /// representable time, so arithmetic near `i64::MAX` cycles stays
    /// well-defined.
    pub fn cycle_start_date(&self, cycle: i64) -> DateTime<Utc> {
        cycle
            .checked_mul(self.cycle_millis as i64)
            .and_then(|offset| offset.checked_add(self.beginning_of_time))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// First instant after the given cycle, i.e. the exclusive end of its
    /// window.
    pub fn cycle_end_date(&self, cycle: i64) -> DateTime<Utc> {
        self.cycle_start_date(cycle + 1)
    }

    pub fn cycle_duration(&self) -> Duration {
        Duration::milliseconds(self.cycle_millis as i64)
    }

    /// Term covering `[start_cycle, end_cycle)`.
    pub fn term(&self, start_cycle: i64, end_cycle: i64) -> Result<Term> {
        Term::new(self.cycle_start_date(start_cycle), self.cycle_start_date(end_cycle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> ActorClock {
        ActorClock::new(0, 1000).unwrap()
    }

    #[test]
    fn cycle_round_trip() {
        let clock = clock();
        let date = clock.cycle_start_date(5);
        assert_eq!(clock.cycle(date), 5);
        // Last instant inside the window still maps to the same cycle.
        assert_eq!(clock.cycle(date + Duration::milliseconds(999)), 5);
        assert_eq!(clock.cycle(date + Duration::milliseconds(1000)), 6);
    }

    #[test]
    fn instants_before_epoch_clamp_to_cycle_zero() {
        let clock = ActorClock::new(10_000, 1000).unwrap();
        assert_eq!(clock.cycle(Utc.timestamp_millis_opt(0).unwrap()), 0);
    }

    #[test]
    fn extreme_cycles_saturate_instead_of_overflowing() {
        let clock = clock();
        assert_eq!(clock.cycle_start_date(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(clock.cycle_start_date(0), Utc.timestamp_millis_opt(0).unwrap());
    }

    #[test]
    fn term_spans_cycle_windows() {
        let clock = clock();
        let term = clock.term(5, 10).unwrap();
        assert_eq!(clock.cycle(term.start), 5);
        assert_eq!(clock.cycle(term.end), 10);
    }
}
