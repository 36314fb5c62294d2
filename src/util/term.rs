use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Half-open validity interval `[start, end)` of a ticket or lease.
///
/// `new_start` marks the boundary of the most recent extension: on an
/// extended term it holds the old `end`, so the authority can tell the
/// already-held portion from the newly granted one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub new_start: Option<DateTime<Utc>>,
}

impl Term {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidArgument(format!("term end {} not after start {}", end, start)));
        }
        Ok(Self { start, end, new_start: None })
    }

    /// Produces the extended term: same start, `new_start` at the old end,
    /// end pushed out by `delta`.
    pub fn extend(&self, delta: Duration) -> Result<Term> {
        if delta <= Duration::zero() {
            return Err(Error::InvalidArgument(format!("extend delta {} must be positive", delta)));
        }

        Ok(Term { start: self.start, new_start: Some(self.end), end: self.end + delta })
    }

    /// True when `other` is a legal extension of this term: same start and a
    /// strictly later end.
    pub fn extends(&self, other: &Term) -> bool {
        other.start == self.start && other.end > self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn expired(&self, at: DateTime<Utc>) -> bool {
        at >= self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.new_start {
            Some(ns) => write!(f, "[{}, {}) new_start={}", self.start, self.end, ns),
            None => write!(f, "[{}, {})", self.start, self.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn extend_keeps_start_and_marks_boundary() {
        let term = Term::new(at(5), at(10)).unwrap();
        let extended = term.extend(Duration::seconds(10)).unwrap();

        assert_eq!(extended.start, at(5));
        assert_eq!(extended.new_start, Some(at(10)));
        assert_eq!(extended.end, at(20));
        assert!(term.extends(&extended));
    }

    #[test]
    fn extend_rejects_non_positive_delta() {
        let term = Term::new(at(5), at(10)).unwrap();
        assert!(term.extend(Duration::zero()).is_err());
        assert!(term.extend(Duration::seconds(-1)).is_err());
    }

    #[test]
    fn half_open_interval_membership() {
        let term = Term::new(at(5), at(10)).unwrap();
        assert!(term.contains(at(5)));
        assert!(term.contains(at(9)));
        assert!(!term.contains(at(10)));
        assert!(term.expired(at(10)));
    }
}
