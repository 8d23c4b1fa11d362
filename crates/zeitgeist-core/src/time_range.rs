//! Closed millisecond intervals.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, timestamp_for_now};

/// A closed interval `[begin, end]` of milliseconds since the Unix epoch.
///
/// An empty intersection is represented by `None` rather than by a special
/// range value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
  pub begin: i64,
  pub end:   i64,
}

impl TimeRange {
  /// Build a range, rejecting `begin > end`.
  pub fn new(begin: i64, end: i64) -> Result<Self> {
    if begin > end {
      return Err(Error::InvalidTimeRange { begin, end });
    }
    Ok(Self { begin, end })
  }

  /// The range covering every representable timestamp.
  pub const fn always() -> Self { Self { begin: 0, end: i64::MAX } }

  /// From now until the end of time.
  pub fn from_now() -> Self { Self { begin: timestamp_for_now(), end: i64::MAX } }

  /// From the epoch until now.
  pub fn until_now() -> Self { Self { begin: 0, end: timestamp_for_now() } }

  /// The smallest range containing every timestamp in `stamps`, or `None`
  /// when the iterator is empty.
  pub fn spanning(stamps: impl IntoIterator<Item = i64>) -> Option<Self> {
    stamps.into_iter().fold(None, |acc, t| match acc {
      None => Some(Self { begin: t, end: t }),
      Some(r) => Some(Self { begin: r.begin.min(t), end: r.end.max(t) }),
    })
  }

  pub fn contains(&self, t: i64) -> bool { self.begin <= t && t <= self.end }

  pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
    let begin = self.begin.max(other.begin);
    let end = self.end.min(other.end);
    (begin <= end).then_some(TimeRange { begin, end })
  }

  /// True when `other` lies entirely within `self`.
  pub fn covers(&self, other: &TimeRange) -> bool {
    self.begin <= other.begin && other.end <= self.end
  }
}

impl Default for TimeRange {
  fn default() -> Self { Self::always() }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  #[test]
  fn rejects_inverted_bounds() {
    assert!(matches!(
      TimeRange::new(10, 5),
      Err(Error::InvalidTimeRange { begin: 10, end: 5 })
    ));
  }

  #[test]
  fn disjoint_ranges_have_no_intersection() {
    let a = TimeRange::new(0, 10).unwrap();
    let b = TimeRange::new(11, 20).unwrap();
    assert_eq!(a.intersect(&b), None);
  }

  #[test]
  fn touching_ranges_share_one_instant() {
    let a = TimeRange::new(0, 10).unwrap();
    let b = TimeRange::new(10, 20).unwrap();
    assert_eq!(a.intersect(&b), Some(TimeRange { begin: 10, end: 10 }));
  }

  #[test]
  fn spanning_covers_all_stamps() {
    assert_eq!(TimeRange::spanning([]), None);
    assert_eq!(
      TimeRange::spanning([500, 1500, 100]),
      Some(TimeRange { begin: 100, end: 1500 })
    );
  }

  fn range() -> impl Strategy<Value = TimeRange> {
    (0i64..10_000, 0i64..10_000).prop_map(|(a, b)| TimeRange { begin: a.min(b), end: a.max(b) })
  }

  proptest! {
    #[test]
    fn intersection_is_contained_in_both(a in range(), b in range()) {
      if let Some(i) = a.intersect(&b) {
        prop_assert!(a.covers(&i));
        prop_assert!(b.covers(&i));
      }
    }

    #[test]
    fn intersection_is_commutative(a in range(), b in range()) {
      prop_assert_eq!(a.intersect(&b), b.intersect(&a));
    }

    #[test]
    fn contains_agrees_with_intersection(r in range(), t in 0i64..10_000) {
      let point = TimeRange { begin: t, end: t };
      prop_assert_eq!(r.contains(t), r.intersect(&point).is_some());
    }
  }
}
