use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, cmp::Ordering, fmt};

/// Range where lower bound is inclusive, upper bound is exclusive or unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T>(T, Option<T>);

impl<T> Range<T>
where
    T: Ord,
{
    pub fn new(from: T, to: Option<T>) -> Self {
        if let Some(ref to) = to {
            if from >= *to {
                panic!("ranges must go from low to high")
            }
        }
        Range(from, to)
    }

    /// Build a range straight from source data, without checking the bounds are ordered.
    ///
    /// An upper bound at or below the lower bound gives a range that contains nothing.
    pub fn from_bounds(from: T, to: Option<T>) -> Self {
        Range(from, to)
    }

    pub fn contains(&self, val: &T) -> bool {
        if let Some(end) = &self.1 {
            val >= &self.0 && val < end
        } else {
            val >= &self.0
        }
    }

    /// Compare upper bounds, where an unbounded end is greater than any bounded one.
    pub fn cmp_end(&self, other: &Self) -> Ordering {
        match (&self.1, &other.1) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl<T> Range<T> {
    pub fn start(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Display for Range<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(end) = &self.1 {
            write!(f, "{} - {}", self.0, end)
        } else {
            write!(f, "{}+", self.0)
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RangeSet<T> {
    ranges: Vec<Range<T>>,
}

impl<T> RangeSet<T> {
    pub fn new(ranges: Vec<Range<T>>) -> Self {
        Self { ranges }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<T>> + '_ {
        self.ranges.iter()
    }
}

impl<T> RangeSet<T>
where
    T: Ord,
{
    pub fn bucket_values<I, B>(self, values: I) -> RangeSetCounts<T>
    where
        I: Iterator<Item = B>,
        B: Borrow<T>,
    {
        let mut buckets = vec![0usize; self.ranges.len()];
        for value in values {
            for (idx, bucket) in self.ranges.iter().enumerate() {
                if bucket.contains(value.borrow()) {
                    buckets[idx] += 1;
                }
            }
        }
        RangeSetCounts {
            set: self,
            counts: buckets,
        }
    }

    pub fn bucket_values_with_missing<I, B>(self, values: I) -> RangeSetCountsWithMissing<T>
    where
        I: Iterator<Item = Option<B>>,
        B: Borrow<T>,
    {
        let mut buckets = vec![0usize; self.ranges.len() + 1];
        let last = self.ranges.len();
        for value in values {
            if let Some(value) = value {
                for (idx, bucket) in self.ranges.iter().enumerate() {
                    if bucket.contains(value.borrow()) {
                        buckets[idx] += 1;
                    }
                }
            } else {
                buckets[last] += 1;
            }
        }
        RangeSetCountsWithMissing {
            set: self,
            counts: buckets,
        }
    }
}

/// A range set with values bucketed, and bucket sizes recorded.
pub struct RangeSetCounts<T> {
    set: RangeSet<T>,
    counts: Vec<usize>,
}

impl<T> RangeSetCounts<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&Range<T>, usize)> {
        self.set.iter().zip_eq(self.counts.iter().copied())
    }
}

/// A range set with values bucketed, and bucket sizes recorded.
///
/// The final bucket counts the missing values.
pub struct RangeSetCountsWithMissing<T> {
    set: RangeSet<T>,
    counts: Vec<usize>,
}

impl<T> RangeSetCountsWithMissing<T> {
    pub fn iter(&self) -> impl Iterator<Item = (Option<&Range<T>>, usize)> {
        self.set
            .iter()
            .zip_longest(self.counts.iter().copied())
            .map(|el| match el {
                EitherOrBoth::Left(_) => unreachable!(),
                EitherOrBoth::Right(count) => (None, count),
                EitherOrBoth::Both(range, count) => (Some(range), count),
            })
    }
}

impl<T> RangeSetCountsWithMissing<T>
where
    T: fmt::Display,
{
    pub fn for_display(&self) -> impl Iterator<Item = (&dyn fmt::Display, usize)> {
        self.iter().map(|(range, count)| {
            let range = match range {
                Some(range) => range,
                None => &"missing data" as &dyn fmt::Display,
            };
            (range, count)
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Range, RangeSet};
    use std::cmp::Ordering;

    #[test]
    fn bounds() {
        let range = Range::new(10, Some(20));
        assert!(!range.contains(&9));
        assert!(range.contains(&10));
        assert!(range.contains(&19));
        assert!(!range.contains(&20));

        let open = Range::new(10, None);
        assert!(open.contains(&10));
        assert!(open.contains(&u32::MAX));
    }

    #[test]
    fn inverted_bounds_contain_nothing() {
        let range = Range::from_bounds(20, Some(10));
        assert!(!range.contains(&10));
        assert!(!range.contains(&15));
        assert!(!range.contains(&20));
        let empty = Range::from_bounds(5, Some(5));
        assert!(!empty.contains(&5));
    }

    #[test]
    fn unbounded_end_is_greatest() {
        let closed = Range::new(0, Some(100));
        let open = Range::new(50, None);
        assert_eq!(open.cmp_end(&closed), Ordering::Greater);
        assert_eq!(closed.cmp_end(&open), Ordering::Less);
        assert_eq!(open.cmp_end(&Range::new(0, None)), Ordering::Equal);
        assert_eq!(closed.cmp_end(&Range::new(1, Some(100))), Ordering::Equal);
    }

    #[test]
    fn bucket_with_missing() {
        let set = RangeSet::new(vec![Range::new(0, Some(10)), Range::new(10, None)]);
        let counts = set
            .bucket_values_with_missing([Some(1u32), Some(12), None, Some(3)].into_iter())
            .iter()
            .map(|(_, count)| count)
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![2, 1, 1]);
    }
}
