//! Binary search over comment batches.
//!
//! Batches are ordered by time and only their observed `[min, max]` creation
//! timestamps are known once fetched. [`BatchSearch`] decides which batch to
//! look at next; the caller fetches it and reports what it saw.

/// What the search wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// Fetch this batch and call [`BatchSearch::observe`].
    Continue(usize),
    /// The target lies inside this batch.
    Found(usize),
    /// No batch contains the target. `insertion` is the index of the first
    /// batch after it (equal to the batch count when the target is past the
    /// end).
    Exhausted { insertion: usize },
}

#[derive(Debug, Clone)]
pub struct BatchSearch {
    target: f64,
    low: usize,
    high: usize,
}

impl BatchSearch {
    pub fn new(target: f64, batch_count: usize) -> Self {
        Self {
            target,
            low: 0,
            high: batch_count,
        }
    }

    /// First step of the search.
    pub fn start(&self) -> SearchStep {
        self.next()
    }

    fn next(&self) -> SearchStep {
        if self.low < self.high {
            SearchStep::Continue(self.low + (self.high - self.low) / 2)
        } else {
            SearchStep::Exhausted {
                insertion: self.low,
            }
        }
    }

    /// Report the timestamp range of the candidate batch. A batch with no
    /// timestamps (every comment removed) is treated as lying before the
    /// target.
    pub fn observe(&mut self, candidate: usize, range: Option<(f64, f64)>) -> SearchStep {
        match range {
            Some((min, _)) if self.target < min => self.high = candidate,
            Some((_, max)) if self.target > max => self.low = candidate + 1,
            Some(_) => return SearchStep::Found(candidate),
            None => self.low = candidate + 1,
        }
        self.next()
    }
}

/// Run the search over ranges that are already known.
pub fn search_ranges(ranges: &[(f64, f64)], target: f64) -> SearchStep {
    let mut search = BatchSearch::new(target, ranges.len());
    let mut step = search.start();
    while let SearchStep::Continue(candidate) = step {
        step = search.observe(candidate, Some(ranges[candidate]));
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RANGES: &[(f64, f64)] = &[(0.0, 9.0), (10.0, 19.0), (25.0, 30.0), (31.0, 40.0)];

    #[test]
    fn test_finds_straddling_batch() {
        assert_eq!(search_ranges(RANGES, 0.0), SearchStep::Found(0));
        assert_eq!(search_ranges(RANGES, 15.0), SearchStep::Found(1));
        assert_eq!(search_ranges(RANGES, 30.0), SearchStep::Found(2));
        assert_eq!(search_ranges(RANGES, 40.0), SearchStep::Found(3));
    }

    #[test]
    fn test_gap_and_out_of_range() {
        assert_eq!(search_ranges(RANGES, 22.0), SearchStep::Exhausted { insertion: 2 });
        assert_eq!(search_ranges(RANGES, -1.0), SearchStep::Exhausted { insertion: 0 });
        assert_eq!(search_ranges(RANGES, 99.0), SearchStep::Exhausted { insertion: 4 });
        assert_eq!(search_ranges(&[], 5.0), SearchStep::Exhausted { insertion: 0 });
    }

    #[test]
    fn test_empty_batch_is_skipped() {
        let mut search = BatchSearch::new(35.0, 3);
        assert_eq!(search.start(), SearchStep::Continue(1));
        assert_eq!(search.observe(1, None), SearchStep::Continue(2));
        assert_eq!(search.observe(2, Some((30.0, 40.0))), SearchStep::Found(2));
    }

    fn sorted_ranges() -> impl Strategy<Value = Vec<(f64, f64)>> {
        prop::collection::vec((0u32..5, 0u32..5), 0..20).prop_map(|steps| {
            let mut at = 0.0;
            steps
                .into_iter()
                .map(|(gap, width)| {
                    let min = at + gap as f64;
                    let max = min + width as f64;
                    at = max + 1.0;
                    (min, max)
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_search_matches_linear_scan(ranges in sorted_ranges(), target in -2.0f64..110.0) {
            let expected = match ranges.iter().position(|(min, max)| *min <= target && target <= *max) {
                Some(i) => SearchStep::Found(i),
                None => SearchStep::Exhausted {
                    insertion: ranges.iter().filter(|(_, max)| *max < target).count(),
                },
            };
            prop_assert_eq!(search_ranges(&ranges, target), expected);
        }
    }
}
