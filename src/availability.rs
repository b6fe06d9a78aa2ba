// Availability decision logic.
// Given the open dates reported by the portal and the current booking constraints,
// decides which date (if any) is worth rebooking to. No I/O and no clock reads.

use tracing::{debug, info};

use crate::dates::{CalendarDate, DateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityDecision {
    pub date: Option<CalendarDate>,
    // true only when the portal returned no dates at all
    pub should_long_sleep: bool,
}

impl AvailabilityDecision {
    pub fn no_data() -> Self {
        Self {
            date: None,
            should_long_sleep: true,
        }
    }

    pub fn nothing_suitable() -> Self {
        Self {
            date: None,
            should_long_sleep: false,
        }
    }

    pub fn book(date: CalendarDate) -> Self {
        Self {
            date: Some(date),
            should_long_sleep: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AvailabilityEngine {
    min_improvement_days: u32,
}

impl AvailabilityEngine {
    pub fn new(min_improvement_days: u32) -> Self {
        Self {
            min_improvement_days,
        }
    }

    pub fn threshold(&self, current_booked: CalendarDate) -> Result<CalendarDate, DateError> {
        current_booked.threshold(self.min_improvement_days)
    }

    /// Picks the earliest open date strictly before the threshold and not before `min_date`.
    pub fn decide(
        &self,
        dates: &[CalendarDate],
        current_booked: CalendarDate,
        min_date: Option<CalendarDate>,
    ) -> Result<AvailabilityDecision, DateError> {
        if dates.is_empty() {
            return Ok(AvailabilityDecision::no_data());
        }

        let mut sorted = dates.to_vec();
        sorted.sort_unstable();
        info!(earliest = %sorted[0], "earliest available date");

        let threshold = self.threshold(current_booked)?;

        let good: Vec<CalendarDate> = sorted
            .into_iter()
            .filter(|date| *date < threshold)
            .filter(|date| min_date.map_or(true, |min| *date >= min))
            .collect();

        match good.first() {
            None => {
                info!(
                    %threshold,
                    min_improvement_days = self.min_improvement_days,
                    current = %current_booked,
                    "no good dates found after filtering"
                );
                Ok(AvailabilityDecision::nothing_suitable())
            }
            Some(&earliest) => {
                debug!(candidates = good.len(), "dates passing filters");
                info!(count = good.len(), using = %earliest, "found good dates");
                Ok(AvailabilityDecision::book(earliest))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> CalendarDate {
        CalendarDate::parse(s).unwrap()
    }

    fn dates(list: &[&str]) -> Vec<CalendarDate> {
        list.iter().map(|s| d(s)).collect()
    }

    #[test]
    fn test_selects_earliest_before_threshold() {
        let engine = AvailabilityEngine::new(5);
        assert_eq!(engine.threshold(d("2025-03-10")).unwrap(), d("2025-03-05"));

        let decision = engine
            .decide(
                &dates(&["2025-03-01", "2025-01-01", "2025-02-01"]),
                d("2025-03-10"),
                None,
            )
            .unwrap();
        assert_eq!(decision, AvailabilityDecision::book(d("2025-01-01")));
        assert!(!decision.should_long_sleep);
    }

    #[test]
    fn test_empty_input_requests_long_sleep() {
        for min in [None, Some(d("2020-01-01"))] {
            let decision = AvailabilityEngine::new(0)
                .decide(&[], d("2025-03-10"), min)
                .unwrap();
            assert_eq!(decision, AvailabilityDecision::no_data());
        }
    }

    #[test]
    fn test_all_filtered_out_is_short_sleep() {
        let decision = AvailabilityEngine::new(5)
            .decide(
                &dates(&["2025-03-05", "2025-03-08", "2025-04-01"]),
                d("2025-03-10"),
                None,
            )
            .unwrap();
        assert_eq!(decision, AvailabilityDecision::nothing_suitable());
    }

    #[test]
    fn test_threshold_is_strict() {
        // threshold itself is not an improvement of the required size
        let engine = AvailabilityEngine::new(5);
        let at = engine
            .decide(&dates(&["2025-03-05"]), d("2025-03-10"), None)
            .unwrap();
        assert_eq!(at.date, None);

        let before = engine
            .decide(&dates(&["2025-03-04"]), d("2025-03-10"), None)
            .unwrap();
        assert_eq!(before.date, Some(d("2025-03-04")));
    }

    #[test]
    fn test_min_date_is_inclusive() {
        let engine = AvailabilityEngine::new(0);
        let open = dates(&["2025-02-09", "2025-02-10", "2025-02-11"]);

        let decision = engine
            .decide(&open, d("2025-03-10"), Some(d("2025-02-10")))
            .unwrap();
        assert_eq!(decision.date, Some(d("2025-02-10")));

        let only_earlier = engine
            .decide(&dates(&["2025-02-09"]), d("2025-03-10"), Some(d("2025-02-10")))
            .unwrap();
        assert_eq!(only_earlier, AvailabilityDecision::nothing_suitable());
    }

    #[test]
    fn test_zero_improvement_still_requires_strictly_earlier() {
        let engine = AvailabilityEngine::new(0);
        let same_day = engine
            .decide(&dates(&["2025-03-10"]), d("2025-03-10"), None)
            .unwrap();
        assert_eq!(same_day.date, None);
    }

    #[test]
    fn test_decision_is_deterministic() {
        let engine = AvailabilityEngine::new(10);
        let open = dates(&["2025-05-01", "2025-04-20", "2025-05-30"]);
        let first = engine.decide(&open, d("2025-06-01"), None).unwrap();
        let second = engine.decide(&open, d("2025-06-01"), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.date, Some(d("2025-04-20")));
    }
}
