//! Anchored study-day windows.
//!
//! Every participant's window starts at their anchor day (the study day of
//! their first qualifying event) and runs for a fixed number of study days.
//! Scheduled runs only ever finalize completed days, so iteration stops at
//! the evaluation day minus one even when the window extends further.

use chrono::NaiveDate;

/// Lazy, restartable iterator over `(index, date)` pairs of a window.
///
/// `index` is zero-based and counts elapsed days within the window, which
/// feeds the days-elapsed/days-left arithmetic in the rule evaluator.
#[derive(Debug, Clone)]
pub struct WindowIter {
    next: NaiveDate,
    last: NaiveDate,
    index: u32,
    exhausted: bool,
}

impl Iterator for WindowIter {
    type Item = (u32, NaiveDate);

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || self.next > self.last {
            self.exhausted = true;
            return None;
        }
        let item = (self.index, self.next);
        self.index += 1;
        match self.next.succ_opt() {
            Some(day) => self.next = day,
            None => self.exhausted = true,
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted || self.next > self.last {
            return (0, Some(0));
        }
        let remaining = usize::try_from((self.last - self.next).num_days() + 1).unwrap_or(0);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WindowIter {}

/// The strictly increasing sequence of study days from `anchor` up to
/// `min(anchor + window_length - 1, through)`, one per calendar day.
///
/// Empty when `through` precedes `anchor` (the participant anchored on or
/// after the evaluation day) or when `window_length` is zero.
#[must_use]
pub fn iterate_days(anchor: NaiveDate, through: NaiveDate, window_length: u32) -> WindowIter {
    let window_end = anchor
        .checked_add_days(chrono::Days::new(u64::from(window_length.saturating_sub(1))))
        .unwrap_or(NaiveDate::MAX);
    let last = window_end.min(through);
    WindowIter {
        next: anchor,
        last,
        index: 0,
        exhausted: window_length == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn full_window_when_through_is_far() {
        let days: Vec<_> = iterate_days(date(2024, 1, 1), date(2024, 3, 1), 14).collect();
        assert_eq!(days.len(), 14);
        assert_eq!(days[0], (0, date(2024, 1, 1)));
        assert_eq!(days[13], (13, date(2024, 1, 14)));
    }

    #[test]
    fn truncates_at_through_day() {
        let days: Vec<_> = iterate_days(date(2024, 1, 1), date(2024, 1, 3), 14).collect();
        assert_eq!(
            days,
            vec![
                (0, date(2024, 1, 1)),
                (1, date(2024, 1, 2)),
                (2, date(2024, 1, 3)),
            ]
        );
    }

    #[test]
    fn empty_when_through_precedes_anchor() {
        let days: Vec<_> = iterate_days(date(2024, 1, 5), date(2024, 1, 4), 14).collect();
        assert!(days.is_empty());
    }

    #[test]
    fn single_day_window() {
        let days: Vec<_> = iterate_days(date(2024, 1, 5), date(2024, 1, 9), 1).collect();
        assert_eq!(days, vec![(0, date(2024, 1, 5))]);
    }

    #[test]
    fn crosses_month_boundaries() {
        let days: Vec<_> = iterate_days(date(2024, 1, 30), date(2024, 2, 2), 14).collect();
        assert_eq!(
            days,
            vec![
                (0, date(2024, 1, 30)),
                (1, date(2024, 1, 31)),
                (2, date(2024, 2, 1)),
                (3, date(2024, 2, 2)),
            ]
        );
    }

    #[test]
    fn iterator_is_restartable() {
        let iter = iterate_days(date(2024, 1, 1), date(2024, 1, 10), 14);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn size_hint_is_exact() {
        let iter = iterate_days(date(2024, 1, 1), date(2024, 3, 1), 14);
        assert_eq!(iter.len(), 14);
    }
}
