//! Per-day compliance rule evaluation.
//!
//! [`evaluate_day`] is a pure function: counts in, classification out. All
//! thresholds arrive in an explicit [`RequirementSet`]; nothing is read from
//! ambient state, and all I/O stays in the orchestrator.

use serde::Serialize;

use crate::requirements::RequirementSet;

/// Rolling per-window totals carried from one day to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeState {
    pub active: u32,
    pub skipped: u32,
    /// Current run of consecutive skipped days.
    pub skip_streak: u32,
    /// A skip tolerance was exceeded on some earlier day. Sticky for the
    /// rest of the window, even after the streak resets.
    pub violated: bool,
}

/// The classification of a single finalized study day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayResult {
    pub active: bool,
    pub cumulative_active: u32,
    pub cumulative_skipped: u32,
    pub skip_streak: u32,
    /// A skip tolerance was exceeded on or before this day. Latches for the
    /// rest of the window; exposed for downstream policy, the engine itself
    /// never acts on it.
    pub window_violation: bool,
    pub on_track: bool,
}

impl DayResult {
    #[must_use]
    pub const fn state(&self) -> CumulativeState {
        CumulativeState {
            active: self.cumulative_active,
            skipped: self.cumulative_skipped,
            skip_streak: self.skip_streak,
            violated: self.window_violation,
        }
    }
}

/// Classify one study day and roll the cumulative window state forward.
///
/// A day is active iff both thresholds hold: `retrievals >= min_retrievals`
/// and `engagements >= min_engagement`. The on-track projection is a
/// necessary-condition heuristic: it assumes every remaining day could still
/// be active. On the window's final day it degenerates to
/// `cumulative_active >= min_active_days` exactly.
#[must_use]
pub fn evaluate_day(
    retrievals: u32,
    engagements: u32,
    reqs: &RequirementSet,
    prev: CumulativeState,
    day_index: u32,
) -> DayResult {
    let active = retrievals >= reqs.min_retrievals && engagements >= reqs.min_engagement;

    let (cumulative_active, cumulative_skipped, skip_streak) = if active {
        (prev.active + 1, prev.skipped, 0)
    } else {
        (prev.active, prev.skipped + 1, prev.skip_streak + 1)
    };

    let window_violation = prev.violated
        || skip_streak > reqs.max_skip_span
        || cumulative_skipped > reqs.max_skip_days;

    let days_elapsed = day_index + 1;
    let days_left = reqs.window_days.saturating_sub(days_elapsed);
    let need = reqs.min_active_days.saturating_sub(cumulative_active);
    let on_track = need <= days_left;

    DayResult {
        active,
        cumulative_active,
        cumulative_skipped,
        skip_streak,
        window_violation,
        on_track,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::RequirementTable;

    fn reqs() -> RequirementSet {
        // window 14, min active 10, retrievals >= 1, engagement >= 3,
        // skip span 3, skip days 4, cutoff 5.
        RequirementTable::default()
            .resolve("test")
            .expect("defaults validate")
    }

    fn zero() -> CumulativeState {
        CumulativeState::default()
    }

    #[test]
    fn active_requires_both_thresholds() {
        let r = reqs();
        assert!(evaluate_day(1, 3, &r, zero(), 0).active);
        assert!(!evaluate_day(1, 2, &r, zero(), 0).active);
        assert!(!evaluate_day(0, 5, &r, zero(), 0).active);
    }

    #[test]
    fn day_zero_cumulative_equals_own_flag() {
        let r = reqs();
        assert_eq!(evaluate_day(1, 3, &r, zero(), 0).cumulative_active, 1);
        assert_eq!(evaluate_day(0, 0, &r, zero(), 0).cumulative_active, 0);
    }

    #[test]
    fn active_day_resets_skip_streak() {
        let r = reqs();
        let prev = CumulativeState {
            active: 2,
            skipped: 2,
            skip_streak: 2,
            violated: false,
        };
        let result = evaluate_day(1, 3, &r, prev, 4);
        assert_eq!(result.skip_streak, 0);
        assert_eq!(result.cumulative_skipped, 2);
        assert_eq!(result.cumulative_active, 3);
    }

    #[test]
    fn streak_past_span_flags_violation() {
        let r = reqs();
        let mut state = zero();
        for index in 0..4 {
            let result = evaluate_day(0, 0, &r, state, index);
            state = result.state();
            // max_skip_span = 3: the fourth consecutive skip violates.
            assert_eq!(result.window_violation, index == 3);
        }
    }

    #[test]
    fn span_violation_latches_after_recovery() {
        let r = reqs();
        let mut state = zero();
        // Four consecutive skips blow max_skip_span = 3, then four active
        // days reset the streak. The flag must not clear with it.
        for index in 0..8 {
            let (retrievals, engagements) = if index < 4 { (0, 0) } else { (1, 3) };
            let result = evaluate_day(retrievals, engagements, &r, state, index);
            state = result.state();
            assert_eq!(result.window_violation, index >= 3, "day {index}");
        }
        assert_eq!(state.skip_streak, 0);
        assert!(state.violated);
    }

    #[test]
    fn total_skips_past_budget_flags_violation() {
        let r = reqs();
        let mut state = zero();
        let mut violations = Vec::new();
        // Alternate skip/active so the streak never exceeds 1.
        for index in 0..10 {
            let (retrievals, engagements) = if index % 2 == 0 { (0, 0) } else { (1, 3) };
            let result = evaluate_day(retrievals, engagements, &r, state, index);
            state = result.state();
            violations.push(result.window_violation);
        }
        // Skips land on even indexes; the fifth skip (index 8) exceeds
        // max_skip_days = 4.
        assert_eq!(state.skipped, 5);
        assert!(!violations[6]);
        assert!(violations[8]);
        assert!(violations[9], "violation persists once total is exceeded");
    }

    #[test]
    fn on_track_boundary_at_final_day() {
        let r = reqs();
        // Last day of a 14-day window, 10 required.
        let met = CumulativeState {
            active: 10,
            skipped: 3,
            skip_streak: 3,
            violated: false,
        };
        let result = evaluate_day(0, 0, &r, met, 13);
        assert!(result.on_track, "10 of 10 on the final day is on track");

        let short = CumulativeState {
            active: 9,
            skipped: 4,
            skip_streak: 4,
            violated: false,
        };
        let result = evaluate_day(0, 0, &r, short, 13);
        assert!(!result.on_track, "need=1 > days_left=0");
    }

    #[test]
    fn on_track_holds_once_requirement_met() {
        // Active on days 0-9, inactive 10-13: cumulative caps at 10 and
        // on_track stays true because need = 0.
        let r = reqs();
        let mut state = zero();
        for index in 0..14 {
            let (retrievals, engagements) = if index < 10 { (1, 3) } else { (0, 0) };
            let result = evaluate_day(retrievals, engagements, &r, state, index);
            assert!(result.on_track, "day {index} should be on track");
            state = result.state();
        }
        assert_eq!(state.active, 10);
    }

    #[test]
    fn off_track_when_remaining_days_cannot_cover_need() {
        let r = reqs();
        // 8 skips in: day_index 7, zero active. need = 10, days_left = 6.
        let state = CumulativeState {
            active: 0,
            skipped: 7,
            skip_streak: 7,
            violated: false,
        };
        let result = evaluate_day(0, 0, &r, state, 7);
        assert!(!result.on_track);
    }
}
