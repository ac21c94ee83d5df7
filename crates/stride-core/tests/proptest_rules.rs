//! Property tests for the day-evaluation rules.

use proptest::prelude::*;
use stride_core::requirements::{RequirementSet, RequirementTable};
use stride_core::rules::{CumulativeState, evaluate_day};

fn arb_reqs() -> impl Strategy<Value = RequirementSet> {
    (1u32..=28, 1u32..=28, 0u32..=5, 0u32..=5, 0u32..=6, 0u32..=10).prop_map(
        |(window, min_active, min_retr, min_eng, span, skips)| {
            let table = RequirementTable {
                window_days: Some(window),
                min_active_days: Some(min_active.min(window)),
                min_retrievals: Some(min_retr),
                min_engagement: Some(min_eng),
                max_skip_span: Some(span),
                max_skip_days: Some(skips),
                cutoff_hour: Some(5),
                scope: None,
            };
            table.resolve("prop").expect("generated thresholds validate")
        },
    )
}

/// A window's worth of daily counts.
fn arb_counts() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::vec((0u32..=6, 0u32..=10), 1..=28)
}

/// Walk a window of daily counts, truncated to the window length just as
/// the orchestrator's day iterator is.
fn walk(reqs: &RequirementSet, counts: &[(u32, u32)]) -> Vec<stride_core::rules::DayResult> {
    let mut prev = CumulativeState::default();
    let mut results = Vec::with_capacity(counts.len());
    let in_window = counts.iter().take(reqs.window_days as usize);
    for (index, (retrievals, engagements)) in in_window.enumerate() {
        let result = evaluate_day(
            *retrievals,
            *engagements,
            reqs,
            prev,
            u32::try_from(index).expect("window fits in u32"),
        );
        prev = result.state();
        results.push(result);
    }
    results
}

proptest! {
    #[test]
    fn cumulative_totals_are_monotone_and_step_by_one(
        reqs in arb_reqs(),
        counts in arb_counts(),
    ) {
        let results = walk(&reqs, &counts);
        let mut prev = CumulativeState::default();
        for result in &results {
            let active_step = result.cumulative_active - prev.active;
            let skipped_step = result.cumulative_skipped - prev.skipped;
            prop_assert!(active_step + skipped_step == 1, "exactly one total advances per day");
            prop_assert_eq!(active_step == 1, result.active);
            prev = result.state();
        }
    }

    #[test]
    fn totals_always_sum_to_days_elapsed(
        reqs in arb_reqs(),
        counts in arb_counts(),
    ) {
        let results = walk(&reqs, &counts);
        for (index, result) in results.iter().enumerate() {
            let elapsed = u32::try_from(index + 1).expect("fits");
            prop_assert_eq!(result.cumulative_active + result.cumulative_skipped, elapsed);
        }
    }

    #[test]
    fn skip_streak_resets_exactly_on_active_days(
        reqs in arb_reqs(),
        counts in arb_counts(),
    ) {
        let results = walk(&reqs, &counts);
        let mut expected_streak = 0u32;
        for result in &results {
            if result.active {
                expected_streak = 0;
            } else {
                expected_streak += 1;
            }
            prop_assert_eq!(result.skip_streak, expected_streak);
        }
    }

    #[test]
    fn on_track_never_recovers_after_final_loss(
        reqs in arb_reqs(),
        counts in arb_counts(),
    ) {
        // Once the remaining days cannot cover the shortfall, later days
        // cannot flip the projection back: the shortfall shrinks by at most
        // one per day, exactly as fast as the remaining days do.
        let results = walk(&reqs, &counts);
        let mut lost = false;
        for result in &results {
            if lost {
                prop_assert!(!result.on_track);
            }
            lost = !result.on_track;
        }
    }

    #[test]
    fn window_violation_never_clears(
        reqs in arb_reqs(),
        counts in arb_counts(),
    ) {
        let results = walk(&reqs, &counts);
        let mut violated = false;
        for result in &results {
            if violated {
                prop_assert!(result.window_violation, "the flag latches for the window");
            }
            violated = result.window_violation;
        }
    }

    #[test]
    fn evaluation_is_deterministic(
        reqs in arb_reqs(),
        counts in arb_counts(),
    ) {
        prop_assert_eq!(walk(&reqs, &counts), walk(&reqs, &counts));
    }
}
