//! Post-critique transition decision.

use crate::core::types::{IterationRecord, Verdict};

/// Consecutive non-improving steps that count as a stall.
pub const STALL_WINDOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Synthesize again with the critic's feedback.
    Generate,
    /// Stop and hand the final verdict to the reporter.
    Report(Verdict),
}

/// Decide the next stage after the critic.
///
/// `iteration` is the counter after the critic's increment. The budget
/// check runs before the retry check so the loop never generates past
/// `max_iterations`.
pub fn route(verdict: Verdict, iteration: u32, max_iterations: u32, stalled: bool) -> Route {
    match verdict {
        Verdict::Success | Verdict::SourceError => Route::Report(verdict),
        _ if iteration > max_iterations => Route::Report(Verdict::MaxIterations),
        v if v.is_retry() && stalled => Route::Report(Verdict::Stalled),
        v if v.is_retry() => Route::Generate,
        other => Route::Report(other),
    }
}

/// True when passed-count failed to improve for `window` consecutive steps.
pub fn is_stalled(records: &[IterationRecord], window: usize) -> bool {
    if window == 0 || records.len() <= window {
        return false;
    }
    records[records.len() - window - 1..]
        .windows(2)
        .all(|pair| pair[1].passed <= pair[0].passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: u32, passed: u32) -> IterationRecord {
        IterationRecord {
            iteration,
            collected: 5,
            passed,
            failed: 5 - passed,
            errors: 0,
        }
    }

    #[test]
    fn terminal_verdicts_report_even_over_budget() {
        assert_eq!(route(Verdict::Success, 9, 3, true), Route::Report(Verdict::Success));
        assert_eq!(
            route(Verdict::SourceError, 1, 3, false),
            Route::Report(Verdict::SourceError)
        );
    }

    #[test]
    fn budget_check_wins_over_retry() {
        assert_eq!(route(Verdict::NeedsFix, 4, 3, false), Route::Report(Verdict::MaxIterations));
        assert_eq!(route(Verdict::NeedsFix, 3, 3, false), Route::Generate);
        assert_eq!(route(Verdict::Incomplete, 2, 3, false), Route::Generate);
    }

    #[test]
    fn stall_overrides_retry_within_budget() {
        assert_eq!(route(Verdict::NeedsFix, 3, 5, true), Route::Report(Verdict::Stalled));
        assert_eq!(route(Verdict::NeedsFix, 6, 5, true), Route::Report(Verdict::MaxIterations));
    }

    #[test]
    fn unknown_and_declared_exhaustion_go_to_reporter() {
        assert_eq!(route(Verdict::Unknown, 1, 3, false), Route::Report(Verdict::Unknown));
        assert_eq!(
            route(Verdict::MaxIterations, 1, 3, false),
            Route::Report(Verdict::MaxIterations)
        );
    }

    #[test]
    fn stall_needs_two_non_improving_steps() {
        assert!(!is_stalled(&[record(1, 1), record(2, 1)], STALL_WINDOW));
        assert!(is_stalled(&[record(1, 2), record(2, 2), record(3, 1)], STALL_WINDOW));
        assert!(!is_stalled(&[record(1, 1), record(2, 1), record(3, 2)], STALL_WINDOW));
        assert!(!is_stalled(&[record(1, 1), record(2, 2), record(3, 2)], STALL_WINDOW));
        assert!(is_stalled(
            &[record(1, 0), record(2, 3), record(3, 3), record(4, 3)],
            STALL_WINDOW
        ));
    }
}
